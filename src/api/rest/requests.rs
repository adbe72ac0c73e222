use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::AppError;
use crate::lifecycle::company::{AssignOutcome, ConfirmOutcome, PublishOutcome};
use crate::lifecycle::company as transitions;
use crate::lifecycle::pricing::PricingOptions;
use crate::lifecycle::views::{self, ContactLink, RequestDetail};
use crate::models::company::{CompanyIdentity, DriverProfile};
use crate::models::request::Request;
use crate::refresh::{self, Snapshot};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/requests/pending", get(pending))
        .route("/requests/active", get(active))
        .route("/requests/completed", get(completed))
        .route("/requests/:id", get(detail))
        .route("/requests/:id/contact", get(contact))
        .route("/requests/:id/drivers", get(drivers))
        .route("/requests/:id/confirm", post(confirm))
        .route("/requests/:id/publish", post(publish))
        .route("/requests/:id/unpublish", post(unpublish))
        .route("/requests/:id/assign", post(assign))
        .route("/requests/:id/deny", post(deny))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishBody {
    #[serde(default)]
    pub delivery_id: Option<String>,
    #[serde(default)]
    pub pricing: Option<PricingOptions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpublishBody {
    #[serde(default)]
    pub delivery_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBody {
    pub driver_id: String,
    pub delivery_id: String,
}

async fn dashboard(
    State(state): State<Arc<AppState>>,
    company: CompanyIdentity,
) -> Result<Json<Snapshot>, AppError> {
    let snapshot = refresh::dashboard(&state, &company).await?;
    Ok(Json(snapshot.as_ref().clone()))
}

async fn pending(
    State(state): State<Arc<AppState>>,
    company: CompanyIdentity,
) -> Result<Json<Vec<Request>>, AppError> {
    Ok(Json(views::pending_requests(&state, &company).await?))
}

async fn active(
    State(state): State<Arc<AppState>>,
    company: CompanyIdentity,
) -> Result<Json<Vec<Request>>, AppError> {
    Ok(Json(views::active_requests(&state, &company).await?))
}

async fn completed(
    State(state): State<Arc<AppState>>,
    company: CompanyIdentity,
) -> Result<Json<Vec<Request>>, AppError> {
    Ok(Json(views::completed_requests(&state, &company).await?))
}

async fn detail(
    State(state): State<Arc<AppState>>,
    company: CompanyIdentity,
    Path(id): Path<String>,
) -> Result<Json<RequestDetail>, AppError> {
    Ok(Json(views::request_detail(&state, &company, &id).await?))
}

async fn contact(
    State(state): State<Arc<AppState>>,
    _company: CompanyIdentity,
    Path(id): Path<String>,
) -> Result<Json<ContactLink>, AppError> {
    Ok(Json(views::contact_link(&state, &id).await?))
}

async fn drivers(
    State(state): State<Arc<AppState>>,
    _company: CompanyIdentity,
    Path(id): Path<String>,
) -> Result<Json<Vec<DriverProfile>>, AppError> {
    Ok(Json(views::request_drivers(&state, &id).await?))
}

async fn confirm(
    State(state): State<Arc<AppState>>,
    company: CompanyIdentity,
    Path(id): Path<String>,
) -> Result<Json<ConfirmOutcome>, AppError> {
    Ok(Json(transitions::confirm(&state, &company, &id).await?))
}

async fn publish(
    State(state): State<Arc<AppState>>,
    company: CompanyIdentity,
    Path(id): Path<String>,
    body: Option<Json<PublishBody>>,
) -> Result<Json<PublishOutcome>, AppError> {
    let Json(body) = body.unwrap_or_default();
    let outcome = transitions::publish(
        &state,
        &company,
        &id,
        body.delivery_id.as_deref(),
        body.pricing.as_ref(),
    )
    .await?;
    Ok(Json(outcome))
}

async fn unpublish(
    State(state): State<Arc<AppState>>,
    company: CompanyIdentity,
    Path(id): Path<String>,
    body: Option<Json<UnpublishBody>>,
) -> Result<Json<Value>, AppError> {
    let Json(body) = body.unwrap_or_default();
    transitions::unpublish(&state, &company, &id, body.delivery_id.as_deref()).await?;
    Ok(Json(json!({ "requestId": id, "publication": "unpublished" })))
}

async fn assign(
    State(state): State<Arc<AppState>>,
    company: CompanyIdentity,
    Path(id): Path<String>,
    Json(body): Json<AssignBody>,
) -> Result<Json<AssignOutcome>, AppError> {
    let outcome =
        transitions::assign_driver(&state, &company, &id, &body.driver_id, &body.delivery_id).await?;
    Ok(Json(outcome))
}

async fn deny(
    State(state): State<Arc<AppState>>,
    company: CompanyIdentity,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    transitions::deny(&state, &company, &id).await?;
    Ok(Json(json!({ "requestId": id, "status": "denegado" })))
}
