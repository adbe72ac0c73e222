use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::lifecycle::driver::{self, Acceptance};
use crate::lifecycle::views::{self, AvailableDelivery};
use crate::models::delivery::{Bid, Delivery, GeoPoint};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries/available", get(available))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/comments", get(comments))
        .route("/deliveries/:id/interest", post(interest))
        .route("/deliveries/:id/bids", post(bid))
        .route("/deliveries/:id/accept", post(accept))
        .route("/deliveries/:id/complete", post(complete))
        .route("/deliveries/:id/cancel", post(cancel))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub max_km: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverBody {
    pub driver_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidBody {
    pub driver_id: String,
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBody {
    pub driver_id: String,
    #[serde(default)]
    pub reason: String,
}

async fn available(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<Vec<AvailableDelivery>>, AppError> {
    let origin = match (query.lat, query.lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
        (None, None) => None,
        _ => {
            return Err(AppError::BadRequest(
                "lat and lng must be given together".to_string(),
            ));
        }
    };
    Ok(Json(views::available_deliveries(&state, origin, query.max_km).await?))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(views::delivery(&state, &id).await?))
}

async fn comments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Value>>, AppError> {
    Ok(Json(views::delivery_comments(&state, &id).await?))
}

async fn interest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<DriverBody>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(driver::register_interest(&state, &id, &body.driver_id).await?))
}

async fn bid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<BidBody>,
) -> Result<Json<Bid>, AppError> {
    Ok(Json(driver::place_bid(&state, &id, &body.driver_id, body.amount).await?))
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<Acceptance>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(driver::accept(&state, &id, &body).await?))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<DriverBody>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(driver::complete(&state, &id, &body.driver_id).await?))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CancelBody>,
) -> Result<Json<Delivery>, AppError> {
    let reason = if body.reason.trim().is_empty() {
        "Sin motivo"
    } else {
        body.reason.trim()
    };
    Ok(Json(
        driver::cancel_by_driver(&state, &id, &body.driver_id, reason).await?,
    ))
}
