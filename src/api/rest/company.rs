use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, put};
use axum::Json;
use axum::Router;

use crate::error::AppError;
use crate::lifecycle::account::{self, LocationOutcome, LocationUpdate};
use crate::models::company::{City, CompanyIdentity, CompanyOverview};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/company/profile", get(profile))
        .route("/company/location", put(location))
        .route("/cities", get(cities))
}

async fn profile(
    State(state): State<Arc<AppState>>,
    company: CompanyIdentity,
) -> Result<Json<CompanyOverview>, AppError> {
    Ok(Json(account::company_profile(&state, &company).await?))
}

async fn location(
    State(state): State<Arc<AppState>>,
    company: CompanyIdentity,
    Json(update): Json<LocationUpdate>,
) -> Result<Json<LocationOutcome>, AppError> {
    Ok(Json(account::update_location(&state, &company, &update).await?))
}

async fn cities(State(state): State<Arc<AppState>>) -> Result<Json<Vec<City>>, AppError> {
    Ok(Json(account::cities(&state).await?))
}
