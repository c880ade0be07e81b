use axum::{
    Json,
    extract::State,
    http::{StatusCode, Uri},
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;

use crate::{config::AppConfig, models::HealthResponse};

pub mod analytics;
pub mod auth;
pub mod issues;
pub mod uploads;
pub mod users;

/// health
///
/// [Public Route] Liveness probe. Never touches the database.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health(State(config): State<AppConfig>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        timestamp: Utc::now(),
        environment: config.env.as_str().to_string(),
    })
}

/// Fallback for every unmatched path.
pub async fn route_not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Route not found", "path": uri.path() })),
    )
}
