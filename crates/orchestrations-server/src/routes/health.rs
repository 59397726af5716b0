use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use orchestrations_core::register::{HealthReport, HealthStatus};

use crate::state::AppState;

/// GET /api/health: outcome of the last description synchronization.
pub async fn get_health(State(app): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = app.health.report();
    let status = match report.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}
