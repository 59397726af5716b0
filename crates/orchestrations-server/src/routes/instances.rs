use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use orchestrations_core::description::OrchestrationDescriptionUniqueName;
use orchestrations_core::instance::{InstanceId, OrchestrationInstance};
use orchestrations_core::OrchestrationError;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// `name:version` of the description to filter by.
    pub orchestration: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotifyBody {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

fn to_json(instance: &OrchestrationInstance) -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(serde_json::to_value(instance)?))
}

/// GET /api/instances: newest first, optionally for one orchestration.
pub async fn list_instances(
    State(app): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let result = tokio::task::spawn_blocking(move || {
        let description = match query.orchestration.as_deref() {
            Some(raw) => {
                let unique_name: OrchestrationDescriptionUniqueName = raw.parse()?;
                Some(service.get_description(&unique_name)?.id)
            }
            None => None,
        };
        let instances = service.list_instances(description)?;
        Ok::<_, OrchestrationError>(serde_json::to_value(instances)?)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

/// GET /api/instances/{id}
pub async fn get_instance(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id: InstanceId = id.parse()?;
    let service = app.service.clone();
    let instance = tokio::task::spawn_blocking(move || service.get_instance(id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    to_json(&instance)
}

/// POST /api/instances/{id}/cancel: cancel a scheduled instance before it starts.
pub async fn cancel_instance(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id: InstanceId = id.parse()?;
    let service = app.service.clone();
    let instance = tokio::task::spawn_blocking(move || service.cancel_scheduled_instance(id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    to_json(&instance)
}

/// POST /api/instances/{id}/notify: deliver an external event.
pub async fn notify_instance(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<NotifyBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.event.trim().is_empty() {
        return Err(AppError::bad_request("event name must not be empty"));
    }
    let id: InstanceId = id.parse()?;
    let service = app.service.clone();
    let instance =
        tokio::task::spawn_blocking(move || service.notify_instance(id, &body.event, body.data))
            .await
            .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    to_json(&instance)
}
