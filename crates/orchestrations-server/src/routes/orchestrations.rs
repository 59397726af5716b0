use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use orchestrations_core::commands::Created;
use orchestrations_core::description::OrchestrationDescriptionUniqueName;
use orchestrations_core::instance::{IdempotencyKey, NewInstance};

use crate::error::AppError;
use crate::state::AppState;

/// Body of a start or schedule request.
#[derive(Debug, Default, Deserialize)]
pub struct StartBody {
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub parameter_value: serde_json::Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub skip_step_sequences: Vec<u32>,
}

impl StartBody {
    fn into_new_instance(self) -> NewInstance {
        NewInstance {
            created_by: self.actor.unwrap_or_else(|| "api".to_string()),
            parameter_value: self.parameter_value,
            idempotency_key: self.idempotency_key.and_then(IdempotencyKey::new),
            scheduled_to_run_at: None,
            skip_step_sequences: self.skip_step_sequences,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    pub run_at: DateTime<Utc>,
    #[serde(flatten)]
    pub start: StartBody,
}

/// 201 for a new instance, 200 when the idempotency key resolved to an
/// existing one.
fn created_response(created: Created) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let status = if created.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(serde_json::to_value(&created.instance)?)))
}

/// GET /api/orchestrations: all persisted descriptions.
pub async fn list_orchestrations(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let result = tokio::task::spawn_blocking(move || {
        let descriptions = service.list_descriptions()?;
        let list: Vec<serde_json::Value> = descriptions
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "name": d.unique_name.name(),
                    "version": d.unique_name.version(),
                    "function_name": d.function_name,
                    "can_be_scheduled": d.can_be_scheduled,
                    "recurring_cron_expression": d.recurring_cron_expression(),
                    "is_enabled": d.is_enabled,
                    "is_under_development": d.is_under_development,
                    "steps": d.steps(),
                })
            })
            .collect();
        Ok::<_, orchestrations_core::OrchestrationError>(serde_json::json!(list))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

/// POST /api/orchestrations/{name}/{version}/instances: start a once-off instance.
pub async fn start_orchestration(
    State(app): State<AppState>,
    Path((name, version)): Path<(String, u32)>,
    Json(body): Json<StartBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let unique_name = OrchestrationDescriptionUniqueName::new(name, version)?;
    let service = app.service.clone();
    let created = tokio::task::spawn_blocking(move || {
        service.start_orchestration(&unique_name, body.into_new_instance())
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    created_response(created)
}

/// POST /api/orchestrations/{name}/{version}/schedule: schedule an instance.
pub async fn schedule_orchestration(
    State(app): State<AppState>,
    Path((name, version)): Path<(String, u32)>,
    Json(body): Json<ScheduleBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let unique_name = OrchestrationDescriptionUniqueName::new(name, version)?;
    let service = app.service.clone();
    let created = tokio::task::spawn_blocking(move || {
        service.schedule_orchestration(&unique_name, body.start.into_new_instance(), body.run_at)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    created_response(created)
}
