use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orchestrations_core::error::OrchestrationError;

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(OrchestrationError::InvalidName(msg.into()).into())
    }
}

fn status_for(e: &OrchestrationError) -> StatusCode {
    match e {
        OrchestrationError::InstanceNotFound(_)
        | OrchestrationError::DescriptionNotFound(_)
        | OrchestrationError::StepNotFound { .. } => StatusCode::NOT_FOUND,
        OrchestrationError::DescriptionExists(_)
        | OrchestrationError::DescriptionDisabled(_)
        | OrchestrationError::DuplicateIdempotencyKey(_)
        | OrchestrationError::IdempotencyKeyConflict { .. }
        | OrchestrationError::ConcurrencyConflict(_)
        | OrchestrationError::BreakingChange { .. } => StatusCode::CONFLICT,
        OrchestrationError::InvalidTransition { .. }
        | OrchestrationError::InvalidCronExpression { .. }
        | OrchestrationError::InvalidStepSequence { .. }
        | OrchestrationError::MissingSkipReason { .. }
        | OrchestrationError::StepCannotBeSkipped { .. }
        | OrchestrationError::DescriptionNotSchedulable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestrationError::NotInitialized
        | OrchestrationError::InvalidName(_)
        | OrchestrationError::InvalidVersion(_)
        | OrchestrationError::InvalidTerminationState(_) => StatusCode::BAD_REQUEST,
        OrchestrationError::Storage(_) | OrchestrationError::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        OrchestrationError::Io(_) | OrchestrationError::Yaml(_) | OrchestrationError::Json(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self
            .0
            .downcast_ref::<OrchestrationError>()
            .map(status_for)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(e: OrchestrationError) -> StatusCode {
        AppError(e.into()).into_response().status()
    }

    #[test]
    fn instance_not_found_maps_to_404() {
        assert_eq!(
            status(OrchestrationError::InstanceNotFound("i-1".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn idempotency_conflict_maps_to_409() {
        assert_eq!(
            status(OrchestrationError::IdempotencyKeyConflict { key: "k".into() }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn invalid_transition_maps_to_422() {
        assert_eq!(
            status(OrchestrationError::InvalidTransition {
                from: "terminated(succeeded)".into(),
                to: "running".into(),
                reason: "already terminated".into(),
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn invalid_name_maps_to_400() {
        assert_eq!(
            status(OrchestrationError::InvalidName("bad name".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::bad_request("x").into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn storage_maps_to_503() {
        assert_eq!(
            status(OrchestrationError::Storage("disk".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn other_errors_map_to_500() {
        let response = AppError(anyhow::anyhow!("something unexpected")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
