use crate::description::StepDescription;
use crate::error::{OrchestrationError, Result};
use crate::lifecycle::{StepLifecycle, StepTerminationState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Failure diagnostics
// ---------------------------------------------------------------------------

/// A business-validation error reported by an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub message: String,
    pub error_code: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code: error_code.into(),
        }
    }
}

/// Diagnostic context recorded on a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One unit of work inside an instance. Copied from the description's step
/// list when the instance is created and never re-derived afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub sequence: u32,
    pub description: String,
    #[serde(default)]
    pub can_be_skipped: bool,
    #[serde(default)]
    pub lifecycle: StepLifecycle,
    /// Set before execution when input conditions rule the step out.
    #[serde(default)]
    pub skip_requested: bool,
    /// Step-specific payload kept for audit and history.
    #[serde(default)]
    pub custom_state: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
}

impl Step {
    pub fn from_description(description: &StepDescription) -> Self {
        Self {
            sequence: description.sequence,
            description: description.description.clone(),
            can_be_skipped: description.can_be_skipped,
            lifecycle: StepLifecycle::NotStarted,
            skip_requested: false,
            custom_state: serde_json::Value::Null,
            failure: None,
        }
    }

    /// Pre-select this step for skipping. Only skip-eligible steps that have
    /// not started can be selected.
    pub fn request_skip(&mut self, instance_id: &str) -> Result<()> {
        if !self.can_be_skipped || !self.lifecycle.is_not_started() {
            return Err(OrchestrationError::StepCannotBeSkipped {
                instance_id: instance_id.to_string(),
                sequence: self.sequence,
            });
        }
        self.skip_requested = true;
        Ok(())
    }

    pub fn outcome(&self) -> Option<StepTerminationState> {
        self.lifecycle.outcome()
    }

    pub fn is_skipped(&self) -> bool {
        self.outcome() == Some(StepTerminationState::Skipped)
    }

    pub(crate) fn skip(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.lifecycle.transition_to_skipped(now)
    }

    pub(crate) fn succeed(&mut self, now: DateTime<Utc>, output: serde_json::Value) -> Result<()> {
        self.lifecycle
            .transition_to_terminated(now, StepTerminationState::Succeeded)?;
        self.custom_state = output;
        Ok(())
    }

    pub(crate) fn fail(&mut self, now: DateTime<Utc>, failure: StepFailure) -> Result<()> {
        self.lifecycle
            .transition_to_terminated(now, StepTerminationState::Failed)?;
        self.failure = Some(failure);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn skippable() -> Step {
        Step::from_description(&StepDescription {
            sequence: 2,
            description: "Enqueue".into(),
            can_be_skipped: true,
            skip_reason: Some("No receivers".into()),
        })
    }

    #[test]
    fn request_skip_requires_eligibility() {
        let mut fixed = Step::from_description(&StepDescription {
            sequence: 1,
            description: "Calculate".into(),
            can_be_skipped: false,
            skip_reason: None,
        });
        assert!(matches!(
            fixed.request_skip("i-1"),
            Err(OrchestrationError::StepCannotBeSkipped { sequence: 1, .. })
        ));

        let mut step = skippable();
        step.request_skip("i-1").unwrap();
        assert!(step.skip_requested);
    }

    #[test]
    fn request_skip_rejected_once_started() {
        let mut step = skippable();
        step.lifecycle
            .transition_to_running(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        assert!(step.request_skip("i-1").is_err());
    }

    #[test]
    fn fail_records_diagnostics() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut step = skippable();
        step.lifecycle.transition_to_running(now).unwrap();
        step.fail(
            now,
            StepFailure {
                message: "validation failed".into(),
                errors: vec![ValidationError::new("grid area missing", "E17")],
            },
        )
        .unwrap();
        assert_eq!(step.outcome(), Some(StepTerminationState::Failed));
        assert_eq!(step.failure.as_ref().unwrap().errors[0].error_code, "E17");
    }
}
