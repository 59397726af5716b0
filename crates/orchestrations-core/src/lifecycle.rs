//! Monotonic lifecycle shared by orchestration instances and their steps.
//!
//! ```text
//! NotStarted ──► Running ──► Terminated { outcome }
//!      │                          ▲
//!      └──────────────────────────┘  (skip / cancel before start)
//! ```
//!
//! Every transition records the instant it happened. A transition that does
//! not start from the required state fails with `InvalidTransition`; nothing
//! is ever silently ignored, so recorded timestamps can be trusted.

use crate::error::{OrchestrationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Termination outcomes
// ---------------------------------------------------------------------------

/// How an orchestration instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationState {
    Succeeded,
    Failed,
    UserCanceled,
}

impl TerminationState {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationState::Succeeded => "succeeded",
            TerminationState::Failed => "failed",
            TerminationState::UserCanceled => "user_canceled",
        }
    }
}

impl fmt::Display for TerminationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TerminationState {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(TerminationState::Succeeded),
            "failed" => Ok(TerminationState::Failed),
            "user_canceled" => Ok(TerminationState::UserCanceled),
            _ => Err(OrchestrationError::InvalidTerminationState(s.to_string())),
        }
    }
}

/// How a step ended. `Skipped` is only reachable straight from `NotStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTerminationState {
    Succeeded,
    Failed,
    Skipped,
}

impl StepTerminationState {
    pub fn as_str(self) -> &'static str {
        match self {
            StepTerminationState::Succeeded => "succeeded",
            StepTerminationState::Failed => "failed",
            StepTerminationState::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepTerminationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state. Termination data only exists on the `Terminated` variant,
/// so an outcome on a not-started entity cannot be represented.
///
/// `started_at` is `None` on a terminated lifecycle only when it was
/// terminated without ever running (skipped step, cancelled scheduled
/// instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle<O> {
    NotStarted,
    Running {
        started_at: DateTime<Utc>,
    },
    Terminated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
        terminated_at: DateTime<Utc>,
        outcome: O,
    },
}

pub type InstanceLifecycle = Lifecycle<TerminationState>;
pub type StepLifecycle = Lifecycle<StepTerminationState>;

impl<O> Default for Lifecycle<O> {
    fn default() -> Self {
        Lifecycle::NotStarted
    }
}

impl<O: Copy + fmt::Display> Lifecycle<O> {
    pub fn state_name(&self) -> &'static str {
        match self {
            Lifecycle::NotStarted => "not_started",
            Lifecycle::Running { .. } => "running",
            Lifecycle::Terminated { .. } => "terminated",
        }
    }

    pub fn is_not_started(&self) -> bool {
        matches!(self, Lifecycle::NotStarted)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Lifecycle::Running { .. })
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Lifecycle::Terminated { .. })
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Lifecycle::NotStarted => None,
            Lifecycle::Running { started_at } => Some(*started_at),
            Lifecycle::Terminated { started_at, .. } => *started_at,
        }
    }

    pub fn terminated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Lifecycle::Terminated { terminated_at, .. } => Some(*terminated_at),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<O> {
        match self {
            Lifecycle::Terminated { outcome, .. } => Some(*outcome),
            _ => None,
        }
    }

    /// `NotStarted → Running`.
    pub fn transition_to_running(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_not_started() {
            return Err(self.invalid("running", "only a not-started lifecycle can start"));
        }
        *self = Lifecycle::Running { started_at: now };
        Ok(())
    }

    /// `Running → Terminated`.
    pub fn transition_to_terminated(&mut self, now: DateTime<Utc>, outcome: O) -> Result<()> {
        let Lifecycle::Running { started_at } = *self else {
            return Err(self.invalid(
                &format!("terminated({outcome})"),
                "only a running lifecycle can terminate",
            ));
        };
        *self = Lifecycle::Terminated {
            started_at: Some(started_at),
            terminated_at: now,
            outcome,
        };
        Ok(())
    }

    /// `NotStarted → Terminated` without ever running.
    pub(crate) fn terminate_before_start(&mut self, now: DateTime<Utc>, outcome: O) -> Result<()> {
        if !self.is_not_started() {
            return Err(self.invalid(
                &format!("terminated({outcome})"),
                "only a not-started lifecycle can end without running",
            ));
        }
        *self = Lifecycle::Terminated {
            started_at: None,
            terminated_at: now,
            outcome,
        };
        Ok(())
    }

    fn invalid(&self, to: &str, reason: &str) -> OrchestrationError {
        let from = match self {
            Lifecycle::Terminated { outcome, .. } => format!("terminated({outcome})"),
            other => other.state_name().to_string(),
        };
        OrchestrationError::InvalidTransition {
            from,
            to: to.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl InstanceLifecycle {
    /// Cancels an instance that never started. Terminal outcome is `UserCanceled`.
    pub fn cancel_before_start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.terminate_before_start(now, TerminationState::UserCanceled)
    }
}

impl StepLifecycle {
    /// `NotStarted → Skipped`.
    pub fn transition_to_skipped(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.terminate_before_start(now, StepTerminationState::Skipped)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 9, min, 0).unwrap()
    }

    #[test]
    fn running_then_terminated_records_both_instants() {
        let mut lc = InstanceLifecycle::default();
        lc.transition_to_running(t(0)).unwrap();
        lc.transition_to_terminated(t(5), TerminationState::Succeeded)
            .unwrap();

        assert_eq!(lc.started_at(), Some(t(0)));
        assert_eq!(lc.terminated_at(), Some(t(5)));
        assert_eq!(lc.outcome(), Some(TerminationState::Succeeded));
    }

    #[test]
    fn second_start_is_rejected() {
        let mut lc = InstanceLifecycle::default();
        lc.transition_to_running(t(0)).unwrap();
        let err = lc.transition_to_running(t(1)).unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidTransition { .. }));
        // First start instant is preserved
        assert_eq!(lc.started_at(), Some(t(0)));
    }

    #[test]
    fn terminate_requires_running() {
        let mut lc = InstanceLifecycle::default();
        assert!(lc
            .transition_to_terminated(t(1), TerminationState::Failed)
            .is_err());

        lc.transition_to_running(t(1)).unwrap();
        lc.transition_to_terminated(t(2), TerminationState::Failed)
            .unwrap();

        match lc.transition_to_terminated(t(3), TerminationState::Succeeded) {
            Err(OrchestrationError::InvalidTransition { from, .. }) => {
                assert_eq!(from, "terminated(failed)");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
        assert_eq!(lc.terminated_at(), Some(t(2)));
    }

    #[test]
    fn terminated_cannot_restart() {
        let mut lc = InstanceLifecycle::default();
        lc.transition_to_running(t(0)).unwrap();
        lc.transition_to_terminated(t(1), TerminationState::UserCanceled)
            .unwrap();
        assert!(lc.transition_to_running(t(2)).is_err());
    }

    #[test]
    fn skip_only_from_not_started() {
        let mut step = StepLifecycle::default();
        step.transition_to_skipped(t(0)).unwrap();
        assert_eq!(step.outcome(), Some(StepTerminationState::Skipped));
        assert_eq!(step.started_at(), None);

        let mut running = StepLifecycle::default();
        running.transition_to_running(t(0)).unwrap();
        assert!(running.transition_to_skipped(t(1)).is_err());
    }

    #[test]
    fn cancel_before_start_rejects_running_instance() {
        let mut lc = InstanceLifecycle::default();
        lc.transition_to_running(t(0)).unwrap();
        assert!(lc.cancel_before_start(t(1)).is_err());

        let mut fresh = InstanceLifecycle::default();
        fresh.cancel_before_start(t(1)).unwrap();
        assert_eq!(fresh.outcome(), Some(TerminationState::UserCanceled));
    }

    #[test]
    fn serialized_form_is_tagged() {
        let mut lc = StepLifecycle::default();
        lc.transition_to_running(t(0)).unwrap();
        let json = serde_json::to_value(&lc).unwrap();
        assert_eq!(json["state"], "running");

        let back: StepLifecycle = serde_json::from_value(json).unwrap();
        assert_eq!(back, lc);
    }

    #[test]
    fn termination_state_parses_snake_case_names() {
        for state in [
            TerminationState::Succeeded,
            TerminationState::Failed,
            TerminationState::UserCanceled,
        ] {
            assert_eq!(state.as_str().parse::<TerminationState>().unwrap(), state);
        }
        assert!(matches!(
            "UserCanceled".parse::<TerminationState>(),
            Err(OrchestrationError::InvalidTerminationState(_))
        ));
    }
}
