use crate::description::{DescriptionId, OrchestrationDescription};
use crate::error::{OrchestrationError, Result};
use crate::lifecycle::{InstanceLifecycle, TerminationState};
use crate::step::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| OrchestrationError::InstanceNotFound(s.to_string()))
    }
}

/// Caller-supplied token that maps repeated triggers to a single instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// An external event delivered to a running orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// NewInstance
// ---------------------------------------------------------------------------

/// Creation options for an instance.
#[derive(Debug, Clone, Default)]
pub struct NewInstance {
    pub created_by: String,
    pub parameter_value: serde_json::Value,
    pub idempotency_key: Option<IdempotencyKey>,
    pub scheduled_to_run_at: Option<DateTime<Utc>>,
    /// Skip-eligible steps the caller has already decided to skip.
    pub skip_step_sequences: Vec<u32>,
}

// ---------------------------------------------------------------------------
// OrchestrationInstance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationInstance {
    pub id: InstanceId,
    /// Referenced by id; the step plan below is a copy taken at creation.
    pub description_id: DescriptionId,
    pub lifecycle: InstanceLifecycle,
    steps: Vec<Step>,
    #[serde(default)]
    pub parameter_value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_to_run_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub custom_state: serde_json::Value,
    #[serde(default)]
    pub revision: u64,
}

impl OrchestrationInstance {
    /// Create a not-started instance whose steps mirror `description`'s step
    /// list as it is right now.
    pub fn new(
        description: &OrchestrationDescription,
        options: NewInstance,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut instance = Self {
            id: InstanceId::new(),
            description_id: description.id,
            lifecycle: InstanceLifecycle::NotStarted,
            steps: description
                .steps()
                .iter()
                .map(Step::from_description)
                .collect(),
            parameter_value: options.parameter_value,
            idempotency_key: options.idempotency_key,
            scheduled_to_run_at: options.scheduled_to_run_at,
            created_by: options.created_by,
            created_at: now,
            notifications: Vec::new(),
            custom_state: serde_json::Value::Null,
            revision: 0,
        };
        for sequence in options.skip_step_sequences {
            instance.request_step_skip(sequence)?;
        }
        Ok(instance)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_sequences(&self) -> Vec<u32> {
        self.steps.iter().map(|s| s.sequence).collect()
    }

    pub fn step(&self, sequence: u32) -> Result<&Step> {
        self.steps
            .iter()
            .find(|s| s.sequence == sequence)
            .ok_or_else(|| self.step_not_found(sequence))
    }

    pub fn step_mut(&mut self, sequence: u32) -> Result<&mut Step> {
        let id = self.id;
        self.steps
            .iter_mut()
            .find(|s| s.sequence == sequence)
            .ok_or(OrchestrationError::StepNotFound {
                instance_id: id.to_string(),
                sequence,
            })
    }

    pub fn request_step_skip(&mut self, sequence: u32) -> Result<()> {
        let id = self.id.to_string();
        self.step_mut(sequence)?.request_skip(&id)
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled_to_run_at.is_some()
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.lifecycle.transition_to_running(now)
    }

    pub fn terminate(&mut self, now: DateTime<Utc>, outcome: TerminationState) -> Result<()> {
        self.lifecycle.transition_to_terminated(now, outcome)
    }

    /// Cancel a scheduled instance before it starts.
    pub fn cancel_scheduled(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_scheduled() {
            return Err(OrchestrationError::InvalidTransition {
                from: self.lifecycle.state_name().to_string(),
                to: "terminated(user_canceled)".to_string(),
                reason: "only scheduled instances can be cancelled before start".to_string(),
            });
        }
        self.lifecycle.cancel_before_start(now)
    }

    pub fn record_notification(
        &mut self,
        event: impl Into<String>,
        data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let event = event.into();
        if self.lifecycle.is_terminated() {
            return Err(OrchestrationError::InvalidTransition {
                from: self.lifecycle.state_name().to_string(),
                to: format!("notified({event})"),
                reason: "terminated instances do not accept notifications".to_string(),
            });
        }
        self.notifications.push(Notification {
            event,
            data,
            received_at: now,
        });
        Ok(())
    }

    fn step_not_found(&self, sequence: u32) -> OrchestrationError {
        OrchestrationError::StepNotFound {
            instance_id: self.id.to_string(),
            sequence,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
