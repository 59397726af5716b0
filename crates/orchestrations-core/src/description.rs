use crate::cron::CronExpression;
use crate::error::{OrchestrationError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptionId(pub Uuid);

impl DescriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DescriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DescriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// `(name, version)`: the immutable identity of a description. Two versions
/// of the same name are unrelated descriptions that coexist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrchestrationDescriptionUniqueName {
    name: String,
    version: u32,
}

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_\-\.]*$").expect("static name pattern is valid")
    })
}

impl OrchestrationDescriptionUniqueName {
    pub fn new(name: impl Into<String>, version: u32) -> Result<Self> {
        let name = name.into();
        if name.len() > 128 || !name_re().is_match(&name) {
            return Err(OrchestrationError::InvalidName(name));
        }
        if version == 0 {
            return Err(OrchestrationError::InvalidVersion(version));
        }
        Ok(Self { name, version })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Display for OrchestrationDescriptionUniqueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Parses `name:version`.
impl std::str::FromStr for OrchestrationDescriptionUniqueName {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        let (name, version) = s
            .rsplit_once(':')
            .ok_or_else(|| OrchestrationError::InvalidName(s.to_string()))?;
        let version = version
            .parse::<u32>()
            .map_err(|_| OrchestrationError::InvalidName(s.to_string()))?;
        Self::new(name, version)
    }
}

// ---------------------------------------------------------------------------
// StepDescription
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescription {
    /// 1-based, contiguous in declaration order.
    pub sequence: u32,
    pub description: String,
    #[serde(default)]
    pub can_be_skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Shape comparison
// ---------------------------------------------------------------------------

/// Result of comparing a declared description against a persisted one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeComparison {
    Identical,
    /// Metadata differences only: function name, schedulability, the
    /// under-development flag.
    Compatible(Vec<String>),
    /// Any difference in the step list, the parameter schema or the
    /// recurring expression.
    Breaking(Vec<String>),
}

// ---------------------------------------------------------------------------
// OrchestrationDescription
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationDescription {
    pub id: DescriptionId,
    pub unique_name: OrchestrationDescriptionUniqueName,
    #[serde(default)]
    pub can_be_scheduled: bool,
    /// Entry point of the durable-execution host that runs this orchestration.
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recurring_cron_expression: Option<CronExpression>,
    #[serde(default)]
    steps: Vec<StepDescription>,
    /// Structural description of the parameter type. Compared for equality
    /// during synchronization.
    #[serde(default)]
    pub parameter_schema: serde_json::Value,
    #[serde(default)]
    pub is_under_development: bool,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    /// Optimistic-concurrency counter, bumped by the store on every update.
    #[serde(default)]
    pub revision: u64,
}

fn default_enabled() -> bool {
    true
}

impl OrchestrationDescription {
    pub fn new(
        unique_name: OrchestrationDescriptionUniqueName,
        function_name: impl Into<String>,
    ) -> Self {
        Self {
            id: DescriptionId::new(),
            unique_name,
            can_be_scheduled: false,
            function_name: function_name.into(),
            recurring_cron_expression: None,
            steps: Vec::new(),
            parameter_schema: serde_json::Value::Null,
            is_under_development: false,
            is_enabled: true,
            revision: 0,
        }
    }

    pub fn steps(&self) -> &[StepDescription] {
        &self.steps
    }

    pub fn step(&self, sequence: u32) -> Option<&StepDescription> {
        self.steps.iter().find(|s| s.sequence == sequence)
    }

    /// Append a step; returns its sequence number.
    pub fn append_step_description(&mut self, description: impl Into<String>) -> u32 {
        let sequence = self.steps.len() as u32 + 1;
        self.steps.push(StepDescription {
            sequence,
            description: description.into(),
            can_be_skipped: false,
            skip_reason: None,
        });
        sequence
    }

    /// Append a skip-eligible step. A non-empty skip reason is required.
    pub fn append_skippable_step_description(
        &mut self,
        description: impl Into<String>,
        skip_reason: impl Into<String>,
    ) -> Result<u32> {
        let sequence = self.steps.len() as u32 + 1;
        let skip_reason = skip_reason.into();
        if skip_reason.trim().is_empty() {
            return Err(OrchestrationError::MissingSkipReason {
                description: self.unique_name.to_string(),
                sequence,
            });
        }
        self.steps.push(StepDescription {
            sequence,
            description: description.into(),
            can_be_skipped: true,
            skip_reason: Some(skip_reason),
        });
        Ok(sequence)
    }

    pub fn recurring_cron_expression(&self) -> Option<&CronExpression> {
        self.recurring_cron_expression.as_ref()
    }

    /// Set or clear the recurring schedule. An empty string clears it; an
    /// invalid expression is rejected and leaves the description unchanged.
    pub fn set_recurring_cron_expression(&mut self, expression: &str) -> Result<()> {
        if expression.trim().is_empty() {
            self.recurring_cron_expression = None;
            return Ok(());
        }
        self.recurring_cron_expression = Some(CronExpression::parse(expression)?);
        Ok(())
    }

    pub fn is_recurring(&self) -> bool {
        self.recurring_cron_expression.is_some()
    }

    /// Check the invariants that construction through the `append_*` methods
    /// already guarantees. Used on descriptions that arrive deserialized.
    pub fn validate(&self) -> Result<()> {
        Self::validate_steps(&self.unique_name, &self.steps)
    }

    fn validate_steps(
        unique_name: &OrchestrationDescriptionUniqueName,
        steps: &[StepDescription],
    ) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.sequence != expected {
                return Err(OrchestrationError::InvalidStepSequence {
                    description: unique_name.to_string(),
                    reason: format!(
                        "step at position {expected} has sequence {}; sequences must be contiguous from 1",
                        step.sequence
                    ),
                });
            }
            let has_reason = step
                .skip_reason
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty());
            if step.can_be_skipped && !has_reason {
                return Err(OrchestrationError::MissingSkipReason {
                    description: unique_name.to_string(),
                    sequence: step.sequence,
                });
            }
        }
        Ok(())
    }

    /// Compare this (declared) description with a `persisted` one of the same
    /// unique name.
    pub fn compare_shape(&self, persisted: &OrchestrationDescription) -> ShapeComparison {
        let mut breaking = Vec::new();
        let mut compatible = Vec::new();

        if self.steps.len() != persisted.steps.len() {
            breaking.push(format!(
                "step count changed from {} to {}",
                persisted.steps.len(),
                self.steps.len()
            ));
        }
        for (declared, stored) in self.steps.iter().zip(persisted.steps.iter()) {
            if declared.sequence != stored.sequence {
                breaking.push(format!(
                    "step sequence {} changed to {}",
                    stored.sequence, declared.sequence
                ));
            }
            if declared.can_be_skipped != stored.can_be_skipped {
                breaking.push(format!(
                    "skip eligibility of step {} changed",
                    stored.sequence
                ));
            }
            if declared.description != stored.description {
                breaking.push(format!("description of step {} changed", stored.sequence));
            }
            if declared.skip_reason != stored.skip_reason {
                breaking.push(format!("skip reason of step {} changed", stored.sequence));
            }
        }
        if self.parameter_schema != persisted.parameter_schema {
            breaking.push("parameter schema changed".to_string());
        }

        if self.recurring_cron_expression != persisted.recurring_cron_expression {
            breaking.push("recurring cron expression changed".to_string());
        }
        if self.function_name != persisted.function_name {
            compatible.push("function name changed".to_string());
        }
        if self.can_be_scheduled != persisted.can_be_scheduled {
            compatible.push("can_be_scheduled changed".to_string());
        }
        if self.is_under_development != persisted.is_under_development {
            compatible.push("is_under_development changed".to_string());
        }

        if !breaking.is_empty() {
            ShapeComparison::Breaking(breaking)
        } else if !compatible.is_empty() {
            ShapeComparison::Compatible(compatible)
        } else {
            ShapeComparison::Identical
        }
    }

    /// Copy the declared definition onto this persisted record, keeping its
    /// identity, enablement and revision.
    pub(crate) fn overwrite_definition_from(&mut self, declared: &OrchestrationDescription) {
        self.can_be_scheduled = declared.can_be_scheduled;
        self.function_name = declared.function_name.clone();
        self.recurring_cron_expression = declared.recurring_cron_expression.clone();
        self.steps = declared.steps.clone();
        self.parameter_schema = declared.parameter_schema.clone();
        self.is_under_development = declared.is_under_development;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
