//! Step execution under a uniform retry and termination contract.
//!
//! [`StepExecutor`] runs exactly one step of an instance:
//!
//! 1. A step pre-selected for skipping is moved to `Skipped` without invoking
//!    the activity.
//! 2. Otherwise the step is moved to `Running` and that transition is
//!    persisted before the activity is invoked.
//! 3. The activity runs under the retry policy. Errors that exhaust the
//!    retries terminate the step as `Failed` with the error recorded; they are
//!    not returned to the caller.
//! 4. A business-validation failure terminates the step as `Failed`; a success
//!    terminates it as `Succeeded` and stores the output as the step's custom
//!    state.
//!
//! Steps only run while their instance is `Running`. An output that cannot
//! be recorded fails the step like any other activity error.
//!
//! Cancellation while the activity runs or while backing off returns
//! `Cancelled` and leaves the step `Running`. Re-running the executor on a
//! `Running` step resumes it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{Config, RetryConfig};
use crate::error::{OrchestrationError, Result};
use crate::instance::InstanceId;
use crate::lifecycle::StepTerminationState;
use crate::step::{StepFailure, ValidationError};
use crate::store::{OrchestrationStore, UnitOfWork};

// ---------------------------------------------------------------------------
// Activity contract
// ---------------------------------------------------------------------------

/// What the activity sees for one attempt.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub instance_id: InstanceId,
    pub sequence: u32,
    /// 1-based attempt number.
    pub attempt: u32,
    pub parameter_value: serde_json::Value,
    pub cancellation: CancellationToken,
}

/// Reported outcome of a completed activity. Errors are a separate channel:
/// an `Err` from the activity is retried, a `ValidationFailed` is not.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityOutcome<T> {
    Succeeded(T),
    ValidationFailed(Vec<ValidationError>),
}

/// The externally performed unit of work behind a step.
#[async_trait]
pub trait StepActivity: Send + Sync {
    type Output: Serialize + Send;

    async fn execute(&self, ctx: &StepContext) -> anyhow::Result<ActivityOutcome<Self::Output>>;
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; 1 disables retries.
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_delay,
            max_delay,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}

// ---------------------------------------------------------------------------
// Result envelopes
// ---------------------------------------------------------------------------

/// Result of a step with a typed output.
#[derive(Debug, Clone, PartialEq)]
pub struct StepExecution<T> {
    pub sequence: u32,
    pub outcome: StepTerminationState,
    /// Present only when the step succeeded.
    pub output: Option<T>,
    pub failure: Option<StepFailure>,
}

/// Result of a step without output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub sequence: u32,
    pub outcome: StepTerminationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
}

impl<T> From<StepExecution<T>> for StepReport {
    fn from(execution: StepExecution<T>) -> Self {
        Self {
            sequence: execution.sequence,
            outcome: execution.outcome,
            failure: execution.failure,
        }
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

pub struct StepExecutor {
    store: Arc<dyn OrchestrationStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl StepExecutor {
    pub fn new(store: Arc<dyn OrchestrationStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            retry: RetryPolicy::default(),
        }
    }

    /// Executor whose retry policy comes from the `retry` section of `config`.
    pub fn from_config(
        store: Arc<dyn OrchestrationStore>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self::new(store, clock).with_retry_policy(RetryPolicy::from(&config.retry))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn execute<A: StepActivity>(
        &self,
        instance_id: InstanceId,
        sequence: u32,
        activity: &A,
        cancel: &CancellationToken,
    ) -> Result<StepExecution<A::Output>> {
        let Some(parameter_value) = self.begin(instance_id, sequence)? else {
            return Ok(StepExecution {
                sequence,
                outcome: StepTerminationState::Skipped,
                output: None,
                failure: None,
            });
        };

        let result = self
            .run_with_retry(instance_id, sequence, parameter_value, activity, cancel)
            .await?;

        let mut uow = UnitOfWork::begin(self.store.as_ref());
        let mut instance = uow.get(instance_id)?;
        let now = self.clock.now();
        let step = instance.step_mut(sequence)?;

        let execution = match result {
            Ok(ActivityOutcome::Succeeded(output)) => match serde_json::to_value(&output) {
                Ok(value) => {
                    step.succeed(now, value)?;
                    StepExecution {
                        sequence,
                        outcome: StepTerminationState::Succeeded,
                        output: Some(output),
                        failure: None,
                    }
                }
                Err(e) => {
                    let failure = StepFailure {
                        message: format!("step output could not be recorded: {e}"),
                        errors: Vec::new(),
                    };
                    step.fail(now, failure.clone())?;
                    StepExecution {
                        sequence,
                        outcome: StepTerminationState::Failed,
                        output: None,
                        failure: Some(failure),
                    }
                }
            },
            Ok(ActivityOutcome::ValidationFailed(errors)) => {
                let failure = StepFailure {
                    message: "business validation failed".to_string(),
                    errors,
                };
                step.fail(now, failure.clone())?;
                StepExecution {
                    sequence,
                    outcome: StepTerminationState::Failed,
                    output: None,
                    failure: Some(failure),
                }
            }
            Err(e) => {
                let failure = StepFailure {
                    message: format!("{e:#}"),
                    errors: Vec::new(),
                };
                step.fail(now, failure.clone())?;
                StepExecution {
                    sequence,
                    outcome: StepTerminationState::Failed,
                    output: None,
                    failure: Some(failure),
                }
            }
        };

        uow.update(instance);
        uow.commit()?;
        info!(instance_id = %instance_id, sequence, outcome = %execution.outcome, "step terminated");
        Ok(execution)
    }

    pub async fn execute_without_output<A: StepActivity<Output = ()>>(
        &self,
        instance_id: InstanceId,
        sequence: u32,
        activity: &A,
        cancel: &CancellationToken,
    ) -> Result<StepReport> {
        self.execute(instance_id, sequence, activity, cancel)
            .await
            .map(StepReport::from)
    }

    /// Skip or start the step. Returns the instance parameters when the
    /// activity should run, `None` when the step was skipped.
    fn begin(&self, instance_id: InstanceId, sequence: u32) -> Result<Option<serde_json::Value>> {
        let mut uow = UnitOfWork::begin(self.store.as_ref());
        let mut instance = uow.get(instance_id)?;
        if !instance.lifecycle.is_running() {
            return Err(OrchestrationError::InvalidTransition {
                from: instance.lifecycle.state_name().to_string(),
                to: format!("step {sequence} running"),
                reason: "steps only run on a running instance".to_string(),
            });
        }
        let now = self.clock.now();
        let parameter_value = instance.parameter_value.clone();
        let step = instance.step_mut(sequence)?;

        if step.skip_requested && step.lifecycle.is_not_started() {
            step.skip(now)?;
            uow.update(instance);
            uow.commit()?;
            info!(instance_id = %instance_id, sequence, "step skipped");
            return Ok(None);
        }

        if step.lifecycle.is_running() {
            debug!(instance_id = %instance_id, sequence, "resuming running step");
            return Ok(Some(parameter_value));
        }

        step.lifecycle.transition_to_running(now)?;
        uow.update(instance);
        uow.commit()?;
        debug!(instance_id = %instance_id, sequence, "step started");
        Ok(Some(parameter_value))
    }

    async fn run_with_retry<A: StepActivity>(
        &self,
        instance_id: InstanceId,
        sequence: u32,
        parameter_value: serde_json::Value,
        activity: &A,
        cancel: &CancellationToken,
    ) -> Result<anyhow::Result<ActivityOutcome<A::Output>>> {
        let mut delays = self.retry.backoff().build();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let ctx = StepContext {
                instance_id,
                sequence,
                attempt,
                parameter_value: parameter_value.clone(),
                cancellation: cancel.clone(),
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
                r = activity.execute(&ctx) => r,
            };

            let err = match result {
                Ok(outcome) => return Ok(Ok(outcome)),
                Err(e) => e,
            };

            match delays.next() {
                Some(delay) => {
                    warn!(
                        instance_id = %instance_id,
                        sequence,
                        attempt,
                        error = %err,
                        "step attempt failed; retrying in {delay:?}"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    warn!(instance_id = %instance_id, sequence, attempt, error = %err, "step retries exhausted");
                    return Ok(Err(err.context(format!("failed after {attempt} attempt(s)"))));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
