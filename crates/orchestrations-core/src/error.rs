use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("not initialized: run 'orchestrations init'")]
    NotInitialized,

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid termination state: {0}")]
    InvalidTerminationState(String),

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("invalid orchestration name '{0}'")]
    InvalidName(String),

    #[error("invalid orchestration version {0}: must be a positive integer")]
    InvalidVersion(u32),

    #[error("invalid step sequence in '{description}': {reason}")]
    InvalidStepSequence { description: String, reason: String },

    #[error("step {sequence} of '{description}' can be skipped but has no skip reason")]
    MissingSkipReason { description: String, sequence: u32 },

    #[error("step {sequence} not found on instance {instance_id}")]
    StepNotFound { instance_id: String, sequence: u32 },

    #[error("step {sequence} on instance {instance_id} cannot be skipped")]
    StepCannotBeSkipped { instance_id: String, sequence: u32 },

    #[error("orchestration instance not found: {0}")]
    InstanceNotFound(String),

    #[error("orchestration description not found: {0}")]
    DescriptionNotFound(String),

    #[error("orchestration description already exists: {0}")]
    DescriptionExists(String),

    #[error("orchestration description is disabled: {0}")]
    DescriptionDisabled(String),

    #[error("orchestration description cannot be scheduled: {0}")]
    DescriptionNotSchedulable(String),

    #[error("idempotency key already in use: {0}")]
    DuplicateIdempotencyKey(String),

    #[error("idempotency key '{key}' belongs to an instance of another orchestration")]
    IdempotencyKeyConflict { key: String },

    #[error("concurrent modification of {0}")]
    ConcurrencyConflict(String),

    #[error("breaking change to '{name}' rejected: {reason}")]
    BreakingChange { name: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;
