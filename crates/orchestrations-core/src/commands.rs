//! Instance commands and queries.
//!
//! Creation is idempotent per key: a key already used by an instance of the
//! same description resolves to that instance, including when two creates
//! race and the store rejects the second insert.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::description::{DescriptionId, OrchestrationDescription, OrchestrationDescriptionUniqueName};
use crate::error::{OrchestrationError, Result};
use crate::instance::{IdempotencyKey, InstanceId, NewInstance, OrchestrationInstance};
use crate::lifecycle::TerminationState;
use crate::store::{OrchestrationStore, UnitOfWork};

// ---------------------------------------------------------------------------
// Instance creation
// ---------------------------------------------------------------------------

/// Result of an idempotent create.
#[derive(Debug, Clone)]
pub struct Created {
    pub instance: OrchestrationInstance,
    /// False when an existing instance was returned for the idempotency key.
    pub created: bool,
}

pub(crate) fn create_instance(
    store: &dyn OrchestrationStore,
    description: &OrchestrationDescription,
    options: NewInstance,
    now: DateTime<Utc>,
) -> Result<Created> {
    if let Some(key) = &options.idempotency_key {
        if let Some(existing) = store.instance_by_idempotency_key(key)? {
            return existing_for_key(existing, description, key);
        }
    }

    let instance = OrchestrationInstance::new(description, options, now)?;
    let mut uow = UnitOfWork::begin(store);
    uow.add(instance.clone());
    match uow.commit() {
        Ok(()) => Ok(Created {
            instance,
            created: true,
        }),
        Err(OrchestrationError::DuplicateIdempotencyKey(_)) => {
            // Lost a race with a concurrent create for the same key.
            let Some(key) = &instance.idempotency_key else {
                return Err(OrchestrationError::ConcurrencyConflict(format!(
                    "instance {}",
                    instance.id
                )));
            };
            let existing = store
                .instance_by_idempotency_key(key)?
                .ok_or_else(|| OrchestrationError::ConcurrencyConflict(format!("idempotency key {key}")))?;
            existing_for_key(existing, description, key)
        }
        Err(e) => Err(e),
    }
}

fn existing_for_key(
    existing: OrchestrationInstance,
    description: &OrchestrationDescription,
    key: &IdempotencyKey,
) -> Result<Created> {
    if existing.description_id != description.id {
        return Err(OrchestrationError::IdempotencyKeyConflict {
            key: key.to_string(),
        });
    }
    debug!(instance_id = %existing.id, key = %key, "idempotency key resolved to existing instance");
    Ok(Created {
        instance: existing,
        created: false,
    })
}

// ---------------------------------------------------------------------------
// OrchestrationService
// ---------------------------------------------------------------------------

pub struct OrchestrationService {
    store: Arc<dyn OrchestrationStore>,
    clock: Arc<dyn Clock>,
    silent_mode: bool,
}

impl OrchestrationService {
    pub fn new(store: Arc<dyn OrchestrationStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            silent_mode: false,
        }
    }

    pub fn with_silent_mode(mut self, silent_mode: bool) -> Self {
        self.silent_mode = silent_mode;
        self
    }

    /// Start a once-off instance.
    pub fn start_orchestration(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
        mut options: NewInstance,
    ) -> Result<Created> {
        let description = self.enabled_description(unique_name)?;
        options.scheduled_to_run_at = None;
        let created = create_instance(self.store.as_ref(), &description, options, self.clock.now())?;
        if created.created {
            info!(instance_id = %created.instance.id, unique_name = %unique_name, "orchestration instance created");
        }
        Ok(created)
    }

    /// Create an instance that the host starts at `run_at`.
    pub fn schedule_orchestration(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
        mut options: NewInstance,
        run_at: DateTime<Utc>,
    ) -> Result<Created> {
        let description = self.enabled_description(unique_name)?;
        if !description.can_be_scheduled {
            return Err(OrchestrationError::DescriptionNotSchedulable(
                unique_name.to_string(),
            ));
        }
        options.scheduled_to_run_at = Some(run_at);
        let created = create_instance(self.store.as_ref(), &description, options, self.clock.now())?;
        if created.created {
            info!(
                instance_id = %created.instance.id,
                unique_name = %unique_name,
                run_at = %run_at,
                "orchestration instance scheduled"
            );
        }
        Ok(created)
    }

    pub fn cancel_scheduled_instance(&self, id: InstanceId) -> Result<OrchestrationInstance> {
        let instance = self.mutate(id, |i, now| i.cancel_scheduled(now))?;
        info!(instance_id = %id, "scheduled instance cancelled");
        Ok(instance)
    }

    pub fn start_instance(&self, id: InstanceId) -> Result<OrchestrationInstance> {
        self.mutate(id, |i, now| i.start(now))
    }

    pub fn terminate_instance(
        &self,
        id: InstanceId,
        outcome: TerminationState,
    ) -> Result<OrchestrationInstance> {
        let instance = self.mutate(id, |i, now| i.terminate(now, outcome))?;
        info!(instance_id = %id, outcome = %outcome, "orchestration instance terminated");
        Ok(instance)
    }

    /// Record an external event on a non-terminated instance. An unknown id is
    /// reported at warning level in silent mode; the caller still gets
    /// `InstanceNotFound` either way.
    pub fn notify_instance(
        &self,
        id: InstanceId,
        event: &str,
        data: serde_json::Value,
    ) -> Result<OrchestrationInstance> {
        match self.mutate(id, |i, now| i.record_notification(event, data, now)) {
            Err(e @ OrchestrationError::InstanceNotFound(_)) => {
                if self.silent_mode {
                    warn!(instance_id = %id, event, "notification for unknown instance");
                } else {
                    error!(instance_id = %id, event, "notification for unknown instance");
                }
                Err(e)
            }
            other => other,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_instance(&self, id: InstanceId) -> Result<OrchestrationInstance> {
        self.store
            .instance(id)?
            .ok_or_else(|| OrchestrationError::InstanceNotFound(id.to_string()))
    }

    pub fn list_instances(
        &self,
        description: Option<DescriptionId>,
    ) -> Result<Vec<OrchestrationInstance>> {
        self.store.instances(description)
    }

    pub fn list_descriptions(&self) -> Result<Vec<OrchestrationDescription>> {
        self.store.descriptions()
    }

    pub fn get_description(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
    ) -> Result<OrchestrationDescription> {
        self.store
            .description_by_unique_name(unique_name)?
            .ok_or_else(|| OrchestrationError::DescriptionNotFound(unique_name.to_string()))
    }

    fn enabled_description(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
    ) -> Result<OrchestrationDescription> {
        let description = self.get_description(unique_name)?;
        if !description.is_enabled {
            return Err(OrchestrationError::DescriptionDisabled(
                unique_name.to_string(),
            ));
        }
        Ok(description)
    }

    /// Load, change and persist one instance in a single unit of work, then
    /// return the stored snapshot.
    fn mutate(
        &self,
        id: InstanceId,
        change: impl FnOnce(&mut OrchestrationInstance, DateTime<Utc>) -> Result<()>,
    ) -> Result<OrchestrationInstance> {
        let mut uow = UnitOfWork::begin(self.store.as_ref());
        let mut instance = uow.get(id)?;
        change(&mut instance, self.clock.now())?;
        uow.update(instance);
        uow.commit()?;
        self.get_instance(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
