//! In-process store backed by mutex-guarded maps.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::description::{DescriptionId, OrchestrationDescription, OrchestrationDescriptionUniqueName};
use crate::error::{OrchestrationError, Result};
use crate::instance::{IdempotencyKey, InstanceId, OrchestrationInstance};

use super::{stale, within_window, Change, OrchestrationStore};

#[derive(Default, Clone)]
struct Inner {
    descriptions: HashMap<DescriptionId, OrchestrationDescription>,
    instances: HashMap<InstanceId, OrchestrationInstance>,
    idempotency_keys: HashMap<IdempotencyKey, InstanceId>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    fn apply_one(&mut self, change: Change) -> Result<()> {
        match change {
            Change::InsertInstance(mut instance) => {
                if self.instances.contains_key(&instance.id) {
                    return Err(OrchestrationError::ConcurrencyConflict(format!(
                        "instance {} already exists",
                        instance.id
                    )));
                }
                if let Some(key) = &instance.idempotency_key {
                    if self.idempotency_keys.contains_key(key) {
                        return Err(OrchestrationError::DuplicateIdempotencyKey(key.to_string()));
                    }
                    self.idempotency_keys.insert(key.clone(), instance.id);
                }
                instance.revision = 0;
                self.instances.insert(instance.id, instance);
            }
            Change::UpdateInstance(mut instance) => {
                let stored = self
                    .instances
                    .get(&instance.id)
                    .ok_or_else(|| OrchestrationError::InstanceNotFound(instance.id.to_string()))?;
                if stored.revision != instance.revision {
                    return Err(stale("instance", instance.id, stored.revision, instance.revision));
                }
                instance.revision += 1;
                self.instances.insert(instance.id, instance);
            }
            Change::InsertDescription(mut description) => {
                let taken = self.descriptions.contains_key(&description.id)
                    || self
                        .descriptions
                        .values()
                        .any(|d| d.unique_name == description.unique_name);
                if taken {
                    return Err(OrchestrationError::DescriptionExists(
                        description.unique_name.to_string(),
                    ));
                }
                description.revision = 0;
                self.descriptions.insert(description.id, description);
            }
            Change::UpdateDescription(mut description) => {
                let stored = self.descriptions.get(&description.id).ok_or_else(|| {
                    OrchestrationError::DescriptionNotFound(description.unique_name.to_string())
                })?;
                if stored.revision != description.revision {
                    return Err(stale(
                        "description",
                        &description.unique_name,
                        stored.revision,
                        description.revision,
                    ));
                }
                description.revision += 1;
                self.descriptions.insert(description.id, description);
            }
        }
        Ok(())
    }
}

impl OrchestrationStore for MemoryStore {
    fn instance(&self, id: InstanceId) -> Result<Option<OrchestrationInstance>> {
        Ok(self.lock().instances.get(&id).cloned())
    }

    fn instance_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrchestrationInstance>> {
        let inner = self.lock();
        Ok(inner
            .idempotency_keys
            .get(key)
            .and_then(|id| inner.instances.get(id))
            .cloned())
    }

    fn instances(&self, description: Option<DescriptionId>) -> Result<Vec<OrchestrationInstance>> {
        let mut result: Vec<OrchestrationInstance> = self
            .lock()
            .instances
            .values()
            .filter(|i| description.map_or(true, |d| i.description_id == d))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    fn instances_scheduled_between(
        &self,
        description: DescriptionId,
        run_at_or_later: DateTime<Utc>,
        run_at_or_earlier: DateTime<Utc>,
    ) -> Result<Vec<OrchestrationInstance>> {
        let mut result: Vec<OrchestrationInstance> = self
            .lock()
            .instances
            .values()
            .filter(|i| i.description_id == description)
            .filter(|i| within_window(i, run_at_or_later, run_at_or_earlier))
            .cloned()
            .collect();
        result.sort_by_key(|i| i.scheduled_to_run_at);
        Ok(result)
    }

    fn description(&self, id: DescriptionId) -> Result<Option<OrchestrationDescription>> {
        Ok(self.lock().descriptions.get(&id).cloned())
    }

    fn description_by_unique_name(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
    ) -> Result<Option<OrchestrationDescription>> {
        Ok(self
            .lock()
            .descriptions
            .values()
            .find(|d| &d.unique_name == unique_name)
            .cloned())
    }

    fn descriptions(&self) -> Result<Vec<OrchestrationDescription>> {
        let mut result: Vec<OrchestrationDescription> =
            self.lock().descriptions.values().cloned().collect();
        result.sort_by(|a, b| a.unique_name.cmp(&b.unique_name));
        Ok(result)
    }

    fn apply(&self, changes: Vec<Change>) -> Result<()> {
        let mut inner = self.lock();
        // Apply to a scratch copy so a failing change leaves nothing behind.
        let mut scratch = inner.clone();
        for change in changes {
            scratch.apply_one(change)?;
        }
        *inner = scratch;
        Ok(())
    }
}
