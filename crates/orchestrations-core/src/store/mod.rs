//! Persistence boundary for descriptions and instances.
//!
//! Reads hand out owned snapshots. Writes are staged on an explicit
//! [`UnitOfWork`] and applied atomically by [`UnitOfWork::commit`]; nothing is
//! change-tracked behind the caller's back.
//!
//! Every stored entity carries a `revision`. An update whose snapshot revision
//! no longer matches the stored one fails with `ConcurrencyConflict`, and an
//! insert whose idempotency key is already taken fails with
//! `DuplicateIdempotencyKey`, both inside the same atomic apply. These two
//! checks are what keep concurrent invocations on one instance from
//! corrupting it and keep redelivered create commands from duplicating it.

pub mod db;
pub mod memory;

pub use self::db::RedbStore;
pub use self::memory::MemoryStore;

use crate::description::{DescriptionId, OrchestrationDescription, OrchestrationDescriptionUniqueName};
use crate::error::{OrchestrationError, Result};
use crate::instance::{IdempotencyKey, InstanceId, OrchestrationInstance};
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Change
// ---------------------------------------------------------------------------

/// A staged write.
#[derive(Debug, Clone)]
pub enum Change {
    InsertInstance(OrchestrationInstance),
    UpdateInstance(OrchestrationInstance),
    InsertDescription(OrchestrationDescription),
    UpdateDescription(OrchestrationDescription),
}

// ---------------------------------------------------------------------------
// OrchestrationStore
// ---------------------------------------------------------------------------

pub trait OrchestrationStore: Send + Sync {
    fn instance(&self, id: InstanceId) -> Result<Option<OrchestrationInstance>>;

    fn instance_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrchestrationInstance>>;

    /// All instances, newest first, optionally restricted to one description.
    fn instances(&self, description: Option<DescriptionId>) -> Result<Vec<OrchestrationInstance>>;

    /// Instances of `description` whose `scheduled_to_run_at` lies within
    /// `[run_at_or_later, run_at_or_earlier]`, both ends included, ascending.
    fn instances_scheduled_between(
        &self,
        description: DescriptionId,
        run_at_or_later: DateTime<Utc>,
        run_at_or_earlier: DateTime<Utc>,
    ) -> Result<Vec<OrchestrationInstance>>;

    fn description(&self, id: DescriptionId) -> Result<Option<OrchestrationDescription>>;

    fn description_by_unique_name(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
    ) -> Result<Option<OrchestrationDescription>>;

    fn descriptions(&self) -> Result<Vec<OrchestrationDescription>>;

    /// Apply all changes or none. Each entity appears at most once.
    fn apply(&self, changes: Vec<Change>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// UnitOfWork
// ---------------------------------------------------------------------------

/// Explicit session over a store. Staged writes are visible to reads made
/// through the same session and reach the store only on `commit`.
pub struct UnitOfWork<'a> {
    store: &'a dyn OrchestrationStore,
    changes: Vec<Change>,
}

impl<'a> UnitOfWork<'a> {
    pub fn begin(store: &'a dyn OrchestrationStore) -> Self {
        Self {
            store,
            changes: Vec::new(),
        }
    }

    /// Load an instance, failing with `InstanceNotFound` when absent.
    pub fn get(&self, id: InstanceId) -> Result<OrchestrationInstance> {
        if let Some(staged) = self.staged_instance(|i| i.id == id) {
            return Ok(staged.clone());
        }
        self.store
            .instance(id)?
            .ok_or_else(|| OrchestrationError::InstanceNotFound(id.to_string()))
    }

    pub fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrchestrationInstance>> {
        if let Some(staged) = self.staged_instance(|i| i.idempotency_key.as_ref() == Some(key)) {
            return Ok(Some(staged.clone()));
        }
        self.store.instance_by_idempotency_key(key)
    }

    pub fn add(&mut self, instance: OrchestrationInstance) {
        self.changes.retain(|c| !matches!(c, Change::InsertInstance(i) if i.id == instance.id));
        self.changes.push(Change::InsertInstance(instance));
    }

    /// Stage an update. Updating an instance staged for insert in this session
    /// replaces the insert.
    pub fn update(&mut self, instance: OrchestrationInstance) {
        for change in &mut self.changes {
            match change {
                Change::InsertInstance(staged) | Change::UpdateInstance(staged)
                    if staged.id == instance.id =>
                {
                    *staged = instance;
                    return;
                }
                _ => {}
            }
        }
        self.changes.push(Change::UpdateInstance(instance));
    }

    pub fn get_description_by_unique_name(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
    ) -> Result<Option<OrchestrationDescription>> {
        if let Some(staged) = self.staged_description(|d| &d.unique_name == unique_name) {
            return Ok(Some(staged.clone()));
        }
        self.store.description_by_unique_name(unique_name)
    }

    pub fn add_description(&mut self, description: OrchestrationDescription) {
        self.changes.push(Change::InsertDescription(description));
    }

    pub fn update_description(&mut self, description: OrchestrationDescription) {
        for change in &mut self.changes {
            match change {
                Change::InsertDescription(staged) | Change::UpdateDescription(staged)
                    if staged.id == description.id =>
                {
                    *staged = description;
                    return;
                }
                _ => {}
            }
        }
        self.changes.push(Change::UpdateDescription(description));
    }

    pub fn commit(self) -> Result<()> {
        if self.changes.is_empty() {
            return Ok(());
        }
        self.store.apply(self.changes)
    }

    fn staged_instance(
        &self,
        pred: impl Fn(&OrchestrationInstance) -> bool,
    ) -> Option<&OrchestrationInstance> {
        self.changes.iter().rev().find_map(|c| match c {
            Change::InsertInstance(i) | Change::UpdateInstance(i) if pred(i) => Some(i),
            _ => None,
        })
    }

    fn staged_description(
        &self,
        pred: impl Fn(&OrchestrationDescription) -> bool,
    ) -> Option<&OrchestrationDescription> {
        self.changes.iter().rev().find_map(|c| match c {
            Change::InsertDescription(d) | Change::UpdateDescription(d) if pred(d) => Some(d),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Shared helpers for store implementations
// ---------------------------------------------------------------------------

pub(crate) fn within_window(
    instance: &OrchestrationInstance,
    run_at_or_later: DateTime<Utc>,
    run_at_or_earlier: DateTime<Utc>,
) -> bool {
    instance
        .scheduled_to_run_at
        .is_some_and(|t| t >= run_at_or_later && t <= run_at_or_earlier)
}

pub(crate) fn stale(kind: &str, id: impl std::fmt::Display, stored: u64, given: u64) -> OrchestrationError {
    OrchestrationError::ConcurrencyConflict(format!(
        "{kind} {id}: stored revision {stored}, update based on {given}"
    ))
}

// ---------------------------------------------------------------------------
// Contract tests, run against every backend
// ---------------------------------------------------------------------------
