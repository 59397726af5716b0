//! Recurring scheduler queries and the scheduling tick.
//!
//! A tick evaluates every enabled recurring description against the clock,
//! finds the latest due occurrence inside the lookback window, and creates at
//! most one instance per occurrence. Duplicates are prevented twice: by the
//! boundary-inclusive window query, and by an idempotency key derived from the
//! occurrence, which makes concurrent ticks on several hosts converge.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::commands::create_instance;
use crate::description::{DescriptionId, OrchestrationDescription, OrchestrationDescriptionUniqueName};
use crate::error::Result;
use crate::instance::{IdempotencyKey, InstanceId, NewInstance, OrchestrationInstance};
use crate::store::OrchestrationStore;

pub const SCHEDULER_ACTOR: &str = "scheduler";

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Descriptions that are enabled and carry a recurring cron expression.
pub fn recurring_descriptions(store: &dyn OrchestrationStore) -> Result<Vec<OrchestrationDescription>> {
    Ok(store
        .descriptions()?
        .into_iter()
        .filter(|d| d.is_enabled && d.is_recurring())
        .collect())
}

/// Instances of `description` already scheduled within
/// `[run_at_or_later, run_at_or_earlier]`, both ends included.
pub fn scheduled_instances_in_window(
    store: &dyn OrchestrationStore,
    description: DescriptionId,
    run_at_or_later: DateTime<Utc>,
    run_at_or_earlier: DateTime<Utc>,
) -> Result<Vec<OrchestrationInstance>> {
    store.instances_scheduled_between(description, run_at_or_later, run_at_or_earlier)
}

pub fn recurring_idempotency_key(
    unique_name: &OrchestrationDescriptionUniqueName,
    run_at: DateTime<Utc>,
) -> Option<IdempotencyKey> {
    IdempotencyKey::new(format!(
        "recurring:{}:{}:{}",
        unique_name.name(),
        unique_name.version(),
        run_at.timestamp()
    ))
}

// ---------------------------------------------------------------------------
// RecurringScheduler
// ---------------------------------------------------------------------------

pub struct RecurringScheduler {
    store: Arc<dyn OrchestrationStore>,
    clock: Arc<dyn Clock>,
    lookback: chrono::Duration,
}

impl RecurringScheduler {
    pub fn new(store: Arc<dyn OrchestrationStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            lookback: chrono::Duration::seconds(60),
        }
    }

    pub fn with_lookback(mut self, lookback: chrono::Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Run one scheduling pass and return the ids of instances it created.
    ///
    /// A failure on one description is logged and does not stop the others.
    pub fn tick(&self) -> Result<Vec<InstanceId>> {
        let now = self.clock.now();
        let mut created = Vec::new();

        for description in recurring_descriptions(self.store.as_ref())? {
            match self.schedule_due(&description, now) {
                Ok(Some(id)) => created.push(id),
                Ok(None) => {}
                Err(e) => {
                    error!(unique_name = %description.unique_name, error = %e, "recurring scheduling failed");
                }
            }
        }
        Ok(created)
    }

    fn schedule_due(
        &self,
        description: &OrchestrationDescription,
        now: DateTime<Utc>,
    ) -> Result<Option<InstanceId>> {
        let Some(cron) = description.recurring_cron_expression() else {
            return Ok(None);
        };
        let Some(due) = cron.latest_occurrence(now, self.lookback) else {
            return Ok(None);
        };

        let existing = scheduled_instances_in_window(self.store.as_ref(), description.id, due, due)?;
        if !existing.is_empty() {
            debug!(unique_name = %description.unique_name, run_at = %due, "occurrence already scheduled");
            return Ok(None);
        }

        let options = NewInstance {
            created_by: SCHEDULER_ACTOR.to_string(),
            idempotency_key: recurring_idempotency_key(&description.unique_name, due),
            scheduled_to_run_at: Some(due),
            ..Default::default()
        };
        let outcome = create_instance(self.store.as_ref(), description, options, now)?;
        if !outcome.created {
            return Ok(None);
        }
        info!(
            instance_id = %outcome.instance.id,
            unique_name = %description.unique_name,
            run_at = %due,
            "recurring instance scheduled"
        );
        Ok(Some(outcome.instance.id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{Change, MemoryStore, RedbStore};
    use chrono::TimeZone;

    fn brs_045() -> OrchestrationDescription {
        let mut d = OrchestrationDescription::new(
            OrchestrationDescriptionUniqueName::new("Brs_045", 1).unwrap(),
            "Orchestration_Brs_045_V1",
        );
        d.append_step_description("Calculate");
        d.append_step_description("Enqueue");
        d.set_recurring_cron_expression("0 2 * * 1-5").unwrap();
        d
    }

    // 2024-01-02 is a Tuesday.
    fn tuesday(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, h, m, 0).unwrap()
    }

    fn scheduler(
        store: Arc<dyn OrchestrationStore>,
        now: DateTime<Utc>,
    ) -> (Arc<ManualClock>, RecurringScheduler) {
        let clock = Arc::new(ManualClock::new(now));
        (clock.clone(), RecurringScheduler::new(store, clock))
    }

    #[test]
    fn recurring_descriptions_filters_enabled_and_recurring() {
        let store = MemoryStore::new();
        let recurring = brs_045();
        let mut disabled = brs_045();
        disabled.id = DescriptionId::new();
        disabled.unique_name = OrchestrationDescriptionUniqueName::new("Brs_045", 2).unwrap();
        disabled.is_enabled = false;
        let mut once_off = brs_045();
        once_off.id = DescriptionId::new();
        once_off.unique_name = OrchestrationDescriptionUniqueName::new("Brs_026", 1).unwrap();
        once_off.set_recurring_cron_expression("").unwrap();
        store
            .apply(vec![
                Change::InsertDescription(recurring.clone()),
                Change::InsertDescription(disabled),
                Change::InsertDescription(once_off),
            ])
            .unwrap();

        let found = recurring_descriptions(&store).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, recurring.id);
    }

    #[test]
    fn tuesday_0200_creates_exactly_one_instance() {
        let store: Arc<dyn OrchestrationStore> = Arc::new(MemoryStore::new());
        let d = brs_045();
        store.apply(vec![Change::InsertDescription(d.clone())]).unwrap();
        let (_, scheduler) = scheduler(store.clone(), tuesday(2, 0));

        let created = scheduler.tick().unwrap();
        assert_eq!(created.len(), 1);
        let instance = store.instance(created[0]).unwrap().unwrap();
        assert_eq!(instance.scheduled_to_run_at, Some(tuesday(2, 0)));
        assert_eq!(instance.created_by, SCHEDULER_ACTOR);
        assert_eq!(instance.step_sequences(), vec![1, 2]);

        assert!(scheduler.tick().unwrap().is_empty());
        assert_eq!(store.instances(Some(d.id)).unwrap().len(), 1);
    }

    #[test]
    fn late_tick_within_lookback_still_schedules() {
        let store: Arc<dyn OrchestrationStore> = Arc::new(MemoryStore::new());
        store.apply(vec![Change::InsertDescription(brs_045())]).unwrap();
        let (clock, scheduler) = scheduler(store.clone(), tuesday(1, 59));

        assert!(scheduler.tick().unwrap().is_empty());
        clock.set(tuesday(2, 0) + chrono::Duration::seconds(45));
        let created = scheduler.tick().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(
            store.instance(created[0]).unwrap().unwrap().scheduled_to_run_at,
            Some(tuesday(2, 0))
        );

        clock.set(tuesday(2, 5));
        assert!(scheduler.tick().unwrap().is_empty());
    }

    #[test]
    fn weekend_is_not_scheduled() {
        let store: Arc<dyn OrchestrationStore> = Arc::new(MemoryStore::new());
        store.apply(vec![Change::InsertDescription(brs_045())]).unwrap();
        // 2024-01-06 is a Saturday.
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 2, 0, 0).unwrap();
        let (_, scheduler) = scheduler(store, saturday);
        assert!(scheduler.tick().unwrap().is_empty());
    }

    #[test]
    fn two_schedulers_converge_on_one_instance() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn OrchestrationStore> =
            Arc::new(RedbStore::open(&dir.path().join("s.redb")).unwrap());
        store.apply(vec![Change::InsertDescription(brs_045())]).unwrap();

        let (_, a) = scheduler(store.clone(), tuesday(2, 0));
        let (_, b) = scheduler(store.clone(), tuesday(2, 0));
        let total = a.tick().unwrap().len() + b.tick().unwrap().len();
        assert_eq!(total, 1);
    }

    #[test]
    fn idempotency_key_encodes_occurrence() {
        let key = recurring_idempotency_key(&brs_045().unique_name, tuesday(2, 0)).unwrap();
        assert_eq!(key.as_str(), format!("recurring:Brs_045:1:{}", tuesday(2, 0).timestamp()));
    }
}
