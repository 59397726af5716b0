//! Persistent store for descriptions and instances using redb.
//!
//! # Table design
//!
//! Entities are stored as JSON under their 16-byte uuid. Two lookup tables map
//! `name:version` and idempotency keys to uuids. Scheduled instances are also
//! indexed under a 40-byte composite key:
//! ```text
//! [ description uuid (16 bytes) | scheduled_to_run_at ms big-endian (8 bytes) | instance uuid (16 bytes) ]
//! ```
//!
//! Because the timestamp follows the description id in big-endian encoding,
//! byte ordering within one description equals timestamp ordering, and a
//! window query is a single range scan between
//! `[desc | from | 0x00 × 16]` and `[desc | to | 0xff × 16]`.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use uuid::Uuid;

use crate::description::{DescriptionId, OrchestrationDescription, OrchestrationDescriptionUniqueName};
use crate::error::{OrchestrationError, Result};
use crate::instance::{IdempotencyKey, InstanceId, OrchestrationInstance};

use super::{stale, within_window, Change, OrchestrationStore};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: description uuid bytes. Value: JSON-encoded description.
const DESCRIPTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("descriptions");
/// Key: `name:version`. Value: description uuid bytes.
const DESCRIPTION_NAMES: TableDefinition<&str, &[u8]> = TableDefinition::new("description_names");
/// Key: instance uuid bytes. Value: JSON-encoded instance.
const INSTANCES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("instances");
/// Key: idempotency key. Value: instance uuid bytes.
const IDEMPOTENCY_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("idempotency_keys");
/// Key: 40-byte composite (see module docs). Value: empty.
const SCHEDULED_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("scheduled_index");

const EMPTY: &[u8] = &[];

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn scheduled_key(description: DescriptionId, ts: DateTime<Utc>, instance: InstanceId) -> [u8; 40] {
    let mut key = [0u8; 40];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..16].copy_from_slice(description.0.as_bytes());
    key[16..24].copy_from_slice(&ms.to_be_bytes());
    key[24..].copy_from_slice(instance.0.as_bytes());
    key
}

fn window_bounds(
    description: DescriptionId,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> ([u8; 40], [u8; 40]) {
    let mut lower = [0u8; 40];
    lower[..16].copy_from_slice(description.0.as_bytes());
    lower[16..24].copy_from_slice(&(from.timestamp_millis().max(0) as u64).to_be_bytes());

    let mut upper = [0u8; 40];
    upper[..16].copy_from_slice(description.0.as_bytes());
    upper[16..24].copy_from_slice(&(to.timestamp_millis().max(0) as u64).to_be_bytes());
    upper[24..].fill(0xff);
    (lower, upper)
}

fn db_err(e: impl std::fmt::Display) -> OrchestrationError {
    OrchestrationError::Storage(e.to_string())
}

fn uuid_from(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(db_err)
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

/// Persistent store for orchestration descriptions and instances.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the redb database at `path`.
    ///
    /// Creates all tables if they don't already exist.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        // Ensure the tables exist before any reads
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(DESCRIPTIONS).map_err(db_err)?;
        wt.open_table(DESCRIPTION_NAMES).map_err(db_err)?;
        wt.open_table(INSTANCES).map_err(db_err)?;
        wt.open_table(IDEMPOTENCY_KEYS).map_err(db_err)?;
        wt.open_table(SCHEDULED_INDEX).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    fn read_instance(&self, id: &[u8]) -> Result<Option<OrchestrationInstance>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(INSTANCES).map_err(db_err)?;
        match table.get(id).map_err(db_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn read_description(&self, id: &[u8]) -> Result<Option<OrchestrationDescription>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(DESCRIPTIONS).map_err(db_err)?;
        match table.get(id).map_err(db_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn write_change(wt: &WriteTransaction, change: Change) -> Result<()> {
        match change {
            Change::InsertInstance(instance) => Self::insert_instance(wt, instance),
            Change::UpdateInstance(instance) => Self::update_instance(wt, instance),
            Change::InsertDescription(description) => Self::insert_description(wt, description),
            Change::UpdateDescription(description) => Self::update_description(wt, description),
        }
    }

    fn insert_instance(wt: &WriteTransaction, mut instance: OrchestrationInstance) -> Result<()> {
        let id = *instance.id.0.as_bytes();
        let mut instances = wt.open_table(INSTANCES).map_err(db_err)?;
        if instances.get(id.as_slice()).map_err(db_err)?.is_some() {
            return Err(OrchestrationError::ConcurrencyConflict(format!(
                "instance {} already exists",
                instance.id
            )));
        }

        if let Some(key) = &instance.idempotency_key {
            let mut keys = wt.open_table(IDEMPOTENCY_KEYS).map_err(db_err)?;
            if keys.get(key.as_str()).map_err(db_err)?.is_some() {
                return Err(OrchestrationError::DuplicateIdempotencyKey(key.to_string()));
            }
            keys.insert(key.as_str(), id.as_slice()).map_err(db_err)?;
        }

        if let Some(run_at) = instance.scheduled_to_run_at {
            let mut index = wt.open_table(SCHEDULED_INDEX).map_err(db_err)?;
            let key = scheduled_key(instance.description_id, run_at, instance.id);
            index.insert(key.as_slice(), EMPTY).map_err(db_err)?;
        }

        instance.revision = 0;
        let value = serde_json::to_vec(&instance)?;
        instances
            .insert(id.as_slice(), value.as_slice())
            .map_err(db_err)?;
        Ok(())
    }

    fn update_instance(wt: &WriteTransaction, mut instance: OrchestrationInstance) -> Result<()> {
        let id = *instance.id.0.as_bytes();
        let mut instances = wt.open_table(INSTANCES).map_err(db_err)?;
        let stored: OrchestrationInstance = {
            let guard = instances
                .get(id.as_slice())
                .map_err(db_err)?
                .ok_or_else(|| OrchestrationError::InstanceNotFound(instance.id.to_string()))?;
            serde_json::from_slice(guard.value())?
        };
        if stored.revision != instance.revision {
            return Err(stale("instance", instance.id, stored.revision, instance.revision));
        }

        if stored.scheduled_to_run_at != instance.scheduled_to_run_at {
            let mut index = wt.open_table(SCHEDULED_INDEX).map_err(db_err)?;
            if let Some(old) = stored.scheduled_to_run_at {
                let key = scheduled_key(stored.description_id, old, stored.id);
                index.remove(key.as_slice()).map_err(db_err)?;
            }
            if let Some(new) = instance.scheduled_to_run_at {
                let key = scheduled_key(instance.description_id, new, instance.id);
                index.insert(key.as_slice(), EMPTY).map_err(db_err)?;
            }
        }

        instance.revision += 1;
        let value = serde_json::to_vec(&instance)?;
        instances
            .insert(id.as_slice(), value.as_slice())
            .map_err(db_err)?;
        Ok(())
    }

    fn insert_description(
        wt: &WriteTransaction,
        mut description: OrchestrationDescription,
    ) -> Result<()> {
        let id = *description.id.0.as_bytes();
        let name = description.unique_name.to_string();
        let mut names = wt.open_table(DESCRIPTION_NAMES).map_err(db_err)?;
        let mut descriptions = wt.open_table(DESCRIPTIONS).map_err(db_err)?;
        if names.get(name.as_str()).map_err(db_err)?.is_some()
            || descriptions.get(id.as_slice()).map_err(db_err)?.is_some()
        {
            return Err(OrchestrationError::DescriptionExists(name));
        }
        names.insert(name.as_str(), id.as_slice()).map_err(db_err)?;

        description.revision = 0;
        let value = serde_json::to_vec(&description)?;
        descriptions
            .insert(id.as_slice(), value.as_slice())
            .map_err(db_err)?;
        Ok(())
    }

    fn update_description(
        wt: &WriteTransaction,
        mut description: OrchestrationDescription,
    ) -> Result<()> {
        let id = *description.id.0.as_bytes();
        let mut descriptions = wt.open_table(DESCRIPTIONS).map_err(db_err)?;
        let stored: OrchestrationDescription = {
            let guard = descriptions.get(id.as_slice()).map_err(db_err)?.ok_or_else(|| {
                OrchestrationError::DescriptionNotFound(description.unique_name.to_string())
            })?;
            serde_json::from_slice(guard.value())?
        };
        if stored.revision != description.revision {
            return Err(stale(
                "description",
                &description.unique_name,
                stored.revision,
                description.revision,
            ));
        }

        description.revision += 1;
        let value = serde_json::to_vec(&description)?;
        descriptions
            .insert(id.as_slice(), value.as_slice())
            .map_err(db_err)?;
        Ok(())
    }
}

impl OrchestrationStore for RedbStore {
    fn instance(&self, id: InstanceId) -> Result<Option<OrchestrationInstance>> {
        self.read_instance(id.0.as_bytes())
    }

    fn instance_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrchestrationInstance>> {
        let id = {
            let rt = self.db.begin_read().map_err(db_err)?;
            let keys = rt.open_table(IDEMPOTENCY_KEYS).map_err(db_err)?;
            match keys.get(key.as_str()).map_err(db_err)? {
                Some(v) => v.value().to_vec(),
                None => return Ok(None),
            }
        };
        self.read_instance(&id)
    }

    fn instances(&self, description: Option<DescriptionId>) -> Result<Vec<OrchestrationInstance>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(INSTANCES).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            let instance: OrchestrationInstance = serde_json::from_slice(v.value())?;
            if description.map_or(true, |d| instance.description_id == d) {
                result.push(instance);
            }
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    fn instances_scheduled_between(
        &self,
        description: DescriptionId,
        run_at_or_later: DateTime<Utc>,
        run_at_or_earlier: DateTime<Utc>,
    ) -> Result<Vec<OrchestrationInstance>> {
        if run_at_or_later > run_at_or_earlier {
            return Ok(Vec::new());
        }
        let (lower, upper) = window_bounds(description, run_at_or_later, run_at_or_earlier);

        let rt = self.db.begin_read().map_err(db_err)?;
        let index = rt.open_table(SCHEDULED_INDEX).map_err(db_err)?;
        let instances = rt.open_table(INSTANCES).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in index
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(db_err)?
        {
            let (k, _) = entry.map_err(db_err)?;
            let instance_id = &k.value()[24..];
            if let Some(v) = instances.get(instance_id).map_err(db_err)? {
                let instance: OrchestrationInstance = serde_json::from_slice(v.value())?;
                // The index has millisecond resolution; compare exact instants.
                if within_window(&instance, run_at_or_later, run_at_or_earlier) {
                    result.push(instance);
                }
            }
        }
        Ok(result)
    }

    fn description(&self, id: DescriptionId) -> Result<Option<OrchestrationDescription>> {
        self.read_description(id.0.as_bytes())
    }

    fn description_by_unique_name(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
    ) -> Result<Option<OrchestrationDescription>> {
        let id = {
            let rt = self.db.begin_read().map_err(db_err)?;
            let names = rt.open_table(DESCRIPTION_NAMES).map_err(db_err)?;
            match names
                .get(unique_name.to_string().as_str())
                .map_err(db_err)?
            {
                Some(v) => uuid_from(v.value())?,
                None => return Ok(None),
            }
        };
        self.read_description(id.as_bytes())
    }

    fn descriptions(&self) -> Result<Vec<OrchestrationDescription>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(DESCRIPTIONS).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            let description: OrchestrationDescription = serde_json::from_slice(v.value())?;
            result.push(description);
        }
        result.sort_by(|a, b| a.unique_name.cmp(&b.unique_name));
        Ok(result)
    }

    fn apply(&self, changes: Vec<Change>) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        for change in changes {
            if let Err(e) = Self::write_change(&wt, change) {
                wt.abort().map_err(db_err)?;
                return Err(e);
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, RedbStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn insert_then_get() {
        let (_dir, store) = open_tmp();
        contract::insert_then_get(&store);
    }

    #[test]
    fn duplicate_idempotency_key_rejected() {
        let (_dir, store) = open_tmp();
        contract::duplicate_idempotency_key_rejected(&store);
    }

    #[test]
    fn stale_update_rejected() {
        let (_dir, store) = open_tmp();
        contract::stale_update_rejected(&store);
    }

    #[test]
    fn failed_apply_writes_nothing() {
        let (_dir, store) = open_tmp();
        contract::failed_apply_writes_nothing(&store);
    }

    #[test]
    fn window_query_is_boundary_inclusive() {
        let (_dir, store) = open_tmp();
        contract::window_query_is_boundary_inclusive(&store);
    }

    #[test]
    fn duplicate_description_name_rejected() {
        let (_dir, store) = open_tmp();
        contract::duplicate_description_name_rejected(&store);
    }

    #[test]
    fn unit_of_work_reads_staged_writes() {
        let (_dir, store) = open_tmp();
        contract::unit_of_work_reads_staged_writes(&store);
    }

    #[test]
    fn composite_key_ordering_is_by_timestamp() {
        let d = DescriptionId::new();
        let i = InstanceId::new();
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 8, 59, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        assert!(scheduled_key(d, early, i) < scheduled_key(d, late, i));

        let (lower, upper) = window_bounds(d, late, late);
        let k = scheduled_key(d, late, i);
        assert!(lower.as_slice() <= k.as_slice() && k.as_slice() <= upper.as_slice());
        assert!(scheduled_key(d, early, i).as_slice() < lower.as_slice());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reopen.redb");
        let d = contract::description("Brs_045");
        {
            let store = RedbStore::open(&path).unwrap();
            store.apply(vec![Change::InsertDescription(d.clone())]).unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        let loaded = store.description(d.id).unwrap().unwrap();
        assert_eq!(loaded.unique_name, d.unique_name);
    }
}
