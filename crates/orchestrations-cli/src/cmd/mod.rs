pub mod description;
pub mod init;
pub mod instance;
pub mod schedule;
pub mod serve;
pub mod sync;

use anyhow::Context;
use orchestrations_core::config::Config;
use orchestrations_core::store::{OrchestrationStore, RedbStore};
use std::path::Path;
use std::sync::Arc;

/// Load the project config and open its database.
pub fn open_store(root: &Path) -> anyhow::Result<(Config, Arc<dyn OrchestrationStore>)> {
    let config = Config::load(root).context("failed to load config.yaml")?;
    let db_path = config.database_path(root);
    let store = RedbStore::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    Ok((config, Arc::new(store)))
}
