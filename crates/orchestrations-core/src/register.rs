//! Orchestration register.
//!
//! The deployment declares its descriptions in a [`DescriptionRegistry`] by
//! explicit `register` calls. At startup [`OrchestrationRegister::synchronize`]
//! reconciles that declared set with the persisted catalog:
//!
//! - unknown names are inserted enabled
//! - identical shapes are left alone
//! - compatible differences update the persisted record in place
//! - breaking differences are rejected unless the persisted record is under
//!   development, in which case it is overwritten
//! - persisted names no longer declared are disabled, never deleted
//!
//! The outcome is retained in [`SynchronizationHealth`] for the lifetime of
//! the process and served by the health check.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::description::{
    OrchestrationDescription, OrchestrationDescriptionUniqueName, ShapeComparison,
};
use crate::error::{OrchestrationError, Result};
use crate::store::{OrchestrationStore, UnitOfWork};

// ---------------------------------------------------------------------------
// DescriptionRegistry
// ---------------------------------------------------------------------------

/// The descriptions declared by the running deployment.
#[derive(Debug, Default, Clone)]
pub struct DescriptionRegistry {
    descriptions: Vec<OrchestrationDescription>,
}

impl DescriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a description. Invalid descriptions and duplicate unique names
    /// are rejected here rather than at synchronization time.
    pub fn register(&mut self, description: OrchestrationDescription) -> Result<()> {
        description.validate()?;
        if self.get(&description.unique_name).is_some() {
            return Err(OrchestrationError::DescriptionExists(
                description.unique_name.to_string(),
            ));
        }
        self.descriptions.push(description);
        Ok(())
    }

    pub fn get(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
    ) -> Option<&OrchestrationDescription> {
        self.descriptions
            .iter()
            .find(|d| &d.unique_name == unique_name)
    }

    pub fn descriptions(&self) -> &[OrchestrationDescription] {
        &self.descriptions
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub synchronized_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
struct SyncOutcome {
    at: DateTime<Utc>,
    error: Option<String>,
}

/// Process-wide record of the most recent synchronization attempt.
/// Unhealthy until the first attempt completes.
#[derive(Debug, Default)]
pub struct SynchronizationHealth {
    last: RwLock<Option<SyncOutcome>>,
}

impl SynchronizationHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, at: DateTime<Utc>) {
        self.record(SyncOutcome { at, error: None });
    }

    pub fn record_failure(&self, at: DateTime<Utc>, error: impl Into<String>) {
        self.record(SyncOutcome {
            at,
            error: Some(error.into()),
        });
    }

    fn record(&self, outcome: SyncOutcome) {
        *self.last.write().unwrap_or_else(|e| e.into_inner()) = Some(outcome);
    }

    pub fn report(&self) -> HealthReport {
        let last = self.last.read().unwrap_or_else(|e| e.into_inner());
        match last.as_ref() {
            None => HealthReport {
                status: HealthStatus::Unhealthy,
                synchronized_at: None,
                error: Some("synchronization has not run".to_string()),
            },
            Some(outcome) => HealthReport {
                status: if outcome.error.is_none() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy
                },
                synchronized_at: Some(outcome.at),
                error: outcome.error.clone(),
            },
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.report().status == HealthStatus::Healthy
    }
}

// ---------------------------------------------------------------------------
// SyncReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedChange {
    pub unique_name: String,
    pub reasons: Vec<String>,
}

/// What a synchronization run did, by unique name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub disabled: Vec<String>,
    pub re_enabled: Vec<String>,
    pub rejected: Vec<RejectedChange>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Error text for the health check, one clause per rejected name.
    pub fn rejection_summary(&self) -> Option<String> {
        if self.rejected.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .rejected
            .iter()
            .map(|r| {
                OrchestrationError::BreakingChange {
                    name: r.unique_name.clone(),
                    reason: r.reasons.join(", "),
                }
                .to_string()
            })
            .collect();
        Some(parts.join("; "))
    }
}

// ---------------------------------------------------------------------------
// OrchestrationRegister
// ---------------------------------------------------------------------------

pub struct OrchestrationRegister {
    store: Arc<dyn OrchestrationStore>,
    clock: Arc<dyn Clock>,
    health: Arc<SynchronizationHealth>,
}

impl OrchestrationRegister {
    pub fn new(store: Arc<dyn OrchestrationStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            health: Arc::new(SynchronizationHealth::new()),
        }
    }

    pub fn health(&self) -> Arc<SynchronizationHealth> {
        Arc::clone(&self.health)
    }

    /// Reconcile the declared registry with the persisted catalog and record
    /// the outcome. Rejected breaking changes are reported, not returned as
    /// errors; only storage failures are.
    pub fn synchronize(&self, registry: &DescriptionRegistry) -> Result<SyncReport> {
        let now = self.clock.now();
        match self.reconcile(registry) {
            Ok(report) => {
                match report.rejection_summary() {
                    Some(summary) => {
                        error!(rejected = report.rejected.len(), "synchronization rejected breaking changes: {summary}");
                        self.health.record_failure(now, summary);
                    }
                    None => {
                        info!(
                            inserted = report.inserted.len(),
                            updated = report.updated.len(),
                            disabled = report.disabled.len(),
                            "orchestration descriptions synchronized"
                        );
                        self.health.record_success(now);
                    }
                }
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "synchronization failed");
                self.health.record_failure(now, e.to_string());
                Err(e)
            }
        }
    }

    fn reconcile(&self, registry: &DescriptionRegistry) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut uow = UnitOfWork::begin(self.store.as_ref());

        for declared in registry.descriptions() {
            let name = declared.unique_name.to_string();
            let Some(persisted) = uow.get_description_by_unique_name(&declared.unique_name)? else {
                let mut fresh = declared.clone();
                fresh.is_enabled = true;
                uow.add_description(fresh);
                info!(unique_name = %name, "registering orchestration description");
                report.inserted.push(name);
                continue;
            };

            let mut next = persisted.clone();
            match declared.compare_shape(&persisted) {
                ShapeComparison::Identical => {
                    if persisted.is_enabled {
                        report.unchanged.push(name);
                        continue;
                    }
                }
                ShapeComparison::Compatible(changes) => {
                    info!(unique_name = %name, changes = ?changes, "updating orchestration description");
                    next.overwrite_definition_from(declared);
                    report.updated.push(name.clone());
                }
                ShapeComparison::Breaking(reasons) if persisted.is_under_development => {
                    info!(unique_name = %name, changes = ?reasons, "overwriting orchestration description under development");
                    next.overwrite_definition_from(declared);
                    report.updated.push(name.clone());
                }
                ShapeComparison::Breaking(reasons) => {
                    warn!(unique_name = %name, changes = ?reasons, "breaking change rejected; publish a new version instead");
                    report.rejected.push(RejectedChange {
                        unique_name: name,
                        reasons,
                    });
                    continue;
                }
            }

            if !persisted.is_enabled {
                info!(unique_name = %name, "re-enabling orchestration description");
                report.re_enabled.push(name);
            }
            next.is_enabled = true;
            uow.update_description(next);
        }

        let declared: HashSet<&OrchestrationDescriptionUniqueName> = registry
            .descriptions()
            .iter()
            .map(|d| &d.unique_name)
            .collect();
        for persisted in self.store.descriptions()? {
            if persisted.is_enabled && !declared.contains(&persisted.unique_name) {
                let name = persisted.unique_name.to_string();
                info!(unique_name = %name, "disabling orchestration description no longer declared");
                let mut next = persisted;
                next.is_enabled = false;
                uow.update_description(next);
                report.disabled.push(name);
            }
        }

        uow.commit()?;
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
