use std::sync::Arc;

use orchestrations_core::clock::Clock;
use orchestrations_core::commands::OrchestrationService;
use orchestrations_core::config::Config;
use orchestrations_core::executor::StepExecutor;
use orchestrations_core::register::SynchronizationHealth;
use orchestrations_core::store::OrchestrationStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrchestrationService>,
    pub health: Arc<SynchronizationHealth>,
    /// Runs instance steps for the embedding host, retrying per `config.retry`.
    pub executor: Arc<StepExecutor>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn OrchestrationStore>,
        clock: Arc<dyn Clock>,
        health: Arc<SynchronizationHealth>,
        config: &Config,
    ) -> Self {
        let executor = StepExecutor::from_config(store.clone(), clock.clone(), config);
        let service = OrchestrationService::new(store, clock).with_silent_mode(config.silent_mode);
        Self {
            service: Arc::new(service),
            health,
            executor: Arc::new(executor),
        }
    }
}
