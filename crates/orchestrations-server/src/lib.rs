pub mod catalog;
pub mod error;
pub mod routes;
pub mod scheduler;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use orchestrations_core::clock::{Clock, SystemClock};
use orchestrations_core::config::Config;
use orchestrations_core::register::OrchestrationRegister;
use orchestrations_core::scheduler::RecurringScheduler;
use orchestrations_core::store::{OrchestrationStore, RedbStore};

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: state::AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/api/health", get(routes::health::get_health))
        // Descriptions
        .route(
            "/api/orchestrations",
            get(routes::orchestrations::list_orchestrations),
        )
        .route(
            "/api/orchestrations/{name}/{version}/instances",
            post(routes::orchestrations::start_orchestration),
        )
        .route(
            "/api/orchestrations/{name}/{version}/schedule",
            post(routes::orchestrations::schedule_orchestration),
        )
        // Instances
        .route("/api/instances", get(routes::instances::list_instances))
        .route("/api/instances/{id}", get(routes::instances::get_instance))
        .route(
            "/api/instances/{id}/cancel",
            post(routes::instances::cancel_instance),
        )
        .route(
            "/api/instances/{id}/notify",
            post(routes::instances::notify_instance),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Start the orchestration host.
///
/// Opens the store, synchronizes the declared catalog (a failed or rejected
/// synchronization is reported through the health check, not returned), runs
/// the recurring scheduler in the background and serves the API until Ctrl-C.
pub async fn serve(root: PathBuf, port: Option<u16>) -> anyhow::Result<()> {
    let config = Config::load(&root).context("loading .orchestrations/config.yaml")?;
    let db_path = config.database_path(&root);
    let store: Arc<dyn OrchestrationStore> = Arc::new(
        RedbStore::open(&db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let register = OrchestrationRegister::new(store.clone(), clock.clone());
    let registry = catalog::declared().context("building declared orchestration catalog")?;
    if let Err(e) = register.synchronize(&registry) {
        tracing::warn!(error = %e, "starting with unsynchronized orchestration catalog");
    }

    let scheduler = Arc::new(
        RecurringScheduler::new(store.clone(), clock.clone())
            .with_lookback(config.scheduler.lookback()),
    );
    let cancel = CancellationToken::new();
    let scheduler_task =
        scheduler::spawn_scheduler_loop(scheduler, config.scheduler.interval(), cancel.clone());

    let app = build_router(state::AppState::new(
        store,
        clock,
        register.health(),
        &config,
    ));

    let port = port.unwrap_or(config.server.port);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("orchestrations host listening on http://localhost:{port}");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    scheduler_task.await.ok();
    Ok(())
}
