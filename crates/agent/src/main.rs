//! vwd-agent - supervisor and HTTP front-end for a prediction daemon
//!
//! Starts the daemon, keeps a pooled client pointed at it, hot-swaps the
//! daemon when its model changes and dumps the model periodically.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vwd_agent::{api, config::AgentConfig};
use vwd_lib::{
    health::{components, HealthRegistry},
    runner::{CommandRunner, SystemRunner},
    tasks::{AutoDumpTicker, ModelWatcher},
    DaemonService, PredictionBackend, StructuredLogger,
};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = AgentConfig::load()?;
    info!(
        binary = %config.binary.display(),
        port = config.port,
        standby_port = config.standby_port,
        children = config.children,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::DAEMON).await;

    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(AGENT_VERSION, config.api_port);

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
    let service = match DaemonService::launch(
        config.daemon_config(),
        runner,
        config.service_config(),
    )
    .await
    {
        Ok(service) => Arc::new(service),
        Err(e) => {
            health_registry
                .set_unhealthy(components::DAEMON, e.to_string())
                .await;
            return Err(e).context("Failed to launch prediction daemon");
        }
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut loops = Vec::new();

    if config.model_path.is_some() && config.watch_model {
        health_registry.register(components::MODEL_WATCHER).await;
        let watcher = ModelWatcher::new(
            service.clone(),
            config.watcher_config(),
            health_registry.clone(),
        );
        loops.push(tokio::spawn(watcher.run(shutdown_tx.subscribe())));
    }

    if let Some(dump_config) = config.auto_dump_config() {
        health_registry.register(components::AUTO_DUMP).await;
        let backend: Arc<dyn PredictionBackend> = service.clone();
        let ticker = AutoDumpTicker::new(backend, dump_config, health_registry.clone());
        loops.push(tokio::spawn(ticker.run(shutdown_tx.subscribe())));
    }

    let app_state = Arc::new(api::AppState::new(
        service.clone(),
        health_registry.clone(),
        config.dump_target(),
    ));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port))
        .await
        .with_context(|| format!("Failed to bind API port {}", config.api_port))?;
    let api_handle = tokio::spawn(api::serve(listener, app_state, shutdown_tx.subscribe()));

    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    // Stop the loops first so no hot swap races the final stop.
    let _ = shutdown_tx.send(());
    for handle in loops {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background loop ended abnormally");
        }
    }

    service
        .shutdown(config.dump_target().as_deref())
        .await
        .context("Failed to stop prediction daemon")?;

    match api_handle.await {
        Ok(result) => result?,
        Err(e) => warn!(error = %e, "API server task ended abnormally"),
    }

    info!("Shutdown complete");
    Ok(())
}
