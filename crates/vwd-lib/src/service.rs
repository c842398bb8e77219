//! Serving context that owns the live daemon and its client
//!
//! The (supervisor, client) pair is published as one `Arc<Backend>`. A hot
//! swap builds the replacement on the standby port, publishes it with a
//! single write, and only then retires the old daemon, so requesters never
//! see a half-swapped pair.

use crate::client::{Client, ClientConfig};
use crate::error::{Result, VwError};
use crate::models::{DaemonConfig, Prediction};
use crate::observability::{DaemonMetrics, StructuredLogger};
use crate::runner::CommandRunner;
use crate::supervisor::{ProbeBudgets, Supervisor};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, warn};

/// Operations the HTTP layer needs from the daemon
#[async_trait]
pub trait PredictionBackend: Send + Sync {
    /// Get one prediction per request line
    async fn predict(&self, requests: &[String]) -> Result<Vec<Prediction>>;

    /// Ask the daemon to save its model
    async fn dump_model(&self, path: &Path) -> Result<()>;

    /// Port of the daemon currently serving
    async fn active_port(&self) -> u16;
}

/// Configuration for the serving context
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub client: ClientConfig,
    pub budgets: ProbeBudgets,
    /// Delay between publishing a new backend and stopping the old daemon
    pub retire_grace: Duration,
    /// Name used in structured log events
    pub instance: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            budgets: ProbeBudgets::default(),
            retire_grace: Duration::from_secs(2),
            instance: "vw".to_string(),
        }
    }
}

/// A started daemon together with the client pointed at it
#[derive(Debug)]
pub struct Backend {
    supervisor: Supervisor,
    client: Client,
}

impl Backend {
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn port(&self) -> u16 {
        self.supervisor.port()
    }
}

/// Owner of the live backend and of the hot-swap procedure
pub struct DaemonService {
    current: RwLock<Arc<Backend>>,
    swap_lock: Mutex<()>,
    config: ServiceConfig,
    cancel: watch::Sender<bool>,
    shutting_down: AtomicBool,
    metrics: DaemonMetrics,
    logger: StructuredLogger,
}

impl DaemonService {
    /// Start the daemon described by `daemon` and connect a client to it
    pub async fn launch(
        daemon: DaemonConfig,
        runner: Arc<dyn CommandRunner>,
        config: ServiceConfig,
    ) -> Result<Self> {
        let (cancel, cancel_rx) = watch::channel(false);
        let metrics = DaemonMetrics::new();
        let logger = StructuredLogger::new(config.instance.clone());

        let supervisor = Supervisor::new(daemon, runner)?
            .with_budgets(config.budgets.clone())
            .with_cancellation(cancel_rx);
        let backend = bring_up(supervisor, &config.client).await?;

        logger.log_daemon_started(
            backend.port(),
            backend.supervisor.config().children,
            backend.supervisor.config().model_path.as_deref(),
        );
        metrics.set_active_port(backend.port());

        let service = Self {
            current: RwLock::new(Arc::new(backend)),
            swap_lock: Mutex::new(()),
            config,
            cancel,
            shutting_down: AtomicBool::new(false),
            metrics,
            logger,
        };
        if let Err(e) = service.refresh_live_workers().await {
            warn!(error = %e, "Failed to count daemon workers");
        }
        Ok(service)
    }

    /// Snapshot of the live backend
    pub async fn backend(&self) -> Arc<Backend> {
        self.current.read().await.clone()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Count the live daemon's processes and publish the result
    pub async fn refresh_live_workers(&self) -> Result<usize> {
        let workers = self.backend().await.supervisor.workers_count().await?;
        self.metrics.set_live_workers(workers);
        Ok(workers)
    }

    /// Replace the daemon with a fresh one on the standby port.
    ///
    /// Returns the new active port. If the replacement fails to come up the
    /// old daemon keeps serving and the error is returned.
    pub async fn recreate(&self) -> Result<u16> {
        let _swap = self.swap_lock.lock().await;
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(VwError::Cancelled);
        }

        let old = self.backend().await;
        info!(
            from = old.port(),
            to = old.supervisor.ports().standby,
            "Start recreating daemon on new port"
        );

        let successor = old.supervisor.successor()?;
        let new_backend = bring_up(successor, &self.config.client).await?;
        let new_port = new_backend.port();

        *self.current.write().await = Arc::new(new_backend);
        self.metrics.inc_hot_swaps();
        self.metrics.set_active_port(new_port);
        if let Err(e) = self.refresh_live_workers().await {
            warn!(port = new_port, error = %e, "Failed to count daemon workers");
        }

        // Let requests already holding the old backend finish.
        tokio::time::sleep(self.config.retire_grace).await;
        retire(&old, &self.logger).await;

        self.logger.log_hot_swap(old.port(), new_port);
        Ok(new_port)
    }

    /// Stop serving: optional final dump, close the pool, stop the daemon
    pub async fn shutdown(&self, final_dump: Option<&Path>) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);

        // Abort a swap stuck in liveness probes, wait for it to unwind, then
        // re-arm probes for the final stop.
        self.cancel.send_replace(true);
        let _swap = self.swap_lock.lock().await;
        self.cancel.send_replace(false);

        let backend = self.backend().await;

        if let Some(path) = final_dump {
            let outcome = backend.client.dump_model(path).await;
            self.logger
                .log_model_dump(path, outcome.as_ref().err().map(|e| e.to_string()).as_deref());
        }

        backend.client.disconnect();
        tokio::time::sleep(self.config.retire_grace).await;

        backend.supervisor.stop().await?;
        self.logger.log_daemon_stopped(backend.port());
        Ok(())
    }
}

/// Start `supervisor` and connect a client to its port
async fn bring_up(supervisor: Supervisor, client_config: &ClientConfig) -> Result<Backend> {
    if let Err(e) = supervisor.start().await {
        match e {
            // Liveness checks are cancelled, so the kill cannot be verified.
            VwError::Cancelled => kill_unverified(&supervisor).await,
            _ => abandon(&supervisor).await,
        }
        return Err(e);
    }

    match Client::connect(supervisor.port(), client_config).await {
        Ok(client) => Ok(Backend { supervisor, client }),
        Err(e) => {
            error!(port = supervisor.port(), error = %e, "Failed to connect to started daemon");
            abandon(&supervisor).await;
            Err(e)
        }
    }
}

/// Best-effort stop of a daemon that will never be published
async fn abandon(supervisor: &Supervisor) {
    if let Err(e) = supervisor.stop().await {
        warn!(port = supervisor.port(), error = %e, "Failed to clean up daemon");
    }
}

async fn kill_unverified(supervisor: &Supervisor) {
    if let Err(e) = supervisor.kill().await {
        warn!(port = supervisor.port(), error = %e, "Failed to kill daemon");
    }
}

async fn retire(old: &Backend, logger: &StructuredLogger) {
    old.client.disconnect();
    match old.supervisor.stop().await {
        Ok(()) => logger.log_daemon_stopped(old.port()),
        Err(VwError::Cancelled) => kill_unverified(&old.supervisor).await,
        Err(e) => warn!(port = old.port(), error = %e, "Failed to stop replaced daemon"),
    }
}

#[async_trait]
impl PredictionBackend for DaemonService {
    async fn predict(&self, requests: &[String]) -> Result<Vec<Prediction>> {
        let backend = self.backend().await;
        let start = Instant::now();

        let result = backend.client.predict(requests).await;
        self.metrics.set_pool_in_use(backend.client.pool().in_use());

        match &result {
            Ok(predictions) => self
                .metrics
                .observe_request(start.elapsed().as_secs_f64(), predictions.len()),
            Err(e) => {
                if e.is_io() {
                    warn!(port = backend.port(), error = %e, "Daemon connection failed");
                }
                self.metrics.inc_prediction_errors();
            }
        }
        result
    }

    async fn dump_model(&self, path: &Path) -> Result<()> {
        let backend = self.backend().await;
        let result = backend.client.dump_model(path).await;

        if result.is_err() {
            self.metrics.inc_dump_failures();
        }
        self.logger
            .log_model_dump(path, result.as_ref().err().map(|e| e.to_string()).as_deref());
        result
    }

    async fn active_port(&self) -> u16 {
        self.backend().await.port()
    }
}
