//! Model file watcher
//!
//! Polls the modification time of the serving daemon's model and hot-swaps
//! the daemon onto its standby port when the file changes.

use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::service::DaemonService;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the model watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Time between modification checks (default: 5 seconds)
    pub interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Result of one watcher poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The model file still matches the serving daemon's snapshot
    Unchanged,
    /// The daemon was recreated on the standby port
    Recreated { old_port: u16, new_port: u16 },
    /// The serving daemon has no updatable model
    Unwatched,
}

/// Periodic hot-swap trigger
pub struct ModelWatcher {
    service: Arc<DaemonService>,
    config: WatcherConfig,
    health: HealthRegistry,
}

impl ModelWatcher {
    pub fn new(service: Arc<DaemonService>, config: WatcherConfig, health: HealthRegistry) -> Self {
        Self {
            service,
            config,
            health,
        }
    }

    /// Poll until shutdown. Failed polls are logged and retried next tick.
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting model watcher"
        );

        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.poll_once().await;
                    if let Err(e) = &outcome {
                        warn!(error = %e, "Model watcher poll failed");
                    }
                    self.health.record(components::MODEL_WATCHER, &outcome).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down model watcher");
                    break;
                }
            }
        }
    }

    /// Check the model once and recreate the daemon if it changed
    pub async fn poll_once(&self) -> Result<WatchOutcome> {
        let backend = self.service.backend().await;

        let model = match backend.supervisor().model() {
            Some(model) if model.updatable => model,
            _ => return Ok(WatchOutcome::Unwatched),
        };

        if !model.is_changed()? {
            return Ok(WatchOutcome::Unchanged);
        }

        info!(
            path = %model.path.display(),
            port = backend.port(),
            "Model file changed, recreating daemon"
        );

        let old_port = backend.port();
        let new_port = self.service.recreate().await?;
        debug!(old_port, new_port, "Model watcher finished hot swap");

        Ok(WatchOutcome::Recreated { old_port, new_port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VwError;
    use crate::health::ComponentStatus;
    use crate::models::{DaemonConfig, PortPair};
    use crate::testing::{fast_service_config, FakeDaemon, FakeProcessTable};
    use std::fs::File;
    use std::path::Path;
    use std::time::SystemTime;
    use tempfile::TempDir;

    struct Fixture {
        _primary: FakeDaemon,
        _standby: FakeDaemon,
        dir: TempDir,
        table: Arc<FakeProcessTable>,
        service: Arc<DaemonService>,
        ports: PortPair,
    }

    impl Fixture {
        fn model_path(&self) -> std::path::PathBuf {
            self.dir.path().join("model.vw")
        }
    }

    fn touch(path: &Path, secs_ago: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
            .unwrap();
    }

    async fn fixture(watch: bool) -> Fixture {
        let primary = FakeDaemon::start().await;
        let standby = FakeDaemon::start().await;
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("model.vw");
        File::create(&model).unwrap();
        touch(&model, 3600);

        let ports = PortPair::new(primary.port, standby.port);
        let table = Arc::new(FakeProcessTable::new());
        let daemon = DaemonConfig::new("vw", ports, 2).with_model(&model, watch);
        let service = DaemonService::launch(daemon, table.clone(), fast_service_config())
            .await
            .unwrap();

        Fixture {
            _primary: primary,
            _standby: standby,
            dir,
            table,
            service: Arc::new(service),
            ports,
        }
    }

    fn watcher(service: Arc<DaemonService>) -> ModelWatcher {
        ModelWatcher::new(service, WatcherConfig::default(), HealthRegistry::new())
    }

    #[tokio::test]
    async fn test_unchanged_model() {
        let fx = fixture(true).await;
        let watcher = watcher(fx.service.clone());

        assert_eq!(watcher.poll_once().await.unwrap(), WatchOutcome::Unchanged);
        assert_eq!(fx.table.workers(fx.ports.active), 3);
    }

    #[tokio::test]
    async fn test_changed_model_triggers_single_hot_swap() {
        let fx = fixture(true).await;
        let watcher = watcher(fx.service.clone());

        touch(&fx.model_path(), 0);

        assert_eq!(
            watcher.poll_once().await.unwrap(),
            WatchOutcome::Recreated {
                old_port: fx.ports.active,
                new_port: fx.ports.standby,
            }
        );
        assert_eq!(fx.table.workers(fx.ports.active), 0);
        assert_eq!(fx.table.workers(fx.ports.standby), 3);

        // The new daemon captured the new timestamp
        assert_eq!(watcher.poll_once().await.unwrap(), WatchOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_swaps_back_on_next_change() {
        let fx = fixture(true).await;
        let watcher = watcher(fx.service.clone());

        touch(&fx.model_path(), 60);
        watcher.poll_once().await.unwrap();
        touch(&fx.model_path(), 0);

        assert_eq!(
            watcher.poll_once().await.unwrap(),
            WatchOutcome::Recreated {
                old_port: fx.ports.standby,
                new_port: fx.ports.active,
            }
        );
    }

    #[tokio::test]
    async fn test_not_updatable_is_unwatched() {
        let fx = fixture(false).await;
        let watcher = watcher(fx.service.clone());

        touch(&fx.model_path(), 0);

        assert_eq!(watcher.poll_once().await.unwrap(), WatchOutcome::Unwatched);
        assert_eq!(fx.table.workers(fx.ports.standby), 0);
    }

    #[tokio::test]
    async fn test_missing_model_reports_error() {
        let fx = fixture(true).await;
        let watcher = watcher(fx.service.clone());

        std::fs::remove_file(fx.model_path()).unwrap();

        let err = watcher.poll_once().await.unwrap_err();
        assert!(matches!(err, VwError::ModelNotFound { .. }));
        assert_eq!(fx.service.backend().await.port(), fx.ports.active);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let fx = fixture(true).await;
        let health = HealthRegistry::new();
        let watcher = ModelWatcher::new(
            fx.service.clone(),
            WatcherConfig {
                interval: Duration::from_millis(5),
            },
            health.clone(),
        );
        let (tx, rx) = tokio::sync::broadcast::channel(1);

        std::fs::remove_file(fx.model_path()).unwrap();
        let handle = tokio::spawn(watcher.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        let health = health.health().await;
        assert_eq!(
            health.components[components::MODEL_WATCHER].status,
            ComponentStatus::Degraded
        );
    }
}
