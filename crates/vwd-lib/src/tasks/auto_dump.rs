//! Periodic model dumps

use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::service::PredictionBackend;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Configuration for the auto-dump ticker
#[derive(Debug, Clone)]
pub struct AutoDumpConfig {
    /// Time between dumps, the first one fires after a full interval (default: 30 seconds)
    pub interval: Duration,
    /// Where the daemon writes the model
    pub path: PathBuf,
}

impl AutoDumpConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            interval: Duration::from_secs(30),
            path: path.into(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

pub struct AutoDumpTicker {
    backend: Arc<dyn PredictionBackend>,
    config: AutoDumpConfig,
    health: HealthRegistry,
}

impl AutoDumpTicker {
    pub fn new(
        backend: Arc<dyn PredictionBackend>,
        config: AutoDumpConfig,
        health: HealthRegistry,
    ) -> Self {
        Self {
            backend,
            config,
            health,
        }
    }

    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            path = %self.config.path.display(),
            "Starting auto-dump ticker"
        );

        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.tick_once().await;
                    self.health.record(components::AUTO_DUMP, &outcome).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down auto-dump ticker");
                    break;
                }
            }
        }
    }

    /// Ask the daemon for one dump
    pub async fn tick_once(&self) -> Result<()> {
        let result = self.backend.dump_model(&self.config.path).await;
        if let Err(e) = &result {
            warn!(path = %self.config.path.display(), error = %e, "Auto-dump failed");
        }
        result
    }
}
