//! Agent configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use vwd_lib::client::ClientConfig;
use vwd_lib::service::ServiceConfig;
use vwd_lib::tasks::{AutoDumpConfig, WatcherConfig};
use vwd_lib::{DaemonConfig, PortPair};

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "VWD_CONFIG";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name used in structured log events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Daemon binary, looked up on `PATH` when relative
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Port the first daemon listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Port used for the next hot swap
    #[serde(default = "default_standby_port")]
    pub standby_port: u16,

    /// Worker children per daemon
    #[serde(default = "default_children")]
    pub children: usize,

    /// Model loaded at startup
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// Recreate the daemon when the model file changes
    #[serde(default = "default_true")]
    pub watch_model: bool,

    /// Start the daemon in test-only mode
    #[serde(default)]
    pub test_mode: bool,

    /// Extra daemon options, whitespace separated
    #[serde(default)]
    pub extra_opts: String,

    /// Host the daemon listens on
    #[serde(default = "default_host")]
    pub host: String,

    /// Pooled connections per daemon
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// API server port for predictions, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Model watcher poll interval in seconds
    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,

    /// Auto-dump interval in seconds, 0 disables periodic dumps
    #[serde(default = "default_dump_interval")]
    pub dump_interval_secs: u64,

    /// Dump target, defaults to the model path
    #[serde(default)]
    pub dump_path: Option<PathBuf>,

    /// Seconds between publishing a new daemon and stopping the old one
    #[serde(default = "default_retire_grace")]
    pub retire_grace_secs: u64,

    /// Deadline for daemon socket reads and writes in seconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
}

fn default_instance() -> String {
    "vw".to_string()
}

fn default_binary() -> PathBuf {
    PathBuf::from("vw")
}

fn default_port() -> u16 {
    26542
}

fn default_standby_port() -> u16 {
    26543
}

fn default_children() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_connections() -> usize {
    2
}

fn default_api_port() -> u16 {
    8080
}

fn default_watch_interval() -> u64 {
    5
}

fn default_dump_interval() -> u64 {
    30
}

fn default_retire_grace() -> u64 {
    2
}

fn default_io_timeout() -> u64 {
    5
}

impl AgentConfig {
    /// Load configuration from the optional config file and `VWD_*` environment variables
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("VWD").try_parsing(true))
            .build()
            .context("Failed to read configuration sources")?;

        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }

    pub fn daemon_config(&self) -> DaemonConfig {
        let mut daemon = DaemonConfig::new(
            &self.binary,
            PortPair::new(self.port, self.standby_port),
            self.children,
        )
        .with_test_mode(self.test_mode)
        .with_extra_opts(self.extra_opts.clone());

        if let Some(model) = &self.model_path {
            daemon = daemon.with_model(model, self.watch_model);
        }
        daemon
    }

    pub fn service_config(&self) -> ServiceConfig {
        let io_timeout = Duration::from_secs(self.io_timeout_secs);
        ServiceConfig {
            client: ClientConfig {
                host: self.host.clone(),
                max_connections: self.max_connections,
                io_timeout,
                acquire_timeout: io_timeout,
                ..Default::default()
            },
            retire_grace: Duration::from_secs(self.retire_grace_secs),
            instance: self.instance.clone(),
            ..Default::default()
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            interval: Duration::from_secs(self.watch_interval_secs.max(1)),
        }
    }

    /// Where dumps go: the configured dump path, else the model itself
    pub fn dump_target(&self) -> Option<PathBuf> {
        self.dump_path.clone().or_else(|| self.model_path.clone())
    }

    /// Periodic dump settings, `None` when disabled or without a target
    pub fn auto_dump_config(&self) -> Option<AutoDumpConfig> {
        if self.dump_interval_secs == 0 {
            return None;
        }
        self.dump_target().map(|path| {
            AutoDumpConfig::new(path).with_interval(Duration::from_secs(self.dump_interval_secs))
        })
    }
}
