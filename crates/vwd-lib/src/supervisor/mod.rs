//! Daemon lifecycle management
//!
//! A [`Supervisor`] owns one daemon identity and drives its lifecycle:
//! start, readiness check, stop and death check. Liveness is inferred from
//! the number of OS processes whose command line matches the daemon's port,
//! since the daemon exposes no health endpoint of its own.

mod command;


pub use command::{count_script, kill_args, process_pattern, startup_args};

use crate::error::{Result, VwError};
use crate::models::{DaemonConfig, ModelDescriptor, PortPair};
use crate::runner::{describe, CommandRunner};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Number of liveness samples and the pause between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeBudget {
    pub tries: u32,
    pub delay: Duration,
}

impl ProbeBudget {
    pub const fn new(tries: u32, delay: Duration) -> Self {
        Self { tries, delay }
    }
}

/// Retry budgets for every liveness check the supervisor performs
#[derive(Debug, Clone)]
pub struct ProbeBudgets {
    /// Check for a stale daemon on the port before starting
    pub pre_start: ProbeBudget,
    /// Wait for the full worker count after starting
    pub startup: ProbeBudget,
    /// Check for survivors after each kill
    pub stop_verify: ProbeBudget,
    /// Extra kill rounds before giving up on stop
    pub stop_rounds: u32,
}

impl Default for ProbeBudgets {
    fn default() -> Self {
        Self {
            pre_start: ProbeBudget::new(3, Duration::from_millis(200)),
            startup: ProbeBudget::new(5, Duration::from_millis(500)),
            stop_verify: ProbeBudget::new(10, Duration::from_millis(500)),
            stop_rounds: 5,
        }
    }
}

/// Supervisor for a single daemon instance
pub struct Supervisor {
    config: DaemonConfig,
    model: Option<ModelDescriptor>,
    runner: Arc<dyn CommandRunner>,
    budgets: ProbeBudgets,
    cancel: watch::Receiver<bool>,
}

impl Supervisor {
    /// Create a supervisor, snapshotting the model file's modification time
    pub fn new(config: DaemonConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        if config.ports.active == config.ports.standby {
            return Err(VwError::InvalidConfig(format!(
                "active and standby ports must differ (both {})",
                config.ports.active
            )));
        }
        if config.ports.active == 0 || config.ports.standby == 0 {
            return Err(VwError::InvalidConfig("port 0 cannot be supervised".into()));
        }

        let model = config
            .model_path
            .as_ref()
            .map(|path| ModelDescriptor::load(path, config.watch_model))
            .transpose()?;

        // Sender dropped: probes simply never observe a cancellation.
        let (_, cancel) = watch::channel(false);

        Ok(Self {
            config,
            model,
            runner,
            budgets: ProbeBudgets::default(),
            cancel,
        })
    }

    /// Override the liveness retry budgets
    pub fn with_budgets(mut self, budgets: ProbeBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Abort probe sleeps once `cancel` flips to `true`
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the supervisor that replaces this one on the standby port
    pub fn successor(&self) -> Result<Self> {
        let mut config = self.config.clone();
        config.ports = config.ports.flipped();

        Ok(Self::new(config, self.runner.clone())?
            .with_budgets(self.budgets.clone())
            .with_cancellation(self.cancel.clone()))
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&ModelDescriptor> {
        self.model.as_ref()
    }

    pub fn ports(&self) -> PortPair {
        self.config.ports
    }

    /// Port the daemon listens on
    pub fn port(&self) -> u16 {
        self.config.ports.active
    }

    /// Start the daemon and wait until every worker is up
    pub async fn start(&self) -> Result<()> {
        let pre = self.budgets.pre_start;
        if self.is_not_dead(pre.tries, pre.delay).await? {
            warn!(port = self.port(), "Stale daemon found on port, stopping it first");
            self.stop().await?;
        }

        let args = startup_args(&self.config);
        let program = self.config.binary.to_string_lossy();
        info!(command = %describe(&program, &args), "Starting daemon");
        self.runner.spawn(&program, &args).await?;

        let startup = self.budgets.startup;
        if !self.is_exist(startup.tries, startup.delay).await? {
            return Err(VwError::StartupTimeout {
                port: self.port(),
                expected: self.config.expected_workers(),
                tries: startup.tries,
            });
        }

        info!(
            port = self.port(),
            children = self.config.children,
            "Daemon is running"
        );
        Ok(())
    }

    /// Kill the daemon and verify that no worker survived
    pub async fn stop(&self) -> Result<()> {
        info!(port = self.port(), "Stopping daemon");
        self.kill().await?;

        let verify = self.budgets.stop_verify;
        for round in 1..=self.budgets.stop_rounds {
            if !self.is_not_dead(verify.tries, verify.delay).await? {
                info!(port = self.port(), "Daemon stopped");
                return Ok(());
            }

            warn!(port = self.port(), round, "Daemon still alive, killing again");
            self.kill().await?;
        }

        // The last round's kill has not been verified yet.
        if !self.is_not_dead(verify.tries, verify.delay).await? {
            info!(port = self.port(), "Daemon stopped");
            return Ok(());
        }

        Err(VwError::StopTimeout {
            port: self.port(),
            rounds: self.budgets.stop_rounds,
        })
    }

    /// Issue one kill without waiting for the workers to disappear
    pub async fn kill(&self) -> Result<()> {
        let args = kill_args(&process_pattern(&self.config));
        self.runner.spawn("pkill", &args).await
    }

    /// Number of live daemon processes (parent and children)
    pub async fn workers_count(&self) -> Result<usize> {
        let script = count_script(&process_pattern(&self.config));
        let output = self
            .runner
            .output("sh", &["-c".to_string(), script])
            .await?;

        let raw: usize = output
            .trim()
            .parse()
            .map_err(|_| VwError::WorkerCount {
                output: output.clone(),
            })?;

        // Discount the `sh -c` wrapper that ran the pipeline.
        Ok(raw.saturating_sub(1))
    }

    /// True as soon as any worker is observed within `tries` samples
    pub async fn is_not_dead(&self, tries: u32, delay: Duration) -> Result<bool> {
        self.sample_until(tries, delay, |count| count > 0).await
    }

    /// True as soon as exactly `children + 1` workers are observed within `tries` samples
    pub async fn is_exist(&self, tries: u32, delay: Duration) -> Result<bool> {
        let expected = self.config.expected_workers();
        self.sample_until(tries, delay, |count| count == expected)
            .await
    }

    async fn sample_until<F>(&self, tries: u32, delay: Duration, done: F) -> Result<bool>
    where
        F: Fn(usize) -> bool,
    {
        let mut last_error = None;

        for attempt in 1..=tries {
            match self.workers_count().await {
                Ok(count) => {
                    debug!(port = self.port(), attempt, count, "Sampled worker count");
                    last_error = None;
                    if done(count) {
                        return Ok(true);
                    }
                }
                Err(e) => {
                    debug!(port = self.port(), attempt, error = %e, "Worker count sample failed");
                    last_error = Some(e);
                }
            }

            if attempt < tries {
                self.pause(delay).await?;
            }
        }

        match last_error {
            Some(source) => Err(VwError::LivenessProbe {
                port: self.port(),
                source: Box::new(source),
            }),
            None => Ok(false),
        }
    }

    async fn pause(&self, delay: Duration) -> Result<()> {
        if *self.cancel.borrow() {
            return Err(VwError::Cancelled);
        }

        let mut cancel = self.cancel.clone();
        let cancelled = tokio::select! {
            _ = tokio::time::sleep(delay) => return Ok(()),
            res = cancel.wait_for(|cancelled| *cancelled) => res.is_ok(),
        };

        if cancelled {
            return Err(VwError::Cancelled);
        }

        // Nobody can cancel any more, fall back to a plain sleep.
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("model", &self.model)
            .field("budgets", &self.budgets)
            .finish()
    }
}
