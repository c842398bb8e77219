//! Process runner used to start, kill and count daemon processes
//!
//! Commands are passed as structured argument lists. Only the worker count
//! probe goes through `sh -c`, because it needs a pipeline.

use crate::error::{Result, VwError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Trait for command execution implementations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Launch a command and return as soon as it is started
    async fn spawn(&self, program: &str, args: &[String]) -> Result<()>;

    /// Run a command to completion and return its standard output
    async fn output(&self, program: &str, args: &[String]) -> Result<String>;
}

/// Runner backed by real OS processes
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn spawn(&self, program: &str, args: &[String]) -> Result<()> {
        debug!(command = %describe(program, args), "Spawning command");

        // The child is not awaited; tokio reaps it in the background.
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| VwError::Command {
                command: describe(program, args),
                source,
            })?;

        Ok(())
    }

    async fn output(&self, program: &str, args: &[String]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| VwError::Command {
                command: describe(program, args),
                source,
            })?;

        if !output.status.success() {
            return Err(VwError::CommandFailed {
                command: describe(program, args),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Render a command for logs and errors
pub fn describe(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote a string for safe use inside a `sh -c` script
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
