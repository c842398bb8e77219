//! Error types for daemon supervision and the prediction client

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, VwError>;

/// Errors raised by the supervisor, the connection pool and the client
#[derive(Debug, Error)]
pub enum VwError {
    /// Model file could not be stat'ed when building a supervisor
    #[error("model file {path:?} not found: {source}")]
    ModelNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration values that cannot work together
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Command could not be started at all
    #[error("failed to run `{command}`: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Blocking command exited with a failure status
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    /// Worker count probe printed something that is not a number
    #[error("unexpected worker count output {output:?}")]
    WorkerCount { output: String },

    /// Every liveness sample failed
    #[error("liveness probe for port {port} failed: {source}")]
    LivenessProbe {
        port: u16,
        #[source]
        source: Box<VwError>,
    },

    /// Daemon never reached the expected worker count
    #[error("daemon on port {port} did not reach {expected} workers within {tries} checks")]
    StartupTimeout { port: u16, expected: usize, tries: u32 },

    /// Daemon still had workers after every kill round
    #[error("daemon on port {port} still alive after {rounds} kill rounds")]
    StopTimeout { port: u16, rounds: u32 },

    /// Pool could not be initialized
    #[error("failed to create connection pool for {addr}: {source}")]
    PoolCreation {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// No pooled connection became available in time
    #[error("no connection available for {addr} within {waited:?} (max {max})")]
    PoolExhausted {
        addr: String,
        max: usize,
        waited: Duration,
    },

    /// Pool was closed by `disconnect`
    #[error("connection pool for {addr} is closed")]
    PoolClosed { addr: String },

    /// Dialing a new pooled connection failed
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write to connection: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to read response: {0}")]
    Read(#[source] std::io::Error),

    /// Read or write did not complete before the deadline
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// Response line did not start with a floating point value
    #[error("error parsing prediction value from {line:?}: {source}")]
    Parse {
        line: String,
        #[source]
        source: std::num::ParseFloatError,
    },

    /// Shutdown was requested while a probe was waiting
    #[error("operation cancelled by shutdown")]
    Cancelled,
}

impl VwError {
    /// Whether the error came from the network exchange with the daemon
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            VwError::Write(_) | VwError::Read(_) | VwError::Timeout { .. } | VwError::Connect { .. }
        )
    }
}
