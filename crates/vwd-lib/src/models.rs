//! Core data models for daemon supervision

use crate::error::{Result, VwError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Parsed result of one daemon response line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub value: f64,
    /// Opaque tag echoed by the daemon, empty when absent
    pub tag: String,
}

/// Ports reserved for one logical daemon: the live one and the next hot-swap target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    pub active: u16,
    pub standby: u16,
}

impl PortPair {
    pub fn new(active: u16, standby: u16) -> Self {
        Self { active, standby }
    }

    /// The pair as seen by the daemon that replaces the current one
    pub fn flipped(self) -> Self {
        Self {
            active: self.standby,
            standby: self.active,
        }
    }
}

/// Model file backing a daemon
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub path: PathBuf,
    /// Modification time captured when the descriptor was built
    pub modified: SystemTime,
    /// Whether the model watcher should hot-swap on changes
    pub updatable: bool,
}

impl ModelDescriptor {
    /// Stat the model file and snapshot its modification time
    pub fn load(path: impl Into<PathBuf>, updatable: bool) -> Result<Self> {
        let path = path.into();
        let modified = modified_time(&path)?;

        Ok(Self {
            path,
            modified,
            updatable,
        })
    }

    /// Check whether the file on disk differs from the snapshot
    pub fn is_changed(&self) -> Result<bool> {
        Ok(modified_time(&self.path)? != self.modified)
    }
}

fn modified_time(path: &Path) -> Result<SystemTime> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|source| VwError::ModelNotFound {
            path: path.to_path_buf(),
            source,
        })
}

/// Everything needed to launch one daemon instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Path to the daemon binary
    pub binary: PathBuf,
    pub ports: PortPair,
    /// Number of worker children the daemon forks
    pub children: usize,
    /// Model loaded with `-i`, if any
    pub model_path: Option<PathBuf>,
    /// Hot-swap the daemon when the model file changes
    #[serde(default)]
    pub watch_model: bool,
    /// Start the daemon in test-only mode (`-t`)
    #[serde(default)]
    pub test_mode: bool,
    /// Extra options appended after the generated flags
    #[serde(default)]
    pub extra_opts: String,
}

impl DaemonConfig {
    pub fn new(binary: impl Into<PathBuf>, ports: PortPair, children: usize) -> Self {
        Self {
            binary: binary.into(),
            ports,
            children,
            model_path: None,
            watch_model: false,
            test_mode: false,
            extra_opts: String::new(),
        }
    }

    pub fn with_model(mut self, path: impl Into<PathBuf>, watch: bool) -> Self {
        self.model_path = Some(path.into());
        self.watch_model = watch;
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn with_extra_opts(mut self, opts: impl Into<String>) -> Self {
        self.extra_opts = opts.into();
        self
    }

    /// File name of the binary, used to match the daemon's processes
    pub fn binary_name(&self) -> String {
        self.binary
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.binary.to_string_lossy().into_owned())
    }

    /// Worker count of a fully started daemon: every child plus the parent
    pub fn expected_workers(&self) -> usize {
        self.children + 1
    }
}
