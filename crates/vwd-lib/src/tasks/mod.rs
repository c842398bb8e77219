//! Background loops driven by the agent
//!
//! Both loops stop on the shared broadcast shutdown signal.

pub mod auto_dump;
pub mod model_watcher;

pub use auto_dump::{AutoDumpConfig, AutoDumpTicker};
pub use model_watcher::{ModelWatcher, WatchOutcome, WatcherConfig};
