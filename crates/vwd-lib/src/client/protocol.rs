//! Line protocol spoken by the daemon
//!
//! Requests are newline separated example strings. Each answered request
//! produces one response line `<value>` or `<value> <tag>`.

use crate::error::{Result, VwError};
use crate::models::Prediction;
use std::path::Path;

/// Prefix of the control request that makes the daemon dump its model
pub const SAVE_PREFIX: &str = "save_";

/// Join requests into one newline-terminated write
pub fn encode_batch<S: AsRef<str>>(requests: &[S]) -> Vec<u8> {
    let mut data = requests
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes();
    data.push(b'\n');
    data
}

/// Control request asking the daemon to save its model to `path`
pub fn save_command(path: &Path) -> String {
    format!("{}{}", SAVE_PREFIX, path.display())
}

/// Parse one response line into a prediction
pub fn parse_prediction(line: &str) -> Result<Prediction> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut tokens = line.split(' ');

    // `split` always yields at least one token.
    let value_token = tokens.next().unwrap_or_default();
    let value = value_token.parse::<f64>().map_err(|source| VwError::Parse {
        line: line.to_string(),
        source,
    })?;

    Ok(Prediction {
        value,
        tag: tokens.next().unwrap_or_default().to_string(),
    })
}
