//! Prediction and model dump commands

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tabled::Tabled;

use crate::client::{ApiClient, DumpRequest, DumpResponse, Prediction};
use crate::output::{print_json, print_success, print_table, print_warning, OutputFormat};

/// Row for predictions table
#[derive(Tabled, Serialize)]
struct PredictionRow {
    #[tabled(rename = "#")]
    line: usize,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Tag")]
    tag: String,
}

/// Read example lines from `input`, or stdin when absent or `-`
pub fn read_requests(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("Failed to read stdin")?;
            Ok(body)
        }
    }
}

/// Send examples to the daemon and print one prediction per line
pub async fn predict(client: &ApiClient, input: Option<&Path>, format: OutputFormat) -> Result<()> {
    let body = read_requests(input)?;
    if body.trim().is_empty() {
        print_warning("No examples to send");
        return Ok(());
    }

    let predictions: Vec<Prediction> = client.post_text("predict", body).await?;

    match format {
        OutputFormat::Json => print_json(&predictions),
        OutputFormat::Table => {
            let rows: Vec<PredictionRow> = predictions
                .iter()
                .enumerate()
                .map(|(i, p)| PredictionRow {
                    line: i + 1,
                    value: format!("{:.6}", p.value),
                    tag: p.tag.clone(),
                })
                .collect();
            print_table(&rows, format);
        }
    }

    Ok(())
}

/// Ask the daemon to save its model
pub async fn dump(client: &ApiClient, path: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let response: DumpResponse = client.post("dump", &DumpRequest { path }).await?;

    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            print_success(&format!("Model dump requested to {}", response.path.cyan()));
        }
    }

    Ok(())
}
