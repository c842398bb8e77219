//! Agent status command

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, HealthResponse, StatusResponse};
use crate::output::{color_status, format_timestamp, print_json, print_table, OutputFormat};

/// Row for the component health table
#[derive(Tabled, Serialize)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Last Check")]
    last_check: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Show the active daemon port and component health
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: StatusResponse = client.get("status").await?;
    let health: HealthResponse = client.get("healthz").await?;

    if let OutputFormat::Json = format {
        print_json(&serde_json::json!({ "status": status, "health": health }));
        return Ok(());
    }

    let ready = if status.ready { "ready" } else { "not ready" };
    println!("{}", "Daemon Status".bold());
    println!("{}", "=".repeat(40));
    println!("Active Port:  {}", status.active_port.to_string().cyan());
    println!("Health:       {}", color_status(&status.status));
    println!("Readiness:    {}", color_status(ready));
    println!();

    let rows: Vec<ComponentRow> = health
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            name: name.clone(),
            status: color_status(&component.status),
            last_check: format_timestamp(component.last_check_timestamp),
            message: component.message.clone().unwrap_or_default(),
        })
        .collect();
    print_table(&rows, format);

    Ok(())
}
