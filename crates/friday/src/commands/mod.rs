//! Command implementations.

pub mod call;
pub mod console;
pub mod health;
pub mod serve;
pub mod token;
pub mod tools;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

use friday_core::tools::{register_local_tools, LocalTools};
use friday_core::{CapabilityRegistry, Config, ToolBridge};

/// Connect to Home Assistant, mirror its tools and add the local ones.
pub async fn open_bridge(config: &Config) -> Result<Arc<ToolBridge>> {
    let missing = config.missing_required();
    if !missing.is_empty() {
        bail!("Missing required environment variables: {}", missing.join(", "));
    }

    let registry = Arc::new(CapabilityRegistry::new());
    let bridge = Arc::new(ToolBridge::from_config(&config.home_assistant, Arc::clone(&registry))?);

    let spinner = spinner("Connecting to Home Assistant...");
    let connected = bridge.connect().await;
    spinner.finish_and_clear();
    connected.context("Could not connect to the Home Assistant MCP server")?;

    let summary = bridge.discover().await.context("Tool discovery failed")?;
    tracing::debug!(added = summary.added, skipped = summary.skipped.len(), "Discovered tools");

    let local = Arc::new(LocalTools::new()?);
    register_local_tools(&registry, local).await?;

    Ok(bridge)
}

/// Parse a JSON object argument; empty input means no arguments.
pub fn parse_arguments(raw: Option<&str>) -> Result<serde_json::Value> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(serde_json::json!({})),
        Some(text) => {
            let value: serde_json::Value =
                serde_json::from_str(text).context("Arguments must be valid JSON")?;
            if !value.is_object() {
                bail!("Arguments must be a JSON object");
            }
            Ok(value)
        }
    }
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}
