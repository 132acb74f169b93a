//! Capability listing.

use anyhow::Result;
use colored::Colorize;

use friday_core::{Capability, CapabilitySource, Config};

pub async fn execute(json: bool, config: &Config) -> Result<()> {
    let bridge = super::open_bridge(config).await?;
    let capabilities = bridge.registry().list().await;
    bridge.close().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&capabilities)?);
        return Ok(());
    }

    print_capabilities(&capabilities);
    Ok(())
}

pub fn print_capabilities(capabilities: &[Capability]) {
    if capabilities.is_empty() {
        println!("{}", "No tools available".yellow());
        return;
    }

    println!("{}", format!("{} tools available", capabilities.len()).bold());
    for source in [CapabilitySource::HomeAssistant, CapabilitySource::Local] {
        let group: Vec<_> = capabilities.iter().filter(|c| c.source == source).collect();
        if group.is_empty() {
            continue;
        }

        println!();
        let heading = match source {
            CapabilitySource::HomeAssistant => "Home Assistant:",
            CapabilitySource::Local => "Local:",
        };
        println!("  {}", heading.cyan());
        for capability in group {
            let marker = if capability.side_effects { "●".red() } else { "○".green() };
            println!("    {} {} {}", marker, capability.name.bold(), summary(&capability.description).dimmed());
        }
    }
}

/// First line of a description
fn summary(description: &str) -> &str {
    description.lines().next().unwrap_or_default().trim()
}
