//! friday-server - Friday background worker
//!
//! Runs the health monitor and serves status over HTTP. Home Assistant is
//! connected in the background once the listener is up.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use friday_core::health::{HealthChecker, HealthMonitor};
use friday_core::{CapabilityRegistry, Config, ToolBridge};

mod connector;
mod routes;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    friday_core::logging::init(&config.logging, "friday_server")?;

    info!("friday-server v{}", env!("CARGO_PKG_VERSION"));

    let listener = tokio::net::TcpListener::bind(&config.health.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.health.bind))?;
    info!("Listening on http://{}", listener.local_addr()?);

    let every = Duration::from_secs(config.health.interval_secs);
    let checker = Arc::new(HealthChecker::new(config.clone())?);
    let monitor = HealthMonitor::spawn(checker, every);

    let bridge = build_bridge(&config);
    let connecting = bridge.clone().map(|bridge| connector::spawn(bridge, every));

    let state = Arc::new(AppState::new(monitor, bridge.clone()));
    let app = routes::create_router(Arc::clone(&state));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    state.monitor.stop();
    if let Some(task) = connecting {
        task.abort();
    }
    if let Some(bridge) = bridge {
        if let Err(e) = bridge.close().await {
            warn!("Failed to close MCP session: {}", e);
        }
    }

    Ok(())
}

/// Bridge for the tools listing; the worker keeps running without it
fn build_bridge(config: &Config) -> Option<Arc<ToolBridge>> {
    if !config.missing_required().is_empty() {
        warn!("Home Assistant MCP is not configured, tool listing disabled");
        return None;
    }

    match ToolBridge::from_config(&config.home_assistant, Arc::new(CapabilityRegistry::new())) {
        Ok(bridge) => Some(Arc::new(bridge)),
        Err(e) => {
            warn!("Invalid Home Assistant settings: {}", e);
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
    }
}
