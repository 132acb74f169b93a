//! Background connection to Home Assistant.
//!
//! The HTTP API comes up first; the tools listing turns available once a
//! connect and discovery succeed. Failed attempts are retried on the
//! monitor interval.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use friday_core::tools::{register_local_tools, LocalTools};
use friday_core::ToolBridge;

/// Keep trying until the bridge is connected and its tools discovered
pub fn spawn(bridge: Arc<ToolBridge>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match connect_once(&bridge).await {
                Ok(()) => {
                    let tools = bridge.registry().len().await;
                    info!(tools, "Home Assistant connected");
                    break;
                }
                Err(e) => warn!("Home Assistant unavailable, retrying in {}s: {}", every.as_secs(), e),
            }
        }
    })
}

async fn connect_once(bridge: &ToolBridge) -> friday_core::Result<()> {
    bridge.connect().await?;
    bridge.discover().await?;
    register_local_tools(bridge.registry(), Arc::new(LocalTools::new()?)).await
}
