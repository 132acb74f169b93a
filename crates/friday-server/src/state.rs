//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use friday_core::health::HealthMonitor;
use friday_core::ToolBridge;

pub struct AppState {
    pub start_time: Instant,
    pub monitor: HealthMonitor,
    /// `None` when Home Assistant is not configured
    pub bridge: Option<Arc<ToolBridge>>,
}

impl AppState {
    pub fn new(monitor: HealthMonitor, bridge: Option<Arc<ToolBridge>>) -> Self {
        Self {
            start_time: Instant::now(),
            monitor,
            bridge,
        }
    }
}
