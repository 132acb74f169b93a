//! Friday core library.
//!
//! Wires a realtime voice agent to Home Assistant through the Model Context
//! Protocol:
//!
//! - [`mcp`] - JSON-RPC client for the Home Assistant MCP server
//! - [`registry`] - capability registry with schema validation
//! - [`bridge`] - tool dispatch with reconnect and slot-error recovery
//! - [`orchestrator`] - voice session lifecycle and tool-call routing
//! - [`health`] - connection diagnostics and periodic monitoring
//! - [`tools`] - weather, time, search and host status tools
//! - [`livekit`] - LiveKit join tokens and room listing

pub mod bridge;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod livekit;
pub mod logging;
pub mod mcp;
pub mod orchestrator;
pub mod prompts;
pub mod registry;
pub mod tools;

pub use bridge::{ToolBridge, ToolOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{RealtimeModel, Session, SessionEvent, SessionOptions, SessionState};
pub use registry::{Capability, CapabilityRegistry, CapabilitySource};
