//! Model Context Protocol client.
//!
//! ```text
//! McpClient ──► McpTransport (trait) ─┬─► HttpTransport ──► Home Assistant /api/mcp
//!    │                                └─► SseTransport ───► Home Assistant /mcp_server/sse
//!    │
//!    └─ initialize → notifications/initialized → tools/list → tools/call
//! ```
//!
//! Connection setup goes through [`connect_with_retry`], which waits for the
//! server to settle and backs off progressively between attempts.

pub mod client;
pub mod protocol;
pub mod sse;
pub mod transport;

#[cfg(test)]
pub mod testing;

pub use client::{connect_with_retry, http_factory, McpClient, RetryPolicy, TransportFactory};
pub use protocol::{CallToolResult, ToolContent, ToolDescriptor};
pub use sse::SseTransport;
pub use transport::{EventDecoder, HttpTransport, McpEndpoint, McpTransport, SseEvent};
