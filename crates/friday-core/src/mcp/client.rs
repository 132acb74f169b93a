//! MCP client: handshake, tool discovery and tool calls.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, ToolDescriptor,
};
use super::sse::SseTransport;
use super::transport::{HttpTransport, McpEndpoint, McpTransport};
use crate::config::HomeAssistantConfig;
use crate::error::{Error, Result};

/// Upper bound on `tools/list` pages, guards against cursor loops
const MAX_TOOL_PAGES: usize = 100;

/// Builds a fresh transport for each connection attempt
pub type TransportFactory = Arc<dyn Fn() -> Result<Arc<dyn McpTransport>> + Send + Sync>;

/// Client for one MCP server
pub struct McpClient {
    transport: Arc<dyn McpTransport>,
    next_id: AtomicU64,
    server: RwLock<Option<InitializeResult>>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    pub fn new(transport: Arc<dyn McpTransport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            server: RwLock::new(None),
        }
    }

    /// Perform the initialize handshake
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let result: InitializeResult = self.send("initialize", Some(params)).await?.decode()?;

        self.transport
            .notify(JsonRpcNotification::new("notifications/initialized"))
            .await?;

        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "MCP session initialized"
        );

        *self.server.write().await = Some(result.clone());
        Ok(result)
    }

    pub async fn is_initialized(&self) -> bool {
        self.server.read().await.is_some()
    }

    /// Handshake result, once connected
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server.read().await.clone()
    }

    /// List every tool, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult = self.call("tools/list", params).await?.decode()?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    debug!(count = tools.len(), "Discovered MCP tools");
                    return Ok(tools);
                }
            }
        }

        Err(Error::Protocol(format!(
            "tools/list did not finish within {} pages",
            MAX_TOOL_PAGES
        )))
    }

    /// Invoke a tool
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        self.call("tools/call", Some(params)).await?.decode()
    }

    pub async fn ping(&self) -> Result<()> {
        self.call("ping", None).await?.into_result()?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        *self.server.write().await = None;
        self.transport.close().await
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        if !self.is_initialized().await {
            return Err(Error::NotConnected);
        }
        self.send(method, params).await
    }

    async fn send(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.transport
            .request(JsonRpcRequest::new(id, method, params))
            .await
    }
}

/// Connection retry schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before the first attempt, giving the server time to come up
    pub initial_settle: Duration,
    /// Wait before each later attempt
    pub reconnect_settle: Duration,
    /// Backoff after failed attempt `n` is `backoff_step * n`
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_settle: Duration::from_secs(5),
            reconnect_settle: Duration::from_secs(3),
            backoff_step: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &HomeAssistantConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            ..Default::default()
        }
    }

    /// No waiting at all
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_settle: Duration::ZERO,
            reconnect_settle: Duration::ZERO,
            backoff_step: Duration::ZERO,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Transport factory for the configured Home Assistant MCP endpoint.
///
/// The transport follows the URL: `/mcp_server/sse` gets the event-stream
/// transport, anything else streamable HTTP.
pub fn http_factory(config: &HomeAssistantConfig) -> Result<TransportFactory> {
    let (url, token) = match (&config.mcp_url, &config.token) {
        (Some(url), Some(token)) => (url.clone(), token.clone()),
        _ => {
            error!("MCP environment variables not found (HOME_ASSISTANT_MCP_URL, HOME_ASSISTANT_TOKEN)");
            return Err(Error::MissingEnv(
                [
                    config.mcp_url.is_none().then_some(crate::config::ENV_MCP_URL),
                    config.token.is_none().then_some(crate::config::ENV_MCP_TOKEN),
                ]
                .into_iter()
                .flatten()
                .map(String::from)
                .collect(),
            ));
        }
    };
    let timeout = Duration::from_secs(config.timeout_secs);
    let endpoint = McpEndpoint::detect(&url);
    debug!(url = %url, transport = endpoint.as_str(), "MCP transport selected");

    Ok(Arc::new(move || {
        let transport: Arc<dyn McpTransport> = match endpoint {
            McpEndpoint::Sse => Arc::new(SseTransport::new(url.clone(), token.clone(), timeout)?),
            McpEndpoint::StreamableHttp => Arc::new(HttpTransport::new(url.clone(), token.clone(), timeout)?),
        };
        Ok(transport)
    }))
}

/// Connect and handshake, retrying with progressive backoff.
pub async fn connect_with_retry(
    factory: &TransportFactory,
    policy: &RetryPolicy,
) -> Result<McpClient> {
    let mut last_error = String::from("no attempts made");

    for attempt in 1..=policy.max_attempts {
        info!(
            "Attempting to connect to Home Assistant MCP server (attempt {}/{})",
            attempt, policy.max_attempts
        );

        let settle = if attempt == 1 {
            policy.initial_settle
        } else {
            policy.reconnect_settle
        };
        if !settle.is_zero() {
            debug!("Waiting {:?} for the MCP server to settle", settle);
            tokio::time::sleep(settle).await;
        }

        let outcome = match factory() {
            Ok(transport) => {
                let client = McpClient::new(transport);
                client.initialize().await.map(|_| client)
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(client) => {
                info!("MCP server connected");
                return Ok(client);
            }
            Err(e @ Error::Unauthorized(_)) => {
                error!("MCP server rejected the token: {}", e);
                return Err(e);
            }
            Err(e) => {
                warn!("MCP connection attempt {} failed: {}", attempt, e);
                last_error = e.to_string();
                if attempt < policy.max_attempts {
                    let wait = policy.backoff(attempt);
                    info!("Waiting {:?} before retry...", wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    error!(
        "Failed to connect to MCP server after {} attempts",
        policy.max_attempts
    );
    Err(Error::ConnectFailed {
        attempts: policy.max_attempts,
        last: last_error,
    })
}
