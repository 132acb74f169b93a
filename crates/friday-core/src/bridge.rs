//! MCP tool bridge.
//!
//! Connects to the Home Assistant MCP server, mirrors its tools into the
//! [`CapabilityRegistry`] and dispatches tool calls, local or remote.
//!
//! Remote calls get two layers of recovery:
//! - transport failures reconnect once; the call is replayed only when it
//!   never reached the server or the tool is read-only
//! - "invalid slot info" results (Home Assistant could not match the target
//!   entity) are retried after a short pause, then again after refreshing
//!   the live context

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::HomeAssistantConfig;
use crate::context::LiveContext;
use crate::error::{Error, Result};
use crate::mcp::{connect_with_retry, http_factory, CallToolResult, McpClient, RetryPolicy, TransportFactory};
use crate::registry::{Capability, CapabilityRegistry, CapabilitySource, SyncSummary};

/// Home Assistant tool returning the live entity overview
pub const LIVE_CONTEXT_TOOL: &str = "GetLiveContext";

const SLOT_ERROR_MARKER: &str = "invalid slot info";

/// Pause before retrying a call that hit a slot error
pub const DEFAULT_SLOT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Remote calls one slot recovery sequence can make
const SLOT_RECOVERY_CALLS: u32 = 4;

const SLOT_FAILURE_MESSAGE: &str = "Home Assistant is having temporary issues finding that device. \
Please try again in a moment.";

/// Result of one tool invocation
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutcome {
    pub tool: String,
    pub text: String,
    pub is_error: bool,
    /// Calls made to the tool itself, recovery calls excluded
    pub attempts: u32,
    pub duration: Duration,
}

struct Connection {
    client: Arc<McpClient>,
    generation: u64,
}

/// Dispatches tool calls to Home Assistant or in-process handlers
pub struct ToolBridge {
    factory: TransportFactory,
    policy: RetryPolicy,
    registry: Arc<CapabilityRegistry>,
    connection: RwLock<Option<Connection>>,
    generation: AtomicU64,
    reconnect_lock: Mutex<()>,
    slot_retry_delay: Duration,
}

impl ToolBridge {
    pub fn new(factory: TransportFactory, policy: RetryPolicy, registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            factory,
            policy,
            registry,
            connection: RwLock::new(None),
            generation: AtomicU64::new(0),
            reconnect_lock: Mutex::new(()),
            slot_retry_delay: DEFAULT_SLOT_RETRY_DELAY,
        }
    }

    /// Bridge to the configured Home Assistant MCP endpoint
    pub fn from_config(config: &HomeAssistantConfig, registry: Arc<CapabilityRegistry>) -> Result<Self> {
        Ok(Self::new(
            http_factory(config)?,
            RetryPolicy::from_config(config),
            registry,
        ))
    }

    pub fn with_slot_retry_delay(mut self, delay: Duration) -> Self {
        self.slot_retry_delay = delay;
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Connect with the configured retry schedule
    pub async fn connect(&self) -> Result<()> {
        let client = connect_with_retry(&self.factory, &self.policy).await?;
        self.install(client).await;
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    /// Instructions the MCP server sent during the handshake
    pub async fn server_instructions(&self) -> Option<String> {
        let client = self.client().await.ok()?;
        client.server_info().await.and_then(|info| info.instructions)
    }

    /// List the server's tools and resync the Home Assistant capabilities
    pub async fn discover(&self) -> Result<SyncSummary> {
        let client = self.client().await?;
        let tools = match client.list_tools().await {
            Err(e) if e.is_retryable() => {
                warn!("Tool discovery failed, reconnecting: {}", e);
                self.reconnect(client).await?.list_tools().await?
            }
            other => other?,
        };

        let capabilities: Vec<Capability> = tools.iter().map(Capability::from_mcp).collect();
        let summary = self
            .registry
            .replace_source(CapabilitySource::HomeAssistant, capabilities)
            .await;

        info!(
            tools = tools.len(),
            added = summary.added,
            removed = summary.removed,
            "Discovered Home Assistant tools"
        );
        Ok(summary)
    }

    /// Validate and run a tool
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutcome> {
        let capability = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let arguments = self.registry.validate(name, arguments).await?;
        let start = Instant::now();

        let (result, attempts) = match capability.source {
            CapabilitySource::Local => {
                let handler = self
                    .registry
                    .handler(name)
                    .await
                    .ok_or_else(|| Error::NoHandler(name.to_string()))?;
                (handler(arguments).await, 1)
            }
            CapabilitySource::HomeAssistant => self.call_with_recovery(name, arguments).await?,
        };

        let outcome = ToolOutcome {
            tool: name.to_string(),
            text: result.text(),
            is_error: result.is_error,
            attempts,
            duration: start.elapsed(),
        };
        debug!(
            tool = %name,
            is_error = outcome.is_error,
            attempts = outcome.attempts,
            duration_ms = outcome.duration.as_millis() as u64,
            "Tool call finished"
        );
        Ok(outcome)
    }

    /// Fetch and parse the live entity overview
    pub async fn live_context(&self) -> Result<LiveContext> {
        let result = self.call_remote(LIVE_CONTEXT_TOOL, json!({})).await?;
        if result.is_error {
            return Err(Error::Protocol(format!(
                "{} failed: {}",
                LIVE_CONTEXT_TOOL,
                result.text()
            )));
        }
        LiveContext::parse(&result.text())
    }

    pub async fn close(&self) -> Result<()> {
        let connection = self.connection.write().await.take();
        match connection {
            Some(c) => c.client.close().await,
            None => Ok(()),
        }
    }

    async fn call_with_recovery(&self, name: &str, arguments: Value) -> Result<(CallToolResult, u32)> {
        let mut attempts = 1;
        let mut result = self.call_remote(name, arguments.clone()).await?;
        if !is_slot_error(&result) {
            return Ok((result, attempts));
        }

        warn!(tool = %name, "Invalid slot info, retrying in {:?}", self.slot_retry_delay);
        tokio::time::sleep(self.slot_retry_delay).await;
        attempts += 1;
        result = self.call_remote(name, arguments.clone()).await?;

        if is_slot_error(&result)
            && name != LIVE_CONTEXT_TOOL
            && self.registry.contains(LIVE_CONTEXT_TOOL).await
        {
            info!(tool = %name, "Refreshing live context before retrying");
            if let Err(e) = self.call_remote(LIVE_CONTEXT_TOOL, json!({})).await {
                warn!("Live context refresh failed: {}", e);
            }
            attempts += 1;
            result = self.call_remote(name, arguments).await?;
        }

        if is_slot_error(&result) {
            warn!(tool = %name, attempts, "Giving up after repeated slot errors");
            result = CallToolResult::text_result(SLOT_FAILURE_MESSAGE, true);
        }
        Ok((result, attempts))
    }

    /// One remote call with a single reconnect on transport failure.
    ///
    /// A tool that changes state is not replayed once the request may have
    /// reached the server; the caller gets the error and the next call uses
    /// the fresh connection.
    async fn call_remote(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let client = self.client().await?;
        let error = match client.call_tool(name, arguments.clone()).await {
            Err(e) if e.is_retryable() => e,
            other => return other,
        };

        let read_only = self
            .registry
            .get(name)
            .await
            .is_some_and(|capability| !capability.side_effects);
        warn!(tool = %name, "MCP call failed, reconnecting: {}", error);
        let fresh = self.reconnect(client).await;

        if error.is_unsent() || read_only {
            return fresh?.call_tool(name, arguments).await;
        }
        if let Err(e) = fresh {
            warn!("Reconnect after failed call did not succeed: {}", e);
        }
        warn!(tool = %name, "Not replaying a call that may have reached Home Assistant");
        Err(error)
    }

    async fn client(&self) -> Result<Arc<McpClient>> {
        self.connection
            .read()
            .await
            .as_ref()
            .map(|c| Arc::clone(&c.client))
            .ok_or(Error::NotConnected)
    }

    /// Replace `failed` with a fresh connection.
    ///
    /// Concurrent callers that saw the same failed client share one reconnect.
    async fn reconnect(&self, failed: Arc<McpClient>) -> Result<Arc<McpClient>> {
        let _guard = self.reconnect_lock.lock().await;

        if let Some(current) = self.connection.read().await.as_ref() {
            if !Arc::ptr_eq(&current.client, &failed) {
                return Ok(Arc::clone(&current.client));
            }
        }

        let policy = RetryPolicy {
            max_attempts: 1,
            initial_settle: self.policy.reconnect_settle,
            ..self.policy.clone()
        };
        let client = connect_with_retry(&self.factory, &policy).await?;
        Ok(self.install(client).await)
    }

    async fn install(&self, client: McpClient) -> Arc<McpClient> {
        let client = Arc::new(client);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.connection.write().await.replace(Connection {
            client: Arc::clone(&client),
            generation,
        });
        if let Some(old) = previous {
            debug!(generation = old.generation, "Dropping previous MCP connection");
        }
        client
    }
}

/// Upper bound on one `invoke` of a Home Assistant tool.
///
/// Each call of the slot recovery sequence may run to `request_timeout`.
/// One of them may also reconnect (handshake and initialized notice) and
/// replay, and the sequence sleeps once before its second attempt.
pub fn call_budget(request_timeout: Duration, policy: &RetryPolicy) -> Duration {
    request_timeout * (SLOT_RECOVERY_CALLS + 3) + policy.reconnect_settle + DEFAULT_SLOT_RETRY_DELAY
}

fn is_slot_error(result: &CallToolResult) -> bool {
    result.is_error && result.text().to_lowercase().contains(SLOT_ERROR_MARKER)
}
