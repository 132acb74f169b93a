//! Session orchestrator.
//!
//! Owns one voice conversation: connects the tool bridge, hands the tool
//! declarations to the realtime model and routes the model's tool calls.
//!
//! ```text
//!  Idle ──start──► Connecting ──► Active ──close──► Closing ──► Closed
//!                      │            │
//!                      └──► Failed ◄┘
//! ```
//!
//! Tool calls run on spawned tasks, bounded by a semaphore and a per-call
//! timeout. Results are submitted to the model as they complete, tagged
//! with the model's call id, so a slow device never blocks a fast one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bridge::{call_budget, ToolBridge};
use crate::config::{AgentConfig, Config};
use crate::mcp::RetryPolicy;
use crate::error::{Error, Result};
use crate::prompts;
use crate::registry::ToolSpec;
use crate::tools::{register_local_tools, LocalTools};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Closing)
                | (Connecting, Active)
                | (Connecting, Failed)
                | (Active, Closing)
                | (Active, Failed)
                | (Closing, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Tool result handed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub name: String,
    pub output: String,
    pub is_error: bool,
}

/// Voice and generation settings for the realtime model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub voice: String,
    pub temperature: f32,
    /// Longest spoken reply, in tokens
    pub max_response_length: usize,
    pub enable_video: bool,
    pub enable_noise_cancellation: bool,
}

impl ModelSettings {
    pub fn from_config(agent: &AgentConfig) -> Self {
        Self {
            voice: agent.voice.clone(),
            temperature: agent.temperature,
            max_response_length: agent.max_response_length,
            enable_video: agent.enable_video,
            enable_noise_cancellation: agent.enable_noise_cancellation,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

/// The realtime speech back end
#[async_trait]
pub trait RealtimeModel: Send + Sync {
    /// Apply the persona and settings before the session goes live
    async fn configure(&self, persona: &str, settings: &ModelSettings) -> Result<()>;

    /// Replace the tool declarations the model may call
    async fn update_tools(&self, tools: Vec<ToolSpec>) -> Result<()>;

    /// Ask the model to speak, guided by `instructions`
    async fn generate_reply(&self, instructions: &str) -> Result<()>;

    async fn submit_tool_result(&self, result: ToolCallResult) -> Result<()>;
}

/// Input from the voice back end
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    UserTranscript(String),
    AgentTranscript(String),
    ToolCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    /// The MCP server announced a tool list change
    ToolsChanged,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub agent_name: String,
    /// Conversation turns kept, oldest evicted first
    pub history_limit: usize,
    /// Wall-clock limit of one tool call, recovery included
    pub call_timeout: Duration,
    pub max_concurrent_calls: usize,
    pub model: ModelSettings,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            agent_name: "Friday".to_string(),
            history_limit: 50,
            call_timeout: Duration::from_secs(30),
            max_concurrent_calls: 4,
            model: ModelSettings::default(),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        let ha = &config.home_assistant;
        Self {
            agent_name: config.agent.name.clone(),
            call_timeout: call_budget(Duration::from_secs(ha.timeout_secs), &RetryPolicy::from_config(ha)),
            model: ModelSettings::from_config(&config.agent),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub turns: u64,
    pub tool_calls: u64,
    pub failures: u64,
    pub started_at: Option<DateTime<Utc>>,
}

/// One voice conversation
pub struct Session {
    id: Uuid,
    bridge: Arc<ToolBridge>,
    model: Arc<dyn RealtimeModel>,
    local_tools: Option<Arc<LocalTools>>,
    options: SessionOptions,
    state: RwLock<SessionState>,
    history: Mutex<VecDeque<Turn>>,
    stats: Arc<Mutex<SessionStats>>,
    limiter: Arc<Semaphore>,
    in_flight: Mutex<JoinSet<()>>,
    published_revision: AtomicU64,
}

impl Session {
    pub fn new(bridge: Arc<ToolBridge>, model: Arc<dyn RealtimeModel>, options: SessionOptions) -> Self {
        let permits = options.max_concurrent_calls.max(1);
        Self {
            id: Uuid::new_v4(),
            bridge,
            model,
            local_tools: None,
            options,
            state: RwLock::new(SessionState::Idle),
            history: Mutex::new(VecDeque::new()),
            stats: Arc::new(Mutex::new(SessionStats::default())),
            limiter: Arc::new(Semaphore::new(permits)),
            in_flight: Mutex::new(JoinSet::new()),
            published_revision: AtomicU64::new(0),
        }
    }

    /// Offer the local tools alongside the Home Assistant ones
    pub fn with_local_tools(mut self, tools: Arc<LocalTools>) -> Self {
        self.local_tools = Some(tools);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bridge(&self) -> &Arc<ToolBridge> {
        &self.bridge
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Persona the model should be configured with
    pub fn persona(&self) -> String {
        prompts::agent_instructions(&self.options.agent_name)
    }

    pub async fn history(&self) -> Vec<Turn> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn stats(&self) -> SessionStats {
        self.stats.lock().await.clone()
    }

    /// Configure the model, connect, discover tools and ask the model for
    /// the opening reply.
    ///
    /// The session cannot run without Home Assistant: a failed connection
    /// leaves it `Failed` and returns the error.
    pub async fn start(&self) -> Result<()> {
        self.transition(SessionState::Connecting).await?;
        info!(session = %self.id, "Starting session");

        let setup = async {
            self.model.configure(&self.persona(), &self.options.model).await?;
            self.connect_and_discover().await
        };
        if let Err(e) = setup.await {
            error!(session = %self.id, "Session failed to start: {}", e);
            self.transition(SessionState::Failed).await?;
            return Err(e);
        }

        self.transition(SessionState::Active).await?;
        self.stats.lock().await.started_at = Some(Utc::now());

        let server = self.bridge.server_instructions().await;
        let instructions = prompts::session_instructions(&self.options.agent_name, server.as_deref());
        self.model.generate_reply(&instructions).await?;
        Ok(())
    }

    async fn connect_and_discover(&self) -> Result<()> {
        self.bridge.connect().await?;
        self.bridge.discover().await?;

        if let Some(tools) = &self.local_tools {
            register_local_tools(self.bridge.registry(), Arc::clone(tools)).await?;
        }

        self.publish_tools().await
    }

    /// Process one event from the voice back end
    pub async fn handle(&self, event: SessionEvent) -> Result<()> {
        if event == SessionEvent::Close {
            return self.close().await;
        }

        let state = self.state().await;
        if state != SessionState::Active {
            return Err(Error::invalid_state(state, SessionState::Active));
        }

        match event {
            SessionEvent::UserTranscript(text) => {
                self.push_turn(Speaker::User, text).await;
                self.stats.lock().await.turns += 1;
            }
            SessionEvent::AgentTranscript(text) => {
                self.push_turn(Speaker::Agent, text).await;
            }
            SessionEvent::ToolCall {
                call_id,
                name,
                arguments,
            } => self.dispatch(call_id, name, arguments).await?,
            SessionEvent::ToolsChanged => self.refresh_tools().await?,
            SessionEvent::Close => {}
        }
        Ok(())
    }

    /// Drive the session until `Close` or the channel ends, then close it
    pub async fn run(&self, mut events: mpsc::Receiver<SessionEvent>) -> Result<SessionStats> {
        while let Some(event) = events.recv().await {
            if event == SessionEvent::Close {
                break;
            }
            if let Err(e) = self.handle(event).await {
                warn!(session = %self.id, "Event failed: {}", e);
            }
        }

        self.close().await?;
        Ok(self.stats().await)
    }

    /// Wait for in-flight tool calls and release the MCP session
    pub async fn close(&self) -> Result<()> {
        self.transition(SessionState::Closing).await?;

        let mut in_flight = self.in_flight.lock().await;
        if !in_flight.is_empty() {
            debug!(session = %self.id, pending = in_flight.len(), "Draining tool calls");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(session = %self.id, "Tool call task failed: {}", e);
            }
        }
        drop(in_flight);

        if let Err(e) = self.bridge.close().await {
            warn!(session = %self.id, "Failed to close MCP session: {}", e);
        }

        self.transition(SessionState::Closed).await?;
        let stats = self.stats().await;
        info!(
            session = %self.id,
            turns = stats.turns,
            tool_calls = stats.tool_calls,
            failures = stats.failures,
            "Session closed"
        );
        Ok(())
    }

    async fn dispatch(&self, call_id: String, name: String, arguments: Value) -> Result<()> {
        self.stats.lock().await.tool_calls += 1;

        let arguments = match self.bridge.registry().validate(&name, arguments).await {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %name, call_id = %call_id, "Rejected tool call: {}", e);
                self.stats.lock().await.failures += 1;
                return self
                    .model
                    .submit_tool_result(ToolCallResult {
                        call_id,
                        name,
                        output: e.to_string(),
                        is_error: true,
                    })
                    .await;
            }
        };

        let bridge = Arc::clone(&self.bridge);
        let model = Arc::clone(&self.model);
        let stats = Arc::clone(&self.stats);
        let limiter = Arc::clone(&self.limiter);
        let timeout = self.options.call_timeout;

        let mut in_flight = self.in_flight.lock().await;
        while let Some(done) = in_flight.try_join_next() {
            if let Err(e) = done {
                error!("Tool call task failed: {}", e);
            }
        }

        in_flight.spawn(async move {
            let Ok(_permit) = limiter.acquire_owned().await else {
                return;
            };
            debug!(tool = %name, call_id = %call_id, "Dispatching tool call");

            let (output, is_error) = match tokio::time::timeout(timeout, bridge.invoke(&name, arguments)).await {
                Ok(Ok(outcome)) => (outcome.text, outcome.is_error),
                Ok(Err(e)) => (format!("Tool {} failed: {}", name, e), true),
                Err(_) => (
                    format!("Tool {} timed out after {}s", name, timeout.as_secs()),
                    true,
                ),
            };

            if is_error {
                stats.lock().await.failures += 1;
            }

            let result = ToolCallResult {
                call_id,
                name,
                output,
                is_error,
            };
            if let Err(e) = model.submit_tool_result(result).await {
                error!("Failed to submit tool result: {}", e);
            }
        });

        Ok(())
    }

    async fn refresh_tools(&self) -> Result<()> {
        self.bridge.discover().await?;
        if self.bridge.registry().revision() != self.published_revision.load(Ordering::SeqCst) {
            self.publish_tools().await?;
        }
        Ok(())
    }

    async fn publish_tools(&self) -> Result<()> {
        let registry = self.bridge.registry();
        let revision = registry.revision();
        let specs = registry.tool_specs().await;
        info!(session = %self.id, tools = specs.len(), "Publishing tools to the model");

        self.model.update_tools(specs).await?;
        self.published_revision.store(revision, Ordering::SeqCst);
        Ok(())
    }

    async fn push_turn(&self, speaker: Speaker, text: String) {
        let mut history = self.history.lock().await;
        history.push_back(Turn {
            speaker,
            text,
            at: Utc::now(),
        });
        while history.len() > self.options.history_limit {
            history.pop_front();
        }
    }

    async fn transition(&self, next: SessionState) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.can_transition_to(next) {
            return Err(Error::invalid_state(*state, next));
        }
        let from = *state;
        debug!(session = %self.id, from = %from, to = %next, "Session state change");
        *state = next;
        Ok(())
    }
}
