//! Error types for friday-core.

use thiserror::Error;

/// Result type alias using friday-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Friday operations
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    // Transport errors
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Unauthorized: the Home Assistant token was rejected ({0})")]
    Unauthorized(u16),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    // Protocol errors
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("MCP client is not connected")]
    NotConnected,

    #[error("Failed to connect to MCP server after {attempts} attempts: {last}")]
    ConnectFailed { attempts: u32, last: String },

    // Registry errors
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid input schema for {tool}: {message}")]
    InvalidSchema { tool: String, message: String },

    #[error("Invalid arguments for {tool}: {}", .violations.join("; "))]
    InvalidArguments {
        tool: String,
        violations: Vec<String>,
    },

    #[error("No handler registered for {0}")]
    NoHandler(String),

    // Session errors
    #[error("Invalid session state transition: {from} -> {to}")]
    InvalidState { from: String, to: String },

    #[error("Voice backend error: {0}")]
    Backend(String),

    // LiveKit errors
    #[error("LiveKit error: {0}")]
    LiveKit(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid-arguments error
    pub fn invalid_arguments(tool: impl Into<String>, violations: Vec<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            violations,
        }
    }

    /// Create an invalid state transition error
    pub fn invalid_state(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether a reconnect-and-retry can reasonably fix this error.
    ///
    /// Auth failures and caller mistakes are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Transport(_) | Self::Timeout(_) | Self::NotConnected => true,
            Self::Http { status, .. } => *status >= 500 || *status == 404 || *status == 408,
            _ => false,
        }
    }

    /// Whether the failed request certainly never reached the server.
    ///
    /// Only these failures may be replayed for a tool that changes state.
    /// A 404 means the server dropped the MCP session before handling it.
    pub fn is_unsent(&self) -> bool {
        match self {
            Self::Connect(_) | Self::NotConnected => true,
            Self::Http { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(0)
        } else if e.is_connect() {
            Error::Connect(e.to_string())
        } else {
            Error::Transport(e.to_string())
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
