//! Configuration management for Friday.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Environment variables (including a `.env` file, loaded first)
//! 2. Config file (`$FRIDAY_CONFIG` or `~/.config/friday/config.toml`)
//! 3. Default values

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

pub const ENV_MCP_URL: &str = "HOME_ASSISTANT_MCP_URL";
pub const ENV_MCP_TOKEN: &str = "HOME_ASSISTANT_TOKEN";
pub const ENV_LIVEKIT_URL: &str = "LIVEKIT_URL";
pub const ENV_LIVEKIT_API_KEY: &str = "LIVEKIT_API_KEY";
pub const ENV_LIVEKIT_API_SECRET: &str = "LIVEKIT_API_SECRET";
pub const ENV_GOOGLE_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

const DEFAULT_HA_URL: &str = "http://homeassistant.local:8123";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Home Assistant MCP and REST settings
    pub home_assistant: HomeAssistantConfig,

    /// LiveKit room server settings
    pub livekit: LiveKitConfig,

    /// Google realtime speech back end
    pub google: GoogleConfig,

    /// Agent persona and session settings
    pub agent: AgentConfig,

    /// Logging
    pub logging: LoggingConfig,

    /// Periodic health monitoring (friday-server)
    pub health: HealthConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    /// MCP server endpoint
    pub mcp_url: Option<String>,

    /// Long-lived access token used for MCP
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Base URL of the REST API (diagnostics only)
    pub rest_url: Option<String>,

    /// Token for the REST API
    #[serde(skip_serializing)]
    pub rest_token: Option<String>,

    /// Connection attempts before giving up
    pub retry_attempts: u32,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveKitConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,
    /// JWT TTL for agent join tokens
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    /// Service account credentials file
    pub credentials_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub voice: String,
    pub temperature: f32,
    pub max_response_length: usize,
    pub enable_video: bool,
    pub enable_noise_cancellation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive (INFO, DEBUG, ...)
    pub level: String,
    pub format: LogFormat,
    /// Log file; `None` logs to stderr only
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: u64,
    pub bind: String,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            mcp_url: None,
            token: None,
            rest_url: None,
            rest_token: None,
            retry_attempts: 3,
            timeout_secs: 30,
        }
    }
}

impl Default for LiveKitConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            api_secret: None,
            token_ttl_secs: 3600,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Friday".to_string(),
            voice: "default".to_string(),
            temperature: 0.7,
            max_response_length: 1000,
            enable_video: false,
            enable_noise_cancellation: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Text,
            file_path: Some(PathBuf::from("logs/agent.log")),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            bind: "127.0.0.1:8089".to_string(),
        }
    }
}

impl fmt::Debug for HomeAssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HomeAssistantConfig")
            .field("mcp_url", &self.mcp_url)
            .field("token", &redact(&self.token))
            .field("rest_url", &self.rest_url)
            .field("rest_token", &redact(&self.rest_token))
            .field("retry_attempts", &self.retry_attempts)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl fmt::Debug for LiveKitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveKitConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &redact(&self.api_secret))
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

fn redact(secret: &Option<String>) -> &'static str {
    match secret {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl HomeAssistantConfig {
    /// Both MCP settings are present.
    pub fn mcp_configured(&self) -> bool {
        self.mcp_url.is_some() && self.token.is_some()
    }

    /// REST base URL, falling back to the mDNS default.
    pub fn rest_url_or_default(&self) -> String {
        self.rest_url
            .clone()
            .unwrap_or_else(|| DEFAULT_HA_URL.to_string())
    }

    /// First 8 characters of the token, for log lines.
    pub fn token_prefix(&self) -> String {
        match &self.token {
            Some(t) => t.chars().take(8).collect(),
            None => "not set".to_string(),
        }
    }
}

impl LiveKitConfig {
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.api_key.is_some() && self.api_secret.is_some()
    }
}

impl Config {
    /// Load configuration from `.env`, the config file and the process environment.
    pub fn load() -> Result<Self> {
        load_dotenv();

        let path = std::env::var("FRIDAY_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::config_path);

        let mut config = match path {
            Some(ref p) if p.exists() => {
                debug!(path = %p.display(), "Loading config file");
                Self::from_file(p)?
            }
            _ => Self::default(),
        };

        let env: HashMap<String, String> = std::env::vars().collect();
        config.apply_env(|key| env.get(key).cloned())?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("friday").join("config.toml"))
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Overlay values from an environment lookup.
    ///
    /// Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ha = &mut self.home_assistant;
        if let Some(v) = get(ENV_MCP_URL) {
            ha.mcp_url = Some(v);
        }
        if let Some(v) = get(ENV_MCP_TOKEN) {
            ha.token = Some(v);
        }
        if let Some(v) = get("HA_URL") {
            ha.rest_url = Some(v);
        }
        if let Some(v) = get("HA_TOKEN") {
            ha.rest_token = Some(v);
        }
        if let Some(v) = get("HA_MCP_RETRY_ATTEMPTS") {
            ha.retry_attempts = parse_var("HA_MCP_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("HA_MCP_TIMEOUT") {
            ha.timeout_secs = parse_var("HA_MCP_TIMEOUT", &v)?;
        }
        ha.rest_url = ha.rest_url.take().map(|u| normalize_url(&u));

        let lk = &mut self.livekit;
        if let Some(v) = get(ENV_LIVEKIT_URL) {
            lk.url = Some(v);
        }
        if let Some(v) = get(ENV_LIVEKIT_API_KEY) {
            lk.api_key = Some(v);
        }
        if let Some(v) = get(ENV_LIVEKIT_API_SECRET) {
            lk.api_secret = Some(v);
        }

        if let Some(v) = get(ENV_GOOGLE_CREDENTIALS) {
            self.google.credentials_path = Some(PathBuf::from(v));
        }

        let agent = &mut self.agent;
        if let Some(v) = get("AGENT_NAME") {
            agent.name = v;
        }
        if let Some(v) = get("AGENT_VOICE") {
            agent.voice = v;
        }
        if let Some(v) = get("AGENT_TEMPERATURE") {
            agent.temperature = parse_var("AGENT_TEMPERATURE", &v)?;
        }
        if let Some(v) = get("AGENT_MAX_RESPONSE_LENGTH") {
            agent.max_response_length = parse_var("AGENT_MAX_RESPONSE_LENGTH", &v)?;
        }
        if let Some(v) = get("AGENT_ENABLE_VIDEO") {
            agent.enable_video = parse_flag(&v);
        }
        if let Some(v) = get("AGENT_ENABLE_NOISE_CANCELLATION") {
            agent.enable_noise_cancellation = parse_flag(&v);
        }

        let logging = &mut self.logging;
        if let Some(v) = get("LOG_LEVEL") {
            logging.level = v;
        }
        if let Some(v) = get("LOG_FORMAT") {
            logging.format = match v.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
        if let Some(v) = lookup("LOG_FILE_PATH") {
            logging.file_path = if v.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }

        if let Some(v) = get("FRIDAY_HEALTH_INTERVAL") {
            self.health.interval_secs = parse_var("FRIDAY_HEALTH_INTERVAL", &v)?;
        }
        if let Some(v) = get("FRIDAY_BIND") {
            self.health.bind = v;
        }

        Ok(())
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(Error::Config(format!(
                "AGENT_TEMPERATURE must be between 0 and 2, got {}",
                self.agent.temperature
            )));
        }
        if self.home_assistant.retry_attempts == 0 {
            return Err(Error::Config(
                "HA_MCP_RETRY_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.home_assistant.timeout_secs == 0 {
            return Err(Error::Config("HA_MCP_TIMEOUT must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Names of the required variables that are not set.
    pub fn missing_required(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.home_assistant.mcp_url.is_none() {
            missing.push(ENV_MCP_URL.to_string());
        }
        if self.home_assistant.token.is_none() {
            missing.push(ENV_MCP_TOKEN.to_string());
        }
        missing
    }
}

/// Walk up from the current directory looking for a `.env` file.
fn load_dotenv() {
    if let Ok(mut dir) = std::env::current_dir() {
        loop {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            if !dir.pop() {
                break;
            }
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value: {:?}", name, value)))
}

fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Prefix `http://` when the URL has no scheme.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}
