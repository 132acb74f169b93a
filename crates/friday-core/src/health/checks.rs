//! Individual health checks.

use futures::StreamExt;
use serde_json::{json, Value};
use reqwest::header::ACCEPT;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{CheckResult, HealthReport};
use crate::config::{Config, ENV_GOOGLE_CREDENTIALS, ENV_MCP_TOKEN, ENV_MCP_URL};
use crate::context::EntityKind;
use crate::error::{Error, Result};
use crate::mcp::sse::ENDPOINT_EVENT;
use crate::mcp::{EventDecoder, HttpTransport, McpClient, McpEndpoint};
use crate::livekit::LiveKitGateway;

const REST_TIMEOUT: Duration = Duration::from_secs(10);

fn set_or_not(value: bool) -> &'static str {
    if value { "set" } else { "not set" }
}

/// Runs every check against one configuration
#[derive(Debug)]
pub struct HealthChecker {
    config: Config,
    http: reqwest::Client,
    livekit: LiveKitGateway,
}

impl HealthChecker {
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("friday-health/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let livekit = LiveKitGateway::new(&config.livekit);
        Ok(Self {
            config,
            http,
            livekit,
        })
    }

    /// Run all checks
    pub async fn run(&self) -> HealthReport {
        info!("Starting health check...");

        let environment = self.check_environment();
        let (mcp, rest, livekit, voice) = tokio::join!(
            self.check_mcp_connection(),
            self.check_rest_api(),
            self.check_livekit(),
            self.check_voice_backend(),
        );

        let report = HealthReport::from_checks(vec![environment, mcp, rest, livekit, voice]);
        info!(status = %report.overall_status, "{}", report.message);
        report
    }

    pub fn check_environment(&self) -> CheckResult {
        let missing = self.config.missing_required();
        if missing.is_empty() {
            CheckResult::success("environment", "All required environment variables are set")
                .detail("configured_vars", vec![ENV_MCP_URL, ENV_MCP_TOKEN])
        } else {
            CheckResult::error(
                "environment",
                format!("Missing required environment variables: {}", missing.join(", ")),
            )
            .detail("missing_vars", missing)
        }
    }

    /// Reach the MCP endpoint over the transport the bridge would use.
    ///
    /// An SSE endpoint must announce its message URL; a streamable HTTP
    /// endpoint must complete the `initialize` handshake.
    pub async fn check_mcp_connection(&self) -> CheckResult {
        const NAME: &str = "mcp_connection";
        let ha = &self.config.home_assistant;
        let (Some(url), Some(token)) = (&ha.mcp_url, &ha.token) else {
            return CheckResult::error(NAME, "MCP environment variables not configured")
                .detail(ENV_MCP_URL, set_or_not(ha.mcp_url.is_some()))
                .detail(ENV_MCP_TOKEN, set_or_not(ha.token.is_some()));
        };

        let endpoint = McpEndpoint::detect(url);
        info!("Testing MCP connection to: {} ({})", url, endpoint.as_str());
        let timeout = Duration::from_secs(ha.timeout_secs);

        let attempt = async {
            match endpoint {
                McpEndpoint::Sse => self.read_endpoint_event(url, token).await,
                McpEndpoint::StreamableHttp => handshake(url, token, timeout).await,
            }
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(details)) => details.into_iter().fold(
                CheckResult::success(NAME, "MCP connection successful")
                    .detail("url", url.as_str())
                    .detail("transport", endpoint.as_str()),
                |result, (key, value)| result.detail(key, value),
            ),
            Ok(Err(Error::Unauthorized(status) | Error::Http { status, .. })) => {
                CheckResult::error(NAME, format!("MCP server returned status {}", status))
                    .detail("status_code", status)
            }
            Ok(Err(Error::Timeout(_))) | Err(_) => timeout_result(NAME, timeout),
            Ok(Err(e)) => CheckResult::error(NAME, format!("MCP connection failed: {}", e))
                .detail("error", e.to_string()),
        }
    }

    /// GET the event stream until it names the message endpoint
    async fn read_endpoint_event(&self, url: &str, token: &str) -> Result<Vec<(&'static str, Value)>> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body: String::new(),
            });
        }

        let mut decoder = EventDecoder::default();
        let mut events = 0;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            for event in decoder.push(&String::from_utf8_lossy(&chunk?)) {
                events += 1;
                debug!("MCP SSE event {}: {:.100}", event.event, event.data);
                if event.event == ENDPOINT_EVENT {
                    return Ok(vec![
                        ("endpoint", json!(event.data.trim())),
                        ("events_received", json!(events)),
                    ]);
                }
            }
        }
        Err(Error::Protocol(
            "MCP event stream closed before announcing an endpoint".to_string(),
        ))
    }

    /// Count entities through the REST API
    pub async fn check_rest_api(&self) -> CheckResult {
        const NAME: &str = "rest_api";
        let ha = &self.config.home_assistant;
        let (Some(base), Some(token)) = (&ha.rest_url, &ha.rest_token) else {
            return CheckResult::warning(NAME, "REST API environment variables not configured")
                .detail("HA_URL", set_or_not(ha.rest_url.is_some()))
                .detail("HA_TOKEN", set_or_not(ha.rest_token.is_some()));
        };

        let url = format!("{}/api/states", base.trim_end_matches('/'));
        info!("Testing REST API connection to: {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .timeout(REST_TIMEOUT)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                return CheckResult::error(NAME, format!("REST API connection failed: {}", e))
                    .detail("error", e.to_string());
            }
        };
        if resp.status() != reqwest::StatusCode::OK {
            let status = resp.status().as_u16();
            return CheckResult::error(NAME, format!("REST API returned status {}", status))
                .detail("status_code", status);
        }

        match resp.json::<Vec<Value>>().await {
            Ok(entities) => {
                let lights = entities
                    .iter()
                    .filter_map(|e| e["entity_id"].as_str())
                    .filter(|id| EntityKind::from_domain(id) == EntityKind::Light)
                    .count();
                CheckResult::success(NAME, "REST API connection successful")
                    .detail("total_entities", entities.len())
                    .detail("lights_found", lights)
            }
            Err(e) => CheckResult::error(NAME, format!("REST API connection failed: {}", e))
                .detail("error", e.to_string()),
        }
    }

    pub async fn check_livekit(&self) -> CheckResult {
        const NAME: &str = "livekit";
        if !self.livekit.is_configured() {
            return CheckResult::warning(NAME, "LiveKit is not configured")
                .detail("missing_vars", self.livekit.missing_settings())
                .non_critical();
        }

        match self.livekit.list_rooms().await {
            Ok(rooms) => CheckResult::success(NAME, "LiveKit server reachable")
                .detail("url", self.livekit.url().unwrap_or_default())
                .detail("active_rooms", rooms.len())
                .non_critical(),
            Err(e) => CheckResult::error(NAME, format!("LiveKit connection failed: {}", e))
                .detail("error", e.to_string())
                .non_critical(),
        }
    }

    /// Validate the service account file of the speech back end
    pub async fn check_voice_backend(&self) -> CheckResult {
        const NAME: &str = "voice_backend";
        let Some(path) = &self.config.google.credentials_path else {
            return CheckResult::warning(
                NAME,
                format!("{} is not set", ENV_GOOGLE_CREDENTIALS),
            )
            .non_critical();
        };

        inspect_credentials(path).await.non_critical()
    }
}

/// `initialize` on a throwaway streamable HTTP session
async fn handshake(url: &str, token: &str, timeout: Duration) -> Result<Vec<(&'static str, Value)>> {
    let client = McpClient::new(Arc::new(HttpTransport::new(url, token, timeout)?));
    let server = client.initialize().await?;
    if let Err(e) = client.close().await {
        debug!("Failed to close health check session: {}", e);
    }
    Ok(vec![
        ("server", json!(server.server_info.name)),
        ("server_version", json!(server.server_info.version)),
    ])
}

fn timeout_result(name: &str, timeout: Duration) -> CheckResult {
    CheckResult::error(name, "MCP connection timeout")
        .detail("timeout", format!("{} seconds", timeout.as_secs()))
}

async fn inspect_credentials(path: &Path) -> CheckResult {
    const NAME: &str = "voice_backend";
    let shown = path.display().to_string();

    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) => {
            return CheckResult::error(NAME, format!("Cannot read credentials file: {}", e))
                .detail("path", shown);
        }
    };
    let parsed: Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            return CheckResult::error(NAME, format!("Credentials file is not valid JSON: {}", e))
                .detail("path", shown);
        }
    };
    let Some(kind) = parsed["type"].as_str() else {
        return CheckResult::error(NAME, "Credentials file has no \"type\" field")
            .detail("path", shown);
    };

    let mut result = CheckResult::success(NAME, "Google credentials file looks valid")
        .detail("path", shown)
        .detail("type", kind);
    if let Some(project) = parsed["project_id"].as_str() {
        result = result.detail("project_id", json!(project));
    }
    result
}
