//! Transports carrying JSON-RPC messages to an MCP server.
//!
//! Home Assistant serves MCP two ways, told apart by the URL:
//! - `/api/mcp` speaks streamable HTTP ([`HttpTransport`]): every request
//!   is a POST and the reply is a JSON body or a short event stream
//! - `/mcp_server/sse` speaks the SSE flavour ([`SseTransport`]): a GET
//!   stream announces a message endpoint, requests are POSTed there and
//!   responses come back on the stream
//!
//! [`SseTransport`]: super::sse::SseTransport

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::error::{Error, Result};

/// Header carrying the server-assigned session
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// A channel to one MCP server
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for its response
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; no reply is expected
    async fn notify(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Release server-side resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Wire flavour of an MCP endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpEndpoint {
    StreamableHttp,
    Sse,
}

impl McpEndpoint {
    /// A URL whose path ends in `/sse` is an event stream
    pub fn detect(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        if path.trim_end_matches('/').ends_with("/sse") {
            Self::Sse
        } else {
            Self::StreamableHttp
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StreamableHttp => "streamable_http",
            Self::Sse => "sse",
        }
    }
}

/// MCP over HTTP POST with bearer authentication
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    token: String,
    timeout: Duration,
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("friday/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
            timeout,
            session_id: RwLock::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Session id assigned by the server, if any
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn post<B: serde::Serialize>(&self, body: &B) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);

        if let Some(id) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_HEADER, id);
        }

        let resp = req.send().await?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        if let Some(id) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut session = self.session_id.write().await;
            if session.as_deref() != Some(id) {
                debug!(session_id = %id, "MCP session assigned");
                *session = Some(id.to_string());
            }
        }

        Ok(resp)
    }

    async fn read_response(&self, resp: reqwest::Response, id: u64) -> Result<JsonRpcResponse> {
        let is_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if !is_stream {
            return resp
                .json::<JsonRpcResponse>()
                .await
                .map_err(|e| Error::Protocol(format!("Invalid JSON-RPC response: {}", e)));
        }

        let mut decoder = EventDecoder::default();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for event in decoder.push(&String::from_utf8_lossy(&chunk)) {
                if let Some(resp) = match_response(&event.data, id) {
                    return Ok(resp);
                }
            }
        }
        for event in decoder.finish() {
            if let Some(resp) = match_response(&event.data, id) {
                return Ok(resp);
            }
        }

        Err(Error::Protocol(format!(
            "Event stream ended without a response to request {}",
            id
        )))
    }
}

fn match_response(data: &str, id: u64) -> Option<JsonRpcResponse> {
    match serde_json::from_str::<JsonRpcResponse>(data) {
        Ok(resp) if resp.id == Some(id) => Some(resp),
        Ok(_) => None,
        Err(e) => {
            debug!("Ignoring non-response event: {}", e);
            None
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = request.id;
        let method = request.method.clone();
        debug!(method = %method, id, "MCP request");

        let exchange = async {
            let resp = self.post(&request).await?;
            self.read_response(resp, id).await
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::Timeout(self.timeout.as_millis() as u64))?
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        tokio::time::timeout(self.timeout, self.post(&notification))
            .await
            .map_err(|_| Error::Timeout(self.timeout.as_millis() as u64))??;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let session = self.session_id.write().await.take();
        if let Some(id) = session {
            let result = self
                .client
                .delete(&self.url)
                .bearer_auth(&self.token)
                .header(SESSION_HEADER, &id)
                .send()
                .await;
            if let Err(e) = result {
                warn!("Failed to close MCP session {}: {}", id, e);
            }
        }
        Ok(())
    }
}

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, `message` when absent
    pub event: String,
    pub data: String,
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Yields every complete event with its joined `data:` payload.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl EventDecoder {
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                events.extend(self.dispatch());
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(field_value(value).to_string());
            } else if let Some(value) = line.strip_prefix("event:") {
                self.event = Some(field_value(value).to_string());
            }
        }

        events
    }

    /// Flush a trailing event not followed by a blank line
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = self.push("\n");
        events.extend(self.dispatch());
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

fn field_value(value: &str) -> &str {
    value.strip_prefix(' ').unwrap_or(value)
}
