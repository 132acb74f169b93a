//! MCP over a server-sent event stream.
//!
//! The client GETs the stream and waits for the `endpoint` event naming
//! the message URL. Every JSON-RPC message is then POSTed there and the
//! responses arrive on the stream, matched to their requests by id.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use super::transport::{EventDecoder, McpTransport, SseEvent};
use crate::error::{Error, Result};

/// Event announcing where to POST messages
pub const ENDPOINT_EVENT: &str = "endpoint";

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

struct Channel {
    endpoint: Url,
    reader: JoinHandle<()>,
}

/// MCP over a GET event stream plus POSTed messages.
///
/// The stream is opened by the first request, so building the transport
/// never touches the network.
pub struct SseTransport {
    client: reqwest::Client,
    url: String,
    token: String,
    timeout: Duration,
    channel: Mutex<Option<Channel>>,
    pending: Pending,
}

impl SseTransport {
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
            channel: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Message endpoint announced by the server, opening the stream if needed
    pub async fn endpoint(&self) -> Result<Url> {
        let mut channel = self.channel.lock().await;
        if let Some(open) = channel.as_ref().filter(|c| !c.reader.is_finished()) {
            return Ok(open.endpoint.clone());
        }

        let opened = self.open().await?;
        let endpoint = opened.endpoint.clone();
        *channel = Some(opened);
        Ok(endpoint)
    }

    async fn open(&self) -> Result<Channel> {
        let base = Url::parse(&self.url).map_err(|e| Error::Config(format!("Invalid MCP URL {}: {}", self.url, e)))?;
        let resp = self
            .client
            .get(base.clone())
            .bearer_auth(&self.token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let mut stream = Box::pin(resp.bytes_stream());
        let mut decoder = EventDecoder::default();
        let endpoint = loop {
            let Some(chunk) = stream.next().await else {
                return Err(Error::Protocol(
                    "MCP event stream closed before announcing an endpoint".to_string(),
                ));
            };
            let events = decoder.push(&String::from_utf8_lossy(&chunk?));
            let mut events = events.into_iter();
            if let Some(event) = events.by_ref().find(|e| e.event == ENDPOINT_EVENT) {
                let endpoint = base
                    .join(event.data.trim())
                    .map_err(|e| Error::Protocol(format!("Invalid MCP endpoint {}: {}", event.data, e)))?;
                for event in events {
                    dispatch(&self.pending, event).await;
                }
                break endpoint;
            }
        };

        info!(endpoint = %endpoint, "MCP event stream open");
        let reader = tokio::spawn(read_events(stream, decoder, Arc::clone(&self.pending)));
        Ok(Channel { endpoint, reader })
    }

    async fn post<B: serde::Serialize>(&self, endpoint: Url, body: &B) -> Result<()> {
        let resp = self
            .client
            .post(endpoint)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }

    fn timed_out(&self) -> Error {
        Error::Timeout(self.timeout.as_millis() as u64)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
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
    Ok(resp)
}

async fn read_events<S, B>(mut stream: S, mut decoder: EventDecoder, pending: Pending)
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                for event in decoder.push(&String::from_utf8_lossy(bytes.as_ref())) {
                    dispatch(&pending, event).await;
                }
            }
            Err(e) => {
                warn!("MCP event stream failed: {}", e);
                break;
            }
        }
    }
    for event in decoder.finish() {
        dispatch(&pending, event).await;
    }

    // Dropping the senders fails every request still waiting
    let orphaned = pending.lock().await.drain().count();
    debug!(orphaned, "MCP event stream closed");
}

async fn dispatch(pending: &Pending, event: SseEvent) {
    if event.event != "message" {
        debug!(event = %event.event, "Ignoring MCP event");
        return;
    }
    let resp = match serde_json::from_str::<JsonRpcResponse>(&event.data) {
        Ok(resp) => resp,
        Err(e) => {
            debug!("Ignoring non-response message: {}", e);
            return;
        }
    };
    let Some(id) = resp.id else {
        return;
    };
    match pending.lock().await.remove(&id) {
        Some(waiter) => {
            let _ = waiter.send(resp);
        }
        None => debug!(id, "Response for unknown request"),
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = request.id;
        debug!(method = %request.method, id, "MCP request");

        let (waiter, answer) = oneshot::channel();
        let exchange = async {
            let endpoint = self.endpoint().await?;
            self.pending.lock().await.insert(id, waiter);
            self.post(endpoint, &request).await?;
            answer
                .await
                .map_err(|_| Error::Transport("MCP event stream closed".to_string()))
        };

        let result = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(self.timed_out()),
        };
        if result.is_err() {
            self.pending.lock().await.remove(&id);
        }
        result
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        let send = async {
            let endpoint = self.endpoint().await?;
            self.post(endpoint, &notification).await
        };
        tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| self.timed_out())?
    }

    async fn close(&self) -> Result<()> {
        if let Some(channel) = self.channel.lock().await.take() {
            channel.reader.abort();
        }
        self.pending.lock().await.clear();
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.get_mut().take() {
            channel.reader.abort();
        }
    }
}
