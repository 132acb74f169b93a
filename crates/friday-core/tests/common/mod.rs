#![allow(dead_code)]

//! Mock Home Assistant: both MCP endpoints plus the REST states API.
//!
//! `/api/mcp` takes POST and DELETE only (streamable HTTP). The SSE flavour
//! lives at `/mcp_server/sse` (GET only) and `/mcp_server/messages` (POST).

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use friday_core::config::HomeAssistantConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const TOKEN: &str = "test-long-lived-token";
pub const SESSION_ID: &str = "session-0001";

/// How long a delayed `tools/call` stalls before answering
pub const CALL_DELAY: Duration = Duration::from_secs(3);

#[derive(Default)]
pub struct Recorded {
    pub methods: Vec<String>,
    pub missing_session: usize,
    pub deleted: bool,
    /// Next `n` tool calls answer after [`CALL_DELAY`]
    pub delayed_calls: u32,
}

#[derive(Clone, Default)]
pub struct MockHomeAssistant {
    pub recorded: Arc<Mutex<Recorded>>,
    streams: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

pub struct Running {
    pub addr: SocketAddr,
    pub mock: MockHomeAssistant,
}

impl Running {
    pub fn mcp_url(&self) -> String {
        format!("http://{}/api/mcp", self.addr)
    }

    pub fn sse_url(&self) -> String {
        format!("http://{}/mcp_server/sse", self.addr)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> HomeAssistantConfig {
        HomeAssistantConfig {
            mcp_url: Some(self.mcp_url()),
            token: Some(TOKEN.to_string()),
            rest_url: Some(self.base_url()),
            rest_token: Some(TOKEN.to_string()),
            retry_attempts: 1,
            timeout_secs: 5,
        }
    }

    pub fn sse_config(&self) -> HomeAssistantConfig {
        HomeAssistantConfig {
            mcp_url: Some(self.sse_url()),
            ..self.config()
        }
    }

    pub fn methods(&self) -> Vec<String> {
        self.mock.recorded.lock().unwrap().methods.clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.methods().iter().filter(|m| *m == method).count()
    }

    pub fn delay_calls(&self, n: u32) {
        self.mock.recorded.lock().unwrap().delayed_calls = n;
    }
}

pub async fn start() -> Running {
    let mock = MockHomeAssistant::default();
    let app = Router::new()
        .route("/api/mcp", post(mcp_post).delete(mcp_delete))
        .route("/mcp_server/sse", get(sse_stream))
        .route("/mcp_server/messages", post(sse_message))
        .route("/api/states", get(states))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Running { addr, mock }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", TOKEN))
        .unwrap_or(false)
}

fn tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "area": {"type": "string"}
            }
        }
    })
}

/// Record the message and stall if a delayed call is due
async fn receive(mock: &MockHomeAssistant, method: &str) {
    let delayed = {
        let mut recorded = mock.recorded.lock().unwrap();
        recorded.methods.push(method.to_string());
        let delayed = method == "tools/call" && recorded.delayed_calls > 0;
        if delayed {
            recorded.delayed_calls -= 1;
        }
        delayed
    };
    if delayed {
        tokio::time::sleep(CALL_DELAY).await;
    }
}

fn answer(method: &str, id: Value, params: &Value) -> Value {
    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "home-assistant", "version": "2025.6.0"}
        }),
        "tools/list" => json!({"tools": [
            tool("HassTurnOn", "Turns on a device or entity"),
            tool("HassTurnOff", "Turns off a device or entity")
        ]}),
        "tools/call" => {
            let name = params["name"].as_str().unwrap_or_default();
            let target = params["arguments"]["name"].as_str().unwrap_or("device");
            json!({"content": [{"type": "text", "text": format!("{} done for {}", name, target)}]})
        }
        other => {
            return json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {}", other)}
            });
        }
    };
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

async fn mcp_post(
    State(mock): State<MockHomeAssistant>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let method = body["method"].as_str().unwrap_or_default().to_string();
    let has_session = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == SESSION_ID)
        .unwrap_or(false);
    if method != "initialize" && !has_session {
        mock.recorded.lock().unwrap().missing_session += 1;
    }
    receive(&mock, &method).await;

    let Some(id) = body.get("id").cloned() else {
        return StatusCode::ACCEPTED.into_response();
    };
    let reply = answer(&method, id, &body["params"]);

    match method.as_str() {
        "initialize" => ([("mcp-session-id", SESSION_ID)], Json(reply)).into_response(),
        // Discovery answers as an event stream, preceded by an unrelated notification
        "tools/list" => {
            let notice = json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}});
            let body = format!("event: message\ndata: {}\n\nevent: message\ndata: {}\n\n", notice, reply);
            ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
        }
        _ => Json(reply).into_response(),
    }
}

async fn sse_stream(State(mock): State<MockHomeAssistant>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let session = {
        let mut streams = mock.streams.lock().unwrap();
        let session = format!("sse-{:04}", streams.len() + 1);
        streams.insert(session.clone(), tx.clone());
        session
    };
    let _ = tx.send(format!(
        "event: endpoint\ndata: /mcp_server/messages?session_id={}\n\n: keepalive\n\n",
        session
    ));

    let events = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    });
    ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(events)).into_response()
}

async fn sse_message(
    State(mock): State<MockHomeAssistant>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let stream = query
        .get("session_id")
        .and_then(|id| mock.streams.lock().unwrap().get(id).cloned());
    let Some(stream) = stream else {
        return StatusCode::NOT_FOUND;
    };

    let method = body["method"].as_str().unwrap_or_default().to_string();
    receive(&mock, &method).await;

    if let Some(id) = body.get("id").cloned() {
        let reply = answer(&method, id, &body["params"]);
        let _ = stream.send(format!("event: message\ndata: {}\n\n", reply));
    }
    StatusCode::ACCEPTED
}

async fn mcp_delete(State(mock): State<MockHomeAssistant>) -> StatusCode {
    mock.recorded.lock().unwrap().deleted = true;
    StatusCode::OK
}

async fn states(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!([
        {"entity_id": "light.kitchen", "state": "on"},
        {"entity_id": "light.bedroom", "state": "off"},
        {"entity_id": "sensor.outdoor_temperature", "state": "12.5"},
        {"entity_id": "switch.kettle", "state": "off"}
    ]))
    .into_response()
}
