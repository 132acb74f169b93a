//! MCP client and tool bridge over real HTTP.

mod common;

use friday_core::mcp::{connect_with_retry, http_factory, HttpTransport, McpClient, RetryPolicy, SseTransport};
use friday_core::{CapabilityRegistry, Error, ToolBridge};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_handshake_and_session_header() {
    let ha = common::start().await;
    let transport = Arc::new(HttpTransport::new(ha.mcp_url(), common::TOKEN, Duration::from_secs(5)).unwrap());
    let client = McpClient::new(transport.clone());

    let info = client.initialize().await.unwrap();
    assert_eq!(info.server_info.name, "home-assistant");
    assert_eq!(transport.session_id().await.as_deref(), Some(common::SESSION_ID));

    client.ping().await.unwrap_err();
    client.close().await.unwrap();

    let recorded = ha.mock.recorded.lock().unwrap();
    assert_eq!(recorded.methods, vec!["initialize", "notifications/initialized", "ping"]);
    assert_eq!(recorded.missing_session, 0);
    assert!(recorded.deleted);
}

#[tokio::test]
async fn test_event_stream_reply() {
    let ha = common::start().await;
    let transport = Arc::new(HttpTransport::new(ha.mcp_url(), common::TOKEN, Duration::from_secs(5)).unwrap());
    let client = McpClient::new(transport);
    client.initialize().await.unwrap();

    let tools = client.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["HassTurnOn", "HassTurnOff"]);
}

#[tokio::test]
async fn test_rejected_token_not_retried() {
    let ha = common::start().await;
    let mut config = ha.config();
    config.token = Some("wrong".to_string());

    let factory = http_factory(&config).unwrap();
    let err = match connect_with_retry(&factory, &RetryPolicy::immediate(3)).await {
        Ok(_) => panic!("expected the token to be rejected"),
        Err(e) => e,
    };

    assert!(matches!(err, Error::Unauthorized(401)));
    assert!(ha.methods().is_empty());
}

#[tokio::test]
async fn test_unreachable_server_exhausts_attempts() {
    let mut config = friday_core::config::HomeAssistantConfig::default();
    config.mcp_url = Some("http://127.0.0.1:1/api/mcp".to_string());
    config.token = Some(common::TOKEN.to_string());
    config.timeout_secs = 2;

    let factory = http_factory(&config).unwrap();
    match connect_with_retry(&factory, &RetryPolicy::immediate(2)).await {
        Err(Error::ConnectFailed { attempts, .. }) => assert_eq!(attempts, 2),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("connection should fail"),
    }
}

#[tokio::test]
async fn test_bridge_end_to_end() {
    let ha = common::start().await;
    let registry = Arc::new(CapabilityRegistry::new());
    let bridge = ToolBridge::new(
        http_factory(&ha.config()).unwrap(),
        RetryPolicy::immediate(1),
        Arc::clone(&registry),
    );

    bridge.connect().await.unwrap();
    let summary = bridge.discover().await.unwrap();
    assert_eq!(summary.added, 2);
    assert_eq!(registry.len().await, 2);

    let outcome = bridge
        .invoke("HassTurnOff", json!({"name": "Bedroom Lamp"}))
        .await
        .unwrap();
    assert_eq!(outcome.text, "HassTurnOff done for Bedroom Lamp");
    assert!(!outcome.is_error);

    bridge.close().await.unwrap();
    assert!(!bridge.is_connected().await);
}

#[tokio::test]
async fn test_sse_transport_round_trip() {
    let ha = common::start().await;
    let transport = Arc::new(SseTransport::new(ha.sse_url(), common::TOKEN, Duration::from_secs(5)).unwrap());
    let client = McpClient::new(transport.clone());

    let info = client.initialize().await.unwrap();
    assert_eq!(info.server_info.name, "home-assistant");
    let endpoint = transport.endpoint().await.unwrap();
    assert_eq!(endpoint.path(), "/mcp_server/messages");
    assert_eq!(endpoint.query(), Some("session_id=sse-0001"));

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 2);
    client.close().await.unwrap();

    assert_eq!(ha.methods(), vec!["initialize", "notifications/initialized", "tools/list"]);
}

#[tokio::test]
async fn test_bridge_end_to_end_over_sse() {
    let ha = common::start().await;
    let registry = Arc::new(CapabilityRegistry::new());
    let bridge = ToolBridge::new(
        http_factory(&ha.sse_config()).unwrap(),
        RetryPolicy::immediate(1),
        Arc::clone(&registry),
    );

    bridge.connect().await.unwrap();
    bridge.discover().await.unwrap();
    assert_eq!(registry.len().await, 2);

    let outcome = bridge
        .invoke("HassTurnOn", json!({"name": "Kitchen Light"}))
        .await
        .unwrap();
    assert_eq!(outcome.text, "HassTurnOn done for Kitchen Light");
    // Nothing went to the streamable HTTP path
    assert!(!ha.mock.recorded.lock().unwrap().deleted);
    bridge.close().await.unwrap();
}

#[tokio::test]
async fn test_sse_rejected_token() {
    let ha = common::start().await;
    let mut config = ha.sse_config();
    config.token = Some("wrong".to_string());

    let factory = http_factory(&config).unwrap();
    let err = match connect_with_retry(&factory, &RetryPolicy::immediate(3)).await {
        Ok(_) => panic!("expected the token to be rejected"),
        Err(e) => e,
    };
    assert!(matches!(err, Error::Unauthorized(401)));
}

#[tokio::test]
async fn test_timed_out_call_is_not_sent_twice() {
    let ha = common::start().await;
    let mut config = ha.config();
    config.timeout_secs = 1;
    let bridge = ToolBridge::new(
        http_factory(&config).unwrap(),
        RetryPolicy::immediate(1),
        Arc::new(CapabilityRegistry::new()),
    );
    bridge.connect().await.unwrap();
    bridge.discover().await.unwrap();

    ha.delay_calls(1);
    let err = bridge
        .invoke("HassTurnOff", json!({"name": "Bedroom Lamp"}))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(ha.count("tools/call"), 1);

    // The next call goes through the fresh session
    let outcome = bridge
        .invoke("HassTurnOff", json!({"name": "Bedroom Lamp"}))
        .await
        .unwrap();
    assert!(!outcome.is_error);
    assert_eq!(ha.count("tools/call"), 2);
    assert_eq!(ha.count("initialize"), 2);
}
