//! Integration tests driving the live bridge server over HTTP and a real
//! WebSocket client standing in for the browser extension.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use browser_telemetry_bridge::audit::{AuditKind, AuditRunner, UnconfiguredAuditRunner};
use browser_telemetry_bridge::{Config, Server};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config
}

async fn spawn_server(config: Config, runner: Arc<dyn AuditRunner>) -> u16 {
    let server = Server::new(config, runner);
    let (port, _handle) = server.spawn().await.expect("server should bind");
    port
}

async fn spawn_default() -> u16 {
    spawn_server(test_config(), Arc::new(UnconfiguredAuditRunner)).await
}

#[tokio::test]
async fn test_port_and_identity_endpoints() {
    let port = spawn_default().await;
    let client = reqwest::Client::new();

    let text = client
        .get(format!("http://127.0.0.1:{}/.port", port))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(text, port.to_string());

    let identity: Value = client
        .get(format!("http://127.0.0.1:{}/.identity", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(identity["port"], port);
    assert_eq!(identity["name"], "browser-telemetry-bridge");
    assert_eq!(identity["signature"], "browser-telemetry-bridge");
    assert!(identity["version"].as_str().is_some());
}

#[tokio::test]
async fn test_capture_screenshot_without_extension_is_503() {
    let port = spawn_default().await;

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/capture-screenshot", port))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Chrome extension not connected");
}

#[tokio::test]
async fn test_extension_log_bounded_at_log_limit() {
    let port = spawn_default().await;
    let client = reqwest::Client::new();

    for i in 0..60 {
        let response = client
            .post(format!("http://127.0.0.1:{}/extension-log", port))
            .json(&json!({
                "data": {
                    "type": "console-error",
                    "level": "error",
                    "message": "x",
                    "timestamp": i + 1,
                }
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let errors: Vec<Value> = client
        .get(format!("http://127.0.0.1:{}/console-errors", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(errors.len(), 50);
    // the oldest ten ingests were evicted
    assert_eq!(errors[0]["timestamp"], 11);
    assert_eq!(errors[49]["timestamp"], 60);
}

#[tokio::test]
async fn test_settings_merge_through_extension_log() {
    let port = spawn_default().await;
    let client = reqwest::Client::new();

    // shrink the limit mid-flight via the settings side channel
    client
        .post(format!("http://127.0.0.1:{}/extension-log", port))
        .json(&json!({
            "data": {"type": "console-log", "level": "info", "message": "a", "timestamp": 1},
            "settings": {"logLimit": 3}
        }))
        .send()
        .await
        .unwrap();

    for i in 2..10 {
        client
            .post(format!("http://127.0.0.1:{}/extension-log", port))
            .json(&json!({
                "data": {"type": "console-log", "level": "info", "message": "b", "timestamp": i}
            }))
            .send()
            .await
            .unwrap();
    }

    let logs: Vec<Value> = client
        .get(format!("http://127.0.0.1:{}/console-logs", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(logs.len(), 3);
}

#[tokio::test]
async fn test_wipelogs_clears_everything() {
    let port = spawn_default().await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://127.0.0.1:{}/extension-log", port))
        .json(&json!({
            "data": {"type": "network-request", "url": "http://x", "status": 500, "timestamp": 1}
        }))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("http://127.0.0.1:{}/wipelogs", port))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    for path in ["console-logs", "console-errors", "network-errors", "network-success", "all-xhr"] {
        let entries: Vec<Value> = client
            .get(format!("http://127.0.0.1:{}/{}", port, path))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(entries.is_empty(), "{} should be empty after wipe", path);
    }
}

#[tokio::test]
async fn test_current_url_post_echoes_previous() {
    let port = spawn_default().await;
    let client = reqwest::Client::new();

    let first: Value = client
        .post(format!("http://127.0.0.1:{}/current-url", port))
        .json(&json!({"url": "https://one.test", "tabId": 4, "source": "tab_activated"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["url"], "https://one.test");
    assert!(first["previousUrl"].is_null());

    let second: Value = client
        .post(format!("http://127.0.0.1:{}/current-url", port))
        .json(&json!({"url": "https://two.test"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["previousUrl"], "https://one.test");

    let current: Value = client
        .get(format!("http://127.0.0.1:{}/current-url", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["url"], "https://two.test");
}

#[tokio::test]
async fn test_selected_element_round_trip() {
    let port = spawn_default().await;
    let client = reqwest::Client::new();

    let empty: Value = client
        .get(format!("http://127.0.0.1:{}/selected-element", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(empty["message"], "No element selected");

    client
        .post(format!("http://127.0.0.1:{}/selected-element", port))
        .json(&json!({"data": {"tag": "button", "id": "submit"}}))
        .send()
        .await
        .unwrap();

    let element: Value = client
        .get(format!("http://127.0.0.1:{}/selected-element", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(element["tag"], "button");
    assert_eq!(element["id"], "submit");
}

#[tokio::test]
async fn test_audit_on_blank_url_is_client_error() {
    let port = spawn_default().await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://127.0.0.1:{}/current-url", port))
        .json(&json!({"url": "about:blank"}))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("http://127.0.0.1:{}/seo-audit", port))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("about:blank"));
    assert!(message.contains("seo"));
}

struct StaticReportRunner;

#[async_trait]
impl AuditRunner for StaticReportRunner {
    async fn run_audit(&self, url: &str, kind: AuditKind) -> anyhow::Result<Value> {
        Ok(json!({"url": url, "kind": kind.as_str(), "score": 1.0}))
    }
}

#[tokio::test]
async fn test_audit_delegates_to_injected_runner() {
    let port = spawn_server(test_config(), Arc::new(StaticReportRunner)).await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://127.0.0.1:{}/current-url", port))
        .json(&json!({"url": "https://example.com"}))
        .send()
        .await
        .unwrap();

    let report: Value = client
        .post(format!("http://127.0.0.1:{}/performance-audit", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["url"], "https://example.com");
    assert_eq!(report["kind"], "performance");
}

#[tokio::test]
async fn test_ws_page_navigated_feeds_current_url() {
    let port = spawn_default().await;

    let (mut socket, _) = connect_async(format!("ws://127.0.0.1:{}/extension-ws", port))
        .await
        .expect("extension socket should connect");

    socket
        .send(Message::Text(
            json!({"type": "page-navigated", "url": "https://ws.test", "tabId": 1})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    // give the routing task a beat
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let current: Value = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/current-url", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["url"], "https://ws.test");
}

#[tokio::test]
async fn test_screenshot_round_trip_over_ws() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.logs.screenshot_path = Some(dir.path().to_path_buf());
    let port = spawn_server(config, Arc::new(UnconfiguredAuditRunner)).await;

    let (socket, _) = connect_async(format!("ws://127.0.0.1:{}/extension-ws", port))
        .await
        .unwrap();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // stand-in extension: answer the first take-screenshot request
    let extension = tokio::spawn(async move {
        while let Some(Ok(frame)) = ws_rx.next().await {
            if let Message::Text(text) = frame {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "take-screenshot" {
                    ws_tx
                        .send(Message::Text(
                            json!({
                                "type": "screenshot-data",
                                "data": BASE64.encode(b"fake-png"),
                                "requestId": value["requestId"],
                            })
                            .to_string()
                            .into(),
                        ))
                        .await
                        .unwrap();
                    break;
                }
            }
        }
    });

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/capture-screenshot", port))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    let saved = std::path::PathBuf::from(body["path"].as_str().unwrap());
    assert!(saved.starts_with(dir.path()));
    assert_eq!(std::fs::read(&saved).unwrap(), b"fake-png");

    extension.await.unwrap();
}

#[tokio::test]
async fn test_direct_screenshot_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.logs.screenshot_path = Some(dir.path().to_path_buf());
    let port = spawn_server(config, Arc::new(UnconfiguredAuditRunner)).await;

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/screenshot", port))
        .json(&json!({
            "data": format!("data:image/png;base64,{}", BASE64.encode(b"direct-bytes")),
            "filename": "direct.png",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    let saved = std::path::PathBuf::from(body["path"].as_str().unwrap());
    assert_eq!(saved.file_name().unwrap(), "direct.png");
    assert_eq!(std::fs::read(&saved).unwrap(), b"direct-bytes");
}

#[tokio::test]
async fn test_header_settings_respected_in_queries() {
    let port = spawn_default().await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://127.0.0.1:{}/extension-log", port))
        .json(&json!({
            "data": {
                "type": "network-request",
                "url": "http://api.test/things",
                "method": "GET",
                "status": 200,
                "timestamp": 1,
                "requestHeaders": {"authorization": "Bearer secret"},
            }
        }))
        .send()
        .await
        .unwrap();

    let success: Vec<Value> = client
        .get(format!("http://127.0.0.1:{}/network-success", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(success.len(), 1);
    assert!(success[0].get("requestHeaders").is_none());
    assert_eq!(success[0]["url"], "http://api.test/things");
}
