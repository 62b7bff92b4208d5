use crate::logs::LogAggregator;
use crate::server::pending::PendingMap;
use crate::timeouts::ms;
use crate::{BridgeError, Result};
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

pub const EXTENSION_WS_PATH: &str = "/extension-ws";

/// Reply to a `take-screenshot` request, carried over the extension socket.
#[derive(Debug, Clone)]
pub enum ScreenshotReply {
    Data {
        data: String,
        path: Option<String>,
        auto_paste: bool,
    },
    Error(String),
}

struct ConnectionSlot {
    generation: u64,
    tx: mpsc::Sender<Message>,
}

/// Owns the single WebSocket connection from the browser extension.
///
/// A later upgrade replaces the current connection ("last upgrade wins");
/// the stale socket is sent a close frame rather than being abandoned.
pub struct ExtensionBridge {
    slot: RwLock<Option<ConnectionSlot>>,
    generation: AtomicU64,
    logs: Arc<LogAggregator>,
    pub(crate) screenshot_pending: PendingMap<ScreenshotReply>,
    url_pending: PendingMap<String>,
}

impl ExtensionBridge {
    pub fn new(logs: Arc<LogAggregator>) -> Self {
        Self {
            slot: RwLock::new(None),
            generation: AtomicU64::new(0),
            logs,
            screenshot_pending: PendingMap::new(),
            url_pending: PendingMap::new(),
        }
    }

    pub async fn has_active_connection(&self) -> bool {
        self.slot.read().await.is_some()
    }

    /// Send one JSON frame to the extension. Fails with `NoConnection`
    /// when no socket is attached; the failure is surfaced to the caller,
    /// never swallowed.
    pub async fn send(&self, message: &Value) -> Result<()> {
        let tx = {
            let slot = self.slot.read().await;
            slot.as_ref()
                .map(|s| s.tx.clone())
                .ok_or(BridgeError::NoConnection)?
        };
        tx.send(Message::Text(message.to_string().into()))
            .await
            .map_err(|_| BridgeError::Connection("Extension socket closed mid-send".into()))
    }

    /// Ask the extension for its current tab URL and wait briefly for the
    /// correlated `current-url-response`.
    pub async fn request_current_url(&self) -> Result<Option<String>> {
        if !self.has_active_connection().await {
            return Ok(None);
        }

        let request_id = Uuid::new_v4().to_string();
        let rx = self.url_pending.register(&request_id).await;
        self.send(&json!({"type": "get-current-url", "requestId": request_id}))
            .await?;

        match tokio::time::timeout(Duration::from_millis(ms::URL_REQUEST), rx).await {
            Ok(Ok(url)) => {
                self.logs
                    .update_current_url(url.clone(), None, Some("current-url-response".into()))
                    .await;
                Ok(Some(url))
            }
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                self.url_pending.remove(&request_id).await;
                tracing::debug!("Extension did not answer get-current-url in time");
                Ok(None)
            }
        }
    }

    /// Drive one accepted extension socket until it closes. Called from the
    /// upgrade handler; replaces whatever connection was active before.
    pub async fn run_connection(self: Arc<Self>, socket: WebSocket) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(64);

        let previous = {
            let mut slot = self.slot.write().await;
            slot.replace(ConnectionSlot { generation, tx })
        };
        if let Some(prev) = previous {
            tracing::info!("Replacing existing extension connection");
            let _ = prev
                .tx
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: "replaced by newer connection".into(),
                })))
                .await;
        }
        tracing::info!("Chrome extension connected");

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() {
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.route_frame(&text).await,
                Ok(Message::Close(_)) => {
                    tracing::info!("Chrome extension disconnected");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
                Err(e) => {
                    tracing::warn!("Extension socket error: {}", e);
                    break;
                }
            }
        }

        // Only clear the slot if no newer connection has taken it over.
        {
            let mut slot = self.slot.write().await;
            if slot.as_ref().is_some_and(|s| s.generation == generation) {
                *slot = None;
            }
        }
        writer.abort();
    }

    /// Parse and route one inbound text frame. Malformed input is logged
    /// and dropped; routing never errors so the bridge stays alive.
    async fn route_frame(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Dropping unparseable extension frame: {}", e);
                return;
            }
        };

        let Some(frame_type) = value.get("type").and_then(Value::as_str) else {
            tracing::warn!("Dropping extension frame without a type");
            return;
        };

        match frame_type {
            "page-navigated" => {
                let url = value.get("url").and_then(Value::as_str).map(str::to_owned);
                let tab_id = value
                    .get("tabId")
                    .map(|v| v.to_string().trim_matches('"').to_owned());
                if let Some(url) = url {
                    self.logs
                        .update_current_url(url, tab_id, Some("extension-ws".into()))
                        .await;
                }
            }
            "screenshot-data" => {
                let reply = ScreenshotReply::Data {
                    data: value
                        .get("data")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    path: value
                        .get("path")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    auto_paste: value
                        .get("autoPaste")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                };
                if !self.screenshot_pending.resolve_first_and_clear(reply).await {
                    tracing::debug!("screenshot-data arrived with no pending capture");
                }
            }
            "screenshot-error" => {
                let message = value
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown screenshot error")
                    .to_string();
                if !self
                    .screenshot_pending
                    .resolve_first_and_clear(ScreenshotReply::Error(message))
                    .await
                {
                    tracing::debug!("screenshot-error arrived with no pending capture");
                }
            }
            "current-url-response" => {
                let url = value
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Some(request_id) = value.get("requestId").and_then(Value::as_str) {
                    if !self.url_pending.resolve(request_id, url.clone()).await {
                        // Late or unsolicited reply still refreshes the URL.
                        self.logs
                            .update_current_url(url, None, Some("current-url-response".into()))
                            .await;
                    }
                } else {
                    self.url_pending.resolve_first_and_clear(url).await;
                }
            }
            other => {
                tracing::warn!(frame_type = %other, "Ignoring unknown extension frame type");
            }
        }
    }

    /// Install a channel-backed connection without a real socket.
    #[cfg(test)]
    pub(crate) async fn attach_for_tests(&self) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(16);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.slot.write().await = Some(ConnectionSlot { generation, tx });
        rx
    }

    /// Shutdown protocol: notify the extension, close with code 1000, and
    /// force-drop the socket if graceful close does not complete within
    /// the grace period. Always completes in bounded time.
    pub async fn shutdown(&self) {
        if self
            .send(&json!({"type": "server-shutdown"}))
            .await
            .is_err()
        {
            return;
        }

        {
            let slot = self.slot.read().await;
            if let Some(s) = slot.as_ref() {
                let _ = s
                    .tx
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "server-shutdown".into(),
                    })))
                    .await;
            }
        }

        let deadline = tokio::time::Instant::now() + Duration::from_millis(ms::WS_CLOSE_GRACE);
        while self.has_active_connection().await {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("Extension socket did not close gracefully, force-terminating");
                *self.slot.write().await = None;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
