use crate::config::Settings;
use crate::server::ws::{ExtensionBridge, ScreenshotReply};
use crate::timeouts::secs;
use crate::utils::{self, Platform};
use crate::{BridgeError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub saved_path: PathBuf,
    pub auto_pasted: bool,
}

/// Correlates an HTTP screenshot request with the asynchronous extension
/// reply carrying the image data, then persists the image.
///
/// Only one in-flight capture is meaningfully supported: any extension
/// reply resolves the oldest pending request and clears the rest, so
/// concurrent captures race (see DESIGN.md).
pub struct ScreenshotCoordinator {
    bridge: Arc<ExtensionBridge>,
    settings: Arc<RwLock<Settings>>,
}

impl ScreenshotCoordinator {
    pub fn new(bridge: Arc<ExtensionBridge>, settings: Arc<RwLock<Settings>>) -> Self {
        Self { bridge, settings }
    }

    pub async fn capture(&self) -> Result<CaptureOutcome> {
        self.capture_with_timeout(Duration::from_secs(secs::SCREENSHOT_CAPTURE))
            .await
    }

    pub async fn capture_with_timeout(&self, timeout: Duration) -> Result<CaptureOutcome> {
        if !self.bridge.has_active_connection().await {
            return Err(BridgeError::NoConnection);
        }

        let request_id = Uuid::new_v4().to_string();
        let rx = self.bridge.screenshot_pending.register(&request_id).await;

        self.bridge
            .send(&json!({"type": "take-screenshot", "requestId": request_id}))
            .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ScreenshotReply::Data {
                data,
                path,
                auto_paste,
            })) => self.save_reply(&data, path, auto_paste).await,
            Ok(Ok(ScreenshotReply::Error(message))) => Err(BridgeError::Connection(format!(
                "Extension screenshot failed: {}",
                message
            ))),
            // Registration cleared by a competing capture's reply; the
            // caller observes the same timeout the dropped callback would.
            Ok(Err(_)) => Err(BridgeError::CaptureTimeout),
            Err(_) => {
                self.bridge.screenshot_pending.remove(&request_id).await;
                Err(BridgeError::CaptureTimeout)
            }
        }
    }

    async fn save_reply(
        &self,
        data: &str,
        extension_path: Option<String>,
        auto_paste: bool,
    ) -> Result<CaptureOutcome> {
        let dir = self.resolve_target_dir(extension_path).await;
        let saved_path = write_image(data, &dir, utils::screenshot_filename())?;

        let auto_pasted = if auto_paste {
            try_auto_paste(&saved_path).await
        } else {
            false
        };

        tracing::info!(path = %saved_path.display(), "Screenshot saved");
        Ok(CaptureOutcome {
            saved_path,
            auto_pasted,
        })
    }

    /// Persist a base64 payload delivered directly over HTTP, without an
    /// extension round trip.
    pub async fn save_direct(&self, data: &str, filename: Option<String>) -> Result<PathBuf> {
        let dir = self.resolve_target_dir(None).await;
        let filename = filename
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(utils::screenshot_filename);
        let saved = write_image(data, &dir, filename)?;
        tracing::info!(path = %saved.display(), "Screenshot saved");
        Ok(saved)
    }

    /// Extension-supplied path, else configured screenshot path, else the
    /// platform Downloads fallback; converted to the current OS path
    /// convention.
    async fn resolve_target_dir(&self, extension_path: Option<String>) -> PathBuf {
        let configured = self.settings.read().await.screenshot_path.clone();
        let raw = extension_path
            .filter(|p| !p.trim().is_empty())
            .or_else(|| configured.map(|p| p.to_string_lossy().into_owned()))
            .unwrap_or_else(|| {
                utils::downloads_dir()
                    .join("telemetry-screenshots")
                    .to_string_lossy()
                    .into_owned()
            });
        PathBuf::from(utils::convert_path(&raw, Platform::current()))
    }
}

fn write_image(data: &str, dir: &Path, filename: String) -> Result<PathBuf> {
    let stripped = data
        .strip_prefix("data:image/png;base64,")
        .or_else(|| data.strip_prefix("data:image/jpeg;base64,"))
        .unwrap_or(data);
    let bytes = BASE64
        .decode(stripped)
        .map_err(|e| BridgeError::FileSystem(format!("Invalid image payload: {}", e)))?;

    std::fs::create_dir_all(dir).map_err(|e| {
        BridgeError::FileSystem(format!("Failed to create {}: {}", dir.display(), e))
    })?;

    let path = dir.join(filename);
    std::fs::write(&path, &bytes)
        .map_err(|e| BridgeError::FileSystem(format!("Failed to write {}: {}", path.display(), e)))?;

    Ok(path)
}

/// Best-effort paste of the saved image into the frontmost application.
/// Failures are logged, never surfaced: the capture already succeeded.
#[cfg(target_os = "macos")]
async fn try_auto_paste(path: &Path) -> bool {
    let script = format!(
        "set the clipboard to (read (POSIX file \"{}\") as \u{ab}class PNGf\u{bb})\n\
         tell application \"System Events\" to keystroke \"v\" using command down",
        path.display()
    );
    match tokio::process::Command::new("osascript")
        .arg("-e")
        .arg(&script)
        .output()
        .await
    {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            tracing::warn!(
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Auto-paste script failed"
            );
            false
        }
        Err(e) => {
            tracing::warn!("Could not run osascript: {}", e);
            false
        }
    }
}

#[cfg(not(target_os = "macos"))]
async fn try_auto_paste(_path: &Path) -> bool {
    tracing::debug!("Auto-paste requested on a non-macOS host, skipping");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::LogAggregator;
    use axum::extract::ws::Message;

    fn coordinator_with_settings(settings: Settings) -> (ScreenshotCoordinator, Arc<ExtensionBridge>) {
        let settings = Arc::new(RwLock::new(settings));
        let logs = Arc::new(LogAggregator::new(settings.clone()));
        let bridge = Arc::new(ExtensionBridge::new(logs));
        (
            ScreenshotCoordinator::new(bridge.clone(), settings),
            bridge,
        )
    }

    #[tokio::test]
    async fn test_capture_without_connection_is_immediate() {
        let (coordinator, bridge) = coordinator_with_settings(Settings::default());
        let result = coordinator.capture().await;
        assert!(matches!(result, Err(BridgeError::NoConnection)));
        // no frame was queued anywhere
        assert!(bridge.screenshot_pending.is_empty().await);
    }

    #[tokio::test]
    async fn test_capture_times_out_and_unregisters() {
        let (coordinator, bridge) = coordinator_with_settings(Settings::default());
        let mut rx = bridge.attach_for_tests().await;

        let result = coordinator
            .capture_with_timeout(Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(BridgeError::CaptureTimeout)));
        assert!(bridge.screenshot_pending.is_empty().await);

        // the take-screenshot frame was still sent
        let frame = rx.recv().await.unwrap();
        match frame {
            Message::Text(text) => assert!(text.contains("take-screenshot")),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_capture_round_trip_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, bridge) = coordinator_with_settings(Settings {
            screenshot_path: Some(dir.path().to_path_buf()),
            ..Settings::default()
        });
        let mut rx = bridge.attach_for_tests().await;

        let replier = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let _request = rx.recv().await.unwrap();
                bridge
                    .screenshot_pending
                    .resolve_first_and_clear(ScreenshotReply::Data {
                        data: BASE64.encode(b"png-bytes"),
                        path: None,
                        auto_paste: false,
                    })
                    .await;
            })
        };

        let outcome = coordinator
            .capture_with_timeout(Duration::from_secs(2))
            .await
            .unwrap();
        replier.await.unwrap();

        assert!(outcome.saved_path.starts_with(dir.path()));
        assert_eq!(std::fs::read(&outcome.saved_path).unwrap(), b"png-bytes");
        assert!(!outcome.auto_pasted);
    }

    #[tokio::test]
    async fn test_extension_error_reply_surfaces() {
        let (coordinator, bridge) = coordinator_with_settings(Settings::default());
        let mut rx = bridge.attach_for_tests().await;

        let replier = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let _request = rx.recv().await.unwrap();
                bridge
                    .screenshot_pending
                    .resolve_first_and_clear(ScreenshotReply::Error("no visible tab".into()))
                    .await;
            })
        };

        let result = coordinator
            .capture_with_timeout(Duration::from_secs(2))
            .await;
        replier.await.unwrap();

        match result {
            Err(BridgeError::Connection(msg)) => assert!(msg.contains("no visible tab")),
            other => panic!("expected connection error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_save_direct_decodes_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator_with_settings(Settings {
            screenshot_path: Some(dir.path().to_path_buf()),
            ..Settings::default()
        });

        let data = format!("data:image/png;base64,{}", BASE64.encode(b"direct"));
        let path = coordinator
            .save_direct(&data, Some("shot.png".into()))
            .await
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "shot.png");
        assert_eq!(std::fs::read(&path).unwrap(), b"direct");
    }

    #[tokio::test]
    async fn test_save_direct_rejects_bad_base64() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator_with_settings(Settings {
            screenshot_path: Some(dir.path().to_path_buf()),
            ..Settings::default()
        });

        let result = coordinator.save_direct("%%%not-base64%%%", None).await;
        assert!(matches!(result, Err(BridgeError::FileSystem(_))));
    }
}
