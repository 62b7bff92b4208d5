pub mod locator;
pub mod page;

pub use locator::{BrowserLocator, RealProbe, SystemProbe};
pub use page::PageOptions;

use crate::config::BrowserConfig;
use crate::timeouts::ms;
use crate::{BridgeError, Result};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Mutex;

const LAUNCH_FLAGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-extensions",
    "--disable-component-extensions-with-background-pages",
    "--disable-default-apps",
    "--disable-sync",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-features=Translate,ProfilePickerOnStartup",
    "--mute-audio",
];

const DEBUG_PORT_BASE: u16 = 9222;

struct ManagedSession {
    browser: Arc<Browser>,
    profile_dir: TempDir,
    ws_endpoint: String,
    debug_port: u16,
    launched_at: Instant,
    generation: u64,
}

/// Owns at most one headless browser at a time: discovers an executable,
/// launches with an isolated temporary profile, reuses the instance while
/// its liveness probe succeeds, and evicts it after idle timeout.
pub struct BrowserSessionManager {
    session: Mutex<Option<ManagedSession>>,
    locator: BrowserLocator,
    config: BrowserConfig,
    /// Bumped on every session create/destroy; guards deferred cleanup.
    session_generation: AtomicU64,
    /// Bumped on every acquire; stale idle-eviction timers compare and bail.
    activity_generation: AtomicU64,
    http: reqwest::Client,
}

impl BrowserSessionManager {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            locator: BrowserLocator::new(config.clone()),
            session: Mutex::new(None),
            config,
            session_generation: AtomicU64::new(0),
            activity_generation: AtomicU64::new(0),
            http: reqwest::Client::new(),
        }
    }

    /// Get a live browser, reusing the current session when its liveness
    /// probe succeeds and launching a fresh one otherwise. Cancels any
    /// pending idle eviction.
    pub async fn acquire(self: &Arc<Self>) -> Result<Arc<Browser>> {
        self.activity_generation.fetch_add(1, Ordering::SeqCst);

        let mut slot = self.session.lock().await;

        if let Some(session) = slot.as_ref() {
            if self.probe_liveness(session.debug_port).await {
                tracing::debug!(
                    age_secs = session.launched_at.elapsed().as_secs(),
                    "Reusing headless browser session"
                );
                let browser = session.browser.clone();
                drop(slot);
                self.schedule_idle_eviction();
                return Ok(browser);
            }
            tracing::warn!("Headless session failed liveness probe, relaunching");
            let dead = slot.take().expect("session just observed");
            self.defer_profile_cleanup(dead);
        }

        let session = self.launch().await?;
        let browser = session.browser.clone();
        *slot = Some(session);
        drop(slot);

        self.schedule_idle_eviction();
        Ok(browser)
    }

    /// Open a new page on the managed session, applying the requested
    /// options, and navigate it. Validates the URL before touching any
    /// process state. Pages are never reused across calls.
    pub async fn connect_for_page(self: &Arc<Self>, url: &str, options: &PageOptions) -> Result<Page> {
        let target = page::validate_target_url(url)?;

        let browser = self.acquire().await?;
        let new_page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BridgeError::BrowserLaunch(format!("Failed to open page: {}", e)))?;

        page::apply_options(&new_page, options).await?;
        page::navigate(
            &new_page,
            target.as_str(),
            Duration::from_secs(self.config.navigation_timeout_secs),
        )
        .await?;

        if let Some(selector) = options.wait_for_selector.as_deref() {
            page::wait_for_selector(&new_page, selector).await;
        }

        Ok(new_page)
    }

    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub async fn ws_endpoint(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.ws_endpoint.clone())
    }

    /// Close the current session, if any, and defer profile-dir cleanup.
    pub async fn disconnect(self: &Arc<Self>) {
        let taken = self.session.lock().await.take();
        if let Some(session) = taken {
            tracing::info!("Closing headless browser session");
            self.defer_profile_cleanup(session);
        }
    }

    async fn launch(self: &Arc<Self>) -> Result<ManagedSession> {
        let executable = self.locator.discover()?;
        let profile_dir = tempfile::Builder::new()
            .prefix("telemetry-bridge-profile-")
            .tempdir()
            .map_err(|e| BridgeError::BrowserLaunch(format!("Failed to create profile dir: {}", e)))?;

        let debug_port =
            crate::port::find_available_port_default("127.0.0.1", DEBUG_PORT_BASE).await?;

        let mut builder = chromiumoxide::BrowserConfig::builder()
            .chrome_executable(&executable)
            .port(debug_port)
            .user_data_dir(profile_dir.path());
        for flag in LAUNCH_FLAGS {
            builder = builder.arg(*flag);
        }
        let config = builder
            .build()
            .map_err(BridgeError::BrowserLaunch)?;

        // Profile dir is dropped (and removed) if launch fails; chromiumoxide
        // reaps a partially-started child on error.
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BridgeError::BrowserLaunch(e.to_string()))?;

        tokio::spawn(async move { while handler.next().await.is_some() {} });

        let ws_endpoint = browser.websocket_address().to_string();
        let generation = self.session_generation.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(
            executable = %executable.display(),
            port = debug_port,
            "Headless browser launched"
        );

        Ok(ManagedSession {
            browser: Arc::new(browser),
            profile_dir,
            ws_endpoint,
            debug_port,
            launched_at: Instant::now(),
            generation,
        })
    }

    /// Can the browser still enumerate its targets?
    async fn probe_liveness(&self, debug_port: u16) -> bool {
        let url = format!("http://127.0.0.1:{}/json/version", debug_port);
        match self
            .http
            .get(&url)
            .timeout(Duration::from_millis(ms::LIVENESS_PROBE))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// After `cleanup_timeout_secs` with no new acquire, close the session.
    /// Any acquire in the meantime invalidates this timer.
    fn schedule_idle_eviction(self: &Arc<Self>) {
        let armed_at = self.activity_generation.load(Ordering::SeqCst);
        let timeout = Duration::from_secs(self.config.cleanup_timeout_secs);
        let manager = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if manager.activity_generation.load(Ordering::SeqCst) != armed_at {
                return;
            }
            if manager.has_session().await {
                tracing::info!(
                    idle_secs = timeout.as_secs(),
                    "Evicting idle headless browser session"
                );
                manager.disconnect().await;
            }
        });
    }

    /// Delete the session's temp profile after a short delay, unless a new
    /// session has been created since (its launch may still be touching
    /// the old directory during startup races).
    fn defer_profile_cleanup(self: &Arc<Self>, session: ManagedSession) {
        let closed_generation = session.generation;
        let manager = self.clone();

        tokio::spawn(async move {
            let ManagedSession {
                browser,
                profile_dir,
                ..
            } = session;
            drop(browser);

            tokio::time::sleep(Duration::from_millis(ms::PROFILE_CLEANUP_DELAY)).await;

            if manager.session_generation.load(Ordering::SeqCst) != closed_generation {
                let kept = profile_dir.keep();
                tracing::debug!(
                    path = %kept.display(),
                    "Skipping profile cleanup, a newer session exists"
                );
                return;
            }
            // TempDir drop removes the directory.
            drop(profile_dir);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_for_page_rejects_malformed_url_before_launch() {
        let manager = Arc::new(BrowserSessionManager::new(BrowserConfig::default()));
        let result = manager
            .connect_for_page("not a url", &PageOptions::default())
            .await;
        assert!(matches!(result, Err(BridgeError::InvalidUrl(_))));
        // validation failed fast: no session was created
        assert!(!manager.has_session().await);
    }

    #[tokio::test]
    async fn test_connect_for_page_rejects_unsupported_scheme() {
        let manager = Arc::new(BrowserSessionManager::new(BrowserConfig::default()));
        let result = manager
            .connect_for_page("ftp://example.com/file", &PageOptions::default())
            .await;
        assert!(matches!(result, Err(BridgeError::InvalidUrl(_))));
    }

    #[test]
    fn test_launch_flags_disable_first_run_and_extensions() {
        assert!(LAUNCH_FLAGS.contains(&"--no-first-run"));
        assert!(LAUNCH_FLAGS.contains(&"--disable-extensions"));
        assert!(LAUNCH_FLAGS.contains(&"--disable-background-networking"));
    }
}
