pub mod http;
pub mod pending;
pub mod ws;

pub use ws::{EXTENSION_WS_PATH, ExtensionBridge};

use crate::audit::{AuditCoordinator, AuditRunner};
use crate::browser::BrowserSessionManager;
use crate::config::{Config, Settings};
use crate::logs::LogAggregator;
use crate::screenshot::ScreenshotCoordinator;
use crate::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::sync::RwLock;

/// Every process-wide singleton, owned here and passed by reference into
/// handlers. Constructed once at startup.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<RwLock<Settings>>,
    pub logs: Arc<LogAggregator>,
    pub bridge: Arc<ExtensionBridge>,
    pub screenshots: Arc<ScreenshotCoordinator>,
    pub sessions: Arc<BrowserSessionManager>,
    pub audits: Arc<AuditCoordinator>,
    /// Actual bound port, written once the listener is up.
    pub port: Arc<AtomicU16>,
}

pub struct Server {
    config: Config,
    state: AppState,
}

impl Server {
    pub fn new(config: Config, runner: Arc<dyn AuditRunner>) -> Self {
        let settings = Arc::new(RwLock::new(config.logs.clone()));
        let logs = Arc::new(LogAggregator::new(settings.clone()));
        let bridge = Arc::new(ExtensionBridge::new(logs.clone()));
        let screenshots = Arc::new(ScreenshotCoordinator::new(bridge.clone(), settings.clone()));
        let sessions = Arc::new(BrowserSessionManager::new(config.browser.clone()));
        let audits = Arc::new(AuditCoordinator::new(
            logs.clone(),
            sessions.clone(),
            runner,
        ));

        let state = AppState {
            settings,
            logs,
            bridge,
            screenshots,
            sessions,
            audits,
            port: Arc::new(AtomicU16::new(config.server.port)),
        };

        Self { config, state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until SIGINT/SIGTERM, then run the shutdown protocol:
    /// extension notice + bounded socket close, headless session teardown,
    /// log wipe, listener close.
    pub async fn run(self) -> Result<()> {
        let (port, listener) = self.bind().await?;
        tracing::info!(
            host = %self.config.server.host,
            port,
            "Telemetry bridge listening"
        );

        let state = self.state.clone();
        let app = http::router(self.state);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                tracing::info!("Shutdown signal received");
                state.bridge.shutdown().await;
                state.sessions.disconnect().await;
                state.logs.clear_all().await;
            })
            .await?;

        Ok(())
    }

    /// Bind and serve in a background task. Used by integration tests and
    /// embedders that manage their own lifecycle.
    pub async fn spawn(self) -> Result<(u16, tokio::task::JoinHandle<()>)> {
        let (port, listener) = self.bind().await?;
        let app = http::router(self.state);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
        Ok((port, handle))
    }

    async fn bind(&self) -> Result<(u16, tokio::net::TcpListener)> {
        let host = self.config.server.host.clone();
        // Port exhaustion here is fatal to startup by design.
        let port =
            crate::port::find_available_port_default(&host, self.config.server.port).await?;
        self.state.port.store(port, Ordering::SeqCst);

        let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
        Ok((port, listener))
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to install SIGINT handler: {}", e);
                return std::future::pending().await;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                return std::future::pending().await;
            }
        };

        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C");
    }
}
