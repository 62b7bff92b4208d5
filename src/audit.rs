use crate::browser::{BrowserSessionManager, PageOptions};
use crate::logs::LogAggregator;
use crate::timeouts::{URL_POLL_MAX_ATTEMPTS, ms};
use crate::{BridgeError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Accessibility,
    Performance,
    Seo,
    BestPractices,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accessibility => "accessibility",
            Self::Performance => "performance",
            Self::Seo => "seo",
            Self::BestPractices => "best-practices",
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External audit engine. Opaque to the bridge: it receives a URL and
/// returns a structured report or fails.
#[async_trait]
pub trait AuditRunner: Send + Sync {
    async fn run_audit(&self, url: &str, kind: AuditKind) -> anyhow::Result<Value>;
}

/// Placeholder wired by the reference binary; deployments inject a real
/// engine through `Server::builder`.
pub struct UnconfiguredAuditRunner;

#[async_trait]
impl AuditRunner for UnconfiguredAuditRunner {
    async fn run_audit(&self, _url: &str, kind: AuditKind) -> anyhow::Result<Value> {
        anyhow::bail!("no audit engine configured for {} audits", kind)
    }
}

/// Resolves which URL to audit (live tab vs. headless) and invokes the
/// external audit engine with wait/retry semantics.
pub struct AuditCoordinator {
    logs: Arc<LogAggregator>,
    sessions: Arc<BrowserSessionManager>,
    runner: Arc<dyn AuditRunner>,
}

impl AuditCoordinator {
    pub fn new(
        logs: Arc<LogAggregator>,
        sessions: Arc<BrowserSessionManager>,
        runner: Arc<dyn AuditRunner>,
    ) -> Self {
        Self {
            logs,
            sessions,
            runner,
        }
    }

    /// Return the last-observed page URL if usable, otherwise poll for one
    /// to appear. Returns `None` on timeout; never errors.
    pub async fn resolve_url_for_audit(&self) -> Option<String> {
        self.resolve_url_with(
            Duration::from_millis(ms::URL_POLL_INTERVAL),
            URL_POLL_MAX_ATTEMPTS,
        )
        .await
    }

    async fn resolve_url_with(&self, interval: Duration, max_attempts: u32) -> Option<String> {
        for attempt in 0..max_attempts {
            if let Some(url) = self.logs.current_url().await
                && is_auditable(&url)
            {
                return Some(url);
            }
            if attempt == 0 {
                tracing::debug!("No page URL known yet, waiting for one to appear");
            }
            if attempt + 1 < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }
        None
    }

    /// Run one audit. A missing URL or `about:blank` is a client error
    /// naming the audit kind; the engine is never invoked for either.
    /// When `target_url` is given, the page is opened in the managed
    /// headless session first.
    pub async fn run_audit(&self, kind: AuditKind, target_url: Option<String>) -> Result<Value> {
        let url = match target_url {
            Some(explicit) => {
                let page = self
                    .sessions
                    .connect_for_page(&explicit, &PageOptions::default())
                    .await?;
                // The audit engine drives its own connection; the page only
                // warms the session and validates reachability.
                drop(page);
                explicit
            }
            None => self.resolve_url_for_audit().await.ok_or_else(|| {
                BridgeError::InvalidUrl(format!(
                    "No URL available for {} audit. Navigate to a page in the browser first",
                    kind
                ))
            })?,
        };

        if url == "about:blank" {
            return Err(BridgeError::InvalidUrl(format!(
                "Cannot run {} audit against about:blank",
                kind
            )));
        }

        tracing::info!(kind = %kind, url = %url, "Running audit");
        self.runner
            .run_audit(&url, kind)
            .await
            .map_err(|e| BridgeError::AuditUpstream(e.to_string()))
    }
}

fn is_auditable(url: &str) -> bool {
    !url.trim().is_empty() && url != "about:blank"
}
