use crate::config::Settings;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Which bounded sequence a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    ConsoleLogs,
    ConsoleErrors,
    NetworkErrors,
    NetworkSuccess,
}

#[derive(Debug, Default)]
struct LogStore {
    console_logs: VecDeque<Value>,
    console_errors: VecDeque<Value>,
    network_errors: VecDeque<Value>,
    network_success: VecDeque<Value>,
    current_url: Option<String>,
    current_tab_id: Option<String>,
    selected_element: Option<Value>,
}

/// Bounded, mutation-safe store of console/network events plus the
/// currently-known page URL, tab and selected element.
///
/// Ingestion never errors: malformed or unrecognized events are logged and
/// dropped so the feeding connection stays alive.
pub struct LogAggregator {
    store: RwLock<LogStore>,
    settings: Arc<RwLock<Settings>>,
}

impl LogAggregator {
    pub fn new(settings: Arc<RwLock<Settings>>) -> Self {
        Self {
            store: RwLock::new(LogStore::default()),
            settings,
        }
    }

    /// Ingest one event. Dispatches on the `type` field; appends to the
    /// matching bounded sequence, evicting the oldest entry on overflow.
    pub async fn ingest(&self, entry: Value) {
        let Some(kind) = entry.get("type").and_then(Value::as_str).map(str::to_owned) else {
            tracing::warn!("Dropping log event without a type field");
            return;
        };

        let (log_limit, string_limit, max_size) = {
            let s = self.settings.read().await;
            (s.log_limit, s.string_size_limit, s.max_log_size)
        };

        match kind.as_str() {
            "console-log" | "console-error" | "network-request" => {
                let mut entry = entry;
                truncate_strings(&mut entry, string_limit);

                let serialized_len = entry.to_string().len();
                if serialized_len > max_size {
                    tracing::warn!(
                        kind = %kind,
                        size = serialized_len,
                        limit = max_size,
                        "Dropping oversized log entry"
                    );
                    return;
                }

                let mut store = self.store.write().await;
                let seq = match kind.as_str() {
                    "console-log" => &mut store.console_logs,
                    "console-error" => &mut store.console_errors,
                    _ => {
                        let status = entry
                            .get("status")
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                        if status >= 400 {
                            &mut store.network_errors
                        } else {
                            &mut store.network_success
                        }
                    }
                };
                seq.push_back(entry);
                while seq.len() > log_limit {
                    seq.pop_front();
                }
            }
            "selected-element" => {
                let element = entry.get("element").cloned().unwrap_or(entry);
                self.store.write().await.selected_element = Some(element);
            }
            "page-navigated" => {
                let url = entry.get("url").and_then(Value::as_str).map(str::to_owned);
                let tab_id = entry
                    .get("tabId")
                    .map(|v| v.to_string().trim_matches('"').to_owned());
                if let Some(url) = url {
                    self.update_current_url(url, tab_id, Some("page-navigated".into()))
                        .await;
                }
            }
            other => {
                tracing::warn!(kind = %other, "Ignoring unknown log event type");
            }
        }
    }

    /// Overwrite the currently-known URL. Always succeeds; both the HTTP
    /// endpoint and the extension socket feed this so either channel keeps
    /// the URL fresh. Returns the previous value.
    pub async fn update_current_url(
        &self,
        url: String,
        tab_id: Option<String>,
        source: Option<String>,
    ) -> Option<String> {
        let mut store = self.store.write().await;
        let old = store.current_url.replace(url.clone());
        if let Some(tab_id) = tab_id {
            store.current_tab_id = Some(tab_id);
        }
        tracing::debug!(
            url = %url,
            source = source.as_deref().unwrap_or("http"),
            "Current URL updated"
        );
        old
    }

    pub async fn current_url(&self) -> Option<String> {
        self.store.read().await.current_url.clone()
    }

    pub async fn current_tab_id(&self) -> Option<String> {
        self.store.read().await.current_tab_id.clone()
    }

    pub async fn set_selected_element(&self, element: Value) {
        self.store.write().await.selected_element = Some(element);
    }

    pub async fn selected_element(&self) -> Option<Value> {
        self.store.read().await.selected_element.clone()
    }

    /// Return a settings-processed view of one sequence, truncated by
    /// cumulative serialized size against `query_limit`. Entries are taken
    /// in order until the next one would exceed the byte budget; later
    /// entries are silently dropped.
    pub async fn query(&self, kind: LogKind) -> Vec<Value> {
        let settings = self.settings.read().await.clone();
        let store = self.store.read().await;
        let seq = match kind {
            LogKind::ConsoleLogs => &store.console_logs,
            LogKind::ConsoleErrors => &store.console_errors,
            LogKind::NetworkErrors => &store.network_errors,
            LogKind::NetworkSuccess => &store.network_success,
        };
        let processed: Vec<Value> = seq
            .iter()
            .map(|e| apply_header_settings(e.clone(), &settings))
            .collect();
        truncate_to_budget(processed, settings.query_limit)
    }

    /// Success and error network entries interleaved by timestamp, then
    /// truncated the same way `query` truncates.
    pub async fn merged_network(&self) -> Vec<Value> {
        let settings = self.settings.read().await.clone();
        let store = self.store.read().await;

        let mut merged: Vec<Value> = store
            .network_success
            .iter()
            .chain(store.network_errors.iter())
            .map(|e| apply_header_settings(e.clone(), &settings))
            .collect();
        merged.sort_by(|a, b| {
            timestamp_of(a)
                .partial_cmp(&timestamp_of(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        truncate_to_budget(merged, settings.query_limit)
    }

    /// Empty every sequence and clear the selected element. Idempotent.
    pub async fn clear_all(&self) {
        let mut store = self.store.write().await;
        store.console_logs.clear();
        store.console_errors.clear();
        store.network_errors.clear();
        store.network_success.clear();
        store.selected_element = None;
        tracing::info!("All logs wiped");
    }

    pub async fn counts(&self) -> (usize, usize, usize, usize) {
        let store = self.store.read().await;
        (
            store.console_logs.len(),
            store.console_errors.len(),
            store.network_errors.len(),
            store.network_success.len(),
        )
    }
}

fn timestamp_of(entry: &Value) -> f64 {
    entry
        .get("timestamp")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

fn apply_header_settings(mut entry: Value, settings: &Settings) -> Value {
    if let Some(obj) = entry.as_object_mut() {
        if !settings.show_request_headers {
            obj.remove("requestHeaders");
        }
        if !settings.show_response_headers {
            obj.remove("responseHeaders");
        }
    }
    entry
}

fn truncate_to_budget(entries: Vec<Value>, query_limit: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(entries.len());
    let mut used = 0usize;
    for entry in entries {
        let size = entry.to_string().len();
        if used + size > query_limit {
            break;
        }
        used += size;
        out.push(entry);
    }
    out
}

/// Recursively truncate string fields longer than `limit` characters.
fn truncate_strings(value: &mut Value, limit: usize) {
    match value {
        Value::String(s) => {
            if s.chars().count() > limit {
                let mut truncated: String = s.chars().take(limit).collect();
                truncated.push_str("... [truncated]");
                *s = truncated;
            }
        }
        Value::Array(items) => {
            for item in items {
                truncate_strings(item, limit);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                truncate_strings(v, limit);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn aggregator_with(settings: Settings) -> LogAggregator {
        LogAggregator::new(Arc::new(RwLock::new(settings)))
    }

    fn console_error(i: usize) -> Value {
        json!({
            "type": "console-error",
            "level": "error",
            "message": format!("error {}", i),
            "timestamp": i,
        })
    }

    #[tokio::test]
    async fn test_bounded_eviction_keeps_most_recent() {
        let agg = aggregator_with(Settings {
            log_limit: 50,
            ..Settings::default()
        });

        for i in 0..55 {
            agg.ingest(console_error(i)).await;
        }

        let entries = agg.query(LogKind::ConsoleErrors).await;
        assert_eq!(entries.len(), 50);
        assert_eq!(entries[0]["message"], "error 5");
        assert_eq!(entries[49]["message"], "error 54");
    }

    #[tokio::test]
    async fn test_end_to_end_sixty_ingests_fifty_kept() {
        let agg = aggregator_with(Settings::default());

        for i in 0..60 {
            agg.ingest(json!({
                "type": "console-error",
                "level": "error",
                "message": "x",
                "timestamp": i + 1,
            }))
            .await;
        }

        let entries = agg.query(LogKind::ConsoleErrors).await;
        assert_eq!(entries.len(), 50);
        // oldest 10 evicted
        assert_eq!(entries[0]["timestamp"], 11);
    }

    #[tokio::test]
    async fn test_unknown_type_ignored_without_error() {
        let agg = aggregator_with(Settings::default());
        agg.ingest(json!({"type": "mystery", "payload": 1})).await;
        agg.ingest(json!({"no_type_at_all": true})).await;

        let (logs, errors, nerr, nok) = agg.counts().await;
        assert_eq!((logs, errors, nerr, nok), (0, 0, 0, 0));
    }

    #[tokio::test]
    async fn test_network_split_by_status() {
        let agg = aggregator_with(Settings::default());
        agg.ingest(json!({"type": "network-request", "url": "http://a", "status": 200, "timestamp": 1}))
            .await;
        agg.ingest(json!({"type": "network-request", "url": "http://b", "status": 404, "timestamp": 2}))
            .await;
        agg.ingest(json!({"type": "network-request", "url": "http://c", "status": 500, "timestamp": 3}))
            .await;

        let (_, _, nerr, nok) = agg.counts().await;
        assert_eq!(nerr, 2);
        assert_eq!(nok, 1);
    }

    #[tokio::test]
    async fn test_headers_stripped_unless_enabled() {
        let agg = aggregator_with(Settings::default());
        agg.ingest(json!({
            "type": "network-request",
            "url": "http://a",
            "status": 200,
            "timestamp": 1,
            "requestHeaders": {"authorization": "secret"},
            "responseHeaders": {"content-type": "text/html"},
        }))
        .await;

        let entries = agg.query(LogKind::NetworkSuccess).await;
        assert!(entries[0].get("requestHeaders").is_none());
        assert!(entries[0].get("responseHeaders").is_none());

        let agg = aggregator_with(Settings {
            show_request_headers: true,
            show_response_headers: true,
            ..Settings::default()
        });
        agg.ingest(json!({
            "type": "network-request",
            "url": "http://a",
            "status": 200,
            "timestamp": 1,
            "requestHeaders": {"authorization": "secret"},
        }))
        .await;
        let entries = agg.query(LogKind::NetworkSuccess).await;
        assert!(entries[0].get("requestHeaders").is_some());
    }

    #[tokio::test]
    async fn test_truncation_is_prefix_and_within_budget() {
        let agg = aggregator_with(Settings {
            query_limit: 200,
            ..Settings::default()
        });
        for i in 0..20 {
            agg.ingest(console_error(i)).await;
        }

        let truncated = agg.query(LogKind::ConsoleErrors).await;
        let serialized: usize = truncated.iter().map(|e| e.to_string().len()).sum();
        assert!(serialized <= 200);
        assert!(truncated.len() < 20);

        // strict prefix of the full processed sequence
        let full = aggregator_with(Settings::default());
        for i in 0..20 {
            full.ingest(console_error(i)).await;
        }
        let full = full.query(LogKind::ConsoleErrors).await;
        for (i, entry) in truncated.iter().enumerate() {
            assert_eq!(entry, &full[i]);
        }
    }

    #[tokio::test]
    async fn test_merged_network_sorted_by_timestamp() {
        let agg = aggregator_with(Settings::default());
        agg.ingest(json!({"type": "network-request", "url": "http://ok", "status": 200, "timestamp": 5}))
            .await;
        agg.ingest(json!({"type": "network-request", "url": "http://err", "status": 500, "timestamp": 2}))
            .await;
        agg.ingest(json!({"type": "network-request", "url": "http://ok2", "status": 200, "timestamp": 9}))
            .await;

        let merged = agg.merged_network().await;
        let stamps: Vec<f64> = merged.iter().map(timestamp_of).collect();
        assert_eq!(stamps, vec![2.0, 5.0, 9.0]);
    }

    #[tokio::test]
    async fn test_clear_all_idempotent() {
        let agg = aggregator_with(Settings::default());
        for i in 0..5 {
            agg.ingest(console_error(i)).await;
        }
        agg.set_selected_element(json!({"tag": "div"})).await;

        agg.clear_all().await;
        agg.clear_all().await;

        let (a, b, c, d) = agg.counts().await;
        assert_eq!((a, b, c, d), (0, 0, 0, 0));
        assert!(agg.selected_element().await.is_none());
    }

    #[tokio::test]
    async fn test_current_url_overwrite_returns_old() {
        let agg = aggregator_with(Settings::default());
        let old = agg
            .update_current_url("https://one.test".into(), None, None)
            .await;
        assert!(old.is_none());

        let old = agg
            .update_current_url("https://two.test".into(), Some("7".into()), Some("tab".into()))
            .await;
        assert_eq!(old.as_deref(), Some("https://one.test"));
        assert_eq!(agg.current_url().await.as_deref(), Some("https://two.test"));
        assert_eq!(agg.current_tab_id().await.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_long_strings_truncated_on_ingest() {
        let agg = aggregator_with(Settings {
            string_size_limit: 10,
            ..Settings::default()
        });
        agg.ingest(json!({
            "type": "console-log",
            "level": "info",
            "message": "abcdefghijklmnopqrstuvwxyz",
            "timestamp": 1,
        }))
        .await;

        let entries = agg.query(LogKind::ConsoleLogs).await;
        let message = entries[0]["message"].as_str().unwrap();
        assert!(message.starts_with("abcdefghij"));
        assert!(message.ends_with("[truncated]"));
    }

    #[tokio::test]
    async fn test_oversized_entry_dropped() {
        let agg = aggregator_with(Settings {
            max_log_size: 80,
            string_size_limit: 10_000,
            ..Settings::default()
        });
        agg.ingest(json!({
            "type": "console-log",
            "level": "info",
            "message": "x".repeat(200),
            "timestamp": 1,
        }))
        .await;

        let (logs, _, _, _) = agg.counts().await;
        assert_eq!(logs, 0);
    }

    #[tokio::test]
    async fn test_page_navigated_updates_url() {
        let agg = aggregator_with(Settings::default());
        agg.ingest(json!({"type": "page-navigated", "url": "https://nav.test", "tabId": 3}))
            .await;
        assert_eq!(agg.current_url().await.as_deref(), Some("https://nav.test"));
        assert_eq!(agg.current_tab_id().await.as_deref(), Some("3"));
    }
}
