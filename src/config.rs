use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3025;

/// Startup configuration, loaded once from TOML + environment + CLI overrides.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub logs: Settings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    /// Order in which browsers are considered during discovery.
    #[serde(default = "default_preferred_order")]
    pub preferred_order: Vec<String>,
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_secs: u64,
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,
    /// Explicit executable path per browser name, tried before any discovery.
    #[serde(default)]
    pub custom_paths: BTreeMap<String, PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            preferred_order: default_preferred_order(),
            cleanup_timeout_secs: default_cleanup_timeout(),
            navigation_timeout_secs: default_navigation_timeout(),
            custom_paths: BTreeMap::new(),
        }
    }
}

/// Runtime-mutable settings read on every log ingestion and query.
///
/// Initialized with defaults at startup; the extension may push partial
/// updates through `POST /extension-log` which are merged shallowly.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_log_limit")]
    pub log_limit: usize,
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
    #[serde(default)]
    pub show_request_headers: bool,
    #[serde(default)]
    pub show_response_headers: bool,
    #[serde(default = "default_string_size_limit")]
    pub string_size_limit: usize,
    #[serde(default = "default_max_log_size")]
    pub max_log_size: usize,
    #[serde(default)]
    pub screenshot_path: Option<PathBuf>,
    #[serde(default = "default_host")]
    pub server_host: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_limit: default_log_limit(),
            query_limit: default_query_limit(),
            show_request_headers: false,
            show_response_headers: false,
            string_size_limit: default_string_size_limit(),
            max_log_size: default_max_log_size(),
            screenshot_path: None,
            server_host: default_host(),
        }
    }
}

/// Partial settings payload as sent by the extension.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub log_limit: Option<usize>,
    pub query_limit: Option<usize>,
    pub show_request_headers: Option<bool>,
    pub show_response_headers: Option<bool>,
    pub string_size_limit: Option<usize>,
    pub max_log_size: Option<usize>,
    pub screenshot_path: Option<PathBuf>,
    pub server_host: Option<String>,
}

impl Settings {
    /// Shallow merge: only fields present in the update are overwritten.
    /// Values are not validated beyond presence.
    pub fn merge(&mut self, update: SettingsUpdate) {
        if let Some(v) = update.log_limit {
            self.log_limit = v;
        }
        if let Some(v) = update.query_limit {
            self.query_limit = v;
        }
        if let Some(v) = update.show_request_headers {
            self.show_request_headers = v;
        }
        if let Some(v) = update.show_response_headers {
            self.show_response_headers = v;
        }
        if let Some(v) = update.string_size_limit {
            self.string_size_limit = v;
        }
        if let Some(v) = update.max_log_size {
            self.max_log_size = v;
        }
        if let Some(v) = update.screenshot_path {
            self.screenshot_path = Some(v);
        }
        if let Some(v) = update.server_host {
            self.server_host = v;
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_preferred_order() -> Vec<String> {
    vec![
        "chrome".to_string(),
        "chromium".to_string(),
        "edge".to_string(),
        "brave".to_string(),
    ]
}
fn default_cleanup_timeout() -> u64 {
    crate::timeouts::secs::BROWSER_CLEANUP
}
fn default_navigation_timeout() -> u64 {
    crate::timeouts::secs::NAVIGATION
}
fn default_log_limit() -> usize {
    50
}
fn default_query_limit() -> usize {
    30000
}
fn default_string_size_limit() -> usize {
    500
}
fn default_max_log_size() -> usize {
    20000
}

pub fn default_config_dir() -> Result<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".config"))
        })
        .map(|p| p.join("browser-telemetry-bridge"))
        .ok_or_else(|| BridgeError::ConfigError("Could not determine config directory".into()))
}

pub fn default_config_path() -> Result<PathBuf> {
    default_config_dir().map(|p| p.join("config.toml"))
}

impl Config {
    pub fn load(path_override: Option<PathBuf>) -> Result<Self> {
        let mut config = Self::default();

        let path = match path_override {
            Some(p) => p,
            None => default_config_path()?,
        };
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            config = toml::from_str(&content)?;
        }

        config.load_from_env();

        Ok(config)
    }

    fn load_from_env(&mut self) {
        if let Ok(port) = std::env::var("PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(host) = std::env::var("SERVER_HOST") {
            self.server.host = host.clone();
            self.logs.server_host = host;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.logs.log_limit == 0 {
            return Err(BridgeError::ConfigError(
                "log_limit must be greater than 0".into(),
            ));
        }
        if self.browser.navigation_timeout_secs == 0 {
            return Err(BridgeError::ConfigError(
                "navigation_timeout_secs must be greater than 0".into(),
            ));
        }
        for (name, path) in &self.browser.custom_paths {
            if path.as_os_str().is_empty() {
                return Err(BridgeError::ConfigError(format!(
                    "custom path for '{}' is empty",
                    name
                )));
            }
        }
        Ok(())
    }
}
