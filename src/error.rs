use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Chrome extension not connected")]
    NoConnection,

    #[error("Screenshot capture timed out")]
    CaptureTimeout,

    #[error("No available port found in range {start}..{end}")]
    PortExhausted { start: u16, end: u16 },

    #[error("Failed to launch browser: {0}")]
    BrowserLaunch(String),

    #[error("No supported browser found. Configure a custom executable path")]
    NoBrowserFound,

    #[error("Screenshot save failed: {0}")]
    FileSystem(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Audit failed: {0}")]
    AuditUpstream(String),

    #[error("Navigation timeout after {0}s")]
    NavigationTimeout(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeError(#[from] toml::de::Error),
}

impl BridgeError {
    /// HTTP status the variant should surface as when it reaches a handler.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoConnection => 503,
            Self::CaptureTimeout | Self::NavigationTimeout(_) => 504,
            Self::InvalidUrl(_) => 400,
            Self::NoBrowserFound | Self::ConfigError(_) => 422,
            Self::AuditUpstream(_)
            | Self::BrowserLaunch(_)
            | Self::FileSystem(_)
            | Self::Connection(_)
            | Self::PortExhausted { .. }
            | Self::IoError(_)
            | Self::JsonError(_)
            | Self::TomlDeError(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_connection_message_names_extension() {
        let err = BridgeError::NoConnection;
        assert_eq!(err.to_string(), "Chrome extension not connected");
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_invalid_url_is_client_error() {
        let err = BridgeError::InvalidUrl("not a url".into());
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_audit_upstream_is_server_error() {
        let err = BridgeError::AuditUpstream("lighthouse crashed".into());
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("lighthouse crashed"));
    }
}
