use crate::{BridgeError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Viewport/user-agent preset applied when a page is opened with device
/// emulation. Fields are overridable per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicePreset {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub user_agent: String,
    pub mobile: bool,
    pub touch: bool,
}

pub static DEVICE_PRESETS: Lazy<Vec<DevicePreset>> = Lazy::new(|| {
    vec![
        DevicePreset {
            name: String::from("desktop"),
            width: 1920,
            height: 1080,
            device_scale_factor: 1.0,
            user_agent: String::from(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
            ),
            mobile: false,
            touch: false,
        },
        DevicePreset {
            name: String::from("tablet"),
            width: 768,
            height: 1024,
            device_scale_factor: 2.0,
            user_agent: String::from(
                "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
            ),
            mobile: false,
            touch: true,
        },
        DevicePreset {
            name: String::from("mobile"),
            width: 390,
            height: 844,
            device_scale_factor: 3.0,
            user_agent: String::from(
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
            ),
            mobile: true,
            touch: true,
        },
    ]
});

pub fn device_by_name(name: &str) -> Result<DevicePreset> {
    DEVICE_PRESETS
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name))
        .cloned()
        .ok_or_else(|| {
            BridgeError::ConfigError(format!(
                "Unknown device preset: {}. Use mobile, tablet, or desktop",
                name
            ))
        })
}

/// Fixed latency/throughput tuple for network-condition emulation.
/// Throughput is bytes per second; `offline` zeroes both directions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NetworkConditions {
    pub offline: bool,
    pub latency_ms: f64,
    pub download_bps: f64,
    pub upload_bps: f64,
}

pub fn network_conditions(name: &str) -> Result<NetworkConditions> {
    let conditions = match name.to_ascii_lowercase().as_str() {
        "offline" => NetworkConditions {
            offline: true,
            latency_ms: 0.0,
            download_bps: 0.0,
            upload_bps: 0.0,
        },
        "slow-3g" => NetworkConditions {
            offline: false,
            latency_ms: 400.0,
            download_bps: 500.0 * 1024.0 / 8.0,
            upload_bps: 500.0 * 1024.0 / 8.0,
        },
        "fast-3g" => NetworkConditions {
            offline: false,
            latency_ms: 150.0,
            download_bps: 1.6 * 1024.0 * 1024.0 / 8.0,
            upload_bps: 750.0 * 1024.0 / 8.0,
        },
        "4g" => NetworkConditions {
            offline: false,
            latency_ms: 50.0,
            download_bps: 4.0 * 1024.0 * 1024.0 / 8.0,
            upload_bps: 3.0 * 1024.0 * 1024.0 / 8.0,
        },
        other => {
            return Err(BridgeError::ConfigError(format!(
                "Unknown network preset: {}. Use offline, slow-3g, fast-3g, or 4g",
                other
            )));
        }
    };
    Ok(conditions)
}
