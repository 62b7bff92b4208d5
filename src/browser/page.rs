use crate::devices::{self, NetworkConditions};
use crate::timeouts::{ms, secs};
use crate::{BridgeError, Result};
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
    SetTouchEmulationEnabledParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EmulateNetworkConditionsParams, ErrorReason, Headers, ResourceType,
    SetExtraHttpHeadersParams,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

/// Per-call page setup. Applied in a fixed order: headers, cookies,
/// viewport/device emulation, locale/timezone, network conditions,
/// resource blocking.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageOptions {
    pub headers: HashMap<String, String>,
    pub cookies: Vec<CookieSpec>,
    /// Named preset: `mobile`, `tablet`, or `desktop`.
    pub device: Option<String>,
    pub viewport: Option<ViewportOverride>,
    pub user_agent: Option<String>,
    pub locale: Option<String>,
    pub timezone: Option<String>,
    /// Named preset: `offline`, `slow-3g`, `fast-3g`, `4g`.
    pub network_preset: Option<String>,
    pub block_resources: bool,
    /// Resource types blocked when `block_resources` is set.
    pub blocked_resource_types: Option<Vec<String>>,
    pub wait_for_selector: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub url: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportOverride {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: Option<f64>,
    pub mobile: Option<bool>,
}

const DEFAULT_BLOCKED_TYPES: &[&str] = &["images", "fonts", "media"];

/// Syntax check only; fails fast before any network or process work.
pub fn validate_target_url(raw: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(raw).map_err(|e| BridgeError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(BridgeError::InvalidUrl(format!(
            "unsupported scheme '{}' in {}",
            other, raw
        ))),
    }
}

pub async fn apply_options(page: &Page, options: &PageOptions) -> Result<()> {
    if !options.headers.is_empty() {
        let headers = Headers::new(json!(options.headers));
        page.execute(SetExtraHttpHeadersParams::new(headers))
            .await
            .map_err(|e| BridgeError::Connection(format!("Failed to set headers: {}", e)))?;
    }

    if !options.cookies.is_empty() {
        let mut params = Vec::with_capacity(options.cookies.len());
        for cookie in &options.cookies {
            let mut builder = CookieParam::builder()
                .name(&cookie.name)
                .value(&cookie.value);
            if let Some(domain) = &cookie.domain {
                builder = builder.domain(domain);
            }
            if let Some(url) = &cookie.url {
                builder = builder.url(url);
            }
            if let Some(path) = &cookie.path {
                builder = builder.path(path);
            }
            params.push(
                builder
                    .build()
                    .map_err(|e| BridgeError::ConfigError(format!("Invalid cookie: {}", e)))?,
            );
        }
        page.set_cookies(params)
            .await
            .map_err(|e| BridgeError::Connection(format!("Failed to set cookies: {}", e)))?;
    }

    apply_emulation(page, options).await?;

    if let Some(locale) = &options.locale {
        page.execute(SetLocaleOverrideParams {
            locale: Some(locale.clone()),
        })
        .await
        .map_err(|e| BridgeError::Connection(format!("Failed to set locale: {}", e)))?;
    }

    if let Some(timezone) = &options.timezone {
        page.execute(SetTimezoneOverrideParams {
            timezone_id: timezone.clone(),
        })
        .await
        .map_err(|e| BridgeError::Connection(format!("Failed to set timezone: {}", e)))?;
    }

    if let Some(preset) = &options.network_preset {
        let conditions = devices::network_conditions(preset)?;
        apply_network_conditions(page, conditions).await?;
    }

    if options.block_resources {
        let types = options
            .blocked_resource_types
            .clone()
            .unwrap_or_else(|| DEFAULT_BLOCKED_TYPES.iter().map(|s| s.to_string()).collect());
        enable_resource_blocking(page, &types).await?;
    }

    Ok(())
}

/// Device preset first, then explicit viewport/user-agent overrides.
async fn apply_emulation(page: &Page, options: &PageOptions) -> Result<()> {
    let preset = match &options.device {
        Some(name) => Some(devices::device_by_name(name)?),
        None => None,
    };

    let viewport = options.viewport;
    if preset.is_none() && viewport.is_none() && options.user_agent.is_none() {
        return Ok(());
    }

    let (mut width, mut height, mut scale, mut mobile, touch, mut user_agent) = match &preset {
        Some(p) => (
            p.width,
            p.height,
            p.device_scale_factor,
            p.mobile,
            p.touch,
            Some(p.user_agent.clone()),
        ),
        None => (1280, 720, 1.0, false, false, None),
    };

    if let Some(v) = viewport {
        width = v.width;
        height = v.height;
        if let Some(s) = v.device_scale_factor {
            scale = s;
        }
        if let Some(m) = v.mobile {
            mobile = m;
        }
    }
    if let Some(ua) = &options.user_agent {
        user_agent = Some(ua.clone());
    }

    let metrics = SetDeviceMetricsOverrideParams::builder()
        .width(width as i64)
        .height(height as i64)
        .device_scale_factor(scale)
        .mobile(mobile)
        .build()
        .map_err(BridgeError::ConfigError)?;
    page.execute(metrics)
        .await
        .map_err(|e| BridgeError::Connection(format!("Failed to set viewport: {}", e)))?;

    page.execute(SetTouchEmulationEnabledParams::new(touch))
        .await
        .map_err(|e| BridgeError::Connection(format!("Failed to set touch emulation: {}", e)))?;

    if let Some(ua) = user_agent {
        page.execute(SetUserAgentOverrideParams::new(ua))
            .await
            .map_err(|e| BridgeError::Connection(format!("Failed to set user agent: {}", e)))?;
    }

    Ok(())
}

async fn apply_network_conditions(page: &Page, conditions: NetworkConditions) -> Result<()> {
    let params = EmulateNetworkConditionsParams::builder()
        .offline(conditions.offline)
        .latency(conditions.latency_ms)
        .download_throughput(conditions.download_bps)
        .upload_throughput(conditions.upload_bps)
        .build()
        .map_err(BridgeError::ConfigError)?;
    page.execute(params)
        .await
        .map_err(|e| BridgeError::Connection(format!("Failed to emulate network: {}", e)))?;
    Ok(())
}

/// Intercept requests and fail the blocked resource types. Interception is
/// scoped to this page, which is why pages are never shared across calls.
async fn enable_resource_blocking(page: &Page, types: &[String]) -> Result<()> {
    let blocked: Vec<ResourceType> = types.iter().filter_map(|t| parse_resource_type(t)).collect();
    if blocked.is_empty() {
        return Ok(());
    }

    page.execute(fetch::EnableParams::default())
        .await
        .map_err(|e| BridgeError::Connection(format!("Failed to enable interception: {}", e)))?;

    let mut events = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|e| BridgeError::Connection(format!("Failed to listen for requests: {}", e)))?;

    let interceptor = page.clone();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let request_id = event.request_id.clone();
            let verdict = if blocked.contains(&event.resource_type) {
                interceptor
                    .execute(FailRequestParams::new(request_id, ErrorReason::BlockedByClient))
                    .await
                    .map(|_| ())
            } else {
                interceptor
                    .execute(ContinueRequestParams::new(request_id))
                    .await
                    .map(|_| ())
            };
            if verdict.is_err() {
                // Page is gone; the stream will end shortly.
                break;
            }
        }
    });

    Ok(())
}

fn parse_resource_type(name: &str) -> Option<ResourceType> {
    match name.to_ascii_lowercase().as_str() {
        "image" | "images" => Some(ResourceType::Image),
        "font" | "fonts" => Some(ResourceType::Font),
        "media" => Some(ResourceType::Media),
        "stylesheet" | "stylesheets" | "css" => Some(ResourceType::Stylesheet),
        "script" | "scripts" => Some(ResourceType::Script),
        other => {
            tracing::warn!(resource_type = %other, "Ignoring unknown blocked resource type");
            None
        }
    }
}

pub async fn navigate(page: &Page, url: &str, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, page.goto(url)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(BridgeError::Connection(format!(
            "Navigation to {} failed: {}",
            url, e
        ))),
        Err(_) => Err(BridgeError::NavigationTimeout(timeout.as_secs())),
    }
}

/// Poll for a selector with its own bounded timeout. A miss is logged as a
/// warning and never fails the call.
pub async fn wait_for_selector(page: &Page, selector: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs::SELECTOR_WAIT);
    loop {
        if page.find_element(selector).await.is_ok() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(selector = %selector, "Selector did not appear before timeout");
            return;
        }
        tokio::time::sleep(Duration::from_millis(ms::SELECTOR_POLL)).await;
    }
}
