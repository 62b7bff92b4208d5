use crate::config::BrowserConfig;
use crate::{BridgeError, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// OS primitives injected into discovery strategies so each one is
/// testable independently of the OS it targets.
pub trait SystemProbe: Send + Sync {
    fn path_exists(&self, path: &Path) -> bool;
    fn run_command(&self, program: &str, args: &[&str]) -> Option<String>;
    fn locate_in_path(&self, binary: &str) -> Option<PathBuf>;
}

pub struct RealProbe;

impl SystemProbe for RealProbe {
    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn run_command(&self, program: &str, args: &[&str]) -> Option<String> {
        let output = std::process::Command::new(program).args(args).output().ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn locate_in_path(&self, binary: &str) -> Option<PathBuf> {
        which::which(binary).ok()
    }
}

/// Resolves a browser executable. Strategies in priority order, first hit
/// wins: explicit configured paths, a previously discovered cached path,
/// a launcher-utility probe over PATH, then OS-native lookup and fixed
/// well-known install locations.
pub struct BrowserLocator {
    config: BrowserConfig,
    cache: Mutex<Option<PathBuf>>,
    probe: Box<dyn SystemProbe>,
}

impl BrowserLocator {
    pub fn new(config: BrowserConfig) -> Self {
        Self::with_probe(config, Box::new(RealProbe))
    }

    pub fn with_probe(config: BrowserConfig, probe: Box<dyn SystemProbe>) -> Self {
        Self {
            config,
            cache: Mutex::new(None),
            probe,
        }
    }

    pub fn discover(&self) -> Result<PathBuf> {
        // 1. Explicit custom paths, in the caller's preferred-browser order.
        for name in &self.config.preferred_order {
            if let Some(path) = self.config.custom_paths.get(name)
                && self.probe.path_exists(path)
            {
                tracing::debug!(browser = %name, path = %path.display(), "Using configured browser path");
                return Ok(path.clone());
            }
        }

        // 2. Previously discovered path, if still present.
        if let Some(cached) = self.cache.lock().expect("locator cache poisoned").clone()
            && self.probe.path_exists(&cached)
        {
            return Ok(cached);
        }

        // 3. Launcher utility probe over PATH.
        for name in &self.config.preferred_order {
            for binary in binary_names(name) {
                if let Some(path) = self.probe.locate_in_path(binary) {
                    return Ok(self.remember(path));
                }
            }
        }

        // 4. OS-native lookup and well-known install locations.
        for candidate in native_candidates(self.probe.as_ref(), &self.config.preferred_order) {
            if self.probe.path_exists(&candidate) {
                return Ok(self.remember(candidate));
            }
        }

        Err(BridgeError::NoBrowserFound)
    }

    fn remember(&self, path: PathBuf) -> PathBuf {
        tracing::info!(path = %path.display(), "Browser executable discovered");
        *self.cache.lock().expect("locator cache poisoned") = Some(path.clone());
        path
    }
}

/// PATH binary names per browser, most specific first.
fn binary_names(browser: &str) -> &'static [&'static str] {
    match browser {
        "chrome" => &["google-chrome", "google-chrome-stable", "chrome"],
        "chromium" => &["chromium", "chromium-browser"],
        "edge" => &["microsoft-edge", "microsoft-edge-stable", "msedge"],
        "brave" => &["brave-browser", "brave"],
        _ => &[],
    }
}

#[cfg(target_os = "windows")]
fn native_candidates(probe: &dyn SystemProbe, browsers: &[String]) -> Vec<PathBuf> {
    windows_candidates(probe, browsers)
}

#[cfg(target_os = "macos")]
fn native_candidates(_probe: &dyn SystemProbe, browsers: &[String]) -> Vec<PathBuf> {
    macos_candidates(browsers)
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn native_candidates(probe: &dyn SystemProbe, browsers: &[String]) -> Vec<PathBuf> {
    linux_candidates(probe, browsers)
}

/// Windows lookup: App Paths registry keys (HKLM then HKCU), a version
/// beacon key implying a default install, then fixed Program Files paths.
pub fn windows_candidates(probe: &dyn SystemProbe, browsers: &[String]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    for browser in browsers {
        let exe = match browser.as_str() {
            "chrome" | "chromium" => "chrome.exe",
            "edge" => "msedge.exe",
            "brave" => "brave.exe",
            _ => continue,
        };

        for hive in ["HKLM", "HKCU"] {
            let key = format!(
                r"{}\SOFTWARE\Microsoft\Windows\CurrentVersion\App Paths\{}",
                hive, exe
            );
            if let Some(output) = probe.run_command("reg", &["query", &key, "/ve"])
                && let Some(path) = parse_reg_default_value(&output)
            {
                candidates.push(PathBuf::from(path));
            }
        }

        if browser == "chrome" {
            // Version beacon only confirms an install; the path is implied.
            let beacon = r"HKCU\Software\Google\Chrome\BLBeacon";
            if probe
                .run_command("reg", &["query", beacon, "/v", "version"])
                .is_some()
            {
                candidates.push(PathBuf::from(
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                ));
                candidates.push(PathBuf::from(
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ));
            }
        }

        candidates.extend(windows_fixed_paths(browser));
    }

    candidates
}

fn windows_fixed_paths(browser: &str) -> Vec<PathBuf> {
    let paths: &[&str] = match browser {
        "chrome" => &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ],
        "chromium" => &[r"C:\Program Files\Chromium\Application\chrome.exe"],
        "edge" => &[
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
        ],
        "brave" => &[r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe"],
        _ => &[],
    };
    paths.iter().map(PathBuf::from).collect()
}

/// Parse `reg query ... /ve` output: the default value is the last
/// REG_SZ column on the value line.
fn parse_reg_default_value(output: &str) -> Option<String> {
    for line in output.lines() {
        if let Some(idx) = line.find("REG_SZ") {
            let value = line[idx + "REG_SZ".len()..].trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// macOS lookup: fixed application-bundle paths per browser. Safari is
/// deliberately absent: it has no devtools-compatible control channel.
pub fn macos_candidates(browsers: &[String]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for browser in browsers {
        let paths: &[&str] = match browser.as_str() {
            "chrome" => &[
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
            ],
            "chromium" => &["/Applications/Chromium.app/Contents/MacOS/Chromium"],
            "edge" => &["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"],
            "brave" => &["/Applications/Brave Browser.app/Contents/MacOS/Brave Browser"],
            _ => &[],
        };
        candidates.extend(paths.iter().map(PathBuf::from));
    }
    candidates
}

/// Linux lookup: shell `command -v` probes over known binary names, then
/// fixed alternative install paths.
pub fn linux_candidates(probe: &dyn SystemProbe, browsers: &[String]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    for browser in browsers {
        for binary in binary_names(browser) {
            for lookup in ["command -v", "which", "type -p"] {
                if let Some(output) =
                    probe.run_command("sh", &["-c", &format!("{} {}", lookup, binary)])
                {
                    let path = output.trim();
                    if !path.is_empty() {
                        candidates.push(PathBuf::from(path));
                        break;
                    }
                }
            }
        }
    }

    for browser in browsers {
        let paths: &[&str] = match browser.as_str() {
            "chrome" => &["/usr/bin/google-chrome", "/usr/bin/google-chrome-stable", "/opt/google/chrome/chrome"],
            "chromium" => &["/usr/bin/chromium", "/usr/bin/chromium-browser", "/snap/bin/chromium"],
            "edge" => &["/usr/bin/microsoft-edge", "/opt/microsoft/msedge/msedge"],
            "brave" => &["/usr/bin/brave-browser", "/opt/brave.com/brave/brave-browser"],
            _ => &[],
        };
        candidates.extend(paths.iter().map(PathBuf::from));
    }

    candidates
}
