use std::path::PathBuf;

/// Path convention the target string should follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Wsl,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        #[cfg(target_os = "windows")]
        {
            Platform::Windows
        }
        #[cfg(target_os = "macos")]
        {
            Platform::MacOs
        }
        #[cfg(target_os = "linux")]
        {
            if is_wsl() {
                Platform::Wsl
            } else {
                Platform::Linux
            }
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            Platform::Linux
        }
    }
}

#[cfg(target_os = "linux")]
fn is_wsl() -> bool {
    std::fs::read_to_string("/proc/version")
        .map(|v| v.to_lowercase().contains("microsoft"))
        .unwrap_or(false)
}

/// Convert a path string to the convention of `platform`.
///
/// Handles the prefix patterns extensions are known to send: WSL mounts
/// (`/mnt/c/...`), Git-Bash style drive roots (`/c/...`), Windows drive
/// paths with either slash, and UNC paths (left untouched). Unix-native
/// platforms receive the string unchanged.
pub fn convert_path(path: &str, platform: Platform) -> String {
    match platform {
        Platform::MacOs | Platform::Linux => path.to_string(),
        Platform::Windows => {
            if path.starts_with("\\\\") {
                // UNC path, already Windows-native
                return path.to_string();
            }
            if let Some(rest) = strip_unix_drive_prefix(path) {
                let (drive, tail) = rest;
                return format!("{}:\\{}", drive.to_ascii_uppercase(), tail.replace('/', "\\"));
            }
            if is_windows_drive_path(path) {
                return path.replace('/', "\\");
            }
            path.to_string()
        }
        Platform::Wsl => {
            if is_windows_drive_path(path) {
                let drive = path.chars().next().expect("drive letter checked");
                let tail = path[2..].trim_start_matches(['\\', '/']).replace('\\', "/");
                return format!("/mnt/{}/{}", drive.to_ascii_lowercase(), tail);
            }
            path.to_string()
        }
    }
}

/// `/mnt/c/foo` or `/c/foo` -> `(c, "foo")`.
fn strip_unix_drive_prefix(path: &str) -> Option<(char, &str)> {
    let rest = path.strip_prefix("/mnt/").or_else(|| path.strip_prefix("/"))?;
    let mut chars = rest.chars();
    let drive = chars.next()?;
    if !drive.is_ascii_alphabetic() {
        return None;
    }
    match chars.next() {
        Some('/') => Some((drive, &rest[2..])),
        None => Some((drive, "")),
        _ => None,
    }
}

fn is_windows_drive_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Default screenshot target when neither the extension nor configuration
/// names one.
pub fn downloads_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Timestamped screenshot filename, filesystem-safe on every platform.
pub fn screenshot_filename() -> String {
    format!(
        "screenshot-{}.png",
        chrono::Local::now().format("%Y-%m-%dT%H-%M-%S-%3f")
    )
}
