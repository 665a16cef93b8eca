//! Client configuration and platform defaults

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};

/// Entries matching this pattern are kept local and never synchronized
const DEFAULT_PREVENT_SYNC_PATTERN: &str =
    r"^(\.DS_Store|Thumbs\.db|desktop\.ini|~\$.*|\.~lock\..*#|.*\.tmp|.*\.swp|.*~)$";

/// Default size of the in-memory cache of file blocks, per workspace
pub const DEFAULT_WORKSPACE_STORAGE_CACHE_SIZE: u64 = 512 * 1024 * 1024;

/// Where workspaces get mounted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountpointMountStrategy {
    /// Mount under `base_dir/<workspace name>`
    Directory { base_dir: PathBuf },
    /// Mount as a drive letter (only meaningful on Windows)
    DriveLetter,
    /// Mounting is not available
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkspaceStorageCacheSize {
    Default,
    Custom { size: u64 },
}

impl WorkspaceStorageCacheSize {
    pub fn bytes(self) -> u64 {
        match self {
            WorkspaceStorageCacheSize::Default => DEFAULT_WORKSPACE_STORAGE_CACHE_SIZE,
            WorkspaceStorageCacheSize::Custom { size } => size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Regex of entry names that must not be synchronized, `None` matches nothing
#[derive(Debug, Clone)]
pub struct PreventSyncPattern(Option<Regex>);

impl PreventSyncPattern {
    pub fn from_regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(|regex| Self(Some(regex)))
    }

    pub fn empty() -> Self {
        Self(None)
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.0.as_ref().is_some_and(|regex| regex.is_match(name))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_ref().map_or("", Regex::as_str)
    }
}

impl Default for PreventSyncPattern {
    fn default() -> Self {
        Self::from_regex(DEFAULT_PREVENT_SYNC_PATTERN).unwrap_or_else(|_| Self::empty())
    }
}

impl PartialEq for PreventSyncPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for PreventSyncPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PreventSyncPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Ok(Self::empty());
        }
        Self::from_regex(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Where device key files live (`<config_dir>/devices/`)
    pub config_dir: PathBuf,
    /// Root of the per-device local data (`<data_base_dir>/<device_id>/`)
    pub data_base_dir: PathBuf,
    pub mountpoint_mount_strategy: MountpointMountStrategy,
    pub workspace_storage_cache_size: WorkspaceStorageCacheSize,
    /// Run background connectivity and sync monitors
    pub with_monitors: bool,
    pub prevent_sync_pattern: PreventSyncPattern,
    pub log_level: LogLevel,
}

impl ClientConfig {
    /// Configuration rooted in explicit directories, monitors disabled
    pub fn with_dirs(config_dir: impl Into<PathBuf>, data_base_dir: impl Into<PathBuf>, mountpoint_base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            data_base_dir: data_base_dir.into(),
            mountpoint_mount_strategy: MountpointMountStrategy::Directory {
                base_dir: mountpoint_base_dir.into(),
            },
            workspace_storage_cache_size: WorkspaceStorageCacheSize::Default,
            with_monitors: false,
            prevent_sync_pattern: PreventSyncPattern::default(),
            log_level: LogLevel::Info,
        }
    }

    /// Directory holding the local data of a device
    pub fn device_data_dir(&self, device_id: parsec_types::DeviceID) -> PathBuf {
        self.data_base_dir.join(device_id.hex())
    }

    pub fn mountpoint_base_dir(&self) -> Option<&Path> {
        match &self.mountpoint_mount_strategy {
            MountpointMountStrategy::Directory { base_dir } => Some(base_dir),
            _ => None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            with_monitors: true,
            ..Self::with_dirs(
                get_default_config_dir(),
                get_default_data_base_dir(),
                get_default_mountpoint_base_dir(),
            )
        }
    }
}

fn home_or_current() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn get_default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| home_or_current().join(".config"))
        .join("parsec3")
        .join("libparsec")
}

pub fn get_default_data_base_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| home_or_current().join(".local").join("share"))
        .join("parsec3")
        .join("libparsec")
}

pub fn get_default_mountpoint_base_dir() -> PathBuf {
    home_or_current().join("Parsec3")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Linux,
    MacOS,
    Windows,
    Android,
    Web,
}

pub fn get_platform() -> Platform {
    if cfg!(target_os = "windows") {
        Platform::Windows
    } else if cfg!(target_os = "macos") {
        Platform::MacOS
    } else if cfg!(target_os = "android") {
        Platform::Android
    } else if cfg!(target_arch = "wasm32") {
        Platform::Web
    } else {
        Platform::Linux
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prevent_sync_pattern() {
        let pattern = PreventSyncPattern::default();
        assert!(pattern.is_match(".DS_Store"));
        assert!(pattern.is_match("draft.tmp"));
        assert!(pattern.is_match("~$report.docx"));
        assert!(!pattern.is_match("report.docx"));
        assert!(!PreventSyncPattern::empty().is_match("anything.tmp"));
    }

    #[test]
    fn test_config_serde() {
        let config = ClientConfig::with_dirs("/tmp/config", "/tmp/data", "/tmp/mnt");
        let raw = bincode::serialize(&config).unwrap();
        let loaded: ClientConfig = bincode::deserialize(&raw).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.mountpoint_base_dir(), Some(Path::new("/tmp/mnt")));
    }
}
