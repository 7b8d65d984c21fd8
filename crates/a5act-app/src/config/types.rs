//! Configuration types for the A5 activator
//!
//! Defines `Settings` and its sections. Every field has a default, so a
//! partial file only overrides what it names.

use std::path::PathBuf;
use std::time::Duration;

use a5act_core::{Whitelist, DEFAULT_SUPPORTED_MODELS, DEFAULT_SUPPORTED_VERSIONS};
use a5act_device::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_TOOL};
use serde::{Deserialize, Serialize};

/// Minimum watcher poll interval, to keep the device tool from being hammered
pub const WATCHER_POLL_MIN_MS: u64 = 250;

/// Application settings (config.toml)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub compatibility: CompatibilitySettings,

    #[serde(default)]
    pub payload: PayloadSettings,

    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,
}

/// Supported device models and OS versions
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CompatibilitySettings {
    #[serde(default = "default_models")]
    pub supported_models: Vec<String>,

    #[serde(default = "default_versions")]
    pub supported_versions: Vec<String>,
}

impl Default for CompatibilitySettings {
    fn default() -> Self {
        Self {
            supported_models: default_models(),
            supported_versions: default_versions(),
        }
    }
}

impl CompatibilitySettings {
    pub fn whitelist(&self) -> Whitelist {
        Whitelist::new(
            self.supported_models.iter().cloned(),
            self.supported_versions.iter().cloned(),
        )
    }
}

fn default_models() -> Vec<String> {
    DEFAULT_SUPPORTED_MODELS.iter().map(|s| s.to_string()).collect()
}

fn default_versions() -> Vec<String> {
    DEFAULT_SUPPORTED_VERSIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Activation payload location
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PayloadSettings {
    /// Relative paths resolve against the executable directory, then the cwd
    #[serde(default = "default_payload_path")]
    pub path: PathBuf,
}

impl Default for PayloadSettings {
    fn default() -> Self {
        Self {
            path: default_payload_path(),
        }
    }
}

fn default_payload_path() -> PathBuf {
    PathBuf::from("payload")
}

/// Device tool settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceSettings {
    /// Device tool command
    #[serde(default = "default_tool")]
    pub tool: String,

    /// Pin to one device; empty means "whichever is attached"
    #[serde(default)]
    pub udid: Option<String>,

    /// Timeout for a single tool invocation
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            udid: None,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl DeviceSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

fn default_tool() -> String {
    DEFAULT_TOOL.to_string()
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_secs()
}

/// Device watcher settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WatcherSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WatcherSettings {
    /// Poll interval, clamped to [`WATCHER_POLL_MIN_MS`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(WATCHER_POLL_MIN_MS))
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.compatibility.supported_models.len(), 12);
        assert_eq!(
            settings.compatibility.supported_versions,
            vec!["8.4.1", "9.3.5", "9.3.6"]
        );
        assert_eq!(settings.payload.path, PathBuf::from("payload"));
        assert_eq!(settings.device.tool, "pymobiledevice3");
        assert_eq!(settings.watcher.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_poll_interval_clamped() {
        let watcher = WatcherSettings {
            poll_interval_ms: 10,
        };
        assert_eq!(
            watcher.poll_interval(),
            Duration::from_millis(WATCHER_POLL_MIN_MS)
        );
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let settings: Settings = toml::from_str(
            r#"
[compatibility]
supported_versions = ["9.3.5"]
"#,
        )
        .unwrap();

        assert_eq!(settings.compatibility.supported_versions, vec!["9.3.5"]);
        assert_eq!(settings.compatibility.supported_models.len(), 12);
        assert_eq!(settings.device, DeviceSettings::default());
    }

    #[test]
    fn test_whitelist_from_settings() {
        let compat = CompatibilitySettings {
            supported_models: vec!["iPad2,1".to_string()],
            supported_versions: vec!["9.3.5".to_string()],
        };
        let whitelist = compat.whitelist();
        assert!(whitelist.supported_models.contains("iPad2,1"));
        assert_eq!(whitelist.supported_versions.len(), 1);
    }
}
