//! Settings parser for config.toml

use std::path::{Path, PathBuf};

use a5act_core::prelude::*;

use super::types::Settings;

const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "a5-activator";

/// Contents written by [`init_config_file`]
pub const DEFAULT_CONFIG: &str = r#"# A5 Activator Configuration

[compatibility]
supported_models = [
    "iPhone4,1",
    "iPad2,1", "iPad2,2", "iPad2,3", "iPad2,4",
    "iPad2,5", "iPad2,6", "iPad2,7",
    "iPad3,1", "iPad3,2", "iPad3,3",
    "iPod5,1",
]
supported_versions = ["8.4.1", "9.3.5", "9.3.6"]

[payload]
path = "payload"          # relative paths resolve against the executable dir, then the cwd

[device]
tool = "pymobiledevice3"
udid = ""                 # pin to one device
command_timeout_secs = 30

[watcher]
poll_interval_ms = 1000
"#;

/// Default config file location (`<config_dir>/a5-activator/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILENAME))
}

/// Load settings from `path`, or from the default location when `None`
///
/// A missing, unreadable or invalid file yields defaults.
pub fn load_settings(path: Option<&Path>) -> Settings {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => {
                debug!("No config directory on this platform, using defaults");
                return Settings::default();
            }
        },
    };

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Write the default config file if none exists
///
/// Returns `true` when a file was created.
pub fn init_config_file(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::config(format!("Failed to create {:?}: {}", parent, e)))?;
    }

    std::fs::write(path, DEFAULT_CONFIG)
        .map_err(|e| Error::config(format!("Failed to write {:?}: {}", path, e)))?;

    info!("Created default config at {:?}", path);
    Ok(true)
}

/// Resolve the configured payload location
///
/// Absolute paths are used as-is. Relative paths prefer the directory of the
/// running executable (where bundled builds ship the payload), then the
/// current directory.
pub fn resolve_payload_path(configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        return configured.to_path_buf();
    }

    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(configured)));

    match beside_exe {
        Some(path) if path.exists() => path,
        _ => configured.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Settings;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_missing_file() {
        let temp = tempdir().unwrap();
        let settings = load_settings(Some(&temp.path().join("config.toml")));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        let config = r#"
[compatibility]
supported_models = ["iPad2,1"]
supported_versions = ["9.3.5"]

[payload]
path = "/opt/a5/payload"

[device]
udid = "abc123"
command_timeout_secs = 10

[watcher]
poll_interval_ms = 2000
"#;
        std::fs::write(&path, config).unwrap();

        let settings = load_settings(Some(&path));

        assert_eq!(settings.compatibility.supported_models, vec!["iPad2,1"]);
        assert_eq!(settings.payload.path, PathBuf::from("/opt/a5/payload"));
        assert_eq!(settings.device.udid.as_deref(), Some("abc123"));
        assert_eq!(settings.device.command_timeout_secs, 10);
        assert_eq!(settings.watcher.poll_interval_ms, 2000);
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[compatibility\nsupported_models = 3").unwrap();

        let settings = load_settings(Some(&path));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_default_config_parses_to_defaults() {
        let settings: Settings = toml::from_str(DEFAULT_CONFIG).unwrap();
        let defaults = Settings::default();

        assert_eq!(settings.compatibility, defaults.compatibility);
        assert_eq!(settings.payload, defaults.payload);
        assert_eq!(settings.watcher, defaults.watcher);
        assert_eq!(settings.device.udid.as_deref(), Some(""));
    }

    #[test]
    fn test_init_config_file_creates_once() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        assert!(init_config_file(&path).unwrap());
        assert!(path.exists());
        assert!(!init_config_file(&path).unwrap());
    }

    #[test]
    fn test_resolve_absolute_payload_path() {
        let temp = tempdir().unwrap();
        let payload = temp.path().join("payload");
        assert_eq!(resolve_payload_path(&payload), payload);
    }

    #[test]
    fn test_resolve_relative_payload_falls_back_to_cwd() {
        let path = Path::new("a5act-no-such-payload");
        assert_eq!(resolve_payload_path(path), PathBuf::from("a5act-no-such-payload"));
    }
}
