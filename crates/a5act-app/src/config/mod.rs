//! Configuration file parsing for the A5 activator
//!
//! Supports `config.toml` in the platform config directory
//! (`~/.config/a5-activator/config.toml` on Linux) or an explicit path.

pub mod settings;
pub mod types;

pub use settings::{
    default_config_path, init_config_file, load_settings, resolve_payload_path, DEFAULT_CONFIG,
};
pub use types::*;
