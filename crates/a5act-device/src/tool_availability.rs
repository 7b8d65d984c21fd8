//! Tool availability checking for device access
//!
//! The activator reaches devices through `pymobiledevice3`. This module checks
//! once at startup that the tool can be found and reports its version.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

/// Cached availability of the device tool
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    /// Resolved path of the tool, if found
    pub tool_path: Option<PathBuf>,

    /// Version string reported by the tool
    pub version: Option<String>,
}

impl ToolAvailability {
    /// Check tool availability (run once at startup)
    pub async fn check(tool: &str) -> Self {
        let tool_path = match which::which(tool) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::debug!("{} not found on PATH: {}", tool, e);
                None
            }
        };

        let version = match &tool_path {
            Some(path) => Self::read_version(path).await,
            None => None,
        };

        Self { tool_path, version }
    }

    /// Ask the tool for its version
    async fn read_version(path: &Path) -> Option<String> {
        let output = Command::new(path)
            .arg("version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .inspect_err(|e| tracing::debug!("{} version check failed: {}", path.display(), e))
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!version.is_empty()).then_some(version)
    }

    pub fn is_available(&self) -> bool {
        self.tool_path.is_some()
    }

    /// Get user-friendly message for an unavailable tool
    pub fn unavailable_message(&self) -> Option<&'static str> {
        if self.is_available() {
            None
        } else {
            Some(
                "pymobiledevice3 not found. Install it with `python3 -m pip install pymobiledevice3`.",
            )
        }
    }
}
