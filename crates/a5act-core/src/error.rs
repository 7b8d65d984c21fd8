//! Application error types with rich context

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Device Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No device connected")]
    NoDevice,

    #[error("Device transport error: {message}")]
    Transport { message: String },

    #[error("Device tool not found: '{tool}'. Install it and make sure it is in your PATH.")]
    ToolNotFound { tool: String },

    #[error("Unexpected device tool output: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Activation Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Device did not reconnect within {waited:?}")]
    ReconnectTimeout { waited: Duration },

    #[error("Activation did not succeed after {attempts} attempts")]
    ActivationExhausted { attempts: u32 },

    #[error("Payload not found: {}", path.display())]
    PayloadNotFound { path: PathBuf },

    #[error("Activation cannot start: {reason}")]
    NotReady { reason: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    #[error("Background task failed: {message}")]
    Task { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn payload_not_found(path: impl Into<PathBuf>) -> Self {
        Self::PayloadNotFound { path: path.into() }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::NotReady {
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn task(message: impl Into<String>) -> Self {
        Self::Task {
            message: message.into(),
        }
    }

    /// Check if this error only means the device is absent right now.
    ///
    /// Transient errors are retried by polling and never surface as fatal
    /// during watcher ticks.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NoDevice)
    }

    /// Check if this error should stop the process at startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ToolNotFound { .. } | Error::Config { .. })
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::transport("usbmuxd connection reset");
        assert_eq!(
            err.to_string(),
            "Device transport error: usbmuxd connection reset"
        );

        let err = Error::NoDevice;
        assert_eq!(err.to_string(), "No device connected");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_transient() {
        assert!(Error::NoDevice.is_transient());
        assert!(!Error::transport("broken pipe").is_transient());
        assert!(!Error::ReconnectTimeout {
            waited: Duration::from_secs(120)
        }
        .is_transient());
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::tool_not_found("pymobiledevice3").is_fatal());
        assert!(Error::config("bad toml").is_fatal());
        assert!(!Error::NoDevice.is_fatal());
        assert!(!Error::ActivationExhausted { attempts: 5 }.is_fatal());
    }

    #[test]
    fn test_payload_not_found_mentions_path() {
        let err = Error::payload_not_found("/opt/a5/payload");
        assert!(err.to_string().contains("/opt/a5/payload"));
    }

    #[test]
    fn test_context_preserves_variant() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = result.context("reading payload").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
