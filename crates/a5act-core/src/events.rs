//! Events consumed by a presentation layer
//!
//! The watcher and the activation run each publish their own event type. A
//! front-end receives both through one channel (see `a5act_app::ActivatorEvent`).

use serde::Serialize;

use crate::types::ActivationState;

/// Device presence events published by the watcher on every tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatcherEvent {
    /// A compatible device is attached
    Connected {
        model: String,
        os_version: String,
        activation_state: ActivationState,
    },

    /// No device could be reached this tick
    Disconnected,

    /// The attached device model is not supported
    IncompatibleModel { model: String },

    /// The attached device runs an unsupported OS version
    IncompatibleVersion { version: String },

    /// Cellular device on iOS 8.4.1; raised once per connection
    AdvisoryWarning,
}

impl WatcherEvent {
    /// Returns a short string label for this event type (for logging/debugging).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected => "disconnected",
            Self::IncompatibleModel { .. } => "incompatible_model",
            Self::IncompatibleVersion { .. } => "incompatible_version",
            Self::AdvisoryWarning => "advisory_warning",
        }
    }
}

/// Why an activation run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The device did not come back after a restart
    Timeout,

    /// Every attempt reported the device still needs activation
    Exhausted,

    /// Transport or tool failure; the message carries the raw description
    Error,
}

/// Events published by an activation run
///
/// Every run emits zero or more `StatusUpdate`s followed by exactly one
/// terminal event (`Success` or `Error`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    StatusUpdate { message: String },
    Success { message: String },
    Error { kind: FailureKind, message: String },
}

impl RunEvent {
    pub fn status(message: impl Into<String>) -> Self {
        Self::StatusUpdate {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::StatusUpdate { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::StatusUpdate { message }
            | Self::Success { message }
            | Self::Error { message, .. } => message,
        }
    }

    /// Returns a short string label for this event type (for logging/debugging).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StatusUpdate { .. } => "status_update",
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
        }
    }
}
