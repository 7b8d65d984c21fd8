//! Headless mode - NDJSON event output
//!
//! The activator runs without a UI and writes one JSON object per line to
//! stdout, so scripts and wrappers can follow an activation without parsing
//! human-oriented text.
//!
//! # Event Format
//!
//! Each event has an "event" field naming its type and a millisecond
//! "timestamp", along with event-specific data.
//!
//! # Example Output
//!
//! ```json
//! {"event":"device_connected","model":"iPad2,1","os_version":"9.3.5","activation_state":"not_activated","timestamp":1704700001000}
//! {"event":"notice","message":"Your device will now be activated. Please ensure it is connected to Wi-Fi.","timestamp":1704700002000}
//! {"event":"status","message":"Pushing payload (attempt 1/5)","timestamp":1704700002100}
//! {"event":"activation_succeeded","message":"Done!","timestamp":1704700041000}
//! ```

pub mod runner;

use a5act_app::ActivatorEvent;
use a5act_core::{ActivationState, FailureKind, RunEvent, WatcherEvent};
use chrono::Utc;
use serde::Serialize;
use std::io::{self, Write};
use tracing::error;

/// Shown once per connection for cellular devices on iOS 8.4.1
pub const ADVISORY_MESSAGE: &str =
    "Cellular iOS 8.4.1 devices activation is partially broken. Proceed with caution.";

/// Shown before every run
pub const WIFI_NOTICE: &str =
    "Your device will now be activated. Please ensure it is connected to Wi-Fi.";

/// Events emitted in headless mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// A compatible device is attached
    DeviceConnected {
        model: String,
        os_version: String,
        activation_state: ActivationState,
        timestamp: i64,
    },

    /// No device reachable
    DeviceDisconnected { timestamp: i64 },

    IncompatibleModel { model: String, timestamp: i64 },

    IncompatibleVersion { version: String, timestamp: i64 },

    /// Known-risky device/OS combination
    AdvisoryWarning { message: String, timestamp: i64 },

    /// Progress of an activation run
    Status { message: String, timestamp: i64 },

    ActivationSucceeded { message: String, timestamp: i64 },

    ActivationFailed {
        kind: FailureKind,
        message: String,
        timestamp: i64,
    },

    /// Operator-facing information outside a run
    Notice { message: String, timestamp: i64 },

    /// Error occurred
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }

        // Flush to ensure immediate output
        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn from_watcher(event: &WatcherEvent) -> Self {
        let timestamp = Self::now();
        match event {
            WatcherEvent::Connected {
                model,
                os_version,
                activation_state,
            } => Self::DeviceConnected {
                model: model.clone(),
                os_version: os_version.clone(),
                activation_state: *activation_state,
                timestamp,
            },
            WatcherEvent::Disconnected => Self::DeviceDisconnected { timestamp },
            WatcherEvent::IncompatibleModel { model } => Self::IncompatibleModel {
                model: model.clone(),
                timestamp,
            },
            WatcherEvent::IncompatibleVersion { version } => Self::IncompatibleVersion {
                version: version.clone(),
                timestamp,
            },
            WatcherEvent::AdvisoryWarning => Self::AdvisoryWarning {
                message: ADVISORY_MESSAGE.to_string(),
                timestamp,
            },
        }
    }

    pub fn from_run(event: &RunEvent) -> Self {
        let timestamp = Self::now();
        match event {
            RunEvent::StatusUpdate { message } => Self::Status {
                message: message.clone(),
                timestamp,
            },
            RunEvent::Success { message } => Self::ActivationSucceeded {
                message: message.clone(),
                timestamp,
            },
            RunEvent::Error { kind, message } => Self::ActivationFailed {
                kind: *kind,
                message: message.clone(),
                timestamp,
            },
        }
    }

    pub fn from_activator(event: &ActivatorEvent) -> Self {
        match event {
            ActivatorEvent::Watcher(event) => Self::from_watcher(event),
            ActivatorEvent::Run(event) => Self::from_run(event),
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice {
            message: message.into(),
            timestamp: Self::now(),
        }
    }

    pub fn error(message: String, fatal: bool) -> Self {
        Self::Error {
            message,
            fatal,
            timestamp: Self::now(),
        }
    }

    /// Returns the event name as written in the "event" field.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::DeviceConnected { .. } => "device_connected",
            Self::DeviceDisconnected { .. } => "device_disconnected",
            Self::IncompatibleModel { .. } => "incompatible_model",
            Self::IncompatibleVersion { .. } => "incompatible_version",
            Self::AdvisoryWarning { .. } => "advisory_warning",
            Self::Status { .. } => "status",
            Self::ActivationSucceeded { .. } => "activation_succeeded",
            Self::ActivationFailed { .. } => "activation_failed",
            Self::Notice { .. } => "notice",
            Self::Error { .. } => "error",
        }
    }
}
