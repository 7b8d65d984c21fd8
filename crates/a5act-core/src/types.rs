//! Device domain types
//!
//! These are read-only snapshots fetched from a device session. Nothing here
//! outlives the session it came from; callers re-read after every restart.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lockdown capability flag set on devices with a cellular baseband
pub const TELEPHONY_CAPABILITY: &str = "TelephonyCapability";

/// Suffix shared by all lockdown capability keys
const CAPABILITY_SUFFIX: &str = "Capability";

/// Identity of the attached device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Hardware model identifier (e.g. "iPad2,1")
    pub model: String,

    /// OS version string (e.g. "9.3.5")
    pub os_version: String,

    /// Capability flags that are present and enabled (e.g. "TelephonyCapability")
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl DeviceIdentity {
    pub fn new(model: impl Into<String>, os_version: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            os_version: os_version.into(),
            capabilities: BTreeSet::new(),
        }
    }

    /// Add a capability flag
    pub fn with_capability(mut self, flag: impl Into<String>) -> Self {
        self.capabilities.insert(flag.into());
        self
    }

    pub fn has_capability(&self, flag: &str) -> bool {
        self.capabilities.contains(flag)
    }

    /// Whether the device has a cellular baseband
    pub fn has_telephony(&self) -> bool {
        self.has_capability(TELEPHONY_CAPABILITY)
    }

    /// Build an identity from a lockdown value dictionary.
    ///
    /// Every boolean key ending in `Capability` that is `true` becomes a flag.
    /// Returns `None` when the model or version is missing.
    pub fn from_lockdown_values(
        values: &serde_json::Map<String, serde_json::Value>,
    ) -> Option<Self> {
        let model = values.get("ProductType")?.as_str()?;
        let os_version = values.get("ProductVersion")?.as_str()?;

        let capabilities = values
            .iter()
            .filter(|(key, value)| {
                key.ends_with(CAPABILITY_SUFFIX) && value.as_bool() == Some(true)
            })
            .map(|(key, _)| key.clone())
            .collect();

        Some(Self {
            model: model.to_string(),
            os_version: os_version.to_string(),
            capabilities,
        })
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.model, self.os_version)
    }
}

/// Activation state reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    #[default]
    Unknown,
    Activated,
    NotActivated,
}

impl ActivationState {
    /// Map the lockdown `ActivationState` value.
    ///
    /// Only the literal `"Activated"` counts as activated; any other string
    /// (`"Unactivated"`, `"FactoryActivated"`, ...) is not.
    pub fn from_lockdown(value: Option<&str>) -> Self {
        match value {
            Some("Activated") => ActivationState::Activated,
            Some(_) => ActivationState::NotActivated,
            None => ActivationState::Unknown,
        }
    }

    pub fn is_activated(&self) -> bool {
        matches!(self, ActivationState::Activated)
    }
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationState::Unknown => write!(f, "unknown"),
            ActivationState::Activated => write!(f, "activated"),
            ActivationState::NotActivated => write!(f, "not activated"),
        }
    }
}
