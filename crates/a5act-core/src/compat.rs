//! Device compatibility checking
//!
//! A pure function of the device identity and the configured whitelists.
//! The one-shot behaviour of the advisory lives in the watcher, not here.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::DeviceIdentity;

/// Device models supported out of the box
pub const DEFAULT_SUPPORTED_MODELS: &[&str] = &[
    "iPhone4,1",
    "iPad2,1",
    "iPad2,2",
    "iPad2,3",
    "iPad2,4",
    "iPad2,5",
    "iPad2,6",
    "iPad2,7",
    "iPad3,1",
    "iPad3,2",
    "iPad3,3",
    "iPod5,1",
];

/// OS versions supported out of the box
pub const DEFAULT_SUPPORTED_VERSIONS: &[&str] = &["8.4.1", "9.3.5", "9.3.6"];

/// OS version on which cellular devices only partially activate
pub const ADVISORY_OS_VERSION: &str = "8.4.1";

/// Supported device models and OS versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Whitelist {
    pub supported_models: BTreeSet<String>,
    pub supported_versions: BTreeSet<String>,
}

impl Default for Whitelist {
    fn default() -> Self {
        Self::new(
            DEFAULT_SUPPORTED_MODELS.iter().copied(),
            DEFAULT_SUPPORTED_VERSIONS.iter().copied(),
        )
    }
}

impl Whitelist {
    pub fn new<M, V>(models: M, versions: V) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        Self {
            supported_models: models.into_iter().map(Into::into).collect(),
            supported_versions: versions.into_iter().map(Into::into).collect(),
        }
    }
}

/// Compatibility of a device with the whitelists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatibilityVerdict {
    Compatible,
    IncompatibleModel,
    IncompatibleVersion,
}

/// Result of [`check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compatibility {
    pub verdict: CompatibilityVerdict,

    /// Known-risky combination: cellular device on iOS 8.4.1
    pub advisory: bool,
}

impl Compatibility {
    pub fn is_compatible(&self) -> bool {
        self.verdict == CompatibilityVerdict::Compatible
    }
}

/// Check a device against the whitelists.
///
/// The model is checked before the version.
pub fn check(identity: &DeviceIdentity, whitelist: &Whitelist) -> Compatibility {
    let verdict = if !whitelist.supported_models.contains(&identity.model) {
        CompatibilityVerdict::IncompatibleModel
    } else if !whitelist.supported_versions.contains(&identity.os_version) {
        CompatibilityVerdict::IncompatibleVersion
    } else {
        CompatibilityVerdict::Compatible
    };

    let advisory = identity.os_version == ADVISORY_OS_VERSION && identity.has_telephony();

    Compatibility { verdict, advisory }
}
