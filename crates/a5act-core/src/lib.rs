//! # a5act-core - Core Domain Types
//!
//! Foundation crate for the A5 activator. Provides device domain types, the
//! compatibility checker, event definitions, error handling and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`DeviceIdentity`] - Model, OS version and capability flags read from a device
//! - [`ActivationState`] - Unknown, Activated or NotActivated
//!
//! ### Compatibility (`compat`)
//! - [`Whitelist`] - Supported device models and OS versions
//! - [`check()`] - Pure compatibility verdict plus the cellular 8.4.1 advisory flag
//!
//! ### Events (`events`)
//! - [`WatcherEvent`] - Device presence events from the watcher
//! - [`RunEvent`] - Status and terminal events from an activation run
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `transient` vs `fatal` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use a5act_core::prelude::*;
//! ```

pub mod compat;
pub mod error;
pub mod events;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all activator crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use compat::{
    check, Compatibility, CompatibilityVerdict, Whitelist, ADVISORY_OS_VERSION,
    DEFAULT_SUPPORTED_MODELS, DEFAULT_SUPPORTED_VERSIONS,
};
pub use error::{Error, Result, ResultExt};
pub use events::{FailureKind, RunEvent, WatcherEvent};
pub use types::{ActivationState, DeviceIdentity, TELEPHONY_CAPABILITY};
