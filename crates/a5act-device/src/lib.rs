//! # a5act-device - Device Session Client
//!
//! The boundary to the attached iOS device. Everything the activator does to
//! a device goes through the [`DeviceClient`] trait with an explicit
//! [`SessionHandle`].
//!
//! Depends on [`a5act_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Session Client
//! - [`DeviceClient`] - Async device operations (`Send` futures)
//! - [`SessionHandle`] - An open session to one device; consumed by `restart`
//!
//! ### pymobiledevice3 Backend
//! - [`Pmd3Client`] - Drives the `pymobiledevice3` command-line tool
//!
//! ### Tool Utilities
//! - [`ToolAvailability`] - Check that the device tool is installed

pub mod pmd3;
pub mod session;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_availability;

// Public API re-exports
pub use pmd3::{Pmd3Client, DEFAULT_COMMAND_TIMEOUT, DEFAULT_TOOL};
pub use session::{DeviceClient, LocalDeviceClient, SessionHandle};
pub use tool_availability::ToolAvailability;
