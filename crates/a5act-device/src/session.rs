//! Device session client trait
//!
//! A session is an explicit handle: every operation names the session it runs
//! against, and a restart consumes the handle so callers must open a fresh one
//! (and re-read identity and state) once the device comes back.

use a5act_core::prelude::*;
use a5act_core::{ActivationState, DeviceIdentity};

/// An open session to one attached device
#[derive(Debug, PartialEq, Eq)]
pub struct SessionHandle {
    udid: String,
}

impl SessionHandle {
    pub fn new(udid: impl Into<String>) -> Self {
        Self { udid: udid.into() }
    }

    /// Unique device identifier of the session's device
    pub fn udid(&self) -> &str {
        &self.udid
    }
}

/// Operations on the attached device
///
/// Any call may fail with [`Error::NoDevice`] when the device is gone, or
/// [`Error::Transport`] for anything else the transport reports.
#[trait_variant::make(DeviceClient: Send)]
pub trait LocalDeviceClient {
    /// Open a session to the currently attached device
    async fn open(&self) -> Result<SessionHandle>;

    /// Read model, OS version and capability flags
    async fn read_identity(&self, session: &SessionHandle) -> Result<DeviceIdentity>;

    /// Read the lockdown activation state
    async fn read_activation_state(&self, session: &SessionHandle) -> Result<ActivationState>;

    /// Read one MobileGestalt diagnostic key; `None` when the device omits it
    async fn read_diagnostic_key(
        &self,
        session: &SessionHandle,
        key: &str,
    ) -> Result<Option<serde_json::Value>>;

    /// Write bytes to a path in the device's media file area
    async fn write_file(&self, session: &SessionHandle, path: &str, contents: &[u8]) -> Result<()>;

    /// Issue the diagnostics restart command
    async fn restart(&self, session: SessionHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_handle_udid() {
        let session = SessionHandle::new("00008101-000123456789001E");
        assert_eq!(session.udid(), "00008101-000123456789001E");
    }
}
