//! Test utilities for device sessions
//!
//! Provides [`FakeDevice`], a scriptable in-memory device implementing
//! [`DeviceClient`], and helpers for building identities.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use a5act_core::prelude::*;
use a5act_core::{ActivationState, DeviceIdentity, TELEPHONY_CAPABILITY};
use serde_json::Value;

use crate::session::{DeviceClient, SessionHandle};

/// Unique device ID reported by every [`FakeDevice`]
pub const FAKE_UDID: &str = "FAKE-0000-A5";

/// Creates an identity for a Wi-Fi only device.
pub fn test_identity(model: &str, os_version: &str) -> DeviceIdentity {
    DeviceIdentity::new(model, os_version)
}

/// Creates an identity for a cellular device.
pub fn test_cellular_identity(model: &str, os_version: &str) -> DeviceIdentity {
    DeviceIdentity::new(model, os_version).with_capability(TELEPHONY_CAPABILITY)
}

/// A call recorded by [`FakeDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Open,
    ReadIdentity,
    ReadActivationState,
    ReadDiagnosticKey(String),
    WriteFile { path: String, len: usize },
    Restart,
}

#[derive(Debug)]
struct FakeState {
    identity: DeviceIdentity,
    activation_state: ActivationState,
    attached: bool,
    open_error: Option<String>,
    write_error: Option<String>,
    offline_opens_after_restart: usize,
    offline_remaining: usize,
    lost_after_restart: bool,
    hangs_after_restart: bool,
    hung: bool,
    eligibility: VecDeque<Option<Value>>,
    eligibility_default: Option<Value>,
    calls: Vec<DeviceCall>,
}

/// Scriptable device for orchestrator and watcher tests
///
/// Clones share state, so a test can keep one clone to inspect recorded calls
/// while another is moved into the code under test.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    /// An attached, not yet activated device whose eligibility key reads `true`
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                identity,
                activation_state: ActivationState::NotActivated,
                attached: true,
                open_error: None,
                write_error: None,
                offline_opens_after_restart: 0,
                offline_remaining: 0,
                lost_after_restart: false,
                hangs_after_restart: false,
                hung: false,
                eligibility: VecDeque::new(),
                eligibility_default: Some(Value::Bool(true)),
                calls: Vec::new(),
            })),
        }
    }

    /// No device attached
    pub fn detached(identity: DeviceIdentity) -> Self {
        let device = Self::new(identity);
        device.set_attached(false);
        device
    }

    pub fn with_activation_state(self, activation_state: ActivationState) -> Self {
        self.state().activation_state = activation_state;
        self
    }

    /// Values returned by successive eligibility reads, before the default
    pub fn with_eligibility<I>(self, values: I) -> Self
    where
        I: IntoIterator<Item = Option<Value>>,
    {
        self.state().eligibility = values.into_iter().collect();
        self
    }

    /// Value returned once the scripted eligibility values are used up
    pub fn with_eligibility_default(self, value: Option<Value>) -> Self {
        self.state().eligibility_default = value;
        self
    }

    /// Number of `open()` calls that report no device after each restart
    pub fn with_offline_opens_after_restart(self, count: usize) -> Self {
        self.state().offline_opens_after_restart = count;
        self
    }

    /// The device never comes back after a restart
    pub fn lost_after_restart(self) -> Self {
        self.state().lost_after_restart = true;
        self
    }

    /// After a restart, `open` never completes (a half-booted device)
    pub fn hangs_after_restart(self) -> Self {
        self.state().hangs_after_restart = true;
        self
    }

    /// `write_file` fails with a transport error
    pub fn with_write_error(self, message: impl Into<String>) -> Self {
        self.state().write_error = Some(message.into());
        self
    }

    /// `open` fails with a transport error
    pub fn with_open_error(self, message: impl Into<String>) -> Self {
        self.state().open_error = Some(message.into());
        self
    }

    pub fn set_attached(&self, attached: bool) {
        self.state().attached = attached;
    }

    pub fn set_activation_state(&self, activation_state: ActivationState) {
        self.state().activation_state = activation_state;
    }

    pub fn set_identity(&self, identity: DeviceIdentity) {
        self.state().identity = identity;
    }

    /// All calls made so far, in order
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state().calls.clone()
    }

    pub fn restart_count(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::Restart))
    }

    pub fn write_count(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::WriteFile { .. }))
    }

    pub fn count(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake device state poisoned")
    }

    fn record(&self, call: DeviceCall) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }

    /// Outcome of an `open` call, or `None` while the device hangs
    fn open_now(&self) -> Option<Result<SessionHandle>> {
        let mut state = self.record(DeviceCall::Open);
        if state.hung {
            return None;
        }
        if !state.attached {
            return Some(Err(Error::NoDevice));
        }
        if let Some(message) = &state.open_error {
            return Some(Err(Error::transport(message.clone())));
        }
        if state.offline_remaining > 0 {
            state.offline_remaining -= 1;
            return Some(Err(Error::NoDevice));
        }
        Some(Ok(SessionHandle::new(FAKE_UDID)))
    }
}

impl DeviceClient for FakeDevice {
    async fn open(&self) -> Result<SessionHandle> {
        match self.open_now() {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn read_identity(&self, _session: &SessionHandle) -> Result<DeviceIdentity> {
        let state = self.record(DeviceCall::ReadIdentity);
        Ok(state.identity.clone())
    }

    async fn read_activation_state(&self, _session: &SessionHandle) -> Result<ActivationState> {
        let state = self.record(DeviceCall::ReadActivationState);
        Ok(state.activation_state)
    }

    async fn read_diagnostic_key(
        &self,
        _session: &SessionHandle,
        key: &str,
    ) -> Result<Option<Value>> {
        let mut state = self.record(DeviceCall::ReadDiagnosticKey(key.to_string()));
        match key {
            "ShouldHactivate" => {
                let default = state.eligibility_default.clone();
                Ok(state.eligibility.pop_front().unwrap_or(default))
            }
            "ProductType" => Ok(Some(Value::String(state.identity.model.clone()))),
            _ => Ok(None),
        }
    }

    async fn write_file(&self, _session: &SessionHandle, path: &str, contents: &[u8]) -> Result<()> {
        let state = self.record(DeviceCall::WriteFile {
            path: path.to_string(),
            len: contents.len(),
        });
        match &state.write_error {
            Some(message) => Err(Error::transport(message.clone())),
            None => Ok(()),
        }
    }

    async fn restart(&self, _session: SessionHandle) -> Result<()> {
        let mut state = self.record(DeviceCall::Restart);
        state.offline_remaining = state.offline_opens_after_restart;
        if state.lost_after_restart {
            state.attached = false;
        }
        state.hung = state.hangs_after_restart;
        Ok(())
    }
}
