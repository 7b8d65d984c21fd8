//! Device watcher
//!
//! Polls the device on a fixed interval and reports presence and
//! compatibility. The watcher task owns the device client while it runs;
//! [`WatcherHandle::stop`] hands the client back so an activation run can
//! take it over.

use std::sync::Arc;
use std::time::Duration;

use a5act_core::prelude::*;
use a5act_core::{
    check, ActivationState, CompatibilityVerdict, DeviceIdentity, WatcherEvent, Whitelist,
};
use a5act_device::DeviceClient;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::event::ActivatorEvent;

/// Latest known device presence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DevicePresence {
    /// No tick has completed yet
    #[default]
    Unknown,

    /// No device reachable
    Absent,

    /// A device is attached but not on the whitelists
    Incompatible,

    /// A compatible device is attached; activation may start
    Ready {
        identity: DeviceIdentity,
        activation_state: ActivationState,
    },
}

impl DevicePresence {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Watcher state carried across ticks and across pause/resume
#[derive(Debug, Clone)]
pub struct WatcherState {
    whitelist: Whitelist,

    /// Set once the advisory has been raised for the current connection
    advisory_shown: bool,
    presence: DevicePresence,
}

impl WatcherState {
    pub fn new(whitelist: Whitelist) -> Self {
        Self {
            whitelist,
            advisory_shown: false,
            presence: DevicePresence::Unknown,
        }
    }

    pub fn presence(&self) -> &DevicePresence {
        &self.presence
    }

    pub fn advisory_shown(&self) -> bool {
        self.advisory_shown
    }

    /// Poll the device once and return the events for this tick
    ///
    /// Never fails: any error reaching the device is reported as
    /// `Disconnected` and re-arms the advisory.
    pub async fn tick<C>(&mut self, client: &C) -> Vec<WatcherEvent>
    where
        C: DeviceClient + Sync,
    {
        let (identity, activation_state) = match Self::read_device(client).await {
            Ok(found) => found,
            Err(e) => {
                if !e.is_transient() {
                    debug!("Watcher tick failed, treating as disconnected: {}", e);
                }
                self.advisory_shown = false;
                self.presence = DevicePresence::Absent;
                return vec![WatcherEvent::Disconnected];
            }
        };

        let compatibility = check(&identity, &self.whitelist);
        match compatibility.verdict {
            CompatibilityVerdict::IncompatibleModel => {
                self.presence = DevicePresence::Incompatible;
                vec![WatcherEvent::IncompatibleModel {
                    model: identity.model,
                }]
            }
            CompatibilityVerdict::IncompatibleVersion => {
                self.presence = DevicePresence::Incompatible;
                vec![WatcherEvent::IncompatibleVersion {
                    version: identity.os_version,
                }]
            }
            CompatibilityVerdict::Compatible => {
                let mut events = Vec::with_capacity(2);
                if compatibility.advisory && !self.advisory_shown {
                    info!("Advisory raised for {}", identity);
                    self.advisory_shown = true;
                    events.push(WatcherEvent::AdvisoryWarning);
                }
                events.push(WatcherEvent::Connected {
                    model: identity.model.clone(),
                    os_version: identity.os_version.clone(),
                    activation_state,
                });
                self.presence = DevicePresence::Ready {
                    identity,
                    activation_state,
                };
                events
            }
        }
    }

    async fn read_device<C>(client: &C) -> Result<(DeviceIdentity, ActivationState)>
    where
        C: DeviceClient + Sync,
    {
        let session = client.open().await?;
        let identity = client.read_identity(&session).await?;
        let activation_state = client.read_activation_state(&session).await?;
        Ok((identity, activation_state))
    }
}

/// A running watcher task
///
/// The task owns the client; [`stop`](Self::stop) returns it.
#[derive(Debug)]
pub struct WatcherHandle<C> {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<(C, WatcherState)>,
}

impl<C> WatcherHandle<C> {
    /// Stop polling and reclaim the client and state
    ///
    /// A tick already in progress completes first, so the client is never
    /// shared with the caller mid-request.
    pub async fn stop(self) -> Result<(C, WatcherState)> {
        let _ = self.shutdown_tx.send(true);
        self.task
            .await
            .map_err(|e| Error::task(format!("watcher task: {}", e)))
    }

    /// Abort the task without reclaiming the client
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn the periodic watcher task.
///
/// The loop runs until the shutdown signal is sent or the event receiver is
/// dropped. Every tick publishes its events and the resulting presence.
pub fn spawn_watcher<C>(
    client: C,
    mut state: WatcherState,
    interval: Duration,
    events: mpsc::Sender<ActivatorEvent>,
    presence_tx: Arc<watch::Sender<DevicePresence>>,
) -> WatcherHandle<C>
where
    C: DeviceClient + Sync + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Device watcher started ({:?} interval)", interval);

        'poll: loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    // A dropped handle also stops the task.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break 'poll;
                    }
                }

                _ = ticker.tick() => {
                    let tick_events = state.tick(&client).await;
                    presence_tx.send_replace(state.presence().clone());

                    for event in tick_events {
                        trace!("Watcher event: {}", event.event_type());
                        tokio::select! {
                            biased;

                            _ = shutdown_rx.changed() => break 'poll,
                            sent = events.send(ActivatorEvent::Watcher(event)) => {
                                if sent.is_err() {
                                    debug!("Event receiver dropped, stopping watcher");
                                    break 'poll;
                                }
                            }
                        }
                    }
                }
            }
        }

        debug!("Device watcher stopped");
        (client, state)
    });

    WatcherHandle { shutdown_tx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a5act_device::test_utils::{test_cellular_identity, test_identity, DeviceCall, FakeDevice};

    fn whitelist() -> Whitelist {
        Whitelist::default()
    }

    fn connected(model: &str, os_version: &str) -> WatcherEvent {
        WatcherEvent::Connected {
            model: model.to_string(),
            os_version: os_version.to_string(),
            activation_state: ActivationState::NotActivated,
        }
    }

    #[tokio::test]
    async fn test_no_device_is_disconnected() {
        let device = FakeDevice::detached(test_identity("iPad2,1", "9.3.5"));
        let mut state = WatcherState::new(whitelist());

        assert_eq!(state.tick(&device).await, vec![WatcherEvent::Disconnected]);
        assert_eq!(state.presence(), &DevicePresence::Absent);
    }

    #[tokio::test]
    async fn test_compatible_device_is_ready() {
        let device = FakeDevice::new(test_identity("iPad2,1", "9.3.5"));
        let mut state = WatcherState::new(whitelist());

        assert_eq!(state.tick(&device).await, vec![connected("iPad2,1", "9.3.5")]);
        assert!(state.presence().is_ready());
    }

    #[tokio::test]
    async fn test_incompatible_model_checked_first() {
        let device = FakeDevice::new(test_identity("iPhone10,3", "7.1.2"));
        let mut state = WatcherState::new(whitelist());

        assert_eq!(
            state.tick(&device).await,
            vec![WatcherEvent::IncompatibleModel {
                model: "iPhone10,3".to_string()
            }]
        );
        assert_eq!(state.presence(), &DevicePresence::Incompatible);
    }

    #[tokio::test]
    async fn test_incompatible_version() {
        let device = FakeDevice::new(test_identity("iPad2,1", "7.1.2"));
        let mut state = WatcherState::new(whitelist());

        assert_eq!(
            state.tick(&device).await,
            vec![WatcherEvent::IncompatibleVersion {
                version: "7.1.2".to_string()
            }]
        );
        assert!(!state.presence().is_ready());
    }

    #[tokio::test]
    async fn test_advisory_once_per_connection() {
        let device = FakeDevice::new(test_cellular_identity("iPhone4,1", "8.4.1"));
        let mut state = WatcherState::new(whitelist());

        assert_eq!(
            state.tick(&device).await,
            vec![WatcherEvent::AdvisoryWarning, connected("iPhone4,1", "8.4.1")]
        );
        assert_eq!(state.tick(&device).await, vec![connected("iPhone4,1", "8.4.1")]);

        device.set_attached(false);
        assert_eq!(state.tick(&device).await, vec![WatcherEvent::Disconnected]);
        assert!(!state.advisory_shown());

        device.set_attached(true);
        assert_eq!(
            state.tick(&device).await,
            vec![WatcherEvent::AdvisoryWarning, connected("iPhone4,1", "8.4.1")]
        );
    }

    #[tokio::test]
    async fn test_no_advisory_without_telephony() {
        let device = FakeDevice::new(test_identity("iPad2,1", "8.4.1"));
        let mut state = WatcherState::new(whitelist());

        assert_eq!(state.tick(&device).await, vec![connected("iPad2,1", "8.4.1")]);
        assert!(!state.advisory_shown());
    }

    #[tokio::test]
    async fn test_transport_error_counts_as_disconnected() {
        let device = FakeDevice::new(test_cellular_identity("iPhone4,1", "8.4.1"));
        let mut state = WatcherState::new(whitelist());
        state.tick(&device).await;
        assert!(state.advisory_shown());

        let broken = device.clone().with_open_error("usbmuxd refused connection");
        assert_eq!(state.tick(&broken).await, vec![WatcherEvent::Disconnected]);
        assert!(!state.advisory_shown());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_watcher_publishes_and_returns_client() {
        let device = FakeDevice::new(test_identity("iPad2,1", "9.3.5"));
        let (tx, mut rx) = mpsc::channel(16);
        let presence_tx = Arc::new(watch::channel(DevicePresence::Unknown).0);

        let handle = spawn_watcher(
            device.clone(),
            WatcherState::new(whitelist()),
            Duration::from_secs(1),
            tx,
            presence_tx.clone(),
        );

        for _ in 0..3 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event, ActivatorEvent::Watcher(connected("iPad2,1", "9.3.5")));
        }
        assert!(presence_tx.borrow().is_ready());

        let (_returned, state) = handle.stop().await.unwrap();
        assert!(state.presence().is_ready());

        let opens = |d: &FakeDevice| d.count(|c| matches!(c, DeviceCall::Open));
        let opens_after_stop = opens(&device);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(opens(&device), opens_after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_stops_when_receiver_dropped() {
        let device = FakeDevice::new(test_identity("iPad2,1", "9.3.5"));
        let (tx, rx) = mpsc::channel(16);
        let presence_tx = Arc::new(watch::channel(DevicePresence::Unknown).0);

        let handle = spawn_watcher(
            device,
            WatcherState::new(whitelist()),
            Duration::from_secs(1),
            tx,
            presence_tx,
        );
        drop(rx);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
        assert!(handle.stop().await.is_ok());
    }
}
