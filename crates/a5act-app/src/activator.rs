//! Activator: single owner of the device client
//!
//! The client lives inside exactly one task at a time. While idle the watcher
//! task holds it; [`Activator::start_activation`] stops the watcher, takes the
//! client back and moves it into the run task. When the run's terminal event
//! passes through [`Activator::next_event`], the run task is joined and the
//! watcher resumes with the client and its previous state.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use a5act_core::prelude::*;
use a5act_core::Whitelist;
use a5act_device::DeviceClient;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::Settings;
use crate::event::ActivatorEvent;
use crate::orchestrator::{Orchestrator, RunPolicy, RunReport};
use crate::watcher::{spawn_watcher, DevicePresence, WatcherHandle, WatcherState};

/// Capacity of the merged event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default watcher period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ActivatorOptions {
    pub whitelist: Whitelist,
    pub poll_interval: Duration,
    pub policy: RunPolicy,
}

impl Default for ActivatorOptions {
    fn default() -> Self {
        Self {
            whitelist: Whitelist::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            policy: RunPolicy::default(),
        }
    }
}

impl ActivatorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            whitelist: settings.compatibility.whitelist(),
            poll_interval: settings.watcher.poll_interval(),
            policy: RunPolicy::default(),
        }
    }
}

/// Which task currently owns the client
enum Owner<C> {
    Watching(WatcherHandle<C>),
    Activating(JoinHandle<(C, RunReport)>),
    Stopped,
}

pub struct Activator<C, K> {
    owner: Owner<C>,
    clock: Arc<K>,
    options: ActivatorOptions,

    /// Watcher state parked while a run holds the client
    parked_state: Option<WatcherState>,
    events_tx: mpsc::Sender<ActivatorEvent>,
    events_rx: mpsc::Receiver<ActivatorEvent>,
    presence_tx: Arc<watch::Sender<DevicePresence>>,
    last_report: Option<RunReport>,
}

impl<C, K> Activator<C, K>
where
    C: DeviceClient + Sync + 'static,
    K: Clock + Sync + 'static,
{
    /// Take ownership of the client and start watching for a device.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(client: C, clock: K, options: ActivatorOptions) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let presence_tx = Arc::new(watch::channel(DevicePresence::Unknown).0);

        let watcher = spawn_watcher(
            client,
            WatcherState::new(options.whitelist.clone()),
            options.poll_interval,
            events_tx.clone(),
            presence_tx.clone(),
        );

        Self {
            owner: Owner::Watching(watcher),
            clock: Arc::new(clock),
            options,
            parked_state: None,
            events_tx,
            events_rx,
            presence_tx,
            last_report: None,
        }
    }

    /// Latest presence reported by the watcher
    pub fn presence(&self) -> DevicePresence {
        self.presence_tx.borrow().clone()
    }

    /// Subscribe to presence changes
    pub fn subscribe_presence(&self) -> watch::Receiver<DevicePresence> {
        self.presence_tx.subscribe()
    }

    pub fn is_activating(&self) -> bool {
        matches!(self.owner, Owner::Activating(_))
    }

    /// Report of the most recently finished run
    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    /// Read the payload file and start a run
    pub async fn start_activation_from_file(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(Error::payload_not_found(path));
        }
        let payload = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read payload {}", path.display()))?;
        debug!("Loaded payload {} ({} bytes)", path.display(), payload.len());
        self.start_activation(payload).await
    }

    /// Start an activation run with the given payload.
    ///
    /// Accepted only when the watcher reports a compatible device and no run
    /// is active. The watcher is stopped before the run takes the client.
    pub async fn start_activation(&mut self, payload: Vec<u8>) -> Result<()> {
        match &self.owner {
            Owner::Activating(_) => {
                return Err(Error::not_ready("an activation is already running"))
            }
            Owner::Stopped => return Err(Error::not_ready("the activator has shut down")),
            Owner::Watching(_) => {}
        }
        if !self.presence().is_ready() {
            return Err(Error::not_ready("no compatible device connected"));
        }

        let (client, state) = self.stop_watcher().await?;

        // The last tick may have seen the device go away.
        if !state.presence().is_ready() {
            self.resume_watcher(client, state);
            return Err(Error::not_ready("no compatible device connected"));
        }

        info!("Starting activation run");
        self.presence_tx.send_replace(DevicePresence::Unknown);
        self.parked_state = Some(state);

        let clock = self.clock.clone();
        let policy = self.options.policy;
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let report = Orchestrator::new(&client, clock.as_ref(), policy, &payload, events)
                .run()
                .await;
            (client, report)
        });
        self.owner = Owner::Activating(task);

        Ok(())
    }

    /// Next event from the watcher or the active run.
    ///
    /// A terminal run event hands the client back to the watcher before it is
    /// returned, so the caller may start another run right away once the
    /// device is ready again.
    pub async fn next_event(&mut self) -> Option<ActivatorEvent> {
        let event = self.events_rx.recv().await?;
        if event.is_terminal() {
            self.finish_run().await;
        }
        Some(event)
    }

    /// Stop whichever task owns the client
    pub async fn shutdown(&mut self) {
        match std::mem::replace(&mut self.owner, Owner::Stopped) {
            Owner::Watching(watcher) => {
                if let Err(e) = watcher.stop().await {
                    warn!("Watcher did not stop cleanly: {}", e);
                }
            }
            Owner::Activating(task) => {
                warn!("Shutting down during an activation run");
                task.abort();
                let _ = task.await;
            }
            Owner::Stopped => {}
        }
        self.presence_tx.send_replace(DevicePresence::Unknown);
        info!("Activator shut down");
    }

    async fn stop_watcher(&mut self) -> Result<(C, WatcherState)> {
        match std::mem::replace(&mut self.owner, Owner::Stopped) {
            Owner::Watching(watcher) => watcher.stop().await,
            other => {
                self.owner = other;
                Err(Error::not_ready("the watcher is not running"))
            }
        }
    }

    fn resume_watcher(&mut self, client: C, state: WatcherState) {
        debug!("Resuming device watcher");
        self.owner = Owner::Watching(spawn_watcher(
            client,
            state,
            self.options.poll_interval,
            self.events_tx.clone(),
            self.presence_tx.clone(),
        ));
    }

    async fn finish_run(&mut self) {
        let task = match std::mem::replace(&mut self.owner, Owner::Stopped) {
            Owner::Activating(task) => task,
            other => {
                self.owner = other;
                return;
            }
        };

        match task.await {
            Ok((client, report)) => {
                debug!("Run joined after {} attempt(s)", report.attempts.len());
                self.last_report = Some(report);
                let state = self
                    .parked_state
                    .take()
                    .unwrap_or_else(|| WatcherState::new(self.options.whitelist.clone()));
                self.resume_watcher(client, state);
            }
            Err(e) => {
                // The client is gone with the task.
                error!("Activation task failed: {}", e);
            }
        }
    }
}
