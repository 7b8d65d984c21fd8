//! Activation orchestrator
//!
//! Drives one activation run against the device as an explicit state machine:
//!
//! ```text
//! Checking ──(activated)──────────────────────────────────────────▶ Finished
//!    │
//!    ▼
//! PushingPayload(n) ─▶ Restarting(n) ─▶ WaitingForReconnect(n) ─▶ Verifying(n)
//!    ▲                                        │ (120s)                │    │
//!    │                                        ▼                       │    ▼
//!    └──────────── Retrying(n) ◀───────(eligible == false)────────────┘ Finished
//!                      │ (n == 5)
//!                      ▼
//!                  Finished
//! ```
//!
//! Each call to [`Orchestrator::step`] performs exactly one transition, so
//! every transition can be exercised on its own with a fake device and a
//! manual clock. [`Orchestrator::run`] drives the machine to completion and
//! publishes exactly one terminal event.

use std::time::Duration;

use a5act_core::prelude::*;
use a5act_core::{FailureKind, RunEvent};
use a5act_device::{DeviceClient, SessionHandle};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use crate::clock::Clock;
use crate::event::ActivatorEvent;

/// Maximum number of push/restart/verify cycles per run
pub const MAX_ATTEMPTS: u32 = 5;

/// Destination of the payload in the device's media file area
pub const PAYLOAD_DESTINATION: &str = "Downloads/downloads.28.sqlitedb";

/// Diagnostic key telling whether the device still needs activating
pub const ELIGIBILITY_KEY: &str = "ShouldHactivate";

/// Diagnostic key read to confirm the device is reachable after a restart
pub const RECONNECT_PROBE_KEY: &str = "ProductType";

/// Wait after issuing a restart before polling for the device
pub const SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Interval between reconnect polls
pub const RECONNECT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Ceiling on one reconnect wait
pub const RECONNECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Wait between a failed attempt and the next
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

pub const ALREADY_ACTIVATED_MESSAGE: &str = "Device is already activated";
pub const SUCCESS_MESSAGE: &str = "Done!";
pub const EXHAUSTED_MESSAGE: &str =
    "Activation failed after multiple attempts. Make sure the device is connected to the Wi-Fi.";
pub const RECONNECT_TIMEOUT_MESSAGE: &str =
    "Device did not reconnect in time. Please ensure it is connected and try again.";

/// Attempt budget and waits for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPolicy {
    pub max_attempts: u32,
    pub settle_delay: Duration,
    pub reconnect_poll_interval: Duration,
    pub reconnect_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            settle_delay: SETTLE_DELAY,
            reconnect_poll_interval: RECONNECT_POLL_INTERVAL,
            reconnect_timeout: RECONNECT_TIMEOUT,
            retry_delay: RETRY_DELAY,
        }
    }
}

/// How one attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pending,
    Retry,
    Success,
    Exhausted,
}

/// One push/restart/verify cycle within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationAttempt {
    /// 1-based attempt number
    pub number: u32,
    pub outcome: AttemptOutcome,
}

/// Terminal result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success(String),
    Failure { kind: FailureKind, message: String },
}

impl RunOutcome {
    /// Classify the error that ended a run
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::ReconnectTimeout { .. } => Self::Failure {
                kind: FailureKind::Timeout,
                message: RECONNECT_TIMEOUT_MESSAGE.to_string(),
            },
            Error::ActivationExhausted { .. } => Self::Failure {
                kind: FailureKind::Exhausted,
                message: EXHAUSTED_MESSAGE.to_string(),
            },
            other => Self::Failure {
                kind: FailureKind::Error,
                message: other.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The terminal event announcing this outcome
    pub fn to_event(&self) -> RunEvent {
        match self {
            Self::Success(message) => RunEvent::Success {
                message: message.clone(),
            },
            Self::Failure { kind, message } => RunEvent::Error {
                kind: *kind,
                message: message.clone(),
            },
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub attempts: Vec<ActivationAttempt>,

    /// Total time spent waiting for the device to come back
    pub reconnect_wait: Duration,
}

/// States of the activation state machine
#[derive(Debug)]
pub enum RunState {
    /// Read the activation state; already activated devices finish here
    Checking,

    /// Open a session and write the payload
    PushingPayload { attempt: u32 },

    /// Issue the restart and let the device settle
    Restarting { attempt: u32, session: SessionHandle },

    /// Poll until the device answers again
    WaitingForReconnect { attempt: u32, started: Instant },

    /// Read the eligibility key on the fresh session
    Verifying { attempt: u32, session: SessionHandle },

    /// The attempt did not activate the device; wait the retry delay, then
    /// push again or give up after the last attempt
    Retrying { attempt: u32 },

    Finished(RunOutcome),
}

impl RunState {
    /// Short label for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::PushingPayload { .. } => "pushing_payload",
            Self::Restarting { .. } => "restarting",
            Self::WaitingForReconnect { .. } => "waiting_for_reconnect",
            Self::Verifying { .. } => "verifying",
            Self::Retrying { .. } => "retrying",
            Self::Finished(_) => "finished",
        }
    }
}

/// Whether an eligibility reading means "go ahead and finish"
///
/// Only an explicit `false` asks for another attempt. Missing or any other
/// value proceeds, since some firmware drops the key once activation worked.
pub fn should_proceed(eligibility: Option<&Value>) -> bool {
    !matches!(eligibility, Some(Value::Bool(false)))
}

/// One activation run against a device
pub struct Orchestrator<'a, C, K> {
    client: &'a C,
    clock: &'a K,
    policy: RunPolicy,
    payload: &'a [u8],
    events: mpsc::Sender<ActivatorEvent>,
    attempts: Vec<ActivationAttempt>,
    reconnect_wait: Duration,
}

impl<'a, C, K> Orchestrator<'a, C, K>
where
    C: DeviceClient,
    K: Clock,
{
    pub fn new(
        client: &'a C,
        clock: &'a K,
        policy: RunPolicy,
        payload: &'a [u8],
        events: mpsc::Sender<ActivatorEvent>,
    ) -> Self {
        Self {
            client,
            clock,
            policy,
            payload,
            events,
            attempts: Vec::new(),
            reconnect_wait: Duration::ZERO,
        }
    }

    /// Drive the state machine to completion
    ///
    /// Publishes status events as it goes and exactly one terminal event last.
    pub async fn run(mut self) -> RunReport {
        info!("Activation run starting ({} byte payload)", self.payload.len());

        let mut state = RunState::Checking;
        let outcome = loop {
            let from = state.name();
            state = match self.step(state).await {
                Ok(RunState::Finished(outcome)) => break outcome,
                Ok(next) => {
                    trace!("{} -> {}", from, next.name());
                    next
                }
                Err(e) => {
                    warn!("Activation run stopped in {}: {}", from, e);
                    if let Some(last) = self.attempts.last_mut() {
                        if matches!(e, Error::ActivationExhausted { .. }) {
                            last.outcome = AttemptOutcome::Exhausted;
                        }
                    }
                    break RunOutcome::from_error(&e);
                }
            };
        };

        info!(
            "Activation run finished after {} attempt(s): {:?}",
            self.attempts.len(),
            outcome
        );
        self.emit(outcome.to_event()).await;

        RunReport {
            outcome,
            attempts: self.attempts,
            reconnect_wait: self.reconnect_wait,
        }
    }

    /// Perform one transition
    pub async fn step(&mut self, state: RunState) -> Result<RunState> {
        match state {
            RunState::Checking => {
                let session = self.client.open().await?;
                let activation_state = self.client.read_activation_state(&session).await?;

                if activation_state.is_activated() {
                    info!("Device is already activated, nothing to do");
                    return Ok(RunState::Finished(RunOutcome::Success(
                        ALREADY_ACTIVATED_MESSAGE.to_string(),
                    )));
                }

                debug!("Activation state is {}", activation_state);
                self.emit_status("Activating device...").await;
                Ok(RunState::PushingPayload { attempt: 1 })
            }

            RunState::PushingPayload { attempt } => {
                self.attempts.push(ActivationAttempt {
                    number: attempt,
                    outcome: AttemptOutcome::Pending,
                });
                self.emit_status(format!(
                    "Pushing payload (attempt {}/{})",
                    attempt, self.policy.max_attempts
                ))
                .await;

                let session = self.client.open().await?;
                self.client
                    .write_file(&session, PAYLOAD_DESTINATION, self.payload)
                    .await?;

                Ok(RunState::Restarting { attempt, session })
            }

            RunState::Restarting { attempt, session } => {
                self.emit_status("Restarting device").await;
                self.client.restart(session).await?;
                self.clock.sleep(self.policy.settle_delay).await;

                self.emit_status("Waiting for device to reconnect").await;
                Ok(RunState::WaitingForReconnect {
                    attempt,
                    started: self.clock.now(),
                })
            }

            RunState::WaitingForReconnect { attempt, started } => {
                let waited = self.clock.now().saturating_duration_since(started);
                if waited >= self.policy.reconnect_timeout {
                    self.reconnect_wait += waited;
                    return Err(Error::ReconnectTimeout { waited });
                }

                // A half-booted device can stall the check; it may not outlast the budget.
                let remaining = self.policy.reconnect_timeout - waited;
                match timeout(remaining, self.probe()).await {
                    Ok(Ok(session)) => {
                        debug!("Device back after {:?}", waited);
                        self.reconnect_wait += waited;
                        Ok(RunState::Verifying { attempt, session })
                    }
                    Ok(Err(e)) => {
                        trace!("Device not back yet ({:?}): {}", waited, e);
                        self.clock.sleep(self.policy.reconnect_poll_interval).await;
                        Ok(RunState::WaitingForReconnect { attempt, started })
                    }
                    Err(_) => {
                        debug!("Reconnect check stalled for the remaining {:?}", remaining);
                        let waited = self.policy.reconnect_timeout;
                        self.reconnect_wait += waited;
                        Err(Error::ReconnectTimeout { waited })
                    }
                }
            }

            RunState::Verifying { attempt, session } => {
                self.emit_status("Checking activation state").await;
                let eligibility = self
                    .client
                    .read_diagnostic_key(&session, ELIGIBILITY_KEY)
                    .await?;
                debug!("{} = {:?}", ELIGIBILITY_KEY, eligibility);

                if should_proceed(eligibility.as_ref()) {
                    self.client.restart(session).await?;
                    self.finish_attempt(AttemptOutcome::Success);
                    return Ok(RunState::Finished(RunOutcome::Success(
                        SUCCESS_MESSAGE.to_string(),
                    )));
                }

                self.finish_attempt(AttemptOutcome::Retry);
                Ok(RunState::Retrying { attempt })
            }

            RunState::Retrying { attempt } => {
                self.emit_status(format!(
                    "Retrying activation, attempt {}/{}",
                    attempt, self.policy.max_attempts
                ))
                .await;

                // The delay follows every negative check, the last one included.
                self.clock.sleep(self.policy.retry_delay).await;

                if attempt >= self.policy.max_attempts {
                    return Err(Error::ActivationExhausted { attempts: attempt });
                }

                Ok(RunState::PushingPayload {
                    attempt: attempt + 1,
                })
            }

            finished @ RunState::Finished(_) => Ok(finished),
        }
    }

    /// Open a fresh session and confirm the device answers diagnostics
    async fn probe(&self) -> Result<SessionHandle> {
        let session = self.client.open().await?;
        self.client
            .read_diagnostic_key(&session, RECONNECT_PROBE_KEY)
            .await?;
        Ok(session)
    }

    fn finish_attempt(&mut self, outcome: AttemptOutcome) {
        if let Some(last) = self.attempts.last_mut() {
            last.outcome = outcome;
        }
    }

    async fn emit_status(&self, message: impl Into<String>) {
        self.emit(RunEvent::status(message)).await;
    }

    async fn emit(&self, event: RunEvent) {
        debug!("Run event: {} {:?}", event.event_type(), event.message());
        if self.events.send(ActivatorEvent::Run(event)).await.is_err() {
            debug!("Event receiver dropped, continuing run without a listener");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, TokioClock};
    use a5act_core::ActivationState;
    use a5act_device::test_utils::{test_identity, DeviceCall, FakeDevice};

    const PAYLOAD: &[u8] = b"payload-bytes";

    fn supported_device() -> FakeDevice {
        FakeDevice::new(test_identity("iPad2,1", "9.3.5"))
    }

    async fn run_against(device: &FakeDevice, clock: &ManualClock) -> (RunReport, Vec<RunEvent>) {
        let (tx, mut rx) = mpsc::channel(256);
        let report = Orchestrator::new(device, clock, RunPolicy::default(), PAYLOAD, tx)
            .run()
            .await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                ActivatorEvent::Run(event) => events.push(event),
                other => panic!("unexpected event {:?}", other),
            }
        }
        (report, events)
    }

    fn terminal_count(events: &[RunEvent]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    #[test]
    fn test_should_proceed_only_stops_on_explicit_false() {
        assert!(!should_proceed(Some(&Value::Bool(false))));
        assert!(should_proceed(Some(&Value::Bool(true))));
        assert!(should_proceed(None));
        assert!(should_proceed(Some(&Value::Null)));
        assert!(should_proceed(Some(&Value::from(0))));
        assert!(should_proceed(Some(&Value::from("false"))));
    }

    #[test]
    fn test_outcome_classification() {
        let outcome = RunOutcome::from_error(&Error::ReconnectTimeout {
            waited: RECONNECT_TIMEOUT,
        });
        assert_eq!(
            outcome,
            RunOutcome::Failure {
                kind: FailureKind::Timeout,
                message: RECONNECT_TIMEOUT_MESSAGE.to_string()
            }
        );

        let outcome = RunOutcome::from_error(&Error::transport("pipe closed"));
        assert_eq!(
            outcome,
            RunOutcome::Failure {
                kind: FailureKind::Error,
                message: "Device transport error: pipe closed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_already_activated_is_noop() {
        let device = supported_device().with_activation_state(ActivationState::Activated);
        let clock = ManualClock::new();

        let (report, events) = run_against(&device, &clock).await;

        assert_eq!(
            report.outcome,
            RunOutcome::Success(ALREADY_ACTIVATED_MESSAGE.to_string())
        );
        assert_eq!(device.write_count(), 0);
        assert_eq!(device.restart_count(), 0);
        assert!(report.attempts.is_empty());
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_single_cycle_success() {
        let device = supported_device().with_offline_opens_after_restart(3);
        let clock = ManualClock::new();

        let (report, events) = run_against(&device, &clock).await;

        assert_eq!(report.outcome, RunOutcome::Success(SUCCESS_MESSAGE.to_string()));
        assert_eq!(
            report.attempts,
            vec![ActivationAttempt {
                number: 1,
                outcome: AttemptOutcome::Success
            }]
        );
        assert_eq!(device.write_count(), 1);
        // One restart to apply the payload, one final restart.
        assert_eq!(device.restart_count(), 2);

        let secs = |s| Duration::from_secs(s);
        assert_eq!(clock.sleeps(), vec![secs(10), secs(2), secs(2), secs(2)]);
        assert_eq!(report.reconnect_wait, secs(6));

        let messages: Vec<&str> = events.iter().map(|e| e.message()).collect();
        assert_eq!(
            messages,
            vec![
                "Activating device...",
                "Pushing payload (attempt 1/5)",
                "Restarting device",
                "Waiting for device to reconnect",
                "Checking activation state",
                "Done!",
            ]
        );
        assert_eq!(terminal_count(&events), 1);
    }

    #[tokio::test]
    async fn test_payload_written_to_fixed_destination() {
        let device = supported_device();
        let clock = ManualClock::new();

        run_against(&device, &clock).await;

        assert!(device.calls().contains(&DeviceCall::WriteFile {
            path: PAYLOAD_DESTINATION.to_string(),
            len: PAYLOAD.len(),
        }));
    }

    #[tokio::test]
    async fn test_missing_eligibility_key_is_success() {
        let device = supported_device().with_eligibility_default(None);
        let clock = ManualClock::new();

        let (report, _) = run_against(&device, &clock).await;

        assert!(report.outcome.is_success());
        assert_eq!(device.write_count(), 1);
    }

    #[tokio::test]
    async fn test_non_boolean_eligibility_is_success() {
        let device = supported_device().with_eligibility_default(Some(Value::from("false")));
        let clock = ManualClock::new();

        let (report, _) = run_against(&device, &clock).await;

        assert!(report.outcome.is_success());
        assert_eq!(report.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_success_on_third_attempt() {
        let device = supported_device().with_eligibility([
            Some(Value::Bool(false)),
            Some(Value::Bool(false)),
            Some(Value::Bool(true)),
        ]);
        let clock = ManualClock::new();

        let (report, events) = run_against(&device, &clock).await;

        assert!(report.outcome.is_success());
        let outcomes: Vec<AttemptOutcome> = report.attempts.iter().map(|a| a.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                AttemptOutcome::Retry,
                AttemptOutcome::Retry,
                AttemptOutcome::Success
            ]
        );
        assert_eq!(device.write_count(), 3);
        assert_eq!(
            clock
                .sleeps()
                .iter()
                .filter(|d| **d == RETRY_DELAY)
                .count(),
            2
        );
        assert!(events
            .iter()
            .any(|e| e.message() == "Retrying activation, attempt 2/5"));
    }

    #[tokio::test]
    async fn test_exhausts_after_exactly_five_attempts() {
        let device = supported_device().with_eligibility_default(Some(Value::Bool(false)));
        let clock = ManualClock::new();

        let (report, events) = run_against(&device, &clock).await;

        assert_eq!(
            report.outcome,
            RunOutcome::Failure {
                kind: FailureKind::Exhausted,
                message: EXHAUSTED_MESSAGE.to_string()
            }
        );
        assert_eq!(device.write_count(), 5);
        assert_eq!(device.restart_count(), 5);
        assert_eq!(report.attempts.len(), 5);
        assert_eq!(
            report.attempts.last().map(|a| a.outcome),
            Some(AttemptOutcome::Exhausted)
        );
        // One delay after each negative check, including the fifth.
        assert_eq!(
            clock
                .sleeps()
                .iter()
                .filter(|d| **d == RETRY_DELAY)
                .count(),
            5
        );
        assert_eq!(clock.sleeps().last(), Some(&RETRY_DELAY));
        assert_eq!(terminal_count(&events), 1);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_reconnect_timeout() {
        let device = supported_device().lost_after_restart();
        let clock = ManualClock::new();

        let (report, events) = run_against(&device, &clock).await;

        assert_eq!(
            report.outcome,
            RunOutcome::Failure {
                kind: FailureKind::Timeout,
                message: RECONNECT_TIMEOUT_MESSAGE.to_string()
            }
        );
        // Probes at 0, 2, ..., 118 seconds after the settle delay.
        let polls = clock
            .sleeps()
            .iter()
            .filter(|d| **d == RECONNECT_POLL_INTERVAL)
            .count();
        assert_eq!(polls, 60);
        assert_eq!(clock.elapsed(), SETTLE_DELAY + RECONNECT_TIMEOUT);
        assert_eq!(report.reconnect_wait, RECONNECT_TIMEOUT);
        assert_eq!(device.restart_count(), 1);
        assert_eq!(terminal_count(&events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_reconnect_check_is_capped_by_budget() {
        let device = supported_device().hangs_after_restart();
        let clock = TokioClock;
        let (tx, _rx) = mpsc::channel(256);
        let start = Instant::now();

        let report = Orchestrator::new(&device, &clock, RunPolicy::default(), PAYLOAD, tx)
            .run()
            .await;

        assert_eq!(
            report.outcome,
            RunOutcome::Failure {
                kind: FailureKind::Timeout,
                message: RECONNECT_TIMEOUT_MESSAGE.to_string()
            }
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= SETTLE_DELAY + RECONNECT_TIMEOUT);
        assert!(elapsed < SETTLE_DELAY + RECONNECT_TIMEOUT + Duration::from_secs(1));
        assert_eq!(report.reconnect_wait, RECONNECT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_push_failure_is_fatal() {
        let device = supported_device().with_write_error("AFC write failed");
        let clock = ManualClock::new();

        let (report, events) = run_against(&device, &clock).await;

        assert_eq!(
            report.outcome,
            RunOutcome::Failure {
                kind: FailureKind::Error,
                message: "Device transport error: AFC write failed".to_string()
            }
        );
        assert_eq!(device.restart_count(), 0);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(terminal_count(&events), 1);
    }

    #[tokio::test]
    async fn test_no_device_at_start_fails() {
        let device = FakeDevice::detached(test_identity("iPad2,1", "9.3.5"));
        let clock = ManualClock::new();

        let (report, _) = run_against(&device, &clock).await;

        assert_eq!(
            report.outcome,
            RunOutcome::Failure {
                kind: FailureKind::Error,
                message: "No device connected".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_step_restarting_settles_then_waits() {
        let device = supported_device();
        let clock = ManualClock::new();
        let (tx, _rx) = mpsc::channel(16);
        let mut orchestrator =
            Orchestrator::new(&device, &clock, RunPolicy::default(), PAYLOAD, tx);

        let session = device.open().await.unwrap();
        let next = orchestrator
            .step(RunState::Restarting {
                attempt: 2,
                session,
            })
            .await
            .unwrap();

        assert!(matches!(
            next,
            RunState::WaitingForReconnect { attempt: 2, .. }
        ));
        assert_eq!(clock.sleeps(), vec![SETTLE_DELAY]);
        assert_eq!(device.restart_count(), 1);
    }

    #[tokio::test]
    async fn test_step_verifying_reads_fresh_session() {
        let device = supported_device().with_eligibility([Some(Value::Bool(false))]);
        let clock = ManualClock::new();
        let (tx, _rx) = mpsc::channel(16);
        let mut orchestrator =
            Orchestrator::new(&device, &clock, RunPolicy::default(), PAYLOAD, tx);
        orchestrator.attempts.push(ActivationAttempt {
            number: 1,
            outcome: AttemptOutcome::Pending,
        });

        let session = device.open().await.unwrap();
        let next = orchestrator
            .step(RunState::Verifying {
                attempt: 1,
                session,
            })
            .await
            .unwrap();

        assert!(matches!(next, RunState::Retrying { attempt: 1 }));
        assert_eq!(orchestrator.attempts[0].outcome, AttemptOutcome::Retry);
        assert!(device
            .calls()
            .contains(&DeviceCall::ReadDiagnosticKey(ELIGIBILITY_KEY.to_string())));
    }
}
