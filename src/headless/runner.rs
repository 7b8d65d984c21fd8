//! Headless mode runner - main event loop without a UI
//!
//! Forwards activator events to stdout as NDJSON and accepts line commands on
//! stdin (`activate`, `quit`).

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use a5act_app::{Activator, ActivatorEvent, ActivatorOptions, Clock, RunOutcome, TokioClock};
use a5act_core::prelude::*;
use a5act_device::DeviceClient;

use super::{HeadlessEvent, WIFI_NOTICE};

/// Commands accepted from stdin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Activate,
    Quit,
}

impl Command {
    /// Parse one stdin line; `None` for empty or unknown input
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "a" | "activate" => Some(Self::Activate),
            "q" | "quit" => Some(Self::Quit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    /// Payload pushed to the device on each attempt
    pub payload_path: PathBuf,

    /// Start a run the first time a compatible device shows up
    pub auto_activate: bool,

    /// Exit once the first run reports its terminal event
    pub exit_on_finish: bool,
}

/// Run in headless mode with the given device client.
///
/// Returns the outcome of the last finished run, if any.
pub async fn run_headless<C>(
    client: C,
    activator_options: ActivatorOptions,
    options: HeadlessOptions,
) -> Result<Option<RunOutcome>>
where
    C: DeviceClient + Sync + 'static,
{
    info!("═══════════════════════════════════════════════════════");
    info!("A5 activator starting in HEADLESS mode");
    info!("Payload: {}", options.payload_path.display());
    info!("═══════════════════════════════════════════════════════");

    let mut activator = Activator::new(client, TokioClock, activator_options);

    let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        spawn_stdin_reader_blocking(cmd_tx);
    });

    let result = tokio::select! {
        result = run_event_loop(&mut activator, &mut cmd_rx, &options, |e| e.emit()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(None)
        }
    };

    activator.shutdown().await;

    info!("A5 activator headless mode exiting");
    result
}

/// Main headless event loop
///
/// Ends on `quit`, or after the first finished run when `exit_on_finish` is
/// set; with `exit_on_finish` a rejected start ends it with that error. A
/// closed stdin only stops command handling.
pub async fn run_event_loop<C, K, F>(
    activator: &mut Activator<C, K>,
    commands: &mut mpsc::Receiver<Command>,
    options: &HeadlessOptions,
    mut emit: F,
) -> Result<Option<RunOutcome>>
where
    C: DeviceClient + Sync + 'static,
    K: Clock + Sync + 'static,
    F: FnMut(HeadlessEvent),
{
    let mut filter = DuplicateFilter::default();
    let mut auto_activate = options.auto_activate;
    let mut commands_open = true;
    let mut last_outcome = None;

    loop {
        tokio::select! {
            event = activator.next_event() => {
                let Some(event) = event else {
                    return Err(Error::ChannelClosed);
                };

                if event.is_terminal() {
                    last_outcome = activator.last_report().map(|r| r.outcome.clone());
                }
                let terminal = event.is_terminal();

                if let Some(out) = filter.pass(&event) {
                    emit(out);
                }

                if terminal {
                    filter.reset();
                    if options.exit_on_finish {
                        info!("Run finished, exiting");
                        return Ok(last_outcome);
                    }
                }

                if auto_activate && activator.presence().is_ready() {
                    auto_activate = false;
                    start_activation(activator, options, &mut filter, &mut emit).await?;
                }
            }

            command = commands.recv(), if commands_open => match command {
                Some(Command::Activate) => {
                    start_activation(activator, options, &mut filter, &mut emit).await?;
                }
                Some(Command::Quit) => {
                    info!("Quit requested");
                    return Ok(last_outcome);
                }
                None => {
                    info!("Command input closed");
                    commands_open = false;
                }
            },
        }
    }
}

/// Start a run, announcing the Wi-Fi notice on success.
///
/// A rejected start is reported as an `error` event and the loop keeps
/// running, except with `exit_on_finish`: no run will ever finish then, so the
/// rejection is returned and ends the loop.
async fn start_activation<C, K, F>(
    activator: &mut Activator<C, K>,
    options: &HeadlessOptions,
    filter: &mut DuplicateFilter,
    emit: &mut F,
) -> Result<()>
where
    C: DeviceClient + Sync + 'static,
    K: Clock + Sync + 'static,
    F: FnMut(HeadlessEvent),
{
    match activator
        .start_activation_from_file(&options.payload_path)
        .await
    {
        Ok(()) => {
            filter.reset();
            emit(HeadlessEvent::notice(WIFI_NOTICE));
            Ok(())
        }
        Err(e) if options.exit_on_finish => {
            error!("Activation not started, exiting: {}", e);
            Err(e)
        }
        Err(e) => {
            warn!("Activation not started: {}", e);
            emit(HeadlessEvent::error(e.to_string(), e.is_fatal()));
            Ok(())
        }
    }
}

/// Collapses repeated watcher events
///
/// The watcher reports presence every tick; only changes are worth a line.
#[derive(Debug, Default)]
struct DuplicateFilter {
    last_watcher: Option<ActivatorEvent>,
}

impl DuplicateFilter {
    fn pass(&mut self, event: &ActivatorEvent) -> Option<HeadlessEvent> {
        if let ActivatorEvent::Watcher(_) = event {
            if self.last_watcher.as_ref() == Some(event) {
                return None;
            }
            self.last_watcher = Some(event.clone());
        }
        Some(HeadlessEvent::from_activator(event))
    }

    fn reset(&mut self) {
        self.last_watcher = None;
    }
}

/// Read stdin commands on a blocking thread
fn spawn_stdin_reader_blocking(cmd_tx: mpsc::Sender<Command>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    let reader = stdin.lock();

    for line in reader.lines() {
        match line {
            Ok(line) => match Command::parse(&line) {
                Some(command) => {
                    info!("Stdin: {:?}", command);
                    if cmd_tx.blocking_send(command).is_err() || command == Command::Quit {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => warn!("Unknown stdin command: {}", line.trim()),
            },
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    info!("Stdin reader exiting");
}
