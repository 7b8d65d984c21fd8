//! a5act-app - Activation orchestration for the A5 activator
//!
//! This crate implements the activation state machine, the periodic device
//! watcher, configuration loading, and the [`Activator`] that hands the single
//! device client back and forth between the two.

pub mod activator;
pub mod clock;
pub mod config;
pub mod event;
pub mod orchestrator;
pub mod watcher;

// Re-export primary types
pub use activator::{Activator, ActivatorOptions};
pub use clock::{Clock, LocalClock, TokioClock};
pub use event::ActivatorEvent;
pub use orchestrator::{
    ActivationAttempt, AttemptOutcome, Orchestrator, RunOutcome, RunPolicy, RunReport, RunState,
};
pub use watcher::{DevicePresence, WatcherHandle, WatcherState};

// Re-export device types for front-ends
pub use a5act_device::{DeviceClient, Pmd3Client, ToolAvailability};
