//! Merged event stream for front-ends
//!
//! Front-ends receive watcher and run events through one channel via
//! [`crate::Activator::next_event`].

use a5act_core::{RunEvent, WatcherEvent};

/// Events published by the activator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivatorEvent {
    /// Device presence from the watcher
    Watcher(WatcherEvent),

    /// Status or terminal event from an activation run
    Run(RunEvent),
}

impl ActivatorEvent {
    /// Whether this event ends an activation run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Run(event) if event.is_terminal())
    }

    /// Returns a short string label for this event type (for logging/debugging).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Watcher(event) => event.event_type(),
            Self::Run(event) => event.event_type(),
        }
    }
}
