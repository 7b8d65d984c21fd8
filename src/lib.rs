//! A5 Activator
//!
//! Headless front-end that watches for a legacy A5 iOS device and drives the
//! activation sequence, reporting progress as NDJSON on stdout.

pub mod headless;

pub use headless::runner::{run_event_loop, run_headless, Command, HeadlessOptions};
pub use headless::HeadlessEvent;
