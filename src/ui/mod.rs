//! Display layer integration.
//!
//! The tree reports every applied mutation through a [`DisplaySink`]. The
//! adapters here forward updates to a tokio broadcast channel, record them,
//! or drop them.

pub mod display;

pub use display::{BroadcastDisplay, DisplaySink, DisplayUpdate, NullDisplay, RecordingDisplay};
