//! Simulated location device for pawtracker.
//!
//! This crate plays back a recorded track of positions on a fixed cadence,
//! standing in for a phone's GPS receiver. It knows nothing about sinks or
//! tracking state; the `pawtracker` crate adapts it to its platform trait.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod replayer;
pub mod track;

pub use replayer::{Fix, ReplayConfig, ReplayHandle, TrackReplayer};
pub use track::{Track, TrackError};

/// Get the device name reported to status output.
#[must_use]
pub fn device_name() -> &'static str {
    "track replay"
}
