//! `pawtracker` - Report a signed-in user's position to a remote sink
//!
//! This library provides the tracking controller that turns location
//! tracking on and off, the sinks that deliver each position, the session
//! that tracks who is signed in, and the platform abstraction that supplies
//! positions.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod controller;
pub mod coordinate;
pub mod error;
pub mod logging;
pub mod platform;
pub mod reporter;
pub mod session;
pub mod sink;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use controller::{TrackingController, TrackingOptions, TrackingState, TrackingStatus};
pub use coordinate::{Coordinate, DeliveryRecord};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use platform::{LocationPlatform, UpdateConfig};
pub use reporter::LocationReporter;
pub use session::{IdentityProvider, LocalIdentity, PasswordSignIn, Session, UserIdentity};
pub use sink::{build_sink, DeliveryError, HttpSink, RealtimeStoreSink, Sink};
