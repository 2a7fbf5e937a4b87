//! Platform location abstraction.
//!
//! This module defines the contract a device location provider must fulfill:
//! permission prompts, a one-shot position fetch, and a continuous update
//! subscription that pushes samples into a channel.

pub mod replay;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::coordinate::Coordinate;

pub use replay::{ReplayPlatform, ReplayPlatformConfig};

/// Errors reported by a location platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Location services are unavailable.
    #[error("location unavailable: {0}")]
    Unavailable(String),

    /// The continuous update subscription could not be registered.
    #[error("failed to register location updates: {0}")]
    SubscriptionFailed(String),

    /// No subscription is registered.
    #[error("no location subscription registered")]
    NotRegistered,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for platform operations.
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Channel end the platform pushes samples into.
pub type SampleSender = mpsc::Sender<Coordinate>;

/// Which location permission is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    /// Access while the app is in the foreground.
    Foreground,
    /// Access while the app is in the background.
    Background,
}

impl std::fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Foreground => write!(f, "foreground"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// The user's answer to a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// Access granted.
    Granted,
    /// Access denied.
    Denied,
}

impl PermissionStatus {
    /// Whether access was granted.
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Requested positioning accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    /// Roughly 3 km.
    Lowest,
    /// Roughly 1 km.
    Low,
    /// Roughly 100 m.
    Balanced,
    /// Roughly 10 m.
    #[default]
    High,
    /// Best the device can do.
    Highest,
}

impl std::fmt::Display for Accuracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lowest => write!(f, "lowest"),
            Self::Low => write!(f, "low"),
            Self::Balanced => write!(f, "balanced"),
            Self::High => write!(f, "high"),
            Self::Highest => write!(f, "highest"),
        }
    }
}

/// The persistent notification shown while tracking runs in the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundIndicator {
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
}

impl Default for ForegroundIndicator {
    fn default() -> Self {
        Self {
            title: "PawTracker".to_string(),
            body: "Sharing your location in the background".to_string(),
        }
    }
}

/// Parameters for a continuous update subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateConfig {
    /// Requested accuracy.
    pub accuracy: Accuracy,

    /// Minimum time between samples.
    pub min_interval: Duration,

    /// Minimum displacement between samples, in metres.
    pub min_distance_m: f64,

    /// Indicator to show while the subscription is registered.
    /// Required for background tracking.
    pub indicator: Option<ForegroundIndicator>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::High,
            min_interval: Duration::from_secs(5),
            min_distance_m: 5.0,
            indicator: None,
        }
    }
}

/// Opaque reference to a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// Wrap a platform-assigned identifier.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The platform-assigned identifier.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Decides which raw samples a subscription passes on.
///
/// A sample is emitted when either the minimum interval has elapsed or the
/// device has moved at least the minimum distance since the last emitted
/// sample, whichever happens first. The first sample always passes.
#[derive(Debug, Clone)]
pub struct UpdateFilter {
    min_interval: Duration,
    min_distance_m: f64,
    last: Option<Coordinate>,
}

impl UpdateFilter {
    /// Create a filter from subscription parameters.
    #[must_use]
    pub fn new(config: &UpdateConfig) -> Self {
        Self {
            min_interval: config.min_interval,
            min_distance_m: config.min_distance_m,
            last: None,
        }
    }

    /// Check a sample, remembering it when it passes.
    pub fn accept(&mut self, sample: &Coordinate) -> bool {
        let pass = match &self.last {
            None => true,
            Some(last) => {
                let elapsed = (sample.captured_at - last.captured_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                elapsed >= self.min_interval || last.distance_to(sample) >= self.min_distance_m
            }
        };

        if pass {
            self.last = Some(*sample);
        }
        pass
    }
}

/// A device location provider.
///
/// Implementations wrap whatever the host offers (a phone OS, a GPS daemon,
/// a recorded track). Every method that may wait on the user or the device
/// is `async`; unregistering is synchronous.
#[async_trait::async_trait]
pub trait LocationPlatform: Send + Sync + std::fmt::Debug {
    /// Name of the provider, for logs and status output.
    fn name(&self) -> &'static str;

    /// Ask for foreground location access.
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt could not be shown.
    async fn request_foreground_permission(&self) -> Result<PermissionStatus>;

    /// Ask for background location access.
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt could not be shown.
    async fn request_background_permission(&self) -> Result<PermissionStatus>;

    /// Fetch a single position.
    ///
    /// # Errors
    ///
    /// Returns an error if no position is available.
    async fn current_location(&self) -> Result<Coordinate>;

    /// Register a continuous update subscription delivering into `tx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be registered.
    async fn start_updates(&self, config: &UpdateConfig, tx: SampleSender)
        -> Result<SubscriptionHandle>;

    /// Re-attach to a subscription registered by an earlier process.
    ///
    /// Returns `None` when nothing is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a registration exists but cannot be re-attached.
    async fn resume_updates(
        &self,
        config: &UpdateConfig,
        tx: SampleSender,
    ) -> Result<Option<SubscriptionHandle>>;

    /// Unregister a subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing was registered.
    fn stop_updates(&self, handle: SubscriptionHandle) -> Result<()>;

    /// Whether a subscription is registered, including one left behind by a
    /// previous process.
    fn has_active_subscription(&self) -> bool;
}
