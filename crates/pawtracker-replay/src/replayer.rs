//! Track playback.
//!
//! The replayer walks a [`Track`] one position per step and sends each
//! position through a channel as a [`Fix`], the way a receiver would report
//! successive GPS fixes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, trace, warn};

use crate::track::Track;

/// A single position reported by the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    /// Latitude in degrees.
    pub latitude: f64,

    /// Longitude in degrees.
    pub longitude: f64,

    /// When the device produced this fix.
    pub captured_at: DateTime<Utc>,
}

impl Fix {
    /// Create a fix stamped with the current time.
    #[must_use]
    pub fn now(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            captured_at: Utc::now(),
        }
    }
}

/// Configuration for the replayer.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Time between successive fixes.
    pub step: Duration,

    /// Start over from the first position after the last one.
    pub loop_track: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(1),
            loop_track: true,
        }
    }
}

/// Plays back a track as a stream of fixes.
///
/// Clones share the playback position and running flag, so a clone can be
/// moved into a task while the original answers one-shot position queries.
#[derive(Debug, Clone)]
pub struct TrackReplayer {
    track: Arc<Track>,
    config: ReplayConfig,
    running: Arc<AtomicBool>,
    cursor: Arc<AtomicUsize>,
}

impl TrackReplayer {
    /// Create a replayer with default configuration.
    #[must_use]
    pub fn new(track: Track) -> Self {
        Self::with_config(track, ReplayConfig::default())
    }

    /// Create a replayer with custom configuration.
    #[must_use]
    pub fn with_config(track: Track, config: ReplayConfig) -> Self {
        Self {
            track: Arc::new(track),
            config,
            running: Arc::new(AtomicBool::new(false)),
            cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Check if playback is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The replayer configuration.
    #[must_use]
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// The device's current position, without advancing playback.
    ///
    /// Before playback starts this is the first position of the track.
    #[must_use]
    pub fn current_fix(&self) -> Fix {
        let emitted = self.cursor.load(Ordering::SeqCst);
        let index = emitted.saturating_sub(1);
        let (lat, lon) = self.position(index);
        Fix::now(lat, lon)
    }

    fn position(&self, index: usize) -> (f64, f64) {
        let len = self.track.len();
        let index = if self.config.loop_track {
            index % len
        } else {
            index.min(len - 1)
        };
        // index is in bounds after the clamp above
        self.track.get(index).unwrap_or((0.0, 0.0))
    }

    fn next_fix(&self) -> Option<Fix> {
        let index = self.cursor.load(Ordering::SeqCst);
        if !self.config.loop_track && index >= self.track.len() {
            return None;
        }
        self.cursor.store(index + 1, Ordering::SeqCst);
        let (lat, lon) = self.position(index);
        Some(Fix::now(lat, lon))
    }

    /// Play the track, sending one fix per step through the channel.
    ///
    /// Runs until `stop()` is called, the receiver is dropped, or a
    /// non-looping track is exhausted.
    pub async fn run(&self, tx: mpsc::Sender<Fix>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Track replay already running");
            return;
        }

        debug!(
            step_ms = self.config.step.as_millis(),
            points = self.track.len(),
            "Starting track replay"
        );

        let mut ticker = interval(self.config.step);

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;

            // stop() may have landed while we were waiting for the tick
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let Some(fix) = self.next_fix() else {
                debug!("Track exhausted");
                break;
            };

            trace!(lat = fix.latitude, lon = fix.longitude, "Replaying fix");
            if tx.send(fix).await.is_err() {
                debug!("Fix channel closed, stopping replay");
                break;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        debug!("Track replay stopped");
    }

    /// Stop playback.
    pub fn stop(&self) {
        debug!("Stopping track replay");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Get a handle that can be used to stop playback from another task.
    #[must_use]
    pub fn stop_handle(&self) -> ReplayHandle {
        ReplayHandle {
            running: Arc::clone(&self.running),
        }
    }
}

/// A handle to control a running replay.
#[derive(Debug, Clone)]
pub struct ReplayHandle {
    running: Arc<AtomicBool>,
}

impl ReplayHandle {
    /// Stop the associated replay.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the replay is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
