//! Location platform backed by a replayed track.
//!
//! Permission prompts are answered from configuration. The subscription is
//! recorded in a registration file so that a later process can see it and
//! re-attach, the way a mobile OS keeps a background location task alive
//! across app restarts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use pawtracker_replay::{Fix, ReplayHandle, TrackReplayer};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    LocationPlatform, PermissionStatus, PlatformError, Result, SampleSender, SubscriptionHandle,
    UpdateConfig, UpdateFilter,
};
use crate::coordinate::Coordinate;

/// Configuration for [`ReplayPlatform`].
#[derive(Debug, Clone)]
pub struct ReplayPlatformConfig {
    /// Answer to the foreground permission prompt.
    pub grant_foreground: bool,

    /// Answer to the background permission prompt.
    pub grant_background: bool,

    /// Where the subscription registration is recorded.
    pub registration_path: PathBuf,
}

/// Contents of the registration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Registration {
    id: u64,
    registered_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ActiveFeed {
    id: u64,
    stop: ReplayHandle,
    task: JoinHandle<()>,
}

/// A [`LocationPlatform`] that plays back a recorded track.
#[derive(Debug)]
pub struct ReplayPlatform {
    replayer: TrackReplayer,
    config: ReplayPlatformConfig,
    feed: Mutex<Option<ActiveFeed>>,
    next_id: AtomicU64,
}

impl ReplayPlatform {
    /// Create a platform around a replayer.
    #[must_use]
    pub fn new(replayer: TrackReplayer, config: ReplayPlatformConfig) -> Self {
        Self {
            replayer,
            config,
            feed: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Path of the registration file.
    #[must_use]
    pub fn registration_path(&self) -> &Path {
        &self.config.registration_path
    }

    fn read_registration(&self) -> Option<Registration> {
        let text = std::fs::read_to_string(&self.config.registration_path).ok()?;
        match serde_json::from_str(&text) {
            Ok(registration) => Some(registration),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable registration file");
                None
            }
        }
    }

    fn write_registration(&self, registration: &Registration) -> Result<()> {
        let path = &self.config.registration_path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PlatformError::SubscriptionFailed(format!(
                    "cannot create {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let json = serde_json::to_string(registration)
            .map_err(|e| PlatformError::Internal(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| {
            PlatformError::SubscriptionFailed(format!("cannot write {}: {e}", path.display()))
        })
    }

    fn remove_registration(&self) -> bool {
        match std::fs::remove_file(&self.config.registration_path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(error = %e, "Failed to remove registration file");
                false
            }
        }
    }

    fn halt_feed(&self) -> bool {
        let feed = self
            .feed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        match feed {
            Some(feed) => {
                debug!(id = feed.id, "Halting replay feed");
                feed.stop.stop();
                feed.task.abort();
                true
            }
            None => false,
        }
    }

    /// Spawn the task that plays the track through the update filter into `tx`.
    fn spawn_feed(&self, id: u64, config: &UpdateConfig, tx: SampleSender) {
        self.halt_feed();

        if let Some(indicator) = &config.indicator {
            info!(title = %indicator.title, body = %indicator.body, "Showing tracking indicator");
        }

        let replayer = self.replayer.clone();
        let stop = replayer.stop_handle();
        let mut filter = UpdateFilter::new(config);
        let (fix_tx, mut fix_rx) = mpsc::channel::<Fix>(16);

        let task = tokio::spawn(async move {
            let forward = async move {
                while let Some(fix) = fix_rx.recv().await {
                    let sample = Coordinate::from(fix);
                    if !filter.accept(&sample) {
                        continue;
                    }
                    if tx.send(sample).await.is_err() {
                        debug!("Sample receiver dropped, ending feed");
                        break;
                    }
                }
            };
            tokio::join!(replayer.run(fix_tx), forward);
        });

        *self
            .feed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(ActiveFeed { id, stop, task });
    }
}

#[async_trait::async_trait]
impl LocationPlatform for ReplayPlatform {
    fn name(&self) -> &'static str {
        pawtracker_replay::device_name()
    }

    async fn request_foreground_permission(&self) -> Result<PermissionStatus> {
        info!(granted = self.config.grant_foreground, "Foreground location permission requested");
        Ok(if self.config.grant_foreground {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        })
    }

    async fn request_background_permission(&self) -> Result<PermissionStatus> {
        info!(granted = self.config.grant_background, "Background location permission requested");
        Ok(if self.config.grant_background {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        })
    }

    async fn current_location(&self) -> Result<Coordinate> {
        Ok(self.replayer.current_fix().into())
    }

    async fn start_updates(
        &self,
        config: &UpdateConfig,
        tx: SampleSender,
    ) -> Result<SubscriptionHandle> {
        if let Some(previous) = self.read_registration() {
            warn!(id = previous.id, "Replacing existing location registration");
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.write_registration(&Registration {
            id,
            registered_at: Utc::now(),
        })?;
        self.spawn_feed(id, config, tx);

        info!(
            id,
            accuracy = %config.accuracy,
            interval_ms = config.min_interval.as_millis(),
            distance_m = config.min_distance_m,
            "Location updates registered"
        );
        Ok(SubscriptionHandle::new(id))
    }

    async fn resume_updates(
        &self,
        config: &UpdateConfig,
        tx: SampleSender,
    ) -> Result<Option<SubscriptionHandle>> {
        let Some(registration) = self.read_registration() else {
            return Ok(None);
        };

        // keep ids issued by this process above the resumed one
        self.next_id
            .fetch_max(registration.id + 1, Ordering::SeqCst);
        self.spawn_feed(registration.id, config, tx);

        info!(
            id = registration.id,
            since = %registration.registered_at,
            "Re-attached to location registration"
        );
        Ok(Some(SubscriptionHandle::new(registration.id)))
    }

    fn stop_updates(&self, handle: SubscriptionHandle) -> Result<()> {
        let halted = self.halt_feed();
        let removed = self.remove_registration();

        if !halted && !removed {
            return Err(PlatformError::NotRegistered);
        }

        info!(id = handle.id(), "Location updates unregistered");
        Ok(())
    }

    fn has_active_subscription(&self) -> bool {
        self.config.registration_path.exists()
    }
}

impl Drop for ReplayPlatform {
    fn drop(&mut self) {
        // the registration file outlives the process; the in-process feed does not
        self.halt_feed();
    }
}
