//! Tracking lifecycle.
//!
//! The [`TrackingController`] is the single authority over whether location
//! tracking runs. It negotiates permissions, registers and unregisters the
//! platform subscription, owns the delivery worker, and publishes its state
//! for the UI layer to render.
//!
//! ```text
//! Idle --start()--> PermissionPending --granted--> Active --stop()--> Stopping --> Idle
//!                          |
//!                          +--denied / setup failure--> Idle
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TrackingConfig;
use crate::coordinate::Coordinate;
use crate::error::{Error, Result};
use crate::platform::{
    ForegroundIndicator, LocationPlatform, PermissionScope, PermissionStatus, SubscriptionHandle,
    UpdateConfig,
};
use crate::reporter::LocationReporter;
use crate::session::Session;
use crate::sink::Sink;

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// No subscription.
    Idle,
    /// Waiting for the user to answer a permission prompt.
    PermissionPending,
    /// Subscription registered; samples are being delivered.
    Active,
    /// Releasing the subscription.
    Stopping,
}

impl TrackingState {
    /// Whether tracking is running.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for TrackingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::PermissionPending => write!(f, "permission pending"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Snapshot of the controller for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingStatus {
    /// Lifecycle state.
    pub state: TrackingState,
    /// Most recent sample, delivered or not.
    pub last_known: Option<Coordinate>,
    /// Message of the last start/restore failure, cleared on success.
    pub last_error: Option<String>,
    /// Successful deliveries since the controller was created.
    pub delivered: u64,
    /// Failed delivery attempts since the controller was created.
    pub failed: u64,
}

/// How the controller subscribes and delivers.
#[derive(Debug, Clone)]
pub struct TrackingOptions {
    /// Subscription parameters.
    pub update: UpdateConfig,
    /// Keep tracking while the app is in the background.
    pub background: bool,
    /// How long a delivery waits for the identity provider's first report.
    pub identity_timeout: Duration,
    /// Samples buffered between the platform and the delivery worker.
    pub channel_capacity: usize,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self::from(&TrackingConfig::default())
    }
}

impl From<&TrackingConfig> for TrackingOptions {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            update: UpdateConfig {
                accuracy: config.accuracy,
                min_interval: Duration::from_millis(config.min_interval_ms),
                min_distance_m: config.min_distance_m,
                indicator: config.background.then(|| ForegroundIndicator {
                    title: config.indicator_title.clone(),
                    body: config.indicator_body.clone(),
                }),
            },
            background: config.background,
            identity_timeout: Duration::from_millis(config.identity_timeout_ms),
            channel_capacity: config.channel_capacity.max(1),
        }
    }
}

impl TrackingOptions {
    /// Subscription parameters. Background tracking always carries an
    /// indicator; foreground-only tracking never does.
    fn update_config(&self) -> UpdateConfig {
        let mut update = self.update.clone();
        if !self.background {
            update.indicator = None;
        } else if update.indicator.is_none() {
            update.indicator = Some(ForegroundIndicator::default());
        }
        update
    }
}

/// The one live subscription and its delivery worker.
#[derive(Debug)]
struct TrackingSession {
    handle: SubscriptionHandle,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl TrackingSession {
    /// Tell the worker to stop after any delivery in progress.
    fn release(self) {
        self.shutdown.send_replace(true);
        debug!(
            id = self.handle.id(),
            finished = self.worker.is_finished(),
            "Released delivery worker"
        );
    }
}

/// Starts, stops and restores location tracking.
#[derive(Debug)]
pub struct TrackingController {
    platform: Arc<dyn LocationPlatform>,
    reporter: LocationReporter,
    options: TrackingOptions,
    state: watch::Sender<TrackingState>,
    session: tokio::sync::Mutex<Option<TrackingSession>>,
    last_error: Mutex<Option<String>>,
}

impl TrackingController {
    /// Create an idle controller.
    ///
    /// The sink and session are used by the delivery worker for every sample;
    /// the controller holds no other identity state.
    #[must_use]
    pub fn new(
        platform: Arc<dyn LocationPlatform>,
        sink: Arc<dyn Sink>,
        session: Session,
        options: TrackingOptions,
    ) -> Self {
        let reporter = LocationReporter::new(sink, session, options.identity_timeout);
        let (state, _) = watch::channel(TrackingState::Idle);
        Self {
            platform,
            reporter,
            options,
            state,
            session: tokio::sync::Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TrackingState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<TrackingState> {
        self.state.subscribe()
    }

    /// Snapshot for display.
    #[must_use]
    pub fn status(&self) -> TrackingStatus {
        TrackingStatus {
            state: self.state(),
            last_known: self.reporter.last_known(),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            delivered: self.reporter.delivered(),
            failed: self.reporter.failed(),
        }
    }

    fn set_state(&self, state: TrackingState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Tracking state changed");
        }
    }

    fn set_error(&self, error: Option<&Error>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error.map(ToString::to_string);
    }

    /// Record a failed start and fall back to idle.
    fn fail(&self, error: Error) -> Error {
        warn!(error = %error, "Could not start tracking");
        self.set_error(Some(&error));
        self.set_state(TrackingState::Idle);
        error
    }

    async fn request(&self, scope: PermissionScope) -> PermissionStatus {
        let answer = match scope {
            PermissionScope::Foreground => self.platform.request_foreground_permission().await,
            PermissionScope::Background => self.platform.request_background_permission().await,
        };
        answer.unwrap_or_else(|e| {
            warn!(%scope, error = %e, "Permission request failed");
            PermissionStatus::Denied
        })
    }

    async fn acquire_permissions(&self) -> Result<()> {
        if !self.request(PermissionScope::Foreground).await.is_granted() {
            return Err(Error::permission_denied(PermissionScope::Foreground));
        }
        if self.options.background && !self.request(PermissionScope::Background).await.is_granted()
        {
            return Err(Error::permission_denied(PermissionScope::Background));
        }
        Ok(())
    }

    fn spawn_worker(
        &self,
        handle: SubscriptionHandle,
        samples: mpsc::Receiver<Coordinate>,
    ) -> TrackingSession {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(self.reporter.clone().run(samples, shutdown_rx));
        TrackingSession {
            handle,
            shutdown,
            worker,
        }
    }

    /// Start tracking.
    ///
    /// Does nothing if tracking is already active; concurrent calls are
    /// serialized, so at most one subscription is ever registered. After the
    /// subscription is up, one position is fetched immediately and delivered
    /// ahead of the first periodic sample.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] if a required permission is
    /// refused and [`Error::SubscriptionSetup`] if the platform cannot
    /// register the subscription. The controller is idle afterwards.
    pub async fn start(&self) -> Result<TrackingState> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            debug!("Tracking already active, ignoring start");
            return Ok(TrackingState::Active);
        }

        self.set_state(TrackingState::PermissionPending);
        if let Err(e) = self.acquire_permissions().await {
            return Err(self.fail(e));
        }

        let update = self.options.update_config();
        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));

        // queued before the platform gets the sender so it is always delivered first
        match self.platform.current_location().await {
            Ok(sample) => {
                if tx.send(sample).await.is_err() {
                    debug!("Update channel closed before the first fix was queued");
                }
            }
            Err(e) => warn!(error = %e, "Could not fetch initial location"),
        }

        let handle = match self.platform.start_updates(&update, tx).await {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(Error::subscription_setup(e.to_string()))),
        };

        *slot = Some(self.spawn_worker(handle, rx));
        self.set_error(None);
        self.set_state(TrackingState::Active);
        drop(slot);

        info!(
            platform = self.platform.name(),
            id = handle.id(),
            background = self.options.background,
            "Tracking started"
        );

        Ok(TrackingState::Active)
    }

    /// Stop tracking.
    ///
    /// Always leaves the controller idle. When nothing is active this does
    /// nothing. A delivery already under way is allowed to finish.
    pub async fn stop(&self) {
        let mut slot = self.session.lock().await;

        let Some(session) = slot.take() else {
            debug!("Tracking not active, nothing to stop");
            self.set_state(TrackingState::Idle);
            return;
        };

        self.set_state(TrackingState::Stopping);
        if let Err(e) = self.platform.stop_updates(session.handle) {
            warn!(error = %e, "Platform reported a problem unregistering updates");
        }
        let id = session.handle.id();
        session.release();
        self.set_state(TrackingState::Idle);

        info!(id, "Tracking stopped");
    }

    /// Re-attach to a subscription left registered by an earlier process.
    ///
    /// Call once at startup. The platform is asked whether a subscription is
    /// registered; if so the controller resumes delivering and reports
    /// active, otherwise it reports idle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SubscriptionSetup`] if a registration exists but the
    /// platform cannot re-attach to it.
    pub async fn restore(&self) -> Result<TrackingState> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Ok(TrackingState::Active);
        }

        if !self.platform.has_active_subscription() {
            debug!("No registered subscription to restore");
            self.set_state(TrackingState::Idle);
            return Ok(TrackingState::Idle);
        }

        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        match self
            .platform
            .resume_updates(&self.options.update_config(), tx)
            .await
        {
            Ok(Some(handle)) => {
                *slot = Some(self.spawn_worker(handle, rx));
                self.set_error(None);
                self.set_state(TrackingState::Active);
                info!(id = handle.id(), "Tracking restored");
                Ok(TrackingState::Active)
            }
            Ok(None) => {
                self.set_state(TrackingState::Idle);
                Ok(TrackingState::Idle)
            }
            Err(e) => Err(self.fail(Error::subscription_setup(e.to_string()))),
        }
    }

    /// Tear down for process exit.
    ///
    /// With background tracking the platform subscription stays registered
    /// so that a later [`TrackingController::restore`] can pick it up; only
    /// the in-process worker goes away. Without background tracking this is
    /// the same as [`TrackingController::stop`].
    pub async fn shutdown(self) {
        if !self.options.background {
            self.stop().await;
            return;
        }

        if let Some(session) = self.session.lock().await.take() {
            info!(
                id = session.handle.id(),
                "Leaving location updates registered for background delivery"
            );
            session.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::LocalIdentity;
    use crate::testing::{FakePlatform, RecordingSink};
    use std::sync::atomic::Ordering;

    struct Harness {
        platform: Arc<FakePlatform>,
        sink: Arc<RecordingSink>,
        identity: LocalIdentity,
        controller: TrackingController,
    }

    fn harness_with(platform: FakePlatform, sink: RecordingSink, background: bool) -> Harness {
        let platform = Arc::new(platform);
        let sink = Arc::new(sink);
        let identity = LocalIdentity::new();
        let options = TrackingOptions {
            background,
            identity_timeout: Duration::from_millis(100),
            ..TrackingOptions::default()
        };
        let controller = TrackingController::new(
            platform.clone(),
            sink.clone(),
            Session::observe(&identity),
            options,
        );
        Harness {
            platform,
            sink,
            identity,
            controller,
        }
    }

    fn harness(platform: FakePlatform) -> Harness {
        harness_with(platform, RecordingSink::new(), true)
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let h = harness(FakePlatform::granting());
        assert_eq!(h.controller.state(), TrackingState::Idle);
        let status = h.controller.status();
        assert!(status.last_known.is_none());
        assert_eq!(status.delivered, 0);
    }

    #[tokio::test]
    async fn test_start_becomes_active_and_delivers_eager_fix() {
        let h = harness(FakePlatform::granting());

        let state = h.controller.start().await.unwrap();
        assert_eq!(state, TrackingState::Active);
        assert_eq!(h.controller.state(), TrackingState::Active);
        assert_eq!(h.platform.starts.load(Ordering::SeqCst), 1);

        h.sink.wait_for(1).await;
        let records = h.sink.records();
        assert!((records[0].latitude - 4.6).abs() < f64::EPSILON);
        assert!((records[0].longitude + 74.1).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_eager_fix_precedes_samples_emitted_on_subscribe() {
        let platform = FakePlatform::granting().emitting_on_start(Coordinate::now(9.0, 9.0));
        let h = harness(platform);

        h.controller.start().await.unwrap();

        h.sink.wait_for(2).await;
        let records = h.sink.records();
        assert_eq!(records.len(), 2);
        assert!((records[0].latitude - 4.6).abs() < f64::EPSILON);
        assert!((records[1].latitude - 9.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_start_passes_update_config() {
        let h = harness(FakePlatform::granting());
        h.controller.start().await.unwrap();

        let config = h.platform.last_config().unwrap();
        assert_eq!(config.min_interval, Duration::from_secs(5));
        assert!((config.min_distance_m - 5.0).abs() < f64::EPSILON);
        // background tracking always carries the indicator
        assert!(config.indicator.is_some());
    }

    #[tokio::test]
    async fn test_foreground_denied_stays_idle() {
        let h = harness(FakePlatform::granting().deny_foreground());

        let err = h.controller.start().await.unwrap_err();
        assert!(matches!(
            err,
            Error::PermissionDenied {
                scope: PermissionScope::Foreground
            }
        ));
        assert_eq!(h.controller.state(), TrackingState::Idle);
        assert_eq!(h.platform.starts.load(Ordering::SeqCst), 0);
        assert_eq!(h.platform.background_prompts.load(Ordering::SeqCst), 0);
        assert!(h.controller.status().last_error.unwrap().contains("foreground"));
    }

    #[tokio::test]
    async fn test_background_denied_stays_idle() {
        let h = harness(FakePlatform::granting().deny_background());

        let err = h.controller.start().await.unwrap_err();
        assert!(matches!(
            err,
            Error::PermissionDenied {
                scope: PermissionScope::Background
            }
        ));
        assert_eq!(h.controller.state(), TrackingState::Idle);
        assert_eq!(h.platform.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_background_not_requested_when_foreground_only() {
        let h = harness_with(
            FakePlatform::granting().deny_background(),
            RecordingSink::new(),
            false,
        );

        h.controller.start().await.unwrap();
        assert_eq!(h.controller.state(), TrackingState::Active);
        assert_eq!(h.platform.background_prompts.load(Ordering::SeqCst), 0);
        assert!(h.platform.last_config().unwrap().indicator.is_none());
    }

    #[tokio::test]
    async fn test_subscription_failure_stays_idle() {
        let h = harness(FakePlatform::granting().failing_subscribe());

        let err = h.controller.start().await.unwrap_err();
        assert!(matches!(err, Error::SubscriptionSetup { .. }));
        assert_eq!(h.controller.state(), TrackingState::Idle);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let h = harness(FakePlatform::granting());

        h.controller.start().await.unwrap();
        h.controller.start().await.unwrap();
        h.controller.start().await.unwrap();

        assert_eq!(h.platform.starts.load(Ordering::SeqCst), 1);
        assert_eq!(h.platform.foreground_prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_starts_register_once() {
        let h = harness(FakePlatform::granting().slow_permissions(Duration::from_millis(20)));

        let (a, b, c) = tokio::join!(
            h.controller.start(),
            h.controller.start(),
            h.controller.start()
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(h.platform.starts.load(Ordering::SeqCst), 1);
        assert_eq!(h.controller.state(), TrackingState::Active);
    }

    #[tokio::test]
    async fn test_stop_returns_to_idle() {
        let h = harness(FakePlatform::granting());
        h.controller.start().await.unwrap();

        h.controller.stop().await;
        assert_eq!(h.controller.state(), TrackingState::Idle);
        assert_eq!(h.platform.stops.load(Ordering::SeqCst), 1);
        assert!(!h.platform.has_active_subscription());
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let h = harness(FakePlatform::granting());

        h.controller.stop().await;
        assert_eq!(h.controller.state(), TrackingState::Idle);
        assert_eq!(h.platform.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let h = harness(FakePlatform::granting());
        h.controller.start().await.unwrap();
        h.controller.stop().await;
        h.controller.start().await.unwrap();

        assert_eq!(h.platform.starts.load(Ordering::SeqCst), 2);
        assert_eq!(h.controller.state(), TrackingState::Active);
    }

    #[tokio::test]
    async fn test_samples_delivered_in_order() {
        let h = harness(FakePlatform::granting().without_fix());
        h.controller.start().await.unwrap();

        for lat in [10.0, 20.0, 30.0] {
            assert!(h.platform.emit(Coordinate::now(lat, 0.0)).await);
        }
        h.sink.wait_for(3).await;

        let lats: Vec<f64> = h.sink.records().iter().map(|r| r.latitude).collect();
        assert_eq!(lats, vec![10.0, 20.0, 30.0]);
        assert_eq!(h.sink.attempts().len(), 3);
        assert!((h.controller.status().last_known.unwrap().latitude - 30.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_tracking_active() {
        let h = harness(FakePlatform::granting().without_fix());
        h.sink.fail_with(Some(500));
        h.controller.start().await.unwrap();

        assert!(h.platform.emit(Coordinate::now(1.0, 1.0)).await);
        h.sink.wait_for(1).await;
        tokio::task::yield_now().await;

        assert_eq!(h.controller.state(), TrackingState::Active);

        h.sink.fail_with(None);
        assert!(h.platform.emit(Coordinate::now(2.0, 2.0)).await);
        h.sink.wait_for(2).await;

        assert_eq!(h.controller.state(), TrackingState::Active);
        assert!(h.controller.status().last_error.is_none());
    }

    #[tokio::test]
    async fn test_missing_identity_drops_sample_only() {
        let h = harness_with(
            FakePlatform::granting().without_fix(),
            RecordingSink::requiring_identity(),
            true,
        );
        h.controller.start().await.unwrap();

        assert!(h.platform.emit(Coordinate::now(1.0, 1.0)).await);
        h.sink.wait_for(1).await;
        assert_eq!(h.controller.state(), TrackingState::Active);

        h.identity.sign_in("uid-5", None);
        assert!(h.platform.emit(Coordinate::now(2.0, 2.0)).await);
        h.sink.wait_for(2).await;

        let attempts = h.sink.attempts();
        assert!(!attempts[0].1.is_authenticated());
        assert_eq!(attempts[1].1.id(), Some("uid-5"));
    }

    #[tokio::test]
    async fn test_restore_with_registered_subscription() {
        let h = harness(FakePlatform::granting().already_registered().without_fix());

        let state = h.controller.restore().await.unwrap();
        assert_eq!(state, TrackingState::Active);
        assert_eq!(h.controller.state(), TrackingState::Active);
        assert_eq!(h.platform.resumes.load(Ordering::SeqCst), 1);
        assert_eq!(h.platform.starts.load(Ordering::SeqCst), 0);

        // the re-attached worker delivers
        assert!(h.platform.emit(Coordinate::now(7.0, 7.0)).await);
        h.sink.wait_for(1).await;

        // start after restore does not register again
        h.controller.start().await.unwrap();
        assert_eq!(h.platform.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restore_without_registration() {
        let h = harness(FakePlatform::granting());

        let state = h.controller.restore().await.unwrap();
        assert_eq!(state, TrackingState::Idle);
        assert_eq!(h.platform.resumes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let h = harness(FakePlatform::granting());
        let mut rx = h.controller.subscribe_state();

        h.controller.start().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), TrackingState::Active);

        h.controller.stop().await;
        assert_eq!(*rx.borrow_and_update(), TrackingState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_with_background_keeps_registration() {
        let h = harness(FakePlatform::granting());
        h.controller.start().await.unwrap();

        h.controller.shutdown().await;
        assert!(h.platform.has_active_subscription());
        assert_eq!(h.platform.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_foreground_only_unregisters() {
        let h = harness_with(FakePlatform::granting(), RecordingSink::new(), false);
        h.controller.start().await.unwrap();

        h.controller.shutdown().await;
        assert!(!h.platform.has_active_subscription());
    }

    #[test]
    fn test_options_from_config() {
        let mut config = TrackingConfig::default();
        config.background = false;
        config.min_interval_ms = 1_000;
        let options = TrackingOptions::from(&config);

        assert!(!options.background);
        assert_eq!(options.update.min_interval, Duration::from_secs(1));
        assert!(options.update.indicator.is_none());
    }

    #[test]
    fn test_update_config_fills_indicator_for_background() {
        let mut options = TrackingOptions::default();
        options.background = true;
        options.update.indicator = None;

        assert!(options.update_config().indicator.is_some());

        options.background = false;
        options.update.indicator = Some(ForegroundIndicator::default());
        assert!(options.update_config().indicator.is_none());
    }

    #[test]
    fn test_tracking_state_display() {
        assert_eq!(TrackingState::Idle.to_string(), "idle");
        assert_eq!(TrackingState::PermissionPending.to_string(), "permission pending");
        assert_eq!(TrackingState::Active.to_string(), "active");
        assert_eq!(TrackingState::Stopping.to_string(), "stopping");
        assert!(TrackingState::Active.is_active());
        assert!(!TrackingState::Idle.is_active());
    }
}
