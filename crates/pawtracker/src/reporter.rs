//! Sample delivery.
//!
//! The reporter sits between the platform subscription and the sink. It
//! handles one sample at a time, in the order the platform emitted them, and
//! makes exactly one delivery attempt per sample. Failures are logged and
//! counted, never returned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::coordinate::{Coordinate, DeliveryRecord};
use crate::session::{Session, UserIdentity};
use crate::sink::{DeliveryError, Sink};

#[derive(Debug, Default)]
struct ReporterState {
    last_known: Mutex<Option<Coordinate>>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Forwards location samples to a sink.
///
/// Clones share the last-known coordinate and the delivery counters.
#[derive(Debug, Clone)]
pub struct LocationReporter {
    sink: Arc<dyn Sink>,
    session: Session,
    identity_timeout: Duration,
    state: Arc<ReporterState>,
}

impl LocationReporter {
    /// Create a reporter.
    #[must_use]
    pub fn new(sink: Arc<dyn Sink>, session: Session, identity_timeout: Duration) -> Self {
        Self {
            sink,
            session,
            identity_timeout,
            state: Arc::new(ReporterState::default()),
        }
    }

    /// The most recent sample seen, delivered or not.
    #[must_use]
    pub fn last_known(&self) -> Option<Coordinate> {
        *self
            .state
            .last_known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of successful deliveries.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.state.delivered.load(Ordering::Relaxed)
    }

    /// Number of failed delivery attempts, including samples dropped for
    /// lack of a signed-in user.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.state.failed.load(Ordering::Relaxed)
    }

    /// Deliver one sample. Returns whether the sink accepted it.
    pub async fn report(&self, sample: Coordinate) -> bool {
        *self
            .state
            .last_known
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sample);

        let record = DeliveryRecord::from(&sample);

        // identity is re-read for every sample; nothing from the start() call is assumed
        let identity = if self.sink.requires_identity() {
            self.session.identity_within(self.identity_timeout).await
        } else {
            UserIdentity::anonymous()
        };

        match self.sink.deliver(&record, &identity).await {
            Ok(delivered) => {
                self.state.delivered.fetch_add(1, Ordering::Relaxed);
                info!(
                    sink = self.sink.name(),
                    status = delivered.status,
                    lat = record.latitude,
                    lon = record.longitude,
                    "Location delivered"
                );
                true
            }
            Err(DeliveryError::NotAuthenticated) => {
                self.state.failed.fetch_add(1, Ordering::Relaxed);
                warn!(sink = self.sink.name(), "No signed-in user, location sample dropped");
                false
            }
            Err(e) => {
                self.state.failed.fetch_add(1, Ordering::Relaxed);
                warn!(sink = self.sink.name(), error = %e, "Location delivery failed");
                false
            }
        }
    }

    /// Deliver samples from `samples` until the channel closes or `shutdown`
    /// fires. A delivery already under way when `shutdown` fires completes.
    pub async fn run(
        self,
        mut samples: mpsc::Receiver<Coordinate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(sink = self.sink.name(), "Delivery worker started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                sample = samples.recv() => match sample {
                    Some(sample) => {
                        self.report(sample).await;
                    }
                    None => break,
                },
            }
        }

        debug!(
            delivered = self.delivered(),
            failed = self.failed(),
            "Delivery worker stopped"
        );
    }
}
