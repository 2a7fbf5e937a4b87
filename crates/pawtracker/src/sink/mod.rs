//! Delivery sinks.
//!
//! A sink takes one [`DeliveryRecord`] and makes exactly one attempt to get
//! it to a remote system. There is no retry and no queueing: a failed attempt
//! is reported to the caller and the record is gone.

pub mod http;
pub mod realtime;
pub mod transport;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::{SinkConfig, SinkKind};
use crate::coordinate::DeliveryRecord;
use crate::error::{Error, Result};
use crate::session::UserIdentity;

pub use http::HttpSink;
pub use realtime::RealtimeStoreSink;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport, TransportError};

/// Message used when a failed response carries no `error` field.
const GENERIC_FAILURE: &str = "request failed";

/// Why a delivery attempt failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The sink needs a signed-in user and there was none.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The server answered with a non-success status.
    #[error("server responded {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// The response's `error` field, or a generic message.
        message: String,
    },

    /// No response was received.
    #[error("transport error: {cause}")]
    Transport {
        /// What went wrong.
        cause: String,
    },

    /// The record could not be turned into a request.
    #[error("failed to encode record: {0}")]
    Encode(String),
}

impl From<TransportError> for DeliveryError {
    fn from(err: TransportError) -> Self {
        Self::Transport {
            cause: err.to_string(),
        }
    }
}

/// A successful delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    /// HTTP status code.
    pub status: u16,
    /// Response body (JSON, or a JSON string when the body was not JSON).
    pub body: Value,
}

/// Outcome of one delivery attempt.
pub type DeliveryResult = std::result::Result<Delivered, DeliveryError>;

/// A destination for location records.
#[async_trait::async_trait]
pub trait Sink: Send + Sync + std::fmt::Debug {
    /// Name of the sink, for logging.
    fn name(&self) -> &'static str;

    /// Whether [`Sink::deliver`] needs a signed-in user.
    fn requires_identity(&self) -> bool;

    /// Make one delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] describing why the attempt failed.
    async fn deliver(&self, record: &DeliveryRecord, identity: &UserIdentity) -> DeliveryResult;
}

/// Turn a response into a delivery outcome, logging the body either way.
pub(crate) fn outcome(sink: &'static str, response: &HttpResponse) -> DeliveryResult {
    let body = response.json_body();
    debug!(sink, status = response.status, body = %body, "Sink response");

    if response.is_success() {
        return Ok(Delivered {
            status: response.status,
            body,
        });
    }

    let message = body
        .get("error")
        .and_then(|e| match e {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .unwrap_or_else(|| GENERIC_FAILURE.to_string());

    Err(DeliveryError::Http {
        status: response.status,
        message,
    })
}

/// Build the sink selected by configuration.
///
/// # Errors
///
/// Returns an error if the selected sink is missing its endpoint.
pub fn build_sink(config: &SinkConfig, transport: Arc<dyn HttpTransport>) -> Result<Arc<dyn Sink>> {
    match config.kind {
        SinkKind::Http => Ok(Arc::new(HttpSink::new(&config.http.base_url, transport))),
        SinkKind::Realtime => {
            let url = config.realtime.database_url.as_deref().ok_or_else(|| {
                Error::ConfigValidation {
                    message: "sink.realtime.database_url is required for the realtime sink"
                        .to_string(),
                }
            })?;
            Ok(Arc::new(RealtimeStoreSink::new(url, transport)))
        }
    }
}
