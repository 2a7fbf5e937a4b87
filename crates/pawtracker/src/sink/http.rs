//! HTTP API sink.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{outcome, DeliveryError, DeliveryResult, HttpRequest, HttpTransport, Sink};
use crate::coordinate::DeliveryRecord;
use crate::session::UserIdentity;

/// Path appended to the base URL.
const UPDATE_LOCATION_PATH: &str = "/update-location";

/// Posts each record as JSON to `{base_url}/update-location`.
///
/// The user identity is not sent; the API is expected to know who is
/// reporting by other means.
#[derive(Debug, Clone)]
pub struct HttpSink {
    endpoint: String,
    transport: Arc<dyn HttpTransport>,
}

impl HttpSink {
    /// Create a sink for the API at `base_url`.
    #[must_use]
    pub fn new(base_url: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            endpoint: format!("{}{UPDATE_LOCATION_PATH}", base_url.trim_end_matches('/')),
            transport,
        }
    }

    /// The full URL records are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    fn requires_identity(&self) -> bool {
        false
    }

    async fn deliver(&self, record: &DeliveryRecord, _identity: &UserIdentity) -> DeliveryResult {
        let body = serde_json::to_value(record).map_err(|e| DeliveryError::Encode(e.to_string()))?;

        debug!(
            lat = record.latitude,
            lon = record.longitude,
            endpoint = %self.endpoint,
            "Posting location"
        );

        let response = self
            .transport
            .send(HttpRequest::post_json(&self.endpoint, body))
            .await
            .map_err(|e| {
                warn!(error = %e, "Location post failed");
                DeliveryError::from(e)
            })?;

        outcome(self.name(), &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::Coordinate;
    use crate::sink::Method;
    use crate::testing::RecordingTransport;
    use serde_json::json;

    fn record() -> DeliveryRecord {
        DeliveryRecord::from(&Coordinate::now(4.6, -74.1))
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let transport = Arc::new(RecordingTransport::ok());
        let sink = HttpSink::new("http://192.168.1.3:3001/", transport);
        assert_eq!(sink.endpoint(), "http://192.168.1.3:3001/update-location");
    }

    #[tokio::test]
    async fn test_deliver_posts_exactly_once() {
        let transport = Arc::new(RecordingTransport::ok());
        let sink = HttpSink::new("http://api.test", transport.clone());
        let record = record();

        let delivered = sink
            .deliver(&record, &UserIdentity::anonymous())
            .await
            .unwrap();
        assert_eq!(delivered.status, 200);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.url, "http://api.test/update-location");
        assert_eq!(req.header("Accept"), Some("application/json"));
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        assert_eq!(
            req.body,
            json!({"latitude": 4.6, "longitude": -74.1, "timestamp": record.timestamp})
        );
    }

    #[tokio::test]
    async fn test_deliver_non_success_uses_error_field() {
        let transport = Arc::new(RecordingTransport::responding(
            422,
            r#"{"error":"latitude out of range"}"#,
        ));
        let sink = HttpSink::new("http://api.test", transport.clone());

        let err = sink
            .deliver(&record(), &UserIdentity::anonymous())
            .await
            .unwrap_err();
        match err {
            DeliveryError::Http { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "latitude out of range");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_deliver_transport_failure() {
        let transport = Arc::new(RecordingTransport::unreachable());
        let sink = HttpSink::new("http://api.test", transport.clone());

        let err = sink
            .deliver(&record(), &UserIdentity::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Transport { .. }));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_identity_is_ignored() {
        let transport = Arc::new(RecordingTransport::ok());
        let sink = HttpSink::new("http://api.test", transport.clone());

        sink.deliver(&record(), &UserIdentity::signed_in("uid-1", None))
            .await
            .unwrap();
        let body = &transport.requests()[0].body;
        assert!(body.get("uid").is_none());
    }
}
