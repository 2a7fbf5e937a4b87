//! Realtime database sink.
//!
//! Writes go to `users/{uid}/location` through the database's REST interface
//! (`PUT {database_url}/users/{uid}/location.json`). Each write replaces the
//! previous value; there is no history and no merge.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{outcome, DeliveryError, DeliveryResult, HttpRequest, HttpTransport, Sink};
use crate::coordinate::DeliveryRecord;
use crate::session::UserIdentity;

/// Characters the database does not allow in a path segment.
const FORBIDDEN_KEY_CHARS: &[char] = &['.', '#', '$', '[', ']', '/'];

/// Logical database path holding a user's latest location.
#[must_use]
pub fn location_path(user_id: &str) -> String {
    format!("users/{user_id}/location")
}

/// Overwrites the signed-in user's location node with each record.
#[derive(Debug, Clone)]
pub struct RealtimeStoreSink {
    database_url: String,
    transport: Arc<dyn HttpTransport>,
}

impl RealtimeStoreSink {
    /// Create a sink for the database at `database_url`.
    #[must_use]
    pub fn new(database_url: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            database_url: database_url.trim_end_matches('/').to_string(),
            transport,
        }
    }

    /// REST URL for a user's location node, with the auth token if present.
    fn url_for(&self, user_id: &str, token: Option<&str>) -> Result<String, DeliveryError> {
        if user_id.is_empty() || user_id.contains(FORBIDDEN_KEY_CHARS) {
            return Err(DeliveryError::Encode(format!(
                "user id '{user_id}' is not a valid database key"
            )));
        }

        let raw = format!("{}/{}.json", self.database_url, location_path(user_id));
        let mut url = reqwest::Url::parse(&raw)
            .map_err(|e| DeliveryError::Encode(format!("invalid database URL '{raw}': {e}")))?;
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url.into())
    }
}

#[async_trait::async_trait]
impl Sink for RealtimeStoreSink {
    fn name(&self) -> &'static str {
        "realtime"
    }

    fn requires_identity(&self) -> bool {
        true
    }

    async fn deliver(&self, record: &DeliveryRecord, identity: &UserIdentity) -> DeliveryResult {
        let Some(user_id) = identity.id() else {
            debug!("No signed-in user, skipping location write");
            return Err(DeliveryError::NotAuthenticated);
        };

        let url = self.url_for(user_id, identity.token())?;
        let body = serde_json::to_value(record).map_err(|e| DeliveryError::Encode(e.to_string()))?;

        debug!(
            user = user_id,
            lat = record.latitude,
            lon = record.longitude,
            "Writing location"
        );

        let response = self
            .transport
            .send(HttpRequest::put_json(url, body))
            .await
            .map_err(|e| {
                warn!(error = %e, user = user_id, "Location write failed");
                DeliveryError::from(e)
            })?;

        outcome(self.name(), &response)
    }
}
