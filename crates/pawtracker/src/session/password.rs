//! Email/password sign-in against a hosted identity service.
//!
//! The service exposes `POST {auth_url}/accounts:signInWithPassword?key=..`
//! and answers with the user's id (`localId`) and an ID token (`idToken`).
//! A successful sign-in is published through a [`LocalIdentity`], so
//! sessions observe it like any other provider.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{IdentityCallback, IdentityProvider, LocalIdentity, Subscription, UserIdentity};
use crate::error::{Error, Result};
use crate::sink::{HttpRequest, HttpTransport};

/// Message shown when the credentials are rejected.
const INVALID_CREDENTIALS: &str = "invalid email or password";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    id_token: Option<String>,
}

/// Identity provider that signs users in with email and password.
#[derive(Debug, Clone)]
pub struct PasswordSignIn {
    auth_url: String,
    api_key: String,
    transport: Arc<dyn HttpTransport>,
    identity: LocalIdentity,
}

impl PasswordSignIn {
    /// Create a sign-in client for the service at `auth_url`.
    #[must_use]
    pub fn new(auth_url: &str, api_key: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            auth_url: auth_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            transport,
            identity: LocalIdentity::new(),
        }
    }

    fn sign_in_url(&self) -> Result<String> {
        let raw = format!("{}/accounts:signInWithPassword", self.auth_url);
        let mut url = reqwest::Url::parse(&raw).map_err(|e| Error::ConfigValidation {
            message: format!("invalid auth URL '{raw}': {e}"),
        })?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url.into())
    }

    /// Sign in and publish the user to subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SignIn`] if the credentials are rejected or the
    /// service cannot be reached.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserIdentity> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(Error::sign_in("email and password are required"));
        }

        let request = HttpRequest::post_json(
            self.sign_in_url()?,
            json!({
                "email": email.trim(),
                "password": password,
                "returnSecureToken": true,
            }),
        );

        debug!(email = email.trim(), "Signing in");
        let response = self.transport.send(request).await.map_err(|e| {
            warn!(error = %e, "Identity service unreachable");
            Error::sign_in(format!("could not reach identity service: {e}"))
        })?;

        if !response.is_success() {
            let body = response.json_body();
            let reason = body
                .pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown");
            warn!(status = response.status, reason, "Sign-in rejected");
            return Err(if response.status == 400 {
                Error::sign_in(INVALID_CREDENTIALS)
            } else {
                Error::sign_in(format!("identity service responded {}", response.status))
            });
        }

        let parsed: SignInResponse = serde_json::from_str(&response.body)
            .map_err(|e| Error::sign_in(format!("malformed sign-in response: {e}")))?;

        self.identity
            .sign_in(parsed.local_id.clone(), parsed.id_token.as_deref());
        info!(user = %parsed.local_id, "Signed in");

        Ok(UserIdentity::signed_in(
            parsed.local_id,
            parsed.id_token.as_deref(),
        ))
    }

    /// Sign out and publish the change.
    pub fn sign_out(&self) {
        self.identity.sign_out();
    }
}

impl IdentityProvider for PasswordSignIn {
    fn subscribe(&self, callback: IdentityCallback) -> Subscription {
        self.identity.subscribe(callback)
    }
}
