//! Session and identity.
//!
//! A [`Session`] observes an [`IdentityProvider`] and publishes whoever is
//! currently signed in. It subscribes once when created, updates its value on
//! every notification, and unsubscribes when the last clone is dropped.
//!
//! There is no synchronous "who is signed in" query: until the provider has
//! sent its first notification the identity is unknown, and callers wait for
//! it.

mod local;
mod password;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub use local::LocalIdentity;
pub use password::PasswordSignIn;

/// The signed-in user, or nobody.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct UserIdentity {
    id: Option<String>,
    token: Option<String>,
}

impl UserIdentity {
    /// Nobody is signed in.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A signed-in user with an optional provider token.
    #[must_use]
    pub fn signed_in(id: impl Into<String>, token: Option<&str>) -> Self {
        Self {
            id: Some(id.into()),
            token: token.map(str::to_string),
        }
    }

    /// The user id, if someone is signed in.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The provider token, if one was issued.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether someone is signed in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }
}

impl std::fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserIdentity")
            .field("id", &self.id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Callback invoked by a provider on every authentication state change.
pub type IdentityCallback = Box<dyn Fn(UserIdentity) + Send + Sync>;

/// Registration with an identity provider; unsubscribes when dropped.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap the action that removes the registration.
    #[must_use]
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the registration now.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// An external source of authentication state.
pub trait IdentityProvider: Send + Sync {
    /// Register for state changes.
    ///
    /// Providers may invoke the callback immediately with the current state.
    fn subscribe(&self, callback: IdentityCallback) -> Subscription;
}

#[derive(Debug)]
struct SessionInner {
    identity: watch::Receiver<Option<UserIdentity>>,
    _subscription: Subscription,
}

/// Publishes the current user as reported by an identity provider.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start observing a provider.
    #[must_use]
    pub fn observe(provider: &dyn IdentityProvider) -> Self {
        let (tx, rx) = watch::channel(None);

        let subscription = provider.subscribe(Box::new(move |identity: UserIdentity| {
            debug!(user = ?identity.id(), "Identity changed");
            tx.send_replace(Some(identity));
        }));

        Self {
            inner: Arc::new(SessionInner {
                identity: rx,
                _subscription: subscription,
            }),
        }
    }

    /// Wait for the provider's first notification and return the current user.
    ///
    /// Resolves to anonymous if the provider goes away without notifying.
    pub async fn identity(&self) -> UserIdentity {
        let mut rx = self.inner.identity.clone();
        // bound so the borrow guard is released before `rx` goes out of scope
        #[allow(clippy::let_and_return)]
        let identity = match rx.wait_for(Option::is_some).await {
            Ok(current) => current.clone().unwrap_or_default(),
            Err(_) => UserIdentity::anonymous(),
        };
        identity
    }

    /// Like [`Session::identity`], giving up after `timeout`.
    pub async fn identity_within(&self, timeout: Duration) -> UserIdentity {
        if let Ok(identity) = tokio::time::timeout(timeout, self.identity()).await {
            identity
        } else {
            warn!(
                timeout_ms = timeout.as_millis(),
                "Identity provider has not reported yet, treating as signed out"
            );
            UserIdentity::anonymous()
        }
    }

    /// Like [`Session::identity_within`], failing when nobody is signed in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityMissing`] if the provider reports no user or
    /// does not report before `timeout`.
    pub async fn require_identity(&self, timeout: Duration) -> Result<UserIdentity> {
        let identity = self.identity_within(timeout).await;
        if identity.is_authenticated() {
            Ok(identity)
        } else {
            Err(Error::IdentityMissing)
        }
    }

    /// Wait for the provider's next notification and return the user it
    /// reported.
    ///
    /// Resolves to anonymous if the provider goes away first.
    pub async fn changed(&self) -> UserIdentity {
        let mut rx = self.inner.identity.clone();
        rx.borrow_and_update();
        #[allow(clippy::let_and_return)]
        let identity = match rx.changed().await {
            Ok(()) => rx.borrow().clone().unwrap_or_default(),
            Err(_) => UserIdentity::anonymous(),
        };
        identity
    }

    /// Receiver that observes every identity change.
    ///
    /// Holds `None` until the provider's first notification.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<UserIdentity>> {
        self.inner.identity.clone()
    }
}
