//! In-process identity provider.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::info;

use super::{IdentityCallback, IdentityProvider, Subscription, UserIdentity};

type Listener = Arc<dyn Fn(UserIdentity) + Send + Sync>;

#[derive(Default)]
struct State {
    current: UserIdentity,
    listeners: HashMap<u64, Listener>,
    next_id: u64,
}

/// An identity provider whose state is set directly by the application.
///
/// New subscribers are told the current state immediately, the way an
/// auth-state listener behaves. Clones share state.
#[derive(Clone, Default)]
pub struct LocalIdentity {
    state: Arc<Mutex<State>>,
}

impl LocalIdentity {
    /// Create a provider with nobody signed in.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user as signed in and notify subscribers.
    pub fn sign_in(&self, id: impl Into<String>, token: Option<&str>) {
        let identity = UserIdentity::signed_in(id, token);
        info!(user = ?identity.id(), "User signed in");
        self.publish(identity);
    }

    /// Mark nobody as signed in and notify subscribers.
    pub fn sign_out(&self) {
        info!("User signed out");
        self.publish(UserIdentity::anonymous());
    }

    /// The state most recently published.
    #[must_use]
    pub fn current(&self) -> UserIdentity {
        self.lock().current.clone()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, identity: UserIdentity) {
        // call listeners outside the lock so they may subscribe or read back
        let listeners: Vec<Listener> = {
            let mut state = self.lock();
            state.current = identity.clone();
            state.listeners.values().cloned().collect()
        };
        for listener in listeners {
            listener(identity.clone());
        }
    }
}

impl IdentityProvider for LocalIdentity {
    fn subscribe(&self, callback: IdentityCallback) -> Subscription {
        let listener: Listener = Arc::from(callback);

        let (id, current) = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.insert(id, Arc::clone(&listener));
            (id, state.current.clone())
        };
        listener(current);

        let state: Weak<Mutex<State>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .listeners
                    .remove(&id);
            }
        })
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LocalIdentity")
            .field("current", &state.current)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    #[tokio::test]
    async fn test_new_subscriber_sees_current_state() {
        let provider = LocalIdentity::new();
        provider.sign_in("uid-1", None);

        let session = Session::observe(&provider);
        assert!(session.watch().borrow().is_some());
        assert_eq!(session.identity().await.id(), Some("uid-1"));
    }

    #[tokio::test]
    async fn test_sign_out_is_published() {
        let provider = LocalIdentity::new();
        provider.sign_in("uid-1", Some("tok"));
        let session = Session::observe(&provider);

        provider.sign_out();
        let identity = session.identity().await;
        assert!(!identity.is_authenticated());
        assert_eq!(identity.token(), None);
    }

    #[test]
    fn test_subscription_drop_removes_listener() {
        let provider = LocalIdentity::new();
        let sub = provider.subscribe(Box::new(|_| {}));
        assert_eq!(provider.listener_count(), 1);

        drop(sub);
        assert_eq!(provider.listener_count(), 0);
    }

    #[test]
    fn test_session_teardown_unsubscribes() {
        let provider = LocalIdentity::new();
        let session = Session::observe(&provider);
        assert_eq!(provider.listener_count(), 1);

        drop(session);
        assert_eq!(provider.listener_count(), 0);
    }

    #[test]
    fn test_current() {
        let provider = LocalIdentity::new();
        assert!(!provider.current().is_authenticated());
        provider.sign_in("uid-9", None);
        assert_eq!(provider.current().id(), Some("uid-9"));
    }

    #[test]
    fn test_debug_hides_listeners() {
        let provider = LocalIdentity::new();
        let _sub = provider.subscribe(Box::new(|_| {}));
        let debug = format!("{provider:?}");
        assert!(debug.contains("listeners: 1"));
    }
}
