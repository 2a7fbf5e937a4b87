//! Error types for pawtracker.
//!
//! This module defines the crate-wide error type. Component modules keep
//! their own narrower error enums (`DeliveryError`, `PlatformError`,
//! `TransportError`). Delivery errors convert into [`Error`]; platform
//! failures are reported by the controller as permission or subscription
//! errors.

use thiserror::Error;

use crate::platform::PermissionScope;
use crate::sink::DeliveryError;

/// The main error type for pawtracker operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Tracking Errors ===
    /// The user denied a location permission.
    #[error("{scope} location permission denied")]
    PermissionDenied {
        /// Which permission was denied.
        scope: PermissionScope,
    },

    /// The platform refused to register the location subscription.
    #[error("failed to start location updates: {message}")]
    SubscriptionSetup {
        /// Description of what went wrong.
        message: String,
    },

    // === Identity Errors ===
    /// An operation needed a signed-in user and there was none.
    #[error("not authenticated")]
    IdentityMissing,

    /// Signing in with the identity provider failed.
    #[error("sign-in failed: {message}")]
    SignIn {
        /// Description of what went wrong.
        message: String,
    },

    // === Delivery Errors ===
    /// A single delivery attempt failed.
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },
}

/// A specialized Result type for pawtracker operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a permission denied error.
    #[must_use]
    pub fn permission_denied(scope: PermissionScope) -> Self {
        Self::PermissionDenied { scope }
    }

    /// Create a subscription setup error.
    #[must_use]
    pub fn subscription_setup(message: impl Into<String>) -> Self {
        Self::SubscriptionSetup {
            message: message.into(),
        }
    }

    /// Create a sign-in error.
    #[must_use]
    pub fn sign_in(message: impl Into<String>) -> Self {
        Self::SignIn {
            message: message.into(),
        }
    }

    /// Check if this error is a permission issue.
    #[must_use]
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// Check if this error means nobody is signed in.
    #[must_use]
    pub fn is_identity_missing(&self) -> bool {
        matches!(
            self,
            Self::IdentityMissing | Self::Delivery(DeliveryError::NotAuthenticated)
        )
    }
}
