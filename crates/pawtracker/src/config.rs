//! Configuration management for pawtracker.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::platform::Accuracy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "pawtracker";

/// Default registration marker file name.
const REGISTRATION_FILE_NAME: &str = "tracking.json";

/// Environment variable prefix.
const ENV_PREFIX: &str = "PAWTRACKER_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `PAWTRACKER_`, sections split on `__`)
/// 2. TOML config file at `~/.config/pawtracker/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracking configuration.
    pub tracking: TrackingConfig,
    /// Delivery configuration.
    pub sink: SinkConfig,
    /// Identity configuration.
    pub auth: AuthConfig,
    /// Location device configuration.
    pub platform: PlatformConfig,
}

/// Tracking-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Requested fix accuracy.
    pub accuracy: Accuracy,
    /// Minimum time between samples in milliseconds.
    pub min_interval_ms: u64,
    /// Minimum movement between samples in metres.
    pub min_distance_m: f64,
    /// Keep tracking while the app is in the background.
    pub background: bool,
    /// Title of the indicator shown during background tracking.
    pub indicator_title: String,
    /// Body of the indicator shown during background tracking.
    pub indicator_body: String,
    /// How long a delivery waits for the first identity report.
    pub identity_timeout_ms: u64,
    /// Samples buffered between the platform and the delivery worker.
    pub channel_capacity: usize,
}

/// Which sink receives location records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// POST to a REST endpoint.
    #[default]
    Http,
    /// Overwrite a per-user node in a realtime store.
    Realtime,
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Realtime => write!(f, "realtime"),
        }
    }
}

/// Delivery configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// The active sink.
    pub kind: SinkKind,
    /// Settings for the HTTP sink.
    pub http: HttpSinkConfig,
    /// Settings for the realtime store sink.
    pub realtime: RealtimeSinkConfig,
}

/// HTTP sink configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSinkConfig {
    /// Server base URL; records go to `{base_url}/update-location`.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Realtime store sink configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSinkConfig {
    /// Root URL of the store.
    pub database_url: Option<String>,
}

/// Identity configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Base URL of the password sign-in service.
    pub auth_url: String,
    /// Project API key passed to the sign-in service.
    pub api_key: Option<String>,
    /// Account email.
    pub email: Option<String>,
    /// Account password.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Fixed user id, used instead of signing in.
    pub user_id: Option<String>,
}

/// Location device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Track file to replay. Without one the device stays put.
    pub track_path: Option<PathBuf>,
    /// Time between replayed fixes in milliseconds.
    pub step_ms: u64,
    /// Restart the track after its last position.
    pub loop_track: bool,
    /// Answer to the foreground permission prompt.
    pub grant_foreground: bool,
    /// Answer to the background permission prompt.
    pub grant_background: bool,
    /// Registration marker file.
    /// Defaults to `~/.local/share/pawtracker/tracking.json`
    pub registration_path: Option<PathBuf>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::High,
            min_interval_ms: 5_000,
            min_distance_m: 5.0,
            background: true,
            indicator_title: "PawTracker".to_string(),
            indicator_body: "Sharing your location in the background".to_string(),
            identity_timeout_ms: 2_000,
            channel_capacity: 64,
        }
    }
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.1.3:3001".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_url: "https://identitytoolkit.googleapis.com/v1".to_string(),
            api_key: None,
            email: None,
            password: None,
            user_id: None,
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            track_path: None,
            step_ms: 1_000,
            loop_track: true,
            grant_foreground: true,
            grant_background: true,
            registration_path: None, // resolved to the data dir at runtime
        }
    }
}

impl AuthConfig {
    /// Whether enough is configured to sign in with a password.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.email.is_some() && self.password.is_some()
    }
}

fn check_url(field: &str, raw: &str) -> Result<()> {
    let url = reqwest::Url::parse(raw).map_err(|e| Error::ConfigValidation {
        message: format!("{field} is not a valid URL ({raw}): {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::ConfigValidation {
            message: format!("{field} must be an http or https URL, got {raw}"),
        });
    }
    Ok(())
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails, or if the
    /// result does not validate.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.tracking.min_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "tracking.min_interval_ms must be greater than 0".to_string(),
            });
        }

        if !self.tracking.min_distance_m.is_finite() || self.tracking.min_distance_m < 0.0 {
            return Err(Error::ConfigValidation {
                message: format!(
                    "tracking.min_distance_m must be a non-negative number, got {}",
                    self.tracking.min_distance_m
                ),
            });
        }

        if self.tracking.channel_capacity == 0 {
            return Err(Error::ConfigValidation {
                message: "tracking.channel_capacity must be greater than 0".to_string(),
            });
        }

        if self.platform.step_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "platform.step_ms must be greater than 0".to_string(),
            });
        }

        if self.sink.http.timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "sink.http.timeout_ms must be greater than 0".to_string(),
            });
        }

        check_url("sink.http.base_url", &self.sink.http.base_url)?;
        check_url("auth.auth_url", &self.auth.auth_url)?;

        match (self.sink.kind, &self.sink.realtime.database_url) {
            (_, Some(url)) => check_url("sink.realtime.database_url", url)?,
            (SinkKind::Realtime, None) => {
                return Err(Error::ConfigValidation {
                    message: "sink.realtime.database_url is required when sink.kind is realtime"
                        .to_string(),
                });
            }
            (SinkKind::Http, None) => {}
        }

        Ok(())
    }

    /// Get the registration marker path, resolving defaults if not set.
    #[must_use]
    pub fn registration_path(&self) -> PathBuf {
        self.platform
            .registration_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(REGISTRATION_FILE_NAME))
    }

    /// Get the minimum sample interval as a Duration.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.tracking.min_interval_ms)
    }

    /// Get the identity wait as a Duration.
    #[must_use]
    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.tracking.identity_timeout_ms)
    }

    /// Get the HTTP request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.sink.http.timeout_ms)
    }

    /// Get the replay step as a Duration.
    #[must_use]
    pub fn replay_step(&self) -> Duration {
        Duration::from_millis(self.platform.step_ms)
    }
}
