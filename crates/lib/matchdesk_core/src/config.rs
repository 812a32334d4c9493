// @zen-component: CFG-SessionConfig
//
//! Session configuration.
//!
//! Everything is read from environment variables. The CLI exposes a flag
//! for each one and lets clap fall back to the variable.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::session::store::default_session_path;

pub const DEFAULT_AUTH_URL: &str = "http://127.0.0.1:54321/functions/v1";
pub const DEFAULT_DEVICE_NAME: &str = "matchdesk";
pub const DEFAULT_TRUST_WINDOW_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 7 * 60 * 60;

/// Upper bound for every duration setting: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL in {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Knobs the controller itself consults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    /// How long a cached identity is trusted without asking the server.
    ///
    /// This is a security trade-off: inside the window a token revoked on
    /// the server keeps working locally until the next verify or refresh.
    /// `None` always verifies.
    pub trust_window: Option<Duration>,
    /// Upper bound for each network call the controller makes.
    pub request_timeout: Duration,
    /// Sent with every login.
    pub device_name: String,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            trust_window: Some(Duration::from_secs(DEFAULT_TRUST_WINDOW_SECS)),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
        }
    }
}

/// Full configuration for building a controller and its collaborators.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the auth endpoints (`auth/login` etc. are joined onto it).
    pub auth_url: Url,
    /// Public API key, sent as `apikey` and as the default bearer.
    pub api_key: Option<String>,
    /// Base URL of the secondary data API. `None` disables the data client.
    pub data_url: Option<Url>,
    pub session_file: PathBuf,
    /// Background refresh period. `None` disables the refresher.
    pub refresh_interval: Option<Duration>,
    pub policy: SessionPolicy,
}

impl SessionConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                          | Default                                  |
    /// |-----------------------------------|------------------------------------------|
    /// | `MATCHDESK_AUTH_URL`              | `http://127.0.0.1:54321/functions/v1`    |
    /// | `MATCHDESK_API_KEY`               | unset                                    |
    /// | `MATCHDESK_DATA_URL`              | unset (no data client)                   |
    /// | `MATCHDESK_DEVICE_NAME`           | `matchdesk`                              |
    /// | `MATCHDESK_TRUST_WINDOW_SECS`     | `86400` (`0` disables)                   |
    /// | `MATCHDESK_REQUEST_TIMEOUT_SECS`  | `10`                                     |
    /// | `MATCHDESK_REFRESH_INTERVAL_SECS` | `25200` (`0` disables)                   |
    /// | `MATCHDESK_SESSION_FILE`          | `<data dir>/matchdesk/session.json`      |
    ///
    /// Durations are whole seconds and may not exceed [`MAX_DURATION_SECS`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let auth_url = parse_url(
            "MATCHDESK_AUTH_URL",
            &var("MATCHDESK_AUTH_URL").unwrap_or_else(|| DEFAULT_AUTH_URL.into()),
        )?;
        let data_url = var("MATCHDESK_DATA_URL")
            .map(|raw| parse_url("MATCHDESK_DATA_URL", &raw))
            .transpose()?;

        let trust_window = parse_secs(
            "MATCHDESK_TRUST_WINDOW_SECS",
            var("MATCHDESK_TRUST_WINDOW_SECS"),
            DEFAULT_TRUST_WINDOW_SECS,
        )?;
        let refresh_interval = parse_secs(
            "MATCHDESK_REFRESH_INTERVAL_SECS",
            var("MATCHDESK_REFRESH_INTERVAL_SECS"),
            DEFAULT_REFRESH_INTERVAL_SECS,
        )?;
        let request_timeout = parse_secs(
            "MATCHDESK_REQUEST_TIMEOUT_SECS",
            var("MATCHDESK_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?
        .ok_or(ConfigError::InvalidValue {
            name: "MATCHDESK_REQUEST_TIMEOUT_SECS",
            value: "0".into(),
        })?;

        Ok(Self {
            auth_url,
            api_key: var("MATCHDESK_API_KEY"),
            data_url,
            session_file: var("MATCHDESK_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(default_session_path),
            refresh_interval,
            policy: SessionPolicy {
                trust_window,
                request_timeout,
                device_name: var("MATCHDESK_DEVICE_NAME")
                    .unwrap_or_else(|| DEFAULT_DEVICE_NAME.into()),
            },
        })
    }
}

pub fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl { name, source })
}

/// Whole seconds up to [`MAX_DURATION_SECS`]; `0` means "disabled".
fn parse_secs(
    name: &'static str,
    raw: Option<String>,
    default: u64,
) -> Result<Option<Duration>, ConfigError> {
    let secs = match raw {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs <= MAX_DURATION_SECS => secs,
            _ => return Err(ConfigError::InvalidValue { name, value: raw }),
        },
        None => default,
    };
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
