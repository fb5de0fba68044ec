//! Runtime configuration.
//!
//! Everything comes from environment variables with logged defaults; the
//! first command-line argument, when present, overrides the API base URL.

use std::path::PathBuf;
use std::time::Duration;

use crate::feed::FeedConfig;
use crate::retry::RetryPolicy;

const DEFAULT_API_URL: &str = "http://localhost:8000/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    pub token: Option<String>,
    pub login: Option<Credentials>,
    pub request_timeout: Duration,
    pub feed: FeedConfig,
    pub log_file: PathBuf,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

impl Config {
    /// Build the configuration from the process environment and arguments.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), std::env::args().nth(1))
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, url_arg: Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_url = url_arg.or_else(|| var("FLEET_API_URL")).unwrap_or_else(|| {
            tracing::trace!("FLEET_API_URL not set, using default: {DEFAULT_API_URL}");
            DEFAULT_API_URL.to_string()
        });

        let login = match (var("FLEET_API_EMAIL"), var("FLEET_API_PASSWORD")) {
            (Some(email), Some(password)) => Some(Credentials { email, password }),
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!("FLEET_API_EMAIL and FLEET_API_PASSWORD must both be set, skipping login");
                None
            }
            (None, None) => None,
        };

        let millis = |key: &str, default: u64| Duration::from_millis(number(var(key), key, default));

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: number(var("FLEET_MAX_RETRIES"), "FLEET_MAX_RETRIES", defaults.max_retries),
            base_delay: millis("FLEET_RETRY_BASE_MS", 3_000),
            max_delay: millis("FLEET_RETRY_CAP_MS", 30_000),
        };

        let log_file = var("FLEETWATCH_LOG")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("fleetwatch.log"));

        Self {
            api_url,
            token: var("FLEET_API_TOKEN"),
            login,
            request_timeout: millis("FLEET_REQUEST_TIMEOUT_MS", 10_000),
            feed: FeedConfig {
                poll_interval: millis("FLEET_POLL_INTERVAL_MS", 10_000),
                retry,
            },
            log_file,
        }
    }
}

/// Parse a numeric setting, falling back to `default` when absent or bad.
fn number<T>(raw: Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match raw {
        None => {
            tracing::trace!("{key} not set, using default: {default}");
            default
        }
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("{key}={raw:?} is not a valid number, using default: {default}");
            default
        }),
    }
}
