// Process configuration, read from environment variables

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::cache::MissPolicy;
use crate::logging::LogFormat;
use crate::source::{RetryConfig, SourceConfig};
use crate::store::StoreSettings;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub store: StoreSettings,
    pub source: SourceConfig,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            store: StoreSettings::default(),
            source: SourceConfig::default(),
            log_format: LogFormat::Compact,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, falling back to defaults for
    /// keys that are not set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let load = Loader { lookup };

        let single_flight: bool = load.parse_or("CACHE_SINGLE_FLIGHT", false)?;

        Ok(Self {
            port: load.parse_or("PORT", defaults.port)?,
            store: StoreSettings {
                menu_ttl: load.millis_or("CACHE_TTL_MENU", defaults.store.menu_ttl)?,
                allergens_ttl: load
                    .millis_or("CACHE_TTL_ALLERGENS", defaults.store.allergens_ttl)?,
                miss_policy: if single_flight {
                    MissPolicy::SingleFlight
                } else {
                    MissPolicy::Independent
                },
            },
            source: SourceConfig {
                base_url: load
                    .raw("SOURCE_BASE_URL")
                    .unwrap_or(defaults.source.base_url),
                timeout_ms: load.parse_or("FETCH_TIMEOUT_MS", defaults.source.timeout_ms)?,
                retry: RetryConfig {
                    max_retries: load
                        .parse_or("FETCH_MAX_RETRIES", defaults.source.retry.max_retries)?,
                    ..defaults.source.retry
                },
            },
            log_format: load.parse_or("LOG_FORMAT", defaults.log_format)?,
        })
    }
}

struct Loader<F> {
    lookup: F,
}

impl<F> Loader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + std::fmt::Debug,
        T::Err: Display,
    {
        match self.raw(key) {
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            }),
            None => {
                info!("{key} not set, using default: {default:?}");
                Ok(default)
            }
        }
    }

    fn millis_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let millis = self.parse_or(key, default.as_millis() as u64)?;
        Ok(Duration::from_millis(millis))
    }
}
