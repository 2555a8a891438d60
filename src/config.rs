//! Client configuration.
//!
//! [`ClientConfig`] is layered with the `config` crate: built-in defaults,
//! then an optional file (format picked from its extension), then `COURIER_*`
//! environment variables. Nested keys use a double underscore, for example
//! `COURIER_RETRY__MAX_ATTEMPTS=5`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dedup::Registry;
use crate::events::EventBus;
use crate::response::KeyMap;
use crate::retry::{ExponentialBackoff, FixedInterval, NoRetry, RetryPolicy};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration for a [`Client`](crate::Client).
///
/// # Examples
///
/// ```rust
/// use courier::config::ClientConfig;
///
/// let config = ClientConfig::default();
/// assert!(config.deduplication);
/// assert_eq!(config.identifier_cache_capacity, 100);
/// assert_eq!(config.key_map.message, "msg");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Version stamped on cache entries; entries from other versions are ignored.
    pub app_version: String,
    /// Timeout applied to requests that do not set their own.
    pub default_timeout_ms: u64,
    /// Global switch for in-flight deduplication.
    pub deduplication: bool,
    /// Capacity of the canonical-string to identifier memo.
    pub identifier_cache_capacity: usize,
    /// Default envelope field names.
    pub key_map: KeyMap,
    pub retry: RetryConfig,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_owned(),
            default_timeout_ms: 30_000,
            deduplication: true,
            identifier_cache_capacity: Registry::DEFAULT_IDENTIFIER_CAPACITY,
            key_map: KeyMap::default(),
            retry: RetryConfig::default(),
            event_capacity: EventBus::DEFAULT_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from an optional file plus `COURIER_*` environment
    /// variables, then validates it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "loading client configuration file");
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("COURIER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a string in the given format, then validates it.
    pub fn parse(contents: &str, format: ::config::FileFormat) -> Result<Self, ConfigError> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from_str(contents, format))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "default_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        for (field, name) in [
            ("key_map.code", &self.key_map.code),
            ("key_map.data", &self.key_map.data),
            ("key_map.message", &self.key_map.message),
        ] {
            if name.is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "field name must not be empty".into(),
                });
            }
        }
        self.retry.validate()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Which default retry policy a client installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryKind {
    #[default]
    None,
    Fixed,
    Exponential,
}

/// Settings for the client's default retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub kind: RetryKind,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay (exponential) or interval (fixed).
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Fraction of the delay used as random spread, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            kind: RetryKind::None,
            max_attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == RetryKind::None {
            return Ok(());
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier",
                reason: format!("must be a finite number >= 1, got {}", self.multiplier),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid {
                field: "retry.jitter",
                reason: format!("must be within [0, 1], got {}", self.jitter),
            });
        }
        Ok(())
    }

    /// Attempts the built policy allows.
    pub fn effective_attempts(&self) -> u32 {
        match self.kind {
            RetryKind::None => 1,
            RetryKind::Fixed | RetryKind::Exponential => self.max_attempts.max(1),
        }
    }

    pub fn build_policy(&self) -> Arc<dyn RetryPolicy> {
        let base = Duration::from_millis(self.base_delay_ms);
        match self.kind {
            RetryKind::None => Arc::new(NoRetry),
            RetryKind::Fixed => {
                Arc::new(FixedInterval::new(base, self.jitter, self.max_attempts))
            }
            RetryKind::Exponential => Arc::new(ExponentialBackoff::new(
                base,
                self.multiplier,
                Duration::from_millis(self.max_delay_ms),
                self.jitter,
                self.max_attempts,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::config::FileFormat;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry.effective_attempts(), 1);
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let config = ClientConfig::parse(
            r#"
            app_version = "2.4.0"
            deduplication = false

            [key_map]
            message = "message"

            [retry]
            kind = "exponential"
            max_attempts = 4
            jitter = 0.0
            "#,
            FileFormat::Toml,
        )
        .unwrap();

        assert_eq!(config.app_version, "2.4.0");
        assert!(!config.deduplication);
        assert_eq!(config.key_map, KeyMap::new("code", "data", "message"));
        assert_eq!(config.retry.kind, RetryKind::Exponential);
        assert_eq!(config.retry.effective_attempts(), 4);
        assert_eq!(config.retry.build_policy().max_attempts(), 4);
        assert_eq!(config.default_timeout_ms, 30_000);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = ClientConfig::parse("default_timeout_ms = 0", FileFormat::Toml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "default_timeout_ms",
                ..
            }
        ));

        let err = ClientConfig::parse(
            "[retry]\nkind = \"fixed\"\njitter = 1.5",
            FileFormat::Toml,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "retry.jitter", .. }));
    }

    #[test]
    fn malformed_input_is_a_load_error() {
        let err = ClientConfig::parse("retry = [", FileFormat::Toml).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
