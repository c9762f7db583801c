//! Runtime configuration shared by the connection lifecycle components.
//!
//! [`CoreConfig`] bundles the timeouts and memory bounds used by asynchronous
//! requests, the timeout reaper and upgraded connections. It can be built in
//! code through [`CoreConfigBuilder`] or deserialised by the embedding system;
//! durations are expressed in milliseconds on the wire.

use std::{num::NonZeroUsize, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default asynchronous request timeout.
pub const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_secs(30);
/// Default interval between reaper sweeps.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(1);
/// Default maximum size of an assembled inbound message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 8 * 1024;
/// Default outbound fragmentation threshold.
pub const DEFAULT_MAX_FRAME_PAYLOAD: usize = 64 * 1024;
/// Default limit on bytes queued for a session before sends are refused.
pub const DEFAULT_SEND_BUFFER_LIMIT: usize = 1024 * 1024;

const fn nz(value: usize) -> NonZeroUsize {
    match NonZeroUsize::new(value) {
        Some(value) => value,
        None => NonZeroUsize::MIN,
    }
}

/// Errors returned when validating a [`CoreConfig`].
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The reaper would spin without pausing.
    #[error("reaper interval must be greater than zero")]
    ZeroReaperInterval,
    /// The initial read buffer is larger than any frame we accept.
    #[error("initial read buffer {buffer} exceeds the message limit {limit}")]
    BufferExceedsMessageLimit {
        /// Configured initial read buffer.
        buffer: usize,
        /// Configured maximum message size.
        limit: usize,
    },
}

/// Timeouts and bounds for asynchronous requests and upgraded connections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Timeout armed when a request suspends. Zero disables the timeout.
    #[serde(rename = "async_timeout_ms", with = "duration_ms")]
    pub async_timeout: Duration,
    /// Interval between reaper sweeps.
    #[serde(rename = "reaper_interval_ms", with = "duration_ms")]
    pub reaper_interval: Duration,
    /// Largest inbound message accepted before the connection is closed.
    pub max_message_size: NonZeroUsize,
    /// Initial size of the per-connection read buffer.
    pub initial_read_buffer: NonZeroUsize,
    /// Largest payload carried by a single outbound frame.
    pub max_frame_payload: NonZeroUsize,
    /// Bytes that may be queued for a session before sends are refused.
    pub send_buffer_limit: NonZeroUsize,
    /// Idle period after which an upgraded session is closed.
    #[serde(rename = "session_idle_timeout_ms", with = "option_duration_ms")]
    pub session_idle_timeout: Option<Duration>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            async_timeout: DEFAULT_ASYNC_TIMEOUT,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            max_message_size: nz(DEFAULT_MAX_MESSAGE_SIZE),
            initial_read_buffer: nz(DEFAULT_MAX_MESSAGE_SIZE),
            max_frame_payload: nz(DEFAULT_MAX_FRAME_PAYLOAD),
            send_buffer_limit: nz(DEFAULT_SEND_BUFFER_LIMIT),
            session_idle_timeout: None,
        }
    }
}

impl CoreConfig {
    /// Start building a configuration from the defaults.
    #[must_use]
    pub fn builder() -> CoreConfigBuilder { CoreConfigBuilder::default() }

    /// Check the cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reaper_interval.is_zero() {
            return Err(ConfigError::ZeroReaperInterval);
        }
        if self.initial_read_buffer > self.max_message_size {
            return Err(ConfigError::BufferExceedsMessageLimit {
                buffer: self.initial_read_buffer.get(),
                limit: self.max_message_size.get(),
            });
        }
        Ok(())
    }

    /// The asynchronous timeout, or `None` when disabled.
    #[must_use]
    pub fn async_timeout(&self) -> Option<Duration> {
        (!self.async_timeout.is_zero()).then_some(self.async_timeout)
    }
}

/// Builder for [`CoreConfig`].
///
/// ```
/// use std::{num::NonZeroUsize, time::Duration};
///
/// use duplexwire::config::CoreConfig;
///
/// let config = CoreConfig::builder()
///     .async_timeout(Duration::from_secs(5))
///     .max_message_size(NonZeroUsize::new(64 * 1024).expect("non-zero"))
///     .build()
///     .expect("valid configuration");
/// assert_eq!(config.async_timeout(), Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// Set the asynchronous request timeout. Zero disables it.
    #[must_use]
    pub fn async_timeout(mut self, timeout: Duration) -> Self {
        self.config.async_timeout = timeout;
        self
    }

    /// Set the interval between reaper sweeps.
    #[must_use]
    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.config.reaper_interval = interval;
        self
    }

    /// Set the largest inbound message accepted.
    #[must_use]
    pub fn max_message_size(mut self, size: NonZeroUsize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the initial size of the read buffer.
    #[must_use]
    pub fn initial_read_buffer(mut self, size: NonZeroUsize) -> Self {
        self.config.initial_read_buffer = size;
        self
    }

    /// Set the outbound fragmentation threshold.
    #[must_use]
    pub fn max_frame_payload(mut self, size: NonZeroUsize) -> Self {
        self.config.max_frame_payload = size;
        self
    }

    /// Set the per-session send buffer limit.
    #[must_use]
    pub fn send_buffer_limit(mut self, size: NonZeroUsize) -> Self {
        self.config.send_buffer_limit = size;
        self
    }

    /// Close sessions idle for longer than `timeout`.
    #[must_use]
    pub fn session_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.session_idle_timeout = timeout;
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the settings are inconsistent.
    pub fn build(self) -> Result<CoreConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(
        clippy::ref_option,
        reason = "serde's `with` attribute passes the field by reference"
    )]
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::duration_ms::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn defaults_are_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.async_timeout(), Some(DEFAULT_ASYNC_TIMEOUT));
    }

    #[rstest]
    fn zero_timeout_disables_async_timeout() {
        let config = CoreConfig::builder()
            .async_timeout(Duration::ZERO)
            .build()
            .expect("valid config");
        assert_eq!(config.async_timeout(), None);
    }

    #[rstest]
    fn zero_reaper_interval_is_rejected() {
        let err = CoreConfig::builder()
            .reaper_interval(Duration::ZERO)
            .build()
            .expect_err("zero interval must fail");
        assert_eq!(err, ConfigError::ZeroReaperInterval);
    }

    #[rstest]
    fn read_buffer_larger_than_message_limit_is_rejected() {
        let err = CoreConfig::builder()
            .max_message_size(nz(128))
            .initial_read_buffer(nz(256))
            .build()
            .expect_err("buffer above limit must fail");
        assert_eq!(
            err,
            ConfigError::BufferExceedsMessageLimit {
                buffer: 256,
                limit: 128
            }
        );
    }
}
