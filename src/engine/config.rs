//! Cookie store configuration.
//!
//! `CookieStoreConfig` holds the limits and tunables shared by every
//! execution context that talks to one [`CookieService`](crate::cookies::CookieService).
//! It provides sensible defaults via [`Default`] and a fluent
//! [`CookieStoreConfig::builder()`] for customization with validation.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use gosub_cookie_store::config::CookieStoreConfig;
//! let cfg = CookieStoreConfig::default();
//! assert_eq!(cfg.max_name_value_bytes, 4096);
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use std::time::Duration;
//! use gosub_cookie_store::config::CookieStoreConfig;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = CookieStoreConfig::builder()
//!     .max_cookies(50)
//!     .channel_capacity(16)
//!     .sweep_interval(Duration::from_secs(30))
//!     .build()?; // returns Result<CookieStoreConfig, ConfigError>
//! # Ok(()) }
//! ```
//!
//! # Fields (summary)
//! - `max_name_value_bytes`: Combined UTF-8 size of name and value (default: 4096).
//! - `max_attribute_bytes`: Size of the `domain` and `path` attributes (default: 1024).
//! - `max_cookies`: Number of records a single jar may hold (default: 180).
//! - `max_expiry_age`: Expiries further in the future are clamped to this age (default: 400 days).
//! - `channel_capacity`: Bound of every observer's delivery queue (default: 128).
//! - `sweep_interval`: Period of the background expiry sweeper, if any (default: none).

use std::fmt;
use std::time::Duration;

use crate::engine::DEFAULT_CHANNEL_CAPACITY;

const DEFAULT_MAX_EXPIRY_AGE: Duration = Duration::from_secs(400 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct CookieStoreConfig {
    pub max_name_value_bytes: usize,
    pub max_attribute_bytes: usize,
    pub max_cookies: usize,
    pub max_expiry_age: Duration,
    pub channel_capacity: usize,
    pub sweep_interval: Option<Duration>,
}

impl Default for CookieStoreConfig {
    fn default() -> Self {
        Self {
            max_name_value_bytes: 4096,
            max_attribute_bytes: 1024,
            max_cookies: 180,
            max_expiry_age: DEFAULT_MAX_EXPIRY_AGE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            sweep_interval: None,
        }
    }
}

impl CookieStoreConfig {
    pub fn builder() -> CookieStoreConfigBuilder {
        CookieStoreConfigBuilder::default()
    }

    /// Maximum expiry age in milliseconds, saturated to `i64`.
    pub(crate) fn max_expiry_age_millis(&self) -> i64 {
        i64::try_from(self.max_expiry_age.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Builder for [`CookieStoreConfig`].
#[derive(Debug, Clone, Default)]
pub struct CookieStoreConfigBuilder {
    inner: CookieStoreConfig,
}

impl CookieStoreConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut CookieStoreConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn max_name_value_bytes(self, n: usize) -> Self { self.map(|c| c.max_name_value_bytes = n) }
    pub fn max_attribute_bytes(self, n: usize) -> Self { self.map(|c| c.max_attribute_bytes = n) }
    pub fn max_cookies(self, n: usize) -> Self { self.map(|c| c.max_cookies = n) }
    pub fn max_expiry_age(self, age: Duration) -> Self { self.map(|c| c.max_expiry_age = age) }
    pub fn channel_capacity(self, n: usize) -> Self { self.map(|c| c.channel_capacity = n) }
    pub fn sweep_interval(self, every: Duration) -> Self { self.map(|c| c.sweep_interval = Some(every)) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut CookieStoreConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<CookieStoreConfig, ConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroLimit(&'static str),
    ZeroChannelCapacity,
    ZeroSweepInterval,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroLimit(field) => write!(f, "{field} must be at least 1"),
            ConfigError::ZeroChannelCapacity => write!(f, "channel_capacity must be at least 1"),
            ConfigError::ZeroSweepInterval => write!(f, "sweep_interval must be non-zero"),
        }
    }
}
impl std::error::Error for ConfigError {}

fn validate(c: &CookieStoreConfig) -> Result<(), ConfigError> {
    if c.max_name_value_bytes == 0 {
        return Err(ConfigError::ZeroLimit("max_name_value_bytes"));
    }
    if c.max_attribute_bytes == 0 {
        return Err(ConfigError::ZeroLimit("max_attribute_bytes"));
    }
    if c.max_cookies == 0 {
        return Err(ConfigError::ZeroLimit("max_cookies"));
    }
    if c.max_expiry_age.is_zero() {
        return Err(ConfigError::ZeroLimit("max_expiry_age"));
    }
    if c.channel_capacity == 0 {
        return Err(ConfigError::ZeroChannelCapacity);
    }
    if c.sweep_interval.is_some_and(|d| d.is_zero()) {
        return Err(ConfigError::ZeroSweepInterval);
    }
    Ok(())
}
