//! Transfer engine configuration
//!
//! Configuration loaded from environment variables and command line.

use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Transfer engine configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Shards transferred concurrently per operation
    pub max_concurrent_shards: usize,

    /// Pointers requested per page when resolving a file
    pub pointer_page_size: usize,

    /// Transfer attempts per pointer before it is marked missing
    pub max_shard_requests: u32,

    /// Replacement farmers requested per pointer
    pub max_pointer_replacements: u32,

    /// Push attempts per shard on upload
    pub max_push_attempts: u32,

    /// Attempts per bridge request that fails with a rate limit, timeout
    /// or internal error
    pub max_bridge_attempts: u32,

    /// Timeout for a single bridge request
    pub bridge_timeout: Duration,

    /// Timeout for a single farmer transfer
    pub farmer_timeout: Duration,

    /// Delay before retrying on the same farmer
    pub retry_delay: Duration,

    /// How long a finished transfer waits for queued exchange reports
    /// before leaving them to the background
    pub report_drain: Duration,

    /// Merkle challenges generated per uploaded shard
    pub shard_challenges: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_shards: 4,
            pointer_page_size: 3,
            max_shard_requests: 6,
            max_pointer_replacements: 3,
            max_push_attempts: 6,
            max_bridge_attempts: 3,
            bridge_timeout: Duration::from_secs(60),
            farmer_timeout: Duration::from_secs(300), // 5 minutes
            retry_delay: Duration::from_millis(500),
            report_drain: Duration::from_millis(500),
            shard_challenges: genaro_core::DEFAULT_CHALLENGES,
        }
    }
}

impl TransferConfig {
    /// Create configuration from `GENARO_*` environment variables, falling
    /// back to defaults for unset ones
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            max_concurrent_shards: env_or("GENARO_MAX_CONCURRENT_SHARDS", defaults.max_concurrent_shards)?,
            pointer_page_size: env_or("GENARO_POINTER_PAGE_SIZE", defaults.pointer_page_size)?,
            max_shard_requests: env_or("GENARO_MAX_SHARD_REQUESTS", defaults.max_shard_requests)?,
            max_pointer_replacements: env_or(
                "GENARO_MAX_POINTER_REPLACEMENTS",
                defaults.max_pointer_replacements,
            )?,
            max_push_attempts: env_or("GENARO_MAX_PUSH_ATTEMPTS", defaults.max_push_attempts)?,
            max_bridge_attempts: env_or("GENARO_MAX_BRIDGE_ATTEMPTS", defaults.max_bridge_attempts)?,
            bridge_timeout: env_or("GENARO_BRIDGE_TIMEOUT_SECS", defaults.bridge_timeout.as_secs())
                .map(Duration::from_secs)?,
            farmer_timeout: env_or("GENARO_FARMER_TIMEOUT_SECS", defaults.farmer_timeout.as_secs())
                .map(Duration::from_secs)?,
            retry_delay: env_or(
                "GENARO_RETRY_DELAY_MS",
                defaults.retry_delay.as_millis() as u64,
            )
            .map(Duration::from_millis)?,
            report_drain: env_or(
                "GENARO_REPORT_DRAIN_MS",
                defaults.report_drain.as_millis() as u64,
            )
            .map(Duration::from_millis)?,
            shard_challenges: env_or("GENARO_SHARD_CHALLENGES", defaults.shard_challenges)?,
        }
        .validated()?)
    }

    /// Reject values the engine cannot run with
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.max_concurrent_shards == 0 {
            return Err(ConfigError::InvalidValue(
                "max_concurrent_shards".into(),
                "must be > 0".into(),
            ));
        }
        if self.pointer_page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "pointer_page_size".into(),
                "must be > 0".into(),
            ));
        }
        if self.max_shard_requests == 0
            || self.max_push_attempts == 0
            || self.max_bridge_attempts == 0
        {
            return Err(ConfigError::InvalidValue(
                "max_shard_requests".into(),
                "attempt ceilings must be > 0".into(),
            ));
        }
        Ok(self)
    }

    /// Overall deadline for resolving a file's pointer list
    pub fn pointer_timeout(&self) -> Duration {
        self.bridge_timeout * 2
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), value)),
        Err(_) => Ok(default),
    }
}
