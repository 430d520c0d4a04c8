//! Write-back engine configuration

use crate::error::ConfigError;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Maximum TTL for any item or list cache entry, in seconds.
pub const DEFAULT_CACHE_MAX_TTL_SECS: u64 = 5;

/// Period of the flush loop, in seconds.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 20;

/// How long a tombstone hides an id if its delete never completes, in seconds.
pub const DEFAULT_TOMBSTONE_WINDOW_SECS: u64 = 3600;

/// Whether the flush job runs one last cycle when asked to stop.
pub const DEFAULT_FLUSH_ON_SHUTDOWN: bool = true;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the write-back engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBackConfig {
    /// Upper bound on every cache entry's TTL. Entries written by the engine
    /// use exactly this TTL; anything observed above it is purged.
    pub cache_max_ttl: Duration,

    /// How often the flusher drains the ledger (default: 20 seconds)
    pub flush_interval: Duration,

    /// Safety window after which a tombstone expires on its own
    /// (default: 1 hour)
    pub tombstone_window: Duration,

    /// Run a final flush cycle when the flush job receives shutdown
    pub flush_on_shutdown: bool,
}

impl Default for WriteBackConfig {
    fn default() -> Self {
        Self {
            cache_max_ttl: Duration::from_secs(DEFAULT_CACHE_MAX_TTL_SECS),
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            tombstone_window: Duration::from_secs(DEFAULT_TOMBSTONE_WINDOW_SECS),
            flush_on_shutdown: DEFAULT_FLUSH_ON_SHUTDOWN,
        }
    }
}

impl WriteBackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create WriteBackConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LARDER_CACHE_MAX_TTL_SECS`: Maximum cache entry TTL (default: 5)
    /// - `LARDER_FLUSH_INTERVAL_SECS`: Flush period (default: 20)
    /// - `LARDER_TOMBSTONE_WINDOW_SECS`: Tombstone safety window (default: 3600)
    /// - `LARDER_FLUSH_ON_SHUTDOWN`: Final flush on shutdown (default: true)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// Unparseable values fall back to the default, same as unset ones.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |key: &str, default: u64| {
            Duration::from_secs(
                lookup(key)
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(default),
            )
        };

        let flush_on_shutdown = lookup("LARDER_FLUSH_ON_SHUTDOWN")
            .map(|s| s.trim().to_lowercase() != "false")
            .unwrap_or(DEFAULT_FLUSH_ON_SHUTDOWN);

        Self {
            cache_max_ttl: secs("LARDER_CACHE_MAX_TTL_SECS", DEFAULT_CACHE_MAX_TTL_SECS),
            flush_interval: secs("LARDER_FLUSH_INTERVAL_SECS", DEFAULT_FLUSH_INTERVAL_SECS),
            tombstone_window: secs(
                "LARDER_TOMBSTONE_WINDOW_SECS",
                DEFAULT_TOMBSTONE_WINDOW_SECS,
            ),
            flush_on_shutdown,
        }
    }

    /// Set the maximum cache TTL.
    pub fn with_cache_max_ttl(mut self, ttl: Duration) -> Self {
        self.cache_max_ttl = ttl;
        self
    }

    /// Set the flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the tombstone safety window.
    pub fn with_tombstone_window(mut self, window: Duration) -> Self {
        self.tombstone_window = window;
        self
    }

    /// Enable or disable the final flush on shutdown.
    pub fn with_flush_on_shutdown(mut self, enabled: bool) -> Self {
        self.flush_on_shutdown = enabled;
        self
    }

    /// Validate the configuration.
    ///
    /// All durations must be non-zero: a zero TTL would make every cache write
    /// invalid on arrival, and a zero interval would spin the flusher.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("cache_max_ttl", self.cache_max_ttl),
            ("flush_interval", self.flush_interval),
            ("tombstone_window", self.tombstone_window),
        ];

        for (field, value) in checks {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{:?}", value),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }
}
