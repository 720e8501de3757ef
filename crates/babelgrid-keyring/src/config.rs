use crate::RateLimits;
use std::time::Duration;

/// Configuration for the [`Keyring`](crate::Keyring).
#[derive(Debug, Clone)]
pub struct KeyringConfig {
    /// Limits applied to credentials that do not declare their own.
    pub(crate) default_limits: RateLimits,
    /// How many of the best-scoring candidates take part in the weighted
    /// random pick.
    pub(crate) selection_pool: usize,
    /// Upper bound on the exponential failure backoff.
    pub(crate) failure_backoff_cap: Duration,
    /// Rolling window for the failure count that drives the backoff.
    pub(crate) failure_window: Duration,
    /// Rolling window for the success/error counters that feed scoring.
    pub(crate) metrics_window: Duration,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl KeyringConfig {
    pub fn builder() -> KeyringConfigBuilder {
        KeyringConfigBuilder::new()
    }

    pub fn default_limits(&self) -> RateLimits {
        self.default_limits
    }
}

/// Builder for [`KeyringConfig`].
pub struct KeyringConfigBuilder {
    default_limits: RateLimits,
    selection_pool: usize,
    failure_backoff_cap: Duration,
    failure_window: Duration,
    metrics_window: Duration,
}

impl Default for KeyringConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringConfigBuilder {
    /// Creates a builder with defaults.
    ///
    /// Defaults:
    /// - default_limits: 15 req/min, 1500 req/day, 1,000,000 tokens/min
    /// - selection_pool: 3
    /// - failure_backoff_cap: 2 hours
    /// - failure_window / metrics_window: 24 hours
    pub fn new() -> Self {
        Self {
            default_limits: RateLimits {
                requests_per_minute: 15,
                requests_per_day: 1500,
                tokens_per_minute: 1_000_000,
            },
            selection_pool: 3,
            failure_backoff_cap: Duration::from_secs(7200),
            failure_window: Duration::from_secs(86400),
            metrics_window: Duration::from_secs(86400),
        }
    }

    /// Sets the limits used for credentials without explicit limits.
    pub fn default_limits(mut self, limits: RateLimits) -> Self {
        self.default_limits = limits;
        self
    }

    /// Sets how many top candidates the weighted pick draws from.
    pub fn selection_pool(mut self, pool: usize) -> Self {
        self.selection_pool = pool.max(1);
        self
    }

    /// Caps the exponential per-credential failure backoff.
    pub fn failure_backoff_cap(mut self, cap: Duration) -> Self {
        self.failure_backoff_cap = cap;
        self
    }

    pub fn build(self) -> KeyringConfig {
        KeyringConfig {
            default_limits: self.default_limits,
            selection_pool: self.selection_pool,
            failure_backoff_cap: self.failure_backoff_cap,
            failure_window: self.failure_window,
            metrics_window: self.metrics_window,
        }
    }
}
