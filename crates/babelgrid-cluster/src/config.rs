use std::time::Duration;

/// Configuration for the [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub(crate) min_workers: usize,
    pub(crate) max_workers: usize,
    /// Cadence of the leader/follower scaling cycle.
    pub(crate) scale_check_interval: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) sweep_interval: Duration,
    /// TTL on instance membership and heartbeat records.
    pub(crate) instance_ttl: Duration,
    /// TTL on the cluster worker set.
    pub(crate) worker_ttl: Duration,
    /// A heartbeat older than this marks the instance stale.
    pub(crate) stale_after: Duration,
    pub(crate) lock_ttl: Duration,
    pub(crate) decision_ttl: Duration,
    pub(crate) low_streak_ttl: Duration,
    /// One worker per this many requests-per-minute of credential capacity.
    pub(crate) rpm_per_worker: u64,
    /// Worker sleep after an empty claim.
    pub(crate) idle_backoff: Duration,
    /// Fixed instance id, mainly for tests; generated when absent.
    pub(crate) instance_id: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }
}

/// Builder for [`PoolConfig`].
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfigBuilder {
    /// Creates a builder with defaults.
    ///
    /// Defaults:
    /// - min_workers: 1, max_workers: 50
    /// - scale_check_interval: 10s, heartbeat_interval: 30s, sweep_interval: 60s
    /// - instance_ttl: 120s, worker_ttl: 300s, stale_after: 180s
    /// - lock_ttl: 30s, decision_ttl: 60s, low_streak_ttl: 300s
    /// - rpm_per_worker: 10
    /// - idle_backoff: 500ms
    pub fn new() -> Self {
        Self {
            config: PoolConfig {
                min_workers: 1,
                max_workers: 50,
                scale_check_interval: Duration::from_secs(10),
                heartbeat_interval: Duration::from_secs(30),
                sweep_interval: Duration::from_secs(60),
                instance_ttl: Duration::from_secs(120),
                worker_ttl: Duration::from_secs(300),
                stale_after: Duration::from_secs(180),
                lock_ttl: Duration::from_secs(30),
                decision_ttl: Duration::from_secs(60),
                low_streak_ttl: Duration::from_secs(300),
                rpm_per_worker: 10,
                idle_backoff: Duration::from_millis(500),
                instance_id: None,
            },
        }
    }

    pub fn min_workers(mut self, min: usize) -> Self {
        self.config.min_workers = min;
        self
    }

    pub fn max_workers(mut self, max: usize) -> Self {
        self.config.max_workers = max.max(1);
        self
    }

    pub fn scale_check_interval(mut self, interval: Duration) -> Self {
        self.config.scale_check_interval = interval;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn stale_after(mut self, age: Duration) -> Self {
        self.config.stale_after = age;
        self
    }

    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.config.idle_backoff = backoff;
        self
    }

    pub fn instance_id<S: Into<String>>(mut self, id: S) -> Self {
        self.config.instance_id = Some(id.into());
        self
    }

    pub fn build(self) -> PoolConfig {
        self.config
    }
}
