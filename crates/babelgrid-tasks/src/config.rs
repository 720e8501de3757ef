use std::time::Duration;

/// Configuration for the [`TaskManager`](crate::TaskManager).
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// How long task records and image payloads stay in the store. One value
    /// covers both creation and every update.
    pub(crate) retention: Duration,
    /// Blocking-pop timeout for a single claim attempt.
    pub(crate) claim_timeout: Duration,
    /// Average per-image service time used by the wait estimator.
    pub(crate) avg_image_seconds: f64,
    /// Average images per task used by the wait estimator.
    pub(crate) avg_images_per_task: u64,
    /// A claimed task older than this is considered abandoned.
    pub(crate) max_processing_time: Duration,
    /// Cadence of the stale-task reclaimer.
    pub(crate) reclaim_interval: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TaskConfig {
    pub fn builder() -> TaskConfigBuilder {
        TaskConfigBuilder::new()
    }

    pub fn max_processing_time(&self) -> Duration {
        self.max_processing_time
    }

    pub fn reclaim_interval(&self) -> Duration {
        self.reclaim_interval
    }
}

/// Builder for [`TaskConfig`].
pub struct TaskConfigBuilder {
    retention: Duration,
    claim_timeout: Duration,
    avg_image_seconds: f64,
    avg_images_per_task: u64,
    max_processing_time: Duration,
    reclaim_interval: Duration,
}

impl Default for TaskConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskConfigBuilder {
    /// Creates a builder with defaults.
    ///
    /// Defaults:
    /// - retention: 24 hours
    /// - claim_timeout: 1 second
    /// - avg_image_seconds: 2.5
    /// - avg_images_per_task: 2
    /// - max_processing_time: 10 minutes
    /// - reclaim_interval: 5 minutes
    pub fn new() -> Self {
        Self {
            retention: Duration::from_secs(86400),
            claim_timeout: Duration::from_secs(1),
            avg_image_seconds: 2.5,
            avg_images_per_task: 2,
            max_processing_time: Duration::from_secs(600),
            reclaim_interval: Duration::from_secs(300),
        }
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    pub fn max_processing_time(mut self, max: Duration) -> Self {
        self.max_processing_time = max;
        self
    }

    pub fn reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    pub fn build(self) -> TaskConfig {
        TaskConfig {
            retention: self.retention,
            claim_timeout: self.claim_timeout,
            avg_image_seconds: self.avg_image_seconds,
            avg_images_per_task: self.avg_images_per_task,
            max_processing_time: self.max_processing_time,
            reclaim_interval: self.reclaim_interval,
        }
    }
}
