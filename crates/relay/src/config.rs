use std::time::Duration;

/// Tuning knobs of a relay processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Maximum `pending` rows fetched per iteration.
    pub batch_size: usize,
    /// Maximum retry-eligible `failed` rows fetched per iteration.
    pub retry_batch_size: usize,
    /// Sleep between iterations.
    pub poll_interval: Duration,
    /// Attempts after which a failed row is no longer retried.
    pub max_retries: i32,
    /// Minimum age of the last attempt before a failed row is retried.
    pub retry_backoff: Duration,
    /// Liveness window of a claim. `processing` rows older than this are
    /// handed back to `pending`.
    pub processing_timeout: Duration,
    /// Number of concurrent relay loops started by the worker pool.
    pub workers: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            retry_batch_size: 50,
            poll_interval: Duration::from_millis(500),
            max_retries: 3,
            retry_backoff: Duration::from_secs(30),
            processing_timeout: Duration::from_secs(300),
            workers: 1,
        }
    }
}

impl RelayConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry_batch_size(mut self, retry_batch_size: usize) -> Self {
        self.retry_batch_size = retry_batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries.max(0);
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_processing_timeout(mut self, processing_timeout: Duration) -> Self {
        self.processing_timeout = processing_timeout;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}
