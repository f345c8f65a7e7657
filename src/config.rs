use crate::classifier::RateLimitRules;
use crate::error::BufferError;
use std::time::Duration;

/// Configuration for the analysis buffer.
///
/// Use [`BufferConfig::builder()`] for ergonomic construction, or
/// [`BufferConfig::default()`] for the contract values (window of 5, two
/// workers, 0.8s spacing, automatic resume below 300s).
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Number of items kept pre-analyzed ahead of the active index.
    pub window_size: usize,

    /// Maximum number of remote calls running at once.
    pub pool_size: usize,

    /// Minimum gap between two outbound calls, regardless of worker count.
    pub min_spacing: Duration,

    /// The rolling window never dispatches at or beyond `active + max_lookahead`.
    pub max_lookahead: usize,

    /// Rate-limit waits shorter than this resume on their own.
    pub auto_resume_limit: Duration,

    /// Timeout around a single remote analysis call.
    pub request_timeout: Duration,

    /// Capacity of the broadcast channel behind [`subscribe()`](crate::AnalysisBuffer::subscribe).
    pub event_capacity: usize,

    /// Rate-limit classification rules.
    pub rules: RateLimitRules,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            pool_size: 2,
            min_spacing: Duration::from_millis(800),
            max_lookahead: 10,
            auto_resume_limit: Duration::from_secs(300),
            request_timeout: Duration::from_secs(60),
            event_capacity: 64,
            rules: RateLimitRules::default(),
        }
    }
}

impl BufferConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> BufferConfigBuilder {
        BufferConfigBuilder::default()
    }

    /// Check the values that would make the scheduler stall or misbehave.
    pub fn validate(&self) -> Result<(), BufferError> {
        if self.window_size == 0 {
            return Err(BufferError::InvalidConfig(
                "window_size must be at least 1".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(BufferError::InvalidConfig(
                "pool_size must be at least 1".to_string(),
            ));
        }
        if self.max_lookahead < self.window_size {
            return Err(BufferError::InvalidConfig(format!(
                "max_lookahead ({}) must not be smaller than window_size ({})",
                self.max_lookahead, self.window_size
            )));
        }
        if self.event_capacity == 0 {
            return Err(BufferError::InvalidConfig(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`BufferConfig`].
#[derive(Default)]
pub struct BufferConfigBuilder {
    config: BufferConfig,
}

impl BufferConfigBuilder {
    /// Set the look-ahead window size.
    pub fn with_window_size(mut self, size: usize) -> Self {
        self.config.window_size = size;
        self
    }

    /// Set the worker pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Set the minimum spacing between outbound calls.
    pub fn with_min_spacing(mut self, spacing: Duration) -> Self {
        self.config.min_spacing = spacing;
        self
    }

    /// Set the hard look-ahead horizon.
    pub fn with_max_lookahead(mut self, max: usize) -> Self {
        self.config.max_lookahead = max;
        self
    }

    /// Set the threshold below which rate-limit pauses resume automatically.
    pub fn with_auto_resume_limit(mut self, limit: Duration) -> Self {
        self.config.auto_resume_limit = limit;
        self
    }

    /// Set the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Replace the rate-limit classification rules.
    pub fn with_rules(mut self, rules: RateLimitRules) -> Self {
        self.config.rules = rules;
        self
    }

    /// Build the final [`BufferConfig`].
    pub fn build(self) -> BufferConfig {
        self.config
    }
}
