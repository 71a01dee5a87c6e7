//! Collection configuration.

use crate::types::IndexKind;
use rand::Rng;
use std::time::Duration;

/// Configuration for opening a collection.
///
/// Settings that shape the on-disk layout (`groups`, `headers`,
/// `index_fields`, `index_kind`, `unique`) are recorded in the metadata
/// file on creation. Reopening a directory keeps the stored `groups`, and
/// falls back to the stored field lists when the configuration leaves them
/// empty.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Number of shard files.
    pub groups: u32,

    /// Fields with a secondary index. Only these fields can be queried.
    pub index_fields: Vec<String>,

    /// Fixed field order; when set, records are stored as positional tuples.
    pub headers: Option<Vec<String>>,

    /// Default page size for fetches.
    pub items_per_page: usize,

    /// Field whose values must be unique across live records.
    pub unique: Option<String>,

    /// Index representation.
    pub index_kind: IndexKind,

    /// Collection name; defaults to the directory name.
    pub name: Option<String>,

    /// Age after which a foreign lock marker is considered stale.
    pub lock_timeout: Duration,

    /// Sleep between lock acquisition attempts.
    pub lock_poll_interval: Duration,

    /// Period at which held lock markers are refreshed.
    pub keep_alive_interval: Duration,

    /// Bound of the request queue feeding the processing loop.
    pub queue_capacity: usize,

    /// Backoff for transient failures inside a locked section.
    pub retry: RetryConfig,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            groups: 10,
            index_fields: Vec::new(),
            headers: None,
            items_per_page: 50,
            unique: None,
            index_kind: IndexKind::Heavy,
            name: None,
            lock_timeout: Duration::from_secs(10),
            lock_poll_interval: Duration::from_millis(50),
            keep_alive_interval: Duration::from_secs(2),
            queue_capacity: 256,
            retry: RetryConfig::default(),
        }
    }
}

impl CollectionConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of shard files.
    #[must_use]
    pub fn groups(mut self, groups: u32) -> Self {
        self.groups = groups;
        self
    }

    /// Sets the indexed fields.
    #[must_use]
    pub fn index_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Stores records as positional tuples in the given field order.
    #[must_use]
    pub fn headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers = Some(headers.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the default page size.
    #[must_use]
    pub fn items_per_page(mut self, items: usize) -> Self {
        self.items_per_page = items;
        self
    }

    /// Declares a unique field. The field is indexed implicitly.
    #[must_use]
    pub fn unique(mut self, field: impl Into<String>) -> Self {
        self.unique = Some(field.into());
        self
    }

    /// Selects the index representation.
    #[must_use]
    pub fn index_kind(mut self, kind: IndexKind) -> Self {
        self.index_kind = kind;
        self
    }

    /// Shorthand for the directory-tree index representation.
    #[must_use]
    pub fn light_index(self) -> Self {
        self.index_kind(IndexKind::Light)
    }

    /// Overrides the collection name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the lock staleness threshold.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the sleep between lock acquisition attempts.
    #[must_use]
    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    /// Sets the refresh period of held lock markers.
    #[must_use]
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Sets the request queue bound.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn validate(&self) -> crate::error::CoreResult<()> {
        use crate::error::CoreError;

        if self.groups == 0 {
            return Err(CoreError::invalid_operation("groups must be at least 1"));
        }
        if self.items_per_page == 0 {
            return Err(CoreError::invalid_operation(
                "items_per_page must be at least 1",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(CoreError::invalid_operation(
                "queue_capacity must be at least 1",
            ));
        }
        if self.keep_alive_interval >= self.lock_timeout {
            return Err(CoreError::invalid_operation(
                "keep_alive_interval must be shorter than lock_timeout",
            ));
        }
        Ok(())
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(8)
    }
}
