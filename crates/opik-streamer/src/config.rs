// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ConfigError;
use crate::message::MessageKind;
use std::env;
use std::time::Duration;

pub const DEFAULT_CONSUMER_COUNT: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
pub const DEFAULT_MAX_BATCH_ITEMS: usize = 1_000;
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_MAX_BATCH_SIZE_MB: usize = 50;
const BYTES_PER_MB: usize = 1024 * 1024;

/// Per-kind item limits plus the byte limit shared by every batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLimits {
    pub create_traces: usize,
    pub create_spans: usize,
    pub feedback_scores: usize,
    /// Maximum number of ids in one trace deletion request
    pub delete_traces: usize,
    pub max_serialized_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        BatchLimits {
            create_traces: DEFAULT_MAX_BATCH_ITEMS,
            create_spans: DEFAULT_MAX_BATCH_ITEMS,
            feedback_scores: DEFAULT_MAX_BATCH_ITEMS,
            delete_traces: DEFAULT_DELETE_BATCH_SIZE,
            max_serialized_bytes: DEFAULT_MAX_BATCH_SIZE_MB * BYTES_PER_MB,
        }
    }
}

impl BatchLimits {
    /// Item limit for batches of `kind`. Kinds that are never batched are limited to one.
    #[must_use]
    pub fn max_item_count(&self, kind: MessageKind) -> usize {
        match kind {
            MessageKind::CreateTrace => self.create_traces,
            MessageKind::CreateSpan => self.create_spans,
            MessageKind::TraceFeedbackScore | MessageKind::SpanFeedbackScore => {
                self.feedback_scores
            }
            MessageKind::UpdateTrace | MessageKind::UpdateSpan | MessageKind::DeleteTraces => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total number of attempts per batch, including the first one
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
        }
    }
}

/// Configuration of the queue, the consumer pool and delivery retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerConfig {
    /// Number of consumer workers draining the queue
    pub consumer_count: usize,
    pub queue_capacity: usize,
    /// How long `put` may block on a full queue before the message is dropped
    pub backpressure_timeout: Duration,
    pub batching_enabled: bool,
    pub batch_limits: BatchLimits,
    /// Upper bound on the time a consumer spends accumulating one batch
    pub batch_window: Duration,
    /// How long a consumer waits on an empty queue before checking for shutdown
    pub poll_interval: Duration,
    pub retry: RetryConfig,
    /// Timeout used by `flush_default`, `close_default` and on drop
    pub default_flush_timeout: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        StreamerConfig {
            consumer_count: DEFAULT_CONSUMER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure_timeout: Duration::from_millis(100),
            batching_enabled: false,
            batch_limits: BatchLimits::default(),
            batch_window: Duration::from_secs(1),
            poll_interval: Duration::from_millis(300),
            retry: RetryConfig::default(),
            default_flush_timeout: Duration::from_secs(30),
        }
    }
}

impl StreamerConfig {
    /// Create configuration from `OPIK_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = StreamerConfig::default();

        let max_batch_items = env_parse("OPIK_MAX_BATCH_ITEMS")?;
        let batch_limits = BatchLimits {
            create_traces: max_batch_items.unwrap_or(defaults.batch_limits.create_traces),
            create_spans: max_batch_items.unwrap_or(defaults.batch_limits.create_spans),
            feedback_scores: max_batch_items.unwrap_or(defaults.batch_limits.feedback_scores),
            delete_traces: env_parse("OPIK_DELETE_BATCH_SIZE")?
                .unwrap_or(defaults.batch_limits.delete_traces),
            max_serialized_bytes: env_parse::<usize>("OPIK_MAX_BATCH_SIZE_MB")?
                .map_or(defaults.batch_limits.max_serialized_bytes, |mb| {
                    mb.saturating_mul(BYTES_PER_MB)
                }),
        };

        let retry = RetryConfig {
            max_attempts: env_parse("OPIK_RETRY_MAX_ATTEMPTS")?
                .unwrap_or(defaults.retry.max_attempts),
            backoff_base: env_millis("OPIK_BACKOFF_BASE_MS")?
                .unwrap_or(defaults.retry.backoff_base),
            backoff_max: env_millis("OPIK_BACKOFF_MAX_MS")?.unwrap_or(defaults.retry.backoff_max),
        };

        let config = StreamerConfig {
            consumer_count: env_parse("OPIK_BACKGROUND_WORKERS")?
                .unwrap_or(defaults.consumer_count),
            queue_capacity: env_parse("OPIK_QUEUE_CAPACITY")?.unwrap_or(defaults.queue_capacity),
            backpressure_timeout: env_millis("OPIK_BACKPRESSURE_TIMEOUT_MS")?
                .unwrap_or(defaults.backpressure_timeout),
            batching_enabled: env_bool("OPIK_BATCHING").unwrap_or(defaults.batching_enabled),
            batch_limits,
            batch_window: env_millis("OPIK_BATCH_WINDOW_MS")?.unwrap_or(defaults.batch_window),
            poll_interval: env_millis("OPIK_POLL_INTERVAL_MS")?.unwrap_or(defaults.poll_interval),
            retry,
            default_flush_timeout: env_parse("OPIK_DEFAULT_FLUSH_TIMEOUT")?
                .map_or(defaults.default_flush_timeout, Duration::from_secs),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer_count == 0 {
            return Err(invalid("consumer_count must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be greater than 0"));
        }
        let limits = &self.batch_limits;
        if limits.create_traces == 0
            || limits.create_spans == 0
            || limits.feedback_scores == 0
            || limits.delete_traces == 0
        {
            return Err(invalid("batch item limits must be greater than 0"));
        }
        if limits.max_serialized_bytes == 0 {
            return Err(invalid("max_serialized_bytes must be greater than 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry max_attempts must be at least 1"));
        }
        if self.retry.backoff_base > self.retry.backoff_max {
            return Err(invalid(&format!(
                "backoff_base ({:?}) cannot exceed backoff_max ({:?})",
                self.retry.backoff_base, self.retry.backoff_max
            )));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid(reason.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{name} has an invalid value '{value}'"))),
        Err(_) => Ok(None),
    }
}

fn env_millis(name: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_millis))
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|val| matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}
