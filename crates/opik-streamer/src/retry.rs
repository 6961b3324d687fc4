// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of one batch with retries.
//!
//! Transient failures are retried with capped exponential backoff until the attempt
//! budget is spent. Permanent failures are never retried. Either way a batch that
//! cannot be delivered is dropped with a single warning carrying enough context to
//! find it again (kind, size, first and last id); nothing is ever returned to the
//! application that produced the messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::delivery::DeliveryClient;
use crate::errors::DeliveryError;
use crate::splitter::Batch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_max: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_max,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after `failed_attempts` consecutive failures.
    #[must_use]
    pub fn backoff_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new(config.max_attempts, config.backoff_base, config.backoff_max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// The backend refused the batch with a permanent error
    Rejected,
    /// Every attempt failed with a transient error
    Exhausted { attempts: u32 },
    /// Shutdown was requested while waiting to retry
    Abandoned { attempts: u32 },
}

impl DeliveryOutcome {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

#[derive(Debug, Default)]
struct DeliveryCounters {
    delivered_batches: AtomicU64,
    delivered_messages: AtomicU64,
    dropped_batches: AtomicU64,
    dropped_messages: AtomicU64,
    retries: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered_batches: u64,
    pub delivered_messages: u64,
    pub dropped_batches: u64,
    pub dropped_messages: u64,
    pub retries: u64,
}

pub struct RetryingDelivery {
    client: Arc<dyn DeliveryClient>,
    policy: RetryPolicy,
    counters: DeliveryCounters,
}

impl RetryingDelivery {
    pub fn new(client: Arc<dyn DeliveryClient>, policy: RetryPolicy) -> Self {
        RetryingDelivery {
            client,
            policy,
            counters: DeliveryCounters::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered_batches: self.counters.delivered_batches.load(Ordering::Relaxed),
            delivered_messages: self.counters.delivered_messages.load(Ordering::Relaxed),
            dropped_batches: self.counters.dropped_batches.load(Ordering::Relaxed),
            dropped_messages: self.counters.dropped_messages.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }

    /// Submits `batch`, retrying transient failures.
    ///
    /// A cancellation only interrupts the backoff sleep; a request already on the wire
    /// is allowed to finish.
    pub async fn submit(&self, batch: &Batch, cancel: &CancellationToken) -> DeliveryOutcome {
        let mut attempts = 0;

        loop {
            attempts += 1;
            let time = Instant::now();
            let result = self.client.submit(batch).await;
            let elapsed = time.elapsed();

            let reason = match result {
                Ok(()) => {
                    self.record_delivered(batch);
                    if attempts > 1 {
                        info!(
                            kind = %batch.kind(),
                            size = batch.len(),
                            attempts,
                            "Batch delivered after retrying"
                        );
                    } else {
                        debug!(
                            "Delivered {} batch of {} messages in {} ms",
                            batch.kind(),
                            batch.len(),
                            elapsed.as_millis()
                        );
                    }
                    return DeliveryOutcome::Delivered { attempts };
                }
                Err(DeliveryError::Permanent(reason)) => {
                    self.record_dropped(batch);
                    warn!(
                        kind = %batch.kind(),
                        size = batch.len(),
                        first_id = batch.first_id(),
                        last_id = batch.last_id(),
                        error = %reason,
                        "Dropping batch rejected by backend"
                    );
                    return DeliveryOutcome::Rejected;
                }
                Err(DeliveryError::Transient(reason)) => reason,
            };

            if attempts >= self.policy.max_attempts() {
                self.record_dropped(batch);
                warn!(
                    kind = %batch.kind(),
                    size = batch.len(),
                    first_id = batch.first_id(),
                    last_id = batch.last_id(),
                    attempts,
                    error = %reason,
                    "Dropping batch after exhausting delivery attempts"
                );
                return DeliveryOutcome::Exhausted { attempts };
            }

            let backoff = self.policy.backoff_for(attempts);
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Delivery attempt {} of {} batch failed after {} ms: {}; retrying in {} ms",
                attempts,
                batch.kind(),
                elapsed.as_millis(),
                reason,
                backoff.as_millis()
            );

            tokio::select! {
                () = cancel.cancelled() => {
                    self.record_dropped(batch);
                    warn!(
                        kind = %batch.kind(),
                        size = batch.len(),
                        first_id = batch.first_id(),
                        last_id = batch.last_id(),
                        attempts,
                        error = %reason,
                        "Dropping batch: shutdown requested while waiting to retry"
                    );
                    return DeliveryOutcome::Abandoned { attempts };
                }
                () = tokio::time::sleep(backoff) => {}
            }
        }
    }

    fn record_delivered(&self, batch: &Batch) {
        self.counters
            .delivered_batches
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .delivered_messages
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
    }

    fn record_dropped(&self, batch: &Batch) {
        self.counters.dropped_batches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .dropped_messages
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
    }
}
