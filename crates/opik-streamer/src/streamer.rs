// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Handle owned by the application.
//!
//! A [`Streamer`] owns the event queue, the consumer pool and the runtime the
//! consumers run on. `put` is cheap and never fails loudly; `flush` and `close` block
//! the calling thread for at most the timeout they are given. Dropping the handle
//! closes it with the configured default timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::config::StreamerConfig;
use crate::consumer::{ConsumerPool, ConsumerSettings};
use crate::delivery::DeliveryClient;
use crate::errors::StreamerError;
use crate::message::Message;
use crate::queue::EventQueue;
use crate::retry::{DeliveryStats, RetryPolicy, RetryingDelivery};

#[derive(Default)]
struct CloseState {
    runtime: Option<Runtime>,
    result: Option<bool>,
}

pub struct Streamer {
    config: StreamerConfig,
    queue: Arc<EventQueue>,
    delivery: Arc<RetryingDelivery>,
    pool: ConsumerPool,
    closed: AtomicBool,
    close_state: Mutex<CloseState>,
}

impl Streamer {
    /// Validates `config`, starts a dedicated runtime and spawns the consumers.
    pub fn new(
        config: StreamerConfig,
        client: Arc<dyn DeliveryClient>,
    ) -> Result<Self, StreamerError> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.consumer_count)
            .thread_name("opik-streamer")
            .enable_all()
            .build()?;

        let queue = Arc::new(EventQueue::new(
            config.queue_capacity,
            config.backpressure_timeout,
        ));
        let delivery = Arc::new(RetryingDelivery::new(
            client,
            RetryPolicy::from(&config.retry),
        ));
        let pool = ConsumerPool::start(
            runtime.handle(),
            config.consumer_count,
            Arc::clone(&queue),
            Arc::clone(&delivery),
            ConsumerSettings::from(&config),
        );

        info!(
            consumers = config.consumer_count,
            queue_capacity = config.queue_capacity,
            batching = config.batching_enabled,
            "Streamer started"
        );

        Ok(Streamer {
            config,
            queue,
            delivery,
            pool,
            closed: AtomicBool::new(false),
            close_state: Mutex::new(CloseState {
                runtime: Some(runtime),
                result: None,
            }),
        })
    }

    /// Builds a streamer from `OPIK_*` environment variables.
    pub fn from_env(client: Arc<dyn DeliveryClient>) -> Result<Self, StreamerError> {
        Self::new(StreamerConfig::from_env()?, client)
    }

    /// Queues `message` for delivery.
    ///
    /// Blocks for at most the backpressure timeout when the queue is full. Returns
    /// `false` when the message was dropped, either because the queue stayed full or
    /// because the streamer is closed.
    pub fn put(&self, message: Message) -> bool {
        if self.closed.load(Ordering::Acquire) {
            warn!(
                kind = %message.kind(),
                id = message.entity_id(),
                "Streamer is closed, dropping message"
            );
            return false;
        }
        self.queue.enqueue(message)
    }

    /// Waits until every message accepted before this call has been delivered or
    /// dropped. Returns `false` if that did not happen within `timeout`.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.flush_until(Instant::now() + timeout)
    }

    pub fn flush_default(&self) -> bool {
        self.flush(self.config.default_flush_timeout)
    }

    fn flush_until(&self, deadline: Instant) -> bool {
        let target = self.queue.accepted_count();
        let time = Instant::now();
        if self.queue.wait_settled(target, deadline) {
            debug!("Flushed event queue in {} ms", time.elapsed().as_millis());
            return true;
        }
        warn!(
            pending = self.queue.pending(),
            "Timed out waiting for the event queue to drain"
        );
        false
    }

    /// Flushes, then stops the consumers and releases the runtime, all within
    /// `timeout`. Messages still queued after that are dropped.
    ///
    /// Returns whether everything was drained. Only the first call does any work;
    /// later calls return its result.
    pub fn close(&self, timeout: Duration) -> bool {
        let mut state = self
            .close_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(result) = state.result {
            return result;
        }

        let deadline = Instant::now() + timeout;
        self.closed.store(true, Ordering::Release);

        let flushed = self.flush_until(deadline);
        // An idle worker that misses the deadline leaves nothing undelivered; only
        // drainage decides the result.
        self.pool.stop(deadline);
        let purged = self.queue.purge();
        if purged > 0 {
            warn!(
                purged,
                "Dropping messages still queued when the streamer closed"
            );
        }
        if let Some(runtime) = state.runtime.take() {
            runtime.shutdown_background();
        }

        let result = flushed && purged == 0 && self.queue.pending() == 0;
        state.result = Some(result);

        let stats = self.delivery.stats();
        info!(
            drained = result,
            delivered_messages = stats.delivered_messages,
            dropped_messages = stats.dropped_messages + self.queue.dropped_count(),
            "Streamer closed"
        );
        result
    }

    pub fn close_default(&self) -> bool {
        self.close(self.config.default_flush_timeout)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Messages accepted but not yet delivered or dropped.
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.queue.pending()
    }

    /// Messages refused by `put` because the queue was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped_count()
    }

    #[must_use]
    pub fn delivery_stats(&self) -> DeliveryStats {
        self.delivery.stats()
    }

}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.close(self.config.default_flush_timeout);
    }
}
