// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Consumer workers draining the event queue.
//!
//! Each worker is a task on the streamer's runtime. It takes the next message, grows
//! it into a batch of the same kind when batching is enabled, splits the batch to the
//! configured limits and hands every part to the retrying delivery layer. Messages are
//! settled in the queue's drain accounting once their outcome is known.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{BatchLimits, StreamerConfig};
use crate::message::{Message, MessageBody, MessageKind};
use crate::queue::{EventQueue, QueueEntry};
use crate::retry::RetryingDelivery;
use crate::splitter::Batch;

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub batching_enabled: bool,
    pub batch_limits: BatchLimits,
    pub batch_window: Duration,
    pub poll_interval: Duration,
}

impl From<&StreamerConfig> for ConsumerSettings {
    fn from(config: &StreamerConfig) -> Self {
        ConsumerSettings {
            batching_enabled: config.batching_enabled,
            batch_limits: config.batch_limits.clone(),
            batch_window: config.batch_window,
            poll_interval: config.poll_interval,
        }
    }
}

/// Counts running workers so shutdown can wait for them with a deadline.
#[derive(Debug, Default)]
struct WorkerTracker {
    live: Mutex<usize>,
    changed: Condvar,
}

impl WorkerTracker {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(self: &Arc<Self>) -> WorkerGuard {
        *self.lock() += 1;
        WorkerGuard {
            tracker: Arc::clone(self),
        }
    }

    fn live(&self) -> usize {
        *self.lock()
    }

    fn wait_idle(&self, deadline: Instant) -> bool {
        let mut live = self.lock();
        while *live > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(live, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            live = guard;
        }
        true
    }
}

/// Held by a worker task for its whole life. Dropped on return and on abort alike.
struct WorkerGuard {
    tracker: Arc<WorkerTracker>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let mut live = self.tracker.lock();
        *live = live.saturating_sub(1);
        drop(live);
        self.tracker.changed.notify_all();
    }
}

pub struct ConsumerPool {
    cancel: CancellationToken,
    tracker: Arc<WorkerTracker>,
    handles: Vec<JoinHandle<()>>,
}

impl ConsumerPool {
    /// Spawns `count` workers on `runtime`.
    pub fn start(
        runtime: &Handle,
        count: usize,
        queue: Arc<EventQueue>,
        delivery: Arc<RetryingDelivery>,
        settings: ConsumerSettings,
    ) -> Self {
        let cancel = CancellationToken::new();
        let tracker = Arc::new(WorkerTracker::default());
        let settings = Arc::new(settings);

        let handles = (0..count)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&queue),
                    delivery: Arc::clone(&delivery),
                    settings: Arc::clone(&settings),
                    cancel: cancel.clone(),
                };
                let guard = tracker.register();
                runtime.spawn(worker.run(guard))
            })
            .collect();

        debug!("Started {} consumer workers", count);
        ConsumerPool {
            cancel,
            tracker,
            handles,
        }
    }

    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.tracker.live()
    }

    /// Asks every worker to stop after its current unit of work and waits for them
    /// until `deadline`. Workers still running at the deadline are aborted and
    /// `false` is returned.
    pub fn stop(&self, deadline: Instant) -> bool {
        self.cancel.cancel();
        if self.tracker.wait_idle(deadline) {
            return true;
        }
        warn!(
            live_workers = self.tracker.live(),
            "Consumer workers did not stop in time, aborting them"
        );
        for handle in &self.handles {
            handle.abort();
        }
        false
    }
}

struct Worker {
    id: usize,
    queue: Arc<EventQueue>,
    delivery: Arc<RetryingDelivery>,
    settings: Arc<ConsumerSettings>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, _guard: WorkerGuard) {
        debug!(worker = self.id, "Consumer worker started");
        loop {
            let entry = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                entry = self.queue.dequeue_blocking(self.settings.poll_interval) => entry,
            };
            if let Some(entry) = entry {
                self.process(entry).await;
            }
        }
        debug!(worker = self.id, "Consumer worker stopped");
    }

    async fn process(&self, first: QueueEntry) {
        let enqueued_at = first.enqueued_at;
        let first = first.message;
        if first.kind() == MessageKind::DeleteTraces {
            self.process_deletion(first).await;
            self.queue.settle(1);
            return;
        }

        let kind = first.kind();
        let messages = self.accumulate(first);
        let count = messages.len();
        let limits = &self.settings.batch_limits;
        for batch in Batch::split(
            messages,
            limits.max_item_count(kind),
            limits.max_serialized_bytes,
        ) {
            let outcome = self.delivery.submit(&batch, &self.cancel).await;
            if !outcome.is_delivered() {
                debug!(
                    worker = self.id,
                    kind = %kind,
                    queued_ms = enqueued_at.elapsed().as_millis() as u64,
                    "Dropped batch after {:?}",
                    outcome
                );
            }
        }
        self.queue.settle(count);
    }

    /// Grows `first` into a batch with the same-kind messages already waiting behind
    /// it. Stops at the item limit, at the end of the batch window, or as soon as the
    /// head of the queue is empty or holds another kind.
    fn accumulate(&self, first: Message) -> Vec<Message> {
        let kind = first.kind();
        let mut messages = vec![first];
        if !self.settings.batching_enabled || !kind.supports_batching() {
            return messages;
        }

        let max_items = self.settings.batch_limits.max_item_count(kind);
        let deadline = Instant::now() + self.settings.batch_window;
        while messages.len() < max_items && Instant::now() < deadline {
            match self.queue.try_dequeue_kind(kind) {
                Some(entry) => messages.push(entry.message),
                None => break,
            }
        }
        messages
    }

    /// Deletions can carry more ids than one request accepts; each chunk is sent as
    /// its own request.
    async fn process_deletion(&self, message: Message) {
        let sequence = message.enqueue_sequence();
        let project_name = message.project_name().to_string();
        let MessageBody::DeleteTraces(delete) = message.into_body() else {
            return;
        };

        for chunk in delete.chunks(self.settings.batch_limits.delete_traces) {
            let mut chunk = match Message::new(project_name.as_str(), chunk) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Skipping invalid trace deletion chunk: {}", e);
                    continue;
                }
            };
            chunk.set_enqueue_sequence(sequence);
            self.delivery
                .submit(&Batch::singleton(chunk), &self.cancel)
                .await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::DeliveryError;
    use crate::message::{DeleteTraces, EntityKind, FeedbackScore};
    use crate::retry::RetryPolicy;
    use crate::test_support::{trace_message, trace_score_message, ScriptedClient};
    use tokio::runtime::Runtime;

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn settings(batching_enabled: bool) -> ConsumerSettings {
        ConsumerSettings {
            batching_enabled,
            batch_limits: BatchLimits::default(),
            batch_window: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn delivery(client: &Arc<ScriptedClient>) -> Arc<RetryingDelivery> {
        let policy = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1));
        Arc::new(RetryingDelivery::new(client.clone(), policy))
    }

    fn span_score_message(i: usize) -> Message {
        Message::new(
            "project",
            FeedbackScore::new(EntityKind::Span, format!("span-{i}"), "accuracy", 0.5),
        )
        .unwrap()
    }

    fn wait(queue: &EventQueue, target: u64) {
        assert!(queue.wait_settled(target, Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_singleton_submissions_in_order_without_batching() {
        let runtime = runtime();
        let queue = Arc::new(EventQueue::new(100, Duration::ZERO));
        let client = Arc::new(ScriptedClient::succeeding());
        for i in 0..20 {
            queue.enqueue(trace_message(i));
        }

        let pool = ConsumerPool::start(
            runtime.handle(),
            1,
            Arc::clone(&queue),
            delivery(&client),
            settings(false),
        );
        wait(&queue, 20);

        let sequences: Vec<u64> = client
            .submissions()
            .iter()
            .flat_map(|submission| submission.sequences.clone())
            .collect();
        assert_eq!(sequences, (1..=20).collect::<Vec<u64>>());
        assert!(client.batch_sizes().iter().all(|size| *size == 1));
        assert!(pool.stop(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_accumulation_stops_at_other_kind() {
        let runtime = runtime();
        let queue = Arc::new(EventQueue::new(100, Duration::ZERO));
        let client = Arc::new(ScriptedClient::succeeding());
        for i in 0..3 {
            queue.enqueue(trace_score_message(i));
        }
        queue.enqueue(span_score_message(3));
        for i in 4..6 {
            queue.enqueue(trace_score_message(i));
        }

        let pool = ConsumerPool::start(
            runtime.handle(),
            1,
            Arc::clone(&queue),
            delivery(&client),
            settings(true),
        );
        wait(&queue, 6);

        let kinds: Vec<(MessageKind, usize)> = client
            .submissions()
            .iter()
            .map(|submission| (submission.kind, submission.ids.len()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (MessageKind::TraceFeedbackScore, 3),
                (MessageKind::SpanFeedbackScore, 1),
                (MessageKind::TraceFeedbackScore, 2),
            ]
        );
        assert!(pool.stop(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_batches_respect_item_limit() {
        let runtime = runtime();
        let queue = Arc::new(EventQueue::new(1000, Duration::ZERO));
        let client = Arc::new(ScriptedClient::succeeding());
        for i in 0..25 {
            queue.enqueue(trace_score_message(i));
        }
        let mut settings = settings(true);
        settings.batch_limits.feedback_scores = 10;

        let pool = ConsumerPool::start(
            runtime.handle(),
            1,
            Arc::clone(&queue),
            delivery(&client),
            settings,
        );
        wait(&queue, 25);

        assert_eq!(client.batch_sizes(), vec![10, 10, 5]);
        assert!(pool.stop(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_feedback_scores_split_into_limit_sized_batches() {
        let runtime = runtime();
        let queue = Arc::new(EventQueue::new(1000, Duration::ZERO));
        let client = Arc::new(ScriptedClient::succeeding());
        for i in 0..250 {
            queue.enqueue(trace_score_message(i));
        }
        let mut settings = settings(true);
        settings.batch_window = Duration::from_secs(5);
        settings.batch_limits.feedback_scores = 100;

        let pool = ConsumerPool::start(
            runtime.handle(),
            1,
            Arc::clone(&queue),
            delivery(&client),
            settings,
        );
        wait(&queue, 250);

        assert_eq!(client.batch_sizes(), vec![100, 100, 50]);
        assert!(pool.stop(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_lone_message_is_not_held_for_the_window() {
        let runtime = runtime();
        let queue = Arc::new(EventQueue::new(10, Duration::ZERO));
        let client = Arc::new(ScriptedClient::succeeding());
        let mut settings = settings(true);
        settings.batch_window = Duration::from_secs(5);

        let pool = ConsumerPool::start(
            runtime.handle(),
            1,
            Arc::clone(&queue),
            delivery(&client),
            settings,
        );
        let start = Instant::now();
        queue.enqueue(trace_score_message(0));
        assert!(queue.wait_settled(1, start + Duration::from_secs(1)));

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(client.batch_sizes(), vec![1]);
        assert!(pool.stop(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_elapsed_window_closes_batch() {
        let runtime = runtime();
        let queue = Arc::new(EventQueue::new(100, Duration::ZERO));
        let client = Arc::new(ScriptedClient::succeeding());
        for i in 0..5 {
            queue.enqueue(trace_score_message(i));
        }
        let mut settings = settings(true);
        settings.batch_window = Duration::ZERO;

        let pool = ConsumerPool::start(
            runtime.handle(),
            1,
            Arc::clone(&queue),
            delivery(&client),
            settings,
        );
        wait(&queue, 5);

        // Same kind and well under the item limit, yet every window ends at once.
        assert_eq!(client.batch_sizes(), vec![1, 1, 1, 1, 1]);
        assert!(pool.stop(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_deletions_are_chunked() {
        let runtime = runtime();
        let queue = Arc::new(EventQueue::new(10, Duration::ZERO));
        let client = Arc::new(ScriptedClient::succeeding());
        let ids = (0..5).map(|i| format!("trace-{i}")).collect();
        queue.enqueue(Message::new("project", DeleteTraces::new(ids)).unwrap());
        let mut settings = settings(true);
        settings.batch_limits.delete_traces = 2;

        let pool = ConsumerPool::start(
            runtime.handle(),
            1,
            Arc::clone(&queue),
            delivery(&client),
            settings,
        );
        wait(&queue, 1);

        let submissions = client.submissions();
        assert_eq!(submissions.len(), 3);
        assert!(submissions
            .iter()
            .all(|submission| submission.kind == MessageKind::DeleteTraces));
        let first_ids: Vec<&str> = submissions
            .iter()
            .map(|submission| submission.ids[0].as_str())
            .collect();
        assert_eq!(first_ids, vec!["trace-0", "trace-2", "trace-4"]);
        assert_eq!(queue.settled_count(), 1);
        assert!(pool.stop(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_worker_continues_after_permanent_failure() {
        let runtime = runtime();
        let queue = Arc::new(EventQueue::new(10, Duration::ZERO));
        let client = Arc::new(ScriptedClient::with_script(
            vec![Err(DeliveryError::Permanent("400 Bad Request".into()))],
            Ok(()),
        ));
        queue.enqueue(trace_message(0));
        queue.enqueue(trace_message(1));

        let delivery = delivery(&client);
        let pool = ConsumerPool::start(
            runtime.handle(),
            1,
            Arc::clone(&queue),
            Arc::clone(&delivery),
            settings(false),
        );
        wait(&queue, 2);

        assert_eq!(client.submit_count(), 2);
        assert_eq!(delivery.stats().dropped_batches, 1);
        assert_eq!(delivery.stats().delivered_batches, 1);
        assert!(pool.stop(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_stop_waits_for_workers() {
        let runtime = runtime();
        let queue = Arc::new(EventQueue::new(10, Duration::ZERO));
        let client = Arc::new(ScriptedClient::succeeding());

        let pool = ConsumerPool::start(
            runtime.handle(),
            3,
            queue,
            delivery(&client),
            settings(false),
        );
        assert_eq!(pool.live_workers(), 3);

        assert!(pool.stop(Instant::now() + Duration::from_secs(5)));
        assert_eq!(pool.live_workers(), 0);
    }

    #[test]
    fn test_stop_gives_up_on_busy_worker() {
        let runtime = runtime();
        let queue = Arc::new(EventQueue::new(10, Duration::ZERO));
        let client = Arc::new(ScriptedClient::succeeding().with_delay(Duration::from_secs(30)));
        queue.enqueue(trace_message(0));

        let pool = ConsumerPool::start(
            runtime.handle(),
            1,
            Arc::clone(&queue),
            delivery(&client),
            settings(false),
        );
        while client.submit_count() == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(!pool.stop(Instant::now() + Duration::from_millis(50)));
        runtime.shutdown_background();
    }
}
