// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO shared by application threads (producers) and consumer tasks.
//!
//! Producers are synchronous and never see an error: on a full queue `enqueue` blocks
//! for at most the configured backpressure window, then drops the new message and
//! counts it. Consumers wait asynchronously for new entries.
//!
//! The queue also keeps the drain accounting used by `flush` and `close`: every
//! accepted message is eventually *settled*, either delivered or dropped, by the
//! consumer that claimed it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::message::{Message, MessageKind};

#[derive(Debug)]
pub struct QueueEntry {
    pub message: Message,
    pub enqueued_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    next_sequence: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Accounting {
    accepted: u64,
    settled: u64,
}

#[derive(Debug)]
pub struct EventQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    backpressure_timeout: Duration,
    not_full: Condvar,
    not_empty: Notify,
    accounting: Mutex<Accounting>,
    settled_changed: Condvar,
    dropped: AtomicU64,
}

impl EventQueue {
    #[must_use]
    pub fn new(capacity: usize, backpressure_timeout: Duration) -> Self {
        EventQueue {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            backpressure_timeout,
            not_full: Condvar::new(),
            not_empty: Notify::new(),
            accounting: Mutex::new(Accounting::default()),
            settled_changed: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_accounting(&self) -> MutexGuard<'_, Accounting> {
        self.accounting
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Appends `message` to the queue, assigning its enqueue sequence.
    ///
    /// Returns `false` when the queue stayed full for the whole backpressure window and
    /// the message was dropped.
    pub fn enqueue(&self, mut message: Message) -> bool {
        let deadline = Instant::now() + self.backpressure_timeout;
        let mut state = self.lock_state();

        while state.entries.len() >= self.capacity {
            let now = Instant::now();
            if now >= deadline {
                drop(state);
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    kind = %message.kind(),
                    capacity = self.capacity,
                    dropped_total = dropped,
                    "Event queue full, dropping message"
                );
                return false;
            }
            let (guard, _) = self
                .not_full
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state = guard;
        }

        state.next_sequence += 1;
        message.set_enqueue_sequence(state.next_sequence);
        state.entries.push_back(QueueEntry {
            message,
            enqueued_at: Instant::now(),
        });
        self.lock_accounting().accepted += 1;
        drop(state);

        self.not_empty.notify_one();
        true
    }

    /// Pops the head of the queue without waiting.
    pub fn try_dequeue(&self) -> Option<QueueEntry> {
        let entry = self.lock_state().entries.pop_front();
        if entry.is_some() {
            self.not_full.notify_one();
        }
        entry
    }

    /// Pops the head of the queue only if it is a message of `kind`.
    ///
    /// Used for greedy batch accumulation: stopping at the first message of another
    /// kind keeps each consumer's submissions in queue order.
    pub fn try_dequeue_kind(&self, kind: MessageKind) -> Option<QueueEntry> {
        let entry = {
            let mut state = self.lock_state();
            match state.entries.front() {
                Some(head) if head.message.kind() == kind => state.entries.pop_front(),
                _ => None,
            }
        };
        if entry.is_some() {
            self.not_full.notify_one();
        }
        entry
    }

    /// Waits up to `timeout` for an entry.
    pub async fn dequeue_blocking(&self, timeout: Duration) -> Option<QueueEntry> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue between the check and the wait
            // is not missed.
            notified.as_mut().enable();

            if let Some(entry) = self.try_dequeue() {
                return Some(entry);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.lock_state().entries.len()
    }

    /// True when the queue is empty and every accepted message has been settled.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        let state = self.lock_state();
        let accounting = self.lock_accounting();
        state.entries.is_empty() && accounting.settled >= accounting.accepted
    }

    /// Number of messages accepted so far. Used as the target of a flush.
    #[must_use]
    pub fn accepted_count(&self) -> u64 {
        self.lock_accounting().accepted
    }

    #[must_use]
    pub fn settled_count(&self) -> u64 {
        self.lock_accounting().settled
    }

    /// Messages accepted but not yet settled, queued or in flight.
    #[must_use]
    pub fn pending(&self) -> u64 {
        let accounting = self.lock_accounting();
        accounting.accepted.saturating_sub(accounting.settled)
    }

    /// Messages refused because the queue was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Records that `count` claimed messages are done, delivered or dropped.
    pub fn settle(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut accounting = self.lock_accounting();
        accounting.settled += count as u64;
        drop(accounting);
        self.settled_changed.notify_all();
    }

    /// Blocks the calling thread until at least `target` messages are settled or the
    /// deadline passes. Returns whether the target was reached.
    pub fn wait_settled(&self, target: u64, deadline: Instant) -> bool {
        let mut accounting = self.lock_accounting();
        while accounting.settled < target {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .settled_changed
                .wait_timeout(accounting, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            accounting = guard;
        }
        true
    }

    /// Removes every pending entry, settling them as dropped. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let purged: Vec<QueueEntry> = self.lock_state().entries.drain(..).collect();
        if !purged.is_empty() {
            debug!("Purged {} pending messages from event queue", purged.len());
            self.not_full.notify_all();
            self.settle(purged.len());
        }
        purged.len()
    }
}
