// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background delivery engine for Opik telemetry.
//!
//! Applications hand [`Message`]s to a [`Streamer`]; a pool of consumer workers
//! batches them by kind, splits batches to the backend's limits and delivers them
//! through a [`DeliveryClient`] with retries. `flush` and `close` give the
//! application a bounded way to wait for everything it queued.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod consumer;
pub mod delivery;
pub mod errors;
pub mod http;
pub mod message;
pub mod queue;
pub mod retry;
pub mod splitter;
pub mod streamer;

#[cfg(test)]
mod test_support;

pub use config::{BatchLimits, RetryConfig, StreamerConfig};
pub use delivery::DeliveryClient;
pub use errors::{ConfigError, DeliveryError, MessageError, StreamerError};
pub use http::{HttpClientConfig, HttpDeliveryClient};
pub use message::{
    new_id, CreateSpan, CreateTrace, DeleteTraces, EntityKind, ErrorInfo, FeedbackScore,
    Message, MessageBody, MessageKind, ScoreSource, SpanType, UpdateSpan, UpdateTrace,
};
pub use retry::{DeliveryOutcome, DeliveryStats, RetryPolicy};
pub use splitter::Batch;
pub use streamer::Streamer;
