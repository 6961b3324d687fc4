// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Message builders for integration tests

use chrono::Utc;
use opik_streamer::{
    CreateSpan, CreateTrace, EntityKind, FeedbackScore, Message, StreamerConfig, UpdateTrace,
};
use std::time::Duration;

pub const PROJECT: &str = "integration";

pub fn trace(id: &str) -> Message {
    Message::new(PROJECT, CreateTrace::new(id, Utc::now())).expect("valid trace")
}

pub fn span(id: &str, trace_id: &str) -> Message {
    Message::new(PROJECT, CreateSpan::new(id, trace_id, Utc::now())).expect("valid span")
}

pub fn trace_score(trace_id: &str, value: f64) -> Message {
    Message::new(
        PROJECT,
        FeedbackScore::new(EntityKind::Trace, trace_id, "relevance", value),
    )
    .expect("valid feedback score")
}

pub fn end_trace(id: &str) -> Message {
    let mut update = UpdateTrace::new(id);
    update.end_time = Some(Utc::now());
    Message::new(PROJECT, update).expect("valid trace update")
}

/// Fast-polling configuration with short retry backoff
pub fn test_config(consumer_count: usize, batching_enabled: bool) -> StreamerConfig {
    let mut config = StreamerConfig {
        consumer_count,
        batching_enabled,
        batch_window: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        default_flush_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    config.retry.backoff_base = Duration::from_millis(1);
    config.retry.backoff_max = Duration::from_millis(5);
    config
}
