// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process, sync::Arc, time::Instant};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use opik_streamer::{
    new_id, CreateSpan, CreateTrace, EntityKind, FeedbackScore, HttpClientConfig,
    HttpDeliveryClient, Message, MessageError, SpanType, Streamer, StreamerConfig, UpdateSpan,
    UpdateTrace,
};

const DEFAULT_PROJECT_NAME: &str = "Default Project";
const DEFAULT_TRACE_COUNT: usize = 100;
const DEFAULT_SPANS_PER_TRACE: usize = 3;

pub fn main() {
    let log_level = env::var("OPIK_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse log level in configuration: {e}");
            process::exit(1);
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        process::exit(1);
    }
    debug!("Logging subsystem enabled");

    let project_name =
        env::var("OPIK_PROJECT_NAME").unwrap_or_else(|_| DEFAULT_PROJECT_NAME.to_string());
    let trace_count = env_usize("OPIK_LOADGEN_TRACES", DEFAULT_TRACE_COUNT);
    let spans_per_trace = env_usize("OPIK_LOADGEN_SPANS_PER_TRACE", DEFAULT_SPANS_PER_TRACE);

    let streamer = match build_streamer() {
        Ok(streamer) => streamer,
        Err(e) => {
            error!("Unable to start streamer: {}", e);
            process::exit(1);
        }
    };

    let time = Instant::now();
    let mut accepted = 0usize;
    let mut refused = 0usize;
    for _ in 0..trace_count {
        let messages = match synthetic_trace(&project_name, spans_per_trace) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Skipping invalid synthetic trace: {}", e);
                continue;
            }
        };
        for message in messages {
            if streamer.put(message) {
                accepted += 1;
            } else {
                refused += 1;
            }
        }
    }
    info!(
        accepted,
        refused,
        elapsed_ms = time.elapsed().as_millis() as u64,
        "Queued synthetic traffic"
    );

    let drained = streamer.close_default();
    let stats = streamer.delivery_stats();
    info!(
        drained,
        delivered_batches = stats.delivered_batches,
        delivered_messages = stats.delivered_messages,
        dropped_messages = stats.dropped_messages,
        retries = stats.retries,
        "Load generation finished in {} ms",
        time.elapsed().as_millis()
    );
    if !drained {
        process::exit(2);
    }
}

fn build_streamer() -> Result<Streamer, Box<dyn std::error::Error>> {
    let config = StreamerConfig::from_env()?;
    let client = HttpDeliveryClient::new(HttpClientConfig::from_env()?)?;
    Ok(Streamer::new(config, Arc::new(client))?)
}

fn env_usize(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={}, using {}", name, value, default);
            default
        }),
        Err(_) => default,
    }
}

/// One trace with a chain of LLM spans, closed by updates and scored once.
fn synthetic_trace(project_name: &str, span_count: usize) -> Result<Vec<Message>, MessageError> {
    let trace_id = new_id();
    let mut trace = CreateTrace::new(trace_id.as_str(), Utc::now());
    trace.name = Some("loadgen".to_string());
    trace.input = Some(json!({ "prompt": "synthetic request" }));
    trace.tags = Some(vec!["loadgen".to_string()]);

    let mut messages = vec![Message::new(project_name, trace)?];
    let mut parent_span_id = None;
    for i in 0..span_count {
        let span_id = new_id();
        let mut span = CreateSpan::new(span_id.as_str(), trace_id.as_str(), Utc::now());
        span.name = Some(format!("step-{i}"));
        span.span_type = SpanType::Llm;
        span.parent_span_id = parent_span_id.take();
        span.model = Some("synthetic-model".to_string());
        span.input = Some(json!({ "step": i }));
        messages.push(Message::new(project_name, span)?);

        let mut update = UpdateSpan::new(span_id.as_str(), trace_id.as_str());
        update.end_time = Some(Utc::now());
        update.output = Some(json!({ "completion": format!("output {i}") }));
        update.usage = Some(
            [("prompt_tokens", 12), ("completion_tokens", 30)]
                .into_iter()
                .map(|(name, count)| (name.to_string(), count))
                .collect(),
        );
        messages.push(Message::new(project_name, update)?);
        parent_span_id = Some(span_id);
    }

    let mut update = UpdateTrace::new(trace_id.as_str());
    update.end_time = Some(Utc::now());
    update.output = Some(json!({ "answer": "synthetic response" }));
    messages.push(Message::new(project_name, update)?);

    let score = FeedbackScore::new(EntityKind::Trace, trace_id.as_str(), "quality", 0.8);
    messages.push(Message::new(project_name, score)?);
    Ok(messages)
}
