// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scripted delivery client shared by the unit tests.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::delivery::DeliveryClient;
use crate::errors::DeliveryError;
use crate::message::{CreateTrace, EntityKind, FeedbackScore, Message, MessageKind};
use crate::splitter::Batch;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Submission {
    pub kind: MessageKind,
    pub sequences: Vec<u64>,
    pub ids: Vec<String>,
}

/// Records every submission attempt and answers from a script, falling back to a
/// fixed result once the script is exhausted.
pub(crate) struct ScriptedClient {
    script: Mutex<VecDeque<Result<(), DeliveryError>>>,
    fallback: Result<(), DeliveryError>,
    delay: Duration,
    submissions: Mutex<Vec<Submission>>,
}

impl ScriptedClient {
    pub fn succeeding() -> Self {
        Self::with_script(Vec::new(), Ok(()))
    }

    pub fn failing(error: DeliveryError) -> Self {
        Self::with_script(Vec::new(), Err(error))
    }

    pub fn with_script(
        script: Vec<Result<(), DeliveryError>>,
        fallback: Result<(), DeliveryError>,
    ) -> Self {
        ScriptedClient {
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.submissions()
            .iter()
            .map(|submission| submission.ids.len())
            .collect()
    }
}

#[async_trait]
impl DeliveryClient for ScriptedClient {
    async fn submit(&self, batch: &Batch) -> Result<(), DeliveryError> {
        self.submissions.lock().unwrap().push(Submission {
            kind: batch.kind(),
            sequences: batch
                .messages()
                .iter()
                .map(Message::enqueue_sequence)
                .collect(),
            ids: batch
                .messages()
                .iter()
                .map(|message| message.entity_id().to_string())
                .collect(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

pub(crate) fn trace_message(i: usize) -> Message {
    Message::new("project", CreateTrace::new(format!("trace-{i}"), Utc::now())).unwrap()
}

pub(crate) fn trace_score_message(i: usize) -> Message {
    Message::new(
        "project",
        FeedbackScore::new(EntityKind::Trace, format!("trace-{i}"), "accuracy", 1.0),
    )
    .unwrap()
}
