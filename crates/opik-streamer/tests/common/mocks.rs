// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock delivery clients for integration tests

use opik_streamer::{Batch, DeliveryClient, DeliveryError, MessageKind};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RecordedBatch {
    pub kind: MessageKind,
    pub ids: Vec<String>,
    pub estimated_bytes: usize,
}

/// Records every submission and fails the first ones with the queued errors
#[derive(Default)]
pub struct RecordingClient {
    failures: Mutex<VecDeque<DeliveryError>>,
    delay: Duration,
    batches: Mutex<Vec<RecordedBatch>>,
}

#[allow(dead_code)]
impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(failures: Vec<DeliveryError>) -> Self {
        RecordingClient {
            failures: Mutex::new(failures.into()),
            ..Default::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        RecordingClient {
            delay,
            ..Default::default()
        }
    }

    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.batches.lock().expect("batches lock").clone()
    }

    pub fn delivered_ids(&self) -> Vec<String> {
        self.batches()
            .into_iter()
            .flat_map(|batch| batch.ids)
            .collect()
    }
}

#[async_trait::async_trait]
impl DeliveryClient for RecordingClient {
    async fn submit(&self, batch: &Batch) -> Result<(), DeliveryError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.batches
            .lock()
            .expect("batches lock")
            .push(RecordedBatch {
                kind: batch.kind(),
                ids: batch
                    .messages()
                    .iter()
                    .map(|message| message.entity_id().to_string())
                    .collect(),
                estimated_bytes: batch.estimated_bytes(),
            });
        match self.failures.lock().expect("failures lock").pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
