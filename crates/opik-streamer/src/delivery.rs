// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::errors::DeliveryError;
use crate::splitter::Batch;

/// Transport used by the consumers to hand a batch to the backend.
///
/// Implementations are shared by every consumer worker and must be safe to call
/// concurrently. They only report the outcome of one submission; retries, logging of
/// dropped batches and drain accounting are handled by the caller.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn submit(&self, batch: &Batch) -> Result<(), DeliveryError>;
}
