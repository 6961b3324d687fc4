// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Failure reported by a [`crate::delivery::DeliveryClient`] for one batch submission.
///
/// The classification decides the retry policy: transient failures are retried with
/// backoff, permanent ones are dropped immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

/// Errors raised while constructing a [`crate::message::Message`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("project name cannot be empty")]
    EmptyProjectName,

    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    #[error("end time {end} is before start time {start}")]
    EndBeforeStart { start: String, end: String },

    #[error("feedback score value must be a finite number, got {0}")]
    InvalidScoreValue(f64),

    #[error("total cost must be a finite non-negative number, got {0}")]
    InvalidTotalCost(f64),

    #[error("trace deletion requires at least one trace id")]
    NoTraceIds,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that can occur when creating a [`crate::streamer::Streamer`]
#[derive(Debug, thiserror::Error)]
pub enum StreamerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to start consumer runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
