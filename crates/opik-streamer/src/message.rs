// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Telemetry events accepted by the streamer.
//!
//! Every event is a [`Message`]: the project it belongs to, the sequence number the
//! queue assigned on accept, and a kind-specific [`MessageBody`]. Bodies are
//! validated when the message is built so that nothing malformed ever reaches the
//! queue.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::errors::MessageError;
use crate::splitter::split_into_batches;

/// Generates a new time-ordered (UUIDv7) identifier for traces and spans.
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    CreateTrace,
    UpdateTrace,
    CreateSpan,
    UpdateSpan,
    TraceFeedbackScore,
    SpanFeedbackScore,
    DeleteTraces,
}

impl MessageKind {
    /// Kinds the backend accepts in bulk. Everything else is always delivered one
    /// message per request.
    #[must_use]
    pub fn supports_batching(self) -> bool {
        matches!(
            self,
            MessageKind::CreateTrace
                | MessageKind::CreateSpan
                | MessageKind::TraceFeedbackScore
                | MessageKind::SpanFeedbackScore
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::CreateTrace => "create_trace",
            MessageKind::UpdateTrace => "update_trace",
            MessageKind::CreateSpan => "create_span",
            MessageKind::UpdateSpan => "update_span",
            MessageKind::TraceFeedbackScore => "trace_feedback_score",
            MessageKind::SpanFeedbackScore => "span_feedback_score",
            MessageKind::DeleteTraces => "delete_traces",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanType {
    #[default]
    General,
    Tool,
    Llm,
    Guardrail,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    #[default]
    Sdk,
    Ui,
    OnlineScoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Trace,
    Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub exception_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub traceback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateTrace {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl CreateTrace {
    #[must_use]
    pub fn new(id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        CreateTrace {
            id: id.into(),
            name: None,
            start_time,
            end_time: None,
            input: None,
            output: None,
            metadata: None,
            tags: None,
            error_info: None,
            thread_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateTrace {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl UpdateTrace {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        UpdateTrace {
            id: id.into(),
            end_time: None,
            output: None,
            metadata: None,
            tags: None,
            error_info: None,
            thread_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateSpan {
    pub id: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub span_type: SpanType,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<HashMap<String, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
}

impl CreateSpan {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        trace_id: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        CreateSpan {
            id: id.into(),
            trace_id: trace_id.into(),
            parent_span_id: None,
            name: None,
            span_type: SpanType::default(),
            start_time,
            end_time: None,
            input: None,
            output: None,
            metadata: None,
            tags: None,
            usage: None,
            model: None,
            provider: None,
            error_info: None,
            total_cost: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateSpan {
    pub id: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<HashMap<String, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
}

impl UpdateSpan {
    #[must_use]
    pub fn new(id: impl Into<String>, trace_id: impl Into<String>) -> Self {
        UpdateSpan {
            id: id.into(),
            trace_id: trace_id.into(),
            parent_span_id: None,
            end_time: None,
            output: None,
            metadata: None,
            tags: None,
            usage: None,
            model: None,
            provider: None,
            error_info: None,
            total_cost: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackScore {
    #[serde(rename = "id")]
    pub entity_id: String,
    #[serde(skip)]
    pub entity_kind: EntityKind,
    pub name: String,
    pub value: f64,
    pub source: ScoreSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
}

impl FeedbackScore {
    #[must_use]
    pub fn new(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        name: impl Into<String>,
        value: f64,
    ) -> Self {
        FeedbackScore {
            entity_id: entity_id.into(),
            entity_kind,
            name: name.into(),
            value,
            source: ScoreSource::default(),
            reason: None,
            category_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteTraces {
    #[serde(rename = "ids")]
    pub trace_ids: Vec<String>,
}

impl DeleteTraces {
    #[must_use]
    pub fn new(trace_ids: Vec<String>) -> Self {
        DeleteTraces { trace_ids }
    }

    /// Splits the deletion into requests of at most `max_ids` ids each, keeping order.
    #[must_use]
    pub fn chunks(self, max_ids: usize) -> Vec<DeleteTraces> {
        split_into_batches(self.trace_ids, max_ids, usize::MAX, |_| 0)
            .into_iter()
            .map(DeleteTraces::new)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageBody {
    CreateTrace(CreateTrace),
    UpdateTrace(UpdateTrace),
    CreateSpan(CreateSpan),
    UpdateSpan(UpdateSpan),
    FeedbackScore(FeedbackScore),
    DeleteTraces(DeleteTraces),
}

impl MessageBody {
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::CreateTrace(_) => MessageKind::CreateTrace,
            MessageBody::UpdateTrace(_) => MessageKind::UpdateTrace,
            MessageBody::CreateSpan(_) => MessageKind::CreateSpan,
            MessageBody::UpdateSpan(_) => MessageKind::UpdateSpan,
            MessageBody::FeedbackScore(score) => match score.entity_kind {
                EntityKind::Trace => MessageKind::TraceFeedbackScore,
                EntityKind::Span => MessageKind::SpanFeedbackScore,
            },
            MessageBody::DeleteTraces(_) => MessageKind::DeleteTraces,
        }
    }

    fn validate(&self) -> Result<(), MessageError> {
        match self {
            MessageBody::CreateTrace(trace) => {
                require("trace id", &trace.id)?;
                check_times(trace.start_time, trace.end_time)
            }
            MessageBody::UpdateTrace(trace) => require("trace id", &trace.id),
            MessageBody::CreateSpan(span) => {
                require("span id", &span.id)?;
                require("trace id", &span.trace_id)?;
                check_cost(span.total_cost)?;
                check_times(span.start_time, span.end_time)
            }
            MessageBody::UpdateSpan(span) => {
                require("span id", &span.id)?;
                require("trace id", &span.trace_id)?;
                check_cost(span.total_cost)
            }
            MessageBody::FeedbackScore(score) => {
                require("feedback score entity id", &score.entity_id)?;
                require("feedback score name", &score.name)?;
                if !score.value.is_finite() {
                    return Err(MessageError::InvalidScoreValue(score.value));
                }
                Ok(())
            }
            MessageBody::DeleteTraces(delete) => {
                if delete.trace_ids.is_empty() {
                    return Err(MessageError::NoTraceIds);
                }
                delete
                    .trace_ids
                    .iter()
                    .try_for_each(|id| require("trace id", id))
            }
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), MessageError> {
    if value.trim().is_empty() {
        return Err(MessageError::EmptyField(field));
    }
    Ok(())
}

fn check_times(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<(), MessageError> {
    match end {
        Some(end) if end < start => Err(MessageError::EndBeforeStart {
            start: start.to_rfc3339(),
            end: end.to_rfc3339(),
        }),
        _ => Ok(()),
    }
}

fn check_cost(total_cost: Option<f64>) -> Result<(), MessageError> {
    match total_cost {
        Some(cost) if !cost.is_finite() || cost < 0.0 => Err(MessageError::InvalidTotalCost(cost)),
        _ => Ok(()),
    }
}

impl From<CreateTrace> for MessageBody {
    fn from(value: CreateTrace) -> Self {
        MessageBody::CreateTrace(value)
    }
}

impl From<UpdateTrace> for MessageBody {
    fn from(value: UpdateTrace) -> Self {
        MessageBody::UpdateTrace(value)
    }
}

impl From<CreateSpan> for MessageBody {
    fn from(value: CreateSpan) -> Self {
        MessageBody::CreateSpan(value)
    }
}

impl From<UpdateSpan> for MessageBody {
    fn from(value: UpdateSpan) -> Self {
        MessageBody::UpdateSpan(value)
    }
}

impl From<FeedbackScore> for MessageBody {
    fn from(value: FeedbackScore) -> Self {
        MessageBody::FeedbackScore(value)
    }
}

impl From<DeleteTraces> for MessageBody {
    fn from(value: DeleteTraces) -> Self {
        MessageBody::DeleteTraces(value)
    }
}

/// A validated telemetry event.
///
/// `enqueue_sequence` is zero until the event queue accepts the message; from then on
/// it is strictly increasing in queue order and is only meant for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    project_name: String,
    #[serde(skip)]
    enqueue_sequence: u64,
    #[serde(flatten)]
    body: MessageBody,
}

impl Message {
    pub fn new(
        project_name: impl Into<String>,
        body: impl Into<MessageBody>,
    ) -> Result<Self, MessageError> {
        let project_name = project_name.into();
        if project_name.trim().is_empty() {
            return Err(MessageError::EmptyProjectName);
        }
        let body = body.into();
        body.validate()?;
        Ok(Message {
            project_name,
            enqueue_sequence: 0,
            body,
        })
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    #[must_use]
    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    #[must_use]
    pub fn enqueue_sequence(&self) -> u64 {
        self.enqueue_sequence
    }

    pub(crate) fn set_enqueue_sequence(&mut self, sequence: u64) {
        self.enqueue_sequence = sequence;
    }

    #[must_use]
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    #[must_use]
    pub fn into_body(self) -> MessageBody {
        self.body
    }

    /// Id of the entity this message is about, used when logging dropped batches.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        match &self.body {
            MessageBody::CreateTrace(trace) => &trace.id,
            MessageBody::UpdateTrace(trace) => &trace.id,
            MessageBody::CreateSpan(span) => &span.id,
            MessageBody::UpdateSpan(span) => &span.id,
            MessageBody::FeedbackScore(score) => &score.entity_id,
            MessageBody::DeleteTraces(delete) => delete
                .trace_ids
                .first()
                .map_or("", String::as_str),
        }
    }

    /// Size in bytes of the JSON this message contributes to a request body.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len())
    }
}
