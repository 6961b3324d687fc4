// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! REST delivery client for the Opik backend.

use std::env;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::delivery::DeliveryClient;
use crate::errors::{ConfigError, DeliveryError, StreamerError};
use crate::message::{Message, MessageBody, MessageKind};
use crate::splitter::Batch;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5173/api";
const WORKSPACE_HEADER: &str = "Comet-Workspace";
const MAX_LOGGED_BODY_CHARS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub workspace: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        HttpClientConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            workspace: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl HttpClientConfig {
    /// Reads `OPIK_URL_OVERRIDE`, `OPIK_API_KEY` and `OPIK_WORKSPACE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = non_empty_var("OPIK_URL_OVERRIDE")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "OPIK_URL_OVERRIDE must be an http(s) URL, got '{base_url}'"
            )));
        }

        Ok(HttpClientConfig {
            base_url,
            api_key: non_empty_var("OPIK_API_KEY"),
            workspace: non_empty_var("OPIK_WORKSPACE"),
            ..Default::default()
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub struct HttpDeliveryClient {
    client: reqwest::Client,
    config: HttpClientConfig,
}

impl HttpDeliveryClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, StreamerError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(HttpDeliveryClient { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn send<B>(&self, method: Method, path: &str, body: &B) -> Result<(), DeliveryError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.client.request(method, self.url(path)).json(body);
        if let Some(api_key) = &self.config.api_key {
            request = request.header(reqwest::header::AUTHORIZATION, api_key);
        }
        if let Some(workspace) = &self.config.workspace {
            request = request.header(WORKSPACE_HEADER, workspace);
        }

        let time = Instant::now();
        let response = request.send().await.map_err(classify_error)?;
        let status = response.status();
        if status.is_success() {
            debug!(
                "Sent request to {} in {} ms with status {}",
                path,
                time.elapsed().as_millis(),
                status
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

#[derive(Serialize)]
struct TracesBody<'a> {
    traces: &'a [Message],
}

#[derive(Serialize)]
struct SpansBody<'a> {
    spans: &'a [Message],
}

#[derive(Serialize)]
struct ScoresBody<'a> {
    scores: &'a [Message],
}

#[derive(Serialize)]
struct DeleteBody<'a> {
    ids: Vec<&'a str>,
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn submit(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let messages = batch.messages();
        match batch.kind() {
            MessageKind::CreateTrace => {
                self.send(
                    Method::POST,
                    "/v1/private/traces/batch",
                    &TracesBody { traces: messages },
                )
                .await
            }
            MessageKind::CreateSpan => {
                self.send(
                    Method::POST,
                    "/v1/private/spans/batch",
                    &SpansBody { spans: messages },
                )
                .await
            }
            MessageKind::TraceFeedbackScore => {
                self.send(
                    Method::PUT,
                    "/v1/private/traces/feedback-scores",
                    &ScoresBody { scores: messages },
                )
                .await
            }
            MessageKind::SpanFeedbackScore => {
                self.send(
                    Method::PUT,
                    "/v1/private/spans/feedback-scores",
                    &ScoresBody { scores: messages },
                )
                .await
            }
            MessageKind::DeleteTraces => {
                let ids: Vec<&str> = messages
                    .iter()
                    .filter_map(|message| match message.body() {
                        MessageBody::DeleteTraces(delete) => Some(delete.trace_ids.iter()),
                        _ => None,
                    })
                    .flatten()
                    .map(String::as_str)
                    .collect();
                self.send(
                    Method::POST,
                    "/v1/private/traces/delete",
                    &DeleteBody { ids },
                )
                .await
            }
            MessageKind::UpdateTrace => self.update_each("traces", messages).await,
            MessageKind::UpdateSpan => self.update_each("spans", messages).await,
        }
    }
}

impl HttpDeliveryClient {
    /// Updates have no bulk endpoint: one PATCH per message, in order.
    async fn update_each(&self, resource: &str, messages: &[Message]) -> Result<(), DeliveryError> {
        for message in messages {
            let path = format!("/v1/private/{resource}/{}", message.entity_id());
            self.send(Method::PATCH, &path, message).await?;
        }
        Ok(())
    }
}

/// 408, 429 and 5xx may succeed later; any other failure status will not.
fn classify_status(status: StatusCode, body: &str) -> DeliveryError {
    let body: String = body.chars().take(MAX_LOGGED_BODY_CHARS).collect();
    let reason = format!("{status}: {body}");
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        DeliveryError::Transient(reason)
    } else {
        DeliveryError::Permanent(reason)
    }
}

fn classify_error(e: reqwest::Error) -> DeliveryError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        DeliveryError::Transient(e.to_string())
    } else {
        DeliveryError::Permanent(e.to_string())
    }
}
