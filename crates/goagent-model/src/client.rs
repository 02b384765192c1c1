// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Streaming client for the OpenAI Responses API.
//!
//! Every request carries exactly one function tool with `tool_choice:
//! "required"`, so the model must answer with a plan.  Transient failures
//! (network, 429, 5xx) are retried with exponential backoff before the first
//! SSE byte arrives; once the stream is open, errors surface directly.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use goagent_config::RuntimeConfig;

use crate::retry::{ModelError, RetryPolicy};
use crate::sse::{drain_complete_sse_lines, SseFrame};
use crate::stream::{classify, ToolCallAccumulator};
use crate::types::{ChatMessage, ModelEvent, Role, ToolCall};

/// The single function tool offered to the model.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// A prepared plan request: the history snapshot plus the forced tool.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub messages: Vec<ChatMessage>,
    pub tool: ToolSpec,
}

/// Seam between the orchestrator and the concrete model transport.
///
/// Implementations stream text/reasoning deltas through `events` while the
/// request is in flight and resolve to the final tool call — `None` when the
/// model never named a tool ("no plan").
#[async_trait]
pub trait PlanModel: Send + Sync {
    async fn request_plan(
        &self,
        req: PlanRequest,
        events: mpsc::Sender<ModelEvent>,
    ) -> Result<Option<ToolCall>, ModelError>;
}

/// Production client speaking the streaming `/responses` wire format.
pub struct ResponsesClient {
    http: reqwest::Client,
    responses_url: String,
    api_key: String,
    model: String,
    reasoning_effort: String,
    retry: RetryPolicy,
    debug_stream: bool,
}

impl ResponsesClient {
    pub fn from_config(cfg: &RuntimeConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.http_timeout_secs))
            .build()?;
        let base = cfg.base_url.trim_end_matches('/');
        Ok(Self {
            http,
            responses_url: format!("{base}/responses"),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            reasoning_effort: cfg.reasoning_effort.trim().to_string(),
            retry: RetryPolicy {
                max_retries: cfg.max_retries,
                ..Default::default()
            },
            debug_stream: cfg.debug_stream,
        })
    }

    /// Issue the POST and classify failures.  Only this part is retried; a
    /// broken stream after a 200 is not re-requested.
    async fn send(&self, body: Value) -> Result<reqwest::Response, ModelError> {
        let resp = self
            .http
            .post(&self.responses_url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl PlanModel for ResponsesClient {
    async fn request_plan(
        &self,
        req: PlanRequest,
        events: mpsc::Sender<ModelEvent>,
    ) -> Result<Option<ToolCall>, ModelError> {
        let body = build_request_body(&self.model, &self.reasoning_effort, &req);
        debug!(
            model = %self.model,
            message_count = req.messages.len(),
            "sending plan request"
        );

        let resp = self.retry.run(|| self.send(body.clone())).await?;

        let mut byte_stream = Box::pin(resp.bytes_stream());
        let mut buf = String::new();
        let mut acc = ToolCallAccumulator::new();

        'stream: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            buf.push_str(&String::from_utf8_lossy(&chunk));
            for frame in drain_complete_sse_lines(&mut buf) {
                match frame {
                    SseFrame::Done => break 'stream,
                    SseFrame::Event(event) => {
                        if self.debug_stream {
                            debug!(event = %event, "sse frame");
                        } else {
                            trace!(event = %event, "sse frame");
                        }
                        for ev in classify(&event) {
                            for delta in acc.apply(ev) {
                                let _ = events.send(delta).await;
                            }
                        }
                    }
                }
            }
        }

        Ok(acc.finish())
    }
}

/// Map one history message into a Responses `input` item.
///
/// Tool messages travel as `developer` role; assistant content is typed
/// `output_text`, everything else `input_text`.  An assistant message with
/// empty content but a recorded tool call sends the call's raw arguments so
/// validation-retry turns keep the previous plan visible to the model.
fn input_item(msg: &ChatMessage) -> Value {
    let role = match msg.role {
        Role::Tool => "developer",
        other => other.as_str(),
    };
    let content_type = if msg.role == Role::Assistant {
        "output_text"
    } else {
        "input_text"
    };
    let text = if msg.content.is_empty() {
        msg.tool_calls
            .first()
            .map(|tc| tc.arguments.clone())
            .unwrap_or_default()
    } else {
        msg.content.clone()
    };
    json!({
        "role": role,
        "content": [{ "type": content_type, "text": text }],
    })
}

pub(crate) fn build_request_body(model: &str, reasoning_effort: &str, req: &PlanRequest) -> Value {
    let input: Vec<Value> = req.messages.iter().map(input_item).collect();
    let mut body = json!({
        "model": model,
        "stream": true,
        "input": input,
        "tools": [{
            "type": "function",
            "name": req.tool.name,
            "description": req.tool.description,
            "parameters": req.tool.parameters,
        }],
        "tool_choice": "required",
    });
    if !reasoning_effort.is_empty() {
        body["reasoning"] = json!({ "effort": reasoning_effort });
    }
    body
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
