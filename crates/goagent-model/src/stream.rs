// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Responses-event dispatch and tool-call accumulation.
//!
//! The Responses API streams many event types; this module cares about four
//! families: output-text deltas, function/tool-call deltas, argument deltas,
//! and the completed events that carry the final response object.  Providers
//! differ in which family they use for the same information, so the
//! accumulator takes whatever arrives and fills the gaps from the completed
//! event via a depth-first search.

use serde_json::Value;

use crate::partial::ProgressiveRender;
use crate::types::{ModelEvent, ToolCall};

/// One classified stream event.  A single SSE frame may map to several
/// (message deltas carry nested output_text items).
#[derive(Debug, Clone)]
pub(crate) enum ResponsesEvent {
    OutputTextDelta(String),
    ToolCallDelta {
        name: Option<String>,
        call_id: Option<String>,
        arguments: String,
    },
    ToolCallArgsDelta(String),
    Completed(Value),
}

/// Classify a decoded SSE event object by its `type` field.
pub(crate) fn classify(event: &Value) -> Vec<ResponsesEvent> {
    let Some(ty) = event["type"].as_str() else {
        return Vec::new();
    };

    if ty == "response.output_text.delta" {
        if let Some(delta) = event["delta"].as_str() {
            return vec![ResponsesEvent::OutputTextDelta(delta.to_string())];
        }
        return Vec::new();
    }

    let is_call_family = ty.contains("function_call") || ty.contains("tool_call");

    if is_call_family && ty.ends_with(".arguments.delta") {
        if let Some(delta) = event["delta"].as_str() {
            return vec![ResponsesEvent::ToolCallArgsDelta(delta.to_string())];
        }
        return Vec::new();
    }

    if is_call_family && ty.ends_with(".delta") {
        let name = string_at(event, "name").or_else(|| string_at(&event["delta"], "name"));
        let call_id = string_at(event, "call_id").or_else(|| string_at(&event["delta"], "call_id"));
        let arguments = string_at(event, "arguments")
            .or_else(|| string_at(&event["delta"], "arguments"))
            .unwrap_or_default();
        return vec![ResponsesEvent::ToolCallDelta {
            name,
            call_id,
            arguments,
        }];
    }

    if ty == "message.delta" || ty == "response.message.delta" {
        return collect_nested_text_deltas(&event["delta"]);
    }

    if ty == "response.completed"
        || ty.ends_with(".output_text.done")
        || ty.ends_with(".function_call.completed")
        || ty.ends_with(".tool_call.completed")
    {
        return vec![ResponsesEvent::Completed(event.clone())];
    }

    Vec::new()
}

fn string_at(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|s| s.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Pull `output_text.delta` items out of a nested message delta.
fn collect_nested_text_deltas(delta: &Value) -> Vec<ResponsesEvent> {
    let mut out = Vec::new();
    let items: Vec<&Value> = match delta {
        Value::Array(a) => a.iter().collect(),
        Value::Object(_) => match delta.get("content").and_then(|c| c.as_array()) {
            Some(a) => a.iter().collect(),
            None => vec![delta],
        },
        _ => return out,
    };
    for item in items {
        let is_text = item["type"]
            .as_str()
            .is_some_and(|t| t.contains("output_text"));
        if is_text {
            if let Some(d) = item["delta"].as_str().or_else(|| item["text"].as_str()) {
                out.push(ResponsesEvent::OutputTextDelta(d.to_string()));
            }
        }
    }
    out
}

/// Depth-first search for the first string value under a field named `key`.
fn dfs_first_string(v: &Value, key: &str) -> Option<String> {
    match v {
        Value::Object(map) => {
            for (k, val) in map {
                if k == key {
                    if let Some(s) = val.as_str() {
                        if !s.is_empty() {
                            return Some(s.to_string());
                        }
                    }
                }
                if let Some(found) = dfs_first_string(val, key) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(|item| dfs_first_string(item, key)),
        _ => None,
    }
}

// ─── Accumulator ─────────────────────────────────────────────────────────────

/// Accumulates one tool call across a stream of Responses events and renders
/// the plan's `message`/`reasoning` progressively while arguments grow.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    name: String,
    call_id: String,
    arguments: String,
    render: ProgressiveRender,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one classified event; returns host-facing deltas to forward.
    pub(crate) fn apply(&mut self, event: ResponsesEvent) -> Vec<ModelEvent> {
        match event {
            ResponsesEvent::OutputTextDelta(delta) => {
                vec![ModelEvent::TextDelta(delta)]
            }
            ResponsesEvent::ToolCallDelta {
                name,
                call_id,
                arguments,
            } => {
                if let Some(id) = call_id {
                    if id != self.call_id {
                        // A new call id supersedes whatever was accumulated.
                        self.arguments.clear();
                        self.render = ProgressiveRender::default();
                        self.call_id = id;
                    }
                }
                if let Some(n) = name {
                    self.name = n;
                }
                if arguments.is_empty() {
                    Vec::new()
                } else {
                    self.arguments.push_str(&arguments);
                    self.render.render(&self.arguments)
                }
            }
            ResponsesEvent::ToolCallArgsDelta(delta) => {
                self.arguments.push_str(&delta);
                self.render.render(&self.arguments)
            }
            ResponsesEvent::Completed(event) => {
                let response = &event["response"];
                if self.name.is_empty() {
                    if let Some(n) = dfs_first_string(response, "name") {
                        self.name = n;
                    }
                }
                if self.call_id.is_empty() {
                    if let Some(id) = dfs_first_string(response, "call_id") {
                        self.call_id = id;
                    }
                }
                if self.arguments.is_empty() {
                    if let Some(args) = dfs_first_string(response, "arguments") {
                        self.arguments = args;
                        return self.render.render(&self.arguments);
                    }
                }
                Vec::new()
            }
        }
    }

    /// The final tool call, or `None` when no name ever arrived ("no plan").
    pub fn finish(self) -> Option<ToolCall> {
        if self.name.is_empty() {
            return None;
        }
        Some(ToolCall {
            id: self.call_id,
            name: self.name,
            arguments: self.arguments,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
