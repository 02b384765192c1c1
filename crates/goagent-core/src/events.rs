// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde_json::Value;

/// Events a host feeds into the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A user prompt to process.
    Prompt(String),
    /// Ask the runtime to stop after the current pass (advisory).
    Cancel,
    /// Terminate the runtime loop.
    Shutdown { reason: String },
}

/// Severity attached to outbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    /// Progress/status line for the operator.
    Status,
    /// A streamed chunk of assistant text.
    AssistantDelta,
    /// The plan's message for one pass, with plan metadata attached.
    AssistantMessage,
    /// A fatal or pass-fatal error.
    Error,
    /// The runtime is waiting for operator input.
    RequestInput,
}

/// One event emitted by the runtime.
///
/// `pass` is stamped from the pass counter at emit time; `agent` defaults to
/// `"main"` and distinguishes research sub-runtimes.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub kind: OutboundKind,
    pub message: String,
    pub level: Level,
    pub metadata: HashMap<String, Value>,
    pub pass: u64,
    pub agent: String,
}

impl OutboundEvent {
    fn new(kind: OutboundKind, level: Level, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            level,
            metadata: HashMap::new(),
            pass: 0,
            agent: "main".to_string(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::new(OutboundKind::Status, Level::Info, message)
    }

    pub fn status_warn(message: impl Into<String>) -> Self {
        Self::new(OutboundKind::Status, Level::Warn, message)
    }

    pub fn status_error(message: impl Into<String>) -> Self {
        Self::new(OutboundKind::Status, Level::Error, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(OutboundKind::Error, Level::Error, message)
    }

    pub fn assistant_delta(message: impl Into<String>) -> Self {
        Self::new(OutboundKind::AssistantDelta, Level::Info, message)
    }

    pub fn assistant_message(message: impl Into<String>) -> Self {
        Self::new(OutboundKind::AssistantMessage, Level::Info, message)
    }

    pub fn request_input(message: impl Into<String>) -> Self {
        Self::new(OutboundKind::RequestInput, Level::Info, message)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind_and_level() {
        assert_eq!(OutboundEvent::status("s").kind, OutboundKind::Status);
        assert_eq!(OutboundEvent::status("s").level, Level::Info);
        assert_eq!(OutboundEvent::status_warn("w").level, Level::Warn);
        assert_eq!(OutboundEvent::error("e").kind, OutboundKind::Error);
        assert_eq!(OutboundEvent::error("e").level, Level::Error);
        assert_eq!(
            OutboundEvent::request_input("r").kind,
            OutboundKind::RequestInput
        );
    }

    #[test]
    fn agent_defaults_to_main() {
        assert_eq!(OutboundEvent::status("s").agent, "main");
    }

    #[test]
    fn with_metadata_accumulates() {
        let ev = OutboundEvent::assistant_message("m")
            .with_metadata("a", serde_json::json!(1))
            .with_metadata("b", serde_json::json!("x"));
        assert_eq!(ev.metadata.len(), 2);
        assert_eq!(ev.metadata["a"], serde_json::json!(1));
    }
}
