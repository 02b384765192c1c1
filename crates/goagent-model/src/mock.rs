// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted model implementation for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::client::{PlanModel, PlanRequest};
use crate::retry::ModelError;
use crate::types::{ModelEvent, ToolCall};

/// One scripted model turn.
#[derive(Debug, Clone, Default)]
pub struct MockTurn {
    /// Text deltas streamed before the tool call resolves.
    pub text_deltas: Vec<String>,
    /// The tool call to return; `None` simulates "no plan".
    pub tool_call: Option<ToolCall>,
}

impl MockTurn {
    /// A turn returning a plan tool call with the given raw arguments.
    pub fn plan(arguments: impl Into<String>) -> Self {
        Self {
            text_deltas: Vec::new(),
            tool_call: Some(ToolCall {
                id: format!("mock_call_{}", next_mock_id()),
                name: "update_plan".into(),
                arguments: arguments.into(),
            }),
        }
    }

    /// A turn that streams text but never names a tool.
    pub fn no_plan() -> Self {
        Self::default()
    }
}

fn next_mock_id() -> usize {
    static CTR: AtomicUsize = AtomicUsize::new(0);
    CTR.fetch_add(1, Ordering::Relaxed)
}

/// Mock model that replays a queue of [`MockTurn`]s.  Once the script is
/// exhausted it keeps answering with empty plans (`{"message":"","plan":[]}`),
/// which drives a hands-free runtime to completion.
#[derive(Debug, Default)]
pub struct MockModel {
    turns: Mutex<VecDeque<MockTurn>>,
    requests_seen: AtomicUsize,
}

impl MockModel {
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests_seen: AtomicUsize::new(0),
        }
    }

    /// Shorthand: one plan turn per raw-arguments string.
    pub fn with_plans(plans: Vec<&str>) -> Self {
        Self::new(plans.into_iter().map(MockTurn::plan).collect())
    }

    /// Number of plan requests issued so far.
    pub fn requests_seen(&self) -> usize {
        self.requests_seen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlanModel for MockModel {
    async fn request_plan(
        &self,
        _req: PlanRequest,
        events: mpsc::Sender<ModelEvent>,
    ) -> Result<Option<ToolCall>, ModelError> {
        self.requests_seen.fetch_add(1, Ordering::SeqCst);
        let turn = self
            .turns
            .lock()
            .expect("mock turn queue poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                MockTurn::plan(r#"{"message": "", "plan": [], "require_human_input": false}"#)
            });
        for delta in turn.text_deltas {
            let _ = events.send(ModelEvent::TextDelta(delta)).await;
        }
        Ok(turn.tool_call)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
