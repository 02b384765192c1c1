// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::warn;

use goagent_model::{ChatMessage, Role};

use crate::budget::{estimate_history_tokens, ContextBudget};
use crate::compact;

/// Cap on in-place summary replacements per planning snapshot.
const MAX_COMPACTION_ITERATIONS: usize = 10;

/// Append-only message log with pass-indexed entries.
///
/// All mutation (append, amnesia, compaction) happens under the exclusive
/// side of one lock; every read hands out copies.  The pass counter lives
/// here because appends stamp it onto messages.
#[derive(Debug)]
pub struct HistoryStore {
    messages: RwLock<Vec<ChatMessage>>,
    pass: AtomicU64,
    budget: ContextBudget,
    amnesia_after_passes: u64,
}

impl HistoryStore {
    /// Create a store seeded with the system prompt at index 0.
    pub fn new(system_prompt: &str, budget: ContextBudget, amnesia_after_passes: u64) -> Self {
        Self {
            messages: RwLock::new(vec![ChatMessage::system(system_prompt)]),
            pass: AtomicU64::new(0),
            budget,
            amnesia_after_passes,
        }
    }

    // ── Pass counter ─────────────────────────────────────────────────────────

    pub fn pass(&self) -> u64 {
        self.pass.load(Ordering::SeqCst)
    }

    /// Increment at the top of a plan-execution pass; returns the new value.
    pub fn increment_pass(&self) -> u64 {
        self.pass.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reset to zero when a new prompt session starts.
    pub fn reset_pass(&self) {
        self.pass.store(0, Ordering::SeqCst);
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Stamp the current pass onto `msg`, append it, and run amnesia over the
    /// aged tail — all under one exclusive lock.
    pub fn append(&self, mut msg: ChatMessage) {
        let current = self.pass();
        msg.pass = current;
        let mut messages = self.messages.write().expect("history lock poisoned");
        messages.push(msg);
        compact::apply_amnesia(&mut messages, current, self.amnesia_after_passes);
    }

    /// Plain deep copy without compaction.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.read().expect("history lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.messages.read().expect("history lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated token total for the current message list.
    pub fn estimated_tokens(&self) -> u64 {
        estimate_history_tokens(&self.messages.read().expect("history lock poisoned"))
    }

    /// Snapshot taken before every model request: compacts in place while the
    /// estimate exceeds the budget trigger, then returns a deep copy.
    ///
    /// Each iteration replaces the oldest non-system, non-summarized message
    /// with a `[summary]` stand-in.  The loop stops when the total fits, when
    /// nothing is left to summarize, or after the iteration cap (which only
    /// warns — the snapshot is returned regardless).
    pub fn planning_snapshot(&self) -> Vec<ChatMessage> {
        let mut messages = self.messages.write().expect("history lock poisoned");

        if let Some(trigger) = self.budget.trigger_tokens() {
            let mut iterations = 0usize;
            loop {
                let total = estimate_history_tokens(&messages);
                if total <= trigger {
                    break;
                }
                if iterations >= MAX_COMPACTION_ITERATIONS {
                    warn!(
                        total,
                        trigger, "history still over budget after compaction cap"
                    );
                    break;
                }
                let Some(idx) = messages
                    .iter()
                    .position(|m| m.role != Role::System && !m.summarized)
                else {
                    // Full sweep made no change; nothing left to compact.
                    break;
                };
                let summary = compact::summary_for(&messages[idx]);
                let msg = &mut messages[idx];
                msg.role = Role::Assistant;
                msg.content = summary;
                msg.summarized = true;
                msg.tool_calls.clear();
                msg.tool_call_id = None;
                msg.name = None;
                iterations += 1;
            }
        }

        messages.clone()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
