// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Message summarization and amnesia.
//!
//! Compaction replaces a message's content with a short `[summary]` stand-in
//! (the message itself stays in place, keeping the history shape intact).
//! Amnesia truncates the bodies of aged assistant/tool messages without
//! summarizing them.

use goagent_model::{ChatMessage, Role};
use goagent_plan::PlanObservationPayload;

/// Maximum snippet length inside a summary line.
const SNIPPET_CHARS: usize = 160;

/// Content cap applied by amnesia.
const AMNESIA_CHARS: usize = 512;

const EMPTY_SUMMARY: &str = "[summary] Conversation context compressed.";

/// Build the `[summary]` replacement content for one message.
pub(crate) fn summary_for(msg: &ChatMessage) -> String {
    match msg.role {
        Role::Tool => {
            let joined = match PlanObservationPayload::decode(&msg.content) {
                Ok(payload) => observation_digest(&payload),
                Err(_) => msg.content.clone(),
            };
            let snip = snippet(&joined, SNIPPET_CHARS);
            if snip.is_empty() {
                EMPTY_SUMMARY.to_string()
            } else {
                format!("[summary] tool observation: {snip}")
            }
        }
        role => {
            let snip = snippet(&msg.content, SNIPPET_CHARS);
            if snip.is_empty() {
                EMPTY_SUMMARY.to_string()
            } else {
                format!("[summary] {} recap: {snip}", role.as_str())
            }
        }
    }
}

/// Join the interesting parts of an observation payload with `"; "`.
fn observation_digest(payload: &PlanObservationPayload) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !payload.summary.is_empty() {
        parts.push(payload.summary.clone());
    }
    if !payload.details.is_empty() {
        parts.push(payload.details.clone());
    }
    if let Some(observations) = &payload.plan_observation {
        for obs in observations.iter().take(6) {
            parts.push(format!("{}={}", obs.id, obs.status));
        }
        if observations.iter().any(|o| o.truncated) {
            parts.push("output truncated".to_string());
        }
    }
    if payload.canceled_by_human {
        parts.push("canceled by human".to_string());
    }
    if payload.operation_canceled {
        parts.push("operation canceled".to_string());
    }
    parts.join("; ")
}

/// Collapse whitespace runs to single spaces and cap at `max` characters
/// (appending an ellipsis when cut).
pub(crate) fn snippet(s: &str, max: usize) -> String {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max)
}

/// Character-boundary truncation with an ellipsis marker.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

/// Apply amnesia in place: messages whose age (in passes) has reached
/// `threshold` get their bodies truncated.
///
/// - Assistant: content and every tool call's arguments are capped at 512
///   characters (empty fields stay untouched).
/// - Tool: the observation payload is re-serialized with stdout/stderr
///   blanked and details capped; unparseable content is capped raw.
pub(crate) fn apply_amnesia(messages: &mut [ChatMessage], current_pass: u64, threshold: u64) {
    if threshold == 0 {
        return;
    }
    for msg in messages.iter_mut() {
        if current_pass.saturating_sub(msg.pass) < threshold {
            continue;
        }
        match msg.role {
            Role::Assistant => {
                if !msg.content.is_empty() {
                    msg.content = truncate_chars(&msg.content, AMNESIA_CHARS);
                }
                for call in &mut msg.tool_calls {
                    if !call.arguments.is_empty() {
                        call.arguments = truncate_chars(&call.arguments, AMNESIA_CHARS);
                    }
                }
            }
            Role::Tool => match PlanObservationPayload::decode(&msg.content) {
                Ok(mut payload) => {
                    payload.stdout.clear();
                    payload.stderr.clear();
                    if let Some(observations) = payload.plan_observation.as_mut() {
                        for obs in observations {
                            obs.stdout.clear();
                            obs.stderr.clear();
                        }
                    }
                    payload.details = truncate_chars(&payload.details, AMNESIA_CHARS);
                    msg.content = payload.encode();
                }
                Err(_) => {
                    msg.content = truncate_chars(&msg.content, AMNESIA_CHARS);
                }
            },
            _ => {}
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
