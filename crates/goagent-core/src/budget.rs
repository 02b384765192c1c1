// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-model context budgets and the character-based token estimator.
//!
//! The estimator is a chars/4 heuristic, not a tokenizer; thresholds derived
//! from it are approximate and treated that way everywhere.

use goagent_model::ChatMessage;

/// Context-window budget for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextBudget {
    pub max_tokens: i64,
    /// Fraction of the window at which compaction starts.  Values above 1
    /// are read as percentages (85 → 0.85).
    pub compact_when_percent: f64,
}

/// Known model budgets.  Matched case-insensitively on the full model id.
const MODEL_BUDGETS: &[(&str, i64, f64)] = &[
    ("gpt-4o", 128_000, 0.85),
    ("gpt-4o-mini", 128_000, 0.85),
    ("gpt-4.1", 1_000_000, 0.85),
    ("gpt-4.1-mini", 1_000_000, 0.85),
    ("gpt-4.1-nano", 1_000_000, 0.85),
    ("o3", 200_000, 0.85),
    ("o3-mini", 200_000, 0.85),
    ("o4-mini", 200_000, 0.85),
    ("gpt-5", 400_000, 0.85),
    ("gpt-5-mini", 400_000, 0.85),
];

const FALLBACK: ContextBudget = ContextBudget {
    max_tokens: 128_000,
    compact_when_percent: 0.85,
};

impl ContextBudget {
    /// Budget for `model`, falling back to `{128000, 0.85}` for unknown ids.
    pub fn for_model(model: &str) -> Self {
        let needle = model.trim().to_lowercase();
        MODEL_BUDGETS
            .iter()
            .find(|(id, _, _)| *id == needle)
            .map(|(_, max, pct)| ContextBudget {
                max_tokens: *max,
                compact_when_percent: *pct,
            })
            .unwrap_or(FALLBACK)
    }

    /// Token count at which compaction triggers, or `None` when compaction
    /// is disabled (non-positive window or a trigger below one token).
    pub fn trigger_tokens(&self) -> Option<u64> {
        if self.max_tokens <= 0 {
            return None;
        }
        let mut percent = self.compact_when_percent;
        if percent > 1.0 {
            percent /= 100.0;
        }
        let percent = percent.clamp(0.0, 1.0);
        let trigger = (self.max_tokens as f64 * percent).ceil() as u64;
        if trigger < 1 {
            return None;
        }
        Some(trigger)
    }
}

/// `ceil(len / 4)`; empty strings cost nothing, non-empty at least one token.
fn estimate_text(s: &str) -> u64 {
    (s.len() as u64).div_ceil(4)
}

/// Estimated tokens for one message: a fixed per-message overhead plus the
/// estimates of every text field and tool call.
pub fn estimate_message_tokens(msg: &ChatMessage) -> u64 {
    let mut tokens = 4
        + estimate_text(msg.role.as_str())
        + estimate_text(&msg.content)
        + estimate_text(msg.tool_call_id.as_deref().unwrap_or(""))
        + estimate_text(msg.name.as_deref().unwrap_or(""));
    for call in &msg.tool_calls {
        tokens += 4
            + estimate_text(&call.id)
            + estimate_text(&call.name)
            + estimate_text(&call.arguments);
    }
    tokens
}

pub fn estimate_history_tokens(messages: &[ChatMessage]) -> u64 {
    messages.iter().map(estimate_message_tokens).sum()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use goagent_model::ToolCall;

    use super::*;

    #[test]
    fn known_model_lookup_is_case_insensitive() {
        assert_eq!(
            ContextBudget::for_model("GPT-4O").max_tokens,
            128_000
        );
        assert_eq!(ContextBudget::for_model("o3").max_tokens, 200_000);
    }

    #[test]
    fn unknown_model_falls_back() {
        let b = ContextBudget::for_model("some-local-model");
        assert_eq!(b.max_tokens, 128_000);
        assert_eq!(b.compact_when_percent, 0.85);
    }

    #[test]
    fn trigger_is_ceil_of_fraction() {
        let b = ContextBudget {
            max_tokens: 100,
            compact_when_percent: 0.5,
        };
        assert_eq!(b.trigger_tokens(), Some(50));
        let odd = ContextBudget {
            max_tokens: 3,
            compact_when_percent: 0.5,
        };
        assert_eq!(odd.trigger_tokens(), Some(2));
    }

    #[test]
    fn percent_above_one_is_read_as_percentage() {
        let b = ContextBudget {
            max_tokens: 1000,
            compact_when_percent: 85.0,
        };
        assert_eq!(b.trigger_tokens(), Some(850));
    }

    #[test]
    fn non_positive_window_disables_compaction() {
        let b = ContextBudget {
            max_tokens: 0,
            compact_when_percent: 0.85,
        };
        assert_eq!(b.trigger_tokens(), None);
        let neg = ContextBudget {
            max_tokens: -5,
            compact_when_percent: 0.85,
        };
        assert_eq!(neg.trigger_tokens(), None);
    }

    #[test]
    fn zero_percent_disables_compaction() {
        let b = ContextBudget {
            max_tokens: 1000,
            compact_when_percent: 0.0,
        };
        assert_eq!(b.trigger_tokens(), None);
    }

    #[test]
    fn estimate_counts_overhead_and_fields() {
        // role "user" (1) + content 8 chars (2) + base 4 = 7
        let msg = ChatMessage::user("12345678");
        assert_eq!(estimate_message_tokens(&msg), 7);
    }

    #[test]
    fn empty_fields_contribute_nothing() {
        let mut msg = ChatMessage::user("");
        msg.role = goagent_model::Role::User;
        // base 4 + role "user" (1)
        assert_eq!(estimate_message_tokens(&msg), 5);
    }

    #[test]
    fn tool_calls_add_their_own_overhead() {
        let msg = ChatMessage::assistant_with_tool_call(
            "",
            ToolCall {
                id: "abcd".into(),      // 1
                name: "plan".into(),    // 1
                arguments: "12345678".into(), // 2
            },
        );
        // base 4 + role "assistant" (3) + call base 4 + 1 + 1 + 2 = 15
        assert_eq!(estimate_message_tokens(&msg), 15);
    }

    #[test]
    fn history_estimate_is_the_sum() {
        let msgs = vec![ChatMessage::user("12345678"), ChatMessage::user("12345678")];
        assert_eq!(estimate_history_tokens(&msgs), 14);
    }
}
