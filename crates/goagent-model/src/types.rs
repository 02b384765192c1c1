use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool call emitted by the model.  `arguments` is the raw JSON text of the
/// plan response; it is parsed and validated downstream, never here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    /// A tool call without a name cannot be dispatched and is treated as
    /// "the model returned no plan".
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

/// A single message in the conversation history.
///
/// `pass` records the plan-execution pass counter at append time and drives
/// amnesia; `summarized` marks messages that were replaced by a compaction
/// stand-in and must never be compacted again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pass: u64,
    #[serde(default)]
    pub summarized: bool,
}

impl ChatMessage {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
            pass: 0,
            summarized: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content)
    }

    /// An assistant message carrying the plan tool call for correlation with
    /// the subsequent tool message.
    pub fn assistant_with_tool_call(content: impl Into<String>, call: ToolCall) -> Self {
        let mut msg = Self::base(Role::Assistant, content);
        msg.tool_calls = vec![call];
        msg
    }

    /// A tool message answering `tool_call_id` with a JSON observation body.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::base(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// Host-facing streaming events emitted while a plan request is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// A chunk of assistant text (either a native output_text delta or a
    /// progressively rendered slice of the plan's `message` field).
    TextDelta(String),
    /// One fully closed element of the plan's `reasoning` array.
    ReasoningLine(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
