// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be on unless explicitly disabled need a named function.
#[allow(dead_code)]
fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_http_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_history_log_path() -> String {
    "history.json".to_string()
}

fn default_exit_words() -> Vec<String> {
    ["exit", "quit", "/exit", "/quit"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_auto_reply() -> String {
    "Continue with the task. If the task is complete, return an empty plan."
        .to_string()
}

fn default_agent_name() -> String {
    "main".to_string()
}

/// Full configuration of one runtime instance.
///
/// A research sub-runtime is created from a clone of the parent's config with
/// the hands-free fields overridden, so everything here must stay `Clone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Model identifier forwarded to the Responses API.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key sent as `Authorization: Bearer <key>`.
    #[serde(default)]
    pub api_key: String,
    /// API base that ends **before** `/responses`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Reasoning effort forwarded as `reasoning.effort`; empty disables.
    #[serde(default)]
    pub reasoning_effort: String,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Retries on transient request failures (network, 429, 5xx).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Hard ceiling on plan-execution passes per prompt; 0 = unlimited.
    #[serde(default)]
    pub max_passes: u64,
    /// Autonomous mode: the runtime prompts itself instead of a human.
    #[serde(default)]
    pub hands_free: bool,
    /// Initial prompt synthesized when `hands_free` is set.
    #[serde(default)]
    pub hands_free_topic: String,
    /// Prompt enqueued in response to every RequestInput while hands-free.
    #[serde(default = "default_auto_reply")]
    pub hands_free_auto_reply: String,
    /// Skip spawning the stdin reader (sub-runtimes, embedding hosts).
    #[serde(default)]
    pub disable_input_reader: bool,
    /// Skip spawning the terminal output forwarder.
    #[serde(default)]
    pub disable_output_forwarding: bool,

    /// Truncate assistant/tool message bodies once they are this many passes
    /// old; 0 disables amnesia.
    #[serde(default)]
    pub amnesia_after_passes: u64,
    /// Outbound emits that block longer than this many milliseconds are
    /// dropped (with a warning); 0 blocks forever.
    #[serde(default)]
    pub emit_timeout_ms: u64,
    /// History snapshot is persisted here before every model request; empty
    /// disables persistence.
    #[serde(default = "default_history_log_path")]
    pub history_log_path: String,
    /// Input lines that shut the runtime down (case-insensitive).
    #[serde(default = "default_exit_words")]
    pub exit_words: Vec<String>,
    /// Verbose SSE frame tracing.
    #[serde(default)]
    pub debug_stream: bool,
    /// Label stamped on outbound events ("main" for the primary runtime,
    /// "research" for sub-runtimes).
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: String::new(),
            base_url: default_base_url(),
            reasoning_effort: String::new(),
            http_timeout_secs: default_http_timeout_secs(),
            max_retries: default_max_retries(),
            max_passes: 0,
            hands_free: false,
            hands_free_topic: String::new(),
            hands_free_auto_reply: default_auto_reply(),
            disable_input_reader: false,
            disable_output_forwarding: false,
            amnesia_after_passes: 0,
            emit_timeout_ms: 0,
            history_log_path: default_history_log_path(),
            exit_words: default_exit_words(),
            debug_stream: false,
            agent_name: default_agent_name(),
        }
    }
}

impl RuntimeConfig {
    /// Build a config from defaults plus the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        env_overlay(&mut cfg);
        cfg
    }

    /// Returns an error when no API key is configured.  Called by the binary
    /// after all overlays have been applied; library users embedding a mock
    /// model never need a key.
    pub fn require_api_key(&self) -> anyhow::Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("OPENAI_API_KEY is not set");
        }
        Ok(())
    }

    /// True when `word` matches one of the configured exit words.
    pub fn is_exit_word(&self, word: &str) -> bool {
        self.exit_words
            .iter()
            .any(|w| w.eq_ignore_ascii_case(word.trim()))
    }
}

/// Overlay recognized environment variables onto `cfg`.
pub fn env_overlay(cfg: &mut RuntimeConfig) {
    if let Ok(v) = std::env::var("OPENAI_API_KEY") {
        cfg.api_key = v;
    }
    if let Ok(v) = std::env::var("OPENAI_MODEL") {
        if !v.trim().is_empty() {
            cfg.model = v;
        }
    }
    if let Ok(v) = std::env::var("OPENAI_BASE_URL") {
        if !v.trim().is_empty() {
            cfg.base_url = v;
        }
    }
    if let Ok(v) = std::env::var("OPENAI_REASONING_EFFORT") {
        cfg.reasoning_effort = v;
    }
    if let Ok(v) = std::env::var("GOAGENT_DEBUG_STREAM") {
        cfg.debug_stream = matches!(v.trim(), "1" | "true" | "yes");
    }
    debug!(model = %cfg.model, base_url = %cfg.base_url, "configuration resolved");
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_gpt_4o() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.model, "gpt-4o");
    }

    #[test]
    fn default_base_url_is_openai() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn default_exit_words_cover_slash_variants() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.is_exit_word("exit"));
        assert!(cfg.is_exit_word("QUIT"));
        assert!(cfg.is_exit_word("/exit"));
        assert!(cfg.is_exit_word(" /quit "));
        assert!(!cfg.is_exit_word("continue"));
    }

    #[test]
    fn require_api_key_fails_when_empty() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.require_api_key().is_err());
    }

    #[test]
    fn require_api_key_passes_when_set() {
        let cfg = RuntimeConfig {
            api_key: "sk-test".into(),
            ..Default::default()
        };
        assert!(cfg.require_api_key().is_ok());
    }

    #[test]
    fn config_round_trips_through_serde() {
        let cfg = RuntimeConfig {
            hands_free: true,
            hands_free_topic: "audit the repo".into(),
            max_passes: 12,
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert!(back.hands_free);
        assert_eq!(back.hands_free_topic, "audit the repo");
        assert_eq!(back.max_passes, 12);
    }

    #[test]
    fn deserialize_empty_object_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.http_timeout_secs, 120);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.history_log_path, "history.json");
    }
}
