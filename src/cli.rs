// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::Parser;

use goagent_config::RuntimeConfig;

/// Autonomous plan-and-execute AI agent runtime.
#[derive(Debug, Parser)]
#[command(name = "goagent", version, about)]
pub struct Cli {
    /// Submit this prompt at startup instead of waiting for stdin.
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Run autonomously on TOPIC: the runtime answers its own input
    /// requests until the plan is empty or the pass limit is hit.
    #[arg(long, value_name = "TOPIC")]
    pub hands_free: Option<String>,

    /// Maximum plan-execution passes per prompt (0 = unlimited).
    #[arg(long)]
    pub max_passes: Option<u64>,

    /// Model identifier (also OPENAI_MODEL).
    #[arg(long)]
    pub model: Option<String>,

    /// API base URL (also OPENAI_BASE_URL).
    #[arg(long)]
    pub base_url: Option<String>,

    /// Reasoning effort forwarded to the model (also OPENAI_REASONING_EFFORT).
    #[arg(long)]
    pub reasoning_effort: Option<String>,

    /// History snapshot path; pass an empty string to disable persistence.
    #[arg(long, value_name = "PATH")]
    pub history_log: Option<String>,

    /// Truncate assistant/tool message bodies after this many passes
    /// (0 disables amnesia).
    #[arg(long)]
    pub amnesia_after: Option<u64>,

    /// Drop outbound events blocked longer than this many milliseconds
    /// (0 blocks forever).
    #[arg(long)]
    pub emit_timeout_ms: Option<u64>,

    /// Load KEY=VALUE pairs from this file into the environment first.
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Apply flag overrides on top of the environment-resolved config.
    pub fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(effort) = &self.reasoning_effort {
            config.reasoning_effort = effort.clone();
        }
        if let Some(max_passes) = self.max_passes {
            config.max_passes = max_passes;
        }
        if let Some(path) = &self.history_log {
            config.history_log_path = path.clone();
        }
        if let Some(amnesia) = self.amnesia_after {
            config.amnesia_after_passes = amnesia;
        }
        if let Some(timeout) = self.emit_timeout_ms {
            config.emit_timeout_ms = timeout;
        }
        if let Some(topic) = &self.hands_free {
            config.hands_free = true;
            config.hands_free_topic = topic.clone();
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
