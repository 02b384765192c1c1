// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The `run_research` internal command.
//!
//! Spawns a nested hands-free runtime on the same model and configuration,
//! drains its outbound queue, and reports the sub-agent's final assistant
//! message back as the step's output.  Completion is recognized by the
//! [`HANDS_FREE_COMPLETE`](crate::HANDS_FREE_COMPLETE) status substring.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use goagent_config::RuntimeConfig;
use goagent_exec::{
    ApplyPatchCommand, CommandObservation, InternalCommand, InternalRequest, ShellExecutor,
};
use goagent_model::PlanModel;

use crate::events::OutboundKind;
use crate::runtime::{Runtime, HANDS_FREE_COMPLETE};

/// Default pass budget for a research sub-session.
const DEFAULT_TURNS: u64 = 10;

pub struct ResearchCommand {
    config: RuntimeConfig,
    model: Arc<dyn PlanModel>,
}

impl ResearchCommand {
    pub fn new(config: RuntimeConfig, model: Arc<dyn PlanModel>) -> Self {
        Self { config, model }
    }

    fn sub_config(&self, goal: &str, turns: u64) -> RuntimeConfig {
        let mut config = self.config.clone();
        config.hands_free = true;
        config.hands_free_topic = goal.to_string();
        config.max_passes = turns;
        config.disable_input_reader = true;
        config.disable_output_forwarding = true;
        config.agent_name = "research".to_string();
        // The parent owns the history log; a sub-session must not clobber it.
        config.history_log_path = String::new();
        config
    }
}

#[async_trait]
impl InternalCommand for ResearchCommand {
    fn name(&self) -> &str {
        "run_research"
    }

    async fn run(&self, req: InternalRequest<'_>) -> anyhow::Result<CommandObservation> {
        let goal = req
            .arg("goal")
            .map(str::to_string)
            .filter(|g| !g.trim().is_empty())
            .or_else(|| {
                (!req.positionals.is_empty()).then(|| req.positionals.join(" "))
            })
            .ok_or_else(|| anyhow::anyhow!("run_research requires goal=\"...\""))?;
        let turns = req
            .arg("turns")
            .and_then(|t| t.parse::<u64>().ok())
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_TURNS);

        debug!(goal = %goal, turns, "starting research sub-session");

        // Research sub-runtimes get apply_patch but never run_research
        // themselves, so delegation cannot recurse.
        let mut executor = ShellExecutor::new();
        executor.register_internal(ApplyPatchCommand);
        let runtime = Runtime::new(
            self.sub_config(&goal, turns),
            self.model.clone(),
            Arc::new(executor),
        )?;
        let mut outbound = runtime
            .take_outbound()
            .expect("fresh runtime always has an outbound receiver");

        // The task owns the runtime: when the loop ends, the runtime drops
        // and the outbound queue closes, ending the drain below.
        let driver = tokio::spawn(async move {
            if let Err(e) = runtime.run().await {
                warn!(error = %e, "research sub-runtime failed");
            }
        });

        let mut last_assistant = String::new();
        let mut complete = false;
        while let Some(event) = outbound.recv().await {
            match event.kind {
                OutboundKind::AssistantMessage => last_assistant = event.message,
                OutboundKind::Status if event.message.contains(HANDS_FREE_COMPLETE) => {
                    complete = true;
                }
                _ => {}
            }
        }
        let _ = driver.await;

        if complete {
            Ok(CommandObservation {
                stdout: last_assistant,
                exit_code: Some(0),
                ..Default::default()
            })
        } else {
            Ok(CommandObservation {
                stderr: last_assistant,
                exit_code: Some(1),
                details: "hands-free session did not complete".to_string(),
                ..Default::default()
            })
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
