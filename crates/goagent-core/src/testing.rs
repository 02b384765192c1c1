// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted command runner for runtime tests.
//!
//! Pairs with [`goagent_model::MockModel`]: the mock scripts what the model
//! plans, this scripts what execution observes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use goagent_exec::{CommandObservation, CommandRunner, ExecError};
use goagent_plan::PlanStep;

#[derive(Debug, Clone)]
enum Scripted {
    Ok(CommandObservation),
    Fail(String),
}

/// Command runner that replays canned outcomes keyed by step id.
///
/// Unknown steps succeed with a synthetic `ran <id>` stdout, so tests only
/// script the steps they care about.  Every execution is recorded in order.
#[derive(Default)]
pub struct ScriptedRunner {
    outcomes: Mutex<HashMap<String, Scripted>>,
    executed: Arc<Mutex<Vec<String>>>,
    delay_ms: u64,
}

impl ScriptedRunner {
    /// One step scripted to succeed with the given stdout.
    pub fn ok_with_stdout(id: &str, stdout: &str) -> Self {
        Self::default().with_ok_stdout(id, stdout)
    }

    pub fn with_ok_stdout(self, id: &str, stdout: &str) -> Self {
        self.outcomes.lock().unwrap().insert(
            id.to_string(),
            Scripted::Ok(CommandObservation {
                stdout: stdout.to_string(),
                exit_code: Some(0),
                ..Default::default()
            }),
        );
        self
    }

    pub fn with_observation(self, id: &str, observation: CommandObservation) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(id.to_string(), Scripted::Ok(observation));
        self
    }

    pub fn with_failure(self, id: &str, message: &str) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(id.to_string(), Scripted::Fail(message.to_string()));
        self
    }

    /// Delay every execution; lets tests observe overlap.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Shared log of executed step ids in start order.
    pub fn execution_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.executed.clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(
        &self,
        _cancel: &CancellationToken,
        step: &PlanStep,
    ) -> Result<CommandObservation, ExecError> {
        self.executed.lock().unwrap().push(step.id.clone());
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        let scripted = self.outcomes.lock().unwrap().get(&step.id).cloned();
        match scripted {
            Some(Scripted::Ok(obs)) => Ok(obs),
            Some(Scripted::Fail(message)) => Err(ExecError {
                observation: CommandObservation {
                    exit_code: Some(1),
                    details: message.clone(),
                    ..Default::default()
                },
                message,
            }),
            None => Ok(CommandObservation {
                stdout: format!("ran {}\n", step.id),
                exit_code: Some(0),
                ..Default::default()
            }),
        }
    }
}
