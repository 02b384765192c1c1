// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Dependency-aware concurrent step scheduling for one pass.
//!
//! Ready steps run as parallel worker tasks; completions drain through a
//! queue in **finish order** (this ordering is observable in the
//! consolidated tool message).  The first failure halts further scheduling
//! but outstanding workers always drain before the pass settles.

use serde_json::json;
use tokio::sync::mpsc;

use goagent_exec::{CommandObservation, ExecError};
use goagent_plan::{PlanObservationPayload, PlanStep, StepObservation, StepStatus};

use crate::events::OutboundEvent;
use crate::runtime::Runtime;

type StepResult = (PlanStep, Result<CommandObservation, ExecError>);

impl Runtime {
    /// Execute every ready step of the current plan, then append the
    /// consolidated observation as one tool message correlated to
    /// `tool_call_id`.
    pub(crate) async fn execute_pending_steps(&self, tool_call_id: &str) {
        // One pass's commands at a time, runtime-wide.
        let _commands = self.command_lock.lock().await;

        let (done_tx, mut done_rx) = mpsc::channel::<StepResult>(16);
        let mut executing = 0usize;
        let mut halt = false;
        let mut final_err: Option<String> = None;
        let mut results: Vec<StepObservation> = Vec::new();

        loop {
            // Schedule everything that became ready, unless halted.
            if !halt && !self.cancel.is_cancelled() {
                while let Some(step) = self.plan.ready() {
                    self.emit(
                        OutboundEvent::status(format!(
                            "Executing step {}: {}",
                            step.id, step.title
                        ))
                        .with_metadata("step_id", json!(step.id))
                        .with_metadata("title", json!(step.title))
                        .with_metadata("shell", json!(step.command.shell))
                        .with_metadata("run", json!(step.command.run)),
                    )
                    .await;

                    let runner = self.runner.clone();
                    let cancel = self.cancel.child_token();
                    let tx = done_tx.clone();
                    tokio::spawn(async move {
                        let result = runner.execute(&cancel, &step).await;
                        let _ = tx.send((step, result)).await;
                    });
                    executing += 1;
                }
            }

            if executing == 0 {
                // Nothing running and nothing ready: either the remaining
                // pending steps are blocked (next pass re-plans them) or the
                // plan is drained.
                if !self.plan.has_pending() {
                    self.emit(OutboundEvent::status("Plan execution completed."))
                        .await;
                }
                break;
            }

            let Some((step, result)) = done_rx.recv().await else {
                break;
            };
            executing -= 1;

            let (status, mut observation, error) = match result {
                Ok(obs) => (StepStatus::Completed, obs, None),
                Err(err) => {
                    if self.cancel.is_cancelled() {
                        final_err.get_or_insert_with(|| "operation canceled".to_string());
                    }
                    (StepStatus::Failed, err.observation, Some(err.message))
                }
            };
            if let Some(message) = &error {
                halt = true;
                if final_err.is_none() {
                    final_err = Some(message.clone());
                }
                if observation.details.is_empty() {
                    observation.details = message.clone();
                }
            }

            let step_obs = StepObservation {
                id: step.id.clone(),
                status,
                stdout: observation.stdout,
                stderr: observation.stderr,
                exit_code: observation.exit_code,
                details: observation.details,
                truncated: observation.truncated,
            };

            if let Err(update_err) = self.plan.update_status(&step.id, status, Some(step_obs.clone())) {
                self.emit(OutboundEvent::error(format!(
                    "Failed to record status for step {}: {update_err}",
                    step.id
                )))
                .await;
                halt = true;
                final_err.get_or_insert_with(|| update_err.to_string());
            }

            match status {
                StepStatus::Completed => {
                    self.emit(
                        OutboundEvent::status(format!("Step {} completed.", step.id))
                            .with_metadata("step_id", json!(step.id))
                            .with_metadata("exit_code", json!(step_obs.exit_code)),
                    )
                    .await;
                }
                _ => {
                    self.emit(
                        OutboundEvent::status_error(format!(
                            "Step {} failed: {}",
                            step.id, step_obs.details
                        ))
                        .with_metadata("step_id", json!(step.id))
                        .with_metadata("exit_code", json!(step_obs.exit_code)),
                    )
                    .await;
                }
            }

            results.push(step_obs);
        }
        drop(done_tx);

        // Consolidated observation for the whole pass.
        let mut payload = PlanObservationPayload::default();
        if let Some(last) = results.last() {
            payload.stdout = last.stdout.clone();
            payload.stderr = last.stderr.clone();
            payload.truncated = last.truncated;
            payload.exit_code = last.exit_code;
            payload.details = last.details.clone();
        }
        payload.summary = match (results.is_empty(), &final_err) {
            (true, Some(_)) => "Failed before executing plan steps.".to_string(),
            (true, None) => "No plan steps were executed.".to_string(),
            (false, Some(_)) => format!(
                "Execution halted during step {}.",
                results.last().map(|o| o.id.as_str()).unwrap_or_default()
            ),
            (false, None) => format!("Executed {} plan step(s).", results.len()),
        };
        if payload.details.is_empty() {
            if let Some(err) = &final_err {
                payload.details = err.clone();
            }
        }
        if self.cancel.is_cancelled() {
            payload.operation_canceled = true;
        }
        if !results.is_empty() {
            payload.plan_observation = Some(results);
        }

        self.append_observation(tool_call_id, payload);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use goagent_config::RuntimeConfig;
    use goagent_model::{MockModel, Role};
    use goagent_plan::{CommandDraft, PlanObservationPayload, PlanStep, StepStatus};

    use crate::testing::ScriptedRunner;

    use super::super::runtime::Runtime;

    fn runtime_with(runner: ScriptedRunner) -> Arc<Runtime> {
        let config = RuntimeConfig {
            history_log_path: String::new(),
            ..Default::default()
        };
        Arc::new(
            Runtime::new(config, Arc::new(MockModel::new(vec![])), Arc::new(runner)).unwrap(),
        )
    }

    fn step(id: &str, deps: &[&str]) -> PlanStep {
        PlanStep {
            waiting_for_id: if deps.is_empty() {
                None
            } else {
                Some(deps.iter().map(|s| s.to_string()).collect())
            },
            title: format!("step {id}"),
            command: CommandDraft {
                shell: "/bin/sh".into(),
                run: format!("echo {id}"),
                ..Default::default()
            },
            ..PlanStep::new(id)
        }
    }

    /// Drain outbound events in the background so bounded-queue emits never
    /// stall the scheduler under test.
    fn drain_outbound(rt: &Runtime) -> tokio::task::JoinHandle<Vec<crate::OutboundEvent>> {
        let mut rx = rt.take_outbound().expect("outbound already taken");
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(ev) = rx.recv().await {
                seen.push(ev);
            }
            seen
        })
    }

    fn last_tool_payload(rt: &Runtime) -> PlanObservationPayload {
        let history = rt.history_snapshot();
        let tool = history
            .iter()
            .rev()
            .find(|m| m.role == Role::Tool)
            .expect("no tool message recorded");
        PlanObservationPayload::decode(&tool.content).expect("tool body must decode")
    }

    #[tokio::test]
    async fn single_step_success_records_completed_observation() {
        let rt = runtime_with(ScriptedRunner::ok_with_stdout("s1", "hi\n"));
        let _drain = drain_outbound(&rt);
        rt.plan.replace(vec![step("s1", &[])]);

        rt.execute_pending_steps("call_1").await;

        let payload = last_tool_payload(&rt);
        assert_eq!(payload.summary, "Executed 1 plan step(s).");
        let obs = payload.plan_observation.unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].id, "s1");
        assert_eq!(obs[0].status, StepStatus::Completed);
        assert_eq!(obs[0].stdout, "hi\n");
        assert_eq!(rt.plan_snapshot()[0].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn dependent_step_runs_after_its_dependency() {
        let runner = ScriptedRunner::default();
        let executed = runner.execution_log();
        let rt = runtime_with(runner);
        let _drain = drain_outbound(&rt);
        rt.plan.replace(vec![step("b", &["a"]), step("a", &[])]);

        rt.execute_pending_steps("call_1").await;

        let order = executed.lock().unwrap().clone();
        assert_eq!(order, ["a", "b"], "b must wait for a");
        assert!(rt.plan.completed());
    }

    #[tokio::test]
    async fn independent_steps_run_in_parallel() {
        // Two slow steps; if they serialized this would take ≥ 2×delay.
        let runner = ScriptedRunner::default().with_delay_ms(300);
        let rt = runtime_with(runner);
        let _drain = drain_outbound(&rt);
        rt.plan.replace(vec![step("a", &[]), step("b", &[])]);

        let started = std::time::Instant::now();
        rt.execute_pending_steps("call_1").await;
        assert!(
            started.elapsed() < std::time::Duration::from_millis(550),
            "independent steps should overlap"
        );
    }

    #[tokio::test]
    async fn failure_halts_downstream_scheduling() {
        let runner = ScriptedRunner::default().with_failure("a", "exit status 1");
        let executed = runner.execution_log();
        let rt = runtime_with(runner);
        let _drain = drain_outbound(&rt);
        // c depends on a, so it only runs if the scheduler keeps going after
        // the failure — it must not.
        rt.plan.replace(vec![step("a", &[]), step("c", &["a"])]);

        rt.execute_pending_steps("call_1").await;

        assert_eq!(executed.lock().unwrap().clone(), ["a"]);
        let payload = last_tool_payload(&rt);
        assert_eq!(payload.summary, "Execution halted during step a.");
        let obs = payload.plan_observation.unwrap();
        assert_eq!(obs[0].status, StepStatus::Failed);
        assert_eq!(obs[0].details, "exit status 1");
        let snap = rt.plan_snapshot();
        let a = snap.iter().find(|s| s.id == "a").unwrap();
        assert_eq!(a.status, StepStatus::Failed);
        let c = snap.iter().find(|s| s.id == "c").unwrap();
        assert_eq!(c.status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn blocked_pending_steps_exit_without_completion_status() {
        let runner = ScriptedRunner::default().with_failure("a", "boom");
        let rt = runtime_with(runner);
        let drain = drain_outbound(&rt);
        rt.plan.replace(vec![step("a", &[]), step("b", &["a"])]);

        rt.execute_pending_steps("call_1").await;
        drop(rt);

        let events = drain.await.unwrap();
        assert!(
            !events.iter().any(|e| e.message == "Plan execution completed."),
            "halted pass must not report completion"
        );
    }

    #[tokio::test]
    async fn consolidated_payload_mirrors_the_last_observation() {
        let runner = ScriptedRunner::default()
            .with_ok_stdout("a", "first\n")
            .with_ok_stdout("b", "second\n");
        let rt = runtime_with(runner);
        let _drain = drain_outbound(&rt);
        rt.plan.replace(vec![step("a", &[]), step("b", &["a"])]);

        rt.execute_pending_steps("call_1").await;

        let payload = last_tool_payload(&rt);
        assert_eq!(payload.summary, "Executed 2 plan step(s).");
        // Top-level buffers are internal-only, but the in-memory payload
        // mirrors the last finisher — which is "b" here because it waits
        // for "a".
        let obs = payload.plan_observation.unwrap();
        assert_eq!(obs.last().unwrap().id, "b");
        assert_eq!(obs.last().unwrap().stdout, "second\n");
    }
}
