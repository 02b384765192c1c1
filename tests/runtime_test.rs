// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end runtime tests driven through the public event queues, with the
//! model and the executor both scripted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use goagent_config::RuntimeConfig;
use goagent_core::testing::ScriptedRunner;
use goagent_core::{InboundEvent, OutboundEvent, OutboundKind, Runtime};
use goagent_model::{MockModel, MockTurn, Role};
use goagent_plan::PlanObservationPayload;

const WAIT: Duration = Duration::from_secs(10);

fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        history_log_path: String::new(),
        ..Default::default()
    }
}

struct Harness {
    runtime: Arc<Runtime>,
    inbound: mpsc::Sender<InboundEvent>,
    outbound: mpsc::Receiver<OutboundEvent>,
    driver: tokio::task::JoinHandle<anyhow::Result<()>>,
    seen: Vec<OutboundEvent>,
}

impl Harness {
    fn start(config: RuntimeConfig, model: Arc<MockModel>, runner: ScriptedRunner) -> Self {
        let runtime =
            Arc::new(Runtime::new(config, model, Arc::new(runner)).expect("runtime builds"));
        let inbound = runtime.inbound();
        let outbound = runtime.take_outbound().expect("first take");
        let driver = tokio::spawn({
            let runtime = runtime.clone();
            async move { runtime.run().await }
        });
        Self {
            runtime,
            inbound,
            outbound,
            driver,
            seen: Vec::new(),
        }
    }

    /// Collect outbound events until `pred` matches one; panics on timeout.
    async fn wait_for(&mut self, pred: impl Fn(&OutboundEvent) -> bool) -> OutboundEvent {
        timeout(WAIT, async {
            loop {
                let event = self.outbound.recv().await.expect("outbound closed early");
                self.seen.push(event.clone());
                if pred(self.seen.last().expect("just pushed")) {
                    return self.seen.last().cloned().expect("just pushed");
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn shutdown(mut self) -> (Arc<Runtime>, Vec<OutboundEvent>) {
        let _ = self
            .inbound
            .send(InboundEvent::Shutdown {
                reason: "test over".to_string(),
            })
            .await;
        let _ = timeout(WAIT, self.driver).await.expect("driver hung");
        while let Ok(event) = self.outbound.try_recv() {
            self.seen.push(event);
        }
        (self.runtime, self.seen)
    }
}

fn is_request_input(event: &OutboundEvent) -> bool {
    event.kind == OutboundKind::RequestInput
}

// ─── Scenario: empty prompt ───────────────────────────────────────────────────

#[tokio::test]
async fn empty_prompt_is_ignored_without_touching_history() {
    let mut h = Harness::start(
        test_config(),
        Arc::new(MockModel::new(vec![])),
        ScriptedRunner::default(),
    );
    // Startup: status + initial input request.
    h.wait_for(is_request_input).await;

    h.inbound
        .send(InboundEvent::Prompt("   ".to_string()))
        .await
        .unwrap();
    let warn = h
        .wait_for(|e| e.kind == OutboundKind::Status && e.message == "Ignoring empty prompt.")
        .await;
    assert_eq!(warn.pass, 0);
    h.wait_for(is_request_input).await;

    let (runtime, _events) = h.shutdown().await;
    assert_eq!(runtime.history_snapshot().len(), 1, "system prompt only");
    assert_eq!(runtime.pass(), 0);
}

// ─── Scenario: single-step success and next-pass pruning ──────────────────────

fn single_step_plan(status: Option<&str>) -> String {
    let status_field = status
        .map(|s| format!("\"status\": \"{s}\", "))
        .unwrap_or_default();
    format!(
        "{{\"message\": \"working on it\", \"require_human_input\": false, \
         \"plan\": [{{\"id\": \"s1\", \"title\": \"say hi\", {status_field}\
         \"command\": {{\"shell\": \"/bin/sh\", \"run\": \"echo hi\"}}}}]}}"
    )
}

#[tokio::test]
async fn single_step_success_records_observation_and_prunes() {
    let first_pass = single_step_plan(None);
    let second_pass = single_step_plan(Some("Completed"));
    let model = Arc::new(MockModel::with_plans(vec![
        first_pass.as_str(),
        second_pass.as_str(),
    ]));
    let runner = ScriptedRunner::ok_with_stdout("s1", "hi\n");
    let mut h = Harness::start(test_config(), model.clone(), runner);

    h.wait_for(is_request_input).await;
    h.inbound
        .send(InboundEvent::Prompt("say hi".to_string()))
        .await
        .unwrap();
    // The second pass prunes the completed step, leaving nothing executable.
    h.wait_for(|e| {
        e.kind == OutboundKind::Status
            && e.message == "Assistant returned a plan without executable steps."
    })
    .await;
    h.wait_for(is_request_input).await;

    let (runtime, events) = h.shutdown().await;
    assert_eq!(model.requests_seen(), 2);

    let history = runtime.history_snapshot();
    // system, user, assistant+call, tool, assistant+call, tool
    assert_eq!(history[0].role, Role::System);
    let tool_messages: Vec<_> = history.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(tool_messages.len(), 2);

    let first = PlanObservationPayload::decode(&tool_messages[0].content).unwrap();
    assert_eq!(first.summary, "Executed 1 plan step(s).");
    let observations = first.plan_observation.unwrap();
    assert_eq!(observations[0].id, "s1");
    assert_eq!(observations[0].status, goagent_plan::StepStatus::Completed);
    assert_eq!(observations[0].stdout, "hi\n");

    // Every tool message correlates to a preceding assistant tool call.
    for (idx, tool) in history.iter().enumerate() {
        if tool.role != Role::Tool {
            continue;
        }
        let id = tool.tool_call_id.as_deref().unwrap();
        assert!(
            history[..idx]
                .iter()
                .any(|m| m.tool_calls.iter().any(|tc| tc.id == id)),
            "tool message without declaring assistant"
        );
    }

    // Second pass replaced the plan with the pruned (empty) one.
    assert!(runtime.plan_snapshot().is_empty());
    assert!(events
        .iter()
        .any(|e| e.kind == OutboundKind::Status && e.message == "Plan execution completed."));
}

// ─── Scenario: validation retry with backoff ─────────────────────────────────

#[tokio::test]
async fn invalid_arguments_trigger_feedback_and_retry() {
    let model = Arc::new(MockModel::new(vec![
        MockTurn::plan("{"),
        MockTurn::plan("{"),
        MockTurn::plan(r#"{"message": "ok", "plan": [], "require_human_input": false}"#),
    ]));
    let mut h = Harness::start(test_config(), model.clone(), ScriptedRunner::default());

    h.wait_for(is_request_input).await;
    let started = std::time::Instant::now();
    h.inbound
        .send(InboundEvent::Prompt("try".to_string()))
        .await
        .unwrap();
    h.wait_for(|e| {
        e.kind == OutboundKind::Status
            && e.message == "Assistant returned a plan without executable steps."
    })
    .await;
    let elapsed = started.elapsed();

    let (runtime, events) = h.shutdown().await;
    assert_eq!(model.requests_seen(), 3);
    // 250 ms + 500 ms validation backoffs must have elapsed.
    assert!(
        elapsed >= Duration::from_millis(700),
        "expected two backoffs, got {elapsed:?}"
    );

    let history = runtime.history_snapshot();
    let feedback_users: Vec<_> = history
        .iter()
        .filter(|m| m.role == Role::User && m.content.contains("call update_plan again"))
        .collect();
    assert_eq!(feedback_users.len(), 2);
    let error_tools: Vec<_> = history
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter(|m| {
            PlanObservationPayload::decode(&m.content)
                .map(|p| p.json_parse_error && p.response_validation_error)
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(error_tools.len(), 2);
    assert_eq!(
        events
            .iter()
            .filter(|e| e.kind == OutboundKind::Status
                && e.message == "Plan tool call arguments could not be parsed.")
            .count(),
        2
    );
}

// ─── Scenario: require_human_input pauses the session ────────────────────────

#[tokio::test]
async fn require_human_input_emits_request_and_records_observation() {
    let model = Arc::new(MockModel::with_plans(vec![
        r#"{"message": "need a decision", "plan": [], "require_human_input": true}"#,
    ]));
    let mut h = Harness::start(test_config(), model, ScriptedRunner::default());

    h.wait_for(is_request_input).await;
    h.inbound
        .send(InboundEvent::Prompt("decide".to_string()))
        .await
        .unwrap();
    h.wait_for(|e| {
        e.kind == OutboundKind::RequestInput
            && e.message == "The assistant requested additional input."
    })
    .await;

    let (runtime, _events) = h.shutdown().await;
    let history = runtime.history_snapshot();
    let tool = history.iter().find(|m| m.role == Role::Tool).unwrap();
    let payload = PlanObservationPayload::decode(&tool.content).unwrap();
    assert_eq!(
        payload.summary,
        "Assistant requested additional input before continuing the plan."
    );
}

// ─── Scenario: hands-free completion ─────────────────────────────────────────

#[tokio::test]
async fn hands_free_session_completes_and_closes() {
    let config = RuntimeConfig {
        hands_free: true,
        hands_free_topic: "sum it up".to_string(),
        max_passes: 5,
        ..test_config()
    };
    let model = Arc::new(MockModel::with_plans(vec![
        r#"{"message": "all wrapped up", "plan": [], "require_human_input": false}"#,
    ]));
    let runtime = Arc::new(
        Runtime::new(config, model, Arc::new(ScriptedRunner::default())).unwrap(),
    );
    let mut outbound = runtime.take_outbound().unwrap();
    let driver = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.run().await }
    });

    let mut complete_status = None;
    while let Ok(Some(event)) = timeout(WAIT, outbound.recv()).await {
        if event.kind == OutboundKind::Status
            && event.message.contains("Hands-free session complete")
        {
            complete_status = Some(event);
            break;
        }
    }
    let complete = complete_status.expect("no completion status");
    assert!(complete.message.contains("all wrapped up"));

    timeout(WAIT, driver)
        .await
        .expect("runtime did not stop")
        .unwrap()
        .unwrap();
    assert!(runtime.is_closed());
}

// ─── Scenario: cancel warns without aborting ─────────────────────────────────

#[tokio::test]
async fn cancel_event_warns_and_rerequests_input() {
    let mut h = Harness::start(
        test_config(),
        Arc::new(MockModel::new(vec![])),
        ScriptedRunner::default(),
    );
    h.wait_for(is_request_input).await;
    h.inbound.send(InboundEvent::Cancel).await.unwrap();
    let warn = h
        .wait_for(|e| e.kind == OutboundKind::Status && e.message.contains("Cancel requested"))
        .await;
    assert_eq!(warn.level, goagent_core::Level::Warn);
    h.wait_for(is_request_input).await;
    h.shutdown().await;
}

// ─── Shutdown is idempotent ──────────────────────────────────────────────────

#[tokio::test]
async fn repeated_shutdown_closes_exactly_once() {
    let h = Harness::start(
        test_config(),
        Arc::new(MockModel::new(vec![])),
        ScriptedRunner::default(),
    );
    let inbound = h.inbound.clone();
    let _ = inbound
        .send(InboundEvent::Shutdown {
            reason: "first".to_string(),
        })
        .await;
    // Late duplicates must be harmless whether or not the queue still exists.
    let _ = inbound
        .send(InboundEvent::Shutdown {
            reason: "second".to_string(),
        })
        .await;
    let (runtime, _events) = h.shutdown().await;
    assert!(runtime.is_closed());
}
