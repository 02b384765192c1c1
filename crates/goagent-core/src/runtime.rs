// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use goagent_config::RuntimeConfig;
use goagent_exec::{ApplyPatchCommand, CommandRunner, ShellExecutor};
use goagent_model::{
    ChatMessage, ModelEvent, PlanModel, PlanRequest, ToolCall, ToolSpec,
};
use goagent_plan::{
    schema::{plan_schema, PLAN_TOOL_DESCRIPTION, PLAN_TOOL_NAME},
    PlanManager, PlanObservationPayload, PlanResponse, PlanStep, StepStatus,
};

use crate::compact;
use crate::events::{InboundEvent, OutboundEvent};
use crate::history::HistoryStore;
use crate::prompts::SYSTEM_PROMPT;
use crate::research::ResearchCommand;
use crate::validate::{validation_backoff, PlanValidator, ValidationFailure};
use crate::ContextBudget;

const INBOUND_QUEUE: usize = 4;
const OUTBOUND_QUEUE: usize = 16;

/// Status substring by which `run_research` recognizes a finished hands-free
/// session.  Kept stable for compatibility with existing consumers.
pub const HANDS_FREE_COMPLETE: &str = "Hands-free session complete";

/// The single tool offered with every plan request.
pub fn plan_tool_spec() -> ToolSpec {
    ToolSpec {
        name: PLAN_TOOL_NAME.to_string(),
        description: PLAN_TOOL_DESCRIPTION.to_string(),
        parameters: plan_schema().clone(),
    }
}

/// How one prompt session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassOutcome {
    /// The model asked for operator input; a RequestInput was emitted.
    AwaitingInput,
    /// The plan ran out of executable steps.
    Complete,
    /// A pass-fatal error was emitted.
    Fatal,
}

/// The runtime orchestrator.
///
/// Owns the history, the plan manager, and both event queues; drives the
/// plan-execution loop for each accepted prompt.
pub struct Runtime {
    pub(crate) config: RuntimeConfig,
    model: Arc<dyn PlanModel>,
    pub(crate) runner: Arc<dyn CommandRunner>,
    pub(crate) history: HistoryStore,
    pub(crate) plan: PlanManager,
    validator: PlanValidator,
    inbound_tx: mpsc::Sender<InboundEvent>,
    inbound_rx: StdMutex<Option<mpsc::Receiver<InboundEvent>>>,
    outbound_tx: mpsc::Sender<OutboundEvent>,
    outbound_rx: StdMutex<Option<mpsc::Receiver<OutboundEvent>>>,
    /// At most one prompt is processed end-to-end at a time.
    work: tokio::sync::Mutex<()>,
    /// At most one pass executes commands at a time.
    pub(crate) command_lock: tokio::sync::Mutex<()>,
    pub(crate) cancel: CancellationToken,
    closed: AtomicBool,
    pub(crate) dropped_events: AtomicU64,
}

impl Runtime {
    /// Build a runtime around an explicit model and command runner.
    pub fn new(
        config: RuntimeConfig,
        model: Arc<dyn PlanModel>,
        runner: Arc<dyn CommandRunner>,
    ) -> anyhow::Result<Self> {
        let validator = PlanValidator::new()?;
        let budget = ContextBudget::for_model(&config.model);
        let history = HistoryStore::new(SYSTEM_PROMPT, budget, config.amnesia_after_passes);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        Ok(Self {
            config,
            model,
            runner,
            history,
            plan: PlanManager::new(),
            validator,
            inbound_tx,
            inbound_rx: StdMutex::new(Some(inbound_rx)),
            outbound_tx,
            outbound_rx: StdMutex::new(Some(outbound_rx)),
            work: tokio::sync::Mutex::new(()),
            command_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            dropped_events: AtomicU64::new(0),
        })
    }

    /// Build a runtime with the standard executor and the built-in internal
    /// commands (`apply_patch`, `run_research`) registered.
    pub fn with_default_commands(
        config: RuntimeConfig,
        model: Arc<dyn PlanModel>,
    ) -> anyhow::Result<Self> {
        let mut executor = ShellExecutor::new();
        executor.register_internal(ApplyPatchCommand);
        executor.register_internal(ResearchCommand::new(config.clone(), model.clone()));
        Self::new(config, model, Arc::new(executor))
    }

    // ── Handles ──────────────────────────────────────────────────────────────

    /// Sender for feeding inbound events.
    pub fn inbound(&self) -> mpsc::Sender<InboundEvent> {
        self.inbound_tx.clone()
    }

    /// Take the outbound receiver.  Yields `Some` exactly once.
    pub fn take_outbound(&self) -> Option<mpsc::Receiver<OutboundEvent>> {
        self.outbound_rx.lock().expect("outbound slot poisoned").take()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Outbound events dropped because the queue stayed blocked past the
    /// configured emit timeout.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::SeqCst)
    }

    pub fn pass(&self) -> u64 {
        self.history.pass()
    }

    pub fn history_snapshot(&self) -> Vec<ChatMessage> {
        self.history.snapshot()
    }

    pub fn plan_snapshot(&self) -> Vec<PlanStep> {
        self.plan.snapshot()
    }

    // ── Event loop ───────────────────────────────────────────────────────────

    /// Run the event loop until shutdown, cancellation, or channel close.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut inbound = self
            .inbound_rx
            .lock()
            .expect("inbound slot poisoned")
            .take()
            .ok_or_else(|| anyhow::anyhow!("runtime is already running"))?;

        self.emit(OutboundEvent::status("Agent runtime started")).await;
        if self.config.hands_free {
            let topic = self.config.hands_free_topic.clone();
            let _ = self.inbound_tx.try_send(InboundEvent::Prompt(topic));
        } else {
            self.emit(OutboundEvent::request_input("Enter a prompt to begin."))
                .await;
        }

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => None,
                event = inbound.recv() => event,
            };
            let Some(event) = event else { break };
            match event {
                InboundEvent::Prompt(text) => self.handle_prompt(text).await,
                InboundEvent::Cancel => {
                    self.emit(OutboundEvent::status_warn(
                        "Cancel requested; the in-flight pass is not interrupted.",
                    ))
                    .await;
                    self.request_input("Enter a prompt to continue.").await;
                }
                InboundEvent::Shutdown { reason } => {
                    self.emit(OutboundEvent::status(format!("Shutting down: {reason}")))
                        .await;
                    break;
                }
            }
        }

        self.close();
        Ok(())
    }

    async fn handle_prompt(&self, prompt: String) {
        let prompt = prompt.trim().to_string();
        if prompt.is_empty() {
            self.emit(OutboundEvent::status_warn("Ignoring empty prompt."))
                .await;
            self.request_input("Enter a prompt to begin.").await;
            return;
        }

        // Reject overlapping prompts instead of queueing them silently.
        let Ok(_work) = self.work.try_lock() else {
            self.emit(OutboundEvent::status_warn(
                "Already processing a prompt; ignoring the new one.",
            ))
            .await;
            return;
        };

        self.history.reset_pass();
        self.history.append(ChatMessage::user(&prompt));

        let outcome = self.plan_execution_loop().await;

        if self.is_closed() {
            return;
        }
        match outcome {
            PassOutcome::AwaitingInput => {}
            PassOutcome::Complete | PassOutcome::Fatal => {
                if self.config.hands_free {
                    // A hands-free session that cannot continue must close so
                    // embedding hosts (run_research) see the queue drain.
                    if outcome == PassOutcome::Fatal {
                        self.close();
                    }
                } else {
                    self.request_input("Enter a prompt to continue.").await;
                }
            }
        }
    }

    // ── Plan execution loop ──────────────────────────────────────────────────

    async fn plan_execution_loop(&self) -> PassOutcome {
        loop {
            let pass = self.history.increment_pass();
            if self.config.max_passes > 0 && pass > self.config.max_passes {
                self.emit(OutboundEvent::error(format!(
                    "Reached the maximum of {} passes.",
                    self.config.max_passes
                )))
                .await;
                if self.config.hands_free {
                    self.close();
                }
                return PassOutcome::Fatal;
            }

            let (call, response) = match self.request_validated_plan().await {
                Ok(Some(pair)) => pair,
                Ok(None) => {
                    self.emit(OutboundEvent::error("Received nil plan response"))
                        .await;
                    return PassOutcome::Fatal;
                }
                Err(e) => {
                    self.emit(OutboundEvent::error(format!("Plan request failed: {e}")))
                        .await;
                    return PassOutcome::Fatal;
                }
            };

            let steps = prune_completed(&response);
            self.history
                .append(ChatMessage::assistant_with_tool_call("", call.clone()));
            self.plan.replace(steps.clone());

            self.emit(OutboundEvent::status(format!(
                "Received plan with {} step(s).",
                steps.len()
            )))
            .await;
            let mut message_event = OutboundEvent::assistant_message(&response.message)
                .with_metadata("plan", serde_json::to_value(&steps).unwrap_or_default())
                .with_metadata("tool_call_id", json!(call.id))
                .with_metadata("tool_name", json!(call.name))
                .with_metadata("require_human_input", json!(response.require_human_input));
            let reasoning: Vec<String> = response
                .reasoning
                .iter()
                .flatten()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect();
            if !reasoning.is_empty() {
                message_event = message_event.with_metadata("reasoning", json!(reasoning));
            }
            self.emit(message_event).await;

            if response.require_human_input {
                self.append_observation(
                    &call.id,
                    PlanObservationPayload::with_summary(
                        "Assistant requested additional input before continuing the plan.",
                    ),
                );
                self.request_input("The assistant requested additional input.")
                    .await;
                return PassOutcome::AwaitingInput;
            }

            if self.plan.executable_count() == 0 {
                self.append_observation(
                    &call.id,
                    PlanObservationPayload::with_summary(
                        "Assistant returned a plan without executable steps.",
                    ),
                );
                self.emit(OutboundEvent::status(
                    "Assistant returned a plan without executable steps.",
                ))
                .await;
                if self.config.hands_free {
                    self.emit(OutboundEvent::status(format!(
                        "{HANDS_FREE_COMPLETE}: {}",
                        response.message.trim()
                    )))
                    .await;
                    self.close();
                }
                return PassOutcome::Complete;
            }

            self.execute_pending_steps(&call.id).await;
        }
    }

    /// Request a plan, retrying through the validation feedback protocol
    /// until the model produces schema-valid arguments.
    async fn request_validated_plan(
        &self,
    ) -> anyhow::Result<Option<(ToolCall, PlanResponse)>> {
        let mut attempt: u32 = 0;
        loop {
            let snapshot = self.history.planning_snapshot();
            self.persist_history(&snapshot);

            let request = PlanRequest {
                messages: snapshot,
                tool: plan_tool_spec(),
            };
            let (events_tx, mut events_rx) = mpsc::channel::<ModelEvent>(32);
            let request_fut = self.model.request_plan(request, events_tx);
            let forward_fut = async {
                while let Some(event) = events_rx.recv().await {
                    let text = match event {
                        ModelEvent::TextDelta(text) => text,
                        ModelEvent::ReasoningLine(line) => line,
                    };
                    self.emit(OutboundEvent::assistant_delta(text)).await;
                }
            };
            let (result, ()) = tokio::join!(request_fut, forward_fut);

            attempt += 1;
            let Some(mut call) = result? else {
                return Ok(None);
            };
            if call.id.is_empty() {
                // Some servers omit call ids; a synthetic one keeps the
                // assistant/tool correlation intact.
                call.id = format!("call_{}", Uuid::new_v4().simple());
            }

            match self.validator.validate(&call) {
                Ok(response) => return Ok(Some((call, response))),
                Err(failure) => {
                    self.apply_validation_feedback(&call, &failure, attempt)
                        .await;
                }
            }
        }
    }

    /// The feedback protocol: warn, append the failed assistant turn, the
    /// error observation, and a synthetic user correction, then back off.
    async fn apply_validation_feedback(
        &self,
        call: &ToolCall,
        failure: &ValidationFailure,
        attempt: u32,
    ) {
        warn!(attempt, summary = %failure.summary, "plan validation failed");
        self.emit(
            OutboundEvent::status_warn(&failure.summary)
                .with_metadata("details", json!(failure.details)),
        )
        .await;

        self.history
            .append(ChatMessage::assistant_with_tool_call("", call.clone()));
        if !call.id.is_empty() {
            let mut payload = failure.payload.clone();
            payload.enforce_cap();
            self.history
                .append(ChatMessage::tool(&call.id, payload.encode()));
        }
        let details = compact::truncate_chars(&failure.details, 512);
        self.history.append(ChatMessage::user(format!(
            "{}\n{}\nPlease call {PLAN_TOOL_NAME} again with JSON that strictly matches the provided schema.",
            failure.summary, details,
        )));

        tokio::time::sleep(validation_backoff(attempt)).await;
    }

    // ── Plumbing ─────────────────────────────────────────────────────────────

    /// Append a tool message carrying `payload`, capped, correlated to
    /// `call_id`.
    pub(crate) fn append_observation(&self, call_id: &str, mut payload: PlanObservationPayload) {
        payload.enforce_cap();
        if call_id.is_empty() {
            return;
        }
        self.history
            .append(ChatMessage::tool(call_id, payload.encode()));
    }

    /// Emit one outbound event, stamping pass and agent.  When an emit
    /// timeout is configured, a blocked queue drops the event with a warning
    /// instead of stalling the runtime.
    pub(crate) async fn emit(&self, mut event: OutboundEvent) {
        event.pass = self.history.pass();
        event.agent = self.config.agent_name.clone();
        if self.config.emit_timeout_ms > 0 {
            let timeout = Duration::from_millis(self.config.emit_timeout_ms);
            match self.outbound_tx.send_timeout(event, timeout).await {
                Err(SendTimeoutError::Timeout(event)) => {
                    self.dropped_events.fetch_add(1, Ordering::SeqCst);
                    warn!(kind = ?event.kind, "outbound queue blocked; event dropped");
                }
                _ => {}
            }
        } else {
            let _ = self.outbound_tx.send(event).await;
        }
    }

    /// Emit a RequestInput; hands-free runtimes answer themselves with the
    /// configured auto-reply.
    async fn request_input(&self, message: &str) {
        self.emit(OutboundEvent::request_input(message)).await;
        if self.config.hands_free && !self.config.hands_free_auto_reply.is_empty() {
            let reply = self.config.hands_free_auto_reply.clone();
            let tx = self.inbound_tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(InboundEvent::Prompt(reply)).await;
            });
        }
    }

    /// Overwrite the history log with the snapshot about to be sent.
    /// Best-effort: persistence problems are logged, never fatal.
    fn persist_history(&self, snapshot: &[ChatMessage]) {
        let path = &self.config.history_log_path;
        if path.is_empty() {
            return;
        }
        match serde_json::to_string_pretty(snapshot) {
            Ok(body) => {
                if let Err(e) = std::fs::write(path, body) {
                    warn!(path = %path, error = %e, "could not persist history log");
                }
            }
            Err(e) => warn!(error = %e, "could not serialize history log"),
        }
    }

    /// Idempotent shutdown: cancels every derived context exactly once.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(agent = %self.config.agent_name, "closing runtime");
        self.cancel.cancel();
    }
}

/// Drop completed steps and rewrite `waiting_for_id` lists so they no longer
/// reference the pruned ids (`None` when emptied).
fn prune_completed(response: &PlanResponse) -> Vec<PlanStep> {
    let completed: HashSet<&str> = response
        .plan
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .map(|s| s.id.as_str())
        .collect();
    let mut steps: Vec<PlanStep> = response
        .plan
        .iter()
        .filter(|s| s.status != StepStatus::Completed)
        .cloned()
        .collect();
    for step in &mut steps {
        if let Some(deps) = step.waiting_for_id.take() {
            let kept: Vec<String> = deps
                .into_iter()
                .filter(|dep| !completed.contains(dep.as_str()))
                .collect();
            if !kept.is_empty() {
                step.waiting_for_id = Some(kept);
            }
        }
    }
    steps
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
