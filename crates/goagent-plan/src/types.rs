use serde::{Deserialize, Serialize};

use crate::observation::StepObservation;

/// Shell value that routes a step to the internal command registry instead of
/// spawning a subprocess.  Matched case-insensitively after trimming.
pub const INTERNAL_SHELL: &str = "openagent";

/// Lifecycle state of one plan step.
///
/// `Abandoned` is reserved for operator use; the scheduler never assigns it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Abandoned,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "Pending",
            StepStatus::Completed => "Completed",
            StepStatus::Failed => "Failed",
            StepStatus::Abandoned => "Abandoned",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The command the model wants a step to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandDraft {
    /// Why the model scheduled this command (display only).
    pub reason: String,
    /// Shell invocation (e.g. `/bin/sh` or `bash -c`), or [`INTERNAL_SHELL`].
    pub shell: String,
    /// The command line handed to the shell (or the internal command).
    pub run: String,
    /// Working directory; empty inherits the runtime's cwd.
    pub cwd: String,
    /// Subprocess timeout in seconds; zero or negative means the 60 s default.
    pub timeout_sec: i64,
    /// When non-empty and valid, only output lines matching this regex are kept.
    pub filter_regex: String,
    /// When positive, keep only the last N output lines.
    pub tail_lines: usize,
    /// When positive, keep only the last N output bytes.
    pub max_bytes: usize,
}

impl CommandDraft {
    /// True when the step dispatches to the internal command registry.
    pub fn is_internal(&self) -> bool {
        self.shell.trim().eq_ignore_ascii_case(INTERNAL_SHELL)
    }
}

/// One step of the current plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: StepStatus,
    /// Ids of steps that must be `Completed` first.  Ids not present in the
    /// plan never block.  `None` after pruning leaves a step unblocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for_id: Option<Vec<String>>,
    #[serde(default)]
    pub command: CommandDraft,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<StepObservation>,
    /// Transient scheduling flag owned by the plan manager.
    #[serde(skip)]
    pub executing: bool,
}

impl PlanStep {
    /// A pending step with the given id (tests and pruning helpers).
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            status: StepStatus::Pending,
            waiting_for_id: None,
            command: CommandDraft::default(),
            observation: None,
            executing: false,
        }
    }

    /// Dependency ids, empty when unset.
    pub fn dependencies(&self) -> &[String] {
        self.waiting_for_id.as_deref().unwrap_or(&[])
    }
}

/// The arguments object of the plan tool call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Vec<String>>,
    #[serde(default)]
    pub plan: Vec<PlanStep>,
    #[serde(default)]
    pub require_human_input: bool,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_shell_matches_case_insensitively() {
        let mut cmd = CommandDraft {
            shell: "OpenAgent".into(),
            ..Default::default()
        };
        assert!(cmd.is_internal());
        cmd.shell = "  openagent  ".into();
        assert!(cmd.is_internal());
        cmd.shell = "/bin/sh".into();
        assert!(!cmd.is_internal());
    }

    #[test]
    fn status_serializes_as_capitalized_variant() {
        assert_eq!(
            serde_json::to_string(&StepStatus::Completed).unwrap(),
            "\"Completed\""
        );
        let s: StepStatus = serde_json::from_str("\"Failed\"").unwrap();
        assert_eq!(s, StepStatus::Failed);
    }

    #[test]
    fn step_defaults_to_pending() {
        let step: PlanStep = serde_json::from_str(r#"{"id": "s1"}"#).unwrap();
        assert_eq!(step.status, StepStatus::Pending);
        assert!(!step.executing);
        assert!(step.dependencies().is_empty());
    }

    #[test]
    fn executing_flag_is_not_serialized() {
        let mut step = PlanStep::new("s1");
        step.executing = true;
        let json = serde_json::to_string(&step).unwrap();
        assert!(!json.contains("executing"));
    }

    #[test]
    fn plan_response_decodes_minimal_object() {
        let resp: PlanResponse =
            serde_json::from_str(r#"{"message": "done", "plan": []}"#).unwrap();
        assert_eq!(resp.message, "done");
        assert!(resp.plan.is_empty());
        assert!(!resp.require_human_input);
        assert!(resp.reasoning.is_none());
    }

    #[test]
    fn plan_response_round_trips() {
        let resp = PlanResponse {
            message: "run tests".into(),
            reasoning: Some(vec!["check".into()]),
            plan: vec![PlanStep {
                waiting_for_id: Some(vec!["a".into()]),
                ..PlanStep::new("b")
            }],
            require_human_input: true,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: PlanResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message, "run tests");
        assert_eq!(back.plan[0].dependencies(), ["a"]);
        assert!(back.require_human_input);
    }
}
