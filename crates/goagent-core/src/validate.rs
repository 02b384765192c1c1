// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Plan tool-call validation.
//!
//! Three gates, in order: non-empty arguments, a JSON decode into
//! [`PlanResponse`], and an evaluation against the embedded plan schema.
//! Each failure produces the observation payload the feedback protocol
//! appends as a tool message so the model can correct itself.

use std::time::Duration;

use goagent_model::ToolCall;
use goagent_plan::{schema::plan_schema, PlanObservationPayload, PlanResponse};

/// One failed validation attempt.
#[derive(Debug)]
pub struct ValidationFailure {
    pub summary: String,
    pub details: String,
    pub payload: PlanObservationPayload,
}

impl ValidationFailure {
    fn json(details: impl Into<String>) -> Self {
        let details = details.into();
        let summary = "Plan tool call arguments could not be parsed.".to_string();
        Self {
            payload: PlanObservationPayload {
                summary: summary.clone(),
                details: details.clone(),
                json_parse_error: true,
                response_validation_error: true,
                ..Default::default()
            },
            summary,
            details,
        }
    }

    fn schema(details: impl Into<String>) -> Self {
        let details = details.into();
        let summary = "Plan tool call arguments failed schema validation.".to_string();
        Self {
            payload: PlanObservationPayload {
                summary: summary.clone(),
                details: details.clone(),
                schema_validation_error: true,
                response_validation_error: true,
                ..Default::default()
            },
            summary,
            details,
        }
    }
}

/// Validator holding the compiled plan schema.
pub struct PlanValidator {
    compiled: jsonschema::Validator,
}

impl PlanValidator {
    /// Compile the embedded schema.  A compile failure is a fatal runtime
    /// error, not a validation failure.
    pub fn new() -> anyhow::Result<Self> {
        let compiled = jsonschema::validator_for(plan_schema())
            .map_err(|e| anyhow::anyhow!("plan schema failed to compile: {e}"))?;
        Ok(Self { compiled })
    }

    /// Parse and schema-check one tool call.
    pub fn validate(&self, call: &ToolCall) -> Result<PlanResponse, ValidationFailure> {
        let raw = call.arguments.trim();
        if raw.is_empty() {
            return Err(ValidationFailure::json("tool arguments were empty"));
        }

        let response: PlanResponse =
            serde_json::from_str(raw).map_err(|e| ValidationFailure::json(e.to_string()))?;

        let instance: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ValidationFailure::json(e.to_string()))?;
        let issues: Vec<String> = self
            .compiled
            .iter_errors(&instance)
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{path}: {err}")
                }
            })
            .collect();
        if !issues.is_empty() {
            return Err(ValidationFailure::schema(issues.join("; ")));
        }

        Ok(response)
    }
}

/// Backoff before validation retry `attempt` (1-based):
/// `min(2^(attempt-1) × 250 ms, 4 s)`, never below 250 ms.
pub fn validation_backoff(attempt: u32) -> Duration {
    let base = Duration::from_millis(250);
    let max = Duration::from_secs(4);
    let exp = attempt.saturating_sub(1).min(16);
    let delay = base * 2u32.pow(exp);
    delay.clamp(base, max)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(arguments: &str) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "update_plan".into(),
            arguments: arguments.into(),
        }
    }

    fn valid_arguments() -> String {
        serde_json::json!({
            "message": "run it",
            "require_human_input": false,
            "plan": [{
                "id": "s1",
                "title": "list files",
                "command": { "shell": "/bin/sh", "run": "ls" }
            }]
        })
        .to_string()
    }

    #[test]
    fn valid_arguments_decode() {
        let v = PlanValidator::new().unwrap();
        let plan = v.validate(&call(&valid_arguments())).unwrap();
        assert_eq!(plan.plan.len(), 1);
        assert_eq!(plan.plan[0].id, "s1");
    }

    #[test]
    fn empty_arguments_are_a_json_error() {
        let v = PlanValidator::new().unwrap();
        let err = v.validate(&call("   ")).unwrap_err();
        assert!(err.payload.json_parse_error);
        assert!(err.payload.response_validation_error);
        assert_eq!(err.details, "tool arguments were empty");
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let v = PlanValidator::new().unwrap();
        let err = v.validate(&call("{")).unwrap_err();
        assert!(err.payload.json_parse_error);
        assert!(!err.payload.schema_validation_error);
        assert!(!err.details.is_empty());
    }

    #[test]
    fn missing_required_field_is_a_schema_error() {
        let v = PlanValidator::new().unwrap();
        // Decodes fine (serde defaults) but violates the schema's `required`.
        let err = v.validate(&call(r#"{"message": "hi"}"#)).unwrap_err();
        assert!(err.payload.schema_validation_error);
        assert!(!err.payload.json_parse_error);
        assert!(err.details.contains("required") || err.details.contains("plan"));
    }

    #[test]
    fn unknown_top_level_field_is_a_schema_error() {
        let v = PlanValidator::new().unwrap();
        let mut obj: serde_json::Value = serde_json::from_str(&valid_arguments()).unwrap();
        obj["surprise"] = serde_json::json!(true);
        let err = v.validate(&call(&obj.to_string())).unwrap_err();
        assert!(err.payload.schema_validation_error);
    }

    #[test]
    fn schema_errors_join_all_issues() {
        let v = PlanValidator::new().unwrap();
        // Decodes via serde defaults, but violates the schema twice over:
        // missing require_human_input and a step without title/shell.
        let err = v
            .validate(&call(
                r#"{"message": "x", "plan": [{"id": "s", "command": {"run": "ls"}}]}"#,
            ))
            .unwrap_err();
        // Multiple independent violations show up joined with "; ".
        assert!(err.details.contains(';'), "expected joined issues: {}", err.details);
    }

    #[test]
    fn backoff_doubles_from_250ms_and_caps_at_4s() {
        assert_eq!(validation_backoff(1), Duration::from_millis(250));
        assert_eq!(validation_backoff(2), Duration::from_millis(500));
        assert_eq!(validation_backoff(3), Duration::from_millis(1000));
        assert_eq!(validation_backoff(4), Duration::from_millis(2000));
        assert_eq!(validation_backoff(5), Duration::from_millis(4000));
        assert_eq!(validation_backoff(6), Duration::from_millis(4000));
        assert_eq!(validation_backoff(12), Duration::from_millis(4000));
    }

    #[test]
    fn backoff_never_drops_below_250ms() {
        assert_eq!(validation_backoff(0), Duration::from_millis(250));
    }
}
