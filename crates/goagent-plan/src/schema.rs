// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The JSON schema of the plan tool.
//!
//! The schema mirrors [`crate::PlanResponse`] exactly; the validator checks
//! every tool call against it before the plan reaches the manager.

use std::sync::OnceLock;

use serde_json::{json, Value};

/// Name of the forced function tool.
pub const PLAN_TOOL_NAME: &str = "update_plan";

/// Tool description sent with every request.
pub const PLAN_TOOL_DESCRIPTION: &str = "Submit the full plan for this task. Re-emit every step that is \
     not yet completed, set require_human_input when you need the operator, \
     and return an empty plan when the task is finished.";

/// The parameters schema for the plan tool.
pub fn plan_schema() -> &'static Value {
    static SCHEMA: OnceLock<Value> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["message", "plan", "require_human_input"],
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Short status message shown to the operator."
                },
                "reasoning": {
                    "type": ["array", "null"],
                    "items": { "type": "string" },
                    "description": "Optional reasoning notes, one per line."
                },
                "require_human_input": {
                    "type": "boolean",
                    "description": "Set when the operator must answer before the plan can continue."
                },
                "plan": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["id", "title", "command"],
                        "properties": {
                            "id": { "type": "string" },
                            "title": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["Pending", "Completed", "Failed", "Abandoned"]
                            },
                            "waiting_for_id": {
                                "type": ["array", "null"],
                                "items": { "type": "string" }
                            },
                            "command": {
                                "type": "object",
                                "additionalProperties": false,
                                "required": ["shell", "run"],
                                "properties": {
                                    "reason": { "type": "string" },
                                    "shell": { "type": "string" },
                                    "run": { "type": "string" },
                                    "cwd": { "type": "string" },
                                    "timeout_sec": { "type": "integer" },
                                    "filter_regex": { "type": "string" },
                                    "tail_lines": { "type": "integer", "minimum": 0 },
                                    "max_bytes": { "type": "integer", "minimum": 0 }
                                }
                            },
                            "observation": { "type": ["object", "null"] },
                            "executing": { "type": "boolean" }
                        }
                    }
                }
            }
        })
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_an_object_schema() {
        let schema = plan_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn schema_requires_the_plan_response_core_fields() {
        let required = plan_schema()["required"].as_array().unwrap();
        for field in ["message", "plan", "require_human_input"] {
            assert!(required.iter().any(|v| v == field), "missing {field}");
        }
    }

    #[test]
    fn step_schema_lists_every_status() {
        let statuses = plan_schema()["properties"]["plan"]["items"]["properties"]["status"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(statuses.len(), 4);
    }

    #[test]
    fn a_valid_plan_response_satisfies_the_schema_fields() {
        // Serialize a real PlanResponse and check the shape lines up with the
        // schema's property list (field-name drift between the two is the
        // kind of bug that silently breaks every model round-trip).
        let resp = crate::PlanResponse {
            message: "m".into(),
            reasoning: Some(vec!["r".into()]),
            plan: vec![crate::PlanStep::new("s1")],
            require_human_input: false,
        };
        let value = serde_json::to_value(&resp).unwrap();
        let props = plan_schema()["properties"].as_object().unwrap();
        for key in value.as_object().unwrap().keys() {
            assert!(props.contains_key(key), "schema is missing field {key}");
        }
    }
}
