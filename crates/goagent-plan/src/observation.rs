// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use crate::types::StepStatus;

/// Hard per-buffer ceiling applied to every persisted observation.
pub const OBSERVATION_CAP_BYTES: usize = 50 * 1024;

fn is_false(b: &bool) -> bool {
    !*b
}

/// Outcome of one executed step, keyed by step id inside `plan_observation`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepObservation {
    pub id: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncated: bool,
}

/// The JSON body of every tool message.
///
/// The top-level `stdout`/`stderr`/`truncated`/`exit_code` mirror the *last*
/// step's buffers for in-process consumers; they never serialize.  Everything
/// the model sees travels in `plan_observation`, `summary`, `details`, and
/// the error/cancellation flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanObservationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_observation: Option<Vec<StepObservation>>,
    #[serde(skip)]
    pub stdout: String,
    #[serde(skip)]
    pub stderr: String,
    #[serde(skip)]
    pub truncated: bool,
    #[serde(skip)]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub json_parse_error: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub schema_validation_error: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub response_validation_error: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub canceled_by_human: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub operation_canceled: bool,
}

impl PlanObservationPayload {
    /// A payload that only carries a summary line.
    pub fn with_summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    /// Indented JSON; optional fields are dropped when unset.
    pub fn encode(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Enforce [`OBSERVATION_CAP_BYTES`] on every buffer, keeping tails and
    /// flagging any trim.
    pub fn enforce_cap(&mut self) {
        let (stdout, cut1) = cap_tail(&self.stdout, OBSERVATION_CAP_BYTES);
        let (stderr, cut2) = cap_tail(&self.stderr, OBSERVATION_CAP_BYTES);
        self.stdout = stdout;
        self.stderr = stderr;
        if cut1 || cut2 {
            self.truncated = true;
        }
        if let Some(observations) = self.plan_observation.as_mut() {
            for obs in observations {
                let (stdout, cut1) = cap_tail(&obs.stdout, OBSERVATION_CAP_BYTES);
                let (stderr, cut2) = cap_tail(&obs.stderr, OBSERVATION_CAP_BYTES);
                obs.stdout = stdout;
                obs.stderr = stderr;
                if cut1 || cut2 {
                    obs.truncated = true;
                }
            }
        }
    }
}

/// Keep the last `max_bytes` of `s` (aligned to a character boundary).
/// Returns the kept text and whether anything was cut.
pub fn cap_tail(s: &str, max_bytes: usize) -> (String, bool) {
    if s.len() <= max_bytes {
        return (s.to_string(), false);
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    (s[start..].to_string(), true)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
