// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;

use goagent_plan::{cap_tail, CommandDraft, OBSERVATION_CAP_BYTES};

/// Shape one captured output buffer according to the step's command draft.
///
/// Applied in order: line filter, byte-tail truncation, line-tail truncation,
/// and finally the hard observation cap.  Returns the shaped text and whether
/// any truncation occurred (filtering alone does not count).
pub fn shape_output(text: &str, cmd: &CommandDraft) -> (String, bool) {
    let mut shaped = text.to_string();
    let mut truncated = false;

    if !cmd.filter_regex.is_empty() {
        // An invalid pattern is ignored: the model's filter is advisory and
        // must never fail the step.
        if let Ok(re) = Regex::new(&cmd.filter_regex) {
            let mut kept: String = shaped
                .lines()
                .filter(|line| re.is_match(line))
                .collect::<Vec<_>>()
                .join("\n");
            if !kept.is_empty() && shaped.ends_with('\n') {
                kept.push('\n');
            }
            shaped = kept;
        }
    }

    if cmd.max_bytes > 0 && shaped.len() > cmd.max_bytes {
        let (tail, _) = cap_tail(&shaped, cmd.max_bytes);
        shaped = tail;
        truncated = true;
    }

    if cmd.tail_lines > 0 {
        let lines: Vec<&str> = shaped.lines().collect();
        if lines.len() > cmd.tail_lines {
            let mut tail = lines[lines.len() - cmd.tail_lines..].join("\n");
            if shaped.ends_with('\n') {
                tail.push('\n');
            }
            shaped = tail;
            truncated = true;
        }
    }

    if shaped.len() > OBSERVATION_CAP_BYTES {
        let (tail, _) = cap_tail(&shaped, OBSERVATION_CAP_BYTES);
        shaped = tail;
        truncated = true;
    }

    (shaped, truncated)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> CommandDraft {
        CommandDraft::default()
    }

    #[test]
    fn passthrough_when_no_shaping_configured() {
        let (out, truncated) = shape_output("a\nb\nc\n", &draft());
        assert_eq!(out, "a\nb\nc\n");
        assert!(!truncated);
    }

    #[test]
    fn filter_keeps_matching_lines_only() {
        let cmd = CommandDraft {
            filter_regex: "^ok".into(),
            ..draft()
        };
        let (out, truncated) = shape_output("ok one\nskip\nok two\n", &cmd);
        assert_eq!(out, "ok one\nok two\n");
        assert!(!truncated, "filtering is not truncation");
    }

    #[test]
    fn invalid_filter_regex_is_ignored() {
        let cmd = CommandDraft {
            filter_regex: "([unclosed".into(),
            ..draft()
        };
        let (out, _) = shape_output("a\nb\n", &cmd);
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn max_bytes_keeps_the_tail() {
        let cmd = CommandDraft {
            max_bytes: 4,
            ..draft()
        };
        let (out, truncated) = shape_output("abcdefgh", &cmd);
        assert_eq!(out, "efgh");
        assert!(truncated);
    }

    #[test]
    fn tail_lines_keeps_last_lines() {
        let cmd = CommandDraft {
            tail_lines: 2,
            ..draft()
        };
        let (out, truncated) = shape_output("1\n2\n3\n4\n", &cmd);
        assert_eq!(out, "3\n4\n");
        assert!(truncated);
    }

    #[test]
    fn tail_lines_noop_when_under_limit() {
        let cmd = CommandDraft {
            tail_lines: 10,
            ..draft()
        };
        let (out, truncated) = shape_output("1\n2\n", &cmd);
        assert_eq!(out, "1\n2\n");
        assert!(!truncated);
    }

    #[test]
    fn filter_then_tail_compose() {
        let cmd = CommandDraft {
            filter_regex: "keep".into(),
            tail_lines: 1,
            ..draft()
        };
        let (out, truncated) = shape_output("keep a\ndrop\nkeep b\nkeep c\n", &cmd);
        assert_eq!(out, "keep c\n");
        assert!(truncated);
    }

    #[test]
    fn observation_cap_is_always_enforced() {
        let big = "y".repeat(OBSERVATION_CAP_BYTES * 2);
        let (out, truncated) = shape_output(&big, &draft());
        assert_eq!(out.len(), OBSERVATION_CAP_BYTES);
        assert!(truncated);
    }
}
