// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Envelope-format patch engine behind the `apply_patch` internal command.
//!
//! ```text
//! *** Begin Patch
//! *** Add File: path/to/new_file.rs
//! +content line
//! *** Delete File: path/to/old_file.rs
//! *** Update File: path/to/existing.rs
//! @@ context_line
//!  context line (space prefix)
//! -removed line
//! +added line
//! *** End Patch
//! ```
//!
//! All paths are resolved under the step's working directory; absolute paths
//! and `..` escapes are rejected.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::executor::CommandObservation;
use crate::internal::{InternalCommand, InternalRequest};

const BEGIN_MARKER: &str = "*** Begin Patch";
const END_MARKER: &str = "*** End Patch";

/// One file operation parsed from the envelope.
#[derive(Debug, Clone, PartialEq)]
enum PatchOp {
    Add { path: String, content: String },
    Delete { path: String },
    Update { path: String, hunks: Vec<Hunk> },
}

#[derive(Debug, Clone, PartialEq)]
struct Hunk {
    /// Context line from the `@@` header, if any.
    context: Option<String>,
    /// `(' '|'-'|'+', line)` entries in order.
    changes: Vec<(char, String)>,
}

/// Apply a patch envelope with every path rooted under `root`.
///
/// Returns a one-line-per-file summary (`A path` / `M path` / `D path`).
pub fn apply_patch(root: &Path, input: &str) -> anyhow::Result<String> {
    let ops = parse_envelope(input)?;
    if ops.is_empty() {
        return Ok("(no changes applied)".to_string());
    }

    let mut summary = Vec::with_capacity(ops.len());
    for op in ops {
        match op {
            PatchOp::Add { path, content } => {
                let target = resolve_path(root, &path)?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, content)?;
                summary.push(format!("A {path}"));
            }
            PatchOp::Delete { path } => {
                let target = resolve_path(root, &path)?;
                if target.exists() {
                    std::fs::remove_file(&target)?;
                }
                summary.push(format!("D {path}"));
            }
            PatchOp::Update { path, hunks } => {
                let target = resolve_path(root, &path)?;
                let original = std::fs::read_to_string(&target)
                    .map_err(|e| anyhow::anyhow!("cannot read {path}: {e}"))?;
                let updated = apply_hunks(&original, &hunks)
                    .map_err(|e| anyhow::anyhow!("hunk failed for {path}: {e}"))?;
                std::fs::write(&target, updated)?;
                summary.push(format!("M {path}"));
            }
        }
    }
    Ok(summary.join("\n"))
}

/// Reject absolute paths and any `..` traversal, then join under `root`.
fn resolve_path(root: &Path, rel: &str) -> anyhow::Result<PathBuf> {
    let candidate = Path::new(rel);
    if candidate.is_absolute() {
        anyhow::bail!("absolute path not allowed in patch: {rel}");
    }
    for component in candidate.components() {
        match component {
            Component::ParentDir => anyhow::bail!("path escapes working directory: {rel}"),
            Component::Prefix(_) | Component::RootDir => {
                anyhow::bail!("absolute path not allowed in patch: {rel}")
            }
            _ => {}
        }
    }
    Ok(root.join(candidate))
}

/// Parse the envelope into a list of operations.
fn parse_envelope(input: &str) -> anyhow::Result<Vec<PatchOp>> {
    let start = input
        .find(BEGIN_MARKER)
        .ok_or_else(|| anyhow::anyhow!("'{BEGIN_MARKER}' not found"))?;
    let finish = input
        .find(END_MARKER)
        .ok_or_else(|| anyhow::anyhow!("'{END_MARKER}' not found"))?;
    if finish <= start {
        anyhow::bail!("'{END_MARKER}' appears before '{BEGIN_MARKER}'");
    }
    let body = &input[start + BEGIN_MARKER.len()..finish];

    let mut ops = Vec::new();
    let mut lines = body.lines().peekable();
    while let Some(line) = lines.next() {
        if let Some(path) = line.strip_prefix("*** Add File: ") {
            let mut content_lines = Vec::new();
            while let Some(next) = lines.peek() {
                if next.starts_with("*** ") {
                    break;
                }
                let raw = lines.next().expect("peeked line must exist");
                content_lines.push(raw.strip_prefix('+').unwrap_or(raw).to_string());
            }
            let mut content = content_lines.join("\n");
            if !content.ends_with('\n') {
                content.push('\n');
            }
            ops.push(PatchOp::Add {
                path: path.trim().to_string(),
                content,
            });
        } else if let Some(path) = line.strip_prefix("*** Delete File: ") {
            ops.push(PatchOp::Delete {
                path: path.trim().to_string(),
            });
        } else if let Some(path) = line.strip_prefix("*** Update File: ") {
            let mut hunks = Vec::new();
            while let Some(next) = lines.peek() {
                if next.starts_with("*** ") {
                    break;
                }
                let raw = lines.next().expect("peeked line must exist");
                if let Some(header) = raw.strip_prefix("@@") {
                    let header = header.trim();
                    hunks.push(Hunk {
                        context: (!header.is_empty()).then(|| header.to_string()),
                        changes: Vec::new(),
                    });
                } else if let Some(hunk) = hunks.last_mut() {
                    if let Some(rest) = raw.strip_prefix('+') {
                        hunk.changes.push(('+', rest.to_string()));
                    } else if let Some(rest) = raw.strip_prefix('-') {
                        hunk.changes.push(('-', rest.to_string()));
                    } else if let Some(rest) = raw.strip_prefix(' ') {
                        hunk.changes.push((' ', rest.to_string()));
                    }
                    // Anything else between hunks is ignored.
                }
            }
            ops.push(PatchOp::Update {
                path: path.trim().to_string(),
                hunks,
            });
        }
        // Blank lines and unknown directives between sections are skipped.
    }
    Ok(ops)
}

fn apply_hunks(content: &str, hunks: &[Hunk]) -> anyhow::Result<String> {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let had_trailing_newline = content.ends_with('\n');

    for hunk in hunks {
        let anchor: Vec<&str> = hunk
            .changes
            .iter()
            .filter(|(c, _)| *c == '-' || *c == ' ')
            .map(|(_, l)| l.as_str())
            .collect();

        let start = find_hunk_position(&lines, hunk.context.as_deref(), &anchor)
            .ok_or_else(|| anyhow::anyhow!("could not find hunk context in file"))?;

        let mut replacement = Vec::new();
        let mut cursor = start;
        for (kind, line) in &hunk.changes {
            match kind {
                ' ' => {
                    replacement.push(line.clone());
                    cursor += 1;
                }
                '-' => cursor += 1,
                '+' => replacement.push(line.clone()),
                _ => {}
            }
        }
        lines.splice(start..cursor, replacement);
    }

    let mut result = lines.join("\n");
    if had_trailing_newline {
        result.push('\n');
    }
    Ok(result)
}

/// Locate the hunk: prefer the `@@` context line, fall back to matching the
/// anchor (context + removed) lines directly.
fn find_hunk_position(lines: &[String], context: Option<&str>, anchor: &[&str]) -> Option<usize> {
    if let Some(ctx) = context {
        for (i, line) in lines.iter().enumerate() {
            if line.trim() == ctx.trim() && lines_match_at(lines, i + 1, anchor) {
                return Some(i + 1);
            }
        }
        return None;
    }
    (0..=lines.len().saturating_sub(anchor.len())).find(|&i| lines_match_at(lines, i, anchor))
}

fn lines_match_at(lines: &[String], start: usize, expected: &[&str]) -> bool {
    if start + expected.len() > lines.len() {
        return false;
    }
    expected
        .iter()
        .enumerate()
        .all(|(i, exp)| lines[start + i].trim() == exp.trim())
}

// ─── Internal command wrapper ─────────────────────────────────────────────────

/// The `apply_patch` internal command: the payload after the command name is
/// the patch envelope, rooted at the step's cwd.
pub struct ApplyPatchCommand;

#[async_trait]
impl InternalCommand for ApplyPatchCommand {
    fn name(&self) -> &str {
        "apply_patch"
    }

    async fn run(&self, req: InternalRequest<'_>) -> anyhow::Result<CommandObservation> {
        let trimmed = req.raw.trim_start();
        let payload = trimmed
            .strip_prefix("apply_patch")
            .or_else(|| trimmed.strip_prefix(req.name.as_str()))
            .unwrap_or(trimmed)
            .trim_start_matches(&[' ', '\t'][..])
            .trim_start_matches('\n')
            .to_string();
        let cwd = req.step.command.cwd.clone();
        let root = if cwd.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(cwd)
        };
        let summary = apply_patch(&root, &payload)?;
        Ok(CommandObservation {
            stdout: summary,
            ..Default::default()
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
