// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! SSE framing for the Responses stream.
//!
//! A single SSE event may be split across several TCP packets, and one packet
//! may carry several events.  A persistent line buffer is maintained across
//! chunks; only complete `\n`-terminated lines are parsed.

use serde_json::Value;

/// One decoded SSE frame.
#[derive(Debug, Clone)]
pub(crate) enum SseFrame {
    /// A JSON event object (keyed by its `type` field).
    Event(Value),
    /// The `[DONE]` sentinel.
    Done,
}

/// Drain all complete `\n`-terminated lines from `buf`, leaving any trailing
/// partial line in place for the next chunk.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(frame) = parse_sse_data_line(&line) {
            frames.push(frame);
        }
    }
    frames
}

/// Parse one complete SSE line.  Returns `None` for blank lines, comments
/// (keepalives start with `:`), non-data fields, and unparseable payloads.
fn parse_sse_data_line(line: &str) -> Option<SseFrame> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let data = trimmed.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseFrame::Done);
    }
    match serde_json::from_str::<Value>(data) {
        Ok(v) => Some(SseFrame::Event(v)),
        Err(e) => {
            tracing::trace!(error = %e, "skipping unparseable SSE data line");
            None
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
