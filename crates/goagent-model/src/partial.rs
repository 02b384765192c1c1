// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tolerant extraction of string fields from *growing* JSON text.
//!
//! While the model streams tool-call arguments, the raw JSON is incomplete:
//! strings may be cut mid-escape, the `reasoning` array may be half open, and
//! the closing braces have not arrived yet.  These helpers scan for the last
//! occurrence of a quoted key, skip the `:`, and consume quote-delimited
//! content while tracking backslash escapes — including a truncated `\uXXXX`
//! and a trailing lone backslash, both of which are simply dropped.
//!
//! This lets hosts render the plan's `message` token-by-token without waiting
//! for the arguments object to close.

use crate::types::ModelEvent;

/// Extract the value of the **last** `"field": "…"` occurrence in `raw`.
///
/// The string value may be unterminated; whatever has been decoded so far is
/// returned.  Returns `None` when no such key/value pair exists yet.
pub fn extract_last_string_field(raw: &str, field: &str) -> Option<String> {
    let start = find_value_start(raw, field, '"')?;
    let (decoded, _closed) = decode_partial_string(&raw[start..]);
    Some(decoded)
}

/// Extract the fully-closed string elements of the last `"field": […]`
/// occurrence in `raw`.  A trailing element whose closing quote has not
/// arrived yet is never returned.
pub fn extract_string_array(raw: &str, field: &str) -> Vec<String> {
    let mut items = Vec::new();
    let Some(mut pos) = find_value_start(raw, field, '[') else {
        return items;
    };
    let bytes = raw.as_bytes();
    loop {
        while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t' | b'\n' | b'\r' | b',') {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] == b']' {
            break;
        }
        if bytes[pos] != b'"' {
            break; // not a string array after all
        }
        pos += 1;
        let (decoded, closed) = decode_partial_string(&raw[pos..]);
        if !closed {
            break; // partial element — never emitted
        }
        pos += consumed_len(&raw[pos..]);
        items.push(decoded);
    }
    items
}

/// Byte length consumed by `decode_partial_string` up to and including the
/// closing quote.
fn consumed_len(s: &str) -> usize {
    let mut iter = s.char_indices();
    let mut escaped = false;
    for (i, c) in &mut iter {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => return i + 1,
            _ => {}
        }
    }
    s.len()
}

/// Find the byte offset of the value content for the **last** occurrence of
/// `"field"` that is followed by `:` and the expected opening delimiter.
fn find_value_start(raw: &str, field: &str, open: char) -> Option<usize> {
    let pattern = format!("\"{field}\"");
    let mut end = raw.len();
    while let Some(pos) = raw[..end].rfind(&pattern) {
        let after = pos + pattern.len();
        let rest = &raw[after..];
        let mut chars = rest.char_indices().skip_while(|(_, c)| c.is_whitespace());
        if let Some((ci, ':')) = chars.next() {
            let rest2 = &rest[ci + 1..];
            let mut chars2 = rest2.char_indices().skip_while(|(_, c)| c.is_whitespace());
            if let Some((oi, c)) = chars2.next() {
                if c == open {
                    return Some(after + ci + 1 + oi + open.len_utf8());
                }
            }
        }
        end = pos;
    }
    None
}

/// Decode a JSON string body (content after the opening quote) up to the
/// closing quote or the end of input.
///
/// Returns `(decoded, closed)`.  Escape handling:
/// - the standard single-character escapes map as usual;
/// - `\uXXXX` decodes a code unit, pairing surrogates when the low half is
///   present; a truncated `\uXX…` at the end of input is dropped;
/// - a trailing lone backslash is dropped.
pub fn decode_partial_string(s: &str) -> (String, bool) {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => return (out, true),
            '\\' => match chars.next() {
                None => break, // trailing backslash — dropped
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('/') => out.push('/'),
                Some('b') => out.push('\u{0008}'),
                Some('f') => out.push('\u{000C}'),
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('u') => match decode_unicode_escape(&mut chars) {
                    Some(decoded) => out.push_str(&decoded),
                    None => break, // truncated \uXXXX — dropped
                },
                Some(other) => {
                    // Invalid escape: keep the literal character so partial
                    // renders stay readable.
                    out.push(other);
                }
            },
            _ => out.push(c),
        }
    }
    (out, false)
}

/// Decode the 4 hex digits of a `\uXXXX` escape, consuming a following low
/// surrogate when the lead is a high surrogate.  Returns `None` when fewer
/// than 4 digits remain (truncated stream).
fn decode_unicode_escape(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<String> {
    let hi = take_hex4(chars)?;
    if (0xD800..0xDC00).contains(&hi) {
        // High surrogate: needs "\uXXXX" low half.
        let mut clone = chars.clone();
        if clone.next() == Some('\\') && clone.next() == Some('u') {
            if let Some(lo) = take_hex4(&mut clone) {
                if (0xDC00..0xE000).contains(&lo) {
                    *chars = clone;
                    let combined = 0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00);
                    return char::from_u32(combined).map(String::from);
                }
            } else {
                // Low half truncated mid-escape — drop the whole pair.
                return None;
            }
        }
        // Lone surrogate with more content following: not representable.
        return Some("\u{FFFD}".to_string());
    }
    char::from_u32(hi).map(String::from)
}

fn take_hex4(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<u32> {
    let mut value = 0u32;
    for _ in 0..4 {
        let d = chars.next()?.to_digit(16)?;
        value = value * 16 + d;
    }
    Some(value)
}

// ─── Progressive rendering state ──────────────────────────────────────────────

/// Per-tool-call rendering state: tracks what has already been emitted so
/// only new content reaches the host.
#[derive(Debug, Default)]
pub struct ProgressiveRender {
    last_message: String,
    reasoning_emitted: usize,
}

impl ProgressiveRender {
    /// Re-extract `message` and `reasoning` from the accumulated raw
    /// arguments and return the deltas that have not been emitted yet.
    pub fn render(&mut self, raw_args: &str) -> Vec<ModelEvent> {
        let mut events = Vec::new();

        if let Some(message) = extract_last_string_field(raw_args, "message") {
            if message != self.last_message {
                if message.starts_with(&self.last_message) {
                    let suffix = &message[self.last_message.len()..];
                    if !suffix.is_empty() {
                        events.push(ModelEvent::TextDelta(suffix.to_string()));
                    }
                } else {
                    // The extraction diverged (e.g. a later "message" key
                    // appeared) — re-emit the full new string.
                    events.push(ModelEvent::TextDelta(message.clone()));
                }
                self.last_message = message;
            }
        }

        let reasoning = extract_string_array(raw_args, "reasoning");
        for item in reasoning.iter().skip(self.reasoning_emitted) {
            events.push(ModelEvent::ReasoningLine(format!("\n{item}")));
        }
        self.reasoning_emitted = self.reasoning_emitted.max(reasoning.len());

        events
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
