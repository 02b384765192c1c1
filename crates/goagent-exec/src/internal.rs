// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use goagent_plan::PlanStep;

use crate::executor::CommandObservation;

/// One parsed internal-command invocation.
#[derive(Debug, Clone)]
pub struct InternalRequest<'a> {
    /// Lowercased command name (the first token of the run line).
    pub name: String,
    /// The full, untokenized run line.
    pub raw: String,
    /// `key=value` tokens.
    pub args: HashMap<String, String>,
    /// Remaining tokens in order.
    pub positionals: Vec<String>,
    /// The step being executed (cwd, timeouts, ids).
    pub step: &'a PlanStep,
}

impl InternalRequest<'_> {
    /// Named argument lookup.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }
}

/// An in-process command addressable from a plan step with
/// `shell = "openagent"`.
#[async_trait]
pub trait InternalCommand: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, req: InternalRequest<'_>) -> anyhow::Result<CommandObservation>;
}

/// Registry of internal commands, keyed by lowercase name.
#[derive(Default)]
pub struct InternalRegistry {
    commands: HashMap<String, Arc<dyn InternalCommand>>,
}

impl InternalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: impl InternalCommand + 'static) {
        self.commands
            .insert(command.name().to_lowercase(), Arc::new(command));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InternalCommand>> {
        self.commands.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Split a run line into tokens with shell-like quoting.
///
/// Double quotes honor backslash escapes, single quotes are literal, and a
/// backslash outside quotes escapes the next character.  An unterminated
/// quote consumes the rest of the line.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            Some('"') => match c {
                '"' => quote = None,
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                _ => current.push(c),
            },
            _ => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_token = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                        in_token = true;
                    }
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Split tokens (after the command name) into `key=value` args and
/// positionals.
pub(crate) fn split_args(tokens: &[String]) -> (HashMap<String, String>, Vec<String>) {
    let mut args = HashMap::new();
    let mut positionals = Vec::new();
    for token in tokens {
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                args.insert(key.to_string(), value.to_string());
            }
            _ => positionals.push(token.clone()),
        }
    }
    (args, positionals)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
