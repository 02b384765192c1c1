// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Terminal glue: stdin line reader and outbound event forwarder.

use std::io::Write;

use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use goagent_config::RuntimeConfig;
use goagent_core::{InboundEvent, Level, OutboundEvent, OutboundKind};

/// Render outbound events: assistant text streams to stdout, everything else
/// goes to stderr so piped output stays clean.
pub async fn forward_events(mut outbound: mpsc::Receiver<OutboundEvent>) {
    let mut streaming_line_open = false;
    while let Some(event) = outbound.recv().await {
        match event.kind {
            OutboundKind::AssistantDelta => {
                print!("{}", event.message);
                let _ = std::io::stdout().flush();
                streaming_line_open = true;
            }
            OutboundKind::AssistantMessage => {
                // The message text already streamed as deltas; just close the
                // line so the next status starts fresh.
                if streaming_line_open {
                    println!();
                    streaming_line_open = false;
                }
            }
            OutboundKind::Status => {
                let tag = match event.level {
                    Level::Info => "info",
                    Level::Warn => "warn",
                    Level::Error => "error",
                };
                eprintln!("[goagent:{tag}] {}", event.message);
            }
            OutboundKind::Error => {
                eprintln!("[goagent:error] {}", event.message);
            }
            OutboundKind::RequestInput => {
                eprintln!("[goagent] {}", event.message);
            }
        }
    }
}

/// Read stdin lines into inbound events until EOF, an exit word, or
/// cancellation.
pub async fn read_stdin(
    inbound: mpsc::Sender<InboundEvent>,
    config: RuntimeConfig,
    cancel: CancellationToken,
) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if config.is_exit_word(trimmed) {
                    let _ = inbound
                        .send(InboundEvent::Shutdown {
                            reason: "exit requested".to_string(),
                        })
                        .await;
                    break;
                }
                if trimmed.eq_ignore_ascii_case("cancel") {
                    let _ = inbound.send(InboundEvent::Cancel).await;
                    continue;
                }
                let _ = inbound
                    .send(InboundEvent::Prompt(trimmed.to_string()))
                    .await;
            }
            Ok(None) => {
                let _ = inbound
                    .send(InboundEvent::Shutdown {
                        reason: "stdin closed".to_string(),
                    })
                    .await;
                break;
            }
            Err(e) => {
                let _ = inbound
                    .send(InboundEvent::Shutdown {
                        reason: format!("stdin error: {e}"),
                    })
                    .await;
                break;
            }
        }
    }
}
