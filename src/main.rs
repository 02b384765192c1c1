// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod console;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use goagent_config::RuntimeConfig;
use goagent_core::{InboundEvent, Runtime};
use goagent_model::{PlanModel, ResponsesClient};

// Exit codes: 0 success, 1 runtime failure, 2 argument/configuration errors
// (clap uses 2 for parse failures on its own).
const EXIT_RUNTIME_ERROR: u8 = 1;
const EXIT_USAGE_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(env_file) = &cli.env_file {
        if let Err(e) = load_env_file(env_file) {
            eprintln!("goagent: cannot load {}: {e}", env_file.display());
            return ExitCode::from(EXIT_USAGE_ERROR);
        }
    }

    let mut config = RuntimeConfig::from_env();
    cli.apply(&mut config);
    if let Err(e) = config.require_api_key() {
        eprintln!("goagent: {e}");
        return ExitCode::from(EXIT_USAGE_ERROR);
    }

    match run(config, cli.prompt).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("goagent: {e:#}");
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

async fn run(config: RuntimeConfig, initial_prompt: Option<String>) -> anyhow::Result<()> {
    let model: Arc<dyn PlanModel> = Arc::new(ResponsesClient::from_config(&config)?);
    let runtime = Runtime::with_default_commands(config.clone(), model)?;

    let inbound = runtime.inbound();
    let outbound = runtime
        .take_outbound()
        .expect("fresh runtime always has an outbound receiver");

    let forwarder = if config.disable_output_forwarding {
        tokio::spawn(async move {
            let mut outbound = outbound;
            while outbound.recv().await.is_some() {}
        })
    } else {
        tokio::spawn(console::forward_events(outbound))
    };

    let reader = (!config.disable_input_reader).then(|| {
        tokio::spawn(console::read_stdin(
            inbound.clone(),
            config.clone(),
            runtime.cancellation_token(),
        ))
    });

    if let Some(prompt) = initial_prompt {
        let _ = inbound.send(InboundEvent::Prompt(prompt)).await;
    }

    let result = runtime.run().await;

    // Dropping the runtime closes the outbound queue; the reader unblocks
    // through the cancellation token the runtime fired on close.
    drop(inbound);
    drop(runtime);
    if let Some(reader) = reader {
        let _ = reader.await;
    }
    let _ = forwarder.await;

    result
}

/// Minimal KEY=VALUE loader applied before config resolution.  Lines that
/// are blank or start with `#` are skipped; values may be single- or
/// double-quoted.
fn load_env_file(path: &Path) -> anyhow::Result<()> {
    let body = std::fs::read_to_string(path)?;
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        std::env::set_var(key, value);
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("goagent={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
