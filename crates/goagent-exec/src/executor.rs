// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use goagent_plan::PlanStep;

use crate::internal::{split_args, tokenize, InternalRegistry, InternalRequest};
use crate::output::shape_output;

/// Fallback subprocess timeout when the step does not set one.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Raw outcome of one executed command, before it is keyed by step id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandObservation {
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
    pub exit_code: Option<i32>,
    pub details: String,
}

/// A failed execution still carries whatever was observed; the scheduler
/// records the partial observation alongside the failure.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExecError {
    pub message: String,
    pub observation: CommandObservation,
}

impl ExecError {
    fn new(message: impl Into<String>, observation: CommandObservation) -> Self {
        Self {
            message: message.into(),
            observation,
        }
    }
}

/// Seam between the scheduler and concrete command execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        step: &PlanStep,
    ) -> Result<CommandObservation, ExecError>;
}

/// Production runner: shell subprocesses plus the internal command registry.
#[derive(Default)]
pub struct ShellExecutor {
    internal: InternalRegistry,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an internal command reachable via `shell = "openagent"`.
    pub fn register_internal(&mut self, command: impl crate::internal::InternalCommand + 'static) {
        self.internal.register(command);
    }

    async fn run_internal(&self, step: &PlanStep) -> Result<CommandObservation, ExecError> {
        let run = step.command.run.as_str();
        let tokens = tokenize(run);
        let Some(name) = tokens.first() else {
            return Err(ExecError::new(
                "internal command line is empty",
                CommandObservation {
                    details: "internal command line is empty".into(),
                    ..Default::default()
                },
            ));
        };
        let name = name.to_lowercase();
        let Some(command) = self.internal.get(&name) else {
            let msg = format!("unknown internal command: {name}");
            return Err(ExecError::new(
                msg.clone(),
                CommandObservation {
                    details: msg,
                    ..Default::default()
                },
            ));
        };

        let (args, positionals) = split_args(&tokens[1..]);
        let req = InternalRequest {
            name: name.clone(),
            raw: run.to_string(),
            args,
            positionals,
            step,
        };
        debug!(command = %name, step = %step.id, "dispatching internal command");

        match command.run(req).await {
            Ok(mut obs) => {
                if obs.exit_code.is_none() {
                    obs.exit_code = Some(0);
                }
                match obs.exit_code {
                    Some(code) if code != 0 => {
                        let msg = if obs.details.is_empty() {
                            format!("exit status {code}")
                        } else {
                            obs.details.clone()
                        };
                        report_failure(step, &obs.stdout, &obs.stderr, &msg);
                        Err(ExecError::new(msg, obs))
                    }
                    _ => Ok(obs),
                }
            }
            Err(e) => {
                let msg = e.to_string();
                let obs = CommandObservation {
                    details: msg.clone(),
                    ..Default::default()
                };
                report_failure(step, "", "", &msg);
                Err(ExecError::new(msg, obs))
            }
        }
    }

    async fn run_shell(
        &self,
        cancel: &CancellationToken,
        step: &PlanStep,
    ) -> Result<CommandObservation, ExecError> {
        let draft = &step.command;
        let timeout_secs = if draft.timeout_sec > 0 {
            draft.timeout_sec as u64
        } else {
            DEFAULT_TIMEOUT_SECS
        };

        let mut tokens = draft.shell.split_whitespace();
        let Some(program) = tokens.next() else {
            let msg = "step has no shell configured".to_string();
            return Err(ExecError::new(
                msg.clone(),
                CommandObservation {
                    details: msg,
                    ..Default::default()
                },
            ));
        };
        let mut args: Vec<&str> = tokens.collect();
        if args.is_empty() {
            args.push("-lc");
        }

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .arg(&draft.run)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if !draft.cwd.is_empty() {
            cmd.current_dir(&draft.cwd);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(step = %step.id, shell = %draft.shell, run = %draft.run, "spawning step command");

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                let msg = format!("failed to spawn {program}: {e}");
                let obs = CommandObservation {
                    details: msg.clone(),
                    ..Default::default()
                };
                report_failure(step, "", "", &msg);
                return Err(ExecError::new(msg, obs));
            }
        };

        // Drain both pipes concurrently so a full pipe buffer cannot
        // deadlock a chatty child against our wait().
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        enum Outcome {
            Exited(std::io::Result<std::process::ExitStatus>),
            TimedOut,
            Canceled,
        }

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Canceled,
        };

        let status = match &outcome {
            Outcome::Exited(result) => match result {
                Ok(status) => Some(*status),
                Err(_) => None,
            },
            Outcome::TimedOut | Outcome::Canceled => {
                kill_process_group(&mut child);
                let _ = child.wait().await;
                None
            }
        };

        let raw_stdout =
            String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let raw_stderr =
            String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

        let (stdout, cut1) = shape_output(&raw_stdout, draft);
        let (stderr, cut2) = shape_output(&raw_stderr, draft);
        let mut obs = CommandObservation {
            stdout,
            stderr,
            truncated: cut1 || cut2,
            exit_code: status.and_then(|s| s.code()),
            details: String::new(),
        };

        let failure: Option<String> = match outcome {
            Outcome::TimedOut => Some(format!("command timed out after {timeout_secs}s")),
            Outcome::Canceled => Some("operation canceled".to_string()),
            Outcome::Exited(Err(e)) => Some(format!("wait failed: {e}")),
            Outcome::Exited(Ok(status)) => {
                if status.success() {
                    None
                } else {
                    match status.code() {
                        Some(code) => Some(format!("exit status {code}")),
                        None => Some("terminated by signal".to_string()),
                    }
                }
            }
        };

        match failure {
            None => Ok(obs),
            Some(msg) => {
                obs.details = msg.clone();
                report_failure(step, &raw_stdout, &raw_stderr, &msg);
                Err(ExecError::new(msg, obs))
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ShellExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        step: &PlanStep,
    ) -> Result<CommandObservation, ExecError> {
        if step.command.is_internal() {
            self.run_internal(step).await
        } else {
            self.run_shell(cancel, step).await
        }
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        // The child leads its own process group, so a negative pid takes the
        // whole group down, including grandchildren holding our pipes open.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut tokio::process::Child) {
    let _ = child.start_kill();
}

/// Write a diagnostic report for a failed step under `<cwd>/.goagent/`.
///
/// Returns the report path.  I/O problems are the caller's to log; a failure
/// report must never fail the pass.
pub fn write_failure_report(
    step: &PlanStep,
    raw_stdout: &str,
    raw_stderr: &str,
    error: &str,
) -> std::io::Result<PathBuf> {
    let base = if step.command.cwd.is_empty() {
        Path::new(".")
    } else {
        Path::new(&step.command.cwd)
    };
    let dir = base.join(".goagent");
    std::fs::create_dir_all(&dir)?;

    let now = chrono::Utc::now();
    let path = dir.join(format!("failure-{}.txt", now.format("%Y%m%d-%H%M%S")));
    let body = format!(
        "timestamp: {}\nstep id: {}\ntitle: {}\nreason: {}\nshell: {}\ncwd: {}\nrun: {}\nerror: {}\n\n--- stdout ---\n{}\n--- stderr ---\n{}\n",
        now.to_rfc3339(),
        step.id,
        step.title,
        step.command.reason,
        step.command.shell,
        step.command.cwd,
        step.command.run,
        error,
        raw_stdout,
        raw_stderr,
    );
    std::fs::write(&path, body)?;
    Ok(path)
}

fn report_failure(step: &PlanStep, raw_stdout: &str, raw_stderr: &str, error: &str) {
    match write_failure_report(step, raw_stdout, raw_stderr, error) {
        Ok(path) => debug!(path = %path.display(), "wrote failure report"),
        Err(e) => warn!(error = %e, "could not write failure report"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
