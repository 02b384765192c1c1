// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Command execution for plan steps.
//!
//! A step either spawns a shell subprocess (its own process group, killed
//! wholesale on timeout or cancellation) or dispatches to an in-process
//! handler registered by name.  Output is shaped by the step's command draft
//! (filter regex, byte cap, line tail) and always bounded by the hard
//! observation cap before it reaches the model.

mod executor;
mod internal;
mod output;
pub mod patch;

pub use executor::{write_failure_report, CommandObservation, CommandRunner, ExecError, ShellExecutor};
pub use internal::{tokenize, InternalCommand, InternalRegistry, InternalRequest};
pub use output::shape_output;
pub use patch::ApplyPatchCommand;
