// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Runtime configuration for the goagent runtime.
//!
//! Configuration is resolved from the process environment (the CLI applies
//! its flag overrides on top).  There is no config-file surface: everything
//! the runtime needs fits in a handful of environment variables plus flags.

mod schema;

pub use schema::{env_overlay, RuntimeConfig};
