// Copyright 2024-2026 render-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI module for render-core commands.
//!
//! ## Usage
//!
//! ```bash
//! render-core-cli simulate 300          # Run 300 synthetic frames, print JSON
//! render-core-cli config show --json    # Effective configuration
//! render-core-cli config validate       # Exit 1 on inconsistent settings
//! ```

pub mod config_cmd;
pub mod simulate;

pub use simulate::{run_simulate, simulate, SimulateOptions, SimulationSummary};

use std::path::PathBuf;

/// Flags shared by the `config` subcommands.
#[derive(Debug, Default, PartialEq)]
pub struct ConfigFlags {
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl ConfigFlags {
    /// Parse `[--file PATH] [--json]`.
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        let mut flags = Self::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--file" | "--config" => {
                    let path = args.get(i + 1).ok_or("Missing value for --file")?;
                    flags.file = Some(PathBuf::from(path));
                    i += 2;
                }
                "--json" => {
                    flags.json = true;
                    i += 1;
                }
                other => return Err(format!("Unknown argument: {other}")),
            }
        }
        Ok(flags)
    }
}
