// Copyright 2024-2026 render-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These read configuration from the environment and an optional TOML
//! file; no engine is started.

use std::path::Path;

use crate::config::{self, ConfigError, EffectiveConfig, EnvConfig};

fn load(file: Option<&Path>) -> Result<EnvConfig, ConfigError> {
    match file {
        Some(path) => config::load_file(path),
        None => Ok(config::load()),
    }
}

/// Print effective config as `KEY=value` lines, or JSON.
///
/// Returns 0 on success, 2 if the config file cannot be loaded.
pub fn run_show(file: Option<&Path>, json: bool) -> i32 {
    let cfg = match load(file) {
        Ok(env) => env.effective_config(),
        Err(e) => {
            eprintln!("Error: {e}");
            return 2;
        }
    };
    if json {
        match serde_json::to_string_pretty(&cfg) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error: {e}");
                return 1;
            }
        }
    } else {
        print_config(&cfg);
    }
    0
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    print_config(&config::defaults().effective_config());
}

/// Validate configuration for settings that load but interact badly.
///
/// Returns 0 if valid, 1 if any warnings are found, 2 if the config file
/// cannot be loaded.
pub fn run_validate(file: Option<&Path>) -> i32 {
    let env = match load(file) {
        Ok(env) => env,
        Err(e) => {
            eprintln!("Error: {e}");
            return 2;
        }
    };

    let warnings = env.warnings();
    for warning in &warnings {
        eprintln!("WARNING: {warning}");
    }

    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn print_config(cfg: &EffectiveConfig) {
    for (key, value) in cfg.env_pairs() {
        println!("{key}={value}");
    }
}
