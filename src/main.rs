//! render-core CLI entry point.
//!
//! ## Subcommands
//!
//! - `render-core-cli simulate [FRAMES]` - Drive the engine with synthetic load
//! - `render-core-cli config show|defaults|validate` - Inspect configuration
//! - `render-core-cli version` - Print the version

use std::process::ExitCode;

use render_core::cli::{config_cmd, run_simulate, ConfigFlags};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "simulate" => {
            let code = run_simulate(&args[2..]).await;
            ExitCode::from(code as u8)
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            let flags = match ConfigFlags::from_args(args.get(3..).unwrap_or(&[])) {
                Ok(flags) => flags,
                Err(e) => {
                    eprintln!("{}", e);
                    print_command_help("config");
                    return ExitCode::from(2u8);
                }
            };
            match subcommand {
                "show" => {
                    let code = config_cmd::run_show(flags.file.as_deref(), flags.json);
                    ExitCode::from(code as u8)
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => {
                    let code = config_cmd::run_validate(flags.file.as_deref());
                    ExitCode::from(code as u8)
                }
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("render-core {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "render-core - Scheduling and resource core for a 2D render engine v{}

USAGE:
    render-core-cli <COMMAND> [OPTIONS]

COMMANDS:
    simulate     Run synthetic frames and print a JSON diagnostics report
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

EXAMPLES:
    render-core-cli simulate 600 --load 1.5
    render-core-cli config show --json
    render-core-cli config validate --file engine.toml

ENVIRONMENT:
    RENDER_CORE_*           Engine settings (see `config defaults`)
    RENDER_CORE_LOG_LEVEL   Log filter (default: info)
    RENDER_CORE_LOG_FORMAT  json, pretty or compact (default: json)

EXIT CODES:
    0  Success
    1  Failure / configuration warnings
    2  Usage or configuration error
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "simulate" => {
            eprintln!(
                "render-core-cli simulate - Run synthetic frames

USAGE:
    render-core-cli simulate [FRAMES] [OPTIONS]

OPTIONS:
    --load FACTOR  Scene weight; 1.0 fits the default budget (default: 1.0)
    --config FILE  Layer a TOML config file over the environment

DESCRIPTION:
    Builds the engine from configuration, runs FRAMES frames (default 120)
    with synthetic phases and textures, then prints frame counts, the
    diagnostics report and collected metrics as JSON.

EXAMPLES:
    render-core-cli simulate
    render-core-cli simulate 600 --load 2.0
"
            );
        }
        "config" => {
            eprintln!(
                "render-core-cli config - Inspect configuration

USAGE:
    render-core-cli config <SUBCOMMAND> [OPTIONS]

SUBCOMMANDS:
    show           Show effective configuration
    defaults       Show default configuration
    validate       Check for settings that interact badly

OPTIONS:
    --file PATH    TOML file layered over the environment
    --json         JSON output (show only)

EXAMPLES:
    render-core-cli config show
    render-core-cli config validate --file engine.toml
    render-core-cli config defaults
"
            );
        }
        _ => {
            eprintln!(
                "No detailed help available for '{}'. Use 'render-core-cli help' for general usage.",
                command
            );
        }
    }
}
