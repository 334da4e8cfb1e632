//! unit-core CLI entry point.
//!
//! ## CLI Subcommands
//!
//! - `unit-core-cli discover [DIR]` - Scan manifests
//! - `unit-core-cli plan [DIR]` - Print the dependency load order
//! - `unit-core-cli load [DIR]` - Load every unit the plan allows
//! - `unit-core-cli swap DIR ID VERSION` - Hot-swap a unit
//! - `unit-core-cli rollback DIR ID VIA_VERSION` - Swap, then roll back
//! - `unit-core-cli config show|defaults|validate`

use std::path::Path;
use std::process::ExitCode;

use unit_core::cli::{config_cmd, units_cmd, EXIT_FAILURE, EXIT_USAGE};
use unit_core::config as unit_config;
use unit_core::telemetry::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    if matches!(command, "discover" | "plan" | "load" | "status" | "swap" | "rollback") {
        let log = LogConfig {
            // Keep stdout for command output.
            level: std::env::var("UNIT_CORE_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string()),
            ..unit_config::load().log
        };
        if let Err(e) = init_logging(&log) {
            eprintln!("Logging disabled: {}", e);
        }
    }

    let dir = args.get(2).map(|s| Path::new(s.as_str()));
    let code = match command {
        "discover" => units_cmd::run_discover(dir),
        "plan" => units_cmd::run_plan(dir),
        "load" => units_cmd::run_load(dir).await,
        "status" => units_cmd::run_status(dir).await,
        "swap" => match (dir, args.get(3), args.get(4)) {
            (Some(dir), Some(id), Some(version)) => units_cmd::run_swap(dir, id, version).await,
            _ => usage_error("swap"),
        },
        "rollback" => match (dir, args.get(3), args.get(4)) {
            (Some(dir), Some(id), Some(via)) => units_cmd::run_rollback(dir, id, via).await,
            _ => usage_error("rollback"),
        },
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    config_cmd::run_show();
                    0
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    0
                }
                "validate" => config_cmd::run_validate(),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    EXIT_USAGE
                }
            }
        }
        "help" | "--help" | "-h" => {
            match args.get(2) {
                Some(subcommand) => print_command_help(subcommand),
                None => print_usage(),
            }
            0
        }
        "version" | "--version" | "-V" => {
            println!("unit-core {}", env!("CARGO_PKG_VERSION"));
            0
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            EXIT_USAGE
        }
    };

    ExitCode::from(u8::try_from(code).unwrap_or(EXIT_FAILURE as u8))
}

fn usage_error(command: &str) -> i32 {
    eprintln!("Missing arguments for {}", command);
    print_command_help(command);
    EXIT_USAGE
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "unit-core - component lifecycle, hot-swap and versioning v{}

USAGE:
    unit-core-cli <COMMAND> [ARGS]

COMMANDS:
    discover [DIR]               Scan manifests and list descriptors
    plan [DIR]                   Print the dependency load order
    load [DIR]                   Load every unit the plan allows
    status [DIR]                 Load, then print states, health and metrics
    swap DIR ID VERSION          Hot-swap a unit to another version
    rollback DIR ID VIA_VERSION  Swap to VIA_VERSION, then roll back
    config                       Show or validate configuration
    version                      Show version information
    help [COMMAND]               Show help

DIR defaults to UNIT_CORE_MANIFEST_DIR (units).

EXIT CODES:
    0  Success
    1  Operation failed
    2  Configuration or usage error
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "discover" => eprintln!(
            "unit-core-cli discover [DIR]

Reads every *.json and *.toml manifest in DIR and one level of
subdirectories. Invalid manifests and duplicate identifiers are listed
as REJECTED and make the exit code 1."
        ),
        "plan" => eprintln!(
            "unit-core-cli plan [DIR]

Prints the load order, dependencies first. Units with missing
dependencies or on a cycle are listed with the reason."
        ),
        "load" => eprintln!(
            "unit-core-cli load [DIR]

Discovers and loads every unit, then unloads them again dependents-first."
        ),
        "status" => eprintln!(
            "unit-core-cli status [DIR]

Loads every unit, prints each unit's state, running version and last
error, then the health report and metrics snapshot as JSON. Exits 1 if
any unit failed."
        ),
        "swap" => eprintln!(
            "unit-core-cli swap DIR ID VERSION

Loads DIR, then replaces unit ID with VERSION, which must be listed in
the manifest's versions. On failure the unit stays at its version."
        ),
        "rollback" => eprintln!(
            "unit-core-cli rollback DIR ID VIA_VERSION

Loads DIR, swaps unit ID to VIA_VERSION, rolls it back to the version
it was loaded at, and prints its history."
        ),
        "config" => eprintln!(
            "unit-core-cli config <show|defaults|validate>

    show      Effective configuration from UNIT_CORE_* variables
    defaults  Default values
    validate  Report variables that were ignored or clamped (exit 2)"
        ),
        _ => eprintln!(
            "No detailed help available for '{}'. Use 'unit-core-cli help' for general usage.",
            command
        ),
    }
}
