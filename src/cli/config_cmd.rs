// Copyright 2024-2026 unit-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from environment variables.

use crate::config::{self, EffectiveConfig};

/// Print effective config as key-value pairs to stdout.
pub fn run_show() {
    let cfg = config::load().effective_config();
    print_config(&cfg);
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    println!("UNIT_CORE_MANIFEST_DIR=units");
    println!("UNIT_CORE_HOOK_TIMEOUT_MS=5000");
    println!("UNIT_CORE_DRAIN_TIMEOUT_MS=1000");
    println!("UNIT_CORE_DELIVERY_TIMEOUT_MS=5000");
    println!("UNIT_CORE_SWAP_CONFLICT=fail");
    println!("UNIT_CORE_STRICT_MINOR_DOWNGRADE=false");
    println!("UNIT_CORE_GENERIC_BREAKING=true");
    println!("UNIT_CORE_MAX_CONCURRENT_LOADS={}", num_cpus::get().max(1));
    println!("UNIT_CORE_EVENT_CAPACITY=256");
    println!("UNIT_CORE_SHUTDOWN_TIMEOUT=30");
    println!("UNIT_CORE_LOG_FORMAT=json");
    println!("UNIT_CORE_LOG_LEVEL=info");
}

/// Validate configuration for ignored or clamped values.
///
/// Returns 0 if valid, 2 if any variable was not usable as given.
pub fn run_validate() -> i32 {
    let issues = config::validate();
    for issue in &issues {
        eprintln!("WARNING: {}={:?}: {}", issue.key, issue.value, issue.reason);
    }

    let cfg = config::load();
    if cfg.drain_timeout >= cfg.hook_timeout {
        eprintln!(
            "NOTE: UNIT_CORE_DRAIN_TIMEOUT_MS ({}) is not below UNIT_CORE_HOOK_TIMEOUT_MS ({})",
            cfg.drain_timeout.as_millis(),
            cfg.hook_timeout.as_millis()
        );
    }

    if issues.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        2
    }
}

fn print_config(cfg: &EffectiveConfig) {
    println!("UNIT_CORE_MANIFEST_DIR={}", cfg.manifest_dir);
    println!("UNIT_CORE_HOOK_TIMEOUT_MS={}", cfg.hook_timeout_ms);
    println!("UNIT_CORE_DRAIN_TIMEOUT_MS={}", cfg.drain_timeout_ms);
    println!("UNIT_CORE_DELIVERY_TIMEOUT_MS={}", cfg.delivery_timeout_ms);
    println!("UNIT_CORE_SWAP_CONFLICT={}", cfg.swap_conflict);
    println!("UNIT_CORE_STRICT_MINOR_DOWNGRADE={}", cfg.strict_minor_downgrade);
    println!("UNIT_CORE_GENERIC_BREAKING={}", cfg.generic_breaking);
    println!("UNIT_CORE_MAX_CONCURRENT_LOADS={}", cfg.max_concurrent_loads);
    println!("UNIT_CORE_EVENT_CAPACITY={}", cfg.event_capacity);
    println!("UNIT_CORE_SHUTDOWN_TIMEOUT={}", cfg.shutdown_timeout_secs);
    println!("UNIT_CORE_LOG_FORMAT={}", cfg.log_format);
    println!("UNIT_CORE_LOG_LEVEL={}", cfg.log_level);
}
