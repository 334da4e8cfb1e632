// Copyright 2024-2026 unit-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Unit CLI subcommands: discover, plan, load, status, swap, rollback.
//!
//! Each command builds a fresh runtime over a manifest directory. Units are
//! passive: they accept every migration and echo messages.

use std::path::Path;

use crate::units::{DiscoveryReport, LoadPlan, LoadReport, SwapReport, UnitStatus};
use crate::version::Version;
use crate::Runtime;

use super::{build_runtime, EXIT_FAILURE, EXIT_SUCCESS, EXIT_USAGE};

/// Run `discover [DIR]`. Invalid manifests are listed and make the exit code 1.
pub fn run_discover(dir: Option<&Path>) -> i32 {
    let runtime = build_runtime(dir);
    match runtime.scan() {
        Ok(report) => {
            print_discovery(&report);
            if report.is_clean() {
                EXIT_SUCCESS
            } else {
                EXIT_FAILURE
            }
        }
        Err(e) => {
            eprintln!("Discovery failed: {}", e);
            EXIT_FAILURE
        }
    }
}

/// Run `plan [DIR]`: print the load order and every rejected unit.
pub fn run_plan(dir: Option<&Path>) -> i32 {
    let runtime = build_runtime(dir);
    if let Err(e) = runtime.scan() {
        eprintln!("Discovery failed: {}", e);
        return EXIT_FAILURE;
    }
    let plan = runtime.plan();
    print_plan(&plan);
    if plan.is_complete() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

/// Run `load [DIR]`: discover, then load everything the plan allows.
pub async fn run_load(dir: Option<&Path>) -> i32 {
    let runtime = build_runtime(dir);
    let report = match prepare(&runtime).await {
        Ok(report) => report,
        Err(code) => return code,
    };
    print_load(&report);
    println!("Active: {}", runtime.all_active().join(", "));
    runtime.shutdown_default().await;
    if report.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

/// Run `status [DIR]`: load everything, then print unit states, health and
/// metrics as JSON.
pub async fn run_status(dir: Option<&Path>) -> i32 {
    let runtime = build_runtime(dir);
    if let Err(code) = prepare(&runtime).await {
        return code;
    }
    print_statuses(&runtime.registry().statuses());

    let health = runtime.health();
    let status = serde_json::json!({
        "health": health,
        "metrics": runtime.registry().metrics().snapshot(),
    });
    let code = match serde_json::to_string_pretty(&status) {
        Ok(out) => {
            println!("{}", out);
            if health.failed_units.is_empty() {
                EXIT_SUCCESS
            } else {
                EXIT_FAILURE
            }
        }
        Err(e) => {
            eprintln!("Failed to serialize status: {}", e);
            EXIT_FAILURE
        }
    };
    runtime.shutdown_default().await;
    code
}

/// Run `swap DIR ID VERSION`.
pub async fn run_swap(dir: &Path, id: &str, version: &str) -> i32 {
    let Some(target) = parse_version(version) else {
        return EXIT_USAGE;
    };
    let runtime = build_runtime(Some(dir));
    if let Err(code) = prepare(&runtime).await {
        return code;
    }

    let code = match runtime.hot_swap(id, &target).await {
        Ok(report) => {
            print_swap(&report);
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("Swap failed: {}", e);
            print_current(&runtime, id);
            EXIT_FAILURE
        }
    };
    runtime.shutdown_default().await;
    code
}

/// Run `rollback DIR ID VIA_VERSION`: swap to `VIA_VERSION`, then roll back
/// to the version the unit was loaded at.
pub async fn run_rollback(dir: &Path, id: &str, via: &str) -> i32 {
    let Some(via) = parse_version(via) else {
        return EXIT_USAGE;
    };
    let runtime = build_runtime(Some(dir));
    if let Err(code) = prepare(&runtime).await {
        return code;
    }
    let Some(original) = runtime.get(id).map(|instance| instance.version) else {
        eprintln!("Unit {} is not loaded", id);
        runtime.shutdown_default().await;
        return EXIT_FAILURE;
    };

    let result = match runtime.hot_swap(id, &via).await {
        Ok(up) => {
            print_swap(&up);
            runtime.rollback(id, &original).await
        }
        Err(e) => Err(e),
    };

    let code = match result {
        Ok(report) => {
            print_swap(&report);
            for entry in runtime.history(id) {
                println!(
                    "  {}  {:<10} {} -> {}",
                    entry.timestamp.format("%H:%M:%S%.3f"),
                    entry.change.to_string(),
                    entry.previous.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
                    entry.version
                );
            }
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("Rollback failed: {}", e);
            print_current(&runtime, id);
            EXIT_FAILURE
        }
    };
    runtime.shutdown_default().await;
    code
}

async fn prepare(runtime: &Runtime) -> Result<LoadReport, i32> {
    if let Err(e) = runtime.discover() {
        eprintln!("Discovery failed: {}", e);
        return Err(EXIT_FAILURE);
    }
    runtime.load_all().await.map_err(|e| {
        eprintln!("Load failed: {}", e);
        EXIT_FAILURE
    })
}

fn parse_version(raw: &str) -> Option<Version> {
    match Version::parse(raw) {
        Ok(version) => Some(version),
        Err(e) => {
            eprintln!("Invalid version {:?}: {}", raw, e);
            None
        }
    }
}

fn print_current(runtime: &Runtime, id: &str) {
    if let Some(instance) = runtime.get(id) {
        eprintln!("{} remains {} at {}", id, instance.state, instance.version);
    }
}

/// Format and print a discovery report to stdout.
pub fn print_discovery(report: &DiscoveryReport) {
    if report.descriptors.is_empty() {
        println!("No units discovered.");
    } else {
        println!("{:<24} {:<12} {:<30} {}", "ID", "VERSION", "DEPENDS ON", "CAPABILITIES");
        println!("{}", "-".repeat(84));
        for d in &report.descriptors {
            let deps: Vec<&str> = d.dependencies().iter().map(String::as_str).collect();
            let caps: Vec<&str> = d.capabilities().iter().map(String::as_str).collect();
            println!(
                "{:<24} {:<12} {:<30} {}",
                truncate(d.id(), 23),
                d.version().to_string(),
                truncate(&deps.join(","), 29),
                caps.join(",")
            );
        }
    }
    for err in &report.errors {
        println!("REJECTED  {}", err);
    }
}

pub fn print_statuses(statuses: &[UnitStatus]) {
    println!("{:<24} {:<10} {:<10} {}", "ID", "STATE", "VERSION", "LAST ERROR");
    println!("{}", "-".repeat(72));
    for status in statuses {
        println!(
            "{:<24} {:<10} {:<10} {}",
            truncate(&status.id, 23),
            status.state.as_str(),
            status
                .running_version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
            status.last_error.as_deref().unwrap_or("")
        );
    }
}

pub fn print_plan(plan: &LoadPlan) {
    for (i, id) in plan.order.iter().enumerate() {
        println!("{:>3}. {}", i + 1, id);
    }
    for (id, err) in &plan.rejected {
        println!("  x  {}: {}", id, err);
    }
}

pub fn print_load(report: &LoadReport) {
    for id in &report.loaded {
        println!("loaded   {}", id);
    }
    for (id, err) in &report.failed {
        println!("failed   {}: {}", id, err);
    }
    for (id, reason) in &report.skipped {
        println!("skipped  {}: {}", id, reason);
    }
}

pub fn print_swap(report: &SwapReport) {
    println!(
        "{} {} -> {} ({}, {}, {:?}) in {} ms",
        report.unit,
        report.from,
        report.to,
        report.change,
        report.level,
        report.path,
        report.duration.as_millis()
    );
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
