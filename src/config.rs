//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from `UNIT_CORE_*` environment variables
//! with sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `UNIT_CORE_MANIFEST_DIR` | `units` | Directory scanned by discovery |
//! | `UNIT_CORE_HOOK_TIMEOUT_MS` | 5000 | Timeout for every unit hook |
//! | `UNIT_CORE_DRAIN_TIMEOUT_MS` | 1000 | In-flight wait before suspending |
//! | `UNIT_CORE_DELIVERY_TIMEOUT_MS` | 5000 | Message handler timeout |
//! | `UNIT_CORE_SWAP_CONFLICT` | `fail` | `fail` or `wait` on concurrent swaps |
//! | `UNIT_CORE_STRICT_MINOR_DOWNGRADE` | false | Reject minor downgrades |
//! | `UNIT_CORE_GENERIC_BREAKING` | true | Generic pipeline for breaking changes |
//! | `UNIT_CORE_MAX_CONCURRENT_LOADS` | CPU count | Concurrent loads in `load_all` |
//! | `UNIT_CORE_EVENT_CAPACITY` | 256 | Lifecycle event channel capacity |
//! | `UNIT_CORE_SHUTDOWN_TIMEOUT` | 30 | Graceful shutdown timeout (secs) |
//! | `UNIT_CORE_LOG_FORMAT` | `json` | `json` or `pretty` |
//! | `UNIT_CORE_LOG_LEVEL` | `info` | Log filter directive |

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::telemetry::{LogConfig, LogFormat};
use crate::units::{ConflictPolicy, RegistryConfig, SwapConfig};
use crate::version::MigrationPolicy;
use crate::RuntimeConfig;

/// Every variable read by [`load`].
pub const ENV_KEYS: &[&str] = &[
    "UNIT_CORE_MANIFEST_DIR",
    "UNIT_CORE_HOOK_TIMEOUT_MS",
    "UNIT_CORE_DRAIN_TIMEOUT_MS",
    "UNIT_CORE_DELIVERY_TIMEOUT_MS",
    "UNIT_CORE_SWAP_CONFLICT",
    "UNIT_CORE_STRICT_MINOR_DOWNGRADE",
    "UNIT_CORE_GENERIC_BREAKING",
    "UNIT_CORE_MAX_CONCURRENT_LOADS",
    "UNIT_CORE_EVENT_CAPACITY",
    "UNIT_CORE_SHUTDOWN_TIMEOUT",
    "UNIT_CORE_LOG_FORMAT",
    "UNIT_CORE_LOG_LEVEL",
];

/// Effective runtime configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub manifest_dir: String,
    pub hook_timeout_ms: u64,
    pub drain_timeout_ms: u64,
    pub delivery_timeout_ms: u64,
    pub swap_conflict: String,
    pub strict_minor_downgrade: bool,
    pub generic_breaking: bool,
    pub max_concurrent_loads: usize,
    pub event_capacity: usize,
    pub shutdown_timeout_secs: u64,
    pub log_format: String,
    pub log_level: String,
}

/// All runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub manifest_dir: PathBuf,
    pub hook_timeout: Duration,
    pub drain_timeout: Duration,
    pub delivery_timeout: Duration,
    pub swap_conflict: ConflictPolicy,
    pub strict_minor_downgrade: bool,
    pub generic_breaking: bool,
    pub max_concurrent_loads: usize,
    pub event_capacity: usize,
    pub shutdown_timeout: Duration,
    pub log: LogConfig,
}

/// A value that was present but could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn parse_millis(key: &str, default: u64, floor: u64) -> Duration {
    Duration::from_millis(parse_or(key, default).max(floor))
}

fn load_log_config() -> LogConfig {
    let format = parse_or("UNIT_CORE_LOG_FORMAT", LogFormat::Json);
    let level = std::env::var("UNIT_CORE_LOG_LEVEL")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "info".to_string());
    LogConfig {
        format,
        level,
        ..LogConfig::default()
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let manifest_dir = std::env::var("UNIT_CORE_MANIFEST_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("units"));
    let shutdown_secs = parse_or("UNIT_CORE_SHUTDOWN_TIMEOUT", 30u64).max(1);

    EnvConfig {
        manifest_dir,
        hook_timeout: parse_millis("UNIT_CORE_HOOK_TIMEOUT_MS", 5000, 10),
        drain_timeout: parse_millis("UNIT_CORE_DRAIN_TIMEOUT_MS", 1000, 1),
        delivery_timeout: parse_millis("UNIT_CORE_DELIVERY_TIMEOUT_MS", 5000, 10),
        swap_conflict: parse_or("UNIT_CORE_SWAP_CONFLICT", ConflictPolicy::FailFast),
        strict_minor_downgrade: parse_bool("UNIT_CORE_STRICT_MINOR_DOWNGRADE", false),
        generic_breaking: parse_bool("UNIT_CORE_GENERIC_BREAKING", true),
        max_concurrent_loads: parse_or("UNIT_CORE_MAX_CONCURRENT_LOADS", num_cpus::get()).max(1),
        event_capacity: parse_or("UNIT_CORE_EVENT_CAPACITY", 256usize).max(1),
        shutdown_timeout: Duration::from_secs(shutdown_secs),
        log: load_log_config(),
    }
}

/// Report every set variable whose value was ignored or clamped.
pub fn validate() -> Vec<ConfigIssue> {
    let mut issues = Vec::new();
    let mut check = |key: &'static str, ok: &dyn Fn(&str) -> Result<(), String>| {
        if let Ok(value) = std::env::var(key) {
            if let Err(reason) = ok(value.trim()) {
                issues.push(ConfigIssue { key, value, reason });
            }
        }
    };

    let at_least = |floor: u64| {
        move |v: &str| match v.parse::<u64>() {
            Ok(n) if n >= floor => Ok(()),
            Ok(_) => Err(format!("below minimum {}", floor)),
            Err(e) => Err(e.to_string()),
        }
    };
    let boolean = |v: &str| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "0" | "false" | "no" | "off" => Ok(()),
        _ => Err("expected a boolean".to_string()),
    };

    check("UNIT_CORE_HOOK_TIMEOUT_MS", &at_least(10));
    check("UNIT_CORE_DRAIN_TIMEOUT_MS", &at_least(1));
    check("UNIT_CORE_DELIVERY_TIMEOUT_MS", &at_least(10));
    check("UNIT_CORE_MAX_CONCURRENT_LOADS", &at_least(1));
    check("UNIT_CORE_EVENT_CAPACITY", &at_least(1));
    check("UNIT_CORE_SHUTDOWN_TIMEOUT", &at_least(1));
    check("UNIT_CORE_STRICT_MINOR_DOWNGRADE", &boolean);
    check("UNIT_CORE_GENERIC_BREAKING", &boolean);
    check("UNIT_CORE_SWAP_CONFLICT", &|v: &str| v.parse::<ConflictPolicy>().map(|_| ()));
    check("UNIT_CORE_LOG_FORMAT", &|v: &str| v.parse::<LogFormat>().map(|_| ()).map_err(|e| e.to_string()));
    issues
}

impl EnvConfig {
    /// Convert to the configuration `Runtime` is built from.
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            manifest_dir: self.manifest_dir.clone(),
            registry: RegistryConfig {
                hook_timeout: self.hook_timeout,
                max_concurrent_loads: self.max_concurrent_loads,
                event_capacity: self.event_capacity,
            },
            swap: SwapConfig {
                conflict: self.swap_conflict,
                drain_timeout: self.drain_timeout,
            },
            migration: MigrationPolicy {
                generic_breaking: self.generic_breaking,
                strict_minor_downgrade: self.strict_minor_downgrade,
            },
            delivery_timeout: self.delivery_timeout,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            manifest_dir: self.manifest_dir.display().to_string(),
            hook_timeout_ms: self.hook_timeout.as_millis() as u64,
            drain_timeout_ms: self.drain_timeout.as_millis() as u64,
            delivery_timeout_ms: self.delivery_timeout.as_millis() as u64,
            swap_conflict: self.swap_conflict.as_str().to_string(),
            strict_minor_downgrade: self.strict_minor_downgrade,
            generic_breaking: self.generic_breaking,
            max_concurrent_loads: self.max_concurrent_loads,
            event_capacity: self.event_capacity,
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            log_format: self.log.format.as_str().to_string(),
            log_level: self.log.level.clone(),
        }
    }
}

/// Serializes env-mutating tests across modules.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg.manifest_dir, PathBuf::from("units"));
        assert_eq!(cfg.hook_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.drain_timeout, Duration::from_millis(1000));
        assert_eq!(cfg.delivery_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.swap_conflict, ConflictPolicy::FailFast);
        assert!(!cfg.strict_minor_downgrade);
        assert!(cfg.generic_breaking);
        assert_eq!(cfg.max_concurrent_loads, num_cpus::get().max(1));
        assert_eq!(cfg.event_capacity, 256);
        assert_eq!(cfg.shutdown_timeout.as_secs(), 30);
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("UNIT_CORE_MANIFEST_DIR", "/opt/units");
        std::env::set_var("UNIT_CORE_HOOK_TIMEOUT_MS", "250");
        std::env::set_var("UNIT_CORE_SWAP_CONFLICT", "wait");
        std::env::set_var("UNIT_CORE_STRICT_MINOR_DOWNGRADE", "true");
        std::env::set_var("UNIT_CORE_GENERIC_BREAKING", "0");
        std::env::set_var("UNIT_CORE_MAX_CONCURRENT_LOADS", "3");
        std::env::set_var("UNIT_CORE_LOG_FORMAT", "pretty");
        let cfg = load();
        assert_eq!(cfg.manifest_dir, PathBuf::from("/opt/units"));
        assert_eq!(cfg.hook_timeout, Duration::from_millis(250));
        assert_eq!(cfg.swap_conflict, ConflictPolicy::Wait);
        assert!(cfg.strict_minor_downgrade);
        assert!(!cfg.generic_breaking);
        assert_eq!(cfg.max_concurrent_loads, 3);
        assert_eq!(cfg.log.format, LogFormat::Pretty);

        let runtime = cfg.runtime_config();
        assert_eq!(runtime.registry.hook_timeout, Duration::from_millis(250));
        assert_eq!(runtime.swap.conflict, ConflictPolicy::Wait);
        assert!(runtime.migration.strict_minor_downgrade);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("UNIT_CORE_HOOK_TIMEOUT_MS", "soon");
        std::env::set_var("UNIT_CORE_SWAP_CONFLICT", "maybe");
        std::env::set_var("UNIT_CORE_GENERIC_BREAKING", "perhaps");
        let cfg = load();
        assert_eq!(cfg.hook_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.swap_conflict, ConflictPolicy::FailFast);
        assert!(cfg.generic_breaking);

        let keys: Vec<&str> = validate().iter().map(|i| i.key).collect();
        assert_eq!(
            keys,
            vec!["UNIT_CORE_HOOK_TIMEOUT_MS", "UNIT_CORE_GENERIC_BREAKING", "UNIT_CORE_SWAP_CONFLICT"]
        );
        clear_env_vars();
    }

    #[test]
    fn test_floors_applied() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("UNIT_CORE_HOOK_TIMEOUT_MS", "0");
        std::env::set_var("UNIT_CORE_EVENT_CAPACITY", "0");
        std::env::set_var("UNIT_CORE_SHUTDOWN_TIMEOUT", "0");
        let cfg = load();
        assert_eq!(cfg.hook_timeout, Duration::from_millis(10));
        assert_eq!(cfg.event_capacity, 1);
        assert_eq!(cfg.shutdown_timeout.as_secs(), 1);
        assert_eq!(validate().len(), 3);
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_serializes() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let eff = load().effective_config();
        assert_eq!(eff.swap_conflict, "fail");
        let json = serde_json::to_value(&eff).unwrap();
        assert_eq!(json["hook_timeout_ms"], 5000);
        assert_eq!(json["log_format"], "json");
    }
}
