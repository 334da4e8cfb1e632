//! Recorders on the `metrics` facade.
//!
//! Whatever recorder the embedding application installs receives these;
//! counts that feed CLI status output are mirrored into a [`MetricsStore`].

use std::time::Duration;

use ::metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

use super::store::MetricsStore;

pub const LOADS_TOTAL: &str = "unit_core_loads_total";
pub const LOAD_FAILURES_TOTAL: &str = "unit_core_load_failures_total";
pub const UNLOADS_TOTAL: &str = "unit_core_unloads_total";
pub const SWAPS_TOTAL: &str = "unit_core_swaps_total";
pub const SWAP_FAILURES_TOTAL: &str = "unit_core_swap_failures_total";
pub const MESSAGES_TOTAL: &str = "unit_core_messages_total";
pub const HOOK_DURATION_SECONDS: &str = "unit_core_hook_duration_seconds";
pub const SWAP_DURATION_SECONDS: &str = "unit_core_swap_duration_seconds";

/// Register descriptions with the installed recorder. Safe to call more than once.
pub fn init_metrics() {
    describe_counter!(LOADS_TOTAL, "Units that reached active through a load");
    describe_counter!(LOAD_FAILURES_TOTAL, "Loads that ended in failed");
    describe_counter!(UNLOADS_TOTAL, "Units unloaded");
    describe_counter!(SWAPS_TOTAL, "Committed hot-swaps, rollbacks and reloads");
    describe_counter!(SWAP_FAILURES_TOTAL, "Hot-swaps that were refused or rolled back");
    describe_counter!(MESSAGES_TOTAL, "Message deliveries by type and outcome");
    describe_histogram!(HOOK_DURATION_SECONDS, Unit::Seconds, "Unit hook execution time");
    describe_histogram!(SWAP_DURATION_SECONDS, Unit::Seconds, "End-to-end hot-swap time");
}

pub fn record_load(store: &MetricsStore, unit: &str, ok: bool) {
    let name = if ok { LOADS_TOTAL } else { LOAD_FAILURES_TOTAL };
    counter!(name, "unit" => unit.to_string()).increment(1);
    store.increment_counter(name, 1);
}

pub fn record_unload(store: &MetricsStore, unit: &str) {
    counter!(UNLOADS_TOTAL, "unit" => unit.to_string()).increment(1);
    store.increment_counter(UNLOADS_TOTAL, 1);
}

pub fn record_swap(store: &MetricsStore, unit: &str, change: &str, ok: bool, elapsed: Duration) {
    let name = if ok { SWAPS_TOTAL } else { SWAP_FAILURES_TOTAL };
    counter!(name, "unit" => unit.to_string(), "change" => change.to_string()).increment(1);
    store.increment_counter(name, 1);
    if ok {
        histogram!(SWAP_DURATION_SECONDS, "unit" => unit.to_string()).record(elapsed.as_secs_f64());
        store.record_histogram(SWAP_DURATION_SECONDS, elapsed.as_secs_f64());
    }
}

pub fn record_message(kind: &str, ok: bool) {
    let outcome = if ok { "delivered" } else { "failed" };
    counter!(MESSAGES_TOTAL, "type" => kind.to_string(), "outcome" => outcome).increment(1);
}

pub fn record_hook(hook: &str, elapsed: Duration, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    histogram!(HOOK_DURATION_SECONDS, "hook" => hook.to_string(), "outcome" => outcome)
        .record(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_mirror_into_store() {
        let store = MetricsStore::new();
        record_load(&store, "a", true);
        record_load(&store, "a", false);
        record_swap(&store, "a", "upgrade", true, Duration::from_millis(12));
        record_unload(&store, "a");

        let snapshot = store.snapshot();
        assert_eq!(snapshot.counters[LOADS_TOTAL], 1);
        assert_eq!(snapshot.counters[LOAD_FAILURES_TOTAL], 1);
        assert_eq!(snapshot.counters[SWAPS_TOTAL], 1);
        assert_eq!(snapshot.histograms[SWAP_DURATION_SECONDS].count, 1);
    }

    #[test]
    fn test_facade_without_recorder_is_noop() {
        init_metrics();
        record_message("ping", true);
        record_hook("init", Duration::from_millis(1), false);
    }
}
