//! Telemetry: structured logging, lifecycle spans and metrics.
//!
//! Nothing here opens a network connection; exporters belong to the host.

mod logging;
mod metrics;
mod spans;
mod store;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    init_metrics, record_hook, record_load, record_message, record_swap, record_unload, HOOK_DURATION_SECONDS,
    LOADS_TOTAL, LOAD_FAILURES_TOTAL, MESSAGES_TOTAL, SWAPS_TOTAL, SWAP_DURATION_SECONDS, SWAP_FAILURES_TOTAL,
    UNLOADS_TOTAL,
};
pub use spans::{LifecycleSpan, SpanExt};
pub use store::{HistogramSummary, MetricsSnapshot, MetricsStore};
