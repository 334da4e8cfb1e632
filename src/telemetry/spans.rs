//! Span helpers for lifecycle operations.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;

    /// Record the version transition handled by the span.
    fn record_versions(&self, from: &dyn std::fmt::Display, to: &dyn std::fmt::Display);
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }

    fn record_versions(&self, from: &dyn std::fmt::Display, to: &dyn std::fmt::Display) {
        self.record("from_version", from.to_string().as_str());
        self.record("to_version", to.to_string().as_str());
    }
}

/// Factory for lifecycle operation spans.
pub struct LifecycleSpan;

impl LifecycleSpan {
    /// Span for one operation (`load`, `unload`, `hot_swap`, ...) on one unit.
    ///
    /// `status`, `error.message`, `duration_ms`, `from_version` and
    /// `to_version` start empty and are filled in as the operation proceeds.
    pub fn new(operation: &str, unit: &str) -> Span {
        info_span!(
            "unit_operation",
            operation = %operation,
            unit = %unit,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
            from_version = tracing::field::Empty,
            to_version = tracing::field::Empty,
        )
    }
}
