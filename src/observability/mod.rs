//! Observability subsystem for shardflow
//!
//! - Structured logging (JSON lines)
//! - Pipeline counters
//! - Typed lifecycle events
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on execution
//! 3. Deterministic output
//!
//! # Usage
//!
//! ```ignore
//! use shardflow::observability::{log_event_with_fields, Event, QueryMetrics};
//!
//! log_event_with_fields(Event::PartitionSplit, &[("range", "3")]);
//!
//! let metrics = QueryMetrics::new();
//! metrics.increment_splits();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsSnapshot, QueryMetrics};

/// Log a lifecycle event
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_fatal() {
        Severity::Fatal
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}

/// Log a lifecycle event at an explicit severity
pub fn log_event_at(severity: Severity, event: Event, fields: &[(&str, &str)]) {
    Logger::log(severity, event.as_str(), fields);
}
