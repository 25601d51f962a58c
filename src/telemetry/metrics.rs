//! Metric instrument factories for ascmonitor-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"ascmonitor-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for ascmonitor-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("ascmonitor-rs")
}

/// Counter: events durably appended to the log.
/// Labels: `kind`.
pub fn events_appended() -> Counter<u64> {
    meter()
        .u64_counter("ascmonitor.events.appended")
        .with_description("Number of events appended to the log")
        .build()
}

/// Counter: stored records that failed to decode during a read.
pub fn corrupt_records() -> Counter<u64> {
    meter()
        .u64_counter("ascmonitor.events.corrupt")
        .with_description("Number of stored event records that failed to decode")
        .build()
}

/// Histogram: log operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("ascmonitor.log.duration_ms")
        .with_description("Event log operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
