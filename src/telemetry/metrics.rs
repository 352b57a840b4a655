//! Metric instrument factories for delayjob.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"delayjob"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for delayjob instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("delayjob")
}

/// Counter: jobs accepted by `enqueue`.
/// Labels: `handler`, `mode` ("immediate" | "persisted").
pub fn jobs_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("delayjob.jobs.enqueued")
        .with_description("Number of jobs enqueued")
        .build()
}

/// Counter: handler invocations.
/// Labels: `handler`, `result` ("completed" | "failed").
pub fn jobs_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("delayjob.jobs.dispatched")
        .with_description("Number of handler invocations")
        .build()
}

/// Counter: jobs that ended without completing.
/// Labels: `handler`, `reason` ("timeout" | "unresolvable" | "exhausted" | "corrupt").
pub fn jobs_dropped() -> Counter<u64> {
    meter()
        .u64_counter("delayjob.jobs.dropped")
        .with_description("Number of jobs dropped without completing")
        .build()
}

/// Counter: retry successors scheduled after a failed attempt.
/// Labels: `handler`.
pub fn jobs_retried() -> Counter<u64> {
    meter()
        .u64_counter("delayjob.jobs.retried")
        .with_description("Number of retries scheduled")
        .build()
}

/// Counter: due-job sweeps.
/// Labels: `trigger` ("timer" | "recovery" | "poll").
pub fn wakeups() -> Counter<u64> {
    meter()
        .u64_counter("delayjob.wakeups")
        .with_description("Number of due-job sweeps")
        .build()
}

/// Histogram: handler invocation duration in milliseconds.
/// Labels: `handler`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("delayjob.job.duration_ms")
        .with_description("Handler invocation duration in milliseconds")
        .with_unit("ms")
        .build()
}
