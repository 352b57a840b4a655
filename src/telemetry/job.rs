//! Job execution span helpers.

use tracing::Span;

/// Start a span covering one handler invocation.
///
/// `job.outcome` is declared empty and filled by [`record_outcome`].
pub fn start_job_span(handler: &str, job_id: i64, retries_left: i32) -> Span {
    tracing::info_span!(
        "job.perform",
        "job.handler" = handler,
        "job.id" = job_id,
        "job.retries_left" = retries_left,
        "job.outcome" = tracing::field::Empty,
    )
}

/// Record how the invocation ended on its span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("job.outcome", outcome);
    span.in_scope(|| {
        tracing::debug!(outcome, "job_outcome");
    });
}
