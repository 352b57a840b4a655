//! Runs due jobs: timeout pruning, handler resolution, invocation and the
//! retry-or-drop decision.
//!
//! The dispatcher never touches the store. It reports an outcome and the
//! scheduler persists any retry successor through its normal enqueue path.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, warn};

use crate::handler::HandlerRegistry;
use crate::model::{JobDescriptor, now_millis};
use crate::telemetry::job::{record_outcome, start_job_span};
use crate::telemetry::metrics;

/// How one dispatch attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Handler reported success. Terminal.
    Completed,
    /// Handler reported failure with retries left; carries the successor.
    Retry(JobDescriptor),
    /// Handler reported failure with no retries left. Terminal.
    Exhausted,
    /// The timeout had passed before the job could run. Terminal.
    TimedOut,
    /// No handler could be resolved for the identifier. Terminal.
    Unresolvable,
}

impl DispatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Completed => "completed",
            DispatchOutcome::Retry(_) => "retry",
            DispatchOutcome::Exhausted => "exhausted",
            DispatchOutcome::TimedOut => "timeout",
            DispatchOutcome::Unresolvable => "unresolvable",
        }
    }
}

/// Executes jobs on the tokio runtime with bounded concurrency.
pub struct Dispatcher<C> {
    registry: Arc<HandlerRegistry<C>>,
    permits: Arc<Semaphore>,
}

impl<C> Dispatcher<C>
where
    C: Send + Sync + 'static,
{
    /// `max_concurrent` bounds simultaneous handler invocations; values
    /// below one are treated as one.
    pub fn new(registry: HandlerRegistry<C>, max_concurrent: usize) -> Self {
        Self {
            registry: Arc::new(registry),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry<C> {
        &self.registry
    }

    /// Run one due job and decide what happens to it next.
    ///
    /// A handler that panics counts as a failed attempt.
    pub async fn dispatch(&self, ctx: Arc<C>, job: JobDescriptor) -> DispatchOutcome {
        let handler_name = KeyValue::new("handler", job.handler().to_string());

        if job.is_timed_out(now_millis()) {
            warn!(
                handler = job.handler(),
                job_id = job.job_id(),
                timeout_at = job.timeout_at(),
                "job timed out before dispatch, dropping"
            );
            metrics::jobs_dropped().add(1, &[handler_name, KeyValue::new("reason", "timeout")]);
            return DispatchOutcome::TimedOut;
        }

        let handler = match self.registry.resolve(job.handler()) {
            Ok(handler) => handler,
            Err(e) => {
                error!(
                    handler = job.handler(),
                    job_id = job.job_id(),
                    "cannot resolve handler, dropping job: {e}"
                );
                metrics::jobs_dropped().add(
                    1,
                    &[handler_name, KeyValue::new("reason", "unresolvable")],
                );
                return DispatchOutcome::Unresolvable;
            }
        };

        // Closed only if the dispatcher is torn down; run unbounded then.
        let _permit = self.permits.acquire().await.ok();

        let span = start_job_span(job.handler(), job.job_id(), job.retry_count());
        let started = Instant::now();
        let payload = job.payload().clone();
        let invocation = tokio::spawn(
            async move { handler.perform_job(&ctx, &payload).await }.instrument(span.clone()),
        );
        let completed = match invocation.await {
            Ok(completed) => completed,
            Err(e) => {
                error!(handler = job.handler(), job_id = job.job_id(), "handler panicked: {e}");
                false
            }
        };
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        metrics::job_duration_ms().record(duration_ms, std::slice::from_ref(&handler_name));
        metrics::jobs_dispatched().add(
            1,
            &[
                handler_name.clone(),
                KeyValue::new("result", if completed { "completed" } else { "failed" }),
            ],
        );

        let outcome = if completed {
            debug!(handler = job.handler(), job_id = job.job_id(), duration_ms, "job completed");
            DispatchOutcome::Completed
        } else {
            match job.retry_successor() {
                Some(next) => DispatchOutcome::Retry(next),
                None => {
                    info!(
                        handler = job.handler(),
                        job_id = job.job_id(),
                        "job failed with no retries left, dropping"
                    );
                    metrics::jobs_dropped()
                        .add(1, &[handler_name, KeyValue::new("reason", "exhausted")]);
                    DispatchOutcome::Exhausted
                }
            }
        };
        record_outcome(&span, outcome.label());
        outcome
    }
}
