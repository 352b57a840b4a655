//! The scheduler: public API for enqueuing, removing and sweeping jobs.
//!
//! A `Scheduler` is the explicit context shared by the store, the dispatcher
//! and the wake-up timeline. It is cheap to clone; clones share state.
//! Call [`Scheduler::initialize`] once at process start before anything
//! else.

mod timeline;

use std::sync::{Arc, OnceLock};

use opentelemetry::KeyValue;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::codec::{JobCodec, JsonCodec};
use crate::config::SchedulerConfig;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::{Error, Result};
use crate::handler::HandlerRegistry;
use crate::model::{JobBuilder, JobDescriptor, Payload, now_millis};
use crate::store::{JobRow, JobStore};
use crate::telemetry::metrics;

use timeline::{Timeline, WakeUp};

/// Delay before sweeping again after a failed sweep.
const RETRY_AFTER_ERROR_MS: i64 = 1_000;

/// State that only exists once `initialize` has run.
struct Initialized<C> {
    ctx: Arc<C>,
    runtime: Handle,
}

struct Shared<C> {
    store: Arc<dyn JobStore>,
    codec: Arc<dyn JobCodec>,
    dispatcher: Dispatcher<C>,
    timeline: Timeline,
    initialized: OnceLock<Initialized<C>>,
}

/// Durable delayed-job scheduler.
pub struct Scheduler<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for Scheduler<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> Scheduler<C>
where
    C: Send + Sync + 'static,
{
    /// Build a scheduler over `store` with the JSON codec.
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: HandlerRegistry<C>,
        config: SchedulerConfig,
    ) -> Self {
        Self::with_codec(store, registry, config, Arc::new(JsonCodec))
    }

    pub fn with_codec(
        store: Arc<dyn JobStore>,
        registry: HandlerRegistry<C>,
        config: SchedulerConfig,
        codec: Arc<dyn JobCodec>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                codec,
                dispatcher: Dispatcher::new(registry, config.max_concurrent),
                timeline: Timeline::new(),
                initialized: OnceLock::new(),
            }),
        }
    }

    /// Attach the host context, start the wake-up timeline and recover any
    /// jobs that fell due while the process was down.
    ///
    /// Must be called from within a tokio runtime. A second call fails with
    /// [`Error::AlreadyInitialized`].
    ///
    /// A failed recovery sweep is not returned: the scheduler is already
    /// live, so the error is logged and the sweep retried from the timeline.
    pub fn initialize(&self, ctx: impl Into<Arc<C>>) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Other(format!("initialize requires a tokio runtime: {e}")))?;

        self.shared
            .initialized
            .set(Initialized {
                ctx: ctx.into(),
                runtime: runtime.clone(),
            })
            .map_err(|_| Error::AlreadyInitialized)?;

        info!(
            handlers = ?self.shared.dispatcher.registry().names(),
            "scheduler initialized"
        );

        runtime.spawn(run_timeline(self.clone()));

        metrics::wakeups().add(1, &[KeyValue::new("trigger", "recovery")]);
        match self.run_due_jobs(now_millis()) {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "recovered overdue jobs"),
            Err(e) => {
                error!("recovery sweep error: {e}, retrying in {RETRY_AFTER_ERROR_MS}ms");
                self.shared.timeline.arm(now_millis() + RETRY_AFTER_ERROR_MS);
            }
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.get().is_some()
    }

    /// Start building a job. Finish with [`JobBuilder::perform`].
    pub fn job(&self, handler: impl Into<String>, payload: Payload) -> JobBuilder {
        JobBuilder::new(handler, payload)
    }

    /// Schedule a job.
    ///
    /// A zero start delay dispatches it at once without touching the store.
    /// Otherwise the row is persisted and the timeline armed for its due
    /// time if that is sooner than the armed wake-up.
    ///
    /// After [`shutdown`](Self::shutdown) rows are still persisted but no
    /// wake-up fires for them in this process; the next `initialize` over
    /// the same store recovers them.
    pub fn enqueue(&self, job: JobDescriptor) -> Result<()> {
        let init = self.initialized()?;
        let store = &self.shared.store;

        if job.replace_previous() {
            let replaced = store.delete_by_handler_and_id(job.handler(), job.job_id())?;
            if replaced > 0 {
                debug!(
                    handler = job.handler(),
                    job_id = job.job_id(),
                    replaced,
                    "replaced pending jobs"
                );
            }
        }

        let handler_label = KeyValue::new("handler", job.handler().to_string());

        if job.start_delay_ms() == 0 {
            debug!(handler = job.handler(), job_id = job.job_id(), "dispatching immediately");
            metrics::jobs_enqueued()
                .add(1, &[handler_label, KeyValue::new("mode", "immediate")]);
            self.dispatch_batch(init, vec![job]);
            return Ok(());
        }

        let row = job.to_row(now_millis(), self.shared.codec.as_ref())?;
        store.insert(&row)?;
        metrics::jobs_enqueued().add(1, &[handler_label, KeyValue::new("mode", "persisted")]);

        let rearmed = self.shared.timeline.arm(row.due_at);
        debug!(
            handler = job.handler(),
            job_id = job.job_id(),
            due_at = row.due_at,
            rearmed,
            "job persisted"
        );
        Ok(())
    }

    /// Load every row due before `now`, remove it from the store and hand
    /// the batch to the dispatcher in ascending due order.
    ///
    /// Rows that fail to decode are logged and dropped. Returns the number
    /// of jobs dispatched.
    pub fn run_due_jobs(&self, now: i64) -> Result<usize> {
        let init = self.initialized()?;
        let rows = self.shared.store.take_due_before(now)?;

        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            match JobDescriptor::from_row(&row, self.shared.codec.as_ref()) {
                Ok(job) => batch.push(job),
                Err(e) => {
                    warn!(
                        handler = %row.handler,
                        job_id = row.job_id,
                        due_at = row.due_at,
                        "dropping unreadable job row: {e}"
                    );
                    metrics::jobs_dropped().add(
                        1,
                        &[
                            KeyValue::new("handler", row.handler.clone()),
                            KeyValue::new("reason", "corrupt"),
                        ],
                    );
                }
            }
        }

        let dispatched = batch.len();
        if dispatched > 0 {
            debug!(dispatched, now, "dispatching due jobs");
        }
        self.dispatch_batch(init, batch);

        let store = &self.shared.store;
        self.shared.timeline.recompute(|| store.next_due_at())?;
        Ok(dispatched)
    }

    /// Delete pending jobs for `handler` with `job_id`.
    ///
    /// Jobs already handed to the dispatcher are unaffected. Returns the
    /// number of rows removed.
    pub fn remove_jobs(&self, handler: &str, job_id: i64) -> Result<usize> {
        self.initialized()?;
        let removed = self.shared.store.delete_by_handler_and_id(handler, job_id)?;
        debug!(handler, job_id, removed, "removed pending jobs");
        Ok(removed)
    }

    /// Pending rows in due order.
    pub fn pending_jobs(&self) -> Result<Vec<JobRow>> {
        self.initialized()?;
        self.shared.store.list()
    }

    /// Epoch millis of the armed wake-up, if any.
    pub fn next_wake_up(&self) -> Option<i64> {
        self.shared.timeline.next_wake_up()
    }

    /// Stop the wake-up timeline. Pending rows stay in the store and are
    /// recovered by the next process's `initialize`.
    ///
    /// The scheduler stays initialized: `enqueue` keeps working, immediate
    /// jobs still run and delayed ones are only persisted.
    pub fn shutdown(&self) {
        info!("scheduler shutting down");
        self.shared.timeline.stop();
    }

    fn initialized(&self) -> Result<&Initialized<C>> {
        self.shared.initialized.get().ok_or(Error::NotInitialized)
    }

    fn dispatch_batch(&self, init: &Initialized<C>, jobs: Vec<JobDescriptor>) {
        for job in jobs {
            let scheduler = self.clone();
            let ctx = Arc::clone(&init.ctx);
            init.runtime.spawn(async move {
                let outcome = scheduler.shared.dispatcher.dispatch(ctx, job).await;
                scheduler.apply_outcome(outcome);
            });
        }
    }

    fn apply_outcome(&self, outcome: DispatchOutcome) {
        let DispatchOutcome::Retry(next) = outcome else {
            return;
        };

        info!(
            handler = next.handler(),
            job_id = next.job_id(),
            retries_left = next.retry_count(),
            retry_delay_ms = next.start_delay_ms(),
            "job failed, scheduling retry"
        );
        metrics::jobs_retried().add(1, &[KeyValue::new("handler", next.handler().to_string())]);

        if let Err(e) = self.enqueue(next) {
            error!("failed to schedule retry: {e}");
        }
    }
}

async fn run_timeline<C>(scheduler: Scheduler<C>)
where
    C: Send + Sync + 'static,
{
    loop {
        match scheduler.shared.timeline.wait().await {
            WakeUp::Stopped => {
                debug!("wake-up timeline stopped");
                return;
            }
            WakeUp::Fired => {
                metrics::wakeups().add(1, &[KeyValue::new("trigger", "timer")]);
                if let Err(e) = scheduler.run_due_jobs(now_millis()) {
                    error!("run_due_jobs error: {e}, retrying in {RETRY_AFTER_ERROR_MS}ms");
                    scheduler
                        .shared
                        .timeline
                        .arm(now_millis() + RETRY_AFTER_ERROR_MS);
                }
            }
        }
    }
}
