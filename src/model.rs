//! Job descriptors and the fluent builder used to submit them.
//!
//! A job is identified for dedup purposes by its (handler, job id) pair.
//! The id alone is not unique: two handlers may reuse the same id without
//! affecting each other.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::{JobCodec, JobState};
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use crate::store::JobRow;

/// Passed to [`JobBuilder::with_timeout`] to indicate the job never times out.
pub const NO_TIMEOUT: i64 = -1;

/// Job id used when the caller does not care about dedup.
pub const NO_JOB_ID: i64 = -1;

/// Handler-specific data. The scheduler never interprets it.
pub type Payload = serde_json::Value;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Decode a payload into a concrete type. Intended for use inside handlers.
pub fn decode_payload<T: DeserializeOwned>(payload: &Payload) -> Result<T> {
    Ok(serde_json::from_value(payload.clone())?)
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// One job instance and its scheduling parameters.
///
/// Only obtainable through [`JobBuilder::build`] or by decoding a persisted
/// row, so every descriptor satisfies the builder's range checks. It has no
/// serde impls; rows carry a [`JobState`] instead.
///
/// ```compile_fail
/// let job: delayjob::JobDescriptor = serde_json::from_str("{}").unwrap();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    handler: String,
    job_id: i64,
    payload: Payload,
    start_delay_ms: i64,
    retry_count: i32,
    retry_delay_ms: i64,
    timeout_at: i64,
    replace_previous: bool,
}

impl JobDescriptor {
    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Delay from enqueue time before the first attempt. Zero runs now.
    pub fn start_delay_ms(&self) -> i64 {
        self.start_delay_ms
    }

    /// Remaining retry attempts.
    pub fn retry_count(&self) -> i32 {
        self.retry_count
    }

    pub fn retry_delay_ms(&self) -> i64 {
        self.retry_delay_ms
    }

    /// Absolute epoch-millis instant after which the job is abandoned,
    /// or [`NO_TIMEOUT`].
    pub fn timeout_at(&self) -> i64 {
        self.timeout_at
    }

    pub fn replace_previous(&self) -> bool {
        self.replace_previous
    }

    /// True if the job has a timeout and it has been reached at `now`.
    pub fn is_timed_out(&self, now: i64) -> bool {
        self.timeout_at != NO_TIMEOUT && self.timeout_at <= now
    }

    /// Due time when enqueued at `enqueued_at`.
    pub fn due_at(&self, enqueued_at: i64) -> i64 {
        enqueued_at.saturating_add(self.start_delay_ms)
    }

    /// The descriptor to schedule after a failed attempt, if any retries remain.
    ///
    /// The retry delay becomes the successor's start delay. The successor
    /// never replaces other pending jobs.
    pub fn retry_successor(&self) -> Option<JobDescriptor> {
        if self.retry_count <= 0 {
            return None;
        }
        Some(JobDescriptor {
            retry_count: self.retry_count - 1,
            start_delay_ms: self.retry_delay_ms,
            replace_previous: false,
            ..self.clone()
        })
    }

    /// Serialized per-job state stored in the row's fourth column.
    pub fn state(&self) -> JobState {
        JobState {
            retry_count: self.retry_count,
            retry_delay_ms: self.retry_delay_ms,
            timeout_at: self.timeout_at,
            payload: self.payload.clone(),
        }
    }

    /// Build the persisted row for this job, enqueued at `enqueued_at`.
    pub fn to_row(&self, enqueued_at: i64, codec: &dyn JobCodec) -> Result<JobRow> {
        Ok(JobRow {
            job_id: self.job_id,
            due_at: self.due_at(enqueued_at),
            handler: self.handler.clone(),
            state: codec.encode(&self.state())?,
        })
    }

    /// Rebuild a descriptor from a persisted row.
    ///
    /// A loaded row is already due, so the start delay is zero. The timeout
    /// is not checked here; pruning happens at dispatch.
    pub fn from_row(row: &JobRow, codec: &dyn JobCodec) -> Result<JobDescriptor> {
        let state = codec.decode(&row.state)?;
        if state.retry_count < 0 {
            return Err(Error::invalid("retry_count", "persisted value is negative"));
        }
        if state.retry_delay_ms < 0 {
            return Err(Error::invalid(
                "retry_delay_ms",
                "persisted value is negative",
            ));
        }
        Ok(JobDescriptor {
            handler: row.handler.clone(),
            job_id: row.job_id,
            payload: state.payload,
            start_delay_ms: 0,
            retry_count: state.retry_count,
            retry_delay_ms: state.retry_delay_ms,
            timeout_at: state.timeout_at,
            replace_previous: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Fluent builder for jobs. The public API for submitting work.
///
/// Range-checked setters return `Result<Self>` and fail with
/// [`Error::InvalidArgument`] naming the field; on error the builder is
/// consumed and nothing is scheduled.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    descriptor: JobDescriptor,
}

impl JobBuilder {
    pub fn new(handler: impl Into<String>, payload: Payload) -> Self {
        Self {
            descriptor: JobDescriptor {
                handler: handler.into(),
                job_id: NO_JOB_ID,
                payload,
                start_delay_ms: 0,
                retry_count: 0,
                retry_delay_ms: 0,
                timeout_at: NO_TIMEOUT,
                replace_previous: false,
            },
        }
    }

    /// Start a job whose payload is the JSON form of `value`.
    pub fn serialized<T: Serialize>(handler: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::new(handler, serde_json::to_value(value)?))
    }

    /// Id scoped to the handler; used by `replace_previous` and `remove_jobs`.
    pub fn with_id(mut self, job_id: i64) -> Self {
        self.descriptor.job_id = job_id;
        self
    }

    /// Delay before the first attempt. Zero performs the job immediately.
    pub fn with_delay(mut self, delay_ms: i64) -> Result<Self> {
        if delay_ms < 0 {
            return Err(Error::invalid("delay", format!("{delay_ms}ms is negative")));
        }
        self.descriptor.start_delay_ms = delay_ms;
        Ok(self)
    }

    /// Number of times to retry after the handler reports failure.
    pub fn with_retry_count(mut self, retry_count: i32) -> Result<Self> {
        if retry_count < 0 {
            return Err(Error::invalid(
                "retry_count",
                format!("{retry_count} is negative"),
            ));
        }
        self.descriptor.retry_count = retry_count;
        Ok(self)
    }

    /// Delay applied before each retry.
    pub fn with_retry_delay(mut self, delay_ms: i64) -> Result<Self> {
        if delay_ms < 0 {
            return Err(Error::invalid(
                "retry_delay",
                format!("{delay_ms}ms is negative"),
            ));
        }
        self.descriptor.retry_delay_ms = delay_ms;
        Ok(self)
    }

    /// Absolute epoch-millis instant at which the job stops being valid,
    /// or [`NO_TIMEOUT`]. Must lie in the future.
    pub fn with_timeout(mut self, timeout_at: i64) -> Result<Self> {
        if timeout_at != NO_TIMEOUT && timeout_at <= now_millis() {
            return Err(Error::invalid(
                "timeout",
                format!("{timeout_at} is not in the future; use NO_TIMEOUT to disable"),
            ));
        }
        self.descriptor.timeout_at = timeout_at;
        Ok(self)
    }

    /// Delete pending jobs with the same handler and id before scheduling.
    pub fn replace_previous(mut self, replace: bool) -> Self {
        self.descriptor.replace_previous = replace;
        self
    }

    pub fn build(self) -> JobDescriptor {
        self.descriptor
    }

    /// Schedule the job on `scheduler`.
    pub fn perform<C>(self, scheduler: &Scheduler<C>) -> Result<()>
    where
        C: Send + Sync + 'static,
    {
        scheduler.enqueue(self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use serde_json::json;

    #[test]
    fn builder_applies_defaults() {
        let job = JobBuilder::new("mailer", json!({"to": "a@b.c"})).build();
        assert_eq!(job.handler(), "mailer");
        assert_eq!(job.job_id(), NO_JOB_ID);
        assert_eq!(job.start_delay_ms(), 0);
        assert_eq!(job.retry_count(), 0);
        assert_eq!(job.retry_delay_ms(), 0);
        assert_eq!(job.timeout_at(), NO_TIMEOUT);
        assert!(!job.replace_previous());
    }

    #[test]
    fn negative_values_are_rejected_with_field_name() {
        let err = JobBuilder::new("h", json!(null)).with_delay(-1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { field: "delay", .. }));

        let err = JobBuilder::new("h", json!(null))
            .with_retry_count(-3)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidArgument {
                field: "retry_count",
                ..
            }
        ));

        let err = JobBuilder::new("h", json!(null))
            .with_retry_delay(-10)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidArgument {
                field: "retry_delay",
                ..
            }
        ));
    }

    #[test]
    fn timeout_in_the_past_is_rejected() {
        let err = JobBuilder::new("h", json!(null))
            .with_timeout(now_millis() - 1)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { field: "timeout", .. }));
    }

    #[test]
    fn no_timeout_and_future_timeout_are_accepted() {
        let future = now_millis() + 60_000;
        let job = JobBuilder::new("h", json!(null))
            .with_timeout(NO_TIMEOUT)
            .unwrap()
            .with_timeout(future)
            .unwrap()
            .build();
        assert_eq!(job.timeout_at(), future);
        assert!(!job.is_timed_out(future - 1));
        assert!(job.is_timed_out(future));
    }

    #[test]
    fn retry_successor_decrements_and_uses_retry_delay() {
        let job = JobBuilder::new("h", json!({"n": 1}))
            .with_id(7)
            .with_delay(2_000)
            .unwrap()
            .with_retry_count(2)
            .unwrap()
            .with_retry_delay(500)
            .unwrap()
            .replace_previous(true)
            .build();

        let next = job.retry_successor().expect("two retries left");
        assert_eq!(next.retry_count(), 1);
        assert_eq!(next.start_delay_ms(), 500);
        assert_eq!(next.job_id(), 7);
        assert!(!next.replace_previous());

        let last = next.retry_successor().expect("one retry left");
        assert_eq!(last.retry_count(), 0);
        assert!(last.retry_successor().is_none());
    }

    #[test]
    fn row_carries_due_time_and_state() {
        let job = JobBuilder::new("h", json!({"k": "v"}))
            .with_id(42)
            .with_delay(1_500)
            .unwrap()
            .with_retry_count(3)
            .unwrap()
            .build();

        let row = job.to_row(10_000, &JsonCodec).unwrap();
        assert_eq!(row.job_id, 42);
        assert_eq!(row.due_at, 11_500);
        assert_eq!(row.handler, "h");

        let loaded = JobDescriptor::from_row(&row, &JsonCodec).unwrap();
        assert_eq!(loaded.retry_count(), 3);
        assert_eq!(loaded.payload(), &json!({"k": "v"}));
        assert_eq!(loaded.start_delay_ms(), 0);
    }

    #[test]
    fn row_with_negative_retry_count_is_rejected() {
        let state = JobState {
            retry_count: -1,
            retry_delay_ms: 0,
            timeout_at: NO_TIMEOUT,
            payload: json!(null),
        };
        let row = JobRow {
            job_id: 1,
            due_at: 0,
            handler: "h".into(),
            state: JsonCodec.encode(&state).unwrap(),
        };
        assert!(JobDescriptor::from_row(&row, &JsonCodec).is_err());
    }

    #[test]
    fn row_with_negative_retry_delay_is_rejected() {
        let state = JobState {
            retry_count: 2,
            retry_delay_ms: -7,
            timeout_at: NO_TIMEOUT,
            payload: json!(null),
        };
        let row = JobRow {
            job_id: 1,
            due_at: 0,
            handler: "h".into(),
            state: JsonCodec.encode(&state).unwrap(),
        };
        let err = JobDescriptor::from_row(&row, &JsonCodec).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidArgument {
                field: "retry_delay_ms",
                ..
            }
        ));
    }

    #[test]
    fn serialized_payload_decodes_back() {
        use serde::Deserialize;

        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Reminder {
            text: String,
        }
        let job = JobBuilder::serialized(
            "remind",
            &Reminder {
                text: "stand up".into(),
            },
        )
        .unwrap()
        .build();
        let back: Reminder = decode_payload(job.payload()).unwrap();
        assert_eq!(back.text, "stand up");
    }
}
