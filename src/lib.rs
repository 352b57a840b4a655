//! # delayjob
//!
//! Durable delayed-job scheduler for long-lived host processes.
//!
//! Jobs run immediately or after a delay, with optional retries, a hard
//! timeout and dedup by (handler, id). Jobs whose delay has not elapsed are
//! kept in SQLite and survive restarts.

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use codec::{JobCodec, JobState, JsonCodec};
pub use config::{Config, SchedulerConfig};
pub use error::{Error, Result};
pub use handler::{HandlerRegistry, JobHandler};
pub use model::{JobBuilder, JobDescriptor, NO_JOB_ID, NO_TIMEOUT, Payload};
pub use scheduler::Scheduler;
pub use store::{JobRow, JobStore, SqliteJobStore};
