//! Jobs persisted by one scheduler are recovered by the next one opened on
//! the same database file.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use delayjob::model::Payload;
use delayjob::{
    HandlerRegistry, JobBuilder, JobHandler, JobStore, Scheduler, SchedulerConfig, SqliteJobStore,
};
use serde_json::json;

struct Counter(Arc<AtomicUsize>);

#[async_trait]
impl JobHandler<()> for Counter {
    async fn perform_job(&self, _ctx: &(), _payload: &Payload) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst);
        true
    }
}

fn scheduler_on(path: &std::path::Path, calls: &Arc<AtomicUsize>) -> Scheduler<()> {
    let store = Arc::new(SqliteJobStore::open(path).unwrap());
    Scheduler::new(
        store,
        HandlerRegistry::empty().register("H", Counter(Arc::clone(calls))),
        SchedulerConfig::default(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_job_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.db");

    let first_calls = Arc::new(AtomicUsize::new(0));
    let first = scheduler_on(&path, &first_calls);
    first.initialize(()).unwrap();
    JobBuilder::new("H", json!({"remind": "water plants"}))
        .with_id(9)
        .with_delay(100)
        .unwrap()
        .perform(&first)
        .unwrap();
    first.shutdown();
    drop(first);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(first_calls.load(Ordering::SeqCst), 0);

    let second_calls = Arc::new(AtomicUsize::new(0));
    let second = scheduler_on(&path, &second_calls);
    second.initialize(()).unwrap();

    let mut waited = Duration::ZERO;
    while second_calls.load(Ordering::SeqCst) == 0 && waited < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);

    let store = SqliteJobStore::open(&path).unwrap();
    assert_eq!(store.count().unwrap(), 0);
    second.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn not_yet_due_job_is_rearmed_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.db");

    let first_calls = Arc::new(AtomicUsize::new(0));
    let first = scheduler_on(&path, &first_calls);
    first.initialize(()).unwrap();
    JobBuilder::new("H", json!(null))
        .with_delay(300)
        .unwrap()
        .perform(&first)
        .unwrap();
    first.shutdown();
    drop(first);

    let second_calls = Arc::new(AtomicUsize::new(0));
    let second = scheduler_on(&path, &second_calls);
    second.initialize(()).unwrap();
    assert!(second.next_wake_up().is_some());
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);

    let mut waited = Duration::ZERO;
    while second_calls.load(Ordering::SeqCst) == 0 && waited < Duration::from_secs(3) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    second.shutdown();
}
