//! The single wake-up timeline.
//!
//! Holds at most one armed instant. Enqueue re-arms only when a new due time
//! is sooner than the armed one; after each sweep the instant is recomputed
//! from the store's earliest pending row.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use crate::model::now_millis;

/// Why [`Timeline::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeUp {
    /// The armed instant has passed.
    Fired,
    /// [`Timeline::stop`] was called.
    Stopped,
}

pub(crate) struct Timeline {
    next: Mutex<Option<i64>>,
    rearmed: Notify,
    stopped: Notify,
}

impl Timeline {
    pub(crate) fn new() -> Self {
        Self {
            next: Mutex::new(None),
            rearmed: Notify::new(),
            stopped: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<i64>> {
        // The guarded value is a plain Option; a panic cannot leave it torn.
        self.next.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Currently armed instant, if any.
    pub(crate) fn next_wake_up(&self) -> Option<i64> {
        *self.lock()
    }

    /// Arm for `due_at` if nothing sooner is armed. Returns true if re-armed.
    pub(crate) fn arm(&self, due_at: i64) -> bool {
        let mut next = self.lock();
        match *next {
            Some(current) if current <= due_at => false,
            _ => {
                *next = Some(due_at);
                self.rearmed.notify_one();
                true
            }
        }
    }

    /// Replace the armed instant with whatever `lookahead` reports.
    ///
    /// The lookahead runs under the timeline lock so a concurrent `arm`
    /// cannot be overwritten by a stale value.
    pub(crate) fn recompute<E>(
        &self,
        lookahead: impl FnOnce() -> Result<Option<i64>, E>,
    ) -> Result<Option<i64>, E> {
        let mut next = self.lock();
        let due = lookahead()?;
        *next = due;
        self.rearmed.notify_one();
        Ok(due)
    }

    pub(crate) fn stop(&self) {
        self.stopped.notify_one();
    }

    /// Sleep until the armed instant passes or the timeline is stopped.
    ///
    /// Re-reads the armed instant whenever it changes.
    pub(crate) async fn wait(&self) -> WakeUp {
        loop {
            let deadline = self.next_wake_up();
            let sleep = async {
                match deadline {
                    // Rows are due strictly before the sweep time, so wake
                    // one millisecond past the instant.
                    Some(at) => {
                        let millis = at.saturating_sub(now_millis()).saturating_add(1).max(0);
                        tokio::time::sleep(Duration::from_millis(millis as u64)).await
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = self.stopped.notified() => return WakeUp::Stopped,
                _ = self.rearmed.notified() => continue,
                _ = sleep => {
                    let mut next = self.lock();
                    if *next == deadline {
                        *next = None;
                        return WakeUp::Fired;
                    }
                }
            }
        }
    }
}
