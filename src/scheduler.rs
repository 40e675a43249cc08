//! Default [`SchedulerAdapter`] for hosts without a scheduler of their own.
//!
//! - **foreground**: one dedicated OS thread (`proton-foreground`) drains a
//!   queue, so foreground handlers never overlap each other.
//! - **background**: tokio's blocking pool, on the runtime that was current
//!   when the scheduler was created.
//!
//! Hosts that already own a main loop (a game server tick, a UI loop)
//! implement [`SchedulerAdapter`] themselves and pass it to the session.

use std::sync::Arc;
use std::thread;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::{log_error, ProtonError, Result, SchedulerAdapter, Task};

/// Thread name of the foreground lane.
pub const FOREGROUND_THREAD: &str = "proton-foreground";

/// Foreground thread + blocking pool scheduler.
pub struct LaneScheduler {
    // ---
    foreground: mpsc::UnboundedSender<Task>,
    runtime: Handle,
}

impl LaneScheduler {
    // ---
    /// Start the foreground thread and capture the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ProtonError::Config`] when called outside a tokio runtime or when
    /// the foreground thread cannot be spawned.
    pub fn new() -> Result<Arc<Self>> {
        // ---
        let runtime = Handle::try_current()
            .map_err(|e| ProtonError::Config(format!("LaneScheduler needs a tokio runtime: {e}")))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();

        thread::Builder::new()
            .name(FOREGROUND_THREAD.to_string())
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    task();
                }
            })
            .map_err(|e| ProtonError::Config(format!("failed to start foreground lane: {e}")))?;

        Ok(Arc::new(Self {
            foreground: tx,
            runtime,
        }))
    }
}

impl SchedulerAdapter for LaneScheduler {
    // ---
    fn run_task(&self, task: Task) {
        if self.foreground.send(task).is_err() {
            log_error!("foreground lane stopped, task dropped");
        }
    }

    fn run_task_asynchronously(&self, task: Task) {
        // ---
        // The JoinHandle is detached; panics are contained by the task itself.
        let _ = self.runtime.spawn_blocking(task);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn foreground_runs_on_named_thread_in_order() {
        // ---
        let scheduler = LaneScheduler::new().unwrap();
        let (tx, rx) = std_mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            scheduler.run_task(Box::new(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            }));
        }

        for expected in 0..5 {
            let (i, name) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(i, expected);
            assert_eq!(name.as_deref(), Some(FOREGROUND_THREAD));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn background_runs_off_foreground() {
        // ---
        let scheduler = LaneScheduler::new().unwrap();
        let (tx, rx) = std_mpsc::channel();

        scheduler.run_task_asynchronously(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }));

        let name = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_ne!(name.as_deref(), Some(FOREGROUND_THREAD));
    }

    #[test]
    fn requires_runtime() {
        assert!(matches!(LaneScheduler::new(), Err(ProtonError::Config(_))));
    }
}
