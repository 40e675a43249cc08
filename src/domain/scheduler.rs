// src/domain/scheduler.rs

//! Execution lanes.
//!
//! The dispatch path never runs user callbacks itself. Each handler is tagged
//! with a lane at registration and its invocation is submitted to a
//! [`SchedulerAdapter`], which decides the actual thread. This keeps the
//! delivery path from blocking on the host's control loop, and keeps code
//! that touches host state off transport I/O threads.

use std::sync::Arc;

/// A unit of work submitted to a lane.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Where a handler runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExecutionLane {
    /// Serialized with the host's main control loop.
    #[default]
    Foreground,

    /// Any worker; may run concurrently with other handlers.
    Background,
}

impl ExecutionLane {
    // ---
    /// Hand `task` to the scheduler method matching this lane.
    pub fn submit(self, scheduler: &dyn SchedulerAdapter, task: Task) {
        match self {
            ExecutionLane::Foreground => scheduler.run_task(task),
            ExecutionLane::Background => scheduler.run_task_asynchronously(task),
        }
    }
}

/// Host facility that owns the threads handlers run on.
pub trait SchedulerAdapter: Send + Sync {
    /// Run on the foreground (serialized) lane.
    fn run_task(&self, task: Task);

    /// Run on a background worker.
    fn run_task_asynchronously(&self, task: Task);
}

/// Shared scheduler pointer.
pub type SchedulerPtr = Arc<dyn SchedulerAdapter>;
