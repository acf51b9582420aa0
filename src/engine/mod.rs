// src/engine/mod.rs

//! Run execution engine.
//!
//! The pure run state machine lives in [`core`]: it decides which tasks
//! form the next batch and cascades skips after a failure, without any
//! Tokio types or IO. The async shell in [`executor`] runs each batch on
//! a `JoinSet`, with retries and warehouse session checkout, and
//! [`report`] turns the final state into a [`RunReport`].

use std::fmt;

use serde::Serialize;

pub mod core;
pub mod executor;
pub mod report;

pub use self::core::RunState;
pub use executor::{Executor, ExecutorOptions};
pub use report::{RunReport, TaskReport};

/// Per-run state of a single task.
///
/// Moves only forward: `Pending -> Running -> Succeeded | Failed`, or
/// `Pending -> Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Whether `self -> next` is an allowed transition.
    pub fn can_become(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Skipped) | (Running, Succeeded) | (Running, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Overall state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}
