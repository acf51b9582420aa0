// src/engine/core.rs

//! Pure run state machine.
//!
//! [`RunState`] owns the per-run status of every task and answers two
//! questions for the async shell:
//! - which tasks form the next batch (`next_batch`)
//! - which tasks are skipped after a failure (`record_failure`)
//!
//! It has no channels, no Tokio types, and performs no IO, so it can be
//! driven step by step from tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::Graph;
use crate::engine::{RunStatus, TaskStatus};
use crate::types::TaskId;

#[derive(Debug)]
pub struct RunState {
    graph: Arc<Graph>,
    statuses: HashMap<TaskId, TaskStatus>,
    succeeded: HashSet<TaskId>,
    status: RunStatus,
}

impl RunState {
    /// Every task `Pending`, run `NotStarted`.
    pub fn new(graph: Arc<Graph>) -> Self {
        let statuses = graph
            .tasks()
            .map(|t| (t.id.clone(), TaskStatus::Pending))
            .collect();
        Self {
            graph,
            statuses,
            succeeded: HashSet::new(),
            status: RunStatus::NotStarted,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.statuses.get(id).copied()
    }

    /// Tasks currently in `status`, in insertion order.
    pub fn tasks_in(&self, status: TaskStatus) -> Vec<TaskId> {
        self.graph
            .tasks()
            .filter(|t| self.statuses.get(&t.id) == Some(&status))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Ready `Pending` tasks, marked `Running`.
    ///
    /// The first call starts the run. An empty batch means nothing else can
    /// run; call [`finish`](Self::finish) once the current batch has been
    /// recorded.
    pub fn next_batch(&mut self) -> Vec<TaskId> {
        if self.status == RunStatus::NotStarted {
            self.status = RunStatus::Running;
            info!(tasks = self.graph.len(), "run started");
        }
        if self.status != RunStatus::Running {
            return Vec::new();
        }

        let batch: Vec<TaskId> = self
            .graph
            .ready_tasks(&self.succeeded)
            .into_iter()
            .filter(|id| self.status_of(id) == Some(TaskStatus::Pending))
            .collect();

        for id in &batch {
            self.transition(id, TaskStatus::Running);
        }
        if !batch.is_empty() {
            debug!(batch = ?batch, "next batch");
        }
        batch
    }

    pub fn record_success(&mut self, id: &str) {
        if self.transition(id, TaskStatus::Succeeded) {
            self.succeeded.insert(id.to_string());
        }
    }

    /// Mark `id` failed and skip every `Pending` task downstream of it.
    ///
    /// Returns the newly skipped tasks.
    pub fn record_failure(&mut self, id: &str) -> Vec<TaskId> {
        if !self.transition(id, TaskStatus::Failed) {
            return Vec::new();
        }

        let mut skipped = Vec::new();
        for down in self.graph.descendants(id) {
            if self.status_of(&down) == Some(TaskStatus::Pending)
                && self.transition(&down, TaskStatus::Skipped)
            {
                skipped.push(down);
            }
        }
        if !skipped.is_empty() {
            info!(task = %id, skipped = ?skipped, "skipping downstream tasks after failure");
        }
        skipped
    }

    /// Whether every task reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.statuses.values().all(|s| s.is_terminal())
    }

    /// Close the run: `Failed` if any task failed, else `Completed`.
    pub fn finish(&mut self) -> RunStatus {
        if matches!(self.status, RunStatus::Completed | RunStatus::Failed) {
            return self.status;
        }

        if !self.is_settled() {
            let leftover = self.tasks_in(TaskStatus::Pending);
            warn!(tasks = ?leftover, "run finished with tasks that never became ready");
        }

        let failed = self.statuses.values().any(|s| *s == TaskStatus::Failed);
        self.status = if failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        info!(status = %self.status, "run finished");
        self.status
    }

    /// Apply a transition, ignoring (and logging) invalid ones.
    fn transition(&mut self, id: &str, next: TaskStatus) -> bool {
        let Some(current) = self.statuses.get_mut(id) else {
            warn!(task = %id, to = %next, "ignoring transition for unknown task");
            return false;
        };
        if !current.can_become(next) {
            warn!(task = %id, from = %*current, to = %next, "ignoring invalid state transition");
            return false;
        }
        debug!(task = %id, from = %*current, to = %next, "task state transition");
        *current = next;
        true
    }
}
