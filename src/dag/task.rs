// src/dag/task.rs

use crate::tasks::TaskKind;
use crate::types::TaskId;

/// A node of the task graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Overrides the pipeline-wide retry budget for connection errors.
    pub retries: Option<u32>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            retries: None,
        }
    }

    /// A no-op task, useful as a begin/end marker.
    pub fn marker(id: impl Into<TaskId>) -> Self {
        Self::new(id, TaskKind::Marker)
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}
