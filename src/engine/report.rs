// src/engine/report.rs

use std::fmt::Write as _;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Serialize, Serializer};

use crate::engine::{RunStatus, TaskStatus};
use crate::tasks::{TaskError, TaskMetrics};
use crate::types::TaskId;

/// Final state of one task in a run.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub kind: String,
    pub status: TaskStatus,
    /// 0 for skipped tasks.
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TaskMetrics>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<TaskError>,
}

fn serialize_error<S: Serializer>(err: &Option<TaskError>, s: S) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => s.serialize_str(&e.to_string()),
        None => s.serialize_none(),
    }
}

/// Outcome of a whole run, tasks in topological order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub run_id: String,
    pub logical_date: NaiveDateTime,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub fn task(&self, id: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.task(id).map(|t| t.status)
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Ids of tasks that ended in `status`, in report order.
    pub fn tasks_with(&self, status: TaskStatus) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.id.as_str())
            .collect()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary for the terminal.
    pub fn render_table(&self) -> String {
        let width = self
            .tasks
            .iter()
            .map(|t| t.id.len())
            .max()
            .unwrap_or(0)
            .max("task".len());

        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {} of '{}' ({}): {}",
            self.run_id, self.pipeline, self.logical_date, self.status
        );
        let _ = writeln!(
            out,
            "  {:<width$}  {:<14}  {:<9}  {:>8}  {:>8}",
            "task", "kind", "status", "attempts", "ms"
        );
        for t in &self.tasks {
            let _ = writeln!(
                out,
                "  {:<width$}  {:<14}  {:<9}  {:>8}  {:>8}",
                t.id,
                t.kind,
                t.status.to_string(),
                t.attempts,
                t.duration_ms
            );
            if let Some(err) = &t.error {
                let _ = writeln!(out, "  {:<width$}  error: {}", "", err);
            }
        }
        out
    }
}
