// src/tasks/mod.rs

//! Task variants and the contract they share.
//!
//! - [`staging`]: copy JSON objects from object storage into a table.
//! - [`load`]: fact and dimension loads (`INSERT INTO ... SELECT`).
//! - [`quality`]: scalar data quality checks.
//! - [`sql`]: run a script of statements (schema setup).
//!
//! Every variant runs synchronously against one warehouse session and
//! reports [`TaskMetrics`] or a [`TaskError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::RunContext;
use crate::credentials::{CredentialError, CredentialProvider};
use crate::errors::TemplateError;
use crate::storage::{ObjectStore, StorageError};
use crate::types::Comparison;
use crate::warehouse::{Value, Warehouse, WarehouseError};

pub mod load;
pub mod quality;
pub mod sql;
pub mod staging;

pub use load::LoadTask;
pub use quality::{CheckSpec, QualityCheckTask};
pub use sql::SqlTask;
pub use staging::StagingTask;

/// A single failing data quality predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckFailure {
    pub sql: String,
    pub expected: Value,
    /// `None` when the query returned no rows.
    pub actual: Option<Value>,
    pub comparison: Comparison,
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(
                f,
                "`{}` returned {} (expected {} {})",
                self.sql, actual, self.comparison, self.expected
            ),
            None => write!(
                f,
                "`{}` returned no rows (expected {} {})",
                self.sql, self.comparison, self.expected
            ),
        }
    }
}

fn format_failures(failures: &[CheckFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("no source objects found under {location}")]
    SourceNotFound { location: String },

    #[error("invalid load mode '{mode}' (expected \"append\" or \"truncate-insert\")")]
    InvalidMode { mode: String },

    #[error("{} data quality check(s) failed: {}", .failures.len(), format_failures(.failures))]
    QualityCheckFailed { failures: Vec<CheckFailure> },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("warehouse error: {0}")]
    Warehouse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Only connection failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Connection(_))
    }
}

impl From<WarehouseError> for TaskError {
    fn from(err: WarehouseError) -> Self {
        match err {
            WarehouseError::Connection(msg) => TaskError::Connection(msg),
            WarehouseError::Storage(inner) => inner.into(),
            other => TaskError::Warehouse(other.to_string()),
        }
    }
}

impl From<StorageError> for TaskError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Connection(msg) => TaskError::Connection(msg),
            other => TaskError::Storage(other.to_string()),
        }
    }
}

/// What a task can see besides its warehouse session.
#[derive(Clone, Copy)]
pub struct TaskEnv<'a> {
    pub context: &'a RunContext,
    pub store: &'a dyn ObjectStore,
    pub credentials: &'a dyn CredentialProvider,
}

/// Counters reported by a successful task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskMetrics {
    pub statements: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<usize>,
}

/// The unit of work a task performs, with its own configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    Staging(StagingTask),
    FactLoad(LoadTask),
    DimensionLoad(LoadTask),
    QualityCheck(QualityCheckTask),
    Sql(SqlTask),
    Marker,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Staging(_) => "staging",
            TaskKind::FactLoad(_) => "fact_load",
            TaskKind::DimensionLoad(_) => "dimension_load",
            TaskKind::QualityCheck(_) => "quality_check",
            TaskKind::Sql(_) => "sql",
            TaskKind::Marker => "marker",
        }
    }

    /// Markers run without checking out a warehouse session.
    pub fn needs_warehouse(&self) -> bool {
        !matches!(self, TaskKind::Marker)
    }

    /// One-line description for plans and logs.
    pub fn summary(&self) -> String {
        match self {
            TaskKind::Staging(t) => format!("{} <- s3://{}/{}", t.table, t.bucket, t.key),
            TaskKind::FactLoad(t) | TaskKind::DimensionLoad(t) => {
                format!("{} ({})", t.table, t.mode)
            }
            TaskKind::QualityCheck(t) => format!("{} check(s)", t.check_count()),
            TaskKind::Sql(t) => format!("{} statement(s)", t.statement_count()),
            TaskKind::Marker => String::new(),
        }
    }

    /// Run the task body.
    ///
    /// `warehouse` may be `None` only for kinds that do not
    /// [need one](Self::needs_warehouse).
    pub fn run(
        &self,
        env: &TaskEnv<'_>,
        warehouse: Option<&mut dyn Warehouse>,
    ) -> Result<TaskMetrics, TaskError> {
        if !self.needs_warehouse() {
            return Ok(TaskMetrics::default());
        }

        let warehouse = warehouse.ok_or_else(|| {
            TaskError::Connection("no warehouse session available".to_string())
        })?;
        match self {
            TaskKind::Staging(t) => t.run(env, warehouse),
            TaskKind::FactLoad(t) | TaskKind::DimensionLoad(t) => t.run(warehouse),
            TaskKind::QualityCheck(t) => t.run(warehouse),
            TaskKind::Sql(t) => t.run(warehouse),
            TaskKind::Marker => Ok(TaskMetrics::default()),
        }
    }
}

/// Row count of `table`, used for the `table_rows` metric.
pub(crate) fn count_rows(
    warehouse: &mut dyn Warehouse,
    table: &str,
) -> Result<Option<usize>, TaskError> {
    let value = warehouse.execute_scalar(&format!("SELECT COUNT(*) FROM {table}"))?;
    Ok(match value {
        Some(Value::Int(n)) if n >= 0 => Some(n as usize),
        _ => None,
    })
}

/// Trim whitespace and a trailing `;` from a configured query.
pub(crate) fn clean_sql(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}
