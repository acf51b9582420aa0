// src/tasks/sql.rs

use serde::Deserialize;
use tracing::debug;

use super::{TaskError, TaskMetrics};
use crate::warehouse::{Warehouse, split_statements};

/// A script of `;`-separated statements, run in order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SqlTask {
    pub sql: String,
}

impl SqlTask {
    pub fn statement_count(&self) -> usize {
        split_statements(&self.sql).len()
    }

    pub fn run(&self, warehouse: &mut dyn Warehouse) -> Result<TaskMetrics, TaskError> {
        let statements = split_statements(&self.sql);
        for (i, stmt) in statements.iter().enumerate() {
            debug!(index = i, sql = %stmt, "executing script statement");
            warehouse.execute(stmt)?;
        }

        Ok(TaskMetrics {
            statements: statements.len(),
            ..TaskMetrics::default()
        })
    }
}
