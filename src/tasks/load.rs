// src/tasks/load.rs

use serde::Deserialize;
use tracing::info;

use super::{TaskError, TaskMetrics, clean_sql, count_rows};
use crate::types::LoadMode;
use crate::warehouse::Warehouse;

/// Fact or dimension load: `INSERT INTO <table> <sql>`.
///
/// `mode` is kept as written in the definition and parsed when the task
/// runs, so a bad mode fails that task only.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoadTask {
    pub table: String,
    /// A `SELECT` query producing the rows to insert.
    pub sql: String,
    pub mode: String,
}

impl LoadTask {
    pub fn load_mode(&self) -> Result<LoadMode, TaskError> {
        self.mode.parse().map_err(|_| TaskError::InvalidMode {
            mode: self.mode.clone(),
        })
    }

    pub fn run(&self, warehouse: &mut dyn Warehouse) -> Result<TaskMetrics, TaskError> {
        let mode = self.load_mode()?;
        let mut statements = 0;

        if mode == LoadMode::TruncateInsert {
            info!(table = %self.table, "truncating table before insert");
            warehouse.execute(&format!("TRUNCATE {}", self.table))?;
            statements += 1;
        }

        info!(table = %self.table, %mode, "inserting rows");
        warehouse.execute(&format!("INSERT INTO {} {}", self.table, clean_sql(&self.sql)))?;
        statements += 1;

        let table_rows = count_rows(warehouse, &self.table)?;

        Ok(TaskMetrics {
            statements: statements + 1,
            objects: None,
            table_rows,
            checks: None,
        })
    }
}
