// src/tasks/quality.rs

use serde::Deserialize;
use tracing::{info, warn};

use super::{CheckFailure, TaskError, TaskMetrics, clean_sql};
use crate::types::Comparison;
use crate::warehouse::{Value, Warehouse};

/// One scalar predicate: `<sql>` must return a value that compares to
/// `expected` with `comparison`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckSpec {
    pub sql: String,
    pub expected: Value,
    #[serde(default)]
    pub comparison: Comparison,
}

impl CheckSpec {
    pub fn new(sql: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self {
            sql: sql.into(),
            expected: expected.into(),
            comparison: Comparison::Eq,
        }
    }

    pub fn with_comparison(mut self, comparison: Comparison) -> Self {
        self.comparison = comparison;
        self
    }
}

/// Runs every check and fails with all failing predicates at once.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct QualityCheckTask {
    #[serde(default)]
    pub checks: Vec<CheckSpec>,
    /// Shorthand for `SELECT COUNT(*) FROM <table>` with `gt 0`.
    #[serde(default)]
    pub non_empty_tables: Vec<String>,
}

impl QualityCheckTask {
    /// Explicit checks followed by the expanded non-empty table checks.
    pub fn all_checks(&self) -> Vec<CheckSpec> {
        let mut all = self.checks.clone();
        all.extend(self.non_empty_tables.iter().map(|table| {
            CheckSpec::new(format!("SELECT COUNT(*) FROM {table}"), 0i64).with_comparison(Comparison::Gt)
        }));
        all
    }

    pub fn check_count(&self) -> usize {
        self.checks.len() + self.non_empty_tables.len()
    }

    pub fn run(&self, warehouse: &mut dyn Warehouse) -> Result<TaskMetrics, TaskError> {
        let checks = self.all_checks();
        let mut failures = Vec::new();

        for check in &checks {
            let actual = warehouse.execute_scalar(clean_sql(&check.sql))?;
            let passed = actual
                .as_ref()
                .is_some_and(|v| check.comparison.holds(v, &check.expected));

            if passed {
                info!(sql = %check.sql, "data quality check passed");
            } else {
                let failure = CheckFailure {
                    sql: check.sql.clone(),
                    expected: check.expected.clone(),
                    actual,
                    comparison: check.comparison,
                };
                warn!(check = %failure, "data quality check failed");
                failures.push(failure);
            }
        }

        if !failures.is_empty() {
            return Err(TaskError::QualityCheckFailed { failures });
        }

        Ok(TaskMetrics {
            statements: checks.len(),
            objects: None,
            table_rows: None,
            checks: Some(checks.len()),
        })
    }
}
