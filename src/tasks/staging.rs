// src/tasks/staging.rs

use serde::Deserialize;
use tracing::{debug, info};

use super::{TaskEnv, TaskError, TaskMetrics, count_rows};
use crate::storage::ObjectLocation;
use crate::warehouse::Warehouse;

fn default_region() -> String {
    "us-west-2".to_string()
}

/// Copy JSON objects from `s3://bucket/<rendered key>` into `table`.
///
/// The table is cleared first, so re-running a staging task for the same
/// logical date reproduces the same contents.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StagingTask {
    pub table: String,
    pub bucket: String,
    /// Key prefix template, e.g. `log-data/{execution_date.year}/{execution_date.month}`.
    pub key: String,
    /// Key of a jsonpaths descriptor inside `bucket`. `auto` when absent.
    #[serde(default)]
    pub json_path: Option<String>,
    /// Credential id handed to the credential provider.
    pub credentials: String,
    #[serde(default = "default_region")]
    pub region: String,
}

impl StagingTask {
    /// The `JSON '<descriptor>'` argument of the COPY statement.
    pub fn json_descriptor(&self) -> String {
        match self.json_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => format!("s3://{}/{}", self.bucket, path),
            _ => "auto".to_string(),
        }
    }

    pub fn run(
        &self,
        env: &TaskEnv<'_>,
        warehouse: &mut dyn Warehouse,
    ) -> Result<TaskMetrics, TaskError> {
        let creds = env.credentials.resolve(&self.credentials)?;
        let location = ObjectLocation::resolve(&self.bucket, &self.key, env.context)?;

        let objects = location.list(env.store)?;
        if objects.is_empty() {
            return Err(TaskError::SourceNotFound {
                location: location.to_string(),
            });
        }
        debug!(
            table = %self.table,
            source = %location,
            objects = objects.len(),
            "found staging source objects"
        );

        info!(table = %self.table, "clearing staging table");
        warehouse.execute(&format!("DELETE FROM {}", self.table))?;

        let copy = copy_statement(
            &self.table,
            &location,
            &creds.access_key,
            &creds.secret_key,
            &self.region,
            &self.json_descriptor(),
        );
        let redacted = copy_statement(
            &self.table,
            &location,
            &creds.access_key,
            "********",
            &self.region,
            &self.json_descriptor(),
        );
        info!(table = %self.table, sql = %redacted, "copying data into staging table");
        warehouse.execute(&copy)?;

        let table_rows = count_rows(warehouse, &self.table)?;

        Ok(TaskMetrics {
            statements: 3,
            objects: Some(objects.len()),
            table_rows,
            checks: None,
        })
    }
}

fn copy_statement(
    table: &str,
    location: &ObjectLocation,
    access_key: &str,
    secret_key: &str,
    region: &str,
    descriptor: &str,
) -> String {
    format!(
        "COPY {table} FROM '{}' ACCESS_KEY_ID '{}' SECRET_ACCESS_KEY '{}' REGION '{}' \
         COMPUPDATE OFF JSON '{}' TRUNCATECOLUMNS",
        quote(&location.to_string()),
        quote(access_key),
        quote(secret_key),
        quote(region),
        quote(descriptor),
    )
}

fn quote(s: &str) -> String {
    s.replace('\'', "''")
}
