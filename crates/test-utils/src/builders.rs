#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stardag::config::{
    PipelineConfig, PipelineSection, RawPipelineFile, StorageSection, TaskConfig,
    WarehouseSection,
};
use stardag::credentials::{Credentials, StaticCredentialProvider};
use stardag::dag::Graph;
use stardag::engine::{Executor, ExecutorOptions};
use stardag::storage::MemoryObjectStore;
use stardag::tasks::{
    CheckSpec, LoadTask, QualityCheckTask, SqlTask, StagingTask, TaskKind,
};
use stardag::warehouse::{Connector, MemoryWarehouse, WarehousePool};

/// Builder for `PipelineConfig` to simplify test setup.
pub struct PipelineBuilder {
    raw: RawPipelineFile,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawPipelineFile {
                pipeline: PipelineSection::default(),
                warehouse: WarehouseSection::default(),
                storage: StorageSection::default(),
                tasks: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.raw.pipeline.name = name.to_string();
        self
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.raw.tasks.push(task);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.raw.pipeline.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: &str) -> Self {
        self.raw.pipeline.retry_delay = delay.to_string();
        self
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.raw.warehouse.pool_size = size;
        self
    }

    pub fn raw(self) -> RawPipelineFile {
        self.raw
    }

    pub fn try_build(self) -> stardag::errors::Result<PipelineConfig> {
        PipelineConfig::try_from(self.raw)
    }

    pub fn build(self) -> PipelineConfig {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(id: &str, kind: TaskKind) -> Self {
        Self {
            task: TaskConfig {
                id: id.to_string(),
                after: Vec::new(),
                retries: None,
                kind,
            },
        }
    }

    pub fn marker(id: &str) -> Self {
        Self::new(id, TaskKind::Marker)
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.task.retries = Some(retries);
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

pub fn staging(table: &str, bucket: &str, key: &str) -> StagingTask {
    StagingTask {
        table: table.to_string(),
        bucket: bucket.to_string(),
        key: key.to_string(),
        json_path: None,
        credentials: "aws_credentials".to_string(),
        region: "us-west-2".to_string(),
    }
}

pub fn load(table: &str, sql: &str, mode: &str) -> LoadTask {
    LoadTask {
        table: table.to_string(),
        sql: sql.to_string(),
        mode: mode.to_string(),
    }
}

pub fn sql(script: &str) -> SqlTask {
    SqlTask {
        sql: script.to_string(),
    }
}

pub fn checks(checks: Vec<CheckSpec>) -> QualityCheckTask {
    QualityCheckTask {
        checks,
        non_empty_tables: Vec::new(),
    }
}

/// Credentials registered under the id the `staging` builder uses.
pub fn test_credentials() -> StaticCredentialProvider {
    StaticCredentialProvider::new().with(
        "aws_credentials",
        Credentials::new("AKIATEST", "test-secret"),
    )
}

/// Executor options with millisecond retry delays.
pub fn fast_options(max_active_tasks: usize, retries: u32) -> ExecutorOptions {
    ExecutorOptions {
        max_active_tasks,
        retries,
        retry_delay: Duration::from_millis(1),
        max_retry_delay: Duration::from_millis(10),
    }
}

/// Everything an executor test needs, sharing one in-memory warehouse and
/// object store.
pub struct Harness {
    pub warehouse: MemoryWarehouse,
    pub store: Arc<MemoryObjectStore>,
    pub pool: Arc<WarehousePool>,
}

impl Harness {
    pub fn new(pool_size: usize) -> Self {
        let store = Arc::new(MemoryObjectStore::new());
        let warehouse = MemoryWarehouse::new().with_object_store(store.clone());
        let pool = WarehousePool::new(Arc::new(warehouse.clone()), pool_size);
        Self {
            warehouse,
            store,
            pool,
        }
    }

    /// Same store and warehouse, sessions opened through `connector`.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>, pool_size: usize) -> Self {
        self.pool = WarehousePool::new(connector, pool_size);
        self
    }

    pub fn executor(&self, graph: Graph, options: ExecutorOptions) -> Executor {
        Executor::new(
            Arc::new(graph),
            Arc::clone(&self.pool),
            self.store.clone(),
            Arc::new(test_credentials()),
        )
        .with_options(options)
    }
}
