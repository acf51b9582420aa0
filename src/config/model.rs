// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dag::Task;
use crate::tasks::TaskKind;
use crate::types::TaskId;

/// Pipeline definition as read from a TOML file, before validation.
///
/// ```toml
/// [pipeline]
/// name = "sparkify"
/// retries = 3
/// retry_delay = "5m"
///
/// [warehouse]
/// pool_size = 4
///
/// [storage]
/// root = "data"
///
/// [[task]]
/// id = "Begin_execution"
/// kind = "marker"
///
/// [[task]]
/// id = "Stage_events"
/// kind = "staging"
/// after = ["Begin_execution"]
/// table = "staging_events"
/// bucket = "udacity-dend"
/// key = "log-data/{execution_date.year}/{execution_date.month}"
/// credentials = "aws_credentials"
/// ```
///
/// Tasks are an array so the definition order is preserved; it is the
/// tie-breaker for every ordering the engine produces.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPipelineFile {
    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub warehouse: WarehouseSection,

    #[serde(default)]
    pub storage: StorageSection,

    /// All `[[task]]` entries, in definition order.
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskConfig>,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Retries for connection errors, per task, unless the task overrides it.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay before the first retry, e.g. `"5m"`. Doubles on every retry.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,

    /// Upper bound for the retry delay.
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay: String,

    /// How many tasks of a batch may run at once. Defaults to the warehouse
    /// pool size.
    #[serde(default)]
    pub max_active_tasks: Option<usize>,

    /// Default run parameters, available to templates as `{params.<name>}`.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_name() -> String {
    "pipeline".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay() -> String {
    "5m".to_string()
}

fn default_max_retry_delay() -> String {
    "1h".to_string()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            description: None,
            retries: default_retries(),
            retry_delay: default_retry_delay(),
            max_retry_delay: default_max_retry_delay(),
            max_active_tasks: None,
            params: BTreeMap::new(),
        }
    }
}

/// `[warehouse]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseSection {
    /// Maximum number of warehouse sessions open at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    4
}

impl Default for WarehouseSection {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSection {
    /// Root directory of the local object store; each bucket is a
    /// subdirectory. Relative paths are resolved against the definition
    /// file's directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// One `[[task]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub id: TaskId,

    /// Tasks that must succeed before this one runs.
    #[serde(default)]
    pub after: Vec<TaskId>,

    /// Overrides `[pipeline].retries` for this task.
    #[serde(default)]
    pub retries: Option<u32>,

    /// `kind = "..."` plus the kind's own fields.
    #[serde(flatten)]
    pub kind: TaskKind,
}

impl TaskConfig {
    pub fn to_task(&self) -> Task {
        Task {
            id: self.id.clone(),
            kind: self.kind.clone(),
            retries: self.retries,
        }
    }
}

/// A validated pipeline definition.
///
/// Only constructed through `TryFrom<RawPipelineFile>` (see
/// `config::validate`) or explicitly via [`PipelineConfig::new_unchecked`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub pipeline: PipelineSection,
    pub warehouse: WarehouseSection,
    pub storage: StorageSection,
    pub tasks: Vec<TaskConfig>,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Directory of the definition file, if it was loaded from disk.
    pub base_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Assemble a config without running validation.
    pub fn new_unchecked(
        raw: RawPipelineFile,
        retry_delay: Duration,
        max_retry_delay: Duration,
    ) -> Self {
        Self {
            pipeline: raw.pipeline,
            warehouse: raw.warehouse,
            storage: raw.storage,
            tasks: raw.tasks,
            retry_delay,
            max_retry_delay,
            base_dir: None,
        }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Effective batch concurrency.
    pub fn max_active_tasks(&self) -> usize {
        self.pipeline
            .max_active_tasks
            .unwrap_or(self.warehouse.pool_size)
    }

    /// Local object store root, resolved against the definition's
    /// directory. Defaults to `data`.
    pub fn storage_root(&self) -> PathBuf {
        let root = self
            .storage
            .root
            .clone()
            .unwrap_or_else(|| PathBuf::from("data"));
        match &self.base_dir {
            Some(base) if root.is_relative() => base.join(root),
            _ => root,
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// Directory holding `path`, or `.` for a bare file name.
pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
