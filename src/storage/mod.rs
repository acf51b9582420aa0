// src/storage/mod.rs

//! Object storage abstraction.
//!
//! - [`ObjectStore`] is the trait tasks and the warehouse use to find and
//!   read source objects.
//! - [`local`] maps buckets onto directories of a local root.
//! - [`memory`] keeps objects in memory (tests, rehearsals).

use std::fmt::{self, Debug};

use thiserror::Error;

use crate::context::RunContext;
use crate::errors::TemplateError;

pub mod local;
pub mod memory;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object location '{0}' (expected s3://bucket/key)")]
    InvalidLocation(String),

    #[error("storage connection error: {0}")]
    Connection(String),

    #[error("storage IO error on {path}: {message}")]
    Io { path: String, message: String },
}

/// Abstract object store interface.
pub trait ObjectStore: Send + Sync + Debug {
    /// Keys in `bucket` starting with `prefix`, sorted.
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Full contents of a single object.
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// A concrete `s3://bucket/key` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Render `key_template` against the run context and combine it with
    /// the bucket.
    pub fn resolve(
        bucket: &str,
        key_template: &str,
        ctx: &RunContext,
    ) -> Result<Self, TemplateError> {
        let key = ctx.render(key_template)?;
        Ok(Self::new(bucket, key))
    }

    /// Parse an `s3://bucket/key` URL. The key may be empty.
    pub fn parse(url: &str) -> Result<Self, StorageError> {
        let rest = url
            .strip_prefix("s3://")
            .ok_or_else(|| StorageError::InvalidLocation(url.to_string()))?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(StorageError::InvalidLocation(url.to_string()));
        }
        Ok(Self::new(bucket, key))
    }

    /// Keys under this location in `store`.
    pub fn list(&self, store: &dyn ObjectStore) -> Result<Vec<String>, StorageError> {
        store.list(&self.bucket, &self.key)
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}
