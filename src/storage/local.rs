// src/storage/local.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{ObjectStore, StorageError};

/// Object store backed by a local directory.
///
/// Each bucket is a directory directly under `root`; object keys are the
/// `/`-separated paths of regular files below it.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }
}

impl ObjectStore for LocalObjectStore {
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.bucket_dir(bucket);
        if !dir.is_dir() {
            debug!(bucket, root = ?self.root, "bucket directory does not exist");
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        collect_keys(&dir, "", &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = key
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.bucket_dir(bucket), |p, seg| p.join(seg));

        if !path.is_file() {
            return Err(StorageError::NotFound(format!("s3://{bucket}/{key}")));
        }

        fs::read(&path).map_err(|e| io_error(&path, e))
    }
}

/// Walk `dir` recursively, pushing `/`-joined keys relative to the bucket.
fn collect_keys(dir: &Path, prefix: &str, keys: &mut Vec<String>) -> Result<(), StorageError> {
    let entries = fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };

        if path.is_dir() {
            collect_keys(&path, &key, keys)?;
        } else if path.is_file() {
            keys.push(key);
        }
    }
    Ok(())
}

fn io_error(path: &Path, err: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
