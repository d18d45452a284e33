//! Baseline persistence
//!
//! A baseline is the statistics snapshot a test is compared against. The
//! file backend stores one pretty-printed JSON document per test:
//!
//! ```text
//! <baseline_directory>/<sanitized_test_name>.json
//! {"test": "api/users", "statistics": {...}, "updated_at": 1700000000, "version": "0.3.0"}
//! ```
//!
//! `test` keeps the unsanitized name so listings match the in-memory backend.
//! Documents without it are listed under their file stem.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::harness::BenchmarkStatistics;
use crate::config::{BaselineBackend, RegressionConfig};

/// Error type for baseline storage operations
#[derive(Debug, thiserror::Error)]
pub enum BaselineStoreError {
    #[error("baseline I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("baseline serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stored reference statistics for one test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub statistics: BenchmarkStatistics,
    /// Unix seconds
    pub updated_at: i64,
    pub version: String,
}

/// On-disk form of a baseline
#[derive(Serialize, Deserialize)]
struct BaselineDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test: Option<String>,
    #[serde(flatten)]
    baseline: Baseline,
}

/// Storage for baselines, keyed by test name
#[async_trait]
pub trait BaselineStore: Send + Sync {
    async fn get(&self, test: &str) -> Result<Option<Baseline>, BaselineStoreError>;

    /// Create or overwrite
    async fn save(&self, test: &str, baseline: &Baseline) -> Result<(), BaselineStoreError>;

    /// Removing a missing baseline is not an error
    async fn delete(&self, test: &str) -> Result<(), BaselineStoreError>;

    async fn list_all(&self) -> Result<BTreeMap<String, Baseline>, BaselineStoreError>;
}

/// Map every character outside `[A-Za-z0-9_-]` to `_`
pub fn sanitize_name(test: &str) -> String {
    test.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One JSON file per test in a directory
pub struct FileBaselineStore {
    directory: PathBuf,
}

impl FileBaselineStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, test: &str) -> PathBuf {
        self.directory.join(format!("{}.json", sanitize_name(test)))
    }

    async fn read(path: &Path) -> Result<Option<BaselineDocument>, BaselineStoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BaselineStore for FileBaselineStore {
    async fn get(&self, test: &str) -> Result<Option<Baseline>, BaselineStoreError> {
        Ok(Self::read(&self.path_for(test)).await?.map(|doc| doc.baseline))
    }

    async fn save(&self, test: &str, baseline: &Baseline) -> Result<(), BaselineStoreError> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let path = self.path_for(test);
        let json = serde_json::to_vec_pretty(&BaselineDocument {
            test: Some(test.to_string()),
            baseline: baseline.clone(),
        })?;
        tokio::fs::write(&path, json).await?;
        debug!(test, path = %path.display(), "Saved baseline");
        Ok(())
    }

    async fn delete(&self, test: &str) -> Result<(), BaselineStoreError> {
        match tokio::fs::remove_file(self.path_for(test)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_all(&self) -> Result<BTreeMap<String, Baseline>, BaselineStoreError> {
        let mut baselines = BTreeMap::new();
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(baselines),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match Self::read(&path).await {
                Ok(Some(doc)) => {
                    baselines.insert(doc.test.unwrap_or(stem), doc.baseline);
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable baseline"),
            }
        }
        Ok(baselines)
    }
}

/// Process-local baselines (for testing)
#[derive(Default)]
pub struct InMemoryBaselineStore {
    baselines: RwLock<HashMap<String, Baseline>>,
}

impl InMemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineStore for InMemoryBaselineStore {
    async fn get(&self, test: &str) -> Result<Option<Baseline>, BaselineStoreError> {
        Ok(self.baselines.read().get(test).cloned())
    }

    async fn save(&self, test: &str, baseline: &Baseline) -> Result<(), BaselineStoreError> {
        self.baselines
            .write()
            .insert(test.to_string(), baseline.clone());
        Ok(())
    }

    async fn delete(&self, test: &str) -> Result<(), BaselineStoreError> {
        self.baselines.write().remove(test);
        Ok(())
    }

    async fn list_all(&self) -> Result<BTreeMap<String, Baseline>, BaselineStoreError> {
        Ok(self
            .baselines
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Build the backend selected by `config.storage_backend`
pub fn baseline_store_from_config(config: &RegressionConfig) -> Arc<dyn BaselineStore> {
    match config.storage_backend {
        BaselineBackend::File => Arc::new(FileBaselineStore::new(&config.baseline_directory)),
        BaselineBackend::Memory => Arc::new(InMemoryBaselineStore::new()),
    }
}
