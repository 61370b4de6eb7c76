//! Document persistence of run results

use crate::report::RunReport;
use anyhow::{bail, Context};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const RESULTS_COLLECTION: &str = "processed_results";
pub const WAREHOUSES_COLLECTION: &str = "warehouses";
pub const CLUSTER_LOGS_COLLECTION: &str = "cluster_logs";

/// A store of named document collections
pub trait DocumentStore {
    /// Clear `name`, then insert `documents`; returns the number inserted
    fn replace_collection(&mut self, name: &str, documents: &[Value]) -> crate::Result<usize>;
}

/// Collections kept as `<dir>/<name>.json` arrays
#[derive(Debug)]
pub struct JsonDirStore {
    dir: PathBuf,
    writes: usize,
}

impl JsonDirStore {
    pub fn open(dir: impl AsRef<Path>) -> crate::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create store directory {}", dir.display()))?;
        info!("Opened document store at {}", dir.display());
        Ok(Self { dir, writes: 0 })
    }

    pub fn collection_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Read a collection back; an absent collection is empty
    pub fn read_collection(&self, name: &str) -> crate::Result<Vec<Value>> {
        let path = self.collection_path(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read collection {}", path.display()))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl DocumentStore for JsonDirStore {
    fn replace_collection(&mut self, name: &str, documents: &[Value]) -> crate::Result<usize> {
        if name.is_empty() || name.contains(['/', '\\']) {
            bail!("Invalid collection name '{}'", name);
        }

        let path = self.collection_path(name);
        let staging = self.dir.join(format!(".{}.json.tmp", name));
        fs::write(&staging, serde_json::to_string_pretty(documents)?)
            .with_context(|| format!("Cannot write collection {}", staging.display()))?;
        fs::rename(&staging, &path)
            .with_context(|| format!("Cannot replace collection {}", path.display()))?;

        self.writes += 1;
        debug!("Replaced collection '{}' with {} documents", name, documents.len());
        Ok(documents.len())
    }
}

impl Drop for JsonDirStore {
    fn drop(&mut self) {
        info!(
            "Released document store at {} after {} writes",
            self.dir.display(),
            self.writes
        );
    }
}

/// Write the report, its warehouses and its cluster logs
pub fn persist_report(store: &mut dyn DocumentStore, report: &RunReport) -> crate::Result<()> {
    store.replace_collection(RESULTS_COLLECTION, &[report.to_json()?])?;

    let warehouses = report
        .warehouses
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    store.replace_collection(WAREHOUSES_COLLECTION, &warehouses)?;

    let logs = report
        .cluster_logs
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    store.replace_collection(CLUSTER_LOGS_COLLECTION, &logs)?;

    info!(
        "Persisted run: {} warehouses, {} cluster logs",
        warehouses.len(),
        logs.len()
    );
    Ok(())
}
