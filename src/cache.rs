use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use tempfile::Builder;
use tracing::{debug, warn};

use crate::decode::DecodedActivity;
use crate::domain::ActivityId;
use crate::error::IngestError;

pub trait SeriesCache: Send + Sync {
    fn get(&self, id: &ActivityId) -> Option<DecodedActivity>;

    fn put(&self, id: &ActivityId, series: &DecodedActivity) -> Result<(), IngestError>;

    fn invalidate(&self, id: &ActivityId) -> Result<(), IngestError>;
}

#[derive(Debug, Clone)]
pub struct DiskSeriesCache {
    root: Utf8PathBuf,
}

impl DiskSeriesCache {
    pub fn new() -> Result<Self, IngestError> {
        let root = ProjectDirs::from("", "", "stride-ingest")
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.cache_dir().to_path_buf()).ok())
            .ok_or_else(|| IngestError::Cache("unable to resolve cache directory".to_string()))?;
        Ok(Self::with_root(root))
    }

    pub fn with_root(root: Utf8PathBuf) -> Self {
        Self {
            root: root.join("series"),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn entry_path(&self, id: &ActivityId) -> Utf8PathBuf {
        self.root.join(format!("{}.json", id.as_str()))
    }

    fn write_atomic(&self, path: &Utf8Path, content: &[u8]) -> Result<(), IngestError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("series")
            .suffix(".tmp")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl SeriesCache for DiskSeriesCache {
    fn get(&self, id: &ActivityId) -> Option<DecodedActivity> {
        let path = self.entry_path(id);
        let content = fs::read(path.as_std_path()).ok()?;
        match serde_json::from_slice::<DecodedActivity>(&content) {
            Ok(series) if !series.samples.is_empty() => {
                debug!(activity = %id, "series cache hit");
                Some(series)
            }
            Ok(_) | Err(_) => {
                warn!(activity = %id, path = %path, "dropping corrupt series cache entry");
                let _ = fs::remove_file(path.as_std_path());
                None
            }
        }
    }

    fn put(&self, id: &ActivityId, series: &DecodedActivity) -> Result<(), IngestError> {
        let path = self.entry_path(id);
        if path.as_std_path().exists() {
            return Ok(());
        }
        let content =
            serde_json::to_vec(series).map_err(|err| IngestError::Cache(err.to_string()))?;
        self.write_atomic(&path, &content)
    }

    fn invalidate(&self, id: &ActivityId) -> Result<(), IngestError> {
        let path = self.entry_path(id);
        if path.as_std_path().exists() {
            fs::remove_file(path.as_std_path())
                .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySeriesCache {
    entries: Mutex<HashMap<ActivityId, DecodedActivity>>,
}

impl MemorySeriesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SeriesCache for MemorySeriesCache {
    fn get(&self, id: &ActivityId) -> Option<DecodedActivity> {
        self.entries.lock().ok()?.get(id).cloned()
    }

    fn put(&self, id: &ActivityId, series: &DecodedActivity) -> Result<(), IngestError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| IngestError::Cache("cache lock poisoned".to_string()))?;
        entries.entry(id.clone()).or_insert_with(|| series.clone());
        Ok(())
    }

    fn invalidate(&self, id: &ActivityId) -> Result<(), IngestError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| IngestError::Cache("cache lock poisoned".to_string()))?;
        entries.remove(id);
        Ok(())
    }
}
