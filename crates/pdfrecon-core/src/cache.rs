use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::model::FileReport;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    mtime: SystemTime,
    size: u64,
}

fn key_for(path: &Path) -> Option<CacheKey> {
    let meta = std::fs::metadata(path).ok()?;
    Some(CacheKey { path: path.to_path_buf(), mtime: meta.modified().ok()?, size: meta.len() })
}

/// Process-wide report cache keyed by `(path, mtime, size)`, so unchanged
/// files are not re-scanned. One mutex; writers replace entries atomically.
#[derive(Debug, Default)]
pub struct ReportCache {
    inner: Mutex<HashMap<CacheKey, Arc<FileReport>>>,
}

impl ReportCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<FileReport>> {
        let key = key_for(path)?;
        self.inner.lock().ok()?.get(&key).cloned()
    }

    pub fn store(&self, path: &Path, report: Arc<FileReport>) {
        let Some(key) = key_for(path) else { return };
        if let Ok(mut map) = self.inner.lock() {
            map.insert(key, report);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
