use std::collections::HashMap as StdHashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::ClientStorage;

/// In-memory storage; contents vanish with the process.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    map: Arc<parking_lot::RwLock<StdHashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }
}

impl ClientStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> { self.map.read().get(key).cloned() }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.map.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> { self.map.read().keys().cloned().collect() }
}

#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    version: u32,
    saved_ms: i64,
    entries: StdHashMap<String, String>,
}

const SNAPSHOT_VERSION: u32 = 1;

/// JSON-file storage. The whole map is rewritten on every mutation through a
/// temp file and rename; memory only changes once the file write succeeded.
#[derive(Clone)]
pub struct FileStorage {
    path: PathBuf,
    map: Arc<parking_lot::RwLock<StdHashMap<String, String>>>,
    /// Serializes snapshot writes
    write_lock: Arc<parking_lot::Mutex<()>>,
}

impl FileStorage {
    /// Open (or create) the snapshot at `path`. A corrupt snapshot is logged and
    /// replaced by an empty map rather than failing startup.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(s) => s.entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "client storage snapshot unreadable; starting empty");
                    StdHashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StdHashMap::new(),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        Ok(Self {
            path,
            map: Arc::new(parking_lot::RwLock::new(entries)),
            write_lock: Arc::new(parking_lot::Mutex::new(())),
        })
    }

    /// Apply `change` to a copy of the map, persist the copy, then swap it in.
    /// A failed snapshot write leaves both the map and the file untouched.
    fn commit<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut StdHashMap<String, String>) -> bool,
    {
        let _guard = self.write_lock.lock();
        let mut next = self.map.read().clone();
        if !change(&mut next) {
            return Ok(());
        }
        self.save_snapshot(&next)?;
        *self.map.write() = next;
        Ok(())
    }

    fn save_snapshot(&self, entries: &StdHashMap<String, String>) -> Result<()> {
        let snap = Snapshot {
            version: SNAPSHOT_VERSION,
            saved_ms: chrono::Utc::now().timestamp_millis(),
            entries: entries.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snap)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

impl ClientStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> { self.map.read().get(key).cloned() }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.commit(|map| {
            map.insert(key.to_string(), value);
            true
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.commit(|map| map.remove(key).is_some())
    }

    fn keys(&self) -> Vec<String> { self.map.read().keys().cloned().collect() }
}
