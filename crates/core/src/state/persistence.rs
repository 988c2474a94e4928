//! Durable storage backends for item state.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemState, StateError};

/// Storage backend used by the `StateStore`.
///
/// `persist` is called synchronously while the store lock is held, so
/// implementations must not call back into the store.
pub trait StatePersistence: Send + Sync {
    /// Load every persisted record.
    fn load(&self) -> Result<Vec<ItemState>, StateError>;

    /// Persist `changed` records. `all` is the full in-memory view after the
    /// change, for backends that rewrite the whole document.
    fn persist(
        &self,
        changed: &[&ItemState],
        all: &BTreeMap<String, ItemState>,
    ) -> Result<(), StateError>;

    /// Backend name for logs and the status endpoint.
    fn name(&self) -> &'static str;
}

/// On-disk JSON document layout.
#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    saved_at: DateTime<Utc>,
    items: Vec<ItemState>,
}

/// Whole-document JSON file, replaced atomically on every write.
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".to_string());
        self.path.with_file_name(format!(".{}.tmp", file_name))
    }

    /// Directory holding the state file; `.` for a bare file name.
    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn write_atomic(&self, bytes: &[u8]) -> std::io::Result<()> {
        let dir = self.parent_dir();
        fs::create_dir_all(dir)?;

        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }
        sync_dir(dir)
    }
}

/// Flush the directory entry so the rename survives a power loss.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl StatePersistence for JsonFilePersistence {
    fn load(&self) -> Result<Vec<ItemState>, StateError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StateError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let doc: StateDocument = serde_json::from_str(&raw).map_err(|e| {
            StateError::Persistence(format!("failed to parse {}: {}", self.path.display(), e))
        })?;
        Ok(doc.items)
    }

    fn persist(
        &self,
        _changed: &[&ItemState],
        all: &BTreeMap<String, ItemState>,
    ) -> Result<(), StateError> {
        let doc = StateDocument {
            saved_at: Utc::now(),
            items: all.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)
            .map_err(|e| StateError::Persistence(format!("failed to encode state: {}", e)))?;
        self.write_atomic(&bytes).map_err(|e| {
            StateError::Persistence(format!("failed to write {}: {}", self.path.display(), e))
        })
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Keeps the last persisted view in memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryPersistence {
    records: Mutex<BTreeMap<String, ItemState>>,
    writes: AtomicU64,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed records returned by the next `load`.
    pub fn with_records(records: impl IntoIterator<Item = ItemState>) -> Self {
        let map = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            records: Mutex::new(map),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of successful `persist` calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn record(&self, id: &str) -> Option<ItemState> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

impl StatePersistence for MemoryPersistence {
    fn load(&self) -> Result<Vec<ItemState>, StateError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values().cloned().collect())
    }

    fn persist(
        &self,
        changed: &[&ItemState],
        _all: &BTreeMap<String, ItemState>,
    ) -> Result<(), StateError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        for state in changed {
            records.insert(state.id.clone(), (*state).clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FinalOutcome, ItemStatus};
    use tempfile::TempDir;

    fn sample_map() -> BTreeMap<String, ItemState> {
        let mut purchased = ItemState::ready("94681770");
        purchased.status = ItemStatus::Purchased;
        purchased.attempt_id = Some(3);
        purchased.final_outcome = Some(FinalOutcome::purchased(Some("ORD-123456-78".into())));

        let mut map = BTreeMap::new();
        map.insert("94724987".to_string(), ItemState::ready("94724987"));
        map.insert("94681770".to_string(), purchased);
        map
    }

    #[test]
    fn test_json_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let persistence = JsonFilePersistence::new(dir.path().join("state.json"));
        assert!(persistence.load().unwrap().is_empty());
    }

    #[test]
    fn test_json_persist_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let persistence = JsonFilePersistence::new(&path);

        let map = sample_map();
        persistence.persist(&[], &map).unwrap();
        assert!(path.exists());

        let loaded = persistence.load().unwrap();
        assert_eq!(loaded.len(), 2);
        let purchased = loaded.iter().find(|s| s.id == "94681770").unwrap();
        assert_eq!(purchased.status, ItemStatus::Purchased);
        assert_eq!(
            purchased
                .final_outcome
                .as_ref()
                .and_then(|o| o.order_number.as_deref()),
            Some("ORD-123456-78")
        );
    }

    #[test]
    fn test_json_parent_dir() {
        let bare = JsonFilePersistence::new("state.json");
        assert_eq!(bare.parent_dir(), Path::new("."));

        let nested = JsonFilePersistence::new("/var/lib/dropwatch/state.json");
        assert_eq!(nested.parent_dir(), Path::new("/var/lib/dropwatch"));
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_dir_after_write() {
        let dir = TempDir::new().unwrap();
        let persistence = JsonFilePersistence::new(dir.path().join("state.json"));
        persistence.persist(&[], &sample_map()).unwrap();

        assert!(sync_dir(dir.path()).is_ok());
        assert!(sync_dir(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_json_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let persistence = JsonFilePersistence::new(dir.path().join("state.json"));
        persistence.persist(&[], &sample_map()).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
    }

    #[test]
    fn test_json_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let err = JsonFilePersistence::new(&path).load().unwrap_err();
        assert!(matches!(err, StateError::Persistence(_)));
    }

    #[test]
    fn test_memory_persistence_records_changes() {
        let persistence = MemoryPersistence::new();
        let state = ItemState::ready("a");
        persistence.persist(&[&state], &BTreeMap::new()).unwrap();

        assert_eq!(persistence.write_count(), 1);
        assert_eq!(persistence.record("a").unwrap().status, ItemStatus::Ready);
        assert_eq!(persistence.load().unwrap().len(), 1);
    }
}
