use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;
use crate::flight::{FlightId, FlightRecord};

/// Durable storage of flight records.
///
/// The executor saves a record after every step transition; a flight can be
/// resumed from whatever was last saved.
pub trait FlightStore: Send + Sync {
    /// Store a new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateFlight`] if a record with the same id exists.
    fn create(&self, record: &FlightRecord) -> Result<(), StoreError>;

    /// Replace an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record was never created.
    fn save(&self, record: &FlightRecord) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    fn load(&self, id: &FlightId) -> Result<FlightRecord, StoreError>;

    /// All readable records, oldest submission first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be enumerated.
    fn list(&self) -> Result<Vec<FlightRecord>, StoreError>;
}

/// Process-local store, lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryFlightStore {
    records: RwLock<HashMap<FlightId, FlightRecord>>,
}

impl InMemoryFlightStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlightStore for InMemoryFlightStore {
    fn create(&self, record: &FlightRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(record.id()) {
            return Err(StoreError::DuplicateFlight(record.id().clone()));
        }
        records.insert(record.id().clone(), record.clone());
        Ok(())
    }

    fn save(&self, record: &FlightRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.get_mut(record.id()) {
            Some(stored) => {
                stored.clone_from(record);
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id().clone())),
        }
    }

    fn load(&self, id: &FlightId) -> Result<FlightRecord, StoreError> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn list(&self) -> Result<Vec<FlightRecord>, StoreError> {
        let mut records: Vec<FlightRecord> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sort_by_submission(&mut records);
        Ok(records)
    }
}

fn sort_by_submission(records: &mut [FlightRecord]) {
    records.sort_by(|a, b| {
        a.submitted_at()
            .cmp(&b.submitted_at())
            .then_with(|| a.id().cmp(b.id()))
    });
}

const RECORD_EXTENSION: &str = "json";

/// One pretty-printed JSON file per flight, named `<id>.json`.
///
/// Every write goes to a temporary file first. A new record is hard-linked
/// into place, which fails if the id is taken; an update is renamed over the
/// previous version. A crash never leaves a half-written record behind.
/// Records that cannot be parsed are skipped by [`FlightStore::list`] with a
/// warning.
#[derive(Debug, Clone)]
pub struct FileFlightStore {
    dir: PathBuf,
}

impl FileFlightStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Write {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &FlightId) -> Result<PathBuf, StoreError> {
        if !is_valid_file_id(id.as_str()) {
            return Err(StoreError::InvalidId(id.clone()));
        }
        Ok(self.dir.join(format!("{id}.{RECORD_EXTENSION}")))
    }

    fn encode(record: &FlightRecord) -> Result<String, StoreError> {
        serde_json::to_string_pretty(record).map_err(|source| StoreError::Serialize {
            id: record.id().clone(),
            source,
        })
    }

    fn read(path: &Path) -> Result<FlightRecord, StoreError> {
        let content = fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn is_valid_file_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl FlightStore for FileFlightStore {
    fn create(&self, record: &FlightRecord) -> Result<(), StoreError> {
        let path = self.path_for(record.id())?;
        let content = Self::encode(record)?;
        let temp = self
            .dir
            .join(format!("{}.{}.tmp", record.id(), Uuid::new_v4().simple()));
        fs::write(&temp, content).map_err(|source| {
            let _ = fs::remove_file(&temp);
            StoreError::Write {
                path: temp.clone(),
                source,
            }
        })?;
        let linked = fs::hard_link(&temp, &path);
        let _ = fs::remove_file(&temp);
        linked.map_err(|source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                StoreError::DuplicateFlight(record.id().clone())
            } else {
                StoreError::Write { path, source }
            }
        })
    }

    fn save(&self, record: &FlightRecord) -> Result<(), StoreError> {
        let path = self.path_for(record.id())?;
        if !path.exists() {
            return Err(StoreError::NotFound(record.id().clone()));
        }
        let content = Self::encode(record)?;
        let temp = path.with_extension(format!("{RECORD_EXTENSION}.tmp"));
        fs::write(&temp, content).map_err(|source| StoreError::Write {
            path: temp.clone(),
            source,
        })?;
        fs::rename(&temp, &path).map_err(|source| StoreError::Write { path, source })
    }

    fn load(&self, id: &FlightId) -> Result<FlightRecord, StoreError> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Err(StoreError::NotFound(id.clone()));
        }
        Self::read(&path)
    }

    fn list(&self) -> Result<Vec<FlightRecord>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::List {
            path: self.dir.clone(),
            source,
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::List {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match Self::read(&path) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable flight record");
                }
            }
        }
        sort_by_submission(&mut records);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_ids_reject_path_components() {
        assert!(is_valid_file_id("3f1c-job_1.retry"));
        assert!(!is_valid_file_id(""));
        assert!(!is_valid_file_id("../escape"));
        assert!(!is_valid_file_id(".hidden"));
        assert!(!is_valid_file_id("a/b"));
        assert!(!is_valid_file_id("a b"));
    }

    #[test]
    fn open_creates_missing_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("state").join("flights");

        let store = FileFlightStore::open(&nested)?;

        assert!(nested.is_dir());
        assert_eq!(store.dir(), nested);
        assert!(store.list()?.is_empty());
        Ok(())
    }

    #[test]
    fn load_of_unknown_id_is_not_found() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileFlightStore::open(dir.path())?;

        let err = store.load(&FlightId::new("missing")).expect_err("no record");

        assert!(matches!(err, StoreError::NotFound(_)));
        Ok(())
    }

    #[test]
    fn invalid_id_is_rejected_before_touching_disk() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileFlightStore::open(dir.path())?;

        let err = store.load(&FlightId::new("../etc/passwd")).expect_err("bad id");

        assert!(matches!(err, StoreError::InvalidId(_)));
        Ok(())
    }
}
