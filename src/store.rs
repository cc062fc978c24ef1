//! Storage contracts for fingerprint rows and recording markers.
//!
//! The core only ever talks to these traits. [`MemoryStore`] keeps
//! everything in process; `crate::db::SqliteStore` persists to SQLite.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;

/// One `(hash, recording, offset)` row of the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FingerprintRecord {
    pub hash: String,
    pub recording_id: String,
    pub offset: u32,
}

/// Marker written once per ingested reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub recording_id: String,
    pub fingerprinted: bool,
}

pub trait FingerprintRepository {
    /// Inserts a batch atomically. Rows already present are ignored.
    fn put_fingerprints(&self, records: &[FingerprintRecord]) -> Result<(), StoreError>;

    /// All rows whose hash is in `hashes`, in no particular order.
    fn find_by_hashes(&self, hashes: &[String]) -> Result<Vec<FingerprintRecord>, StoreError>;

    fn count_by_recording(&self, recording_id: &str) -> Result<usize, StoreError>;

    fn delete_by_recording(&self, recording_id: &str) -> Result<(), StoreError>;

    fn delete_all_fingerprints(&self) -> Result<(), StoreError>;
}

pub trait RecordingRepository {
    /// Writes the marker unless one already exists for the id.
    fn put_recording(&self, recording: &Recording) -> Result<(), StoreError>;

    fn recordings(&self) -> Result<Vec<Recording>, StoreError>;

    fn delete_recording(&self, recording_id: &str) -> Result<(), StoreError>;

    fn delete_all_recordings(&self) -> Result<(), StoreError>;
}

/// Both repositories behind one shareable handle.
pub trait Store: FingerprintRepository + RecordingRepository + Send + Sync {}

impl<T> Store for T where T: FingerprintRepository + RecordingRepository + Send + Sync {}

#[derive(Debug, Default)]
struct MemoryInner {
    by_hash: HashMap<String, Vec<(String, u32)>>,
    rows: HashSet<FingerprintRecord>,
    recordings: Vec<Recording>,
}

/// Hash multimap held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl FingerprintRepository for MemoryStore {
    fn put_fingerprints(&self, records: &[FingerprintRecord]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        for record in records {
            if inner.rows.insert(record.clone()) {
                inner
                    .by_hash
                    .entry(record.hash.clone())
                    .or_default()
                    .push((record.recording_id.clone(), record.offset));
            }
        }
        Ok(())
    }

    fn find_by_hashes(&self, hashes: &[String]) -> Result<Vec<FingerprintRecord>, StoreError> {
        let inner = self.lock()?;
        let unique: HashSet<&String> = hashes.iter().collect();
        let mut found = Vec::new();
        for hash in unique {
            if let Some(entries) = inner.by_hash.get(hash) {
                found.extend(entries.iter().map(|(recording_id, offset)| FingerprintRecord {
                    hash: hash.clone(),
                    recording_id: recording_id.clone(),
                    offset: *offset,
                }));
            }
        }
        Ok(found)
    }

    fn count_by_recording(&self, recording_id: &str) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .rows
            .iter()
            .filter(|r| r.recording_id == recording_id)
            .count())
    }

    fn delete_by_recording(&self, recording_id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.rows.retain(|r| r.recording_id != recording_id);
        inner.by_hash.retain(|_, entries| {
            entries.retain(|(id, _)| id != recording_id);
            !entries.is_empty()
        });
        Ok(())
    }

    fn delete_all_fingerprints(&self) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.rows.clear();
        inner.by_hash.clear();
        Ok(())
    }
}

impl RecordingRepository for MemoryStore {
    fn put_recording(&self, recording: &Recording) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner
            .recordings
            .iter()
            .any(|r| r.recording_id == recording.recording_id)
        {
            inner.recordings.push(recording.clone());
        }
        Ok(())
    }

    fn recordings(&self) -> Result<Vec<Recording>, StoreError> {
        Ok(self.lock()?.recordings.clone())
    }

    fn delete_recording(&self, recording_id: &str) -> Result<(), StoreError> {
        self.lock()?
            .recordings
            .retain(|r| r.recording_id != recording_id);
        Ok(())
    }

    fn delete_all_recordings(&self) -> Result<(), StoreError> {
        self.lock()?.recordings.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(hash: &str, recording_id: &str, offset: u32) -> FingerprintRecord {
        FingerprintRecord {
            hash: hash.into(),
            recording_id: recording_id.into(),
            offset,
        }
    }

    #[test]
    fn duplicate_rows_are_ignored() {
        let store = MemoryStore::new();
        store
            .put_fingerprints(&[row("aa", "R1", 1), row("aa", "R1", 1), row("aa", "R1", 2)])
            .unwrap();
        store.put_fingerprints(&[row("aa", "R1", 1)]).unwrap();
        assert_eq!(store.count_by_recording("R1").unwrap(), 2);
        assert_eq!(store.find_by_hashes(&["aa".into()]).unwrap().len(), 2);
    }

    #[test]
    fn lookup_returns_rows_of_all_recordings() {
        let store = MemoryStore::new();
        store
            .put_fingerprints(&[row("aa", "R1", 1), row("aa", "R2", 9), row("bb", "R2", 3)])
            .unwrap();
        let mut found = store
            .find_by_hashes(&["aa".into(), "aa".into(), "zz".into()])
            .unwrap();
        found.sort();
        assert_eq!(found, vec![row("aa", "R1", 1), row("aa", "R2", 9)]);
    }

    #[test]
    fn delete_by_recording_leaves_others() {
        let store = MemoryStore::new();
        store
            .put_fingerprints(&[row("aa", "R1", 1), row("aa", "R2", 9)])
            .unwrap();
        store.delete_by_recording("R1").unwrap();
        assert_eq!(store.count_by_recording("R1").unwrap(), 0);
        assert_eq!(
            store.find_by_hashes(&["aa".into()]).unwrap(),
            vec![row("aa", "R2", 9)]
        );
        store.delete_all_fingerprints().unwrap();
        assert!(store.find_by_hashes(&["aa".into()]).unwrap().is_empty());
    }

    #[test]
    fn recordings_are_write_once() {
        let store = MemoryStore::new();
        let marker = Recording {
            recording_id: "R1".into(),
            fingerprinted: true,
        };
        store.put_recording(&marker).unwrap();
        store
            .put_recording(&Recording {
                recording_id: "R1".into(),
                fingerprinted: false,
            })
            .unwrap();
        assert_eq!(store.recordings().unwrap(), vec![marker]);
        store.delete_all_recordings().unwrap();
        assert!(store.recordings().unwrap().is_empty());
    }
}
