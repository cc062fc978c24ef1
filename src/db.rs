use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, ErrorCode, params, params_from_iter};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::{FingerprintRecord, FingerprintRepository, Recording, RecordingRepository};

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => StoreError::WriteConflict(err.to_string()),
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

// SQLite refuses statements with more than 32766 bound parameters
const MAX_QUERY_PARAMS: usize = 32_000;

/// Fingerprint index persisted in a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)?;
        info!(path = %db_path.display(), "opened fingerprint database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        setup_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))
    }
}

fn setup_database(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS records (
            record_id     TEXT PRIMARY KEY NOT NULL,
            fingerprinted INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS fingerprints (
            hash        TEXT NOT NULL,
            record_id   TEXT NOT NULL,
            time_offset INTEGER NOT NULL,
            PRIMARY KEY (hash, record_id, time_offset)
        ) WITHOUT ROWID;
        CREATE INDEX IF NOT EXISTS idx_fingerprints_record ON fingerprints (record_id);",
    )?;
    debug!("database schema ready");
    Ok(())
}

impl FingerprintRepository for SqliteStore {
    fn put_fingerprints(&self, records: &[FingerprintRecord]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO fingerprints (hash, record_id, time_offset)
                 VALUES (?1, ?2, ?3)",
            )?;
            for record in records {
                stmt.execute(params![record.hash, record.recording_id, record.offset])?;
            }
        }
        tx.commit()?;
        debug!(rows = records.len(), "fingerprints inserted");
        Ok(())
    }

    fn find_by_hashes(&self, hashes: &[String]) -> Result<Vec<FingerprintRecord>, StoreError> {
        let unique: Vec<&String> = hashes.iter().collect::<BTreeSet<_>>().into_iter().collect();
        let conn = self.conn()?;
        let mut found = Vec::new();
        for chunk in unique.chunks(MAX_QUERY_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT DISTINCT hash, record_id, time_offset FROM fingerprints WHERE hash IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok(FingerprintRecord {
                    hash: row.get(0)?,
                    recording_id: row.get(1)?,
                    offset: row.get(2)?,
                })
            })?;
            for row in rows {
                found.push(row?);
            }
        }
        Ok(found)
    }

    fn count_by_recording(&self, recording_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT COUNT(*) FROM fingerprints WHERE record_id = ?1")?;
        let count: i64 = stmt.query_row(params![recording_id], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn delete_by_recording(&self, recording_id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM fingerprints WHERE record_id = ?1",
            params![recording_id],
        )?;
        info!(recording_id, removed, "deleted fingerprints");
        Ok(())
    }

    fn delete_all_fingerprints(&self) -> Result<(), StoreError> {
        let removed = self.conn()?.execute("DELETE FROM fingerprints", [])?;
        info!(removed, "deleted all fingerprints");
        Ok(())
    }
}

impl RecordingRepository for SqliteStore {
    fn put_recording(&self, recording: &Recording) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO records (record_id, fingerprinted) VALUES (?1, ?2)",
            params![recording.recording_id, recording.fingerprinted],
        )?;
        Ok(())
    }

    fn recordings(&self) -> Result<Vec<Recording>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT record_id, fingerprinted FROM records ORDER BY record_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Recording {
                recording_id: row.get(0)?,
                fingerprinted: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn delete_recording(&self, recording_id: &str) -> Result<(), StoreError> {
        self.conn()?
            .execute("DELETE FROM records WHERE record_id = ?1", params![recording_id])?;
        Ok(())
    }

    fn delete_all_recordings(&self) -> Result<(), StoreError> {
        let removed = self.conn()?.execute("DELETE FROM records", [])?;
        info!(removed, "deleted all recordings");
        Ok(())
    }
}
