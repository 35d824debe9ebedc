use crate::models::{ChunkId, EmbeddingRecord, RetrievedPassage};
use crate::store::{blob_to_vector, cosine_similarity, vector_to_blob};
use crate::traits::VectorIndex;
use crate::IndexError;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

const SCHEMA_VERSION: u32 = 1;
const IN_MEMORY: &str = ":memory:";

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS records (
    document_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    fingerprint TEXT NOT NULL,
    indexed_at TEXT NOT NULL,
    PRIMARY KEY (document_id, chunk_index)
);
"#;

const UPSERT_RECORD: &str = r#"
INSERT INTO records (document_id, chunk_index, text, embedding, fingerprint, indexed_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(document_id, chunk_index) DO UPDATE SET
    text = excluded.text,
    embedding = excluded.embedding,
    fingerprint = excluded.fingerprint,
    indexed_at = excluded.indexed_at
"#;

/// Vector index persisted in a single SQLite file.
///
/// Vectors are stored as little-endian `f32` blobs and scored by a linear
/// cosine scan, which is plenty for a personal document folder. The
/// connection sits behind a mutex so a shared index can be read from any
/// task; no lock is held across an `.await`.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
    location: String,
    dimension: Option<usize>,
}

impl SqliteVectorIndex {
    /// Open the store at `path`, creating it when absent. A file that exists
    /// but is not a readable index fails with [`IndexError::Corrupt`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let location = path.display().to_string();
        let existed = path.exists();

        if !existed {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            info!(path = %location, "no index store found, creating a fresh one");
        }

        let conn = Connection::open(path).map_err(|error| {
            if existed {
                corrupt(&location, error)
            } else {
                IndexError::Storage(error)
            }
        })?;
        let mut index = Self {
            conn: Mutex::new(conn),
            location,
            dimension: None,
        };

        if existed {
            index.verify_existing()?;
        }
        index.initialize()?;
        index.dimension = index.load_dimension()?;

        info!(
            path = %index.location,
            records = index.len()?,
            dimension = ?index.dimension,
            "index store opened"
        );
        Ok(index)
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        let mut index = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            location: IN_MEMORY.to_string(),
            dimension: None,
        };
        index.initialize()?;
        Ok(index)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Flush and close the underlying connection.
    pub fn close(self) -> Result<(), IndexError> {
        let location = self.location;
        let conn = self.conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        conn.close().map_err(|(_, error)| IndexError::Storage(error))?;
        debug!(path = %location, "index store closed");
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn conn_mut(&mut self) -> &mut Connection {
        self.conn.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn verify_existing(&self) -> Result<(), IndexError> {
        let check: String = self
            .conn()
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(|error| corrupt(&self.location, error))?;
        if check != "ok" {
            return Err(corrupt(&self.location, check));
        }

        let tables: Vec<String> = self
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
            .and_then(|mut stmt| {
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>();
                names
            })
            .map_err(|error| corrupt(&self.location, error))?;

        // An empty database file is a store that was never written to.
        if tables.is_empty() {
            return Ok(());
        }

        for required in ["metadata", "records"] {
            if !tables.iter().any(|table| table == required) {
                return Err(corrupt(
                    &self.location,
                    format!("missing table `{required}`"),
                ));
            }
        }

        let version: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|error| corrupt(&self.location, error))?;

        match version.as_deref() {
            Some(found) if found == SCHEMA_VERSION.to_string() => Ok(()),
            Some(found) => Err(corrupt(
                &self.location,
                format!("schema version {found}, expected {SCHEMA_VERSION}"),
            )),
            None => Err(corrupt(&self.location, "schema version missing")),
        }
    }

    fn initialize(&mut self) -> Result<(), IndexError> {
        let _: String = self
            .conn()
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        self.conn_mut().execute_batch(CREATE_TABLES)?;
        self.conn_mut().execute(
            "INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }

    fn load_dimension(&self) -> Result<Option<usize>, IndexError> {
        let stored: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM metadata WHERE key = 'dimension'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        stored
            .map(|value| {
                value.parse::<usize>().map_err(|_| {
                    corrupt(&self.location, format!("invalid stored dimension `{value}`"))
                })
            })
            .transpose()
    }

    fn check_record(&self, record: &EmbeddingRecord) -> Result<(), IndexError> {
        let actual = record.vector.len();
        if actual == 0 {
            return Err(IndexError::InvalidRecord(format!(
                "{} has an empty embedding",
                record.chunk_id
            )));
        }

        match self.dimension {
            Some(expected) if expected != actual => Err(IndexError::Schema { expected, actual }),
            _ => Ok(()),
        }
    }

    fn write_record(conn: &Connection, record: &EmbeddingRecord) -> Result<(), IndexError> {
        conn.execute(
            UPSERT_RECORD,
            params![
                record.chunk_id.document_id,
                record.chunk_id.index as i64,
                record.text,
                vector_to_blob(&record.vector),
                record.fingerprint,
                record.indexed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn remember_dimension(conn: &Connection, dimension: usize) -> Result<(), IndexError> {
        conn.execute(
            "INSERT OR IGNORE INTO metadata (key, value) VALUES ('dimension', ?1)",
            params![dimension.to_string()],
        )?;
        Ok(())
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn upsert(&mut self, record: &EmbeddingRecord) -> Result<(), IndexError> {
        self.check_record(record)?;

        let tx = self.conn_mut().transaction()?;
        Self::write_record(&tx, record)?;
        Self::remember_dimension(&tx, record.vector.len())?;
        tx.commit()?;

        self.dimension.get_or_insert(record.vector.len());
        Ok(())
    }

    fn replace_document(
        &mut self,
        document_id: &str,
        records: &[EmbeddingRecord],
    ) -> Result<(), IndexError> {
        let mut dimension = self.dimension;
        for record in records {
            if record.chunk_id.document_id != document_id {
                return Err(IndexError::InvalidRecord(format!(
                    "{} does not belong to {document_id}",
                    record.chunk_id
                )));
            }
            self.check_record(record)?;
            match dimension {
                Some(expected) if expected != record.vector.len() => {
                    return Err(IndexError::Schema {
                        expected,
                        actual: record.vector.len(),
                    })
                }
                _ => dimension = Some(record.vector.len()),
            }
        }

        let tx = self.conn_mut().transaction()?;
        let removed = tx.execute(
            "DELETE FROM records WHERE document_id = ?1",
            params![document_id],
        )?;
        for record in records {
            Self::write_record(&tx, record)?;
        }
        if let Some(dimension) = dimension {
            Self::remember_dimension(&tx, dimension)?;
        }
        tx.commit()?;

        self.dimension = dimension;
        debug!(document_id, removed, written = records.len(), "document records replaced");
        Ok(())
    }

    fn delete_by_document(&mut self, document_id: &str) -> Result<usize, IndexError> {
        let removed = self.conn_mut().execute(
            "DELETE FROM records WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(removed)
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedPassage>, IndexError> {
        if top_k == 0 {
            return Err(IndexError::InvalidQuery(
                "top_k must be at least 1".to_string(),
            ));
        }
        if let Some(expected) = self.dimension {
            if expected != vector.len() {
                return Err(IndexError::Schema {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT document_id, chunk_index, text, embedding FROM records")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (document_id, index, text, blob) = row?;
            let stored = blob_to_vector(&blob).ok_or_else(|| {
                corrupt(
                    &self.location,
                    format!("malformed embedding for {document_id}#{index}"),
                )
            })?;

            hits.push(RetrievedPassage {
                chunk_id: ChunkId::new(document_id, index as u64),
                text,
                score: cosine_similarity(vector, &stored),
            });
        }

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.chunk_id.cmp(&right.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    fn fingerprint_for_document(&self, document_id: &str) -> Result<Option<String>, IndexError> {
        let fingerprint = self
            .conn()
            .query_row(
                "SELECT fingerprint FROM records WHERE document_id = ?1 LIMIT 1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fingerprint)
    }

    fn document_ids(&self) -> Result<Vec<String>, IndexError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT document_id FROM records ORDER BY document_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn len(&self) -> Result<usize, IndexError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

fn corrupt(location: &str, details: impl ToString) -> IndexError {
    IndexError::Corrupt {
        path: location.to_string(),
        details: details.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(document_id: &str, index: u64, text: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk_id: ChunkId::new(document_id, index),
            text: text.to_string(),
            vector,
            fingerprint: format!("fp-{document_id}"),
            indexed_at: Utc::now(),
        }
    }

    #[test]
    fn upserting_same_chunk_twice_keeps_one_record() -> Result<(), IndexError> {
        let mut index = SqliteVectorIndex::open_in_memory()?;
        index.upsert(&record("a.txt", 0, "first", vec![1.0, 0.0]))?;
        index.upsert(&record("a.txt", 0, "second", vec![0.0, 1.0]))?;

        assert_eq!(index.len()?, 1);
        let hits = index.query(&[0.0, 1.0], 5)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "second");
        Ok(())
    }

    #[test]
    fn index_can_be_shared_between_tasks() {
        fn assert_shareable<T: Send + Sync>() {}
        assert_shareable::<SqliteVectorIndex>();
    }

    #[test]
    fn query_returns_top_k_in_descending_score_order() -> Result<(), IndexError> {
        let mut index = SqliteVectorIndex::open_in_memory()?;
        index.upsert(&record("a.txt", 0, "east", vec![1.0, 0.0]))?;
        index.upsert(&record("a.txt", 1, "north", vec![0.0, 1.0]))?;
        index.upsert(&record("b.txt", 0, "north-east", vec![1.0, 1.0]))?;
        index.upsert(&record("c.txt", 0, "west", vec![-1.0, 0.0]))?;

        let hits = index.query(&[1.0, 0.2], 3)?;
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
        assert_eq!(hits[0].text, "east");
        assert_eq!(hits[0].document_id(), "a.txt");
        assert!(hits.iter().all(|hit| hit.text != "west"));
        Ok(())
    }

    #[test]
    fn empty_index_query_is_empty_and_zero_top_k_is_rejected() -> Result<(), IndexError> {
        let index = SqliteVectorIndex::open_in_memory()?;
        assert!(index.query(&[0.5, 0.5], 5)?.is_empty());
        assert!(matches!(
            index.query(&[0.5, 0.5], 0),
            Err(IndexError::InvalidQuery(_))
        ));
        Ok(())
    }

    #[test]
    fn dimension_mismatch_is_a_schema_error() -> Result<(), IndexError> {
        let mut index = SqliteVectorIndex::open_in_memory()?;
        index.upsert(&record("a.txt", 0, "first", vec![1.0, 0.0, 0.0]))?;

        let result = index.upsert(&record("b.txt", 0, "second", vec![1.0, 0.0]));
        assert!(matches!(
            result,
            Err(IndexError::Schema {
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            index.query(&[1.0], 1),
            Err(IndexError::Schema { .. })
        ));
        assert_eq!(index.len()?, 1);
        Ok(())
    }

    #[test]
    fn delete_by_document_clears_fingerprint() -> Result<(), IndexError> {
        let mut index = SqliteVectorIndex::open_in_memory()?;
        index.upsert(&record("a.txt", 0, "one", vec![1.0]))?;
        index.upsert(&record("a.txt", 1, "two", vec![1.0]))?;
        index.upsert(&record("b.txt", 0, "three", vec![1.0]))?;

        assert_eq!(index.fingerprint_for_document("a.txt")?.as_deref(), Some("fp-a.txt"));
        assert_eq!(index.delete_by_document("a.txt")?, 2);
        assert_eq!(index.fingerprint_for_document("a.txt")?, None);
        assert_eq!(index.document_ids()?, vec!["b.txt".to_string()]);
        Ok(())
    }

    #[test]
    fn replace_document_is_all_or_nothing() -> Result<(), IndexError> {
        let mut index = SqliteVectorIndex::open_in_memory()?;
        index.replace_document(
            "a.txt",
            &[
                record("a.txt", 0, "one", vec![1.0, 0.0]),
                record("a.txt", 1, "two", vec![0.0, 1.0]),
                record("a.txt", 2, "three", vec![1.0, 1.0]),
            ],
        )?;

        let broken = [
            record("a.txt", 0, "new", vec![1.0, 0.0]),
            record("a.txt", 1, "wrong size", vec![1.0, 0.0, 0.0]),
        ];
        assert!(index.replace_document("a.txt", &broken).is_err());
        assert_eq!(index.len()?, 3);

        index.replace_document("a.txt", &[record("a.txt", 0, "shorter", vec![1.0, 0.0])])?;
        assert_eq!(index.len()?, 1);
        Ok(())
    }

    #[test]
    fn records_survive_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("index.sqlite3");

        let mut index = SqliteVectorIndex::open(&path)?;
        index.upsert(&record("a.txt", 0, "persisted", vec![0.25, 0.75]))?;
        index.close()?;

        let reopened = SqliteVectorIndex::open(&path)?;
        assert_eq!(reopened.len()?, 1);
        assert_eq!(reopened.dimension(), Some(2));
        assert_eq!(
            reopened.fingerprint_for_document("a.txt")?.as_deref(),
            Some("fp-a.txt")
        );
        Ok(())
    }

    #[test]
    fn unreadable_store_fails_fast() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index.sqlite3");
        fs::write(&path, b"this is definitely not a sqlite database, just some bytes")?;

        let result = SqliteVectorIndex::open(&path);
        assert!(matches!(result, Err(IndexError::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn foreign_database_is_treated_as_corrupt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index.sqlite3");
        let conn = Connection::open(&path)?;
        conn.execute_batch("CREATE TABLE unrelated (id INTEGER PRIMARY KEY);")?;
        drop(conn);

        assert!(matches!(
            SqliteVectorIndex::open(&path),
            Err(IndexError::Corrupt { .. })
        ));
        Ok(())
    }

    #[test]
    fn empty_file_opens_as_fresh_store() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index.sqlite3");
        fs::write(&path, b"")?;

        let index = SqliteVectorIndex::open(&path)?;
        assert!(index.is_empty()?);
        Ok(())
    }
}
