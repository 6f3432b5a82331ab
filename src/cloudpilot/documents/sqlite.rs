//! SQLite-backed index: every mutation is durable the moment it commits, and
//! delete-by-source resolves ids with a native `WHERE source = ?` query
//! instead of a full scan.

use std::error::Error;
use std::path::Path;

use rusqlite::{params, Connection};

use super::store::{cosine, DocRecord, ScoredRecord, StoredRecord, VectorStore};

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(dir: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let conn = Connection::open(dir.join("index.db"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    /// Backing store for tests; no file involved.
    pub fn in_memory() -> Result<Self, Box<dyn Error + Send + Sync>> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, Box<dyn Error + Send + Sync>> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                 id        TEXT PRIMARY KEY,
                 source    TEXT NOT NULL,
                 position  INTEGER NOT NULL,
                 section   TEXT,
                 content   TEXT NOT NULL,
                 embedding BLOB NOT NULL
             )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_source ON documents (source)",
            [],
        )?;
        Ok(SqliteStore { conn })
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl VectorStore for SqliteStore {
    fn add(&mut self, records: Vec<StoredRecord>) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let tx = self.conn.transaction()?;
        let added = records.len();
        for stored in records {
            tx.execute(
                "INSERT OR REPLACE INTO documents (id, source, position, section, content, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    stored.record.id,
                    stored.record.source,
                    stored.record.position,
                    stored.record.section,
                    stored.record.content,
                    encode_embedding(&stored.embedding),
                ],
            )?;
        }
        tx.commit()?;
        Ok(added)
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, Box<dyn Error + Send + Sync>> {
        let mut statement = self
            .conn
            .prepare("SELECT id, source, position, section, content, embedding FROM documents")?;
        let rows = statement.query_map([], |row| {
            let embedding: Vec<u8> = row.get(5)?;
            Ok((
                DocRecord {
                    id: row.get(0)?,
                    source: row.get(1)?,
                    position: row.get(2)?,
                    section: row.get(3)?,
                    content: row.get(4)?,
                },
                embedding,
            ))
        })?;
        let mut scored = Vec::new();
        for row in rows {
            let (record, embedding) = row?;
            scored.push(ScoredRecord {
                score: cosine(query, &decode_embedding(&embedding)),
                record,
            });
        }
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn ids_for_source(&self, source: &str) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        let mut statement = self
            .conn
            .prepare("SELECT id FROM documents WHERE source = ?1")?;
        let rows = statement.query_map([source], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }

    fn delete_by_ids(&mut self, ids: &[String]) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        for id in ids {
            removed += tx.execute("DELETE FROM documents WHERE id = ?1", [id])?;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn persist(&mut self) -> Result<bool, Box<dyn Error + Send + Sync>> {
        // Committed transactions are already on disk.
        Ok(true)
    }

    fn is_durable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: &str, source: &str, embedding: Vec<f32>) -> StoredRecord {
        StoredRecord {
            record: DocRecord {
                id: id.to_string(),
                source: source.to_string(),
                position: 0,
                section: Some("sheet 1".to_string()),
                content: format!("content {}", id),
            },
            embedding,
        }
    }

    #[test]
    fn round_trips_records_and_embeddings() {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .add(vec![
                stored("r1", "a.xlsx", vec![1.0, 0.0]),
                stored("r2", "b.xlsx", vec![0.0, 1.0]),
            ])
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "r1");
        assert_eq!(hits[0].record.section.as_deref(), Some("sheet 1"));
        assert!(hits[0].score > 0.99);
    }

    #[test]
    fn deletes_by_source_resolved_ids() {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .add(vec![
                stored("r1", "a.xlsx", vec![1.0]),
                stored("r2", "a.xlsx", vec![0.5]),
                stored("r3", "b.xlsx", vec![0.2]),
            ])
            .unwrap();

        let ids = store.ids_for_source("a.xlsx").unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(store.delete_by_ids(&ids).unwrap(), 2);
        assert!(store.ids_for_source("a.xlsx").unwrap().is_empty());
        assert_eq!(store.ids_for_source("b.xlsx").unwrap(), vec!["r3"]);
    }

    #[test]
    fn survives_reopen_without_persist() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = SqliteStore::open(dir.path()).unwrap();
            store.add(vec![stored("r1", "a.xlsx", vec![1.0])]).unwrap();
            assert!(store.is_durable());
        }
        let store = SqliteStore::open(dir.path()).unwrap();
        assert_eq!(store.ids_for_source("a.xlsx").unwrap(), vec!["r1"]);
    }

    #[test]
    fn embedding_codec_round_trips() {
        let embedding = vec![0.25f32, -1.5, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&embedding)), embedding);
    }
}
