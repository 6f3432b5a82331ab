//! Vector index backends: flat snapshot and JSONL log.
//!
//! All backends share the [`VectorStore`] capability interface and report
//! their true durability through `persist()`/`is_durable()` instead of hiding
//! it behind an always-successful save:
//! - [`FlatStore`] holds everything in memory and is durable only after an
//!   explicit `persist()` writes the JSON snapshot.
//! - [`JsonlStore`] rewrites its log on every mutation; `persist()` is a
//!   no-op that reports success.
//! The sqlite backend lives in [`super::sqlite`].

use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One ingested chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocRecord {
    pub id: String,
    /// Path the content was ingested from; the deletion key.
    pub source: String,
    /// Page/slide/sheet/chunk position within the source.
    pub position: u32,
    /// Sheet name, slide number, or similar label when the format has one.
    pub section: Option<String>,
    pub content: String,
}

impl DocRecord {
    /// Human-readable provenance, used by the retrieval tool's serialization.
    pub fn source_label(&self) -> String {
        match &self.section {
            Some(section) => format!("{} ({})", self.source, section),
            None => format!("{} (position {})", self.source, self.position),
        }
    }
}

/// A record plus its stored embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record: DocRecord,
    pub embedding: Vec<f32>,
}

/// A search hit with its similarity score, higher is closer.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: DocRecord,
    pub score: f32,
}

/// Capability interface every index backend implements.
pub trait VectorStore: Send {
    fn add(&mut self, records: Vec<StoredRecord>) -> Result<usize, Box<dyn Error + Send + Sync>>;

    /// The `k` nearest records to the query vector by cosine similarity.
    fn search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, Box<dyn Error + Send + Sync>>;

    /// Ids of every record ingested from the given source path.
    fn ids_for_source(&self, source: &str) -> Result<Vec<String>, Box<dyn Error + Send + Sync>>;

    fn delete_by_ids(&mut self, ids: &[String]) -> Result<usize, Box<dyn Error + Send + Sync>>;

    /// Flush to disk where that is a distinct step. Returns whether the data
    /// is durable after the call.
    fn persist(&mut self) -> Result<bool, Box<dyn Error + Send + Sync>>;

    /// Whether mutations are durable without calling [`VectorStore::persist`].
    fn is_durable(&self) -> bool;
}

/// Cosine similarity; zero vectors score 0 rather than NaN.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Rank the in-memory records against a query vector.
fn rank(records: &[StoredRecord], query: &[f32], k: usize) -> Vec<ScoredRecord> {
    let mut scored: Vec<ScoredRecord> = records
        .iter()
        .map(|stored| ScoredRecord {
            record: stored.record.clone(),
            score: cosine(query, &stored.embedding),
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

/// In-memory index with an explicit JSON snapshot.
pub struct FlatStore {
    path: PathBuf,
    records: Vec<StoredRecord>,
}

impl FlatStore {
    pub fn open(dir: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let path = dir.join("index.json");
        let records = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        Ok(FlatStore { path, records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl VectorStore for FlatStore {
    fn add(&mut self, records: Vec<StoredRecord>) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let added = records.len();
        self.records.extend(records);
        Ok(added)
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, Box<dyn Error + Send + Sync>> {
        Ok(rank(&self.records, query, k))
    }

    fn ids_for_source(&self, source: &str) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        Ok(self
            .records
            .iter()
            .filter(|stored| stored.record.source == source)
            .map(|stored| stored.record.id.clone())
            .collect())
    }

    fn delete_by_ids(&mut self, ids: &[String]) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let before = self.records.len();
        self.records
            .retain(|stored| !ids.contains(&stored.record.id));
        Ok(before - self.records.len())
    }

    fn persist(&mut self) -> Result<bool, Box<dyn Error + Send + Sync>> {
        fs::write(&self.path, serde_json::to_string(&self.records)?)?;
        Ok(true)
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// Append-style index persisted as one JSON record per line, rewritten on
/// every mutation so the file always matches memory.
pub struct JsonlStore {
    path: PathBuf,
    records: Vec<StoredRecord>,
}

impl JsonlStore {
    pub fn open(dir: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let path = dir.join("records.jsonl");
        let mut records = Vec::new();
        if path.exists() {
            for line in fs::read_to_string(&path)?.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                records.push(serde_json::from_str(line)?);
            }
        }
        Ok(JsonlStore { path, records })
    }

    fn rewrite(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut file = fs::File::create(&self.path)?;
        for stored in &self.records {
            writeln!(file, "{}", serde_json::to_string(stored)?)?;
        }
        Ok(())
    }
}

impl VectorStore for JsonlStore {
    fn add(&mut self, records: Vec<StoredRecord>) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let added = records.len();
        self.records.extend(records);
        self.rewrite()?;
        Ok(added)
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, Box<dyn Error + Send + Sync>> {
        Ok(rank(&self.records, query, k))
    }

    fn ids_for_source(&self, source: &str) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        Ok(self
            .records
            .iter()
            .filter(|stored| stored.record.source == source)
            .map(|stored| stored.record.id.clone())
            .collect())
    }

    fn delete_by_ids(&mut self, ids: &[String]) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let before = self.records.len();
        self.records
            .retain(|stored| !ids.contains(&stored.record.id));
        let removed = before - self.records.len();
        if removed > 0 {
            self.rewrite()?;
        }
        Ok(removed)
    }

    fn persist(&mut self) -> Result<bool, Box<dyn Error + Send + Sync>> {
        // Every mutation already rewrote the log.
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
                section: None,
                content: format!("content of {}", id),
            },
            embedding,
        }
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ranking_returns_nearest_first_and_truncates() {
        let records = vec![
            stored("far", "a.txt", vec![0.0, 1.0]),
            stored("near", "a.txt", vec![1.0, 0.0]),
            stored("mid", "a.txt", vec![0.7, 0.7]),
        ];
        let hits = rank(&records, &[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, "near");
        assert_eq!(hits[1].record.id, "mid");
    }

    #[test]
    fn flat_store_is_durable_only_after_persist() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatStore::open(dir.path()).unwrap();
        store.add(vec![stored("r1", "a.txt", vec![1.0])]).unwrap();
        assert!(!store.is_durable());

        // Unpersisted data does not survive reopen.
        let reopened = FlatStore::open(dir.path()).unwrap();
        assert!(reopened.is_empty());

        assert!(store.persist().unwrap());
        let reopened = FlatStore::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn jsonl_store_survives_reopen_without_persist() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlStore::open(dir.path()).unwrap();
        store
            .add(vec![
                stored("r1", "a.txt", vec![1.0, 0.0]),
                stored("r2", "b.txt", vec![0.0, 1.0]),
            ])
            .unwrap();
        assert!(store.is_durable());
        assert!(store.persist().unwrap());

        let reopened = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(reopened.ids_for_source("a.txt").unwrap(), vec!["r1"]);
        assert_eq!(reopened.ids_for_source("b.txt").unwrap(), vec!["r2"]);
    }

    #[test]
    fn delete_by_missing_source_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlStore::open(dir.path()).unwrap();
        store.add(vec![stored("r1", "a.txt", vec![1.0])]).unwrap();

        let ids = store.ids_for_source("missing.txt").unwrap();
        assert!(ids.is_empty());
        assert_eq!(store.delete_by_ids(&ids).unwrap(), 0);
        assert_eq!(store.ids_for_source("a.txt").unwrap().len(), 1);
    }

    #[test]
    fn source_label_prefers_section() {
        let record = DocRecord {
            id: "r".to_string(),
            source: "deck.pptx".to_string(),
            position: 2,
            section: Some("slide 3".to_string()),
            content: String::new(),
        };
        assert_eq!(record.source_label(), "deck.pptx (slide 3)");
    }
}
