//! Document ingestion and similarity retrieval.
//!
//! [`DocumentStore`] ties together the pieces: file loaders with per-type
//! chunking ([`loader`]), an [`embedding::Embedder`], and one of three
//! persisted index backends ([`store`], [`sqlite`]) selected by
//! [`VectorBackend`].

pub mod embedding;
pub mod loader;
pub mod sqlite;
pub mod store;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::cloudpilot::provider::VectorBackend;

use embedding::Embedder;
use loader::{apply_chunk_policy, load_file, loader_for_extension};
use store::{DocRecord, FlatStore, JsonlStore, ScoredRecord, StoredRecord, VectorStore};

/// One embedding index plus the fixed embedder it was created with.
pub struct DocumentStore {
    backend: VectorBackend,
    embedder: Arc<dyn Embedder>,
    index: Mutex<Box<dyn VectorStore>>,
}

impl DocumentStore {
    /// Open (or create) the backend's index under its persistence directory.
    pub fn open(
        backend: VectorBackend,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let dir = PathBuf::from(backend.persist_dir());
        std::fs::create_dir_all(&dir)?;
        Self::open_at(backend, embedder, &dir)
    }

    /// Same as [`DocumentStore::open`] with an explicit directory, for tests.
    pub fn open_at(
        backend: VectorBackend,
        embedder: Arc<dyn Embedder>,
        dir: &Path,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        loader::validate_loader_table()?;
        let index: Box<dyn VectorStore> = match backend {
            VectorBackend::Flat => Box::new(FlatStore::open(dir)?),
            VectorBackend::Jsonl => Box::new(JsonlStore::open(dir)?),
            VectorBackend::Sqlite => Box::new(sqlite::SqliteStore::open(dir)?),
        };
        Ok(DocumentStore {
            backend,
            embedder,
            index: Mutex::new(index),
        })
    }

    pub fn backend(&self) -> VectorBackend {
        self.backend
    }

    /// Ingest the given files. Paths with unsupported extensions are skipped
    /// silently; loader failures on supported files propagate. Returns `true`
    /// only when at least one record was inserted.
    pub async fn add_documents(
        &self,
        paths: &[PathBuf],
        page_split: bool,
    ) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let mut records = Vec::new();
        let mut contents = Vec::new();
        for path in paths {
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default();
            let (_, policy) = match loader_for_extension(extension) {
                Some(pair) => pair,
                None => {
                    log::debug!("skipping unsupported file {}", path.display());
                    continue;
                }
            };
            let mut segments = load_file(path)?;
            if page_split {
                segments = apply_chunk_policy(segments, policy);
            }
            let source = path.to_string_lossy().into_owned();
            for segment in segments {
                contents.push(segment.content.clone());
                records.push(DocRecord {
                    id: Uuid::new_v4().to_string(),
                    source: source.clone(),
                    position: segment.position,
                    section: segment.section,
                    content: segment.content,
                });
            }
        }
        if records.is_empty() {
            return Ok(false);
        }

        let embeddings = self.embedder.embed(&contents).await?;
        let stored: Vec<StoredRecord> = records
            .into_iter()
            .zip(embeddings)
            .map(|(record, embedding)| StoredRecord { record, embedding })
            .collect();

        let inserted = self.lock_index()?.add(stored)?;
        log::info!("ingested {} records ({} backend)", inserted, self.backend.name());
        Ok(inserted > 0)
    }

    /// The `k` nearest records to the query text.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredRecord>, Box<dyn Error + Send + Sync>> {
        let embeddings = self.embedder.embed(&[query.to_string()]).await?;
        let query_vector = embeddings.into_iter().next().ok_or("embedder returned nothing")?;
        self.lock_index()?.search(&query_vector, k)
    }

    /// Two-phase delete: resolve the source to record ids, then delete by id.
    /// Unknown sources resolve to an empty id list and delete nothing.
    pub fn delete_by_source(&self, source: &str) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let mut index = self.lock_index()?;
        let ids = index.ids_for_source(source)?;
        if ids.is_empty() {
            return Ok(0);
        }
        index.delete_by_ids(&ids)
    }

    pub fn persist(&self) -> Result<bool, Box<dyn Error + Send + Sync>> {
        self.lock_index()?.persist()
    }

    pub fn is_durable(&self) -> bool {
        self.index
            .lock()
            .map(|index| index.is_durable())
            .unwrap_or(false)
    }

    fn lock_index(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Box<dyn VectorStore>>, Box<dyn Error + Send + Sync>> {
        self.index
            .lock()
            .map_err(|_| "document index lock poisoned".into())
    }
}
