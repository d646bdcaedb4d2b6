//! Schema Index
//!
//! Builds the similarity index over per-table descriptor text and publishes
//! it as an immutable, versioned [`IndexSnapshot`]. Readers clone the current
//! `Arc` and keep using it even if a rebuild swaps in a newer snapshot.

use crate::catalog::{SchemaCatalog, TableDescriptor};
use crate::error::{Nl2SqlError, Result};
use crate::schema_rag::embedder::{Embedder, Embedding};
use crate::schema_rag::vector_store::{FlatIpIndex, VectorIndex};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Descriptors plus the parallel embedding matrix, never mutated after
/// construction.
#[derive(Debug)]
pub struct IndexSnapshot {
    version: u64,
    tables: Vec<Arc<TableDescriptor>>,
    index: FlatIpIndex,
    built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    pub fn new(version: u64, tables: Vec<TableDescriptor>, embeddings: &[Embedding]) -> Result<Self> {
        if tables.len() != embeddings.len() {
            return Err(Nl2SqlError::Index(format!(
                "{} descriptors but {} embeddings",
                tables.len(),
                embeddings.len()
            )));
        }
        let index = FlatIpIndex::build(embeddings)?;
        Ok(Self {
            version,
            tables: tables.into_iter().map(Arc::new).collect(),
            index,
            built_at: Utc::now(),
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn tables(&self) -> &[Arc<TableDescriptor>] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Top-`k` descriptors for a query vector, descending score.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Arc<TableDescriptor>, f32)>> {
        let hits = self.index.search(query, k)?;
        Ok(hits
            .into_iter()
            .map(|(row, score)| (Arc::clone(&self.tables[row]), score))
            .collect())
    }
}

/// Owner of the current snapshot.
///
/// At most one build runs at a time; callers arriving during a lazy build
/// wait for it and reuse its result. Publication is a single pointer swap.
pub struct SchemaIndex {
    catalog: Arc<dyn SchemaCatalog>,
    embedder: Arc<dyn Embedder>,
    current: RwLock<Option<Arc<IndexSnapshot>>>,
    build_lock: Mutex<()>,
    /// Completed builds, including ones that found an empty catalog.
    generation: AtomicU64,
}

impl SchemaIndex {
    pub fn new(catalog: Arc<dyn SchemaCatalog>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            catalog,
            embedder,
            current: RwLock::new(None),
            build_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn catalog(&self) -> &Arc<dyn SchemaCatalog> {
        &self.catalog
    }

    /// Current snapshot, if one has been published.
    pub fn current(&self) -> Option<Arc<IndexSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Build the index unless a snapshot already exists. `Ok(None)` means
    /// the catalog is empty and no grounding is available.
    pub async fn init_schema_index(&self) -> Result<Option<Arc<IndexSnapshot>>> {
        if let Some(snapshot) = self.current() {
            return Ok(Some(snapshot));
        }

        let seen = self.generation();
        let _guard = self.build_lock.lock().await;

        if self.generation() != seen {
            debug!("Schema index was built while waiting; reusing it");
            return Ok(self.current());
        }
        if let Some(snapshot) = self.current() {
            return Ok(Some(snapshot));
        }

        self.build_and_publish().await
    }

    /// Rebuild unconditionally. In-flight readers keep the snapshot they hold.
    pub async fn force_rebuild(&self) -> Result<Option<Arc<IndexSnapshot>>> {
        let _guard = self.build_lock.lock().await;
        self.build_and_publish().await
    }

    /// Caller must hold `build_lock`.
    async fn build_and_publish(&self) -> Result<Option<Arc<IndexSnapshot>>> {
        let started = Instant::now();
        info!("[RAG] Building schema index");

        let tables = self.catalog.full_schema().await?;
        let version = self.generation() + 1;

        if tables.is_empty() {
            warn!("[RAG] Catalog has no tables; schema index left unset");
            self.publish(None);
            self.generation.store(version, Ordering::SeqCst);
            return Ok(None);
        }

        let texts: Vec<String> = tables.iter().map(TableDescriptor::describe).collect();
        let embeddings = self.embedder.encode(&texts).await?;
        let snapshot = Arc::new(IndexSnapshot::new(version, tables, &embeddings)?);

        self.publish(Some(Arc::clone(&snapshot)));
        self.generation.store(version, Ordering::SeqCst);

        info!(
            "[RAG] Schema index v{} ready: {} tables, model {}, {}ms",
            version,
            snapshot.len(),
            self.embedder.model_name(),
            started.elapsed().as_millis()
        );
        Ok(Some(snapshot))
    }

    fn publish(&self, snapshot: Option<Arc<IndexSnapshot>>) {
        let mut slot = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = snapshot;
    }
}
