//! Schema RAG Retriever
//!
//! Ranks catalog tables by similarity to a natural-language question.

use crate::catalog::TableDescriptor;
use crate::error::{Nl2SqlError, Result};
use crate::schema_rag::index::SchemaIndex;
use itertools::Itertools;
use std::sync::Arc;
use tracing::{info, warn};

/// One ranked table. All results of a single retrieval share a snapshot.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub table: Arc<TableDescriptor>,
    pub score: f32,
    pub snapshot_version: u64,
}

#[derive(Clone)]
pub struct Retriever {
    index: Arc<SchemaIndex>,
}

impl Retriever {
    pub fn new(index: Arc<SchemaIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<SchemaIndex> {
        &self.index
    }

    /// Up to `top_k` tables by strictly non-increasing score, ties in catalog
    /// order. Blank queries and an unset index both yield an empty list.
    pub async fn get_relevant_tables(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let Some(snapshot) = self.index.init_schema_index().await? else {
            warn!("[RAG] No schema index available; continuing without grounding");
            return Ok(Vec::new());
        };

        let query_embedding = self
            .index
            .embedder()
            .encode(&[query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Nl2SqlError::Embedding("No embedding returned for query".to_string()))?;

        let searched = Arc::clone(&snapshot);
        let hits = tokio::task::spawn_blocking(move || searched.search(&query_embedding, top_k))
            .await
            .map_err(|e| Nl2SqlError::Index(format!("Search task failed: {}", e)))??;

        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .map(|(table, score)| RetrievalResult {
                table,
                score,
                snapshot_version: snapshot.version(),
            })
            .collect();

        info!(
            "[RAG] query={:?} v{} -> [{}]",
            query,
            snapshot.version(),
            results
                .iter()
                .map(|r| format!("{}:{:.3}", r.table.name, r.score))
                .join(", ")
        );
        Ok(results)
    }
}
