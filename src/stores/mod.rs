//! Chunk persistence and vector search.
//!
//! [`ChunkStore`] abstracts the underlying engine behind the capability the
//! rest of the crate needs: persist chunk nodes keyed by `chunk_id`, keep a
//! named vector index over their embeddings, and answer metadata-filtered
//! cosine nearest-neighbor queries.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │  ChunkStore      │
//!                  │  (async trait)   │
//!                  └────────┬─────────┘
//!                           │
//!               ┌───────────┴───────────┐
//!               ▼                       ▼
//!        ┌─────────────┐         ┌─────────────┐
//!        │   SQLite    │         │  (future)   │
//!        │ sqlite-vec  │         │  pgvector   │
//!        └─────────────┘         └─────────────┘
//! ```
//!
//! # Persisted node schema
//!
//! Each chunk is one node with properties `chunk_id`, `text`, `embedding`,
//! `company`, `year`, `form_type`, `section_title`, `item_number`,
//! `chunk_index`, `source_file`. The vector index is a named structure over
//! the `embedding` property, registered with a fixed dimension; every vector
//! in one index shares that dimension.

pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::RagError;

pub use sqlite::SqliteChunkStore;

/// One indexed chunk: text, embedding, and provenance metadata.
///
/// `chunk_id` is the stable primary key; re-indexing the same id replaces
/// the whole record. `(source_file, chunk_index)` is the ordering key used
/// to reconstruct original document order among sibling chunks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Ticker-like identifier, exact-match filterable.
    pub company: String,
    /// Fiscal year, exact-match filterable.
    pub year: i64,
    /// Filing type tag (e.g. "10-K"), exact-match filterable.
    pub form_type: String,
    /// Free-text provenance, carried for display only.
    pub section_title: Option<String>,
    /// Free-text provenance, carried for display only.
    pub item_number: Option<String>,
    /// Zero-based position within `source_file`.
    pub chunk_index: usize,
    pub source_file: String,
}

/// Exact-match restrictions applied during search. An absent field leaves
/// that dimension unconstrained; it never means "match nothing".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub company: Option<String>,
    pub year: Option<i64>,
    pub form_type: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.company.is_none() && self.year.is_none() && self.form_type.is_none()
    }

    #[must_use]
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    #[must_use]
    pub fn with_year(mut self, year: i64) -> Self {
        self.year = Some(year);
        self
    }

    #[must_use]
    pub fn with_form_type(mut self, form_type: impl Into<String>) -> Self {
        self.form_type = Some(form_type.into());
        self
    }
}

/// A search hit: the stored record plus its cosine similarity to the query
/// vector (1.0 = identical direction).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub record: ChunkRecord,
    pub score: f32,
}

/// Live index statistics, computed from the store on every call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    /// Chunk count per company ticker.
    pub companies: BTreeMap<String, usize>,
    pub index_exists: bool,
    pub index_name: String,
}

/// Durable chunk persistence plus vector search.
///
/// Concurrency contract: a single logical index has at most one concurrent
/// writer; readers are unrestricted and may observe a snapshot missing
/// in-flight writes. `clear` must not run concurrently with
/// `upsert_chunks`; serializing those two is the caller's obligation.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Create the named vector index if absent. Calling it again with the
    /// same dimension is a no-op; a different dimension is an
    /// [`RagError::IndexConflict`] and the index is never rebuilt.
    async fn ensure_index(&self, name: &str, dimension: usize) -> Result<(), RagError>;

    /// Write or replace chunk nodes keyed by `chunk_id`. Every embedding
    /// length is validated against the index dimension before anything is
    /// written; the batch is all-or-nothing.
    async fn upsert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<(), RagError>;

    /// Top-`k` chunks nearest to `query_vector` by cosine similarity,
    /// restricted to chunks matching all supplied filters. Ordered by
    /// decreasing similarity, ties broken by `chunk_id` ascending.
    /// `k <= 0` returns an empty list; fewer matches than `k` returns all
    /// matches without padding.
    async fn search(
        &self,
        query_vector: &[f32],
        k: i64,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, RagError>;

    /// Delete all chunk nodes, returning how many were removed. The index
    /// structure stays intact, so `upsert_chunks` works afterwards without
    /// re-running `ensure_index`.
    async fn clear(&self) -> Result<usize, RagError>;

    /// Live statistics: total chunks and the per-company breakdown.
    async fn stats(&self) -> Result<IndexStats, RagError>;

    /// Total number of stored chunks.
    async fn count(&self) -> Result<usize, RagError>;

    /// Point lookup by primary key.
    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<ChunkRecord>, RagError>;
}
