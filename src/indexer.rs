//! Batch orchestration between raw ingestion output and the chunk store.
//!
//! The [`Indexer`] embeds raw chunks in bounded sub-batches, assembles
//! [`ChunkRecord`]s, and upserts them. Chunks that fail validation are
//! excluded from the write and reported back with a reason; a failed
//! embedding sub-batch is likewise reported without undoing the writes of
//! sub-batches that already completed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::embeddings::EmbeddingProvider;
use crate::stores::{ChunkRecord, ChunkStore, IndexStats};
use crate::types::RagError;

/// A chunk as produced by the (external) ingestion pipeline: text plus
/// metadata, no embedding yet. Filter fields are optional here because the
/// ingestion side cannot always recover them; the indexer decides what to
/// do about absences (reject and report, never a silent placeholder).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawChunk {
    pub chunk_id: String,
    pub text: String,
    pub company: Option<String>,
    pub year: Option<i64>,
    pub form_type: Option<String>,
    pub section_title: Option<String>,
    pub item_number: Option<String>,
    pub chunk_index: usize,
    pub source_file: String,
}

/// A chunk excluded from an indexing run, with the reason it was skipped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkippedChunk {
    pub chunk_id: String,
    pub reason: String,
}

/// Outcome of one indexing run: ids written plus everything skipped.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndexReport {
    pub indexed: Vec<String>,
    pub skipped: Vec<SkippedChunk>,
}

pub struct Indexer {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn ChunkStore>,
    index_name: String,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn ChunkStore>,
        index_name: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            store,
            index_name: index_name.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Create the vector index if it does not exist, with the dimension of
    /// the configured embedding model.
    pub async fn create_index(&self) -> Result<(), RagError> {
        self.store
            .ensure_index(&self.index_name, self.provider.dimension())
            .await
    }

    /// Index a batch of raw chunks.
    ///
    /// Ensures the index exists, validates each chunk, embeds the valid
    /// ones in sub-batches of at most `batch_size` texts, and upserts each
    /// sub-batch as soon as its embeddings arrive. Returns the ids written
    /// and the chunks skipped, with reasons.
    pub async fn index_chunks(&self, raw_chunks: Vec<RawChunk>) -> Result<IndexReport, RagError> {
        if raw_chunks.is_empty() {
            warn!("no chunks provided for indexing");
            return Ok(IndexReport::default());
        }
        self.create_index().await?;

        let total = raw_chunks.len();
        let mut report = IndexReport::default();
        let mut accepted: Vec<(RawChunk, String, i64, String)> = Vec::new();
        let mut seen_ids = std::collections::HashSet::new();
        let mut seen_slots = std::collections::HashSet::new();

        for raw in raw_chunks {
            match validate(&raw) {
                Ok((company, year, form_type)) => {
                    if !seen_ids.insert(raw.chunk_id.clone()) {
                        report.skipped.push(SkippedChunk {
                            chunk_id: raw.chunk_id.clone(),
                            reason: "duplicate chunk_id within batch".to_string(),
                        });
                        continue;
                    }
                    // Two distinct ids sharing an ordering key would
                    // otherwise collapse to one row at write time.
                    if !seen_slots.insert((raw.source_file.clone(), raw.chunk_index)) {
                        report.skipped.push(SkippedChunk {
                            chunk_id: raw.chunk_id.clone(),
                            reason: format!(
                                "duplicate ordering key ({}, {}) within batch",
                                raw.source_file, raw.chunk_index
                            ),
                        });
                        continue;
                    }
                    accepted.push((raw, company, year, form_type));
                }
                Err(reason) => {
                    report.skipped.push(SkippedChunk {
                        chunk_id: raw.chunk_id.clone(),
                        reason,
                    });
                }
            }
        }

        for sub_batch in accepted.chunks(self.batch_size) {
            let texts: Vec<String> = sub_batch.iter().map(|(raw, ..)| raw.text.clone()).collect();
            let vectors = match self.provider.embed_many(&texts).await {
                Ok(vectors) => vectors,
                Err(err) => {
                    // Completed sub-batches stay written; this one is
                    // reported and the run moves on.
                    warn!(error = %err, size = sub_batch.len(), "embedding sub-batch failed");
                    for (raw, ..) in sub_batch {
                        report.skipped.push(SkippedChunk {
                            chunk_id: raw.chunk_id.clone(),
                            reason: format!("embedding failed: {err}"),
                        });
                    }
                    continue;
                }
            };
            let records: Vec<ChunkRecord> = sub_batch
                .iter()
                .zip(vectors)
                .map(|((raw, company, year, form_type), embedding)| ChunkRecord {
                    chunk_id: raw.chunk_id.clone(),
                    text: raw.text.clone(),
                    embedding,
                    company: company.clone(),
                    year: *year,
                    form_type: form_type.clone(),
                    section_title: raw.section_title.clone(),
                    item_number: raw.item_number.clone(),
                    chunk_index: raw.chunk_index,
                    source_file: raw.source_file.clone(),
                })
                .collect();
            let ids: Vec<String> = records.iter().map(|r| r.chunk_id.clone()).collect();
            match self.store.upsert_chunks(records).await {
                Ok(()) => report.indexed.extend(ids),
                Err(err) => {
                    warn!(error = %err, size = ids.len(), "store write failed for sub-batch");
                    for chunk_id in ids {
                        report.skipped.push(SkippedChunk {
                            chunk_id,
                            reason: format!("store write failed: {err}"),
                        });
                    }
                }
            }
        }

        info!(
            total,
            indexed = report.indexed.len(),
            skipped = report.skipped.len(),
            "indexing run complete"
        );
        Ok(report)
    }

    /// Delete every stored chunk, then index the given batch from scratch.
    /// The index structure survives the clear, so no re-creation happens
    /// beyond the usual idempotent `ensure_index`.
    pub async fn reindex_all(&self, raw_chunks: Vec<RawChunk>) -> Result<IndexReport, RagError> {
        let deleted = self.store.clear().await?;
        info!(deleted, "cleared existing chunks before reindexing");
        self.index_chunks(raw_chunks).await
    }

    /// Live store statistics.
    pub async fn stats(&self) -> Result<IndexStats, RagError> {
        self.store.stats().await
    }
}

/// Per-item validation. Returns the required filter fields on success or a
/// human-readable reason on rejection.
fn validate(raw: &RawChunk) -> Result<(String, i64, String), String> {
    if raw.chunk_id.trim().is_empty() {
        return Err("chunk_id must not be empty".to_string());
    }
    if raw.text.trim().is_empty() {
        return Err("text must not be empty".to_string());
    }
    let company = match raw.company.as_deref().map(str::trim) {
        Some(company) if !company.is_empty() => company.to_string(),
        _ => return Err("missing required filter field 'company'".to_string()),
    };
    let year = match raw.year {
        Some(year) => year,
        None => return Err("missing required filter field 'year'".to_string()),
    };
    let form_type = match raw.form_type.as_deref().map(str::trim) {
        Some(form_type) if !form_type.is_empty() => form_type.to_string(),
        _ => return Err("missing required filter field 'form_type'".to_string()),
    };
    Ok((company, year, form_type))
}
