//! Document retrieval stage.
//!
//! Embeds the question, derives exact-match filters from the execution
//! plan's hints, runs a similarity search, and writes the ranked results
//! into shared state under [`DOCUMENT_CONTEXT_KEY`]. When the embedding
//! backend or the store fails terminally, the stage degrades instead of
//! failing the workflow: it writes an explicit no-context marker and lets
//! the downstream reasoning stage proceed on whatever other state it has.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::{DEFAULT_SEARCH_K, VectorStoreSettings};
use crate::embeddings::EmbeddingProvider;
use crate::stores::{ChunkStore, ScoredChunk, SearchFilters};
use crate::types::RagError;

use super::{PipelineState, Stage, StageError, StagePatch};

/// State key under which retrieval results (or the no-context marker) land.
pub const DOCUMENT_CONTEXT_KEY: &str = "document_search";

pub struct RetrievalStage {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn ChunkStore>,
    k: i64,
    output_key: String,
}

impl RetrievalStage {
    pub fn builder() -> RetrievalStageBuilder {
        RetrievalStageBuilder::default()
    }

    fn filters_from_plan(state: &PipelineState) -> SearchFilters {
        SearchFilters {
            company: state.plan.company.clone(),
            year: state.plan.year,
            form_type: state.plan.form_type.clone(),
        }
    }

    async fn search(&self, state: &PipelineState) -> Result<Vec<ScoredChunk>, RagError> {
        let query_vector = self.provider.embed_one(&state.question).await?;
        let filters = Self::filters_from_plan(state);
        self.store.search(&query_vector, self.k, &filters).await
    }
}

#[async_trait]
impl Stage for RetrievalStage {
    async fn run(&self, state: &PipelineState) -> Result<StagePatch, StageError> {
        if state.question.trim().is_empty() {
            return Err(StageError::MissingInput { what: "question" });
        }

        let filters = Self::filters_from_plan(state);
        match self.search(state).await {
            Ok(hits) => {
                info!(hits = hits.len(), "document retrieval complete");
                let results: Vec<serde_json::Value> = hits
                    .iter()
                    .map(|hit| {
                        json!({
                            "chunk_id": hit.record.chunk_id,
                            "text": hit.record.text,
                            "company": hit.record.company,
                            "year": hit.record.year,
                            "form_type": hit.record.form_type,
                            "section_title": hit.record.section_title,
                            "item_number": hit.record.item_number,
                            "chunk_index": hit.record.chunk_index,
                            "source_file": hit.record.source_file,
                            "score": hit.score,
                        })
                    })
                    .collect();
                let payload = json!({
                    "query": state.question,
                    "filters": filters,
                    "total_found": results.len(),
                    "results": results,
                });
                Ok(StagePatch::new().with_entry(self.output_key.clone(), payload))
            }
            Err(err) => {
                // Degrade rather than abort: downstream reasoning can still
                // answer from other state, with reduced quality.
                warn!(error = %err, "document retrieval failed, continuing without context");
                let payload = json!({
                    "query": state.question,
                    "filters": filters,
                    "error": err.to_string(),
                    "total_found": 0,
                    "results": [],
                });
                Ok(StagePatch::new().with_entry(self.output_key.clone(), payload))
            }
        }
    }
}

/// Builder for [`RetrievalStage`].
#[derive(Default)]
pub struct RetrievalStageBuilder {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    store: Option<Arc<dyn ChunkStore>>,
    k: Option<i64>,
    output_key: Option<String>,
}

impl RetrievalStageBuilder {
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn ChunkStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Number of chunks to retrieve. Defaults to the configured search `k`
    /// when [`Self::defaults_from`] is used, otherwise to
    /// [`DEFAULT_SEARCH_K`].
    #[must_use]
    pub fn k(mut self, k: i64) -> Self {
        self.k = Some(k);
        self
    }

    /// Fill unset options from settings. An explicit [`Self::k`] wins.
    #[must_use]
    pub fn defaults_from(mut self, settings: &VectorStoreSettings) -> Self {
        if self.k.is_none() {
            self.k = Some(settings.search_k as i64);
        }
        self
    }

    /// State key to write results under. Defaults to
    /// [`DOCUMENT_CONTEXT_KEY`].
    #[must_use]
    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Build the stage.
    ///
    /// # Panics
    ///
    /// Panics if the provider or store was not set.
    pub fn build(self) -> RetrievalStage {
        self.try_build()
            .expect("RetrievalStageBuilder requires a provider and a store")
    }

    /// Build the stage, returning `None` if provider or store is missing.
    pub fn try_build(self) -> Option<RetrievalStage> {
        Some(RetrievalStage {
            provider: self.provider?,
            store: self.store?,
            k: self.k.unwrap_or(DEFAULT_SEARCH_K as i64),
            output_key: self
                .output_key
                .unwrap_or_else(|| DOCUMENT_CONTEXT_KEY.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ExecutionPlan;

    #[test]
    fn builder_requires_provider_and_store() {
        assert!(RetrievalStageBuilder::default().try_build().is_none());
    }

    #[test]
    fn builder_takes_k_from_settings_unless_overridden() {
        let settings = VectorStoreSettings {
            backend: crate::config::EmbeddingBackend::Mock,
            search_k: 2,
            ..Default::default()
        };

        let builder = RetrievalStageBuilder::default().defaults_from(&settings);
        assert_eq!(builder.k, Some(2));

        let builder = RetrievalStageBuilder::default().k(9).defaults_from(&settings);
        assert_eq!(builder.k, Some(9), "an explicit k wins over settings");

        let fallback = RetrievalStageBuilder::default()
            .provider(std::sync::Arc::new(
                crate::embeddings::MockEmbeddingProvider::new(4),
            ))
            .store(std::sync::Arc::new(NullStore))
            .try_build()
            .unwrap();
        assert_eq!(fallback.k, DEFAULT_SEARCH_K as i64);
    }

    struct NullStore;

    #[async_trait]
    impl ChunkStore for NullStore {
        async fn ensure_index(&self, _: &str, _: usize) -> Result<(), RagError> {
            Ok(())
        }
        async fn upsert_chunks(&self, _: Vec<crate::stores::ChunkRecord>) -> Result<(), RagError> {
            Ok(())
        }
        async fn search(
            &self,
            _: &[f32],
            _: i64,
            _: &SearchFilters,
        ) -> Result<Vec<ScoredChunk>, RagError> {
            Ok(Vec::new())
        }
        async fn clear(&self) -> Result<usize, RagError> {
            Ok(0)
        }
        async fn stats(&self) -> Result<crate::stores::IndexStats, RagError> {
            Ok(crate::stores::IndexStats {
                total_chunks: 0,
                companies: Default::default(),
                index_exists: false,
                index_name: String::new(),
            })
        }
        async fn count(&self) -> Result<usize, RagError> {
            Ok(0)
        }
        async fn get_chunk(&self, _: &str) -> Result<Option<crate::stores::ChunkRecord>, RagError> {
            Ok(None)
        }
    }

    #[test]
    fn absent_hints_leave_filters_unconstrained() {
        let state = PipelineState::new("what changed?", ExecutionPlan::default());
        let filters = RetrievalStage::filters_from_plan(&state);
        assert!(filters.is_empty());

        let state = PipelineState::new("what changed?", ExecutionPlan {
            company: Some("MSFT".into()),
            year: None,
            form_type: Some("10-K".into()),
        });
        let filters = RetrievalStage::filters_from_plan(&state);
        assert_eq!(filters.company.as_deref(), Some("MSFT"));
        assert_eq!(filters.year, None);
        assert_eq!(filters.form_type.as_deref(), Some("10-K"));
    }
}
