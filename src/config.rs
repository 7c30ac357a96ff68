//! Settings for the chunk store and embedding backend.
//!
//! All recognized options live in [`VectorStoreSettings`], resolved once at
//! startup (from the environment via [`VectorStoreSettings::from_env`], or
//! built literally in tests) and passed by reference to every component.
//! There is no ambient global lookup. [`VectorStoreSettings::validate`]
//! fails fast on problems that must not be deferred to runtime, such as a
//! missing API key for the selected backend.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embeddings::openai::OpenAiEmbeddingProvider;
use crate::embeddings::{EmbeddingProvider, MockEmbeddingProvider};
use crate::types::RagError;

/// Default number of chunks returned by similarity search when neither the
/// environment nor the caller overrides it.
pub const DEFAULT_SEARCH_K: usize = 5;

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// OpenAI-compatible HTTP embeddings endpoint.
    OpenAi,
    /// Deterministic in-process vectors, for tests and offline runs.
    Mock,
}

impl FromStr for EmbeddingBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(EmbeddingBackend::OpenAi),
            "mock" => Ok(EmbeddingBackend::Mock),
            other => Err(RagError::Config(format!(
                "unsupported embedding backend '{other}' (expected 'openai' or 'mock')"
            ))),
        }
    }
}

/// Embedding models differ only in output dimensionality and cost.
///
/// All chunks in one index must share the dimension of the model that
/// produced them; the store enforces this at `ensure_index`/`upsert` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingModelKind {
    TextEmbedding3Small,
    TextEmbedding3Large,
}

impl EmbeddingModelKind {
    /// Output vector length, queryable before any remote call.
    pub fn dimension(&self) -> usize {
        match self {
            EmbeddingModelKind::TextEmbedding3Small => 1536,
            EmbeddingModelKind::TextEmbedding3Large => 3072,
        }
    }

    /// Model identifier as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingModelKind::TextEmbedding3Small => "text-embedding-3-small",
            EmbeddingModelKind::TextEmbedding3Large => "text-embedding-3-large",
        }
    }
}

impl FromStr for EmbeddingModelKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "text-embedding-3-small" => Ok(EmbeddingModelKind::TextEmbedding3Small),
            "text-embedding-3-large" => Ok(EmbeddingModelKind::TextEmbedding3Large),
            other => Err(RagError::Config(format!(
                "unsupported embedding model '{other}'"
            ))),
        }
    }
}

/// Every recognized option, with its default.
#[derive(Debug, Clone)]
pub struct VectorStoreSettings {
    /// SQLite database file backing the chunk store.
    pub store_path: PathBuf,
    /// Name of the vector index registered over the embedding property.
    pub index_name: String,
    /// Label recorded for chunk nodes in the index registry.
    pub node_label: String,
    /// Embedding backend selection.
    pub backend: EmbeddingBackend,
    /// Embedding model (fixes the index dimension).
    pub embedding_model: EmbeddingModelKind,
    /// Credential for the OpenAI backend. Required at startup when that
    /// backend is selected.
    pub openai_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible endpoint.
    pub openai_base_url: String,
    /// Maximum texts per embedding request sub-batch.
    pub embedding_batch_size: usize,
    /// Per-request timeout for outbound embedding calls.
    pub request_timeout_secs: u64,
    /// Maximum attempts (initial try included) for retryable failures.
    pub max_retries: usize,
    /// Default `k` for similarity search.
    pub search_k: usize,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/chunks.db"),
            index_name: "filing_chunks".to_string(),
            node_label: "FilingChunk".to_string(),
            backend: EmbeddingBackend::OpenAi,
            embedding_model: EmbeddingModelKind::TextEmbedding3Small,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            embedding_batch_size: 64,
            request_timeout_secs: 30,
            max_retries: 3,
            search_k: DEFAULT_SEARCH_K,
        }
    }
}

impl VectorStoreSettings {
    /// Resolve settings from the environment (after loading `.env` if
    /// present) and validate them.
    pub fn from_env() -> Result<Self, RagError> {
        let _ = dotenvy::dotenv();
        let mut settings = Self::default();

        if let Ok(path) = std::env::var("RISKRAG_STORE_PATH") {
            settings.store_path = PathBuf::from(path);
        }
        if let Ok(name) = std::env::var("RISKRAG_INDEX_NAME") {
            settings.index_name = name;
        }
        if let Ok(label) = std::env::var("RISKRAG_NODE_LABEL") {
            settings.node_label = label;
        }
        if let Ok(backend) = std::env::var("RISKRAG_EMBEDDING_BACKEND") {
            settings.backend = backend.parse()?;
        }
        if let Ok(model) = std::env::var("RISKRAG_EMBEDDING_MODEL") {
            settings.embedding_model = model.parse()?;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                settings.openai_api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("RISKRAG_OPENAI_BASE_URL") {
            settings.openai_base_url = url;
        }
        if let Ok(raw) = std::env::var("RISKRAG_EMBEDDING_BATCH_SIZE") {
            settings.embedding_batch_size = parse_env("RISKRAG_EMBEDDING_BATCH_SIZE", &raw)?;
        }
        if let Ok(raw) = std::env::var("RISKRAG_REQUEST_TIMEOUT_SECS") {
            settings.request_timeout_secs = parse_env("RISKRAG_REQUEST_TIMEOUT_SECS", &raw)?;
        }
        if let Ok(raw) = std::env::var("RISKRAG_MAX_RETRIES") {
            settings.max_retries = parse_env("RISKRAG_MAX_RETRIES", &raw)?;
        }
        if let Ok(raw) = std::env::var("RISKRAG_SEARCH_K") {
            settings.search_k = parse_env("RISKRAG_SEARCH_K", &raw)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Startup-time validation. Anything failing here is fatal.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.index_name.trim().is_empty() {
            return Err(RagError::Config("index name must not be empty".into()));
        }
        if self.embedding_batch_size == 0 {
            return Err(RagError::Config(
                "embedding batch size must be at least 1".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(RagError::Config(
                "request timeout must be at least 1 second".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(RagError::Config("max retries must be at least 1".into()));
        }
        if self.backend == EmbeddingBackend::OpenAi && self.openai_api_key.is_none() {
            return Err(RagError::Config(
                "OPENAI_API_KEY is required when the openai embedding backend is selected".into(),
            ));
        }
        Ok(())
    }

    /// Index dimension implied by the configured model.
    pub fn dimension(&self) -> usize {
        self.embedding_model.dimension()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Construct the configured embedding provider.
    pub fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>, RagError> {
        match self.backend {
            EmbeddingBackend::OpenAi => {
                let api_key = self.openai_api_key.clone().ok_or_else(|| {
                    RagError::Config(
                        "OPENAI_API_KEY is required when the openai embedding backend is selected"
                            .into(),
                    )
                })?;
                let provider = OpenAiEmbeddingProvider::new(
                    api_key,
                    self.openai_base_url.clone(),
                    self.embedding_model,
                    self.request_timeout(),
                    self.max_retries,
                )?;
                Ok(Arc::new(provider))
            }
            EmbeddingBackend::Mock => Ok(Arc::new(MockEmbeddingProvider::new(
                self.embedding_model.dimension(),
            ))),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T, RagError> {
    raw.trim()
        .parse()
        .map_err(|_| RagError::Config(format!("unable to parse {key}='{raw}'")))
}
