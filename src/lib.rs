//! Vector indexing and filtered similarity retrieval over SEC filing chunks.
//!
//! ```text
//! Ingestion (external) ──► RawChunk batches
//!                               │
//!                               ▼
//!                        indexer::Indexer ──► embeddings::EmbeddingProvider
//!                               │
//!                               ▼
//!                        stores::ChunkStore (SQLite + sqlite-vec)
//!                               │
//!                               ▼
//! Question + ExecutionPlan ──► pipeline::RetrievalStage ──► PipelineState
//!                               │
//!                               ▼
//!                        downstream reasoning stages (external)
//! ```
//!
//! The crate owns the chunk index lifecycle (idempotent creation, upsert,
//! clear, stats) and metadata-filtered cosine nearest-neighbor search. The
//! filing downloader/chunker, the embedding backend internals, and the
//! reasoning stages of the larger pipeline are external collaborators
//! reached only through the interfaces defined here.

pub mod config;
pub mod embeddings;
pub mod indexer;
pub mod pipeline;
pub mod stores;
pub mod types;

pub use config::{EmbeddingBackend, EmbeddingModelKind, VectorStoreSettings};
pub use embeddings::{
    EmbeddingProvider, FailingEmbeddingProvider, MockEmbeddingProvider, OpenAiEmbeddingProvider,
};
pub use indexer::{IndexReport, Indexer, RawChunk, SkippedChunk};
pub use pipeline::{
    ExecutionPlan, PipelineState, RetrievalStage, RetrievalStageBuilder, Stage, StagePatch,
};
pub use stores::{
    ChunkRecord, ChunkStore, IndexStats, ScoredChunk, SearchFilters, SqliteChunkStore,
};
pub use types::RagError;
