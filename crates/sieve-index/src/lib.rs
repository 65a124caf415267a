//! Incremental hybrid code search.
//!
//! This crate provides:
//! - File classification with priority tiers and a persisted change cache
//! - Structure-aware and fixed-size chunking
//! - Per-root vector namespaces in Qdrant (or an in-memory store)
//! - Two-phase background indexing with live status snapshots
//! - Hybrid search: vector similarity with query expansion, lexical
//!   fallback, document-type scoring and line-level highlights

pub mod cache;
pub mod chat;
pub mod chunker;
pub mod classifier;
pub mod embeddings;
pub mod error;
pub mod manifest;
pub mod namespace;
pub mod pipeline;
pub mod sanitize;
pub mod search;
pub mod status;
pub mod store;

// Re-exports
pub use cache::{CacheError, CacheLoadReport, ChangeCache};
pub use chat::{ChatCompletionsClient, ChatProvider};
pub use chunker::{Chunk, Chunker, DocumentType};
pub use classifier::{ClassifiedFile, FileClassifier, FileRole};
pub use embeddings::{EmbeddingProvider, HashingEmbeddings, HttpEmbeddings};
pub use error::BackendError;
pub use manifest::PointManifest;
pub use namespace::{name_for, EnsureOutcome, Namespace, NamespaceManager};
pub use pipeline::IndexingSession;
pub use search::{
    HybridSearchResponse, HybridSearcher, LineMatch, SearchMode, SearchResult, SearchType,
};
pub use status::{IndexingMetrics, IndexingPhase, StatusSnapshot};
pub use store::{DistanceMetric, InMemoryStore, QdrantStore, SimilarityQuery, VectorHit, VectorStore};
