//! Vector-store abstraction.
//!
//! A store owns named collections (one per indexed root), embeds chunk text
//! on write and query text on search.

mod memory;
mod qdrant;

pub use memory::InMemoryStore;
pub use qdrant::QdrantStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunker::Chunk;
use crate::error::BackendError;

/// Similarity function of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    Dot,
    Euclid,
}

/// What a store reports about an existing collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub dimensions: usize,
    pub points: u64,
}

/// A text query against one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityQuery {
    pub text: String,
    pub top_k: usize,
    pub threshold: Option<f32>,
}

impl SimilarityQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
            threshold: None,
        }
    }

    pub fn with_threshold(mut self, threshold: Option<f32>) -> Self {
        self.threshold = threshold;
        self
    }
}

/// One stored chunk returned by a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub score: Option<f32>,
    pub chunk: Chunk,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Width of the vectors produced by the store's embedder.
    fn embedding_dimensions(&self) -> usize;

    /// Create the collection if it does not exist.
    async fn ensure_collection(
        &self,
        name: &str,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<(), BackendError>;

    async fn delete_collection(&self, name: &str) -> Result<(), BackendError>;

    /// Fails with [`BackendError::NamespaceNotFound`] when absent.
    async fn collection_info(&self, name: &str) -> Result<CollectionInfo, BackendError>;

    /// Embed and store chunks. Returns the new point ids in chunk order.
    async fn add(&self, namespace: &str, chunks: &[Chunk]) -> Result<Vec<String>, BackendError>;

    async fn similarity_search(
        &self,
        namespace: &str,
        query: &SimilarityQuery,
    ) -> Result<Vec<VectorHit>, BackendError>;

    async fn delete_points(&self, namespace: &str, ids: &[String]) -> Result<(), BackendError>;
}
