//! In-memory [`VectorStore`] for offline use and tests.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use super::{CollectionInfo, DistanceMetric, SimilarityQuery, VectorHit, VectorStore};
use crate::chunker::Chunk;
use crate::embeddings::EmbeddingProvider;
use crate::error::BackendError;

struct StoredPoint {
    id: String,
    vector: Vec<f32>,
    chunk: Chunk,
}

struct Collection {
    dimensions: usize,
    metric: DistanceMetric,
    points: Vec<StoredPoint>,
}

/// Brute-force vector store.
pub struct InMemoryStore {
    embedder: Arc<dyn EmbeddingProvider>,
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Create a collection with an explicit width, bypassing the embedder.
    pub fn create_with_dimensions(&self, name: &str, dimensions: usize) {
        self.collections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                name.to_string(),
                Collection {
                    dimensions,
                    metric: DistanceMetric::Cosine,
                    points: Vec::new(),
                },
            );
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn similarity(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => cosine_sim(a, b),
        DistanceMetric::Dot => a.iter().zip(b.iter()).map(|(x, y)| x * y).sum(),
        DistanceMetric::Euclid => {
            let dist: f32 = a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt();
            1.0 / (1.0 + dist)
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn embedding_dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    async fn ensure_collection(
        &self,
        name: &str,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<(), BackendError> {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        collections.entry(name.to_string()).or_insert(Collection {
            dimensions,
            metric,
            points: Vec::new(),
        });
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), BackendError> {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::NamespaceNotFound(name.to_string()))
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo, BackendError> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let collection = collections
            .get(name)
            .ok_or_else(|| BackendError::NamespaceNotFound(name.to_string()))?;
        Ok(CollectionInfo {
            name: name.to_string(),
            dimensions: collection.dimensions,
            points: collection.points.len() as u64,
        })
    }

    async fn add(&self, namespace: &str, chunks: &[Chunk]) -> Result<Vec<String>, BackendError> {
        if chunks.is_empty() {
            return Ok(vec![]);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let collection = collections
            .get_mut(namespace)
            .ok_or_else(|| BackendError::NamespaceNotFound(namespace.to_string()))?;

        let mut ids = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            if vector.len() != collection.dimensions {
                return Err(BackendError::DimensionMismatch {
                    expected: collection.dimensions,
                    actual: vector.len(),
                });
            }
            let id = Uuid::new_v4().to_string();
            ids.push(id.clone());
            collection.points.push(StoredPoint {
                id,
                vector,
                chunk: chunk.clone(),
            });
        }
        Ok(ids)
    }

    async fn similarity_search(
        &self,
        namespace: &str,
        query: &SimilarityQuery,
    ) -> Result<Vec<VectorHit>, BackendError> {
        let query_vector = self.embedder.embed(&query.text).await?;

        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let collection = collections
            .get(namespace)
            .ok_or_else(|| BackendError::NamespaceNotFound(namespace.to_string()))?;

        let mut scored: Vec<(f32, &StoredPoint)> = collection
            .points
            .iter()
            .map(|p| (similarity(collection.metric, &query_vector, &p.vector), p))
            .filter(|(score, _)| query.threshold.map_or(true, |t| *score >= t))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(query.top_k);

        Ok(scored
            .into_iter()
            .map(|(score, p)| VectorHit {
                id: p.id.clone(),
                score: Some(score),
                chunk: p.chunk.clone(),
            })
            .collect())
    }

    async fn delete_points(&self, namespace: &str, ids: &[String]) -> Result<(), BackendError> {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        if let Some(collection) = collections.get_mut(namespace) {
            collection.points.retain(|p| !ids.contains(&p.id));
        }
        Ok(())
    }
}
