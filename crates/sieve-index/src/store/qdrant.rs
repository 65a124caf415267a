//! Qdrant-backed vector store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    vectors_config, CreateCollectionBuilder, DeletePointsBuilder, Distance, PointStruct,
    PointsIdsList, QuantizationType, ScalarQuantizationBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use sieve_config::QdrantConfig;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CollectionInfo, DistanceMetric, SimilarityQuery, VectorHit, VectorStore};
use crate::chunker::{Chunk, DocumentType};
use crate::embeddings::EmbeddingProvider;
use crate::error::BackendError;

/// Qdrant client paired with the embedder used for both writes and queries.
pub struct QdrantStore {
    client: Qdrant,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl QdrantStore {
    /// Connect using the given configuration.
    pub fn connect(
        config: &QdrantConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, BackendError> {
        let mut builder = Qdrant::from_url(&config.url).skip_compatibility_check();
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder.build()?;

        info!(url = %config.url, model = embedder.model_name(), "Connected to Qdrant");
        Ok(Self { client, embedder })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn embedding_dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    async fn ensure_collection(
        &self,
        name: &str,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<(), BackendError> {
        let collections = self.client.list_collections().await?;
        if collections.collections.iter().any(|c| c.name == name) {
            debug!(collection = name, "Collection already exists");
            return Ok(());
        }

        info!(collection = name, dimensions, ?metric, "Creating collection");
        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(
                        dimensions as u64,
                        to_distance(metric),
                    ))
                    .quantization_config(
                        ScalarQuantizationBuilder::default()
                            .r#type(QuantizationType::Int8.into())
                            .quantile(0.99)
                            .always_ram(true),
                    ),
            )
            .await?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), BackendError> {
        info!(collection = name, "Deleting collection");
        self.client.delete_collection(name).await?;
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo, BackendError> {
        let response = self.client.collection_info(name).await?;
        let result = response
            .result
            .ok_or_else(|| BackendError::NamespaceNotFound(name.to_string()))?;

        let dimensions = result
            .config
            .as_ref()
            .and_then(|c| c.params.as_ref())
            .and_then(|p| p.vectors_config.as_ref())
            .and_then(|v| v.config.as_ref())
            .and_then(|config| match config {
                vectors_config::Config::Params(params) => Some(params.size as usize),
                vectors_config::Config::ParamsMap(map) => {
                    map.map.values().next().map(|params| params.size as usize)
                }
            })
            .ok_or_else(|| {
                BackendError::InvalidResponse(format!("collection {} has no vector config", name))
            })?;

        Ok(CollectionInfo {
            name: name.to_string(),
            dimensions,
            points: result.points_count.unwrap_or(0),
        })
    }

    async fn add(&self, namespace: &str, chunks: &[Chunk]) -> Result<Vec<String>, BackendError> {
        if chunks.is_empty() {
            return Ok(vec![]);
        }

        let mut ids = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.embedder.max_batch_size().max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;

            let points: Vec<PointStruct> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| {
                    let id = Uuid::new_v4().to_string();
                    ids.push(id.clone());
                    PointStruct::new(id, vector, chunk_to_payload(chunk))
                })
                .collect();

            debug!(collection = namespace, points = points.len(), "Upserting points");
            self.client
                .upsert_points(UpsertPointsBuilder::new(namespace, points))
                .await?;
        }
        Ok(ids)
    }

    async fn similarity_search(
        &self,
        namespace: &str,
        query: &SimilarityQuery,
    ) -> Result<Vec<VectorHit>, BackendError> {
        let vector = self.embedder.embed(&query.text).await?;

        let mut builder = SearchPointsBuilder::new(namespace, vector, query.top_k as u64)
            .with_payload(true);
        if let Some(threshold) = query.threshold {
            builder = builder.score_threshold(threshold);
        }

        let response = self.client.search_points(builder).await?;
        let hits: Vec<VectorHit> = response
            .result
            .into_iter()
            .map(|p| {
                let id = p
                    .id
                    .map(|id| match id.point_id_options {
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => u,
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => {
                            n.to_string()
                        }
                        None => String::new(),
                    })
                    .unwrap_or_default();
                VectorHit {
                    id,
                    score: Some(p.score),
                    chunk: payload_to_chunk(&p.payload),
                }
            })
            .collect();

        debug!(collection = namespace, hits = hits.len(), "Similarity search complete");
        Ok(hits)
    }

    async fn delete_points(&self, namespace: &str, ids: &[String]) -> Result<(), BackendError> {
        if ids.is_empty() {
            return Ok(());
        }
        let point_ids: Vec<_> = ids
            .iter()
            .cloned()
            .map(qdrant_client::qdrant::PointId::from)
            .collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(namespace).points(PointsIdsList { ids: point_ids }),
            )
            .await?;
        Ok(())
    }
}

fn to_distance(metric: DistanceMetric) -> Distance {
    match metric {
        DistanceMetric::Cosine => Distance::Cosine,
        DistanceMetric::Dot => Distance::Dot,
        DistanceMetric::Euclid => Distance::Euclid,
    }
}

/// Convert a chunk to Qdrant's payload map.
fn chunk_to_payload(chunk: &Chunk) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    map.insert("text".to_string(), Value::from(chunk.text.clone()));
    map.insert("filepath".to_string(), Value::from(chunk.source_path.clone()));
    map.insert("filename".to_string(), Value::from(chunk.file_name.clone()));
    map.insert("filetype".to_string(), Value::from(chunk.file_type.clone()));
    map.insert("priority".to_string(), Value::from(chunk.priority_tier as i64));
    map.insert("size".to_string(), Value::from(chunk.size_bytes as i64));
    map.insert("chunk".to_string(), Value::from(chunk.chunk_index as i64));
    map.insert("total_chunks".to_string(), Value::from(chunk.total_chunks as i64));
    map.insert("namespace".to_string(), Value::from(chunk.namespace.clone()));
    map.insert("indexed_at".to_string(), Value::from(chunk.indexed_at as i64));
    map.insert(
        "document_type".to_string(),
        Value::from(chunk.document_type.as_str().to_string()),
    );
    map.insert("start_line".to_string(), Value::from(chunk.start_line as i64));
    map.insert("overlap".to_string(), Value::from(chunk.overlap as i64));
    map
}

/// Convert Qdrant's payload map back to a chunk.
fn payload_to_chunk(map: &HashMap<String, Value>) -> Chunk {
    Chunk {
        text: extract_string(map.get("text")),
        source_path: extract_string(map.get("filepath")),
        file_name: extract_string(map.get("filename")),
        file_type: extract_string(map.get("filetype")),
        priority_tier: extract_integer(map.get("priority")) as u8,
        size_bytes: extract_integer(map.get("size")) as u64,
        chunk_index: extract_integer(map.get("chunk")) as usize,
        total_chunks: extract_integer(map.get("total_chunks")) as usize,
        namespace: extract_string(map.get("namespace")),
        indexed_at: extract_integer(map.get("indexed_at")) as u64,
        document_type: DocumentType::parse(&extract_string(map.get("document_type"))),
        start_line: (extract_integer(map.get("start_line")) as usize).max(1),
        overlap: extract_integer(map.get("overlap")) as usize,
    }
}

fn extract_string(value: Option<&Value>) -> String {
    value
        .and_then(|v| {
            if let Some(qdrant_client::qdrant::value::Kind::StringValue(s)) = &v.kind {
                Some(s.clone())
            } else {
                None
            }
        })
        .unwrap_or_default()
}

fn extract_integer(value: Option<&Value>) -> i64 {
    value
        .and_then(|v| {
            if let Some(qdrant_client::qdrant::value::Kind::IntegerValue(i)) = &v.kind {
                Some(*i)
            } else {
                None
            }
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk() -> Chunk {
        Chunk {
            text: "@app.route('/x')\ndef x(): pass".to_string(),
            source_path: "/repo/app.py".to_string(),
            file_name: "app.py".to_string(),
            file_type: "py".to_string(),
            priority_tier: 1,
            size_bytes: 31,
            chunk_index: 2,
            total_chunks: 3,
            namespace: "codebase-index-repo".to_string(),
            indexed_at: 1_700_000_000_000,
            document_type: DocumentType::RestApiEndpoint,
            start_line: 40,
            overlap: 0,
        }
    }

    #[test]
    fn test_payload_roundtrip() {
        let chunk = sample_chunk();
        let map = chunk_to_payload(&chunk);
        assert!(map.contains_key("filepath"));
        assert!(map.contains_key("document_type"));
        assert_eq!(payload_to_chunk(&map), chunk);
    }

    #[test]
    fn test_payload_missing_fields_default() {
        let chunk = payload_to_chunk(&HashMap::new());
        assert!(chunk.text.is_empty());
        assert_eq!(chunk.document_type, DocumentType::Code);
        assert_eq!(chunk.start_line, 1);
    }

    #[test]
    fn test_extract_wrong_kind() {
        let value = Value::from(5i64);
        assert_eq!(extract_string(Some(&value)), "");
        assert_eq!(extract_integer(Some(&value)), 5);
        assert_eq!(extract_integer(None), 0);
    }

    #[test]
    fn test_distance_mapping() {
        assert_eq!(to_distance(DistanceMetric::Cosine), Distance::Cosine);
        assert_eq!(to_distance(DistanceMetric::Euclid), Distance::Euclid);
    }
}
