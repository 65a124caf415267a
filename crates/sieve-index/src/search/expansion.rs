//! Multi-query expansion for endpoint-discovery queries.
//!
//! A single vector query recalls few route declarations, so the fixed
//! auxiliary queries below run concurrently and their merged hits become
//! the vector result set for the request.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use sieve_config::SearchConfig;
use tracing::{info, warn};

use crate::store::{SimilarityQuery, VectorHit, VectorStore};

/// One fixed auxiliary query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxiliaryQuery {
    pub text: &'static str,
    pub top_k: usize,
}

/// Route decorators, framework API content and HTTP method patterns.
pub const AUXILIARY_QUERIES: [AuxiliaryQuery; 3] = [
    AuxiliaryQuery {
        text: "@app.route",
        top_k: 10,
    },
    AuxiliaryQuery {
        text: "Flask API endpoints",
        top_k: 15,
    },
    AuxiliaryQuery {
        text: "POST methods JSON",
        top_k: 10,
    },
];

/// Characters of chunk text hashed into the dedup signature.
const SIGNATURE_PREFIX_CHARS: usize = 100;

/// Identity of a hit for merging: file name, chunk index and a hash of
/// the start of its text.
pub fn signature(hit: &VectorHit) -> String {
    let prefix: String = hit.chunk.text.chars().take(SIGNATURE_PREFIX_CHARS).collect();
    let digest = Sha256::digest(prefix.as_bytes());
    format!(
        "{}#{}#{}",
        hit.chunk.file_name,
        hit.chunk.chunk_index,
        hex::encode(digest)
    )
}

pub struct MultiQueryExpander {
    store: Arc<dyn VectorStore>,
    retries: u32,
    backoff: Duration,
}

impl MultiQueryExpander {
    pub fn new(store: Arc<dyn VectorStore>, retries: u32, backoff: Duration) -> Self {
        Self {
            store,
            retries,
            backoff,
        }
    }

    pub fn from_config(store: Arc<dyn VectorStore>, config: &SearchConfig) -> Self {
        Self::new(
            store,
            config.expansion_retries,
            Duration::from_millis(config.expansion_backoff_ms),
        )
    }

    /// Run the auxiliary queries and merge their hits.
    pub async fn expand(&self, namespace: &str, query: &str) -> Vec<VectorHit> {
        let [route, api, methods] = AUXILIARY_QUERIES;
        let outcomes = tokio::join!(
            self.search_with_retry(namespace, route),
            self.search_with_retry(namespace, api),
            self.search_with_retry(namespace, methods),
        );

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        let mut answered = 0;
        for hits in [outcomes.0, outcomes.1, outcomes.2].into_iter().flatten() {
            answered += 1;
            for hit in hits {
                if seen.insert(signature(&hit)) {
                    merged.push(hit);
                }
            }
        }

        info!(
            query,
            answered,
            hits = merged.len(),
            "Multi-query expansion complete"
        );
        merged
    }

    /// `None` when the query failed for good.
    async fn search_with_retry(
        &self,
        namespace: &str,
        query: AuxiliaryQuery,
    ) -> Option<Vec<VectorHit>> {
        let request = SimilarityQuery::new(query.text, query.top_k);
        let mut attempt = 0u32;
        loop {
            match self.store.similarity_search(namespace, &request).await {
                Ok(hits) => return Some(hits),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    let delay = self.backoff * attempt;
                    warn!(
                        query = query.text,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Auxiliary query failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(query = query.text, error = %e, "Auxiliary query failed");
                    return None;
                }
            }
        }
    }
}
