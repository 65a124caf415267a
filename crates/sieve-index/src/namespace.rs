//! Per-root vector namespaces.
//!
//! Every indexed root directory maps to exactly one collection whose name
//! is derived from the path alone, so callers can predict it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::BackendError;
use crate::store::{DistanceMetric, VectorStore};

/// Prefix shared by every namespace name.
pub const INDEX_PREFIX: &str = "codebase-index";

/// Path segment whose successor names the project (e.g. `./codebase/<project>`).
const CODEBASE_MARKER: &str = "codebase";

/// Derive the namespace name for a root directory.
///
/// ```
/// use std::path::Path;
/// use sieve_index::namespace::name_for;
///
/// assert_eq!(name_for(Path::new("./codebase/dssi-day3-ollama")), "codebase-index-dssi-day3-ollama");
/// assert_eq!(name_for(Path::new("/home/me/My Project")), "codebase-index-my-project");
/// ```
pub fn name_for(root: &Path) -> String {
    let normalized = root.to_string_lossy().replace('\\', "/");
    let segments: Vec<&str> = normalized
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();

    let leaf = segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case(CODEBASE_MARKER))
        .and_then(|pos| segments.get(pos + 1))
        .or_else(|| segments.last())
        .copied()
        .unwrap_or("");

    let slug = sanitize(leaf);
    if slug.is_empty() {
        INDEX_PREFIX.to_string()
    } else {
        format!("{}-{}", INDEX_PREFIX, slug)
    }
}

/// Lower-case, map everything outside `[a-z0-9-]` to `-`, collapse and trim dashes.
fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('-').to_string()
}

/// A vector namespace as it exists in the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Namespace {
    pub name: String,
    pub dimensions: usize,
    pub metric: DistanceMetric,
}

/// What [`NamespaceManager::ensure`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Existing,
    Created,
    /// Deleted and recreated because the stored width differed
    Rebuilt { previous_dimensions: usize },
}

/// Creates, validates and rebuilds namespaces in a vector store.
#[derive(Clone)]
pub struct NamespaceManager {
    store: Arc<dyn VectorStore>,
    metric: DistanceMetric,
    propagation_delay: Duration,
}

impl NamespaceManager {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            metric: DistanceMetric::Cosine,
            propagation_delay: Duration::from_millis(500),
        }
    }

    pub fn with_propagation_delay(mut self, delay: Duration) -> Self {
        self.propagation_delay = delay;
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    fn describe(&self, name: &str) -> Namespace {
        Namespace {
            name: name.to_string(),
            dimensions: self.store.embedding_dimensions(),
            metric: self.metric,
        }
    }

    /// Make sure `name` exists with the embedder's width.
    pub async fn ensure(&self, name: &str) -> Result<(Namespace, EnsureOutcome), BackendError> {
        let expected = self.store.embedding_dimensions();

        let outcome = match self.store.collection_info(name).await {
            Ok(info) if info.dimensions == expected => {
                debug!(namespace = name, dimensions = expected, "Namespace ready");
                EnsureOutcome::Existing
            }
            Ok(info) => {
                let mismatch = BackendError::DimensionMismatch {
                    expected,
                    actual: info.dimensions,
                };
                warn!(namespace = name, error = %mismatch, "Rebuilding namespace");
                self.delete_tolerant(name).await?;
                self.store
                    .ensure_collection(name, expected, self.metric)
                    .await?;
                EnsureOutcome::Rebuilt {
                    previous_dimensions: info.dimensions,
                }
            }
            Err(BackendError::NamespaceNotFound(_)) => {
                info!(namespace = name, dimensions = expected, "Creating namespace");
                self.store
                    .ensure_collection(name, expected, self.metric)
                    .await?;
                EnsureOutcome::Created
            }
            Err(e) => return Err(e),
        };

        Ok((self.describe(name), outcome))
    }

    /// Delete `name` (missing is fine), wait for the store to settle, recreate.
    pub async fn clear_and_recreate(&self, name: &str) -> Result<Namespace, BackendError> {
        self.delete_tolerant(name).await?;
        if !self.propagation_delay.is_zero() {
            tokio::time::sleep(self.propagation_delay).await;
        }
        self.store
            .ensure_collection(name, self.store.embedding_dimensions(), self.metric)
            .await?;
        info!(namespace = name, "Namespace cleared and recreated");
        Ok(self.describe(name))
    }

    async fn delete_tolerant(&self, name: &str) -> Result<(), BackendError> {
        match self.store.delete_collection(name).await {
            Ok(()) | Err(BackendError::NamespaceNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbeddings;
    use crate::store::InMemoryStore;

    #[test]
    fn test_name_for_paths() {
        assert_eq!(
            name_for(Path::new("./codebase/dssi-day3-ollama")),
            "codebase-index-dssi-day3-ollama"
        );
        assert_eq!(
            name_for(Path::new("C:\\work\\codebase\\Shop_API\\src")),
            "codebase-index-shop-api"
        );
        assert_eq!(
            name_for(Path::new("/home/me/projects/Spring--Demo!!/")),
            "codebase-index-spring-demo"
        );
        assert_eq!(name_for(Path::new("/")), "codebase-index");
        assert_eq!(name_for(Path::new("/repo/codebase")), "codebase-index-codebase");
    }

    #[test]
    fn test_name_for_is_deterministic() {
        let p = Path::new("/tmp/some/Project");
        assert_eq!(name_for(p), name_for(p));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("--Hello World--"), "hello-world");
        assert_eq!(sanitize("a__b..c"), "a-b-c");
        assert_eq!(sanitize("Ünïcode"), "n-code");
    }

    fn manager() -> (Arc<InMemoryStore>, NamespaceManager) {
        let store = Arc::new(InMemoryStore::new(Arc::new(HashingEmbeddings::new(16))));
        let manager =
            NamespaceManager::new(store.clone()).with_propagation_delay(Duration::ZERO);
        (store, manager)
    }

    #[tokio::test]
    async fn test_ensure_creates_then_reuses() {
        let (_store, manager) = manager();
        let (ns, outcome) = manager.ensure("codebase-index-a").await.unwrap();
        assert_eq!(outcome, EnsureOutcome::Created);
        assert_eq!(ns.dimensions, 16);
        assert_eq!(ns.metric, DistanceMetric::Cosine);

        let (_, outcome) = manager.ensure("codebase-index-a").await.unwrap();
        assert_eq!(outcome, EnsureOutcome::Existing);
    }

    #[tokio::test]
    async fn test_ensure_rebuilds_on_dimension_mismatch() {
        let (store, manager) = manager();
        store.create_with_dimensions("codebase-index-a", 4096);

        let (_, outcome) = manager.ensure("codebase-index-a").await.unwrap();
        assert_eq!(
            outcome,
            EnsureOutcome::Rebuilt {
                previous_dimensions: 4096
            }
        );
        let info = store.collection_info("codebase-index-a").await.unwrap();
        assert_eq!(info.dimensions, 16);
    }

    #[tokio::test]
    async fn test_clear_and_recreate_tolerates_missing() {
        let (store, manager) = manager();
        manager.clear_and_recreate("codebase-index-new").await.unwrap();
        assert!(store.collection_info("codebase-index-new").await.is_ok());
    }
}
