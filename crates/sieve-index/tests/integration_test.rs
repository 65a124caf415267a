//! End-to-end tests for indexing and hybrid search over a temporary project.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tempfile::TempDir;

use sieve_config::{IndexingConfig, SearchConfig};
use sieve_index::cache::modified_millis;
use sieve_index::classifier::ChunkStrategy;
use sieve_index::search::expansion::{signature, AUXILIARY_QUERIES};
use sieve_index::search::ANALYSIS_FALLBACK;
use sieve_index::store::CollectionInfo;
use sieve_index::{
    BackendError, ChangeCache, ChatProvider, Chunk, Chunker, DistanceMetric, HashingEmbeddings,
    HybridSearcher, InMemoryStore, IndexingSession, NamespaceManager, SearchMode, SimilarityQuery,
    VectorHit, VectorStore,
};

const FLASK_APP: &str = "from flask import Flask, request\n\
app = Flask(__name__)\n\
\n\
@app.route('/api/validate-sql', methods=['POST'])\n\
def validate_sql():\n    \
    return check(request.json)\n";

/// Content the rejecting store refuses to embed.
const POISON: &str = "<|endoftext|>";

/// Records similarity searches and rejects chunks containing [`POISON`].
struct InstrumentedStore {
    inner: InMemoryStore,
    searches: AtomicUsize,
    queries: Mutex<Vec<String>>,
    /// Searches still to be answered with no hits
    blank: AtomicUsize,
}

impl InstrumentedStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(Arc::new(HashingEmbeddings::new(64))),
            searches: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
            blank: AtomicUsize::new(0),
        }
    }

    fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn answer_next_blank(&self, n: usize) {
        self.blank.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorStore for InstrumentedStore {
    fn embedding_dimensions(&self) -> usize {
        self.inner.embedding_dimensions()
    }

    async fn ensure_collection(
        &self,
        name: &str,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<(), BackendError> {
        self.inner.ensure_collection(name, dimensions, metric).await
    }

    async fn delete_collection(&self, name: &str) -> Result<(), BackendError> {
        self.inner.delete_collection(name).await
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo, BackendError> {
        self.inner.collection_info(name).await
    }

    async fn add(&self, namespace: &str, chunks: &[Chunk]) -> Result<Vec<String>, BackendError> {
        if chunks.iter().any(|c| c.text.contains(POISON)) {
            return Err(BackendError::EmbeddingRejected(
                "tokenizer failed to encode input".to_string(),
            ));
        }
        self.inner.add(namespace, chunks).await
    }

    async fn similarity_search(
        &self,
        namespace: &str,
        query: &SimilarityQuery,
    ) -> Result<Vec<VectorHit>, BackendError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.text.clone());
        let blank = self
            .blank
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if blank {
            return Ok(Vec::new());
        }
        self.inner.similarity_search(namespace, query).await
    }

    async fn delete_points(&self, namespace: &str, ids: &[String]) -> Result<(), BackendError> {
        self.inner.delete_points(namespace, ids).await
    }
}

struct Project {
    state: TempDir,
    dir: TempDir,
    store: Arc<InstrumentedStore>,
}

impl Project {
    fn new() -> Self {
        Self {
            state: TempDir::new().unwrap(),
            dir: TempDir::new().unwrap(),
            store: Arc::new(InstrumentedStore::new()),
        }
    }

    fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn session(&self) -> Arc<IndexingSession> {
        let config = IndexingConfig {
            bulk_delay_ms: 0,
            state_dir: self.state.path().to_path_buf(),
            ..IndexingConfig::default()
        };
        let namespaces =
            NamespaceManager::new(self.store.clone()).with_propagation_delay(Duration::ZERO);
        Arc::new(IndexingSession::open(self.dir.path(), config, namespaces).unwrap())
    }

    async fn indexed_session(&self) -> Arc<IndexingSession> {
        let session = self.session();
        session.clone().run().await;
        session
    }
}

/// Answers every prompt with the same reply.
struct ScriptedChat {
    reply: Result<String, BackendError>,
    calls: AtomicUsize,
}

impl ScriptedChat {
    fn new(reply: Result<String, BackendError>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn complete(&self, _prompt: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }
}

fn searcher(session: Arc<IndexingSession>) -> HybridSearcher {
    let config = SearchConfig {
        enhance_queries: false,
        summarize: false,
        ..SearchConfig::default()
    };
    HybridSearcher::new(session, None, config)
}

fn summarizing_searcher(session: Arc<IndexingSession>, chat: Arc<ScriptedChat>) -> HybridSearcher {
    let config = SearchConfig {
        enhance_queries: false,
        summarize: true,
        ..SearchConfig::default()
    };
    let chat: Arc<dyn ChatProvider> = chat;
    HybridSearcher::new(session, Some(chat), config)
}

fn vector_files(results: &[sieve_index::SearchResult]) -> Vec<String> {
    let mut files: Vec<String> = results.iter().map(|r| r.file_name.clone()).collect();
    files.sort();
    files.dedup();
    files
}

const ORDER_SERVICE: &str = "public class OrderService {\n    public void placeOrder(Order order) {}\n}\n";

#[tokio::test]
async fn test_route_decorator_is_highlighted() {
    let project = Project::new();
    project.write("app.py", FLASK_APP);
    let session = project.indexed_session().await;

    let response = searcher(session).hybrid_search("validate sql endpoint", 10).await;

    let decorator = response
        .results
        .iter()
        .flat_map(|r| r.line_matches.iter())
        .find(|m| m.line_content.starts_with("@app.route('/api/validate-sql'"))
        .expect("decorator line should be matched");
    assert_eq!(decorator.line_number, 4);
    assert!(!response.vector_results.is_empty());
}

#[tokio::test]
async fn test_empty_index_falls_back_to_lexical() {
    let project = Project::new();
    project.write("OrderController.java", "public class OrderController {\n    void createOrder() {}\n}\n");
    // never indexed
    let session = project.session();

    let response = searcher(session).hybrid_search("create order", 10).await;

    assert!(response.used_fallback);
    assert!(response.vector_results.is_empty());
    assert_eq!(project.store.searches(), 0);
    assert_eq!(response.lexical_results.len(), 1);
    assert_eq!(response.results[0].file_name, "OrderController.java");
}

#[tokio::test]
async fn test_endpoint_discovery_issues_exactly_three_queries() {
    let project = Project::new();
    project.write("app.py", FLASK_APP);
    project.write(
        "api/orders.py",
        "@app.route('/orders', methods=['GET'])\ndef list_orders():\n    return jsonify(ORDERS)\n",
    );
    project.write("README.md", "# Orders\nA Flask API that serves POST methods with JSON bodies.\n");
    let session = project.indexed_session().await;
    assert_eq!(project.store.searches(), 0);

    let response = searcher(session.clone()).hybrid_search("REST API endpoints", 50).await;
    assert_eq!(project.store.searches(), 3);

    let mut expected = HashSet::new();
    for aux in AUXILIARY_QUERIES {
        let hits = project
            .store
            .inner
            .similarity_search(&session.namespace(), &SimilarityQuery::new(aux.text, aux.top_k))
            .await
            .unwrap();
        expected.extend(hits.iter().map(signature));
    }
    assert_eq!(response.vector_results.len(), expected.len());
}

#[tokio::test]
async fn test_endpoint_discovery_sees_newly_indexed_routes() {
    let project = Project::new();
    project.write("app.py", FLASK_APP);
    let session = project.indexed_session().await;
    let searcher = searcher(session.clone());

    let first = searcher.hybrid_search("REST API endpoints", 50).await;
    assert_eq!(vector_files(&first.vector_results), vec!["app.py"]);

    project.write(
        "orders_routes.py",
        "@app.route('/orders', methods=['POST'])\ndef create_order():\n    return jsonify(save(request.json))\n",
    );
    session.clone().run().await;
    assert_eq!(session.indexed_file_count(), 2);

    let second = searcher.hybrid_search("REST API endpoints", 50).await;
    assert_eq!(project.store.searches(), 6);
    assert_eq!(
        vector_files(&second.vector_results),
        vec!["app.py", "orders_routes.py"]
    );
}

#[tokio::test]
async fn test_few_vector_hits_add_lexical_results() {
    let project = Project::new();
    project.write("OrderService.java", ORDER_SERVICE);
    let session = project.indexed_session().await;
    assert!(session.status().complete);

    let response = searcher(session).hybrid_search("place order", 10).await;

    assert_eq!(response.vector_results.len(), 1);
    assert!(response.used_fallback);
    assert_eq!(response.lexical_results.len(), 1);
    assert_eq!(response.results[0].file_name, "OrderService.java");
}

#[tokio::test]
async fn test_incomplete_index_adds_lexical_results() {
    let project = Project::new();
    project.write("UserController.java", "public class UserController {\n    void listUsers() {}\n}\n");
    project.write("OrderController.java", "public class OrderController {\n    void createOrder() {}\n}\n");
    project.write("lib/helpers.py", "def helper(x):\n    return x + 1 if x else None\n");
    let session = project.session();
    session.pause();
    let handle = session.start();
    session.wait_until_search_ready().await;
    assert!(!session.status().complete);

    let response = searcher(session.clone()).hybrid_search("order controller", 2).await;
    assert_eq!(response.vector_results.len(), 2);
    assert!(response.used_fallback);
    assert!(!response.lexical_results.is_empty());

    session.resume();
    handle.await.unwrap();
    assert!(session.status().complete);
}

#[tokio::test]
async fn test_zero_vector_hits_retry_with_key_terms() {
    let project = Project::new();
    project.write("OrderService.java", ORDER_SERVICE);
    let session = project.indexed_session().await;

    project.store.answer_next_blank(1);
    let response = searcher(session)
        .search(SearchMode::VectorOnly, "how do they place the order", 10)
        .await;

    assert_eq!(
        project.store.queries(),
        vec!["how do they place the order", "how place order"]
    );
    assert_eq!(response.vector_results.len(), 1);
}

#[tokio::test]
async fn test_vector_hits_skip_key_term_retry() {
    let project = Project::new();
    project.write("OrderService.java", ORDER_SERVICE);
    let session = project.indexed_session().await;

    searcher(session)
        .search(SearchMode::VectorOnly, "how do they place the order", 10)
        .await;
    assert_eq!(project.store.searches(), 1);
}

#[tokio::test]
async fn test_failed_summary_uses_fallback_text() {
    let project = Project::new();
    project.write("OrderService.java", ORDER_SERVICE);
    let session = project.indexed_session().await;
    let chat = ScriptedChat::new(Err(BackendError::Transient("connection refused".to_string())));

    let response = summarizing_searcher(session, chat.clone())
        .hybrid_search("place order", 10)
        .await;

    assert!(!response.results.is_empty());
    assert_eq!(response.analysis.as_deref(), Some(ANALYSIS_FALLBACK));
    assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_summary_is_returned_as_analysis() {
    let project = Project::new();
    project.write("OrderService.java", ORDER_SERVICE);
    let session = project.indexed_session().await;
    let chat = ScriptedChat::new(Ok("  OrderService places orders.\n".to_string()));

    let response = summarizing_searcher(session, chat)
        .hybrid_search("place order", 10)
        .await;
    assert_eq!(response.analysis.as_deref(), Some("OrderService places orders."));
}

#[tokio::test]
async fn test_lexical_only_never_queries_the_store() {
    let project = Project::new();
    project.write("OrderService.java", ORDER_SERVICE);
    let session = project.indexed_session().await;

    let response = searcher(session)
        .search(SearchMode::LexicalOnly, "place order", 10)
        .await;

    assert_eq!(project.store.searches(), 0);
    assert!(response.vector_results.is_empty());
    assert_eq!(response.lexical_results.len(), 1);
    assert!(!response.used_fallback);
}

#[tokio::test]
async fn test_vector_only_never_runs_lexical() {
    let project = Project::new();
    project.write("OrderService.java", ORDER_SERVICE);
    let session = project.indexed_session().await;

    let response = searcher(session)
        .search(SearchMode::VectorOnly, "place order", 10)
        .await;

    assert_eq!(response.vector_results.len(), 1);
    assert!(response.lexical_results.is_empty());
    assert!(!response.used_fallback);
}

#[test]
fn test_unanchored_content_uses_fixed_windows() {
    let sentence = "plain prose without any structural anchors at all. ";
    let content: String = sentence.repeat(200).chars().take(10_000).collect();
    assert_eq!(content.len(), 10_000);

    let chunker = Chunker::new(4000, 3000, 500);
    let segments = chunker.split(&content, ChunkStrategy::Sniff);

    let expected = (10_000f64 - 500.0) / (3000.0 - 500.0);
    assert_eq!(segments.len(), expected.ceil() as usize);
    assert!(segments.iter().skip(1).all(|s| s.overlap == 500));
}

#[tokio::test]
async fn test_rejected_content_counts_as_skipped() {
    let project = Project::new();
    project.write("OrderService.java", "public class OrderService {\n    void place() {}\n}\n");
    project.write("tokens.py", &format!("MARKER = '{}'\n", POISON));
    let session = project.indexed_session().await;

    let status = session.status();
    assert_eq!(status.indexed_files, 1);
    assert_eq!(status.skipped_files, 1);
    assert_eq!(status.failed_files, 0);
    assert_eq!(status.skipped_by_extension.get("py"), Some(&1));
    assert!(status.complete);
}

#[tokio::test]
async fn test_unchanged_project_is_not_reprocessed() {
    let project = Project::new();
    project.write("app.py", FLASK_APP);
    project.write("src/OrderService.java", "public class OrderService {}\n");
    project.write("docs/setup.md", "# Setup\nRun the service locally with the dev profile.\n");

    let first = project.indexed_session().await;
    assert_eq!(first.status().indexed_files, 3);
    assert_eq!(first.indexed_file_count(), 3);

    let second = project.indexed_session().await;
    let status = second.status();
    assert_eq!(status.indexed_files, 0);
    assert_eq!(status.total_files, 0);
    assert!(status.search_ready);
    assert_eq!(second.indexed_file_count(), 3);
}

fn touch_later(path: &Path) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();
}

#[test]
fn test_cache_reloads_and_evicts_on_change() {
    let state = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let file = project.path().join("main.py");
    fs::write(&file, "print('hello')\n").unwrap();
    let mtime = modified_millis(&file).unwrap();

    let log = state.path().join("ns.cache");
    ChangeCache::new(&log).record_indexed(&file, mtime).unwrap();

    let reloaded = ChangeCache::new(&log);
    let report = reloaded.load().unwrap();
    assert_eq!(report.valid, 1);
    assert!(reloaded.contains(&file));
    assert_eq!(reloaded.cached_mtime(&file), Some(mtime));
    assert!(!reloaded.needs_reindexing(&file));

    touch_later(&file);
    assert!(reloaded.needs_reindexing(&file));
    assert!(!reloaded.contains(&file));
}
