//! Hybrid search combining vector similarity and lexical matching.
//!
//! Vector hits are re-scored by query-token density and document type,
//! lexical hits keep their own scores, and the union is deduplicated by
//! file and matched lines before the final ordering.

pub mod expansion;
pub mod lexical;
pub mod lines;
pub mod query;
pub mod scoring;

pub use expansion::MultiQueryExpander;
pub use lexical::LexicalSearcher;
pub use query::{QueryEnhancer, QueryIntent, QueryPlan};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sieve_config::SearchConfig;
use tracing::{debug, error, info, warn};

use crate::chat::ChatProvider;
use crate::classifier::FileClassifier;
use crate::pipeline::IndexingSession;
use crate::store::{SimilarityQuery, VectorHit, VectorStore};

/// Returned as the analysis when a summary was requested but failed.
pub const ANALYSIS_FALLBACK: &str = "Analysis unavailable - results found but AI processing failed.";

/// Returned as the analysis when nothing matched at all.
pub const NO_RESULTS_MESSAGE: &str =
    "No results found. The index may still be building or the backends may be unavailable; \
     try again later or rephrase the query.";

const SUMMARY_VECTOR_RESULTS: usize = 3;
const SUMMARY_VECTOR_CHARS: usize = 500;
const SUMMARY_LEXICAL_RESULTS: usize = 2;
const SUMMARY_LEXICAL_CHARS: usize = 300;

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Vector,
    Lexical,
}

/// Which sides of the engine a query uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    VectorOnly,
    LexicalOnly,
    #[default]
    Hybrid,
}

/// A source line identified as relevant to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineMatch {
    /// 1-based line number in the file
    pub line_number: usize,
    pub line_content: String,
    pub matched_term: String,
}

/// A search result with relevance score and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub file_name: String,
    pub file_path: String,
    /// Focused excerpt (vector) or context snippets (lexical)
    pub content: String,
    pub score: f64,
    pub search_type: SearchType,
    pub line_matches: Vec<LineMatch>,
    pub metadata: BTreeMap<String, String>,
}

/// Everything a hybrid query produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HybridSearchResponse {
    pub query: String,
    pub vector_results: Vec<SearchResult>,
    pub lexical_results: Vec<SearchResult>,
    /// Both lists deduplicated and ranked, capped at the requested size
    pub results: Vec<SearchResult>,
    pub analysis: Option<String>,
    /// Lexical search ran because the vector side was empty, thin or incomplete
    pub used_fallback: bool,
}

/// Answers queries against one indexing session.
pub struct HybridSearcher {
    session: Arc<IndexingSession>,
    store: Arc<dyn VectorStore>,
    chat: Option<Arc<dyn ChatProvider>>,
    enhancer: QueryEnhancer,
    expander: MultiQueryExpander,
    lexical: LexicalSearcher,
    config: SearchConfig,
}

impl HybridSearcher {
    pub fn new(
        session: Arc<IndexingSession>,
        chat: Option<Arc<dyn ChatProvider>>,
        config: SearchConfig,
    ) -> Self {
        let store = Arc::clone(session.store());
        let indexing = session.config();
        let lexical = LexicalSearcher::new(
            FileClassifier::new(indexing.respect_gitignore),
            indexing.max_file_size,
            config.lexical_limit,
        );
        let enhancer = QueryEnhancer::new(if config.enhance_queries {
            chat.clone()
        } else {
            None
        });

        Self {
            expander: MultiQueryExpander::from_config(Arc::clone(&store), &config),
            store,
            session,
            chat,
            enhancer,
            lexical,
            config,
        }
    }

    pub fn session(&self) -> &Arc<IndexingSession> {
        &self.session
    }

    /// Vector search plus lexical fallback. Never fails; a `max_results`
    /// of zero uses the configured default.
    pub async fn hybrid_search(&self, query: &str, max_results: usize) -> HybridSearchResponse {
        self.search(SearchMode::Hybrid, query, max_results).await
    }

    pub async fn search(
        &self,
        mode: SearchMode,
        query: &str,
        max_results: usize,
    ) -> HybridSearchResponse {
        let query = query.trim();
        let max = if max_results == 0 {
            self.config.max_results
        } else {
            max_results
        };
        if query.is_empty() {
            return HybridSearchResponse {
                analysis: Some(NO_RESULTS_MESSAGE.to_string()),
                ..Default::default()
            };
        }

        let indexed = self.session.has_indexed_content();
        let complete = self.session.metrics().is_complete();

        let (vector_results, run_lexical, used_fallback) = match mode {
            SearchMode::LexicalOnly => (Vec::new(), true, false),
            SearchMode::VectorOnly if !indexed => (Vec::new(), false, false),
            SearchMode::VectorOnly => (self.vector_search(query, max).await, false, false),
            SearchMode::Hybrid if !indexed => {
                debug!(query, "No indexed files, skipping vector search");
                (Vec::new(), true, true)
            }
            SearchMode::Hybrid => {
                let results = self.vector_search(query, max).await;
                let thin = results.is_empty() || results.len() < max / 2;
                let fallback = thin || !complete;
                (results, fallback, fallback)
            }
        };

        let lexical_results = if run_lexical {
            self.lexical_search(query).await
        } else {
            Vec::new()
        };

        let mut results = scoring::deduplicate(
            vector_results
                .iter()
                .chain(lexical_results.iter())
                .cloned()
                .collect(),
        );
        scoring::rank(&mut results);
        results.truncate(max);

        info!(
            query,
            vector = vector_results.len(),
            lexical = lexical_results.len(),
            results = results.len(),
            used_fallback,
            "Search complete"
        );

        let analysis = if results.is_empty() {
            Some(NO_RESULTS_MESSAGE.to_string())
        } else {
            self.summarize(query, &vector_results, &lexical_results)
                .await
        };

        HybridSearchResponse {
            query: query.to_string(),
            vector_results,
            lexical_results,
            results,
            analysis,
            used_fallback,
        }
    }

    /// Scored vector results. Backend failures yield an empty list.
    async fn vector_search(&self, query: &str, max: usize) -> Vec<SearchResult> {
        let namespace = self.session.namespace();
        let (hits, expanded) = match self.enhancer.plan(query).await {
            QueryPlan::Expand => (self.expander.expand(&namespace, query).await, true),
            QueryPlan::Single(enriched) => {
                (self.single_query(&namespace, &enriched, query, max).await, false)
            }
        };

        let intent = QueryIntent::detect(query);
        let tokens = query::unique_tokens(query);
        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .map(|hit| to_result(hit, query, &tokens, intent))
            .collect();
        scoring::rank(&mut results);
        // The merged expansion set is the result set as a whole.
        if !expanded {
            results.truncate(max);
        }
        results
    }

    async fn single_query(
        &self,
        namespace: &str,
        enriched: &str,
        original: &str,
        max: usize,
    ) -> Vec<VectorHit> {
        let request =
            SimilarityQuery::new(enriched, max).with_threshold(self.config.similarity_threshold);
        match self.store.similarity_search(namespace, &request).await {
            Ok(hits) if !hits.is_empty() => return hits,
            Ok(_) => {}
            Err(e) => {
                warn!(namespace, error = %e, "Vector search failed");
                return Vec::new();
            }
        }

        let reduced = query::key_terms(original);
        if reduced.is_empty() || reduced == enriched {
            return Vec::new();
        }
        debug!(namespace, reduced = %reduced, "No vector hits, retrying with key terms");
        let request =
            SimilarityQuery::new(reduced, max).with_threshold(self.config.similarity_threshold);
        self.store
            .similarity_search(namespace, &request)
            .await
            .unwrap_or_else(|e| {
                warn!(namespace, error = %e, "Key-term vector search failed");
                Vec::new()
            })
    }

    async fn lexical_search(&self, query: &str) -> Vec<SearchResult> {
        let lexical = self.lexical.clone();
        let root = self.session.root();
        let query = query.to_string();
        match tokio::task::spawn_blocking(move || lexical.search(&root, &query)).await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "Lexical search task failed");
                Vec::new()
            }
        }
    }

    /// Best-effort natural-language summary of the top results.
    async fn summarize(
        &self,
        query: &str,
        vector_results: &[SearchResult],
        lexical_results: &[SearchResult],
    ) -> Option<String> {
        if !self.config.summarize {
            return None;
        }
        let chat = self.chat.as_ref()?;
        if vector_results.is_empty() && lexical_results.is_empty() {
            return None;
        }

        let prompt = summary_prompt(query, vector_results, lexical_results);
        match chat.complete(&prompt).await {
            Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            Ok(_) => Some(ANALYSIS_FALLBACK.to_string()),
            Err(e) => {
                warn!(query, error = %e, "Result summary failed");
                Some(ANALYSIS_FALLBACK.to_string())
            }
        }
    }
}

fn to_result(hit: VectorHit, query: &str, tokens: &[String], intent: QueryIntent) -> SearchResult {
    let chunk = hit.chunk;
    let line_matches = lines::extract_line_matches(&chunk.text, query, chunk.start_line);
    let content = lines::focused_content(&chunk.text, query, &line_matches, chunk.start_line);
    let score = scoring::vector_score(&chunk.text, tokens, chunk.document_type, intent);

    let mut metadata = BTreeMap::new();
    metadata.insert("point_id".to_string(), hit.id);
    metadata.insert("document_type".to_string(), chunk.document_type.to_string());
    metadata.insert("chunk_index".to_string(), chunk.chunk_index.to_string());
    metadata.insert("total_chunks".to_string(), chunk.total_chunks.to_string());
    metadata.insert("file_type".to_string(), chunk.file_type);
    metadata.insert("priority_tier".to_string(), chunk.priority_tier.to_string());
    metadata.insert("namespace".to_string(), chunk.namespace);
    if let Some(similarity) = hit.score {
        metadata.insert("similarity".to_string(), format!("{:.4}", similarity));
    }

    SearchResult {
        file_name: chunk.file_name,
        file_path: chunk.source_path,
        content,
        score,
        search_type: SearchType::Vector,
        line_matches,
        metadata,
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn summary_prompt(
    query: &str,
    vector_results: &[SearchResult],
    lexical_results: &[SearchResult],
) -> String {
    let mut context = format!("Query: {}\n\n", query);
    if !vector_results.is_empty() {
        context.push_str("Vector Search Results:\n");
        for result in vector_results.iter().take(SUMMARY_VECTOR_RESULTS) {
            context.push_str(&format!(
                "File: {}\nContent: {}...\n\n",
                result.file_name,
                excerpt(&result.content, SUMMARY_VECTOR_CHARS)
            ));
        }
    }
    if !lexical_results.is_empty() {
        context.push_str("File Search Results:\n");
        for result in lexical_results.iter().take(SUMMARY_LEXICAL_RESULTS) {
            context.push_str(&format!(
                "File: {}\nContent: {}...\n\n",
                result.file_name,
                excerpt(&result.content, SUMMARY_LEXICAL_CHARS)
            ));
        }
    }

    format!(
        "Based on the following code search results, provide a brief analysis of what was \
         found and how it relates to the query '{}':\n\n{}\n\
         Please provide:\n\
         1. A summary of the main findings\n\
         2. How the results relate to the query\n\
         3. Key insights about the codebase structure\n\n\
         Keep the response concise (max 200 words).",
        query, context
    )
}
