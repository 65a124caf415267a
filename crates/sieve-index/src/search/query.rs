//! Query analysis: tokenizing, intent detection and the enhancement hand-off.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::chat::ChatProvider;

/// Words ignored when tokenizing queries.
pub const STOPWORDS: &[&str] = &[
    "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "from", "is",
    "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will", "would",
    "could", "should", "may", "might", "can", "this", "that", "these", "those", "i", "you", "he",
    "she", "it", "we", "they",
];

/// Phrases that ask for a listing of HTTP endpoints.
const ENDPOINT_DISCOVERY_PHRASES: &[&str] = &[
    "endpoints",
    "api endpoints",
    "flask routes",
    "spring endpoints",
    "all endpoints",
    "list endpoints",
    "find endpoints",
    "rest api",
];

/// Enriched queries longer than this are assumed to be model chatter.
const MAX_ENRICHED_CHARS: usize = 300;

fn is_separator(c: char) -> bool {
    c.is_whitespace() || ",;.!?()[]{}\"'".contains(c)
}

/// Lower-cased query terms longer than two characters, stopwords removed.
pub fn tokenize(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(is_separator)
        .filter(|t| t.chars().count() > 2 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// [`tokenize`] without repeats, in first-seen order.
pub fn unique_tokens(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// The query reduced to its key terms.
pub fn key_terms(query: &str) -> String {
    tokenize(query).join(" ")
}

/// What the user seems to be looking for; drives document-type boosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    Endpoint,
    Project,
    General,
}

impl QueryIntent {
    pub fn detect(query: &str) -> Self {
        let lower = query.to_lowercase();
        if ["endpoint", "route", "api"].iter().any(|k| lower.contains(k)) {
            QueryIntent::Endpoint
        } else if ["project", "framework", "dependency", "dependencies"]
            .iter()
            .any(|k| lower.contains(k))
        {
            QueryIntent::Project
        } else {
            QueryIntent::General
        }
    }
}

/// Whether the query asks to enumerate endpoints, which is served by
/// multi-query expansion rather than a single vector query.
pub fn is_endpoint_discovery(query: &str) -> bool {
    let lower = query.to_lowercase();
    ENDPOINT_DISCOVERY_PHRASES.iter().any(|p| lower.contains(p))
}

/// How the vector side of a query will be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    /// Issue the fixed auxiliary queries and merge them.
    Expand,
    /// Issue this (possibly enriched) query once.
    Single(String),
}

/// Turns a raw query into a [`QueryPlan`], optionally enriching it through
/// the chat backend.
#[derive(Clone)]
pub struct QueryEnhancer {
    chat: Option<Arc<dyn ChatProvider>>,
}

impl QueryEnhancer {
    pub fn new(chat: Option<Arc<dyn ChatProvider>>) -> Self {
        Self { chat }
    }

    pub async fn plan(&self, query: &str) -> QueryPlan {
        if is_endpoint_discovery(query) {
            debug!(query, "Endpoint discovery query, expanding");
            return QueryPlan::Expand;
        }
        let Some(chat) = &self.chat else {
            return QueryPlan::Single(query.to_string());
        };

        match chat.complete(&enhancement_prompt(query)).await {
            Ok(response) => {
                let enriched = merge_enrichment(query, &response);
                debug!(query, enriched = %enriched, "Query enhanced");
                QueryPlan::Single(enriched)
            }
            Err(e) => {
                warn!(query, error = %e, "Query enhancement failed, using original query");
                QueryPlan::Single(query.to_string())
            }
        }
    }
}

fn enhancement_prompt(query: &str) -> String {
    format!(
        "You improve code search queries. Rewrite the query below for semantic search over a \
         source code repository by appending relevant framework names, syntax patterns and \
         programming concepts. Reply with a single line containing only the improved query.\n\n\
         Query: {}",
        query
    )
}

/// Keep the original query first and append whatever the model added.
fn merge_enrichment(query: &str, response: &str) -> String {
    let line = response
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .trim_matches('"');

    if line.is_empty() || line.chars().count() > MAX_ENRICHED_CHARS {
        return query.to_string();
    }
    if line.to_lowercase().contains(&query.to_lowercase()) {
        line.to_string()
    } else {
        format!("{} {}", query, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tokenize_drops_stopwords_and_short_terms() {
        assert_eq!(
            tokenize("Where is the validate_sql() endpoint, in app.py?"),
            vec!["where", "validate_sql", "endpoint", "app"]
        );
        assert!(tokenize("is it an up").is_empty());
    }

    #[test]
    fn test_unique_tokens() {
        assert_eq!(unique_tokens("order ORDER orders"), vec!["order", "orders"]);
    }

    #[test]
    fn test_key_terms() {
        assert_eq!(key_terms("How do they handle the user login"), "how handle user login");
    }

    #[test]
    fn test_detect_intent() {
        assert_eq!(QueryIntent::detect("validate sql endpoint"), QueryIntent::Endpoint);
        assert_eq!(QueryIntent::detect("which framework is used"), QueryIntent::Project);
        assert_eq!(QueryIntent::detect("parse config file"), QueryIntent::General);
    }

    #[test]
    fn test_endpoint_discovery() {
        assert!(is_endpoint_discovery("REST API endpoints"));
        assert!(is_endpoint_discovery("show me the flask routes"));
        assert!(!is_endpoint_discovery("validate sql endpoint"));
    }

    #[test]
    fn test_merge_enrichment() {
        assert_eq!(
            merge_enrichment("user login", "user login flask session authentication"),
            "user login flask session authentication"
        );
        assert_eq!(
            merge_enrichment("user login", "\n  \"session auth\"\n more"),
            "user login session auth"
        );
        assert_eq!(merge_enrichment("user login", ""), "user login");
        assert_eq!(merge_enrichment("q", &"x".repeat(400)), "q");
    }

    struct CountingChat {
        calls: AtomicUsize,
        reply: Result<String, BackendError>,
    }

    #[async_trait]
    impl ChatProvider for CountingChat {
        async fn complete(&self, _prompt: &str) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    #[tokio::test]
    async fn test_expansion_plan_skips_chat() {
        let chat = Arc::new(CountingChat {
            calls: AtomicUsize::new(0),
            reply: Ok("unused".to_string()),
        });
        let enhancer = QueryEnhancer::new(Some(chat.clone()));
        assert_eq!(enhancer.plan("list endpoints").await, QueryPlan::Expand);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_enhancement_failure_falls_back() {
        let chat = Arc::new(CountingChat {
            calls: AtomicUsize::new(0),
            reply: Err(BackendError::Transient("connection refused".to_string())),
        });
        let enhancer = QueryEnhancer::new(Some(chat.clone()));
        assert_eq!(
            enhancer.plan("order totals").await,
            QueryPlan::Single("order totals".to_string())
        );
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_chat_uses_original() {
        let enhancer = QueryEnhancer::new(None);
        assert_eq!(
            enhancer.plan("order totals").await,
            QueryPlan::Single("order totals".to_string())
        );
    }
}
