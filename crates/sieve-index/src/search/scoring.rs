//! Relevance scoring, deduplication and final ordering of search results.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::query::QueryIntent;
use super::SearchResult;
use crate::chunker::DocumentType;

/// Lowest score a vector hit can receive.
pub const MIN_VECTOR_SCORE: f64 = 0.1;

/// Query-token occurrences per this many characters give a density of 1.0.
const DENSITY_SPAN: f64 = 100.0;

/// Share of `content` made up of query-token occurrences, in `[0, 1]`.
pub fn lexical_density(content: &str, tokens: &[String]) -> f64 {
    let length = content.chars().count();
    if length == 0 || tokens.is_empty() {
        return 0.0;
    }
    let lower = content.to_lowercase();
    let occurrences: usize = tokens.iter().map(|t| lower.matches(t.as_str()).count()).sum();
    (occurrences as f64 * DENSITY_SPAN / length as f64).min(1.0)
}

/// Multiplier for a document type under a query intent.
pub fn document_type_boost(document_type: DocumentType, intent: QueryIntent) -> f64 {
    use DocumentType::*;
    match intent {
        QueryIntent::Endpoint => match document_type {
            RestApiEndpoint => 3.0,
            Function => 1.5,
            FrameworkDocumentation => 1.2,
            _ => 1.0,
        },
        QueryIntent::Project => match document_type {
            ProjectAnalysis => 3.0,
            FrameworkDocumentation => 2.0,
            _ => 1.0,
        },
        QueryIntent::General => match document_type {
            RestApiEndpoint => 1.2,
            Function | Class => 1.1,
            _ => 1.0,
        },
    }
}

/// Score of a vector hit: lexical density times the type boost, floored.
pub fn vector_score(
    content: &str,
    tokens: &[String],
    document_type: DocumentType,
    intent: QueryIntent,
) -> f64 {
    let density = lexical_density(content, tokens);
    (density * document_type_boost(document_type, intent)).max(MIN_VECTOR_SCORE)
}

fn dedup_key(result: &SearchResult) -> (String, Vec<usize>) {
    let mut lines: Vec<usize> = result.line_matches.iter().map(|m| m.line_number).collect();
    lines.sort_unstable();
    (result.file_path.clone(), lines)
}

/// Collapse results sharing a file path and matched-line set, keeping the
/// higher score. First-seen order is preserved.
pub fn deduplicate(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut slots: HashMap<(String, Vec<usize>), usize> = HashMap::new();
    let mut kept: Vec<SearchResult> = Vec::with_capacity(results.len());

    for result in results {
        let key = dedup_key(&result);
        match slots.get(&key) {
            Some(&slot) => {
                if result.score > kept[slot].score {
                    kept[slot] = result;
                }
            }
            None => {
                slots.insert(key, kept.len());
                kept.push(result);
            }
        }
    }
    kept
}

fn first_line(result: &SearchResult) -> usize {
    result
        .line_matches
        .iter()
        .map(|m| m.line_number)
        .min()
        .unwrap_or(usize::MAX)
}

/// Descending score, then earliest matched line, then file name.
pub fn compare(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| first_line(a).cmp(&first_line(b)))
        .then_with(|| a.file_name.cmp(&b.file_name))
}

pub fn rank(results: &mut [SearchResult]) {
    results.sort_by(compare);
}
