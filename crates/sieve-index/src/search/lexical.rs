//! Brute-force text search over the supported files of a root.
//!
//! Independent of the vector index, so it keeps answering while indexing
//! is incomplete or the vector backend is down.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tracing::{debug, warn};

use super::query::unique_tokens;
use super::{LineMatch, SearchResult, SearchType};
use crate::classifier::{ClassifiedFile, FileClassifier};

/// Bonus for containing the whole query phrase.
const PHRASE_BONUS: f64 = 10.0;

/// Context snippets kept per matched term.
const SNIPPETS_PER_TERM: usize = 2;

/// Snippets kept per file.
const SNIPPETS_PER_FILE: usize = 3;

/// Lines of context around a snippet's matched line.
const SNIPPET_CONTEXT: usize = 2;

const MAX_LINE_MATCHES: usize = 10;

#[derive(Debug, Clone)]
pub struct LexicalSearcher {
    classifier: FileClassifier,
    max_file_size: u64,
    limit: usize,
}

impl LexicalSearcher {
    pub fn new(classifier: FileClassifier, max_file_size: u64, limit: usize) -> Self {
        Self {
            classifier,
            max_file_size,
            limit,
        }
    }

    /// Score every supported file under `root` against `query`.
    ///
    /// Unreadable files are skipped; results are sorted by score and capped.
    pub fn search(&self, root: &Path, query: &str) -> Vec<SearchResult> {
        let phrase = query.trim().to_lowercase();
        if phrase.is_empty() {
            return Vec::new();
        }
        let terms = unique_tokens(query);

        let files = self.classifier.walk(root);
        let mut results: Vec<SearchResult> = files
            .iter()
            .filter_map(|file| self.search_file(file, &phrase, &terms))
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.file_path.cmp(&b.file_path))
        });
        results.truncate(self.limit);

        debug!(
            root = %root.display(),
            scanned = files.len(),
            results = results.len(),
            "Lexical search complete"
        );
        results
    }

    fn search_file(
        &self,
        file: &ClassifiedFile,
        phrase: &str,
        terms: &[String],
    ) -> Option<SearchResult> {
        let size = std::fs::metadata(&file.path).ok()?.len();
        if size > self.max_file_size {
            return None;
        }
        let content = match std::fs::read_to_string(&file.path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "Skipping unreadable file");
                return None;
            }
        };
        score_content(file, &content, phrase, terms)
    }
}

/// Score one file's content. `phrase` must already be lower-cased.
fn score_content(
    file: &ClassifiedFile,
    content: &str,
    phrase: &str,
    terms: &[String],
) -> Option<SearchResult> {
    let lines: Vec<&str> = content.lines().collect();
    let lowered: Vec<String> = lines.iter().map(|l| l.to_lowercase()).collect();
    let weight = file.role().lexical_weight();

    let mut score = 0.0;
    let mut snippets: Vec<String> = Vec::new();
    let mut matches: Vec<LineMatch> = Vec::new();

    let collect = |needle: &str, snippets: &mut Vec<String>, matches: &mut Vec<LineMatch>| {
        snippets.extend(snippets_for(&lines, &lowered, needle));
        matches.extend(
            lowered
                .iter()
                .enumerate()
                .filter(|(_, l)| l.contains(needle))
                .map(|(i, _)| LineMatch {
                    line_number: i + 1,
                    line_content: lines[i].trim().to_string(),
                    matched_term: needle.to_string(),
                }),
        );
    };

    if content.to_lowercase().contains(phrase) {
        score += PHRASE_BONUS;
        collect(phrase, &mut snippets, &mut matches);
    }

    for term in terms {
        let count: usize = lowered.iter().map(|l| l.matches(term.as_str()).count()).sum();
        if count > 0 {
            score += count as f64 * weight;
            collect(term, &mut snippets, &mut matches);
        }
    }

    if score <= 0.0 {
        return None;
    }

    let mut seen_snippets = HashSet::new();
    snippets.retain(|s| seen_snippets.insert(s.clone()));
    snippets.truncate(SNIPPETS_PER_FILE);

    let mut seen_lines = HashSet::new();
    matches.retain(|m| seen_lines.insert(m.line_number));
    matches.sort_by_key(|m| m.line_number);
    matches.truncate(MAX_LINE_MATCHES);

    let content = if snippets.is_empty() {
        "File contains matching content".to_string()
    } else {
        snippets.join("\n\n")
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("file_type".to_string(), file.extension.clone());
    metadata.insert("language".to_string(), file.kind.language.to_string());
    metadata.insert("priority_tier".to_string(), file.tier.to_string());

    Some(SearchResult {
        file_name: file.file_name.clone(),
        file_path: file.path.to_string_lossy().to_string(),
        content,
        score,
        search_type: SearchType::Lexical,
        line_matches: matches,
        metadata,
    })
}

/// Up to two snippets around lines containing `needle`, the matched line
/// marked with `>>>`.
fn snippets_for(lines: &[&str], lowered: &[String], needle: &str) -> Vec<String> {
    lowered
        .iter()
        .enumerate()
        .filter(|(_, l)| l.contains(needle))
        .take(SNIPPETS_PER_TERM)
        .map(|(i, _)| {
            let start = i.saturating_sub(SNIPPET_CONTEXT);
            let end = (i + SNIPPET_CONTEXT + 1).min(lines.len());
            (start..end)
                .map(|j| {
                    let marker = if j == i { ">>> " } else { "    " };
                    format!("{}{}", marker, lines[j].trim())
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn searcher() -> LexicalSearcher {
        LexicalSearcher::new(FileClassifier::default(), 1024 * 1024, 20)
    }

    #[test]
    fn test_phrase_and_role_weighting() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("OrderController.java"),
            "class OrderController {\n  // create order\n  void createOrder() {}\n}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("notes.md"),
            "Remember to create order fixtures.\n",
        )
        .unwrap();

        let results = searcher().search(dir.path(), "create order");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].file_name, "OrderController.java");
        assert_eq!(results[0].search_type, SearchType::Lexical);
        // phrase bonus + "create" x2 + "order" x3, weighted 3.0
        assert_eq!(results[0].score, 10.0 + 5.0 * 3.0);
        // phrase bonus + one of each term
        assert_eq!(results[1].score, 12.0);
    }

    #[test]
    fn test_snippets_mark_matched_line() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("util.py"),
            "import os\n\ndef load_settings(path):\n    return open(path).read()\n\nprint('x')\n",
        )
        .unwrap();

        let results = searcher().search(dir.path(), "load_settings");
        assert_eq!(results.len(), 1);
        let snippet = &results[0].content;
        assert!(snippet.contains(">>> def load_settings(path):"));
        assert!(snippet.contains("    import os"));
        assert_eq!(results[0].line_matches[0].line_number, 3);
        assert_eq!(results[0].line_matches[0].line_content, "def load_settings(path):");
    }

    #[test]
    fn test_line_matches_deduplicated_and_capped() {
        let dir = TempDir::new().unwrap();
        let body: String = (0..30).map(|i| format!("cart total {}\n", i)).collect();
        fs::write(dir.path().join("cart.py"), body).unwrap();

        let results = searcher().search(dir.path(), "cart total");
        let lines: Vec<usize> = results[0].line_matches.iter().map(|m| m.line_number).collect();
        assert_eq!(lines, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_no_match_and_large_files_excluded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "print('hello')\n").unwrap();
        fs::write(dir.path().join("big.py"), "needle\n".repeat(200)).unwrap();

        let small = LexicalSearcher::new(FileClassifier::default(), 100, 20);
        assert!(small.search(dir.path(), "needle").is_empty());
        assert!(searcher().search(dir.path(), "absent").is_empty());
        assert!(searcher().search(dir.path(), "   ").is_empty());
    }

    #[test]
    fn test_results_capped() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("m{}.py", i)), "checkout flow\n").unwrap();
        }
        let capped = LexicalSearcher::new(FileClassifier::default(), 1024, 3);
        assert_eq!(capped.search(dir.path(), "checkout").len(), 3);
    }
}
