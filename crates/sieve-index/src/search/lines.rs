//! Line-level match extraction and focused excerpts for vector hits.

use std::collections::HashSet;

use super::query::unique_tokens;
use super::LineMatch;

const PHRASE_WEIGHT: f64 = 1.0;
const TOKEN_WEIGHT: f64 = 0.3;
const MULTI_TOKEN_BONUS: f64 = 0.2;
const STRUCTURAL_BONUS: f64 = 0.2;
const IMPORT_BONUS: f64 = 0.1;
const MIN_RELEVANCE: f64 = 0.1;

const MAX_MATCHES: usize = 8;
const MAX_FALLBACK_MATCHES: usize = 5;

/// Lines shown before and after a matched line.
const LINES_BEFORE: usize = 2;
const LINES_AFTER: usize = 1;

/// Lines shown when nothing matched.
const PREVIEW_LINES: usize = 8;

const STRUCTURAL_PREFIXES: &[&str] = &[
    "@", "def ", "async def ", "class ", "function ", "async function ", "fn ", "pub fn ",
    "func ", "interface ",
];

const IMPORT_PREFIXES: &[&str] = &[
    "import ", "from ", "use ", "package ", "require", "#include", "public ", "private ",
    "protected ", "export ", "pub ",
];

fn is_structural(trimmed: &str) -> bool {
    STRUCTURAL_PREFIXES.iter().any(|p| trimmed.starts_with(p))
        || trimmed.contains(" class ")
        || trimmed.contains(" function ")
        || trimmed.contains(" def ")
}

fn is_import_or_visibility(trimmed: &str) -> bool {
    IMPORT_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Rank the lines of `content` against `query`.
///
/// `first_line` is the file line number of the first line of `content`.
/// Returns at most eight matches, most relevant first.
pub fn extract_line_matches(content: &str, query: &str, first_line: usize) -> Vec<LineMatch> {
    let phrase = query.trim().to_lowercase();
    let tokens = unique_tokens(query);
    if phrase.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(f64, LineMatch)> = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();

        let phrase_hit = lower.contains(&phrase);
        let hits: Vec<&str> = tokens
            .iter()
            .filter(|t| lower.contains(t.as_str()))
            .map(String::as_str)
            .collect();
        if !phrase_hit && hits.is_empty() {
            continue;
        }

        let mut relevance = hits.len() as f64 * TOKEN_WEIGHT;
        if phrase_hit {
            relevance += PHRASE_WEIGHT;
        }
        if hits.len() > 1 {
            relevance += MULTI_TOKEN_BONUS;
        }
        if is_structural(trimmed) {
            relevance += STRUCTURAL_BONUS;
        }
        if is_import_or_visibility(trimmed) {
            relevance += IMPORT_BONUS;
        }
        if relevance <= MIN_RELEVANCE {
            continue;
        }

        let matched_term = if phrase_hit {
            phrase.clone()
        } else {
            hits.join(", ")
        };
        scored.push((
            relevance,
            LineMatch {
                line_number: first_line + i,
                line_content: trimmed.to_string(),
                matched_term,
            },
        ));
    }

    if scored.is_empty() {
        return substring_matches(content, &tokens, first_line);
    }

    scored.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| a.1.line_number.cmp(&b.1.line_number))
    });
    scored
        .into_iter()
        .take(MAX_MATCHES)
        .map(|(_, m)| m)
        .collect()
}

/// Plain containment of any token, in file order.
fn substring_matches(content: &str, tokens: &[String], first_line: usize) -> Vec<LineMatch> {
    content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let lower = line.to_lowercase();
            tokens
                .iter()
                .find(|t| lower.contains(t.as_str()))
                .map(|t| LineMatch {
                    line_number: first_line + i,
                    line_content: line.trim().to_string(),
                    matched_term: t.clone(),
                })
        })
        .take(MAX_FALLBACK_MATCHES)
        .collect()
}

fn render_line(number: usize, line: &str, matched: bool) -> String {
    let marker = if matched { ">>>" } else { "   " };
    format!("{} {:>4}: {}", marker, number, line)
}

/// Excerpt of `content` around the matched lines, in file order, with line
/// numbers; separate windows are joined by `...`.
///
/// Falls back to [`preview`] when `matches` is empty.
pub fn focused_content(content: &str, query: &str, matches: &[LineMatch], first_line: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut marked: Vec<usize> = matches
        .iter()
        .filter_map(|m| m.line_number.checked_sub(first_line))
        .filter(|&i| i < lines.len())
        .collect();
    marked.sort_unstable();
    marked.dedup();

    if marked.is_empty() {
        return preview(content, query, first_line);
    }

    // Merge windows that overlap or touch.
    let mut windows: Vec<(usize, usize)> = Vec::new();
    for &i in &marked {
        let start = i.saturating_sub(LINES_BEFORE);
        let end = (i + LINES_AFTER).min(lines.len() - 1);
        match windows.last_mut() {
            Some(last) if start <= last.1 + 1 => last.1 = last.1.max(end),
            _ => windows.push((start, end)),
        }
    }

    let marked: HashSet<usize> = marked.into_iter().collect();
    windows
        .iter()
        .map(|&(start, end)| {
            (start..=end)
                .map(|i| render_line(first_line + i, lines[i], marked.contains(&i)))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n...\n")
}

/// Numbered excerpt starting near the first line that mentions a query
/// token, or the first lines of `content`.
pub fn preview(content: &str, query: &str, first_line: usize) -> String {
    let tokens = unique_tokens(query);
    let lines: Vec<&str> = content.lines().collect();
    let anchor = lines.iter().position(|line| {
        let lower = line.to_lowercase();
        tokens.iter().any(|t| lower.contains(t.as_str()))
    });

    let start = anchor.map(|i| i.saturating_sub(LINES_BEFORE)).unwrap_or(0);
    lines
        .iter()
        .enumerate()
        .skip(start)
        .take(PREVIEW_LINES)
        .map(|(i, line)| render_line(first_line + i, line, Some(i) == anchor))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLASK: &str = "from flask import Flask, request\n\
app = Flask(__name__)\n\
\n\
@app.route('/api/validate-sql', methods=['POST'])\n\
def validate_sql():\n\
    payload = request.get_json()\n\
    return check(payload['sql'])\n";

    #[test]
    fn test_decorator_ranks_first() {
        let matches = extract_line_matches(FLASK, "validate sql endpoint", 1);
        assert_eq!(matches[0].line_number, 4);
        assert!(matches[0].line_content.starts_with("@app.route"));
        assert_eq!(matches[0].matched_term, "validate, sql");
        assert!(matches.iter().any(|m| m.line_number == 5));
    }

    #[test]
    fn test_phrase_match_outranks_tokens() {
        let content = "sql helpers\nrun the validate sql step\n";
        let matches = extract_line_matches(content, "validate sql", 10);
        assert_eq!(matches[0].line_number, 11);
        assert_eq!(matches[0].matched_term, "validate sql");
    }

    #[test]
    fn test_matches_capped_at_eight() {
        let content: String = (0..20).map(|i| format!("order line {}\n", i)).collect();
        assert_eq!(extract_line_matches(&content, "order", 1).len(), 8);
    }

    #[test]
    fn test_unrelated_structure_not_matched() {
        let content = "def unrelated():\n    pass\n";
        assert!(extract_line_matches(content, "invoice totals", 1).is_empty());
    }

    #[test]
    fn test_focused_content_windows() {
        let content: String = (1..=20).map(|i| format!("line {}\n", i)).collect();
        let matches = vec![
            LineMatch {
                line_number: 5,
                line_content: "line 5".to_string(),
                matched_term: "x".to_string(),
            },
            LineMatch {
                line_number: 15,
                line_content: "line 15".to_string(),
                matched_term: "x".to_string(),
            },
        ];
        let focused = focused_content(&content, "x", &matches, 1);
        let expected = [
            "       3: line 3",
            "       4: line 4",
            ">>>    5: line 5",
            "       6: line 6",
            "...",
            "      13: line 13",
            "      14: line 14",
            ">>>   15: line 15",
            "      16: line 16",
        ]
        .join("\n");
        assert_eq!(focused, expected);
    }

    #[test]
    fn test_adjacent_windows_merge() {
        let content: String = (1..=10).map(|i| format!("line {}\n", i)).collect();
        let at = |n: usize| LineMatch {
            line_number: n,
            line_content: String::new(),
            matched_term: String::new(),
        };
        let focused = focused_content(&content, "x", &[at(3), at(6)], 1);
        assert!(!focused.contains("..."));
        assert_eq!(focused.lines().count(), 7);
    }

    #[test]
    fn test_preview_fallbacks() {
        let content: String = (1..=30).map(|i| format!("row {}\n", i)).collect();
        let head = preview(&content, "nothing here", 1);
        assert_eq!(head.lines().count(), 8);
        assert!(head.starts_with("       1: row 1"));

        let anchored = preview("a\nb\nc\nd\ntarget\ne\n", "target", 1);
        assert!(anchored.starts_with("       3: c"));
        assert!(anchored.contains(">>>    5: target"));
    }
}
