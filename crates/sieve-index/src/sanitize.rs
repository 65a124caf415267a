//! Cleanup applied to file content before chunking and embedding.

/// Longest run of one repeated non-whitespace character that is kept.
const MAX_RUN: usize = 50;

/// Content shorter than this after sanitizing is not worth embedding.
pub const MIN_CONTENT_CHARS: usize = 20;

fn is_invisible(c: char) -> bool {
    matches!(c, '\u{feff}' | '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}')
}

/// Strip control and zero-width characters and shorten long repeated runs
/// (banner lines, minified padding) that tokenizers choke on.
pub fn sanitize(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut prev: Option<char> = None;
    let mut run = 0usize;

    for c in content.chars() {
        if (c.is_control() && !matches!(c, '\n' | '\r' | '\t')) || is_invisible(c) {
            continue;
        }
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if run > MAX_RUN && !c.is_whitespace() {
            continue;
        }
        out.push(c);
    }
    out
}

/// Whether sanitized content carries enough text to index.
pub fn is_indexable(sanitized: &str) -> bool {
    sanitized.trim().chars().count() >= MIN_CONTENT_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_control_and_invisible() {
        let input = "\u{feff}def a():\u{0}\n\treturn\u{200b} 1\r\n";
        assert_eq!(sanitize(input), "def a():\n\treturn 1\r\n");
    }

    #[test]
    fn test_truncates_long_runs() {
        let banner = "#".repeat(120);
        let out = sanitize(&format!("{}\ncode", banner));
        assert_eq!(out, format!("{}\ncode", "#".repeat(50)));
    }

    #[test]
    fn test_keeps_whitespace_runs() {
        let indent = " ".repeat(80);
        assert_eq!(sanitize(&format!("{}x", indent)), format!("{}x", indent));
    }

    #[test]
    fn test_is_indexable() {
        assert!(!is_indexable("   tiny   "));
        assert!(is_indexable("print('hello world, indexing')"));
    }
}
