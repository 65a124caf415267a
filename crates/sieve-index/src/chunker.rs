//! Splitting file content into embeddable chunks.
//!
//! Small files become a single chunk. Larger script-like files are cut into
//! line windows around structural anchors (decorators, `def`, `class`, main
//! guards); everything else goes through a fixed-size sliding window that
//! prefers to end on a line boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use sieve_config::IndexingConfig;
use tracing::{debug, warn};

use crate::classifier::{ChunkStrategy, ClassifiedFile};

/// Lines kept before an anchor.
const WINDOW_BEFORE: usize = 5;
/// Lines kept from the anchor onwards (exclusive end).
const WINDOW_AFTER: usize = 15;
/// Structure windows shorter than this after trimming are dropped.
const MIN_WINDOW_CHARS: usize = 50;

/// Substrings (lower-cased) that mark an HTTP route declaration.
pub(crate) const ROUTE_MARKERS: &[&str] = &[
    "@app.route",
    ".route(",
    "@router.",
    "@app.get",
    "@app.post",
    "@app.put",
    "@app.delete",
    "@app.patch",
    "mapping(",
    "@path(",
];

/// What a chunk mostly contains. Drives document-type boosts at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    RestApiEndpoint,
    Function,
    Class,
    EntryPoint,
    ProjectAnalysis,
    FrameworkDocumentation,
    Code,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RestApiEndpoint => "rest_api_endpoint",
            Self::Function => "function",
            Self::Class => "class",
            Self::EntryPoint => "entry_point",
            Self::ProjectAnalysis => "project_analysis",
            Self::FrameworkDocumentation => "framework_documentation",
            Self::Code => "code",
        }
    }

    /// Parse a stored tag. Unknown tags map to `Code`.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "rest_api_endpoint" | "restApiEndpoint" => Self::RestApiEndpoint,
            "function" => Self::Function,
            "class" => Self::Class,
            "entry_point" => Self::EntryPoint,
            "project_analysis" | "projectAnalysis" => Self::ProjectAnalysis,
            "framework_documentation" | "frameworkDocumentation" => {
                Self::FrameworkDocumentation
            }
            _ => Self::Code,
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A slice of a file ready for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_path: String,
    pub file_name: String,
    /// Extension without the dot
    pub file_type: String,
    pub priority_tier: u8,
    /// Size of the whole source file
    pub size_bytes: u64,
    /// Zero-based position within the file
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub namespace: String,
    /// Milliseconds since the Unix epoch
    pub indexed_at: u64,
    pub document_type: DocumentType,
    /// 1-based line in the source file where `text` starts
    pub start_line: usize,
    /// Bytes at the start of `text` repeated from the previous chunk
    pub overlap: usize,
}

/// A piece of content before file metadata is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub start_line: usize,
    pub overlap: usize,
    pub document_type: DocumentType,
}

/// File-level fields copied into every chunk.
#[derive(Debug, Clone)]
pub struct ChunkSource<'a> {
    pub file: &'a ClassifiedFile,
    pub size_bytes: u64,
    pub namespace: &'a str,
    pub indexed_at: u64,
}

/// Splits content according to the configured sizes.
#[derive(Debug, Clone)]
pub struct Chunker {
    single_chunk_limit: usize,
    chunk_size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(4000, 3000, 500)
    }
}

impl Chunker {
    /// `overlap` is clamped below `chunk_size / 2` so the window always advances.
    pub fn new(single_chunk_limit: usize, chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(2);
        let max_overlap = chunk_size / 2 - 1;
        if overlap > max_overlap {
            warn!(
                overlap,
                chunk_size,
                clamped = max_overlap,
                "Chunk overlap too large, clamping"
            );
        }
        Self {
            single_chunk_limit,
            chunk_size,
            overlap: overlap.min(max_overlap),
        }
    }

    pub fn from_config(config: &IndexingConfig) -> Self {
        Self::new(
            config.single_chunk_limit,
            config.chunk_size,
            config.chunk_overlap,
        )
    }

    /// Chunk a file's content, attaching its metadata.
    pub fn chunk(&self, content: &str, source: &ChunkSource<'_>) -> Vec<Chunk> {
        let segments = self.split(content, source.file.kind.strategy);
        let total = segments.len();

        debug!(
            path = %source.file.path.display(),
            chunks = total,
            "Chunked file"
        );

        segments
            .into_iter()
            .enumerate()
            .map(|(index, seg)| Chunk {
                text: seg.text,
                source_path: source.file.path.to_string_lossy().to_string(),
                file_name: source.file.file_name.clone(),
                file_type: source.file.extension.clone(),
                priority_tier: source.file.tier,
                size_bytes: source.size_bytes,
                chunk_index: index,
                total_chunks: total,
                namespace: source.namespace.to_string(),
                indexed_at: source.indexed_at,
                document_type: seg.document_type,
                start_line: seg.start_line,
                overlap: seg.overlap,
            })
            .collect()
    }

    /// Split content into segments without file metadata.
    pub fn split(&self, content: &str, strategy: ChunkStrategy) -> Vec<Segment> {
        if content.len() <= self.single_chunk_limit {
            return vec![Segment {
                text: content.to_string(),
                start_line: 1,
                overlap: 0,
                document_type: infer_document_type(content),
            }];
        }

        if strategy == ChunkStrategy::Sniff && looks_script_like(content) {
            let windows = structure_windows(content);
            if !windows.is_empty() {
                return windows;
            }
        }

        self.fixed_windows(content)
    }

    /// Sliding window of `chunk_size` bytes stepping back `overlap` bytes.
    pub fn fixed_windows(&self, content: &str) -> Vec<Segment> {
        let len = content.len();
        let mut segments = Vec::new();
        let mut start = 0usize;
        let mut prev_end = 0usize;

        while start < len {
            let mut end = floor_char_boundary(content, (start + self.chunk_size).min(len));
            if end <= start {
                end = ceil_char_boundary(content, start + 1);
            }

            if end < len {
                let half = start + self.chunk_size / 2;
                if let Some(nl) = content[start..end].rfind('\n') {
                    let cut = start + nl + 1;
                    if cut > half {
                        end = cut;
                    }
                }
            }

            let text = &content[start..end];
            segments.push(Segment {
                text: text.to_string(),
                start_line: 1 + content[..start].matches('\n').count(),
                overlap: prev_end.saturating_sub(start),
                document_type: infer_document_type(text),
            });

            if end >= len {
                break;
            }
            prev_end = end;
            let next = floor_char_boundary(content, end.saturating_sub(self.overlap));
            start = if next > start { next } else { end };
        }

        segments
    }
}

/// Heuristic: does the content read like a scripting-language source file?
pub fn looks_script_like(content: &str) -> bool {
    content.lines().any(|line| {
        let t = line.trim_start();
        t.starts_with('@')
            || t.starts_with("def ")
            || t.starts_with("async def ")
            || t.starts_with("class ")
            || t.starts_with("import ")
            || t.starts_with("from ")
            || is_main_guard(t)
    })
}

fn is_main_guard(trimmed: &str) -> bool {
    trimmed.starts_with("if __name__")
}

/// Classify a line as a structural anchor.
fn anchor_type(line: &str) -> Option<DocumentType> {
    let t = line.trim_start();
    if t.starts_with('@') {
        let lower = t.to_lowercase();
        if ROUTE_MARKERS.iter().any(|m| lower.contains(m)) {
            return Some(DocumentType::RestApiEndpoint);
        }
        return Some(DocumentType::Function);
    }
    if t.starts_with("def ") || t.starts_with("async def ") {
        return Some(DocumentType::Function);
    }
    if t.starts_with("class ") {
        return Some(DocumentType::Class);
    }
    if is_main_guard(t) {
        return Some(DocumentType::EntryPoint);
    }
    None
}

/// One window of lines per anchor. Overlapping windows are all kept.
fn structure_windows(content: &str) -> Vec<Segment> {
    let lines: Vec<&str> = content.lines().collect();
    let mut segments = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(doc_type) = anchor_type(line) else {
            continue;
        };

        let from = i.saturating_sub(WINDOW_BEFORE);
        let to = (i + WINDOW_AFTER).min(lines.len());
        let window = &lines[from..to];

        let text = window.join("\n");
        let trimmed = text.trim();
        if trimmed.len() < MIN_WINDOW_CHARS {
            continue;
        }

        let leading_blank = window.iter().take_while(|l| l.trim().is_empty()).count();
        segments.push(Segment {
            text: trimmed.to_string(),
            start_line: from + leading_blank + 1,
            overlap: 0,
            document_type: doc_type,
        });
    }

    segments
}

/// Tag unanchored content: route declarations anywhere make it an endpoint chunk.
pub fn infer_document_type(text: &str) -> DocumentType {
    let lower = text.to_lowercase();
    if ROUTE_MARKERS.iter().any(|m| lower.contains(m)) {
        DocumentType::RestApiEndpoint
    } else {
        DocumentType::Code
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
