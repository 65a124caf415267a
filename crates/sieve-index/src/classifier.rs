//! File discovery and classification.
//!
//! Walks a root directory, keeps files whose extension appears in the
//! kind table, prunes build/VCS/editor directories and assigns each file a
//! priority tier from its name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::{debug, warn};

/// Directory names never descended into.
pub const EXCLUDED_DIRS: &[&str] = &[
    "target",
    ".git",
    "node_modules",
    ".idea",
    ".vscode",
    "build",
    "dist",
    "__pycache__",
    ".venv",
    "venv",
    ".gradle",
    ".mvn",
];

/// Tier assigned to files that match no name pattern.
pub const DEFAULT_TIER: u8 = 10;

/// How a file's content is split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Sniff the content; script-like files get structure-aware windows.
    Sniff,
    /// Always use the fixed-size sliding window.
    FixedSize,
}

/// Broad role of a file, used to weight lexical matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Controller,
    Service,
    Repository,
    Source,
    Config,
    Other,
}

impl FileRole {
    /// Multiplier applied to term occurrences found in a file of this role.
    pub fn lexical_weight(self) -> f64 {
        match self {
            FileRole::Controller => 3.0,
            FileRole::Service => 2.5,
            FileRole::Repository => 2.0,
            FileRole::Source => 1.5,
            FileRole::Config => 1.2,
            FileRole::Other => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Source,
    Config,
    Docs,
}

/// One row of the extension table.
#[derive(Debug, PartialEq, Eq)]
pub struct FileKind {
    pub extension: &'static str,
    pub language: &'static str,
    pub strategy: ChunkStrategy,
    family: Family,
}

impl FileKind {
    const fn source(extension: &'static str, language: &'static str) -> Self {
        Self {
            extension,
            language,
            strategy: ChunkStrategy::Sniff,
            family: Family::Source,
        }
    }

    const fn config(extension: &'static str, language: &'static str) -> Self {
        Self {
            extension,
            language,
            strategy: ChunkStrategy::FixedSize,
            family: Family::Config,
        }
    }

    const fn docs(extension: &'static str, language: &'static str) -> Self {
        Self {
            extension,
            language,
            strategy: ChunkStrategy::FixedSize,
            family: Family::Docs,
        }
    }

    /// Tier used when no filename pattern matches.
    fn base_tier(&self) -> u8 {
        match (self.family, self.extension) {
            (Family::Source, _) => 6,
            (Family::Config, "xml") => 7,
            (Family::Config, _) => 8,
            (Family::Docs, _) => 9,
        }
    }

    pub fn is_source(&self) -> bool {
        self.family == Family::Source
    }
}

/// Supported extensions and how each one is handled.
pub static FILE_KINDS: &[FileKind] = &[
    FileKind::source("py", "python"),
    FileKind::source("java", "java"),
    FileKind::source("kt", "kotlin"),
    FileKind::source("scala", "scala"),
    FileKind::source("js", "javascript"),
    FileKind::source("jsx", "javascript"),
    FileKind::source("ts", "typescript"),
    FileKind::source("tsx", "typescript"),
    FileKind::source("go", "go"),
    FileKind::source("rs", "rust"),
    FileKind::source("rb", "ruby"),
    FileKind::source("php", "php"),
    FileKind::source("cs", "csharp"),
    FileKind::source("c", "c"),
    FileKind::source("h", "c"),
    FileKind::source("cpp", "cpp"),
    FileKind::source("hpp", "cpp"),
    FileKind::source("swift", "swift"),
    FileKind::source("sh", "shell"),
    FileKind::source("sql", "sql"),
    FileKind::config("xml", "xml"),
    FileKind::config("properties", "properties"),
    FileKind::config("yml", "yaml"),
    FileKind::config("yaml", "yaml"),
    FileKind::config("toml", "toml"),
    FileKind::config("json", "json"),
    FileKind::config("gradle", "gradle"),
    FileKind::docs("md", "markdown"),
    FileKind::docs("rst", "restructuredtext"),
];

/// Filename substrings and the tier they map to, checked in order.
const TIER_PATTERNS: &[(&str, u8)] = &[
    ("controller", 1),
    ("routes", 1),
    ("router", 1),
    ("endpoint", 1),
    ("views", 1),
    ("app.py", 1),
    ("main.py", 1),
    ("server.", 1),
    ("service", 2),
    ("handler", 2),
    ("repository", 3),
    ("dao", 3),
    ("models", 3),
    ("config", 4),
    ("settings", 4),
    ("application", 5),
    ("main.", 5),
    ("index.", 5),
];

/// Patterns with a dot name a file and must start the name; the rest
/// match anywhere in it.
fn matches_pattern(lower_name: &str, pattern: &str) -> bool {
    if pattern.contains('.') {
        lower_name.starts_with(pattern)
    } else {
        lower_name.contains(pattern)
    }
}

/// Look up the kind for an extension (case-insensitive, without the dot).
pub fn kind_for_extension(extension: &str) -> Option<&'static FileKind> {
    let ext = extension.to_ascii_lowercase();
    FILE_KINDS.iter().find(|k| k.extension == ext)
}

/// Priority tier for a file name; lower is indexed earlier.
pub fn priority_tier(file_name: &str) -> u8 {
    let lower = file_name.to_ascii_lowercase();
    if let Some((_, tier)) = TIER_PATTERNS
        .iter()
        .find(|(pat, _)| matches_pattern(&lower, pat))
    {
        return *tier;
    }
    extension_of(Path::new(file_name))
        .and_then(|ext| kind_for_extension(&ext))
        .map(|k| k.base_tier())
        .unwrap_or(DEFAULT_TIER)
}

/// Role of a file for lexical weighting.
pub fn file_role(file_name: &str) -> FileRole {
    let lower = file_name.to_ascii_lowercase();
    if ["controller", "routes", "router", "views", "app.py"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return FileRole::Controller;
    }
    if lower.contains("service") {
        return FileRole::Service;
    }
    if lower.contains("repository") || lower.contains("dao") {
        return FileRole::Repository;
    }
    match extension_of(Path::new(file_name)).and_then(|ext| kind_for_extension(&ext)) {
        Some(kind) if kind.family == Family::Source => FileRole::Source,
        Some(kind) if kind.family == Family::Config => FileRole::Config,
        _ => FileRole::Other,
    }
}

/// Whether any component of `relative` is an excluded directory.
pub fn is_excluded(relative: &Path) -> bool {
    relative.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| EXCLUDED_DIRS.contains(&s))
            .unwrap_or(false)
    })
}

/// Lower-cased extension without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// A supported file with its classification.
#[derive(Debug, Clone)]
pub struct ClassifiedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub extension: String,
    pub tier: u8,
    pub kind: &'static FileKind,
}

impl ClassifiedFile {
    pub fn role(&self) -> FileRole {
        file_role(&self.file_name)
    }
}

/// Result of walking a directory.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Supported files, sorted by tier then path
    pub files: Vec<ClassifiedFile>,
    /// Count of files seen per unsupported extension
    pub unsupported: BTreeMap<String, usize>,
}

/// Walks directories and classifies files.
#[derive(Debug, Clone, Default)]
pub struct FileClassifier {
    respect_gitignore: bool,
}

impl FileClassifier {
    pub fn new(respect_gitignore: bool) -> Self {
        Self { respect_gitignore }
    }

    /// Classify a single path. Returns `None` for unsupported files.
    pub fn classify(&self, path: &Path) -> Option<ClassifiedFile> {
        let extension = extension_of(path)?;
        let kind = kind_for_extension(&extension)?;
        let file_name = path.file_name()?.to_string_lossy().to_string();
        Some(ClassifiedFile {
            path: path.to_path_buf(),
            tier: priority_tier(&file_name),
            file_name,
            extension,
            kind,
        })
    }

    /// Walk `root` (optionally bounded in depth) and classify every file.
    ///
    /// Directory errors are logged and yield whatever was collected so far.
    pub fn scan(&self, root: &Path, max_depth: Option<usize>) -> ScanReport {
        let mut report = ScanReport::default();

        if !root.is_dir() {
            warn!(root = %root.display(), "Cannot scan: not a directory");
            return report;
        }

        let walker = WalkBuilder::new(root)
            .hidden(false)
            .ignore(false)
            .parents(self.respect_gitignore)
            .git_ignore(self.respect_gitignore)
            .git_global(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .max_depth(max_depth)
            .filter_entry(|entry| entry.depth() == 0 || !is_excluded(Path::new(entry.file_name())))
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Error while walking directory");
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            match self.classify(path) {
                Some(file) => report.files.push(file),
                None => {
                    let ext = extension_of(path).unwrap_or_else(|| "(none)".to_string());
                    *report.unsupported.entry(ext).or_insert(0) += 1;
                }
            }
        }

        report
            .files
            .sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.path.cmp(&b.path)));

        debug!(
            root = %root.display(),
            files = report.files.len(),
            unsupported = report.unsupported.values().sum::<usize>(),
            "Scan complete"
        );
        report
    }

    /// Supported files under `root`.
    pub fn walk(&self, root: &Path) -> Vec<ClassifiedFile> {
        self.scan(root, None).files
    }
}
