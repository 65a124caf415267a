//! Change-detection cache.
//!
//! Tracks which files have been indexed and at which modification time.
//! Persisted as an append-only log, one line per successful index:
//!
//! ```text
//! INDEXED:/abs/path/to/file.py|1718031234567
//! ```
//!
//! Later lines for the same path supersede earlier ones. The log is only
//! rewritten wholesale (temp file + rename) during compaction at load time
//! and when deleted paths are removed.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::UNIX_EPOCH;

use thiserror::Error;
use tracing::{debug, info, warn};

const RECORD_TAG: &str = "INDEXED:";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Outcome of [`ChangeCache::load`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheLoadReport {
    /// Entries still matching the file on disk
    pub valid: usize,
    /// Entries dropped because the file changed since indexing
    pub modified: usize,
    /// Paths recorded in the log that no longer exist
    pub deleted: Vec<PathBuf>,
    /// Lines that could not be parsed
    pub malformed: usize,
}

/// Modification time of a file in milliseconds since the Unix epoch.
pub fn modified_millis(path: &Path) -> std::io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0))
}

/// Persisted path → modification-time map.
#[derive(Debug)]
pub struct ChangeCache {
    log_path: PathBuf,
    entries: RwLock<HashMap<PathBuf, u64>>,
    /// Serializes appends against compaction.
    writer: Mutex<()>,
}

impl ChangeCache {
    /// Create a cache backed by `log_path`. Nothing is read until [`load`](Self::load).
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            entries: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Read the log, revalidate every entry against the file system and
    /// rewrite a compacted log if anything was dropped.
    pub fn load(&self) -> Result<CacheLoadReport, CacheError> {
        let mut report = CacheLoadReport::default();

        let content = match fs::read_to_string(&self.log_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(log = %self.log_path.display(), "No change cache yet");
                self.write_entries().clear();
                return Ok(report);
            }
            Err(e) => return Err(CacheError::io(&self.log_path, e)),
        };

        let mut recorded: HashMap<PathBuf, u64> = HashMap::new();
        let mut lines = 0usize;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            lines += 1;
            match parse_record(line) {
                Some((path, mtime)) => {
                    recorded.insert(path, mtime);
                }
                None => report.malformed += 1,
            }
        }

        let mut valid = HashMap::with_capacity(recorded.len());
        for (path, cached) in recorded {
            match modified_millis(&path) {
                Ok(current) if current == cached => {
                    valid.insert(path, cached);
                }
                Ok(_) => report.modified += 1,
                Err(_) if !path.exists() => report.deleted.push(path),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot stat cached file");
                    report.modified += 1;
                }
            }
        }
        report.valid = valid.len();
        report.deleted.sort();

        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if lines != valid.len() {
            self.compact(&valid)?;
        }
        *self.write_entries() = valid;

        info!(
            log = %self.log_path.display(),
            valid = report.valid,
            modified = report.modified,
            deleted = report.deleted.len(),
            "Loaded change cache"
        );
        Ok(report)
    }

    /// True for unseen paths and for paths whose modification time changed.
    /// A stale entry is evicted.
    pub fn needs_reindexing(&self, path: &Path) -> bool {
        match modified_millis(path) {
            Ok(mtime) => self.needs_reindexing_at(path, mtime),
            Err(_) => {
                self.write_entries().remove(path);
                true
            }
        }
    }

    /// Same as [`needs_reindexing`](Self::needs_reindexing) with a known modification time.
    pub fn needs_reindexing_at(&self, path: &Path, mtime: u64) -> bool {
        let cached = self.read_entries().get(path).copied();
        match cached {
            Some(cached) if cached == mtime => false,
            Some(_) => {
                self.write_entries().remove(path);
                true
            }
            None => true,
        }
    }

    /// Record a successful index and append it to the log.
    pub fn record_indexed(&self, path: &Path, mtime: u64) -> Result<(), CacheError> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| CacheError::io(&self.log_path, e))?;
        writeln!(file, "{}", format_record(path, mtime))
            .map_err(|e| CacheError::io(&self.log_path, e))?;

        self.write_entries().insert(path.to_path_buf(), mtime);
        Ok(())
    }

    /// Drop every entry and delete the log.
    pub fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.write_entries().clear();
        match fs::remove_file(&self.log_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&self.log_path, e)),
        }
    }

    /// Forget the given paths and compact the log. Returns how many were present.
    pub fn remove_deleted(&self, paths: &[PathBuf]) -> Result<usize, CacheError> {
        if paths.is_empty() {
            return Ok(0);
        }
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = {
            let mut entries = self.write_entries();
            let before = entries.len();
            for path in paths {
                entries.remove(path);
            }
            if entries.len() == before {
                return Ok(0);
            }
            (entries.clone(), before - entries.len())
        };
        self.compact(&snapshot.0)?;
        Ok(snapshot.1)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.read_entries().contains_key(path)
    }

    pub fn cached_mtime(&self, path: &Path) -> Option<u64> {
        self.read_entries().get(path).copied()
    }

    /// Every cached path, in no particular order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.read_entries().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Rewrite the log from `entries`. Caller must hold `writer`.
    fn compact(&self, entries: &HashMap<PathBuf, u64>) -> Result<(), CacheError> {
        let mut sorted: Vec<_> = entries.iter().collect();
        sorted.sort();

        let mut body = String::new();
        for (path, mtime) in sorted {
            body.push_str(&format_record(path, *mtime));
            body.push('\n');
        }

        let tmp = self.log_path.with_extension("tmp");
        if let Some(parent) = tmp.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
            }
        }
        fs::write(&tmp, body).map_err(|e| CacheError::io(&tmp, e))?;
        fs::rename(&tmp, &self.log_path).map_err(|e| CacheError::io(&self.log_path, e))?;

        debug!(log = %self.log_path.display(), entries = entries.len(), "Compacted change cache");
        Ok(())
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, u64>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, u64>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn format_record(path: &Path, mtime: u64) -> String {
    format!("{}{}|{}", RECORD_TAG, path.display(), mtime)
}

fn parse_record(line: &str) -> Option<(PathBuf, u64)> {
    let rest = line.strip_prefix(RECORD_TAG)?;
    let (path, mtime) = rest.rsplit_once('|')?;
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    Some((PathBuf::from(path), mtime.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn touch(path: &Path, content: &str) -> u64 {
        fs::write(path, content).unwrap();
        modified_millis(path).unwrap()
    }

    /// Move a file's mtime forward so the change is visible at millisecond resolution.
    fn bump_mtime(path: &Path) {
        let later = SystemTime::now() + Duration::from_secs(5);
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(later).unwrap();
    }

    #[test]
    fn test_parse_record() {
        assert_eq!(
            parse_record("INDEXED:/a/b|c.py|123"),
            Some((PathBuf::from("/a/b|c.py"), 123))
        );
        assert_eq!(parse_record("INDEXED:/a.py|notanumber"), None);
        assert_eq!(parse_record("SOMETHING:/a.py|1"), None);
        assert_eq!(parse_record("INDEXED:|1"), None);
    }

    #[test]
    fn test_unseen_path_needs_reindexing() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.py");
        touch(&file, "x");
        let cache = ChangeCache::new(dir.path().join("cache.log"));
        assert!(cache.needs_reindexing(&file));
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.py");
        let mtime = touch(&file, "x");
        let log = dir.path().join("state/cache.log");

        let cache = ChangeCache::new(&log);
        cache.record_indexed(&file, mtime).unwrap();
        assert!(!cache.needs_reindexing(&file));

        let reloaded = ChangeCache::new(&log);
        let report = reloaded.load().unwrap();
        assert_eq!(report.valid, 1);
        assert!(reloaded.contains(&file));
        assert_eq!(reloaded.cached_mtime(&file), Some(mtime));
        assert!(!reloaded.needs_reindexing(&file));
    }

    #[test]
    fn test_modified_file_is_evicted() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.py");
        let mtime = touch(&file, "x");
        let cache = ChangeCache::new(dir.path().join("cache.log"));
        cache.record_indexed(&file, mtime).unwrap();

        bump_mtime(&file);
        assert!(cache.needs_reindexing(&file));
        assert!(!cache.contains(&file));
    }

    #[test]
    fn test_load_drops_modified_and_reports_deleted() {
        let dir = TempDir::new().unwrap();
        let kept = dir.path().join("kept.py");
        let changed = dir.path().join("changed.py");
        let gone = dir.path().join("gone.py");
        let log = dir.path().join("cache.log");

        let cache = ChangeCache::new(&log);
        cache.record_indexed(&kept, touch(&kept, "a")).unwrap();
        cache.record_indexed(&changed, touch(&changed, "b")).unwrap();
        cache.record_indexed(&gone, touch(&gone, "c")).unwrap();

        bump_mtime(&changed);
        fs::remove_file(&gone).unwrap();

        let reloaded = ChangeCache::new(&log);
        let report = reloaded.load().unwrap();
        assert_eq!(report.valid, 1);
        assert_eq!(report.modified, 1);
        assert_eq!(report.deleted, vec![gone.clone()]);
        assert!(reloaded.contains(&kept));
        assert!(!reloaded.contains(&changed));

        // Log was compacted down to the surviving entry
        let body = fs::read_to_string(&log).unwrap();
        assert_eq!(body.lines().count(), 1);
        assert!(body.starts_with("INDEXED:"));
    }

    #[test]
    fn test_later_records_supersede_earlier() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.py");
        let mtime = touch(&file, "x");
        let log = dir.path().join("cache.log");
        fs::write(
            &log,
            format!(
                "{}\n{}\n",
                format_record(&file, mtime.saturating_sub(1000)),
                format_record(&file, mtime)
            ),
        )
        .unwrap();

        let cache = ChangeCache::new(&log);
        let report = cache.load().unwrap();
        assert_eq!(report.valid, 1);
        assert_eq!(fs::read_to_string(&log).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_clear_removes_log() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.py");
        let log = dir.path().join("cache.log");
        let cache = ChangeCache::new(&log);
        cache.record_indexed(&file, touch(&file, "x")).unwrap();
        assert!(log.exists());

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert!(!log.exists());
        // Clearing twice is fine
        cache.clear().unwrap();
    }

    #[test]
    fn test_remove_deleted() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.py");
        let b = dir.path().join("b.py");
        let log = dir.path().join("cache.log");
        let cache = ChangeCache::new(&log);
        cache.record_indexed(&a, touch(&a, "a")).unwrap();
        cache.record_indexed(&b, touch(&b, "b")).unwrap();

        let removed = cache.remove_deleted(&[a.clone(), dir.path().join("other.py")]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(!fs::read_to_string(&log).unwrap().contains("a.py"));
    }
}
