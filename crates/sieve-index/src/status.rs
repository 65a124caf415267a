//! Indexing progress counters and the snapshot published to observers.
//!
//! Counters are plain atomics updated by concurrent per-file tasks; readers
//! take an immutable [`StatusSnapshot`] either by polling or through the
//! session's watch channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Lifecycle of one indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingPhase {
    Idle,
    Priority,
    Bulk,
    Complete,
}

impl IndexingPhase {
    fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Priority => 1,
            Self::Bulk => 2,
            Self::Complete => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Priority,
            2 => Self::Bulk,
            3 => Self::Complete,
            _ => Self::Idle,
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Per-extension tallies.
#[derive(Debug, Default)]
struct ExtensionCounters {
    processed: HashMap<String, usize>,
    skipped: HashMap<String, usize>,
    unsupported: BTreeMap<String, usize>,
}

#[derive(Clone, Copy)]
enum Tally {
    Processed,
    Skipped,
}

/// Shared mutable counters for one session.
#[derive(Debug, Default)]
pub struct IndexingMetrics {
    phase: AtomicU8,
    total_files: AtomicUsize,
    indexed_files: AtomicUsize,
    failed_files: AtomicUsize,
    skipped_files: AtomicUsize,
    active_tasks: AtomicUsize,
    peak_tasks: AtomicUsize,
    total_tasks: AtomicU64,
    started_at: AtomicU64,
    finished_at: AtomicU64,
    search_ready: AtomicBool,
    extensions: Mutex<ExtensionCounters>,
}

impl IndexingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> IndexingPhase {
        IndexingPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: IndexingPhase) {
        self.phase.store(phase.to_u8(), Ordering::Release);
        self.entered(phase);
    }

    /// Move to `Priority` unless a run already holds the session.
    /// Returns false when another run is in progress.
    pub(crate) fn try_begin(&self) -> bool {
        let mut current = self.phase.load(Ordering::Acquire);
        loop {
            if matches!(
                IndexingPhase::from_u8(current),
                IndexingPhase::Priority | IndexingPhase::Bulk
            ) {
                return false;
            }
            match self.phase.compare_exchange_weak(
                current,
                IndexingPhase::Priority.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.entered(IndexingPhase::Priority);
        true
    }

    fn entered(&self, phase: IndexingPhase) {
        match phase {
            IndexingPhase::Priority => {
                self.started_at.store(now_millis(), Ordering::Relaxed);
                self.finished_at.store(0, Ordering::Relaxed);
            }
            IndexingPhase::Bulk => self.search_ready.store(true, Ordering::Release),
            IndexingPhase::Complete => {
                self.search_ready.store(true, Ordering::Release);
                self.finished_at.store(now_millis(), Ordering::Relaxed);
            }
            IndexingPhase::Idle => {}
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.phase(), IndexingPhase::Priority | IndexingPhase::Bulk)
    }

    pub fn is_complete(&self) -> bool {
        self.phase() == IndexingPhase::Complete
    }

    /// True once the priority phase finished.
    pub fn is_search_ready(&self) -> bool {
        self.search_ready.load(Ordering::Acquire)
    }

    pub(crate) fn add_total(&self, n: usize) {
        self.total_files.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_indexed(&self, extension: &str) {
        self.indexed_files.fetch_add(1, Ordering::Relaxed);
        self.bump(Tally::Processed, extension);
    }

    pub(crate) fn record_failed(&self) {
        self.failed_files.fetch_add(1, Ordering::Relaxed);
    }

    /// Skipped without touching the per-extension tally (too large, empty).
    pub(crate) fn record_skipped(&self) {
        self.skipped_files.fetch_add(1, Ordering::Relaxed);
    }

    /// Skipped because the embedder rejected the content.
    pub(crate) fn record_rejected(&self, extension: &str) {
        self.skipped_files.fetch_add(1, Ordering::Relaxed);
        self.bump(Tally::Skipped, extension);
    }

    pub(crate) fn record_unsupported(&self, unsupported: &BTreeMap<String, usize>) {
        let mut counters = self.extensions.lock().unwrap_or_else(|e| e.into_inner());
        for (ext, count) in unsupported {
            *counters.unsupported.entry(ext.clone()).or_insert(0) += count;
        }
    }

    fn bump(&self, tally: Tally, ext: &str) {
        let mut counters = self.extensions.lock().unwrap_or_else(|e| e.into_inner());
        let map = match tally {
            Tally::Processed => &mut counters.processed,
            Tally::Skipped => &mut counters.skipped,
        };
        *map.entry(ext.to_string()).or_insert(0) += 1;
    }

    /// Mark a task as started; the returned guard marks it finished on drop.
    pub(crate) fn task_started(&self) -> TaskGuard<'_> {
        let active = self.active_tasks.fetch_add(1, Ordering::AcqRel) + 1;
        self.total_tasks.fetch_add(1, Ordering::Relaxed);

        let mut peak = self.peak_tasks.load(Ordering::Relaxed);
        while active > peak {
            match self.peak_tasks.compare_exchange_weak(
                peak,
                active,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => peak = observed,
            }
        }
        TaskGuard { metrics: self }
    }

    /// Zero every counter and return to `Idle`.
    pub(crate) fn reset(&self) {
        self.phase.store(IndexingPhase::Idle.to_u8(), Ordering::Release);
        self.total_files.store(0, Ordering::Relaxed);
        self.indexed_files.store(0, Ordering::Relaxed);
        self.failed_files.store(0, Ordering::Relaxed);
        self.skipped_files.store(0, Ordering::Relaxed);
        self.peak_tasks
            .store(self.active_tasks.load(Ordering::Relaxed), Ordering::Relaxed);
        self.total_tasks.store(0, Ordering::Relaxed);
        self.started_at.store(0, Ordering::Relaxed);
        self.finished_at.store(0, Ordering::Relaxed);
        self.search_ready.store(false, Ordering::Release);
        *self.extensions.lock().unwrap_or_else(|e| e.into_inner()) = ExtensionCounters::default();
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let total = self.total_files.load(Ordering::Relaxed);
        let indexed = self.indexed_files.load(Ordering::Relaxed);
        let failed = self.failed_files.load(Ordering::Relaxed);
        let skipped = self.skipped_files.load(Ordering::Relaxed);
        let started = self.started_at.load(Ordering::Relaxed);
        let finished = self.finished_at.load(Ordering::Relaxed);

        let elapsed_ms = match (started, finished) {
            (0, _) => 0,
            (s, 0) => now_millis().saturating_sub(s),
            (s, f) => f.saturating_sub(s),
        };
        let progress_percent = if total > 0 {
            (indexed as f64 * 100.0 / total as f64).min(100.0)
        } else {
            0.0
        };
        let files_per_second = if elapsed_ms > 0 {
            indexed as f64 * 1000.0 / elapsed_ms as f64
        } else {
            0.0
        };
        let done = indexed + failed + skipped;
        let estimated_remaining_ms = if done > 0 && total > done && finished == 0 {
            Some(elapsed_ms * (total - done) as u64 / done as u64)
        } else {
            None
        };

        let counters = self.extensions.lock().unwrap_or_else(|e| e.into_inner());
        StatusSnapshot {
            phase: self.phase(),
            indexed_files: indexed,
            total_files: total,
            failed_files: failed,
            skipped_files: skipped,
            progress_percent,
            in_progress: self.is_in_progress(),
            complete: self.is_complete(),
            search_ready: self.is_search_ready(),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            peak_tasks: self.peak_tasks.load(Ordering::Relaxed),
            total_tasks: self.total_tasks.load(Ordering::Relaxed),
            elapsed_ms,
            files_per_second,
            estimated_remaining_ms,
            processed_by_extension: counters.processed.clone().into_iter().collect(),
            skipped_by_extension: counters.skipped.clone().into_iter().collect(),
            unsupported_extensions: counters.unsupported.clone(),
        }
    }
}

/// Decrements the active-task gauge when dropped.
pub(crate) struct TaskGuard<'a> {
    metrics: &'a IndexingMetrics,
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.metrics.active_tasks.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Immutable view of indexing progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub phase: IndexingPhase,
    pub indexed_files: usize,
    pub total_files: usize,
    pub failed_files: usize,
    pub skipped_files: usize,
    pub progress_percent: f64,
    pub in_progress: bool,
    pub complete: bool,
    pub search_ready: bool,
    pub active_tasks: usize,
    pub peak_tasks: usize,
    pub total_tasks: u64,
    pub elapsed_ms: u64,
    pub files_per_second: f64,
    pub estimated_remaining_ms: Option<u64>,
    pub processed_by_extension: BTreeMap<String, usize>,
    pub skipped_by_extension: BTreeMap<String, usize>,
    pub unsupported_extensions: BTreeMap<String, usize>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        IndexingMetrics::new().snapshot()
    }
}
