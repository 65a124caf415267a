//! Two-phase background indexing of one root directory.
//!
//! The priority phase indexes entry points, controllers, services and
//! other high-signal files concurrently and flips the session to
//! search-ready. The bulk phase then walks the whole tree and indexes the
//! rest in fixed-size batches, each joined before the next starts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Context, Result};
use sieve_config::IndexingConfig;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::cache::ChangeCache;
use crate::chunker::{ChunkSource, Chunker};
use crate::classifier::{ClassifiedFile, FileClassifier};
use crate::error::BackendError;
use crate::manifest::PointManifest;
use crate::namespace::{name_for, EnsureOutcome, NamespaceManager};
use crate::sanitize::{is_indexable, sanitize};
use crate::status::{now_millis, IndexingMetrics, IndexingPhase, StatusSnapshot};
use crate::store::VectorStore;

/// Root-specific state, swapped as a whole when the root changes.
#[derive(Clone)]
struct Target {
    root: PathBuf,
    namespace: String,
    cache: Arc<ChangeCache>,
    points: Arc<Mutex<PointManifest>>,
    points_path: PathBuf,
}

impl Target {
    /// Load the change cache and point manifest for `root`. Returns the
    /// files the cache remembered that no longer exist.
    fn load(config: &IndexingConfig, root: PathBuf) -> (Self, Vec<PathBuf>) {
        let target = Self::unloaded(config, root);
        let namespace = &target.namespace;
        let deleted = match target.cache.load() {
            Ok(report) => {
                info!(
                    namespace = %namespace,
                    cached = report.valid,
                    modified = report.modified,
                    deleted = report.deleted.len(),
                    malformed = report.malformed,
                    "Change cache loaded"
                );
                report.deleted
            }
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Change cache unreadable, starting empty");
                Vec::new()
            }
        };

        let points = PointManifest::load_or_new(&target.points_path, namespace);
        *target.points.lock().unwrap_or_else(|e| e.into_inner()) = points;
        (target, deleted)
    }

    /// State paths for `root` with nothing read from disk yet.
    fn unloaded(config: &IndexingConfig, root: PathBuf) -> Self {
        let namespace = name_for(&root);
        let cache = ChangeCache::new(config.state_dir.join(format!("{}.cache", namespace)));
        let points_path = config
            .state_dir
            .join(format!("{}.points.json", namespace));
        Self {
            root,
            points: Arc::new(Mutex::new(PointManifest::new(namespace.as_str()))),
            namespace,
            cache: Arc::new(cache),
            points_path,
        }
    }

    fn save_points(&self) {
        let points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = points.save(&self.points_path) {
            warn!(path = %self.points_path.display(), error = %e, "Failed to save point manifest");
        }
    }
}

/// How a single file ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Indexed,
    Skipped,
    Rejected,
    Failed,
}

/// Background indexer for one root directory at a time.
///
/// Create it with [`open`](Self::open), wrap it in an [`Arc`] and call
/// [`start`](Self::start) (or await [`run`](Self::run) directly).
pub struct IndexingSession {
    config: IndexingConfig,
    namespaces: NamespaceManager,
    store: Arc<dyn VectorStore>,
    classifier: FileClassifier,
    chunker: Chunker,
    metrics: IndexingMetrics,
    target: RwLock<Target>,
    /// Files found deleted while loading the cache, purged on the next run
    pending_removals: Mutex<Vec<PathBuf>>,
    working_dir: Option<PathBuf>,
    generation: AtomicU64,
    paused: AtomicBool,
    stop_requested: AtomicBool,
    resumed: Notify,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl IndexingSession {
    /// Resolve `root`, derive its namespace and load persisted state.
    pub fn open(
        root: impl AsRef<Path>,
        config: IndexingConfig,
        namespaces: NamespaceManager,
    ) -> Result<Self> {
        let root = resolve_root(root.as_ref())?;
        let (target, deleted) = Target::load(&config, root);
        let (status_tx, _) = watch::channel(StatusSnapshot::default());

        Ok(Self {
            classifier: FileClassifier::new(config.respect_gitignore),
            chunker: Chunker::from_config(&config),
            store: Arc::clone(namespaces.store()),
            namespaces,
            config,
            metrics: IndexingMetrics::new(),
            target: RwLock::new(target),
            pending_removals: Mutex::new(deleted),
            working_dir: None,
            generation: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            resumed: Notify::new(),
            status_tx,
        })
    }

    /// Also scan `dir` (shallowly) for priority files.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn target(&self) -> Target {
        self.target.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn root(&self) -> PathBuf {
        self.target().root
    }

    pub fn namespace(&self) -> String {
        self.target().namespace
    }

    pub fn config(&self) -> &IndexingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn metrics(&self) -> &IndexingMetrics {
        &self.metrics
    }

    pub fn status(&self) -> StatusSnapshot {
        self.metrics.snapshot()
    }

    /// Receive a fresh snapshot after every file and phase change.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Files currently recorded as indexed in the change cache.
    pub fn indexed_file_count(&self) -> usize {
        self.target().cache.len()
    }

    /// Whether anything has ever been indexed for the current root.
    pub fn has_indexed_content(&self) -> bool {
        self.indexed_file_count() > 0 || self.status().indexed_files > 0
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.metrics.snapshot());
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.run().await })
    }

    /// Run both phases to completion, or until stopped or superseded.
    pub async fn run(self: Arc<Self>) {
        if !self.metrics.try_begin() {
            warn!(namespace = %self.namespace(), "Indexing already in progress");
            return;
        }
        let generation = self.generation.load(Ordering::Acquire);
        self.stop_requested.store(false, Ordering::Release);
        let target = self.target();
        self.publish();
        info!(root = %target.root.display(), namespace = %target.namespace, "Indexing started");

        match self.namespaces.ensure(&target.namespace).await {
            Ok((_, EnsureOutcome::Rebuilt { previous_dimensions })) => {
                info!(
                    namespace = %target.namespace,
                    previous_dimensions,
                    "Namespace rebuilt, forgetting cached files"
                );
                self.forget_all(&target);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(namespace = %target.namespace, error = %e, "Namespace unavailable");
            }
        }

        let pending = std::mem::take(
            &mut *self
                .pending_removals
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        self.purge(&target, &pending).await;

        // Priority phase
        let candidates = self.priority_candidates(&target);
        let priority_paths: HashSet<PathBuf> = candidates.iter().map(|f| f.path.clone()).collect();
        self.metrics.add_total(candidates.len());
        info!(files = candidates.len(), "Priority phase started");
        self.index_concurrently(&target, candidates, self.config.priority_concurrency)
            .await;
        target.save_points();

        if self.superseded(generation) {
            self.halt(generation);
            return;
        }
        self.metrics.set_phase(IndexingPhase::Bulk);
        self.publish();
        info!(
            indexed = self.metrics.snapshot().indexed_files,
            "Priority phase complete, search ready"
        );

        // Bulk phase
        if self.config.bulk_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.bulk_delay_ms)).await;
        }

        let report = self.classifier.scan(&target.root, None);
        self.metrics.record_unsupported(&report.unsupported);

        let vanished: Vec<PathBuf> = target
            .cache
            .paths()
            .into_iter()
            .filter(|p| !p.exists())
            .collect();
        self.purge(&target, &vanished).await;

        let remaining: Vec<ClassifiedFile> = report
            .files
            .into_iter()
            .filter(|f| !priority_paths.contains(&f.path) && target.cache.needs_reindexing(&f.path))
            .collect();
        self.metrics.add_total(remaining.len());
        self.publish();

        let batch_size = self.config.batch_size.max(1);
        let batches = remaining.len().div_ceil(batch_size);
        info!(files = remaining.len(), batches, "Bulk phase started");

        for (i, batch) in remaining.chunks(batch_size).enumerate() {
            self.wait_while_paused().await;
            if self.superseded(generation) {
                self.halt(generation);
                return;
            }
            self.index_concurrently(&target, batch.to_vec(), batch.len())
                .await;
            target.save_points();
            debug!(batch = i + 1, batches, "Batch complete");
        }

        if self.superseded(generation) {
            self.halt(generation);
            return;
        }
        self.metrics.set_phase(IndexingPhase::Complete);
        self.publish();

        let snapshot = self.metrics.snapshot();
        info!(
            indexed = snapshot.indexed_files,
            failed = snapshot.failed_files,
            skipped = snapshot.skipped_files,
            total = snapshot.total_files,
            elapsed_ms = snapshot.elapsed_ms,
            "Indexing complete"
        );
    }

    /// Wait until the priority phase is done.
    pub async fn wait_until_search_ready(&self) {
        let mut rx = self.status_tx.subscribe();
        let _ = rx.wait_for(|s| s.search_ready).await;
    }

    /// Hold the bulk phase before its next batch.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        info!(namespace = %self.namespace(), "Indexing paused");
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            info!(namespace = %self.namespace(), "Indexing resumed");
        }
        self.resumed.notify_waiters();
    }

    /// Stop after the batch in flight. Indexed files stay indexed.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.resume();
    }

    /// Forget every cached file, wipe the namespace and index from scratch.
    pub async fn restart(self: &Arc<Self>) -> Result<JoinHandle<()>, BackendError> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let target = self.target();
        self.metrics.reset();
        self.forget_all(&target);
        self.namespaces.clear_and_recreate(&target.namespace).await?;
        self.publish();
        info!(namespace = %target.namespace, "Indexing restarted");
        Ok(self.start())
    }

    /// Point the session at another root and start it from scratch: the
    /// new root's change cache and point manifest are cleared and its
    /// namespace is recreated empty. The previous root's state is left on
    /// disk. Call [`start`](Self::start) to index the new root.
    pub async fn switch_root(&self, root: impl AsRef<Path>) -> Result<String> {
        let root = resolve_root(root.as_ref())?;
        let target = Target::unloaded(&self.config, root);
        self.namespaces
            .clear_and_recreate(&target.namespace)
            .await
            .with_context(|| format!("Failed to prepare namespace {}", target.namespace))?;

        self.generation.fetch_add(1, Ordering::AcqRel);
        self.metrics.reset();
        self.forget_all(&target);

        let old = self.target();
        let namespace = target.namespace.clone();
        info!(
            from = %old.root.display(),
            to = %target.root.display(),
            namespace = %namespace,
            "Switched root"
        );
        *self.target.write().unwrap_or_else(|e| e.into_inner()) = target;
        self.pending_removals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.publish();
        Ok(namespace)
    }

    fn superseded(&self, generation: u64) -> bool {
        self.stop_requested.load(Ordering::Acquire)
            || self.generation.load(Ordering::Acquire) != generation
    }

    /// Leave a stopped run; a superseded one leaves the metrics to its successor.
    fn halt(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) == generation {
            self.metrics.set_phase(IndexingPhase::Idle);
            self.publish();
        }
        info!(namespace = %self.namespace(), "Indexing stopped");
    }

    async fn wait_while_paused(&self) {
        loop {
            let notified = self.resumed.notified();
            if !self.paused.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    fn forget_all(&self, target: &Target) {
        if let Err(e) = target.cache.clear() {
            warn!(namespace = %target.namespace, error = %e, "Failed to clear change cache");
        }
        target
            .points
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        target.save_points();
    }

    /// Supported files at or below the priority threshold that need indexing,
    /// from the root plus a shallow scan of the working directory.
    fn priority_candidates(&self, target: &Target) -> Vec<ClassifiedFile> {
        let mut files = self.classifier.scan(&target.root, None).files;

        if let Some(dir) = &self.working_dir {
            if self.config.cwd_scan_depth > 0 && dir != &target.root {
                let shallow = self
                    .classifier
                    .scan(dir, Some(self.config.cwd_scan_depth))
                    .files;
                files.extend(shallow);
            }
        }

        let mut seen = HashSet::new();
        let mut candidates: Vec<ClassifiedFile> = files
            .into_iter()
            .filter(|f| f.tier <= self.config.priority_threshold)
            .filter(|f| seen.insert(f.path.clone()))
            .filter(|f| target.cache.needs_reindexing(&f.path))
            .collect();
        candidates.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.path.cmp(&b.path)));
        candidates
    }

    /// Index `files` with at most `limit` in flight and wait for all of them.
    async fn index_concurrently(
        self: &Arc<Self>,
        target: &Target,
        files: Vec<ClassifiedFile>,
        limit: usize,
    ) {
        if files.is_empty() {
            return;
        }
        let permits = Arc::new(Semaphore::new(limit.max(1)));
        let mut tasks = JoinSet::new();

        for file in files {
            let session = Arc::clone(self);
            let target = target.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                session.index_file(&target, file).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Indexing task panicked");
                self.metrics.record_failed();
            }
        }
        self.publish();
    }

    async fn index_file(&self, target: &Target, file: ClassifiedFile) -> FileOutcome {
        let _task = self.metrics.task_started();
        let outcome = self.process_file(target, &file).await;
        match outcome {
            FileOutcome::Indexed => self.metrics.record_indexed(&file.extension),
            FileOutcome::Skipped => self.metrics.record_skipped(),
            FileOutcome::Rejected => self.metrics.record_rejected(&file.extension),
            FileOutcome::Failed => self.metrics.record_failed(),
        }
        self.publish();
        outcome
    }

    async fn process_file(&self, target: &Target, file: &ClassifiedFile) -> FileOutcome {
        let path = &file.path;

        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot stat file");
                return FileOutcome::Failed;
            }
        };
        if metadata.len() > self.config.max_file_size {
            debug!(path = %path.display(), size = metadata.len(), "Skipping large file");
            return FileOutcome::Skipped;
        }
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read file");
                return FileOutcome::Failed;
            }
        };
        let content = sanitize(&String::from_utf8_lossy(&bytes));
        if !is_indexable(&content) {
            debug!(path = %path.display(), "Skipping file without indexable content");
            return FileOutcome::Skipped;
        }

        let chunks = self.chunker.chunk(
            &content,
            &ChunkSource {
                file,
                size_bytes: metadata.len(),
                namespace: &target.namespace,
                indexed_at: now_millis(),
            },
        );

        match self.store.add(&target.namespace, &chunks).await {
            Ok(ids) => {
                if let Err(e) = target.cache.record_indexed(path, mtime) {
                    warn!(path = %path.display(), error = %e, "Failed to record indexed file");
                }
                let replaced = target
                    .points
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record(path.clone(), ids);
                if let Some(old) = replaced.filter(|ids| !ids.is_empty()) {
                    if let Err(e) = self.store.delete_points(&target.namespace, &old).await {
                        warn!(path = %path.display(), error = %e, "Failed to delete superseded points");
                    }
                }
                debug!(path = %path.display(), chunks = chunks.len(), "Indexed file");
                FileOutcome::Indexed
            }
            Err(e) if e.is_rejection() => {
                warn!(path = %path.display(), error = %e, "Embedding rejected, skipping file");
                FileOutcome::Rejected
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to index file");
                FileOutcome::Failed
            }
        }
    }

    /// Delete the points and cache entries of files that no longer exist.
    async fn purge(&self, target: &Target, paths: &[PathBuf]) {
        if paths.is_empty() {
            return;
        }
        let stale: Vec<String> = {
            let mut points = target.points.lock().unwrap_or_else(|e| e.into_inner());
            paths
                .iter()
                .filter_map(|p| points.remove_file(p))
                .flatten()
                .collect()
        };
        if !stale.is_empty() {
            if let Err(e) = self.store.delete_points(&target.namespace, &stale).await {
                warn!(namespace = %target.namespace, error = %e, "Failed to delete points of removed files");
            }
        }
        if let Err(e) = target.cache.remove_deleted(paths) {
            warn!(namespace = %target.namespace, error = %e, "Failed to compact change cache");
        }
        target.save_points();
        info!(files = paths.len(), points = stale.len(), "Purged deleted files");
    }
}

fn resolve_root(root: &Path) -> Result<PathBuf> {
    let resolved = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve root directory {}", root.display()))?;
    if !resolved.is_dir() {
        anyhow::bail!("Not a directory: {}", resolved.display());
    }
    Ok(resolved)
}
