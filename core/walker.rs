//! Lazy, depth-first directory traversal.
//!
//! Discovery runs on the calling thread through `walkdir`, sorted by file
//! name, with excluded directories pruned before descent. File reads and
//! classification are handed to a bounded worker pool; their results are
//! queued in discovery order, so the sequence yielded by [`TreeWalker`] is the
//! same no matter how fast individual reads finish.

use crate::classify::{Classification, FileClassifier};
use crate::error::{AppError, Result};
use crate::patterns::{IgnoreRuleSet, nested_sources};
use log;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use walkdir::{DirEntry, WalkDir};

/// How often a queued read is checked while it waits for a worker.
const START_POLL: Duration = Duration::from_millis(20);

const READ_RUNNING: u8 = 0;
const READ_ABANDONED: u8 = 1;
const READ_FINISHED: u8 = 2;

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub include_hidden: bool,
    /// Read through symlinked files. Symlinked directories are never descended.
    pub follow_symlinks: bool,
    /// Pick up `.gitignore`/`.ignore` files in subdirectories as nested scopes.
    pub nested_ignore_files: bool,
    /// Measured from the moment a worker starts the read.
    pub read_timeout: Duration,
    pub workers: usize,
    /// Absolute paths never visited (e.g. the output file being written).
    pub skip: Vec<PathBuf>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            include_hidden: true,
            follow_symlinks: false,
            nested_ignore_files: true,
            read_timeout: Duration::from_secs(10),
            workers: 4,
            skip: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Root-relative path with `/` separators.
    pub path: String,
    pub absolute_path: PathBuf,
    pub size_bytes: u64,
    pub classification: Classification,
    /// Full file content for text files; binaries are never loaded.
    pub content: Option<Vec<u8>>,
    pub ambiguous: bool,
}

#[derive(Debug)]
pub enum WalkEvent {
    File(FileEntry),
    /// Matched an ignore rule, or hidden while `include_hidden` is off.
    Excluded { path: String, is_dir: bool },
    Failed {
        path: String,
        is_dir: bool,
        error: AppError,
    },
}

impl WalkEvent {
    pub fn path(&self) -> &str {
        match self {
            WalkEvent::File(entry) => &entry.path,
            WalkEvent::Excluded { path, .. } | WalkEvent::Failed { path, .. } => path,
        }
    }
}

struct ReadOutcome {
    size: u64,
    classification: Classification,
    ambiguous: bool,
    content: Option<Vec<u8>>,
}

type ReadFn = fn(&Path, &FileClassifier) -> io::Result<ReadOutcome>;

enum ReadMessage {
    Started(Instant),
    Finished(io::Result<ReadOutcome>),
}

struct ReadJob {
    rel: String,
    abs: PathBuf,
    /// Runs on the pool rather than a dedicated thread.
    pooled: bool,
    state: Arc<AtomicU8>,
    rx: Receiver<ReadMessage>,
}

enum Slot {
    Ready(WalkEvent),
    Reading(ReadJob),
}

/// Finite, single-use sequence of [`WalkEvent`]s. Walking again means building a new one.
pub struct TreeWalker {
    root: PathBuf,
    options: WalkOptions,
    skip: HashSet<PathBuf>,
    classifier: Arc<FileClassifier>,
    read: ReadFn,
    pool: ThreadPool,
    /// Pool threads still blocked in a read that already timed out.
    stalled: Arc<AtomicUsize>,
    entries: walkdir::IntoIter,
    /// `scopes[d]` holds the rules for entries at depth `d + 1`.
    scopes: Vec<Arc<IgnoreRuleSet>>,
    pending: VecDeque<Slot>,
    discovery_done: bool,
    failed: bool,
}

pub fn walk(
    root: &Path,
    ruleset: &IgnoreRuleSet,
    options: WalkOptions,
    classifier: FileClassifier,
) -> Result<TreeWalker> {
    TreeWalker::new(root, ruleset, options, classifier)
}

impl TreeWalker {
    pub fn new(
        root: &Path,
        ruleset: &IgnoreRuleSet,
        options: WalkOptions,
        classifier: FileClassifier,
    ) -> Result<Self> {
        let metadata = fs::metadata(root).map_err(|e| AppError::FileRead {
            path: root.to_path_buf(),
            source: e,
        })?;
        if !metadata.is_dir() {
            return Err(AppError::InvalidArgument(format!(
                "Input path is not a directory: {}",
                root.display()
            )));
        }
        let workers = options.workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ctxpack-read-{i}"))
            .build()?;
        let skip = options
            .skip
            .iter()
            .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
            .collect();
        let entries = WalkDir::new(root)
            .min_depth(1)
            .follow_links(options.follow_symlinks)
            .sort_by_file_name()
            .into_iter();
        log::debug!(
            "Walker ready for {} ({} worker(s), read timeout {:?}, {} rule(s))",
            root.display(),
            workers,
            options.read_timeout,
            ruleset.rules().count()
        );
        Ok(Self {
            root: root.to_path_buf(),
            options,
            skip,
            classifier: Arc::new(classifier),
            read: read_and_classify,
            pool,
            stalled: Arc::new(AtomicUsize::new(0)),
            entries,
            scopes: vec![Arc::new(ruleset.clone())],
            pending: VecDeque::new(),
            discovery_done: false,
            failed: false,
        })
    }

    #[cfg(test)]
    fn with_reader(mut self, read: ReadFn) -> Self {
        self.read = read;
        self
    }

    fn window(&self) -> usize {
        self.options.workers.max(1)
    }

    /// Advances discovery by one entry.
    fn step(&mut self) -> Result<()> {
        let entry = match self.entries.next() {
            None => {
                self.discovery_done = true;
                return Ok(());
            }
            Some(Ok(entry)) => entry,
            Some(Err(err)) => {
                self.record_walk_error(err);
                return Ok(());
            }
        };
        let is_dir = entry.file_type().is_dir();
        if self.is_skipped(entry.path()) {
            log::trace!("Skipping output path: {}", entry.path().display());
            if is_dir {
                self.entries.skip_current_dir();
            }
            return Ok(());
        }
        if !self.admissible(&entry, is_dir) {
            return Ok(());
        }

        self.scopes.truncate(entry.depth());
        let Some(rules) = self.scopes.last().cloned() else {
            return Ok(());
        };
        let abs = entry.path().to_path_buf();
        let rel = abs
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(entry.file_name()));
        let rel_str = to_slash_path(&rel);

        let hidden =
            !self.options.include_hidden && entry.file_name().to_string_lossy().starts_with('.');
        if hidden || rules.matches_entry(&rel, is_dir) {
            log::trace!("Excluded: {} (dir: {}, hidden: {})", rel_str, is_dir, hidden);
            if is_dir {
                self.entries.skip_current_dir();
            }
            self.pending.push_back(Slot::Ready(WalkEvent::Excluded {
                path: rel_str,
                is_dir,
            }));
            return Ok(());
        }

        if is_dir {
            let scope = self.child_scope(&rel, &abs, rules)?;
            self.scopes.push(scope);
        } else {
            self.spawn_read(rel_str, abs);
        }
        Ok(())
    }

    /// Symlink and special-file policy. Returns false for entries that are silently passed over.
    fn admissible(&mut self, entry: &DirEntry, is_dir: bool) -> bool {
        if entry.path_is_symlink() {
            if !self.options.follow_symlinks {
                log::trace!("Not following symlink: {}", entry.path().display());
                return false;
            }
            if is_dir {
                log::debug!(
                    "Not descending into symlinked directory: {}",
                    entry.path().display()
                );
                self.entries.skip_current_dir();
                return false;
            }
        }
        if !is_dir && !entry.file_type().is_file() {
            log::trace!("Skipping special file: {}", entry.path().display());
            return false;
        }
        true
    }

    fn child_scope(
        &self,
        rel: &Path,
        abs: &Path,
        rules: Arc<IgnoreRuleSet>,
    ) -> Result<Arc<IgnoreRuleSet>> {
        if !self.options.nested_ignore_files {
            return Ok(rules);
        }
        let sources = nested_sources(abs);
        if sources.is_empty() {
            return Ok(rules);
        }
        log::debug!(
            "Applying {} nested ignore file(s) in {}",
            sources.len(),
            abs.display()
        );
        Ok(Arc::new(rules.with_scope(rel, &sources)?))
    }

    fn record_walk_error(&mut self, err: walkdir::Error) {
        let Some(path) = err.path().map(Path::to_path_buf) else {
            log::warn!("Walk error: {}", err);
            return;
        };
        let is_symlink = fs::symlink_metadata(&path).is_ok_and(|m| m.file_type().is_symlink());
        if is_symlink && !path.exists() {
            log::warn!("Dangling symlink {}: {}", path.display(), err);
            return;
        }
        let is_dir = path.is_dir();
        let rel = to_slash_path(path.strip_prefix(&self.root).unwrap_or(&path));
        log::warn!("Cannot read {}: {}", path.display(), err);
        self.pending.push_back(Slot::Ready(WalkEvent::Failed {
            path: rel,
            is_dir,
            error: AppError::FileRead {
                path,
                source: err.into(),
            },
        }));
    }

    fn spawn_read(&mut self, rel: String, abs: PathBuf) {
        let pooled = self.stalled.load(Ordering::SeqCst) < self.window();
        let (rx, state) = self.start_read(&abs, pooled);
        self.pending.push_back(Slot::Reading(ReadJob {
            rel,
            abs,
            pooled,
            state,
            rx,
        }));
    }

    /// Starts a read on the pool, or on a dedicated thread once every pool
    /// thread is stuck in a timed-out read.
    fn start_read(&self, abs: &Path, pooled: bool) -> (Receiver<ReadMessage>, Arc<AtomicU8>) {
        let (tx, rx) = mpsc::channel();
        let state = Arc::new(AtomicU8::new(READ_RUNNING));
        let task = {
            let path = abs.to_path_buf();
            let classifier = Arc::clone(&self.classifier);
            let read = self.read;
            let state = Arc::clone(&state);
            let stalled = pooled.then(|| Arc::clone(&self.stalled));
            move || {
                let _ = tx.send(ReadMessage::Started(Instant::now()));
                let result = read(&path, &classifier);
                if state.swap(READ_FINISHED, Ordering::SeqCst) == READ_ABANDONED {
                    if let Some(stalled) = stalled {
                        stalled.fetch_sub(1, Ordering::SeqCst);
                    }
                }
                let _ = tx.send(ReadMessage::Finished(result));
            }
        };
        if pooled {
            self.pool.spawn(task);
        } else if let Err(e) = thread::Builder::new()
            .name("ctxpack-read-extra".into())
            .spawn(task)
        {
            log::warn!("Could not start reader thread: {}", e);
        }
        (rx, state)
    }

    fn is_skipped(&self, abs: &Path) -> bool {
        !self.skip.is_empty() && self.skip.contains(abs)
    }

    fn resolve(&self, slot: Slot) -> WalkEvent {
        match slot {
            Slot::Ready(event) => event,
            Slot::Reading(job) => self.finish_read(job),
        }
    }

    fn finish_read(&self, job: ReadJob) -> WalkEvent {
        let ReadJob {
            rel,
            abs,
            mut pooled,
            mut state,
            mut rx,
        } = job;

        let started = loop {
            match rx.recv_timeout(START_POLL) {
                Ok(ReadMessage::Started(at)) => break at,
                Ok(ReadMessage::Finished(result)) => return read_event(rel, abs, result),
                Err(RecvTimeoutError::Timeout) => {
                    if pooled && self.stalled.load(Ordering::SeqCst) >= self.window() {
                        log::warn!("All readers are stuck, reading {} on its own thread", rel);
                        (rx, state) = self.start_read(&abs, false);
                        pooled = false;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return reader_lost(rel),
            }
        };

        let wait = (started + self.options.read_timeout).saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(ReadMessage::Finished(result)) => read_event(rel, abs, result),
            Ok(ReadMessage::Started(_)) | Err(RecvTimeoutError::Disconnected) => reader_lost(rel),
            Err(RecvTimeoutError::Timeout) => {
                let abandoned = state
                    .compare_exchange(
                        READ_RUNNING,
                        READ_ABANDONED,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok();
                if !abandoned {
                    // Finished right at the deadline; the result is on its way.
                    return match rx.recv() {
                        Ok(ReadMessage::Finished(result)) => read_event(rel, abs, result),
                        _ => reader_lost(rel),
                    };
                }
                if pooled {
                    self.stalled.fetch_add(1, Ordering::SeqCst);
                }
                log::warn!("Read timed out: {}", rel);
                WalkEvent::Failed {
                    path: rel,
                    is_dir: false,
                    error: AppError::ReadTimeout {
                        path: abs,
                        timeout: self.options.read_timeout,
                    },
                }
            }
        }
    }
}

fn read_event(rel: String, abs: PathBuf, result: io::Result<ReadOutcome>) -> WalkEvent {
    match result {
        Ok(outcome) => {
            if outcome.ambiguous {
                log::debug!("Binary detection ambiguous for {}, treated as text", rel);
            }
            WalkEvent::File(FileEntry {
                path: rel,
                absolute_path: abs,
                size_bytes: outcome.size,
                classification: outcome.classification,
                content: outcome.content,
                ambiguous: outcome.ambiguous,
            })
        }
        Err(e) => WalkEvent::Failed {
            path: rel,
            is_dir: false,
            error: AppError::FileRead {
                path: abs,
                source: e,
            },
        },
    }
}

fn reader_lost(rel: String) -> WalkEvent {
    log::warn!("Reader for {} stopped without a result", rel);
    WalkEvent::Failed {
        path: rel,
        is_dir: false,
        error: AppError::WorkerPool("reader stopped without a result".into()),
    }
}

impl Iterator for TreeWalker {
    type Item = Result<WalkEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let front_ready = matches!(self.pending.front(), Some(Slot::Ready(_)));
            let must_drain = !self.pending.is_empty()
                && (front_ready || self.pending.len() >= self.window() || self.discovery_done);
            if must_drain {
                let slot = self.pending.pop_front()?;
                return Some(Ok(self.resolve(slot)));
            }
            if self.discovery_done {
                return None;
            }
            if let Err(e) = self.step() {
                self.failed = true;
                self.pending.clear();
                return Some(Err(e));
            }
        }
    }
}

fn read_and_classify(path: &Path, classifier: &FileClassifier) -> io::Result<ReadOutcome> {
    let extension = path.extension().and_then(|e| e.to_str());
    if classifier.is_known_binary_extension(extension) {
        let size = fs::metadata(path)?.len();
        return Ok(ReadOutcome {
            size,
            classification: Classification::Binary,
            ambiguous: false,
            content: None,
        });
    }

    let mut file = File::open(path)?;
    let size_hint = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mut buf = Vec::with_capacity(size_hint.min(16 * 1024 * 1024) as usize);
    (&mut file)
        .take(classifier.sample_bytes() as u64)
        .read_to_end(&mut buf)?;
    let verdict = classifier.inspect(&buf, extension);
    if verdict.classification == Classification::Binary {
        return Ok(ReadOutcome {
            size: size_hint.max(buf.len() as u64),
            classification: Classification::Binary,
            ambiguous: false,
            content: None,
        });
    }
    file.read_to_end(&mut buf)?;
    Ok(ReadOutcome {
        size: buf.len() as u64,
        classification: Classification::Text,
        ambiguous: verdict.ambiguous,
        content: Some(buf),
    })
}

/// Root-relative path rendered with `/` separators on every platform.
pub fn to_slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
