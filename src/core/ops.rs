//! Background file operations: copy, move, delete, rename and directory creation.
//!
//! A [JobSpec] submitted to the [FileOperationEngine] becomes a [FileOperationJob] that runs on
//! the jobs pool. Items inside one job run strictly in submission order; separate jobs may run
//! side by side, bounded by the pool size. Progress and per-item results stream back over the
//! [JobHandle]; the finished job itself is handed over in the final [JobEvent::Finished], after
//! which the engine keeps no reference to it.
//!
//! Per-item failures never abort sibling items. Every job ends Succeeded, PartiallyFailed
//! (with itemized [ItemError]s), Cancelled or Failed.
//!
//! # Caution:
//! The mutating primitives go through [FsBackend]. Everything that changes the filesystem must
//! use it, otherwise injected failures in tests silently stop covering that path.

use crate::core::entry::PathEntry;
use crate::core::error::FsError;
use crate::core::worker::{CancelToken, WorkerPool};
use crate::utils::get_unused_path;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use log::{debug, info, warn};

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default copy chunk (256 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
/// Default minimum spacing between two progress events of one item.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationKind {
    Copy,
    Move,
    Delete,
    Rename,
    CreateDir,
}

impl OperationKind {
    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Copy => "copy",
            OperationKind::Move => "move",
            OperationKind::Delete => "delete",
            OperationKind::Rename => "rename",
            OperationKind::CreateDir => "mkdir",
        }
    }
}

/// What to do when the destination of an item already exists.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConflictPolicy {
    #[default]
    FailOnConflict,
    Skip,
    Overwrite,
    /// Keep both: the new item gets a `_1`, `_2`, ... suffix.
    KeepBoth,
}

impl ConflictPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_on_conflict" | "fail" => Some(ConflictPolicy::FailOnConflict),
            "skip" => Some(ConflictPolicy::Skip),
            "overwrite" => Some(ConflictPolicy::Overwrite),
            "keep_both" | "rename" => Some(ConflictPolicy::KeepBoth),
            _ => None,
        }
    }
}

/// A request for the engine. `destination` is the target directory for Copy/Move, the new
/// full path for Rename and CreateDir, and absent for Delete.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobSpec {
    pub kind: OperationKind,
    pub sources: Vec<PathBuf>,
    pub destination: Option<PathBuf>,
    /// `None` uses the engine's configured default.
    pub conflict: Option<ConflictPolicy>,
}

impl JobSpec {
    pub fn copy(sources: Vec<PathBuf>, dest_dir: impl Into<PathBuf>) -> Self {
        Self::with(OperationKind::Copy, sources, Some(dest_dir.into()))
    }

    pub fn move_to(sources: Vec<PathBuf>, dest_dir: impl Into<PathBuf>) -> Self {
        Self::with(OperationKind::Move, sources, Some(dest_dir.into()))
    }

    pub fn delete(paths: Vec<PathBuf>) -> Self {
        Self::with(OperationKind::Delete, paths, None)
    }

    pub fn rename(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self::with(OperationKind::Rename, vec![from.into()], Some(to.into()))
    }

    pub fn create_dir(path: impl Into<PathBuf>) -> Self {
        Self::with(OperationKind::CreateDir, Vec::new(), Some(path.into()))
    }

    pub fn with_conflict(mut self, policy: ConflictPolicy) -> Self {
        self.conflict = Some(policy);
        self
    }

    fn with(kind: OperationKind, sources: Vec<PathBuf>, destination: Option<PathBuf>) -> Self {
        JobSpec {
            kind,
            sources,
            destination,
            conflict: None,
        }
    }

    /// Structural checks that need no filesystem access.
    fn validate(&self) -> Result<(), FsError> {
        let here = || self.destination.clone().unwrap_or_default();
        match self.kind {
            OperationKind::Copy | OperationKind::Move => {
                if self.destination.is_none() {
                    return Err(FsError::invalid(&here(), "missing destination directory"));
                }
                if self.sources.is_empty() {
                    return Err(FsError::invalid(&here(), "nothing to transfer"));
                }
            }
            OperationKind::Delete => {
                if self.destination.is_some() {
                    return Err(FsError::invalid(&here(), "delete takes no destination"));
                }
                if self.sources.is_empty() {
                    return Err(FsError::invalid(&here(), "nothing to delete"));
                }
            }
            OperationKind::Rename => {
                if self.destination.is_none() || self.sources.len() != 1 {
                    return Err(FsError::invalid(
                        &here(),
                        "rename takes exactly one source and a new path",
                    ));
                }
            }
            OperationKind::CreateDir => {
                if self.destination.is_none() || !self.sources.is_empty() {
                    return Err(FsError::invalid(&here(), "mkdir takes only a new path"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    PartiallyFailed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Queued | JobState::Running)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ItemState {
    Pending,
    Running,
    Succeeded,
    Skipped,
    Failed,
    PartiallyFailed,
    Cancelled,
}

/// One source (or new path) inside a job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobItem {
    source: Option<PathBuf>,
    target: Option<PathBuf>,
    state: ItemState,
    bytes_done: u64,
    bytes_total: u64,
    /// Policy that was applied because the target already existed.
    conflict: Option<ConflictPolicy>,
}

impl JobItem {
    fn new(source: Option<PathBuf>, target: Option<PathBuf>) -> Self {
        JobItem {
            source,
            target,
            state: ItemState::Pending,
            bytes_done: 0,
            bytes_total: 0,
            conflict: None,
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn target(&self) -> Option<&Path> {
        self.target.as_deref()
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn progress(&self) -> (u64, u64) {
        (self.bytes_done, self.bytes_total)
    }

    pub fn conflict(&self) -> Option<ConflictPolicy> {
        self.conflict
    }
}

/// A failure attached to one item. `related` names the second path involved, e.g. the copy
/// that was left behind when a cross-device move could not remove its source.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ItemError {
    pub index: usize,
    pub path: PathBuf,
    pub related: Option<PathBuf>,
    pub error: FsError,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileOperationJob {
    id: JobId,
    kind: OperationKind,
    conflict: ConflictPolicy,
    state: JobState,
    items: Vec<JobItem>,
    errors: Vec<ItemError>,
    setup_error: Option<FsError>,
}

impl FileOperationJob {
    fn from_spec(id: JobId, spec: &JobSpec, conflict: ConflictPolicy) -> Self {
        let items = match spec.kind {
            OperationKind::Copy | OperationKind::Move => {
                let dest = spec.destination.clone().unwrap_or_default();
                spec.sources
                    .iter()
                    .map(|s| {
                        let target = s.file_name().map(|n| dest.join(n));
                        JobItem::new(Some(s.clone()), target)
                    })
                    .collect()
            }
            OperationKind::Delete => spec
                .sources
                .iter()
                .map(|s| JobItem::new(Some(s.clone()), None))
                .collect(),
            OperationKind::Rename => {
                vec![JobItem::new(spec.sources.first().cloned(), spec.destination.clone())]
            }
            OperationKind::CreateDir => vec![JobItem::new(None, spec.destination.clone())],
        };
        FileOperationJob {
            id,
            kind: spec.kind,
            conflict,
            state: JobState::Queued,
            items,
            errors: Vec::new(),
            setup_error: None,
        }
    }

    // Accessors

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.conflict
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn items(&self) -> &[JobItem] {
        &self.items
    }

    pub fn errors(&self) -> &[ItemError] {
        &self.errors
    }

    /// Set when the job failed before any item started.
    pub fn setup_error(&self) -> Option<&FsError> {
        self.setup_error.as_ref()
    }

    /// Errors of the item at `index`.
    pub fn errors_for(&self, index: usize) -> impl Iterator<Item = &ItemError> {
        self.errors.iter().filter(move |e| e.index == index)
    }

    /// Aggregate error for reporting, `None` when the job succeeded.
    pub fn summary_error(&self) -> Option<FsError> {
        match self.state {
            JobState::Succeeded | JobState::Queued | JobState::Running => None,
            JobState::Cancelled => Some(FsError::Cancelled),
            JobState::Failed => self
                .setup_error
                .clone()
                .or_else(|| self.errors.first().map(|e| e.error.clone())),
            JobState::PartiallyFailed => Some(FsError::PartiallyFailed {
                failed: self
                    .items
                    .iter()
                    .filter(|i| matches!(i.state, ItemState::Failed | ItemState::PartiallyFailed))
                    .count(),
                total: self.items.len(),
            }),
        }
    }

    fn settle(&mut self, cancelled: bool) {
        if cancelled {
            self.state = JobState::Cancelled;
            return;
        }
        let ok = self
            .items
            .iter()
            .filter(|i| matches!(i.state, ItemState::Succeeded | ItemState::Skipped))
            .count();
        let partial = self
            .items
            .iter()
            .filter(|i| i.state == ItemState::PartiallyFailed)
            .count();
        let failed = self
            .items
            .iter()
            .filter(|i| i.state == ItemState::Failed)
            .count();

        self.state = if failed == 0 && partial == 0 {
            JobState::Succeeded
        } else if ok == 0 && partial == 0 {
            JobState::Failed
        } else {
            JobState::PartiallyFailed
        };
    }
}

/// A filesystem change caused by a finished item, for listings to apply directly.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PathChange {
    Created(PathEntry),
    Removed(PathBuf),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobEvent {
    Queued {
        job: JobId,
    },
    Started {
        job: JobId,
    },
    Progress {
        job: JobId,
        index: usize,
        bytes_done: u64,
        bytes_total: u64,
    },
    ItemFinished {
        job: JobId,
        index: usize,
        state: ItemState,
        changes: Vec<PathChange>,
    },
    Finished(Box<FileOperationJob>),
}

/// Caller side of a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    events: Receiver<JobEvent>,
    cancel: CancelToken,
}

impl JobHandle {
    #[inline]
    pub fn id(&self) -> JobId {
        self.id
    }

    #[inline]
    pub fn events(&self) -> &Receiver<JobEvent> {
        &self.events
    }

    /// Requests cancellation. Finished items keep their results, unstarted ones are cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn try_next(&self) -> Option<JobEvent> {
        match self.events.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Collects events until the job finishes or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> (Vec<JobEvent>, Option<FileOperationJob>) {
        let deadline = Instant::now() + timeout;
        let mut seen = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(left) {
                Ok(JobEvent::Finished(job)) => return (seen, Some(*job)),
                Ok(ev) => seen.push(ev),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                    return (seen, None);
                }
            }
        }
    }
}

/// The mutating filesystem primitives used by jobs. [NativeFs] forwards to `std::fs`.
pub trait FsBackend: Send + Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn open_read(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, link)
        }
        #[cfg(not(unix))]
        {
            let _ = (target, link);
            Err(io::Error::other("symlinks are not supported here"))
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFs;

impl FsBackend for NativeFs {}

#[derive(Debug, Clone, Copy)]
pub struct JobSettings {
    pub chunk_size: usize,
    pub progress_interval: Duration,
    pub default_conflict: ConflictPolicy,
}

impl Default for JobSettings {
    fn default() -> Self {
        JobSettings {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            default_conflict: ConflictPolicy::FailOnConflict,
        }
    }
}

/// Accepts jobs and runs them on the jobs pool.
#[derive(Clone)]
pub struct FileOperationEngine {
    pool: Arc<WorkerPool>,
    backend: Arc<dyn FsBackend>,
    settings: JobSettings,
    next_id: Arc<AtomicU64>,
}

impl FileOperationEngine {
    pub fn new(pool: Arc<WorkerPool>, settings: JobSettings) -> Self {
        Self::with_backend(pool, settings, Arc::new(NativeFs))
    }

    pub fn with_backend(
        pool: Arc<WorkerPool>,
        settings: JobSettings,
        backend: Arc<dyn FsBackend>,
    ) -> Self {
        FileOperationEngine {
            pool,
            backend,
            settings,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    #[inline]
    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Queues `spec` and returns immediately. Invalid specs come back already Failed.
    pub fn submit(&self, spec: JobSpec) -> JobHandle {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = unbounded::<JobEvent>();
        let cancel = CancelToken::new();
        let conflict = spec.conflict.unwrap_or(self.settings.default_conflict);
        let mut job = FileOperationJob::from_spec(id, &spec, conflict);

        let _ = tx.send(JobEvent::Queued { job: id });

        if let Err(e) = spec.validate() {
            warn!("job {id} rejected: {e}");
            job.state = JobState::Failed;
            job.setup_error = Some(e);
            let _ = tx.send(JobEvent::Finished(Box::new(job)));
            return JobHandle {
                id,
                events: rx,
                cancel,
            };
        }

        let runner = JobRunner {
            backend: Arc::clone(&self.backend),
            settings: self.settings,
            cancel: cancel.clone(),
            tx,
            destination: spec.destination.clone(),
        };
        self.pool.execute(move || runner.run(job));

        JobHandle {
            id,
            events: rx,
            cancel,
        }
    }
}

/// Raised when the cancellation token trips in the middle of an item.
struct Interrupted;

/// Successes and failures inside one item's tree.
#[derive(Default, Clone, Copy)]
struct Tally {
    ok: usize,
    failed: usize,
}

impl Tally {
    fn add(&mut self, other: Tally) {
        self.ok += other.ok;
        self.failed += other.failed;
    }

    fn state(self) -> ItemState {
        match (self.ok, self.failed) {
            (_, 0) => ItemState::Succeeded,
            (0, _) => ItemState::Failed,
            _ => ItemState::PartiallyFailed,
        }
    }
}

/// Coalesces byte progress of one item into at most one event per interval.
struct Progress<'a> {
    tx: &'a Sender<JobEvent>,
    job: JobId,
    index: usize,
    interval: Duration,
    done: u64,
    total: u64,
    last_sent: Option<Instant>,
    sent_done: u64,
}

impl Progress<'_> {
    fn advance(&mut self, n: u64) {
        self.done += n;
        let due = self
            .last_sent
            .is_none_or(|t| t.elapsed() >= self.interval);
        if due {
            self.emit();
        }
    }

    fn finish(&mut self) {
        if self.total > 0 && self.sent_done != self.done {
            self.emit();
        }
    }

    fn emit(&mut self) {
        self.last_sent = Some(Instant::now());
        self.sent_done = self.done;
        let _ = self.tx.send(JobEvent::Progress {
            job: self.job,
            index: self.index,
            bytes_done: self.done,
            bytes_total: self.total,
        });
    }
}

/// Per-item working state handed through the recursive helpers.
struct ItemCtx<'a> {
    index: usize,
    errors: Vec<ItemError>,
    progress: Progress<'a>,
}

impl ItemCtx<'_> {
    fn fail(&mut self, path: &Path, related: Option<&Path>, error: FsError) {
        warn!("item {} failed on {}: {error}", self.index, path.display());
        self.errors.push(ItemError {
            index: self.index,
            path: path.to_path_buf(),
            related: related.map(Path::to_path_buf),
            error,
        });
    }
}

struct ItemResult {
    state: ItemState,
    changes: Vec<PathChange>,
    conflict: Option<ConflictPolicy>,
    target: Option<PathBuf>,
}

impl ItemResult {
    fn new(state: ItemState) -> Self {
        ItemResult {
            state,
            changes: Vec::new(),
            conflict: None,
            target: None,
        }
    }
}

/// Where an item ends up once the conflict policy has been applied.
enum Resolved {
    Clear(PathBuf),
    Replaced(PathBuf),
    Renamed(PathBuf),
    Skip,
    Refuse(FsError),
}

struct JobRunner {
    backend: Arc<dyn FsBackend>,
    settings: JobSettings,
    cancel: CancelToken,
    tx: Sender<JobEvent>,
    destination: Option<PathBuf>,
}

impl JobRunner {
    fn run(self, mut job: FileOperationJob) {
        let started = Instant::now();
        job.state = JobState::Running;
        let _ = self.tx.send(JobEvent::Started { job: job.id });
        info!(
            "job {} started: {} {} item(s)",
            job.id,
            job.kind.label(),
            job.items.len()
        );

        if let Err(e) = self.check_destination(&job) {
            warn!("job {} cannot start: {e}", job.id);
            job.state = JobState::Failed;
            job.setup_error = Some(e);
            let _ = self.tx.send(JobEvent::Finished(Box::new(job)));
            return;
        }

        let mut cancelled = false;
        for index in 0..job.items.len() {
            if cancelled || self.cancel.is_cancelled() {
                cancelled = true;
                job.items[index].state = ItemState::Cancelled;
                continue;
            }

            job.items[index].state = ItemState::Running;
            let item = job.items[index].clone();
            let mut ctx = ItemCtx {
                index,
                errors: Vec::new(),
                progress: Progress {
                    tx: &self.tx,
                    job: job.id,
                    index,
                    interval: self.settings.progress_interval,
                    done: 0,
                    total: 0,
                    last_sent: None,
                    sent_done: 0,
                },
            };

            let result = match job.kind {
                OperationKind::Copy => self.copy_item(&item, job.conflict, &mut ctx),
                OperationKind::Move | OperationKind::Rename => {
                    self.move_item(&item, job.conflict, &mut ctx)
                }
                OperationKind::Delete => self.delete_item(&item, &mut ctx),
                OperationKind::CreateDir => self.create_dir_item(&item, job.conflict, &mut ctx),
            };
            ctx.progress.finish();

            if result.state == ItemState::Cancelled {
                cancelled = true;
            }
            let slot = &mut job.items[index];
            slot.state = result.state;
            slot.bytes_done = ctx.progress.done;
            slot.bytes_total = ctx.progress.total;
            slot.conflict = result.conflict;
            if result.target.is_some() {
                slot.target = result.target;
            }
            job.errors.append(&mut ctx.errors);

            let _ = self.tx.send(JobEvent::ItemFinished {
                job: job.id,
                index,
                state: result.state,
                changes: result.changes,
            });
        }

        job.settle(cancelled);
        info!(
            "job {} finished {:?} in {:?} ({} error(s))",
            job.id,
            job.state,
            started.elapsed(),
            job.errors.len()
        );
        let _ = self.tx.send(JobEvent::Finished(Box::new(job)));
    }

    /// Copy/Move need an existing destination directory before anything runs.
    fn check_destination(&self, job: &FileOperationJob) -> Result<(), FsError> {
        if !matches!(job.kind, OperationKind::Copy | OperationKind::Move) {
            return Ok(());
        }
        let Some(dest) = self.destination.as_deref() else {
            return Ok(());
        };
        let md = fs::metadata(dest).map_err(|e| FsError::from_io(e, dest))?;
        if !md.is_dir() {
            return Err(FsError::invalid(dest, "destination is not a directory"));
        }
        Ok(())
    }

    fn resolve_target(&self, target: &Path, policy: ConflictPolicy, source: Option<&Path>) -> Resolved {
        if fs::symlink_metadata(target).is_err() {
            return Resolved::Clear(target.to_path_buf());
        }
        if let Some(src) = source
            && same_file(src, target)
        {
            return match policy {
                ConflictPolicy::KeepBoth => Resolved::Renamed(get_unused_path(target)),
                ConflictPolicy::Skip => Resolved::Skip,
                _ => Resolved::Refuse(FsError::invalid(target, "source and destination are the same")),
            };
        }
        match policy {
            ConflictPolicy::FailOnConflict => {
                Resolved::Refuse(FsError::AlreadyExists(target.to_path_buf()))
            }
            ConflictPolicy::Skip => Resolved::Skip,
            ConflictPolicy::KeepBoth => Resolved::Renamed(get_unused_path(target)),
            ConflictPolicy::Overwrite => match source {
                Some(src) if contains(target, src) => Resolved::Refuse(FsError::invalid(
                    target,
                    "destination contains the source",
                )),
                _ => Resolved::Replaced(target.to_path_buf()),
            },
        }
    }

    /// Applies the conflict policy. On `Ok` the returned path is free to be written, unless the
    /// policy is `Overwrite`: then it still holds the old entry, which must only be swapped out
    /// once the replacement is complete.
    fn prepare_target(
        &self,
        item: &JobItem,
        policy: ConflictPolicy,
        ctx: &mut ItemCtx<'_>,
    ) -> Result<(PathBuf, Option<ConflictPolicy>), ItemResult> {
        let Some(target) = item.target.as_deref() else {
            let src = item.source.clone().unwrap_or_default();
            ctx.fail(&src, None, FsError::invalid(&src, "source has no file name"));
            return Err(ItemResult::new(ItemState::Failed));
        };

        match self.resolve_target(target, policy, item.source.as_deref()) {
            Resolved::Clear(p) => Ok((p, None)),
            Resolved::Renamed(p) => Ok((p, Some(ConflictPolicy::KeepBoth))),
            Resolved::Skip => {
                debug!("item {} skipped, {} exists", ctx.index, target.display());
                let mut r = ItemResult::new(ItemState::Skipped);
                r.conflict = Some(ConflictPolicy::Skip);
                Err(r)
            }
            Resolved::Refuse(e) => {
                ctx.fail(target, item.source.as_deref(), e);
                let mut r = ItemResult::new(ItemState::Failed);
                r.conflict = Some(policy);
                Err(r)
            }
            Resolved::Replaced(p) => Ok((p, Some(ConflictPolicy::Overwrite))),
        }
    }

    fn copy_item(&self, item: &JobItem, policy: ConflictPolicy, ctx: &mut ItemCtx<'_>) -> ItemResult {
        let Some(src) = item.source.as_deref() else {
            return ItemResult::new(ItemState::Failed);
        };
        let src_md = match fs::symlink_metadata(src) {
            Ok(md) => md,
            Err(e) => {
                ctx.fail(src, None, FsError::from_io(e, src));
                return ItemResult::new(ItemState::Failed);
            }
        };
        if src_md.is_dir()
            && let Some(target) = item.target.as_deref()
            && is_inside(src, target)
        {
            ctx.fail(src, Some(target), FsError::invalid(target, "destination is inside the source"));
            return ItemResult::new(ItemState::Failed);
        }

        let (target, conflict) = match self.prepare_target(item, policy, ctx) {
            Ok(t) => t,
            Err(r) => return r,
        };

        let replace = conflict == Some(ConflictPolicy::Overwrite);
        ctx.progress.total = tree_size(src);
        let outcome = self.transfer(src, &target, replace, ctx);
        self.finish_transfer(outcome, target, conflict, ctx)
    }

    /// Copies `src` to `target`. When replacing, the copy is staged next to the target and only
    /// swapped in once complete, so any failure leaves the old target as it was.
    fn transfer(
        &self,
        src: &Path,
        target: &Path,
        replace: bool,
        ctx: &mut ItemCtx<'_>,
    ) -> Result<Tally, Interrupted> {
        if !replace {
            return self.copy_tree(src, target, ctx);
        }

        let staged = staging_path(target, "part");
        self.discard(&staged);
        match self.copy_tree(src, &staged, ctx) {
            Ok(tally) if tally.failed == 0 => match self.replace_with(&staged, target) {
                Ok(()) => Ok(tally),
                Err(e) => {
                    ctx.fail(target, Some(src), FsError::from_io(e, target));
                    self.discard(&staged);
                    Ok(Tally { ok: 0, failed: 1 })
                }
            },
            Ok(tally) => {
                debug!("item {} incomplete, keeping {}", ctx.index, target.display());
                self.discard(&staged);
                Ok(Tally {
                    ok: 0,
                    failed: tally.failed,
                })
            }
            Err(Interrupted) => {
                self.discard(&staged);
                Err(Interrupted)
            }
        }
    }

    /// Puts `replacement` in place of the existing `target`. The old entry is set aside first
    /// and restored if the swap fails.
    fn replace_with(&self, replacement: &Path, target: &Path) -> io::Result<()> {
        let aside = staging_path(target, "old");
        self.discard(&aside);
        self.backend.rename(target, &aside)?;
        if let Err(e) = self.backend.rename(replacement, target) {
            if let Err(undo) = self.backend.rename(&aside, target) {
                warn!(
                    "could not restore {} from {}: {undo}",
                    target.display(),
                    aside.display()
                );
            }
            return Err(e);
        }
        self.discard(&aside);
        Ok(())
    }

    fn finish_transfer(
        &self,
        outcome: Result<Tally, Interrupted>,
        target: PathBuf,
        conflict: Option<ConflictPolicy>,
        ctx: &mut ItemCtx<'_>,
    ) -> ItemResult {
        let mut result = match outcome {
            Ok(tally) => ItemResult::new(tally.state()),
            Err(Interrupted) => {
                // A replaced target was never touched; only a fresh one can be partial.
                if conflict != Some(ConflictPolicy::Overwrite) {
                    debug!("item {} cancelled, removing partial {}", ctx.index, target.display());
                    self.discard(&target);
                }
                ItemResult::new(ItemState::Cancelled)
            }
        };
        if result.state != ItemState::Cancelled
            && let Ok(entry) = PathEntry::from_path(&target)
        {
            result.changes.push(PathChange::Created(entry));
        }
        result.conflict = conflict;
        result.target = Some(target);
        result
    }

    fn move_item(&self, item: &JobItem, policy: ConflictPolicy, ctx: &mut ItemCtx<'_>) -> ItemResult {
        let Some(src) = item.source.as_deref() else {
            return ItemResult::new(ItemState::Failed);
        };
        let src_md = match fs::symlink_metadata(src) {
            Ok(md) => md,
            Err(e) => {
                ctx.fail(src, None, FsError::from_io(e, src));
                return ItemResult::new(ItemState::Failed);
            }
        };
        if src_md.is_dir()
            && let Some(target) = item.target.as_deref()
            && target != src
            && is_inside(src, target)
        {
            ctx.fail(src, Some(target), FsError::invalid(target, "destination is inside the source"));
            return ItemResult::new(ItemState::Failed);
        }

        let (target, conflict) = match self.prepare_target(item, policy, ctx) {
            Ok(t) => t,
            Err(r) => return r,
        };

        let replace = conflict == Some(ConflictPolicy::Overwrite);
        let renamed = if replace {
            self.replace_with(src, &target)
        } else {
            self.backend.rename(src, &target)
        };
        match renamed {
            Ok(()) => {
                let size = if src_md.is_dir() { 0 } else { src_md.len() };
                ctx.progress.total = size;
                ctx.progress.done = size;
                let mut result = ItemResult::new(ItemState::Succeeded);
                result.changes.push(PathChange::Removed(src.to_path_buf()));
                if let Ok(entry) = PathEntry::from_path(&target) {
                    result.changes.push(PathChange::Created(entry));
                }
                result.conflict = conflict;
                result.target = Some(target);
                result
            }
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                debug!("item {} crosses devices, copying {}", ctx.index, src.display());
                self.move_across_devices(src, target, conflict, ctx)
            }
            Err(e) => {
                ctx.fail(src, Some(&target), FsError::from_io(e, src));
                let mut r = ItemResult::new(ItemState::Failed);
                r.conflict = conflict;
                r
            }
        }
    }

    /// Copy, then delete the source. A failed delete leaves both copies on disk and is
    /// reported, never retried.
    fn move_across_devices(
        &self,
        src: &Path,
        target: PathBuf,
        conflict: Option<ConflictPolicy>,
        ctx: &mut ItemCtx<'_>,
    ) -> ItemResult {
        let replace = conflict == Some(ConflictPolicy::Overwrite);
        ctx.progress.total = tree_size(src);
        let copied = self.transfer(src, &target, replace, ctx);
        let copied_ok = matches!(copied, Ok(t) if t.failed == 0);
        let mut result = self.finish_transfer(copied, target.clone(), conflict, ctx);
        if !copied_ok {
            // Source untouched; whatever landed at the target is reported as created.
            return result;
        }

        let mut removal = ItemCtx {
            index: ctx.index,
            errors: Vec::new(),
            progress: Progress {
                tx: ctx.progress.tx,
                job: ctx.progress.job,
                index: ctx.index,
                interval: Duration::MAX,
                done: 0,
                total: 0,
                last_sent: Some(Instant::now()),
                sent_done: 0,
            },
        };
        match self.delete_tree(src, &mut removal) {
            Ok(t) if t.failed == 0 => {
                result.changes.insert(0, PathChange::Removed(src.to_path_buf()));
            }
            Ok(_) | Err(Interrupted) => {
                for mut err in removal.errors {
                    err.related = Some(target.clone());
                    ctx.errors.push(err);
                }
                if ctx.errors.is_empty() {
                    ctx.fail(src, Some(&target), FsError::Cancelled);
                }
                result.state = ItemState::PartiallyFailed;
            }
        }
        result
    }

    fn delete_item(&self, item: &JobItem, ctx: &mut ItemCtx<'_>) -> ItemResult {
        let Some(path) = item.source.as_deref() else {
            return ItemResult::new(ItemState::Failed);
        };
        if let Err(e) = fs::symlink_metadata(path) {
            ctx.fail(path, None, FsError::from_io(e, path));
            return ItemResult::new(ItemState::Failed);
        }

        ctx.progress.total = tree_size(path);
        match self.delete_tree(path, ctx) {
            Ok(tally) => {
                let mut result = ItemResult::new(tally.state());
                if tally.failed == 0 {
                    result.changes.push(PathChange::Removed(path.to_path_buf()));
                } else if let Ok(entry) = PathEntry::from_path(path) {
                    result.changes.push(PathChange::Created(entry));
                }
                result
            }
            Err(Interrupted) => {
                let mut result = ItemResult::new(ItemState::Cancelled);
                match PathEntry::from_path(path) {
                    Ok(entry) => result.changes.push(PathChange::Created(entry)),
                    Err(_) => result.changes.push(PathChange::Removed(path.to_path_buf())),
                }
                result
            }
        }
    }

    fn create_dir_item(
        &self,
        item: &JobItem,
        policy: ConflictPolicy,
        ctx: &mut ItemCtx<'_>,
    ) -> ItemResult {
        let Some(target) = item.target.as_deref() else {
            return ItemResult::new(ItemState::Failed);
        };

        let target = match fs::symlink_metadata(target) {
            Err(_) => target.to_path_buf(),
            Ok(md) => match policy {
                ConflictPolicy::Skip => {
                    let mut r = ItemResult::new(ItemState::Skipped);
                    r.conflict = Some(policy);
                    return r;
                }
                ConflictPolicy::Overwrite if md.is_dir() => {
                    let mut r = ItemResult::new(ItemState::Succeeded);
                    r.conflict = Some(policy);
                    return r;
                }
                ConflictPolicy::KeepBoth => get_unused_path(target),
                _ => {
                    ctx.fail(target, None, FsError::AlreadyExists(target.to_path_buf()));
                    let mut r = ItemResult::new(ItemState::Failed);
                    r.conflict = Some(policy);
                    return r;
                }
            },
        };

        match self.backend.create_dir(&target) {
            Ok(()) => {
                let mut result = ItemResult::new(ItemState::Succeeded);
                if let Ok(entry) = PathEntry::from_path(&target) {
                    result.changes.push(PathChange::Created(entry));
                }
                if item.target.as_deref() != Some(target.as_path()) {
                    result.conflict = Some(ConflictPolicy::KeepBoth);
                }
                result.target = Some(target);
                result
            }
            Err(e) => {
                ctx.fail(&target, None, FsError::from_io(e, &target));
                ItemResult::new(ItemState::Failed)
            }
        }
    }

    /// Recursively copies `src` to `dst`. Child failures are recorded and skipped.
    fn copy_tree(&self, src: &Path, dst: &Path, ctx: &mut ItemCtx<'_>) -> Result<Tally, Interrupted> {
        let md = match fs::symlink_metadata(src) {
            Ok(md) => md,
            Err(e) => {
                ctx.fail(src, Some(dst), FsError::from_io(e, src));
                return Ok(Tally { ok: 0, failed: 1 });
            }
        };
        let ft = md.file_type();

        if ft.is_symlink() {
            let res = fs::read_link(src).and_then(|t| self.backend.symlink(&t, dst));
            return Ok(match res {
                Ok(()) => Tally { ok: 1, failed: 0 },
                Err(e) => {
                    ctx.fail(src, Some(dst), FsError::from_io(e, dst));
                    Tally { ok: 0, failed: 1 }
                }
            });
        }

        if ft.is_dir() {
            if let Err(e) = self.backend.create_dir(dst) {
                ctx.fail(src, Some(dst), FsError::from_io(e, dst));
                return Ok(Tally { ok: 0, failed: 1 });
            }
            let mut tally = Tally { ok: 1, failed: 0 };
            let children = match sorted_children(src) {
                Ok(c) => c,
                Err(e) => {
                    ctx.fail(src, Some(dst), FsError::from_io(e, src));
                    tally.failed += 1;
                    return Ok(tally);
                }
            };
            for child in children {
                if self.cancel.is_cancelled() {
                    return Err(Interrupted);
                }
                let Some(name) = child.file_name() else {
                    continue;
                };
                tally.add(self.copy_tree(&child, &dst.join(name), ctx)?);
            }
            let _ = fs::set_permissions(dst, md.permissions());
            return Ok(tally);
        }

        if !ft.is_file() {
            ctx.fail(src, Some(dst), FsError::invalid(src, "cannot copy special files"));
            return Ok(Tally { ok: 0, failed: 1 });
        }

        match self.copy_file(src, dst, ctx) {
            Ok(()) => {
                let _ = fs::set_permissions(dst, md.permissions());
                Ok(Tally { ok: 1, failed: 0 })
            }
            Err(CopyError::Interrupted) => {
                let _ = self.backend.remove_file(dst);
                Err(Interrupted)
            }
            Err(CopyError::Io(e, path)) => {
                ctx.fail(src, Some(dst), FsError::from_io(e, &path));
                let _ = self.backend.remove_file(dst);
                Ok(Tally { ok: 0, failed: 1 })
            }
        }
    }

    fn copy_file(&self, src: &Path, dst: &Path, ctx: &mut ItemCtx<'_>) -> Result<(), CopyError> {
        let mut input = self
            .backend
            .open_read(src)
            .map_err(|e| CopyError::Io(e, src.to_path_buf()))?;
        let mut output = self
            .backend
            .create_file(dst)
            .map_err(|e| CopyError::Io(e, dst.to_path_buf()))?;

        let mut buf = vec![0u8; self.settings.chunk_size.max(4096)];
        loop {
            if self.cancel.is_cancelled() {
                return Err(CopyError::Interrupted);
            }
            let n = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CopyError::Io(e, src.to_path_buf())),
            };
            output
                .write_all(&buf[..n])
                .map_err(|e| CopyError::Io(e, dst.to_path_buf()))?;
            ctx.progress.advance(n as u64);
        }
        output
            .flush()
            .map_err(|e| CopyError::Io(e, dst.to_path_buf()))?;
        Ok(())
    }

    /// Depth-first removal: children first, and a directory is only removed once all of its
    /// children are gone. Only the failing paths themselves are recorded, not their parents.
    fn delete_tree(&self, path: &Path, ctx: &mut ItemCtx<'_>) -> Result<Tally, Interrupted> {
        let md = match fs::symlink_metadata(path) {
            Ok(md) => md,
            // Already gone, which is what we wanted.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Tally { ok: 1, failed: 0 }),
            Err(e) => {
                ctx.fail(path, None, FsError::from_io(e, path));
                return Ok(Tally { ok: 0, failed: 1 });
            }
        };

        if !md.is_dir() {
            return Ok(match self.backend.remove_file(path) {
                Ok(()) => {
                    ctx.progress.advance(md.len());
                    Tally { ok: 1, failed: 0 }
                }
                Err(e) => {
                    ctx.fail(path, None, FsError::from_io(e, path));
                    Tally { ok: 0, failed: 1 }
                }
            });
        }

        let children = match sorted_children(path) {
            Ok(c) => c,
            Err(e) => {
                ctx.fail(path, None, FsError::from_io(e, path));
                return Ok(Tally { ok: 0, failed: 1 });
            }
        };

        let mut tally = Tally::default();
        for child in children {
            if self.cancel.is_cancelled() {
                return Err(Interrupted);
            }
            tally.add(self.delete_tree(&child, ctx)?);
        }

        if tally.failed > 0 {
            debug!("keeping {}, {} child(ren) could not be removed", path.display(), tally.failed);
            return Ok(tally);
        }

        match self.backend.remove_dir(path) {
            Ok(()) => tally.ok += 1,
            Err(e) => {
                ctx.fail(path, None, FsError::from_io(e, path));
                tally.failed += 1;
            }
        }
        Ok(tally)
    }

    /// Best-effort cleanup of a partially written target.
    fn discard(&self, target: &Path) {
        let mut scratch = ItemCtx {
            index: usize::MAX,
            errors: Vec::new(),
            progress: Progress {
                tx: &self.tx,
                job: JobId(0),
                index: usize::MAX,
                interval: Duration::MAX,
                done: 0,
                total: 0,
                last_sent: Some(Instant::now()),
                sent_done: 0,
            },
        };
        // The token is already tripped; walk without it.
        let runner = JobRunner {
            backend: Arc::clone(&self.backend),
            settings: self.settings,
            cancel: CancelToken::new(),
            tx: self.tx.clone(),
            destination: None,
        };
        if let Ok(t) = runner.delete_tree(target, &mut scratch)
            && t.failed > 0
        {
            warn!("could not clean up {}", target.display());
        }
    }
}

enum CopyError {
    Interrupted,
    Io(io::Error, PathBuf),
}

fn sorted_children(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut children: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();
    children.sort();
    Ok(children)
}

/// Total bytes of regular files under `path`, symlinks not followed.
fn tree_size(path: &Path) -> u64 {
    let Ok(md) = fs::symlink_metadata(path) else {
        return 0;
    };
    if md.file_type().is_file() {
        return md.len();
    }
    if !md.is_dir() {
        return 0;
    }
    sorted_children(path)
        .map(|children| children.iter().map(|c| tree_size(c)).sum())
        .unwrap_or(0)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

/// A hidden sibling of `target` used while replacing it, e.g. `.report.pdf.fbrowse-part`.
fn staging_path(target: &Path, tag: &str) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(target.file_name().unwrap_or_default());
    name.push(".fbrowse-");
    name.push(tag);
    target.with_file_name(name)
}

/// The resolved location of `path` itself: parents canonicalized, the last component kept,
/// so a symlink names the link and not what it points to.
fn real_location(path: &Path) -> Option<PathBuf> {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            fs::canonicalize(parent).ok().map(|p| p.join(name))
        }
        _ => fs::canonicalize(path).ok(),
    }
}

/// True when `path` lives somewhere below `dir`.
fn contains(dir: &Path, path: &Path) -> bool {
    match (real_location(dir), real_location(path)) {
        (Some(dir), Some(path)) => path != dir && path.starts_with(&dir),
        _ => false,
    }
}

/// True when `target` would land inside the directory `src` (or is `src` itself).
fn is_inside(src: &Path, target: &Path) -> bool {
    let Ok(src) = fs::canonicalize(src) else {
        return false;
    };
    let parent = target.parent().unwrap_or_else(|| Path::new("/"));
    let Ok(parent) = fs::canonicalize(parent) else {
        return false;
    };
    parent.starts_with(&src)
}
