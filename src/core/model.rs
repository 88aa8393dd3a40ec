//! The UI-facing view of one directory.
//!
//! [DirectoryModel] lives on the UI thread and never touches the filesystem itself:
//! enumeration runs on the listing pool, notifications arrive through the [WatchHandle], and file
//! operations run on the [FileOperationEngine]. The UI calls [DirectoryModel::process_pending]
//! from its loop; every change it applies is published as a [ModelEvent] on the model's channel,
//! with listing diffs in strictly increasing generation order.
//!
//! Loading a directory establishes the watch first and enumerates second. Notifications that
//! arrive while a snapshot is being taken (initial load, resync or refresh) are buffered and
//! replayed on top of the snapshot, so a change is never lost between the two.

use crate::core::entry::{PathEntry, read_entries};
use crate::core::error::FsError;
use crate::core::listing::{DirectoryListing, EntryFilter, ListingDiff, SortKey, SortSpec};
use crate::core::ops::{FileOperationEngine, JobEvent, JobHandle, JobId, JobSpec, PathChange};
use crate::core::watcher::{DirectoryWatcher, WatchEvent, WatchHandle};
use crate::core::worker::WorkerPool;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info, warn};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What the UI observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// A directory was loaded. `diff` builds the listing from an empty sequence.
    Loaded {
        request: u64,
        path: PathBuf,
        diff: Option<ListingDiff>,
    },
    LoadFailed {
        request: u64,
        path: PathBuf,
        error: FsError,
    },
    Diff(ListingDiff),
    /// A resync or refresh could not enumerate the directory. The listing is kept.
    RefreshFailed { path: PathBuf, error: FsError },
    Job(JobEvent),
}

/// Results coming back from the listing pool.
enum Inbox {
    Loaded {
        request: u64,
        path: PathBuf,
        result: Result<(Vec<PathEntry>, WatchHandle), FsError>,
    },
    Rescanned {
        request: u64,
        result: Result<Vec<PathEntry>, FsError>,
    },
}

pub struct DirectoryModel {
    io: Arc<WorkerPool>,
    ops: FileOperationEngine,
    watcher: DirectoryWatcher,

    listing: Option<DirectoryListing>,
    watch: Option<WatchHandle>,
    sort: SortSpec,
    filter: EntryFilter,

    next_request: u64,
    pending_load: Option<(u64, PathBuf)>,
    pending_rescan: Option<u64>,
    buffered: Vec<WatchEvent>,
    /// Paths changed by our own operations: listing generation and whether the path now exists.
    recent_ops: HashMap<PathBuf, (u64, bool)>,
    jobs: Vec<JobHandle>,

    inbox_tx: Sender<Inbox>,
    inbox_rx: Receiver<Inbox>,
    events_tx: Sender<ModelEvent>,
    events_rx: Receiver<ModelEvent>,
}

impl DirectoryModel {
    pub fn new(
        io: Arc<WorkerPool>,
        ops: FileOperationEngine,
        sort: SortSpec,
        filter: EntryFilter,
    ) -> Self {
        let (inbox_tx, inbox_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        DirectoryModel {
            io,
            ops,
            watcher: DirectoryWatcher::new(),
            listing: None,
            watch: None,
            sort,
            filter,
            next_request: 1,
            pending_load: None,
            pending_rescan: None,
            buffered: Vec::new(),
            recent_ops: HashMap::new(),
            jobs: Vec::new(),
            inbox_tx,
            inbox_rx,
            events_tx,
            events_rx,
        }
    }

    // Accessors

    #[inline]
    pub fn events(&self) -> &Receiver<ModelEvent> {
        &self.events_rx
    }

    #[inline]
    pub fn listing(&self) -> Option<&DirectoryListing> {
        self.listing.as_ref()
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.listing.as_ref().map(|l| l.path())
    }

    /// True while a directory load is in flight.
    #[inline]
    pub fn is_loading(&self) -> bool {
        self.pending_load.is_some()
    }

    pub fn loading_path(&self) -> Option<&Path> {
        self.pending_load.as_ref().map(|(_, p)| p.as_path())
    }

    #[inline]
    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    #[inline]
    pub fn filter(&self) -> &EntryFilter {
        &self.filter
    }

    pub fn active_jobs(&self) -> impl Iterator<Item = JobId> + '_ {
        self.jobs.iter().map(JobHandle::id)
    }

    /// Starts loading `path` and returns the request id matched by the resulting
    /// [ModelEvent::Loaded] or [ModelEvent::LoadFailed]. A newer request supersedes older ones.
    ///
    /// The current directory stays live until the new one is loaded.
    pub fn set_directory(&mut self, path: impl Into<PathBuf>) -> u64 {
        let path = path.into();
        let request = self.next_request();
        self.pending_load = Some((request, path.clone()));
        debug!("loading {} (request {request})", path.display());

        let watcher = self.watcher;
        let tx = self.inbox_tx.clone();
        self.io.execute(move || {
            let result = watcher
                .watch(&path)
                .and_then(|handle| read_entries(&path).map(|entries| (entries, handle)));
            let _ = tx.send(Inbox::Loaded {
                request,
                path,
                result,
            });
        });
        request
    }

    /// Re-enumerates the current directory and publishes the difference.
    pub fn refresh(&mut self) {
        self.start_rescan();
    }

    pub fn set_sort_key(&mut self, key: SortKey, descending: bool) {
        self.set_sort(SortSpec {
            key,
            descending,
            ..self.sort
        });
    }

    pub fn set_sort(&mut self, sort: SortSpec) {
        self.sort = sort;
        if let Some(diff) = self.listing.as_mut().and_then(|l| l.set_sort(sort)) {
            self.publish(ModelEvent::Diff(diff));
        }
    }

    pub fn set_filter(&mut self, filter: EntryFilter) {
        self.filter = filter.clone();
        if let Some(diff) = self.listing.as_mut().and_then(|l| l.set_filter(filter)) {
            self.publish(ModelEvent::Diff(diff));
        }
    }

    /// Hands `spec` to the operation engine. Its events are forwarded as [ModelEvent::Job] and
    /// finished items that touch the current directory update the listing directly.
    pub fn request_operation(&mut self, spec: JobSpec) -> JobId {
        let handle = self.ops.submit(spec);
        let id = handle.id();
        self.jobs.push(handle);
        id
    }

    pub fn cancel_operation(&self, id: JobId) -> bool {
        match self.jobs.iter().find(|j| j.id() == id) {
            Some(job) => {
                job.cancel();
                true
            }
            None => false,
        }
    }

    /// Applies everything that arrived since the last call. Returns the number of events
    /// published.
    pub fn process_pending(&mut self) -> usize {
        let before = self.events_tx.len();

        while let Ok(msg) = self.inbox_rx.try_recv() {
            match msg {
                Inbox::Loaded {
                    request,
                    path,
                    result,
                } => self.on_loaded(request, path, result),
                Inbox::Rescanned { request, result } => self.on_rescanned(request, result),
            }
        }

        let mut incoming = Vec::new();
        if let Some(watch) = &self.watch {
            while let Some(ev) = watch.try_next() {
                incoming.push(ev);
            }
        }
        for ev in incoming {
            self.apply_watch_event(ev);
        }

        self.drain_jobs();

        self.events_tx.len().saturating_sub(before)
    }

    fn next_request(&mut self) -> u64 {
        let id = self.next_request;
        self.next_request += 1;
        id
    }

    fn publish(&self, event: ModelEvent) {
        let _ = self.events_tx.send(event);
    }

    fn on_loaded(
        &mut self,
        request: u64,
        path: PathBuf,
        result: Result<(Vec<PathEntry>, WatchHandle), FsError>,
    ) {
        if self.pending_load.as_ref().map(|(r, _)| *r) != Some(request) {
            debug!("dropping stale load {request} of {}", path.display());
            return;
        }
        self.pending_load = None;

        match result {
            Ok((entries, handle)) => {
                info!("loaded {} ({} entries)", path.display(), entries.len());
                let mut listing = DirectoryListing::new(path.clone(), self.sort, self.filter.clone());
                let diff = listing.replace_all(entries);
                self.listing = Some(listing);
                // Replacing the handle releases the previous directory's watch.
                self.watch = Some(handle);
                self.pending_rescan = None;
                self.buffered.clear();
                self.recent_ops.clear();
                self.publish(ModelEvent::Loaded {
                    request,
                    path,
                    diff,
                });
            }
            Err(error) => {
                warn!("could not load {}: {error}", path.display());
                self.publish(ModelEvent::LoadFailed {
                    request,
                    path,
                    error,
                });
            }
        }
    }

    fn start_rescan(&mut self) {
        let Some(path) = self.listing.as_ref().map(|l| l.path().to_path_buf()) else {
            return;
        };
        let request = self.next_request();
        self.pending_rescan = Some(request);
        debug!("rescanning {} (request {request})", path.display());

        let tx = self.inbox_tx.clone();
        self.io.execute(move || {
            let result = read_entries(&path);
            let _ = tx.send(Inbox::Rescanned { request, result });
        });
    }

    fn on_rescanned(&mut self, request: u64, result: Result<Vec<PathEntry>, FsError>) {
        if self.pending_rescan != Some(request) {
            return;
        }
        self.pending_rescan = None;

        match result {
            Ok(entries) => {
                if let Some(diff) = self.listing.as_mut().and_then(|l| l.replace_all(entries)) {
                    self.publish(ModelEvent::Diff(diff));
                }
            }
            Err(error) => {
                let path = self.current_path().map(Path::to_path_buf).unwrap_or_default();
                warn!("rescan of {} failed: {error}", path.display());
                self.publish(ModelEvent::RefreshFailed { path, error });
            }
        }

        // A replayed Resynced starts a new rescan and re-buffers what follows it.
        for ev in std::mem::take(&mut self.buffered) {
            self.apply_watch_event(ev);
        }
    }

    fn apply_watch_event(&mut self, ev: WatchEvent) {
        if self.pending_rescan.is_some() {
            self.buffered.push(ev);
            return;
        }
        let Some(listing) = self.listing.as_mut() else {
            return;
        };

        let diff = match ev {
            WatchEvent::Resynced => {
                info!("resync requested for {}", listing.path().display());
                self.start_rescan();
                return;
            }
            WatchEvent::EntryAdded(entry) | WatchEvent::EntryChanged(entry) => {
                if echoes_own_op(&self.recent_ops, listing.generation(), entry.path(), true) {
                    return;
                }
                listing.upsert(entry)
            }
            WatchEvent::EntryRemoved(name) => {
                let path = listing.path().join(&name);
                if echoes_own_op(&self.recent_ops, listing.generation(), &path, false) {
                    return;
                }
                listing.remove(&name)
            }
        };
        if let Some(diff) = diff {
            self.publish(ModelEvent::Diff(diff));
            self.prune_recent_ops();
        }
    }

    fn drain_jobs(&mut self) {
        let mut finished = Vec::new();
        let mut forwarded = Vec::new();
        for (slot, job) in self.jobs.iter().enumerate() {
            while let Some(ev) = job.try_next() {
                if matches!(ev, JobEvent::Finished(_)) {
                    finished.push(slot);
                }
                forwarded.push(ev);
            }
        }

        for ev in forwarded {
            if let JobEvent::ItemFinished { changes, .. } = &ev {
                for change in changes {
                    self.apply_change(change);
                }
            }
            self.publish(ModelEvent::Job(ev));
        }

        for slot in finished.into_iter().rev() {
            self.jobs.remove(slot);
        }
    }

    fn apply_change(&mut self, change: &PathChange) {
        let Some(listing) = self.listing.as_mut() else {
            return;
        };
        let (path, exists) = match change {
            PathChange::Created(entry) => (entry.path(), true),
            PathChange::Removed(path) => (path.as_path(), false),
        };
        if path.parent() != Some(listing.path()) {
            return;
        }

        let diff = match change {
            PathChange::Created(entry) => listing.upsert(entry.clone()),
            PathChange::Removed(path) => match path.file_name() {
                Some(name) => listing.remove(name),
                None => None,
            },
        };
        self.recent_ops
            .insert(path.to_path_buf(), (listing.generation(), exists));
        self.prune_recent_ops();
        if let Some(diff) = diff {
            self.publish(ModelEvent::Diff(diff));
        }
    }

    /// Only entries from the current generation can still match an echo.
    fn prune_recent_ops(&mut self) {
        let Some(generation) = self.listing.as_ref().map(DirectoryListing::generation) else {
            return;
        };
        self.recent_ops.retain(|_, &mut (g, _)| g >= generation);
    }
}

/// A notification that repeats what one of our own operations already applied in the
/// current generation.
fn echoes_own_op(
    recent: &HashMap<PathBuf, (u64, bool)>,
    generation: u64,
    path: &Path,
    exists: bool,
) -> bool {
    matches!(recent.get(path), Some(&(g, e)) if g == generation && e == exists)
}
