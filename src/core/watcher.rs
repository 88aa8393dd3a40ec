//! Live observation of a single directory.
//!
//! [DirectoryWatcher::watch] wraps the OS notification facility (through `notify`) and turns
//! raw notifications for direct children of the watched directory into [WatchEvent]s.
//! Every affected path is `lstat`'ed on the notification thread, so consumers receive
//! ready-made [PathEntry] snapshots and never touch the filesystem themselves.
//!
//! Lost notifications (queue overflow, backend errors) surface as a single
//! [WatchEvent::Resynced]: the consumer re-enumerates and diffs, it never resets blindly.

use crate::core::entry::PathEntry;
use crate::core::error::FsError;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use log::{debug, warn};
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_WATCH_ID: AtomicU64 = AtomicU64::new(1);

/// A change observed in the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    EntryAdded(PathEntry),
    EntryRemoved(OsString),
    EntryChanged(PathEntry),
    /// Notifications were lost; the directory must be re-enumerated and diffed.
    Resynced,
}

/// Creates watches. Stateless; every handle owns its own OS watch.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryWatcher;

impl DirectoryWatcher {
    pub fn new() -> Self {
        DirectoryWatcher
    }

    /// Starts watching `path` (non-recursively).
    ///
    /// Fails with [FsError::NotFound] or [FsError::PermissionDenied] when the directory
    /// cannot be observed.
    pub fn watch(&self, path: &Path) -> Result<WatchHandle, FsError> {
        let md = fs::metadata(path).map_err(|e| FsError::from_io(e, path))?;
        if !md.is_dir() {
            return Err(FsError::invalid(path, "not a directory"));
        }
        fs::read_dir(path).map_err(|e| FsError::from_io(e, path))?;

        let (tx, rx) = unbounded::<WatchEvent>();
        let dir = path.to_path_buf();
        let cb_dir = dir.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            translate(&cb_dir, res, &tx);
        })
        .map_err(|e| notify_error(e, path))?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| notify_error(e, path))?;

        let id = NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed);
        debug!("watch {id} established on {}", dir.display());

        Ok(WatchHandle {
            id,
            path: dir,
            inner: Mutex::new(Some(watcher)),
            events: rx,
        })
    }

    /// Releases the watch behind `handle`. Calling it more than once is harmless.
    pub fn unwatch(&self, handle: &WatchHandle) {
        handle.unwatch();
    }
}

/// A live watch. Events are buffered on an unbounded channel until drained.
pub struct WatchHandle {
    id: u64,
    path: PathBuf,
    inner: Mutex<Option<RecommendedWatcher>>,
    events: Receiver<WatchEvent>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}

impl WatchHandle {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn events(&self) -> &Receiver<WatchEvent> {
        &self.events
    }

    /// Next buffered event, if any.
    pub fn try_next(&self) -> Option<WatchEvent> {
        match self.events.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().map(|w| w.is_some()).unwrap_or(false)
    }

    /// Stops the OS watch. Idempotent.
    pub fn unwatch(&self) {
        let taken = match self.inner.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut watcher) = taken {
            // The directory may already be gone, in which case the OS dropped the watch.
            let _ = watcher.unwatch(&self.path);
            debug!("watch {} released", self.id);
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.unwatch();
    }
}

fn notify_error(err: notify::Error, path: &Path) -> FsError {
    match err.kind {
        notify::ErrorKind::PathNotFound => FsError::NotFound(path.to_path_buf()),
        notify::ErrorKind::Io(io) => FsError::from_io(io, path),
        other => FsError::Io {
            path: path.to_path_buf(),
            message: format!("{other:?}"),
        },
    }
}

/// Runs on the notification thread: turns one raw notification into watch events.
fn translate(dir: &Path, res: notify::Result<Event>, tx: &Sender<WatchEvent>) {
    let event = match res {
        Ok(ev) => ev,
        Err(e) => {
            warn!("watcher error on {}: {e}, requesting resync", dir.display());
            let _ = tx.send(WatchEvent::Resynced);
            return;
        }
    };

    if event.need_rescan() {
        debug!("notification queue overflow on {}", dir.display());
        let _ = tx.send(WatchEvent::Resynced);
        return;
    }

    let created = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any | EventKind::Other => false,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => false,
        EventKind::Access(_) => return,
    };

    for path in &event.paths {
        // The directory itself was removed or renamed away; the listing can no longer be
        // trusted and the consumer finds out when it re-enumerates.
        if path == dir {
            if !dir.is_dir() {
                debug!("{} is gone, requesting resync", dir.display());
                let _ = tx.send(WatchEvent::Resynced);
                return;
            }
            continue;
        }
        if path.parent() != Some(dir) {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        let out = match PathEntry::from_path(path) {
            Ok(entry) if created => WatchEvent::EntryAdded(entry),
            Ok(entry) => WatchEvent::EntryChanged(entry),
            Err(_) => WatchEvent::EntryRemoved(name.to_os_string()),
        };
        if tx.send(out).is_err() {
            return;
        }
    }
}
