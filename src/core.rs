//! Core runtime logic for fbrowse.
//!
//! This module contains the filesystem engine behind the UI:
//! - [entry]: immutable [PathEntry] snapshots and lazily derived [Metadata].
//! - [listing]: the sorted, filtered [DirectoryListing] and its minimal row diffs.
//! - [watcher]: live notifications for one directory.
//! - [model]: the UI-facing [DirectoryModel] tying listing, watcher and operations together.
//! - [search]: cancelable recursive name/content search.
//! - [ops]: background copy/move/delete/rename/mkdir jobs.
//! - [command]: shell commands for the console view.
//! - [worker]: the thread pools and cancellation token everything above runs on.
//! - [formatter]: display helpers for sizes, times and permissions.
//!
//! Most callers will import from this module directly rather than from the submodules.

pub mod command;
pub mod entry;
pub mod error;
pub mod formatter;
pub mod listing;
pub mod model;
pub mod ops;
pub mod search;
pub mod watcher;
pub mod worker;

pub use command::{CommandEvent, CommandHandle, CommandRunner, CommandState, StreamTag};
pub use entry::{
    EntryKind, FileCategory, Metadata, PathEntry, ThumbnailKey, classify, read_entries,
};
pub use error::FsError;
pub use formatter::{format_attributes, format_file_size, format_file_time, format_kind, format_row};
pub use listing::{
    DiffOp, DirectoryListing, EntryFilter, ListingDiff, SortKey, SortSpec, apply_ops, diff_rows,
};
pub use model::{DirectoryModel, ModelEvent};
pub use ops::{
    ConflictPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_PROGRESS_INTERVAL, FileOperationEngine,
    FileOperationJob, FsBackend, ItemError, ItemState, JobEvent, JobHandle, JobId, JobItem,
    JobSettings, JobSpec, JobState, NativeFs, OperationKind, PathChange,
};
pub use search::{
    DEFAULT_MAX_FILE_SIZE, NameMatch, SearchEngine, SearchEvent, SearchOptions, SearchQuery,
    SearchSession, SearchState, SkipReason,
};
pub use watcher::{DirectoryWatcher, WatchEvent, WatchHandle};
pub use worker::{CancelToken, WorkerPool};
