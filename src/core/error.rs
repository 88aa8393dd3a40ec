//! Error taxonomy shared by every engine component.
//!
//! [FsError] is attached to per-item records (file operations), per-path records (search),
//! and whole-request failures (listing, watching). It is `Clone` so a single failure can be
//! both logged and handed to the UI.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("'{0}' does not exist")]
    NotFound(PathBuf),

    #[error("permission denied: '{0}'")]
    PermissionDenied(PathBuf),

    #[error("I/O error on '{path}': {message}")]
    Io { path: PathBuf, message: String },

    #[error("'{0}' already exists")]
    AlreadyExists(PathBuf),

    #[error("'{path}' is {size} bytes, over the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("{failed} of {total} items failed")]
    PartiallyFailed { failed: usize, total: usize },

    #[error("invalid target '{path}': {reason}")]
    InvalidTarget { path: PathBuf, reason: String },
}

impl FsError {
    /// Maps an [io::Error] raised while touching `path` onto the taxonomy.
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path.to_path_buf()),
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_path_buf()),
            _ => FsError::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        }
    }

    pub fn invalid(path: &Path, reason: impl Into<String>) -> Self {
        FsError::InvalidTarget {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// The path the error is about, if it names one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            FsError::NotFound(p) | FsError::PermissionDenied(p) | FsError::AlreadyExists(p) => {
                Some(p)
            }
            FsError::Io { path, .. }
            | FsError::TooLarge { path, .. }
            | FsError::InvalidTarget { path, .. } => Some(path),
            FsError::Cancelled | FsError::PartiallyFailed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_onto_taxonomy() {
        let p = Path::new("/tmp/x");
        assert_eq!(
            FsError::from_io(io::Error::from(io::ErrorKind::NotFound), p),
            FsError::NotFound(p.to_path_buf())
        );
        assert_eq!(
            FsError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), p),
            FsError::PermissionDenied(p.to_path_buf())
        );
        assert_eq!(
            FsError::from_io(io::Error::from(io::ErrorKind::AlreadyExists), p),
            FsError::AlreadyExists(p.to_path_buf())
        );
        assert!(matches!(
            FsError::from_io(io::Error::other("disk on fire"), p),
            FsError::Io { .. }
        ));
    }

    #[test]
    fn path_accessor() {
        let p = Path::new("/a/b");
        assert_eq!(FsError::NotFound(p.into()).path(), Some(p));
        assert_eq!(FsError::Cancelled.path(), None);
    }
}
