//! Directory entries and their metadata.
//!
//! [PathEntry] is the immutable snapshot every other component passes around: listings,
//! watcher events, search matches and file-operation results all carry it. When a file
//! changes a new snapshot replaces the old one, entries are never mutated in place.
//!
//! [Metadata] extends a [PathEntry] with the derived fields a details view wants:
//! a [FileCategory] and MIME type from the extension table, an optional [ThumbnailKey]
//! into the external thumbnail cache, and the symlink target resolved on first access.

use crate::core::error::FsError;

use once_cell::sync::OnceCell;
use phf::phf_map;

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// What kind of filesystem object an entry is. Symlinks are reported as symlinks,
/// never as their target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Special,
}

/// A snapshot of one directory entry, taken with `lstat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    path: PathBuf,
    name: OsString,
    kind: EntryKind,
    size: u64,
    modified: Option<SystemTime>,
    mode: u32,
    uid: u32,
    gid: u32,
    target_is_dir: bool,
}

impl PathEntry {
    /// Takes a snapshot of `path` without following a final symlink.
    pub fn from_path(path: &Path) -> Result<Self, FsError> {
        let md = fs::symlink_metadata(path).map_err(|e| FsError::from_io(e, path))?;
        let name = path
            .file_name()
            .map(OsStr::to_os_string)
            .unwrap_or_else(|| path.as_os_str().to_os_string());
        Ok(Self::from_metadata(path.to_path_buf(), name, &md))
    }

    pub(crate) fn from_metadata(path: PathBuf, name: OsString, md: &fs::Metadata) -> Self {
        let ft = md.file_type();
        let kind = if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_dir() {
            EntryKind::Directory
        } else if ft.is_file() {
            EntryKind::File
        } else {
            EntryKind::Special
        };

        let target_is_dir = match kind {
            EntryKind::Directory => true,
            EntryKind::Symlink => fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false),
            _ => false,
        };

        #[cfg(unix)]
        let (mode, uid, gid) = {
            use std::os::unix::fs::MetadataExt;
            (md.mode(), md.uid(), md.gid())
        };
        #[cfg(not(unix))]
        let (mode, uid, gid) = (if md.permissions().readonly() { 0o444 } else { 0o644 }, 0, 0);

        PathEntry {
            path,
            name,
            kind,
            size: md.len(),
            modified: md.modified().ok(),
            mode,
            uid,
            gid,
            target_is_dir,
        }
    }

    // Accessors

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    #[inline]
    pub fn name_str(&self) -> std::borrow::Cow<'_, str> {
        self.name.to_string_lossy()
    }

    #[inline]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Raw permission bits (`st_mode` on unix).
    #[inline]
    pub fn mode(&self) -> u32 {
        self.mode
    }

    #[inline]
    pub fn uid(&self) -> u32 {
        self.uid
    }

    #[inline]
    pub fn gid(&self) -> u32 {
        self.gid
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    /// True for directories and for symlinks that resolve to a directory.
    #[inline]
    pub fn leads_to_dir(&self) -> bool {
        self.target_is_dir
    }

    /// Dotfiles are hidden.
    pub fn is_hidden(&self) -> bool {
        self.name_str().starts_with('.')
    }
}

/// Enumerates `dir`, returning one snapshot per entry in directory order.
///
/// Entries that vanish between `readdir` and `lstat` are skipped: the filesystem is
/// shared and may change under us at any time.
pub fn read_entries(dir: &Path) -> Result<Vec<PathEntry>, FsError> {
    let mut entries = Vec::with_capacity(256);

    for entry in fs::read_dir(dir).map_err(|e| FsError::from_io(e, dir))? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let md = match entry.metadata() {
            Ok(md) => md,
            Err(_) => continue,
        };
        entries.push(PathEntry::from_metadata(
            entry.path(),
            entry.file_name(),
            &md,
        ));
    }
    Ok(entries)
}

/// Coarse classification used to choose icons and viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    Directory,
    Text,
    Image,
    Audio,
    Video,
    Archive,
    Document,
    Package,
    Executable,
    Other,
}

/// Extension to (MIME type, category).
static EXT_TYPE_MAP: phf::Map<&'static str, (&'static str, FileCategory)> = phf_map! {
    "txt" => ("text/plain", FileCategory::Text),
    "log" => ("text/plain", FileCategory::Text),
    "md" => ("text/markdown", FileCategory::Text),
    "csv" => ("text/csv", FileCategory::Text),
    "html" => ("text/html", FileCategory::Text),
    "htm" => ("text/html", FileCategory::Text),
    "css" => ("text/css", FileCategory::Text),
    "xml" => ("application/xml", FileCategory::Text),
    "json" => ("application/json", FileCategory::Text),
    "toml" => ("application/toml", FileCategory::Text),
    "ini" => ("text/plain", FileCategory::Text),
    "conf" => ("text/plain", FileCategory::Text),
    "qml" => ("text/x-qml", FileCategory::Text),
    "js" => ("text/javascript", FileCategory::Text),
    "py" => ("text/x-python", FileCategory::Text),
    "rs" => ("text/x-rust", FileCategory::Text),
    "c" => ("text/x-c", FileCategory::Text),
    "h" => ("text/x-c", FileCategory::Text),
    "cpp" => ("text/x-c++", FileCategory::Text),
    "png" => ("image/png", FileCategory::Image),
    "jpg" => ("image/jpeg", FileCategory::Image),
    "jpeg" => ("image/jpeg", FileCategory::Image),
    "gif" => ("image/gif", FileCategory::Image),
    "bmp" => ("image/bmp", FileCategory::Image),
    "webp" => ("image/webp", FileCategory::Image),
    "svg" => ("image/svg+xml", FileCategory::Image),
    "mp3" => ("audio/mpeg", FileCategory::Audio),
    "ogg" => ("audio/ogg", FileCategory::Audio),
    "oga" => ("audio/ogg", FileCategory::Audio),
    "flac" => ("audio/flac", FileCategory::Audio),
    "wav" => ("audio/wav", FileCategory::Audio),
    "m4a" => ("audio/mp4", FileCategory::Audio),
    "mp4" => ("video/mp4", FileCategory::Video),
    "mkv" => ("video/x-matroska", FileCategory::Video),
    "webm" => ("video/webm", FileCategory::Video),
    "avi" => ("video/x-msvideo", FileCategory::Video),
    "zip" => ("application/zip", FileCategory::Archive),
    "tar" => ("application/x-tar", FileCategory::Archive),
    "gz" => ("application/gzip", FileCategory::Archive),
    "tgz" => ("application/gzip", FileCategory::Archive),
    "bz2" => ("application/x-bzip2", FileCategory::Archive),
    "xz" => ("application/x-xz", FileCategory::Archive),
    "7z" => ("application/x-7z-compressed", FileCategory::Archive),
    "pdf" => ("application/pdf", FileCategory::Document),
    "odt" => ("application/vnd.oasis.opendocument.text", FileCategory::Document),
    "doc" => ("application/msword", FileCategory::Document),
    "docx" => ("application/vnd.openxmlformats-officedocument.wordprocessingml.document", FileCategory::Document),
    "rpm" => ("application/x-rpm", FileCategory::Package),
    "deb" => ("application/vnd.debian.binary-package", FileCategory::Package),
    "apk" => ("application/vnd.android.package-archive", FileCategory::Package),
    "sh" => ("application/x-sh", FileCategory::Executable),
};

const MIME_DIRECTORY: &str = "inode/directory";
const MIME_SYMLINK: &str = "inode/symlink";
const MIME_SPECIAL: &str = "inode/x-special";
const MIME_EXECUTABLE: &str = "application/x-executable";
const MIME_UNKNOWN: &str = "application/octet-stream";

/// Classifies an entry by kind, then extension, then the executable bit.
pub fn classify(entry: &PathEntry) -> (&'static str, FileCategory) {
    match entry.kind() {
        EntryKind::Directory => return (MIME_DIRECTORY, FileCategory::Directory),
        EntryKind::Special => return (MIME_SPECIAL, FileCategory::Other),
        EntryKind::Symlink if entry.leads_to_dir() => {
            return (MIME_SYMLINK, FileCategory::Directory);
        }
        _ => {}
    }

    let by_ext = Path::new(entry.name())
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .and_then(|ext| EXT_TYPE_MAP.get(ext.as_str()).copied());

    match by_ext {
        Some(found) => found,
        None if entry.mode() & 0o111 != 0 && entry.kind() == EntryKind::File => {
            (MIME_EXECUTABLE, FileCategory::Executable)
        }
        None => (MIME_UNKNOWN, FileCategory::Other),
    }
}

/// Opaque key into the external thumbnail cache. Holding one never keeps decoded
/// image data alive; the key just names what the cache should look up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThumbnailKey(String);

impl ThumbnailKey {
    /// Keys change whenever the file is modified, so stale thumbnails are never reused.
    pub fn for_entry(entry: &PathEntry) -> Self {
        let stamp = entry
            .modified()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        ThumbnailKey(format!("{}@{}", entry.path().display(), stamp))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A [PathEntry] plus derived, possibly expensive fields.
#[derive(Debug)]
pub struct Metadata {
    entry: PathEntry,
    mime: &'static str,
    category: FileCategory,
    thumbnail: Option<ThumbnailKey>,
    symlink_target: OnceCell<Option<PathBuf>>,
}

impl Metadata {
    /// Fetches metadata for `path`. Thumbnail keys are only produced for images and
    /// videos, and only when `thumbnails` is enabled.
    pub fn fetch(path: &Path, thumbnails: bool) -> Result<Self, FsError> {
        Ok(Self::from_entry(PathEntry::from_path(path)?, thumbnails))
    }

    pub fn from_entry(entry: PathEntry, thumbnails: bool) -> Self {
        let (mime, category) = classify(&entry);
        let thumbnail = (thumbnails
            && matches!(category, FileCategory::Image | FileCategory::Video))
        .then(|| ThumbnailKey::for_entry(&entry));
        Metadata {
            entry,
            mime,
            category,
            thumbnail,
            symlink_target: OnceCell::new(),
        }
    }

    #[inline]
    pub fn entry(&self) -> &PathEntry {
        &self.entry
    }

    #[inline]
    pub fn mime(&self) -> &'static str {
        self.mime
    }

    #[inline]
    pub fn category(&self) -> FileCategory {
        self.category
    }

    #[inline]
    pub fn thumbnail(&self) -> Option<&ThumbnailKey> {
        self.thumbnail.as_ref()
    }

    /// The resolved symlink target, read on first call. Relative targets are joined
    /// onto the link's parent directory. `None` for non-links and unreadable links.
    pub fn symlink_target(&self) -> Option<&Path> {
        self.symlink_target
            .get_or_init(|| {
                if !self.entry.is_symlink() {
                    return None;
                }
                let link = self.entry.path();
                let target = fs::read_link(link).ok()?;
                if target.is_absolute() {
                    Some(target)
                } else {
                    Some(link.parent().unwrap_or_else(|| Path::new("")).join(target))
                }
            })
            .as_deref()
    }
}
