//! Display formatting for entries, used by the console front end and info views.
//!
//! Everything here is pure: it works from [PathEntry] snapshots and never touches the
//! filesystem.

use crate::core::entry::{EntryKind, PathEntry};

use chrono::{DateTime, Local};
use humansize::{DECIMAL, format_size};

use std::time::SystemTime;

/// Returns a string like 'drwxr-xr-x' for the entry's kind and permission bits.
pub fn format_attributes(entry: &PathEntry) -> String {
    let first = match entry.kind() {
        EntryKind::Directory => 'd',
        EntryKind::Symlink => 'l',
        EntryKind::File => '-',
        EntryKind::Special => 's',
    };
    let mode = entry.mode();
    let mut chars = [first, '-', '-', '-', '-', '-', '-', '-', '-', '-'];
    for (i, shift) in [6u32, 3, 0].into_iter().enumerate() {
        let base = 1 + i * 3;
        if (mode >> (shift + 2)) & 1 != 0 {
            chars[base] = 'r';
        }
        if (mode >> (shift + 1)) & 1 != 0 {
            chars[base + 1] = 'w';
        }
        if (mode >> shift) & 1 != 0 {
            chars[base + 2] = 'x';
        }
    }
    chars.iter().collect()
}

pub fn format_kind(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::File => "File",
        EntryKind::Directory => "Directory",
        EntryKind::Symlink => "Symlink",
        EntryKind::Special => "Special",
    }
}

/// Human-readable size, or "-" for directories and unknown sizes.
pub fn format_file_size(size: Option<u64>, is_dir: bool) -> String {
    match size {
        Some(sz) if !is_dir => format_size(sz, DECIMAL),
        _ => "-".to_string(),
    }
}

/// Local modification time, or "-" if unknown.
pub fn format_file_time(modified: Option<SystemTime>) -> String {
    modified
        .map(|mtime| {
            let dt: DateTime<Local> = DateTime::from(mtime);
            dt.format("%Y-%m-%d %H:%M:%S").to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

/// One listing row: attributes, size, time and name (directories get a trailing '/').
pub fn format_row(entry: &PathEntry) -> String {
    let marker = if entry.leads_to_dir() { "/" } else { "" };
    format!(
        "{} {:>10} {} {}{}",
        format_attributes(entry),
        format_file_size(Some(entry.size()), entry.is_dir()),
        format_file_time(entry.modified()),
        entry.name_str(),
        marker
    )
}
