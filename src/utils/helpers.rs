//! Helpers for fbrowse.
//!
//! This module defines the bounds for search result limits and worker counts, and provides:
//! - Generating unused filenames to prevent accidental overwrite
//! - Resolving the user's home directory and the initial directory to open
//! - Displaying home directories as "~" in file paths
//! - Clamping configured values to safe ranges

use log::warn;

use std::fs;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

/// The minimum results which is set to if the maximum is overset in the fbrowse.toml.
pub const MIN_RESULTS: usize = 15;
/// The default search result limit. Can be overwritten in the fbrowse.toml.
pub const DEFAULT_MAX_RESULTS: usize = 2000;
/// The maximum search result limit which is possible.
/// Can be set higher, but better to set it to a big limit instead of usize::MAX
pub const MAX_RESULTS_LIMIT: usize = 1000000;
/// Upper bound for any worker pool.
pub const MAX_WORKERS: usize = 8;

/// Finds the next available filename by appending _1, _2, etc. if the target exists.
/// A dangling symlink still occupies its name.
///
/// Example: "notes.txt" -> "notes_1.txt"
pub fn get_unused_path(path: &Path) -> PathBuf {
    if is_free(path) {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let name = path.file_name().unwrap_or_default();

    let stem = Path::new(name)
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy();

    let ext = Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1;
    loop {
        let new_name = format!("{}_{}{}", stem, counter, ext);
        let target = parent.join(new_name);
        if is_free(&target) {
            return target;
        }
        counter += 1;
    }
}

fn is_free(path: &Path) -> bool {
    fs::symlink_metadata(path).is_err()
}

/// Returns the user's home directory.
pub fn get_home() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Expands a leading "~" to the home directory.
pub fn expand_home_path(path: &str) -> PathBuf {
    if let Some(home) = get_home() {
        if path == "~" {
            return home;
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// True if `path` exists, is a directory and can be listed.
pub fn is_usable_directory(path: &Path) -> bool {
    path.is_dir() && std::fs::read_dir(path).is_ok()
}

/// Picks the directory to open at launch.
///
/// The requested path is used when it is a usable directory, otherwise the home directory,
/// otherwise the current directory.
pub fn resolve_initial_dir(requested: Option<&str>) -> PathBuf {
    if let Some(arg) = requested {
        let candidate = expand_home_path(arg);
        let candidate = candidate.canonicalize().unwrap_or(candidate);
        if is_usable_directory(&candidate) {
            return candidate;
        }
        warn!("'{arg}' is not an accessible directory, falling back to home");
    }
    if let Some(home) = get_home()
        && is_usable_directory(&home)
    {
        return home;
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Util function to shorten home directory to ~.
pub fn shorten_home_path<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();
    if let Some(home_dir) = get_home()
        && let Ok(stripped) = path.strip_prefix(&home_dir)
    {
        if stripped.as_os_str().is_empty() {
            return "~".to_string();
        } else {
            let mut short = stripped.display().to_string();
            if short.starts_with(MAIN_SEPARATOR) {
                short.remove(0);
            }
            return format!("~{}{}", MAIN_SEPARATOR, short);
        }
    }
    path.display().to_string()
}

/// Safely clamp the search result limit.
pub fn clamp_max_results(value: usize) -> usize {
    let clamped = value.clamp(MIN_RESULTS, MAX_RESULTS_LIMIT);
    if clamped != value {
        warn!(
            "max_results={} out of range ({}..={}), clamped to {}",
            value, MIN_RESULTS, MAX_RESULTS_LIMIT, clamped
        );
    }
    clamped
}

/// Clamp a worker count into 1..=[MAX_WORKERS]. `key` names the setting in warnings.
pub fn clamp_workers(key: &str, value: usize) -> usize {
    let clamped = value.clamp(1, MAX_WORKERS);
    if clamped != value {
        warn!("{key}={value} out of range (1..={MAX_WORKERS}), clamped to {clamped}");
    }
    clamped
}

/// Helper utils integration tests
#[cfg(test)]
mod tests {
    use super::*;

    use std::error;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_keep_both_names() -> Result<(), Box<dyn error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("data.csv");
        assert_eq!(get_unused_path(&path), path);

        File::create(&path)?;
        File::create(dir.path().join("data_1.csv"))?;
        assert_eq!(get_unused_path(&path), dir.path().join("data_2.csv"));

        let photos = dir.path().join("photos");
        std::fs::create_dir(&photos)?;
        assert_eq!(get_unused_path(&photos), dir.path().join("photos_1"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_taken() -> Result<(), Box<dyn error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("song.mp3");
        File::create(&path)?;
        std::os::unix::fs::symlink(dir.path().join("nowhere"), dir.path().join("song_1.mp3"))?;

        assert_eq!(get_unused_path(&path), dir.path().join("song_2.mp3"));
        Ok(())
    }

    #[test]
    fn test_clamping() {
        assert_eq!(clamp_max_results(3), MIN_RESULTS);
        assert_eq!(clamp_max_results(500), 500);
        assert_eq!(clamp_max_results(usize::MAX), MAX_RESULTS_LIMIT);
        assert_eq!(clamp_workers("w", 0), 1);
        assert_eq!(clamp_workers("w", 100), MAX_WORKERS);
    }

    #[test]
    fn test_initial_dir_fallbacks() -> Result<(), Box<dyn error::Error>> {
        let dir = tempdir()?;
        let canonical = dir.path().canonicalize()?;
        let arg = dir.path().to_str().ok_or("temp path not valid UTF-8")?;
        assert_eq!(resolve_initial_dir(Some(arg)), canonical);

        let file = dir.path().join("plain.txt");
        File::create(&file)?;
        let fallback = resolve_initial_dir(file.to_str());
        assert_ne!(fallback, file);
        assert!(fallback.is_dir());
        Ok(())
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = get_home() {
            assert_eq!(expand_home_path("~"), home);
            assert_eq!(expand_home_path("~/docs"), home.join("docs"));
        }
        assert_eq!(expand_home_path("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
