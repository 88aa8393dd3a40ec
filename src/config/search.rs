//! The `[search]` table.

use crate::core::{DEFAULT_MAX_FILE_SIZE, SearchOptions};
use crate::utils::{DEFAULT_MAX_RESULTS, clamp_max_results, clamp_workers};

use serde::Deserialize;

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Search {
    max_file_size: u64,
    follow_symlinks: bool,
    include_hidden: bool,
    max_results: usize,
    workers: usize,
}

impl Default for Search {
    fn default() -> Self {
        Search {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            follow_symlinks: false,
            include_hidden: true,
            max_results: DEFAULT_MAX_RESULTS,
            workers: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalSearch {
    max_file_size: u64,
    follow_symlinks: bool,
    include_hidden: bool,
    max_results: usize,
    workers: usize,
}

impl From<Search> for InternalSearch {
    fn from(s: Search) -> Self {
        Self {
            max_file_size: s.max_file_size,
            follow_symlinks: s.follow_symlinks,
            include_hidden: s.include_hidden,
            max_results: clamp_max_results(s.max_results),
            workers: clamp_workers("search.workers", s.workers),
        }
    }
}

impl InternalSearch {
    #[inline]
    pub fn max_results(&self) -> usize {
        self.max_results
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Options a new search starts from; callers adjust pattern-specific fields.
    pub fn default_options(&self) -> SearchOptions {
        SearchOptions {
            follow_symlinks: self.follow_symlinks,
            include_hidden: self.include_hidden,
            max_file_size: self.max_file_size,
            max_results: Some(self.max_results),
            ..SearchOptions::default()
        }
    }
}
