//! Miscellaneous utility functions for fbrowse.
//!
//! This module holds the [helpers] submodule, which provides commonly used utilities such as:
//! - Computing an unused path for the file operation workers
//! - Resolving the initial directory and the home directory
//! - Clamping configured limits
//!
//! The [cli] submodule parses the command line of the `fbrowse` binary.

pub mod cli;
pub mod helpers;

pub use helpers::{
    DEFAULT_MAX_RESULTS, MAX_WORKERS, clamp_max_results, clamp_workers, expand_home_path,
    get_home, get_unused_path, is_usable_directory, resolve_initial_dir, shorten_home_path,
};
