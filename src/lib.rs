//! Internal library crate for fbrowse.
//!
//! The filesystem engine of a file manager: directory listings kept live by a watcher and
//! published as minimal diffs, cancelable search, background file operations and a shell
//! command runner. The `fbrowse` binary (`src/main.rs`) is a headless front end over it.
//!
//! Construct one [engine::Engine] from a [config::Config] and hand it to whatever needs it.

pub mod config;
pub mod core;
pub mod engine;
pub mod utils;

pub use engine::{Engine, Features};
