//! Configuration for fbrowse.
//!
//! [load] reads `fbrowse.toml` into a `RawConfig` and converts it into the validated [Config].
//! Each table of the file has its own submodule:
//! - [general]: listing defaults (hidden files, sorting)
//! - [search]: search defaults and limits
//! - [operations]: file operation workers, chunking and conflict policy
//! - [console]: the shell used by the command runner

pub mod console;
pub mod general;
pub mod load;
pub mod operations;
pub mod search;

pub use console::Console;
pub use general::{General, InternalGeneral};
pub use load::Config;
pub use operations::{InternalOperations, Operations};
pub use search::{InternalSearch, Search};
