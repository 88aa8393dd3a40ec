//! The `[operations]` table: background copy/move/delete jobs.

use crate::core::{ConflictPolicy, DEFAULT_CHUNK_SIZE, JobSettings};
use crate::utils::clamp_workers;

use log::warn;
use serde::Deserialize;

use std::time::Duration;

/// Copy chunks are kept between 4 KiB and 16 MiB.
const MIN_CHUNK_SIZE: usize = 4 * 1024;
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Operations {
    workers: usize,
    progress_interval_ms: u64,
    chunk_size: usize,
    conflict: String,
}

impl Default for Operations {
    fn default() -> Self {
        Operations {
            workers: 2,
            progress_interval_ms: 100,
            chunk_size: DEFAULT_CHUNK_SIZE,
            conflict: "fail_on_conflict".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalOperations {
    workers: usize,
    progress_interval: Duration,
    chunk_size: usize,
    conflict: ConflictPolicy,
}

impl From<Operations> for InternalOperations {
    fn from(o: Operations) -> Self {
        let conflict = ConflictPolicy::parse(&o.conflict).unwrap_or_else(|| {
            warn!("unknown conflict policy '{}', failing on conflicts", o.conflict);
            ConflictPolicy::FailOnConflict
        });
        Self {
            workers: clamp_workers("operations.workers", o.workers),
            progress_interval: Duration::from_millis(o.progress_interval_ms),
            chunk_size: o.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            conflict,
        }
    }
}

impl InternalOperations {
    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[inline]
    pub fn conflict(&self) -> ConflictPolicy {
        self.conflict
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            chunk_size: self.chunk_size,
            progress_interval: self.progress_interval,
            default_conflict: self.conflict,
        }
    }
}
