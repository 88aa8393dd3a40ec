//! Worker threads for the fbrowse engine.
//!
//! All filesystem I/O (directory enumeration, search traversal, copy/move/delete) runs on
//! a [WorkerPool]. Results travel back to the caller over crossbeam channels; nothing here
//! ever blocks the caller.
//!
//! Cancellation is cooperative: long-running work holds a [CancelToken] and checks it at
//! well-defined points (one directory entry, one I/O chunk).

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, warn};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size set of threads pulling boxed tasks off one shared queue.
///
/// Tasks run in submission order per thread; across threads there is no ordering.
/// Dropping the pool closes the queue, the threads finish what is queued and exit.
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    task_tx: Sender<Task>,
}

impl WorkerPool {
    /// Spawns `size` worker threads (at least one) named `{name}-{n}`.
    pub fn spawn(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        let (task_tx, task_rx) = unbounded::<Task>();

        for n in 0..size {
            let rx = task_rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{name}-{n}"))
                .spawn(move || run_worker(rx));
            if let Err(e) = spawned {
                warn!("failed to spawn {name} worker {n}: {e}");
            }
        }
        debug!("spawned {size} {name} worker(s)");

        Self {
            name,
            size,
            task_tx,
        }
    }

    /// Queues `task` for execution on one of the pool threads.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.task_tx.send(Box::new(task)).is_err() {
            warn!("{} pool is closed, task dropped", self.name);
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

fn run_worker(task_rx: Receiver<Task>) {
    while let Ok(task) = task_rx.recv() {
        task();
    }
}

/// Shared cancellation flag.
///
/// Clones observe the same flag. Once cancelled a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::time::Duration;

    #[test]
    fn pool_runs_every_task() -> Result<(), Box<dyn std::error::Error>> {
        let pool = WorkerPool::spawn("test", 3);
        let (tx, rx) = unbounded();

        for i in 0..50u32 {
            let tx = tx.clone();
            pool.execute(move || {
                let _ = tx.send(i);
            });
        }

        let mut seen = HashSet::new();
        for _ in 0..50 {
            seen.insert(rx.recv_timeout(Duration::from_secs(2))?);
        }
        assert_eq!(seen.len(), 50);
        Ok(())
    }

    #[test]
    fn pool_uses_named_threads() -> Result<(), Box<dyn std::error::Error>> {
        let pool = WorkerPool::spawn("named", 1);
        let (tx, rx) = unbounded();
        pool.execute(move || {
            let _ = tx.send(thread::current().name().map(str::to_owned));
        });
        let name = rx.recv_timeout(Duration::from_secs(2))?;
        assert_eq!(name.as_deref(), Some("named-0"));
        Ok(())
    }

    #[test]
    fn zero_sized_pool_still_has_a_thread() {
        let pool = WorkerPool::spawn("tiny", 0);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
