//! The engine instance handed to front ends.
//!
//! [Engine] is constructed explicitly from a [Config] and passed by reference to whatever
//! needs it; there is no global instance. It owns the worker pools and the long-lived
//! services, and creates [DirectoryModel]s on demand.
//!
//! Directory enumeration has a pool of its own, so navigation never queues behind a long
//! running search.

use crate::config::Config;
use crate::core::{
    CommandRunner, DirectoryModel, FileOperationEngine, FsError, Metadata, SearchEngine,
    SearchQuery, SearchSession, WorkerPool,
};

use log::info;

use std::path::Path;
use std::sync::Arc;

/// Threads reserved for directory loads and rescans.
const LISTING_WORKERS: usize = 2;

/// Optional integrations selected at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub sharing: bool,
    pub thumbnails: bool,
}

impl Features {
    pub const fn compiled() -> Self {
        Features {
            sharing: cfg!(feature = "sharing"),
            thumbnails: cfg!(feature = "thumbnails"),
        }
    }
}

impl Default for Features {
    fn default() -> Self {
        Self::compiled()
    }
}

pub struct Engine {
    config: Config,
    features: Features,
    listing_pool: Arc<WorkerPool>,
    search: SearchEngine,
    operations: FileOperationEngine,
    commands: CommandRunner,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self::with_features(config, Features::compiled())
    }

    pub fn with_features(config: Config, features: Features) -> Self {
        let listing_pool = Arc::new(WorkerPool::spawn("fs-list", LISTING_WORKERS));
        let search_pool = Arc::new(WorkerPool::spawn("fs-search", config.search().workers()));
        let jobs_pool = Arc::new(WorkerPool::spawn("fs-jobs", config.operations().workers()));

        let search = SearchEngine::new(Arc::clone(&search_pool));
        let operations = FileOperationEngine::new(jobs_pool, config.operations().job_settings());
        let shell = config.console().shell();
        let commands = CommandRunner::resolve(shell).unwrap_or_else(|_| CommandRunner::new(shell));

        info!(
            "engine ready: {} search worker(s), {} job worker(s), features {:?}",
            search_pool.size(),
            config.operations().workers(),
            features
        );

        Engine {
            config,
            features,
            listing_pool,
            search,
            operations,
            commands,
        }
    }

    // Getters

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn features(&self) -> Features {
        self.features
    }

    #[inline]
    pub fn operations(&self) -> &FileOperationEngine {
        &self.operations
    }

    #[inline]
    pub fn commands(&self) -> &CommandRunner {
        &self.commands
    }

    /// A new model using the configured sort and filter defaults. Nothing is loaded yet.
    pub fn directory_model(&self) -> DirectoryModel {
        let general = self.config.general();
        DirectoryModel::new(
            Arc::clone(&self.listing_pool),
            self.operations.clone(),
            general.sort(),
            general.entry_filter(),
        )
    }

    pub fn start_search(&self, root: &Path, query: SearchQuery) -> SearchSession {
        self.search.start_search(root, query)
    }

    /// A query for `pattern` with the configured search defaults.
    pub fn query(&self, pattern: &str) -> SearchQuery {
        SearchQuery::new(pattern).with_options(self.config.search().default_options())
    }

    /// Full metadata for one path, with a thumbnail key when thumbnails are compiled in.
    pub fn metadata(&self, path: &Path) -> Result<Metadata, FsError> {
        Metadata::fetch(path, self.features.thumbnails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::{JobSpec, JobState, ModelEvent, SearchState};
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn engine_wires_services_from_config() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("report.pdf"), "x")?;
        let engine = Engine::with_features(
            Config::default(),
            Features {
                sharing: false,
                thumbnails: true,
            },
        );

        let meta = engine.metadata(&dir.path().join("report.pdf"))?;
        assert_eq!(meta.mime(), "application/pdf");

        let mut session = engine.start_search(dir.path(), engine.query("report"));
        assert_eq!(session.wait(Duration::from_secs(5)), &SearchState::Completed);
        assert_eq!(session.matches().len(), 1);

        let handle = engine
            .operations()
            .submit(JobSpec::create_dir(dir.path().join("new")));
        let (_, job) = handle.wait(Duration::from_secs(5));
        assert_eq!(job.map(|j| j.state()), Some(JobState::Succeeded));
        Ok(())
    }

    #[test]
    fn busy_search_pool_does_not_delay_listing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("visible.txt"), "v")?;
        let engine = Engine::new(Config::default());

        // Occupy every search thread until the test ends.
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        for _ in 0..engine.config().search().workers() {
            let rx = release_rx.clone();
            engine.search.pool().execute(move || {
                let _ = rx.recv_timeout(Duration::from_secs(10));
            });
        }

        let mut model = engine.directory_model();
        let request = model.set_directory(dir.path());
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut loaded = false;
        while !loaded && std::time::Instant::now() < deadline {
            model.process_pending();
            while let Ok(ev) = model.events().try_recv() {
                loaded |= matches!(ev, ModelEvent::Loaded { request: r, .. } if r == request);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        drop(release_tx);
        assert!(loaded, "listing waited for the search pool");
        Ok(())
    }

    #[test]
    fn compiled_features_default_off() {
        let f = Features::compiled();
        assert_eq!(f.sharing, cfg!(feature = "sharing"));
        assert_eq!(f.thumbnails, cfg!(feature = "thumbnails"));
    }
}
