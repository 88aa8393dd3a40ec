//! The search module for fbrowse.
//!
//! [SearchEngine::start_search] walks a directory tree on the search pool and streams matches back
//! to the returned [SearchSession] as they are found. Traversal is depth-first and
//! lexicographic within each directory, so identical inputs always produce the same ordered
//! output, and a cancelled search yields a prefix of what a full run would have produced.
//!
//! Names are matched as a substring, a glob, or fuzzily (skim scoring). Content matching reads
//! each candidate file up to `max_file_size`; larger files are reported as skipped, not failed.
//! Errors on one subtree are recorded against that path and the walk continues with the
//! siblings.

use crate::core::entry::PathEntry;
use crate::core::error::FsError;
use crate::core::worker::{CancelToken, WorkerPool};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use glob::{MatchOptions, Pattern};
use log::{debug, warn};
use regex::bytes::{Regex, RegexBuilder};

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default bound for content matching (10 MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// How the pattern is compared with entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameMatch {
    #[default]
    Substring,
    Glob,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    pub recurse: bool,
    /// Levels below the root to descend into; `None` is unbounded.
    pub max_depth: Option<usize>,
    pub follow_symlinks: bool,
    /// Match file contents instead of names.
    pub content_match: bool,
    pub max_file_size: u64,
    pub include_hidden: bool,
    pub max_results: Option<usize>,
    pub name_match: NameMatch,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            case_sensitive: false,
            recurse: true,
            max_depth: None,
            follow_symlinks: false,
            content_match: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            include_hidden: true,
            max_results: None,
            name_match: NameMatch::Substring,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub pattern: String,
    pub options: SearchOptions,
}

impl SearchQuery {
    pub fn new(pattern: impl Into<String>) -> Self {
        SearchQuery {
            pattern: pattern.into(),
            options: SearchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchState {
    Running,
    Cancelled,
    Completed,
    Failed(FsError),
}

impl SearchState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SearchState::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    Match(PathEntry),
    Skipped { path: PathBuf, reason: SkipReason },
    Error { path: PathBuf, error: FsError },
    Finished(SearchState),
}

/// Starts searches on a pool of their own, apart from directory loads.
#[derive(Clone)]
pub struct SearchEngine {
    pool: Arc<WorkerPool>,
    next_id: Arc<AtomicU64>,
}

impl SearchEngine {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        SearchEngine {
            pool,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Starts searching below `root` and returns immediately.
    pub fn start_search(&self, root: &Path, query: SearchQuery) -> SearchSession {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded::<SearchEvent>();
        let cancel = CancelToken::new();

        let worker_cancel = cancel.clone();
        let worker_root = root.to_path_buf();
        let worker_query = query.clone();
        self.pool.execute(move || {
            let started = Instant::now();
            let state = run_search(&worker_root, &worker_query, &worker_cancel, &tx);
            debug!(
                "search {id} for {:?} under {} ended {:?} after {:?}",
                worker_query.pattern,
                worker_root.display(),
                state,
                started.elapsed()
            );
            let _ = tx.send(SearchEvent::Finished(state));
        });

        SearchSession {
            id,
            root: root.to_path_buf(),
            query,
            state: SearchState::Running,
            cancel,
            events: rx,
            matches: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// One running or finished search, owned by whoever started it.
///
/// Events are pulled with [SearchSession::poll] / [SearchSession::wait]; matches, skips and
/// per-path errors accumulate on the session in discovery order.
#[derive(Debug)]
pub struct SearchSession {
    id: u64,
    root: PathBuf,
    query: SearchQuery,
    state: SearchState,
    cancel: CancelToken,
    events: Receiver<SearchEvent>,
    matches: Vec<PathEntry>,
    skipped: Vec<(PathBuf, SkipReason)>,
    errors: Vec<(PathBuf, FsError)>,
}

impl SearchSession {
    // Accessors

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    #[inline]
    pub fn state(&self) -> &SearchState {
        &self.state
    }

    #[inline]
    pub fn matches(&self) -> &[PathEntry] {
        &self.matches
    }

    #[inline]
    pub fn skipped(&self) -> &[(PathBuf, SkipReason)] {
        &self.skipped
    }

    #[inline]
    pub fn errors(&self) -> &[(PathBuf, FsError)] {
        &self.errors
    }

    /// Asks the traversal to stop at its next check point. Matches already delivered stay.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drains pending events without blocking and returns them.
    pub fn poll(&mut self) -> Vec<SearchEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(ev) => {
                    self.record(&ev);
                    out.push(ev);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.mark_lost();
                    break;
                }
            }
        }
        out
    }

    /// Blocks until the search reaches a terminal state or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> &SearchState {
        let deadline = Instant::now() + timeout;
        while !self.state.is_terminal() {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(left) {
                Ok(ev) => self.record(&ev),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => self.mark_lost(),
            }
        }
        &self.state
    }

    fn record(&mut self, ev: &SearchEvent) {
        match ev {
            SearchEvent::Match(entry) => self.matches.push(entry.clone()),
            SearchEvent::Skipped { path, reason } => self.skipped.push((path.clone(), *reason)),
            SearchEvent::Error { path, error } => self.errors.push((path.clone(), error.clone())),
            SearchEvent::Finished(state) => self.state = state.clone(),
        }
    }

    fn mark_lost(&mut self) {
        if !self.state.is_terminal() {
            self.state = SearchState::Failed(FsError::Io {
                path: self.root.clone(),
                message: "search worker went away".into(),
            });
        }
    }
}

enum Matcher {
    Substring { needle: String, case_sensitive: bool },
    Glob { pattern: Pattern, options: MatchOptions },
    Fuzzy(Box<SkimMatcherV2>, String),
    Content(Regex),
}

impl Matcher {
    fn build(query: &SearchQuery) -> Result<Self, String> {
        let opts = &query.options;
        if opts.content_match {
            return RegexBuilder::new(&regex::escape(&query.pattern))
                .case_insensitive(!opts.case_sensitive)
                .build()
                .map(Matcher::Content)
                .map_err(|e| e.to_string());
        }
        Ok(match opts.name_match {
            NameMatch::Substring => Matcher::Substring {
                needle: if opts.case_sensitive {
                    query.pattern.clone()
                } else {
                    query.pattern.to_lowercase()
                },
                case_sensitive: opts.case_sensitive,
            },
            NameMatch::Glob => Matcher::Glob {
                pattern: Pattern::new(&query.pattern).map_err(|e| e.to_string())?,
                options: MatchOptions {
                    case_sensitive: opts.case_sensitive,
                    require_literal_separator: false,
                    require_literal_leading_dot: false,
                },
            },
            NameMatch::Fuzzy => {
                let matcher = SkimMatcherV2::default();
                let matcher = if opts.case_sensitive {
                    matcher.respect_case()
                } else {
                    matcher.ignore_case()
                };
                Matcher::Fuzzy(Box::new(matcher), query.pattern.clone())
            }
        })
    }

    fn matches_name(&self, name: &str) -> bool {
        match self {
            Matcher::Substring {
                needle,
                case_sensitive: true,
            } => name.contains(needle.as_str()),
            Matcher::Substring { needle, .. } => name.to_lowercase().contains(needle.as_str()),
            Matcher::Glob { pattern, options } => pattern.matches_with(name, *options),
            Matcher::Fuzzy(matcher, pattern) => matcher.fuzzy_match(name, pattern).is_some(),
            Matcher::Content(_) => false,
        }
    }
}

/// Mutable state of one traversal.
struct Walk<'a> {
    query: &'a SearchQuery,
    matcher: Matcher,
    cancel: &'a CancelToken,
    tx: &'a Sender<SearchEvent>,
    visited: HashSet<DirId>,
    emitted: usize,
}

enum Flow {
    Continue,
    Stop(SearchState),
}

fn run_search(
    root: &Path,
    query: &SearchQuery,
    cancel: &CancelToken,
    tx: &Sender<SearchEvent>,
) -> SearchState {
    // Whole-search setup failures come first, before any traversal.
    let root_md = match fs::metadata(root) {
        Ok(md) => md,
        Err(e) => return SearchState::Failed(FsError::from_io(e, root)),
    };
    if !root_md.is_dir() {
        return SearchState::Failed(FsError::invalid(root, "search root is not a directory"));
    }
    if let Err(e) = fs::read_dir(root) {
        return SearchState::Failed(FsError::from_io(e, root));
    }
    if query.pattern.is_empty() {
        return SearchState::Completed;
    }
    let matcher = match Matcher::build(query) {
        Ok(m) => m,
        Err(reason) => return SearchState::Failed(FsError::invalid(root, reason)),
    };

    let mut walk = Walk {
        query,
        matcher,
        cancel,
        tx,
        visited: HashSet::new(),
        emitted: 0,
    };
    if let Some(id) = dir_id(root) {
        walk.visited.insert(id);
    }

    match walk.visit_dir(root, 0) {
        Flow::Continue => SearchState::Completed,
        Flow::Stop(state) => state,
    }
}

impl Walk<'_> {
    fn visit_dir(&mut self, dir: &Path, depth: usize) -> Flow {
        let reader = match fs::read_dir(dir) {
            Ok(r) => r,
            Err(e) => {
                self.report_error(dir, FsError::from_io(e, dir));
                return Flow::Continue;
            }
        };

        let mut children: Vec<(std::ffi::OsString, PathBuf)> = reader
            .filter_map(Result::ok)
            .map(|e| (e.file_name(), e.path()))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, path) in children {
            if self.cancel.is_cancelled() {
                return Flow::Stop(SearchState::Cancelled);
            }
            if !self.query.options.include_hidden && name.to_string_lossy().starts_with('.') {
                continue;
            }

            let entry = match PathEntry::from_path(&path) {
                Ok(e) => e,
                // Vanished between readdir and lstat.
                Err(FsError::NotFound(_)) => continue,
                Err(e) => {
                    self.report_error(&path, e);
                    continue;
                }
            };

            if let Flow::Stop(state) = self.consider(&entry) {
                return Flow::Stop(state);
            }

            if self.should_descend(&entry, depth)
                && let Flow::Stop(state) = self.visit_dir(&path, depth + 1)
            {
                return Flow::Stop(state);
            }
        }
        Flow::Continue
    }

    fn consider(&mut self, entry: &PathEntry) -> Flow {
        let hit = match &self.matcher {
            Matcher::Content(re) => {
                if entry.kind() != crate::core::EntryKind::File {
                    return Flow::Continue;
                }
                if self.cancel.is_cancelled() {
                    return Flow::Stop(SearchState::Cancelled);
                }
                let limit = self.query.options.max_file_size;
                if entry.size() > limit {
                    self.skip_too_large(entry.path());
                    return Flow::Continue;
                }
                match read_bounded(entry.path(), limit) {
                    Ok(Some(bytes)) => re.is_match(&bytes),
                    // Grew past the limit after it was listed.
                    Ok(None) => {
                        self.skip_too_large(entry.path());
                        return Flow::Continue;
                    }
                    Err(e) => {
                        self.report_error(entry.path(), FsError::from_io(e, entry.path()));
                        return Flow::Continue;
                    }
                }
            }
            m => m.matches_name(&entry.name_str()),
        };

        if hit {
            self.emitted += 1;
            if self.tx.send(SearchEvent::Match(entry.clone())).is_err() {
                // Session dropped, nobody is listening any more.
                return Flow::Stop(SearchState::Cancelled);
            }
            if let Some(max) = self.query.options.max_results
                && self.emitted >= max
            {
                return Flow::Stop(SearchState::Completed);
            }
        }
        Flow::Continue
    }

    fn should_descend(&mut self, entry: &PathEntry, depth: usize) -> bool {
        let opts = &self.query.options;
        if !opts.recurse || opts.max_depth.is_some_and(|max| depth >= max) {
            return false;
        }
        if entry.is_symlink() {
            if !opts.follow_symlinks || !entry.leads_to_dir() {
                return false;
            }
        } else if !entry.is_dir() {
            return false;
        }
        match dir_id(entry.path()) {
            Some(id) => {
                let fresh = self.visited.insert(id);
                if !fresh {
                    debug!("skipping already visited {}", entry.path().display());
                }
                fresh
            }
            None => false,
        }
    }

    fn skip_too_large(&self, path: &Path) {
        let _ = self.tx.send(SearchEvent::Skipped {
            path: path.to_path_buf(),
            reason: SkipReason::TooLarge,
        });
    }

    fn report_error(&self, path: &Path, error: FsError) {
        warn!("search: {error}");
        let _ = self.tx.send(SearchEvent::Error {
            path: path.to_path_buf(),
            error,
        });
    }
}

/// Reads at most `limit` bytes of `path`. `None` when the file holds more than that.
fn read_bounded(path: &Path, limit: u64) -> io::Result<Option<Vec<u8>>> {
    let mut bytes = Vec::new();
    File::open(path)?
        .take(limit.saturating_add(1))
        .read_to_end(&mut bytes)?;
    Ok((bytes.len() as u64 <= limit).then_some(bytes))
}

/// Identity of a directory for cycle detection.
#[cfg(unix)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DirId(u64, u64);

#[cfg(not(unix))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DirId(PathBuf);

#[cfg(unix)]
fn dir_id(path: &Path) -> Option<DirId> {
    use std::os::unix::fs::MetadataExt;
    fs::metadata(path).ok().map(|md| DirId(md.dev(), md.ino()))
}

#[cfg(not(unix))]
fn dir_id(path: &Path) -> Option<DirId> {
    fs::canonicalize(path).ok().map(DirId)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::File;
    use tempfile::tempdir;

    fn engine() -> SearchEngine {
        SearchEngine::new(Arc::new(WorkerPool::spawn("search-test", 2)))
    }

    fn names(session: &SearchSession) -> Vec<String> {
        session
            .matches()
            .iter()
            .map(|e| e.name_str().into_owned())
            .collect()
    }

    fn run(root: &Path, query: SearchQuery) -> SearchSession {
        let mut session = engine().start_search(root, query);
        session.wait(Duration::from_secs(5));
        session
    }

    #[test]
    fn lexicographic_name_matches() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("b.txt"), vec![b'x'; 10])?;
        fs::write(dir.path().join("a.txt"), vec![b'x'; 5])?;

        let session = run(dir.path(), SearchQuery::new("txt"));
        assert_eq!(session.state(), &SearchState::Completed);
        assert_eq!(names(&session), vec!["a.txt", "b.txt"]);
        Ok(())
    }

    #[test]
    fn depth_first_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("a_dir/inner"))?;
        File::create(dir.path().join("a_dir/inner/crab_deep"))?;
        File::create(dir.path().join("a_dir/crab_mid"))?;
        File::create(dir.path().join("crab_top"))?;

        let session = run(dir.path(), SearchQuery::new("crab"));
        assert_eq!(names(&session), vec!["crab_mid", "crab_deep", "crab_top"]);
        Ok(())
    }

    #[test]
    fn non_recursive_and_depth_limits() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("sub/deeper"))?;
        File::create(dir.path().join("hit_root"))?;
        File::create(dir.path().join("sub/hit_one"))?;
        File::create(dir.path().join("sub/deeper/hit_two"))?;

        let flat = SearchOptions {
            recurse: false,
            ..SearchOptions::default()
        };
        let session = run(dir.path(), SearchQuery::new("hit").with_options(flat));
        assert_eq!(names(&session), vec!["hit_root"]);

        let one_level = SearchOptions {
            max_depth: Some(1),
            ..SearchOptions::default()
        };
        let session = run(dir.path(), SearchQuery::new("hit").with_options(one_level));
        assert_eq!(names(&session), vec!["hit_root", "hit_one"]);
        Ok(())
    }

    #[test]
    fn case_sensitivity() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        File::create(dir.path().join("README"))?;

        let session = run(dir.path(), SearchQuery::new("readme"));
        assert_eq!(names(&session), vec!["README"]);

        let strict = SearchOptions {
            case_sensitive: true,
            ..SearchOptions::default()
        };
        let session = run(dir.path(), SearchQuery::new("readme").with_options(strict));
        assert!(session.matches().is_empty());
        Ok(())
    }

    #[test]
    fn glob_and_fuzzy_modes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        File::create(dir.path().join("report_2024.pdf"))?;
        File::create(dir.path().join("report.txt"))?;

        let glob = SearchOptions {
            name_match: NameMatch::Glob,
            ..SearchOptions::default()
        };
        let session = run(dir.path(), SearchQuery::new("*.PDF").with_options(glob));
        assert_eq!(names(&session), vec!["report_2024.pdf"]);

        let fuzzy = SearchOptions {
            name_match: NameMatch::Fuzzy,
            ..SearchOptions::default()
        };
        let session = run(dir.path(), SearchQuery::new("rpt24").with_options(fuzzy));
        assert_eq!(names(&session), vec!["report_2024.pdf"]);
        Ok(())
    }

    #[test]
    fn content_match_skips_large_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("small.txt"), "the needle is here")?;
        fs::write(dir.path().join("other.txt"), "nothing to see")?;
        let mut big = vec![b'a'; 64];
        big.extend_from_slice(b"needle");
        fs::write(dir.path().join("big.bin"), &big)?;

        let opts = SearchOptions {
            content_match: true,
            max_file_size: 32,
            ..SearchOptions::default()
        };
        let session = run(dir.path(), SearchQuery::new("NEEDLE").with_options(opts));
        assert_eq!(session.state(), &SearchState::Completed);
        assert_eq!(names(&session), vec!["small.txt"]);
        assert_eq!(session.skipped().len(), 1);
        assert_eq!(session.skipped()[0].1, SkipReason::TooLarge);
        assert!(session.errors().is_empty());
        Ok(())
    }

    #[test]
    fn bounded_read_stops_past_the_limit() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("growing.log");
        fs::write(&path, vec![b'x'; 100])?;

        assert_eq!(read_bounded(&path, 10)?, None);
        assert_eq!(read_bounded(&path, 100)?.map(|b| b.len()), Some(100));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subtree_does_not_stop_siblings() -> Result<(), Box<dyn std::error::Error>> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let locked = dir.path().join("a_locked");
        fs::create_dir(&locked)?;
        File::create(locked.join("needle_hidden"))?;
        fs::create_dir(dir.path().join("b_open"))?;
        File::create(dir.path().join("b_open/needle.txt"))?;
        File::create(dir.path().join("c_needle"))?;

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;
        if fs::read_dir(&locked).is_ok() {
            // Privileged users read through the mode bits; nothing to observe.
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;
            eprintln!("skipping: permissions are not enforced for this user");
            return Ok(());
        }

        let session = run(dir.path(), SearchQuery::new("needle"));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;

        assert_eq!(session.state(), &SearchState::Completed);
        assert_eq!(session.errors().len(), 1);
        assert_eq!(session.errors()[0].0, locked);
        assert!(matches!(session.errors()[0].1, FsError::PermissionDenied(_)));
        assert_eq!(names(&session), vec!["needle.txt", "c_needle"]);
        Ok(())
    }

    #[test]
    fn empty_pattern_completes_without_matches() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        File::create(dir.path().join("something.txt"))?;
        let session = run(dir.path(), SearchQuery::new(""));
        assert_eq!(session.state(), &SearchState::Completed);
        assert!(session.matches().is_empty());
        Ok(())
    }

    #[test]
    fn missing_root_fails_up_front() {
        let session = run(Path::new("/path/does/not/exist"), SearchQuery::new("x"));
        assert!(matches!(
            session.state(),
            SearchState::Failed(FsError::NotFound(_))
        ));
        assert!(session.matches().is_empty());
    }

    #[test]
    fn max_results_stops_early() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        for i in 0..10 {
            File::create(dir.path().join(format!("crab_{i}")))?;
        }
        let opts = SearchOptions {
            max_results: Some(3),
            ..SearchOptions::default()
        };
        let session = run(dir.path(), SearchQuery::new("crab").with_options(opts));
        assert_eq!(session.state(), &SearchState::Completed);
        assert_eq!(names(&session), vec!["crab_0", "crab_1", "crab_2"]);
        Ok(())
    }

    #[test]
    fn hidden_entries_can_be_excluded() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        File::create(dir.path().join(".crab"))?;
        File::create(dir.path().join("crab"))?;
        let opts = SearchOptions {
            include_hidden: false,
            ..SearchOptions::default()
        };
        let session = run(dir.path(), SearchQuery::new("crab").with_options(opts));
        assert_eq!(names(&session), vec!["crab"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_are_not_followed_forever() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let sub = dir.path().join("sub");
        fs::create_dir(&sub)?;
        File::create(sub.join("crab"))?;
        std::os::unix::fs::symlink(dir.path(), sub.join("loop"))?;

        // Default: the link is reported by name but never entered.
        let session = run(dir.path(), SearchQuery::new("crab"));
        assert_eq!(names(&session), vec!["crab"]);

        let follow = SearchOptions {
            follow_symlinks: true,
            ..SearchOptions::default()
        };
        let session = run(dir.path(), SearchQuery::new("crab").with_options(follow));
        assert_eq!(session.state(), &SearchState::Completed);
        assert_eq!(names(&session), vec!["crab"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn followed_symlink_dir_is_searched() -> Result<(), Box<dyn std::error::Error>> {
        let outside = tempdir()?;
        File::create(outside.path().join("crab_outside"))?;
        let dir = tempdir()?;
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link"))?;

        let session = run(dir.path(), SearchQuery::new("crab"));
        assert!(session.matches().is_empty());

        let follow = SearchOptions {
            follow_symlinks: true,
            ..SearchOptions::default()
        };
        let session = run(dir.path(), SearchQuery::new("crab").with_options(follow));
        assert_eq!(names(&session), vec!["crab_outside"]);
        Ok(())
    }
}
