//! Sorted, filtered directory listings and the row-level diffs between their versions.
//!
//! A [DirectoryListing] keeps the full, unfiltered set of entries observed for one directory
//! (keyed by base name) and derives the visible, ordered sequence from it with a [SortSpec]
//! and an [EntryFilter]. Every mutation re-derives the visible sequence and returns the
//! [ListingDiff] that turns the previous version into the new one, so a list view can animate
//! inserts, removals and moves instead of resetting.
//!
//! Diffs are applied op by op, in order:
//! 1. `Remove` from the highest index down,
//! 2. `Move` (remove at `from`, then insert at `to` in the shortened sequence),
//! 3. `Insert` in ascending final index,
//! 4. `Update` at final indices.
//!
//! Only entries outside a longest increasing subsequence of the old order are moved.

use crate::core::entry::PathEntry;

use glob::{MatchOptions, Pattern};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Column a listing is sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Name,
    Size,
    Modified,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Some(SortKey::Name),
            "size" => Some(SortKey::Size),
            "modified" | "time" | "mtime" => Some(SortKey::Modified),
            _ => None,
        }
    }
}

/// Sort settings for a listing. Ties are always broken by name, so the order is total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub descending: bool,
    pub dirs_first: bool,
    pub case_insensitive: bool,
}

impl Default for SortSpec {
    fn default() -> Self {
        SortSpec {
            key: SortKey::Name,
            descending: false,
            dirs_first: true,
            case_insensitive: true,
        }
    }
}

impl SortSpec {
    pub fn compare(&self, a: &PathEntry, b: &PathEntry) -> Ordering {
        if self.dirs_first {
            match (a.leads_to_dir(), b.leads_to_dir()) {
                (true, false) => return Ordering::Less,
                (false, true) => return Ordering::Greater,
                _ => {}
            }
        }

        let by_key = match self.key {
            SortKey::Name => Ordering::Equal,
            SortKey::Size => a.size().cmp(&b.size()),
            SortKey::Modified => a.modified().cmp(&b.modified()),
        };
        let ord = by_key.then_with(|| self.compare_names(a.name(), b.name()));

        if self.descending { ord.reverse() } else { ord }
    }

    fn compare_names(&self, a: &OsStr, b: &OsStr) -> Ordering {
        if self.case_insensitive {
            let (la, lb) = (
                a.to_string_lossy().to_lowercase(),
                b.to_string_lossy().to_lowercase(),
            );
            la.cmp(&lb).then_with(|| a.cmp(b))
        } else {
            a.cmp(b)
        }
    }
}

#[derive(Debug, Clone)]
enum NameMatcher {
    Glob(Pattern),
    Substring(String),
}

/// Which entries of the unfiltered set are visible.
///
/// A pattern containing glob metacharacters (`*`, `?`, `[`) is matched as a glob against the
/// whole name, anything else is a substring match.
#[derive(Debug, Clone)]
pub struct EntryFilter {
    show_hidden: bool,
    case_insensitive: bool,
    pattern: Option<String>,
    matcher: Option<NameMatcher>,
}

impl Default for EntryFilter {
    fn default() -> Self {
        EntryFilter {
            show_hidden: false,
            case_insensitive: true,
            pattern: None,
            matcher: None,
        }
    }
}

impl PartialEq for EntryFilter {
    fn eq(&self, other: &Self) -> bool {
        self.show_hidden == other.show_hidden
            && self.case_insensitive == other.case_insensitive
            && self.pattern == other.pattern
    }
}

impl EntryFilter {
    pub fn new(show_hidden: bool, case_insensitive: bool) -> Self {
        EntryFilter {
            show_hidden,
            case_insensitive,
            ..Default::default()
        }
    }

    /// Sets the name pattern. Empty patterns clear it.
    pub fn with_pattern(mut self, pattern: &str) -> Self {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            self.pattern = None;
            self.matcher = None;
            return self;
        }

        let is_glob = trimmed.contains(['*', '?', '[']);
        self.matcher = match is_glob.then(|| Pattern::new(trimmed)) {
            Some(Ok(glob)) => Some(NameMatcher::Glob(glob)),
            _ if self.case_insensitive => Some(NameMatcher::Substring(trimmed.to_lowercase())),
            _ => Some(NameMatcher::Substring(trimmed.to_string())),
        };
        self.pattern = Some(trimmed.to_string());
        self
    }

    #[inline]
    pub fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    #[inline]
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn matches(&self, entry: &PathEntry) -> bool {
        if !self.show_hidden && entry.is_hidden() {
            return false;
        }
        let name = entry.name_str();
        match &self.matcher {
            None => true,
            Some(NameMatcher::Glob(p)) => p.matches_with(
                &name,
                MatchOptions {
                    case_sensitive: !self.case_insensitive,
                    require_literal_separator: false,
                    require_literal_leading_dot: false,
                },
            ),
            Some(NameMatcher::Substring(s)) if self.case_insensitive => {
                name.to_lowercase().contains(s.as_str())
            }
            Some(NameMatcher::Substring(s)) => name.contains(s.as_str()),
        }
    }
}

/// One row-level change. Indices refer to the sequence as it is when the op is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOp {
    Remove { index: usize, name: OsString },
    Move { from: usize, to: usize },
    Insert { index: usize, entry: PathEntry },
    Update { index: usize, entry: PathEntry },
}

/// The changes between two consecutive published versions of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingDiff {
    pub path: PathBuf,
    pub generation: u64,
    pub ops: Vec<DiffOp>,
}

impl ListingDiff {
    /// Applies the ops in order to `rows`.
    pub fn apply_to(&self, rows: &mut Vec<PathEntry>) {
        apply_ops(&self.ops, rows);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub fn apply_ops(ops: &[DiffOp], rows: &mut Vec<PathEntry>) {
    for op in ops {
        match op {
            DiffOp::Remove { index, .. } => {
                rows.remove(*index);
            }
            DiffOp::Move { from, to } => {
                let e = rows.remove(*from);
                rows.insert(*to, e);
            }
            DiffOp::Insert { index, entry } => rows.insert(*index, entry.clone()),
            DiffOp::Update { index, entry } => rows[*index] = entry.clone(),
        }
    }
}

/// Computes the ops turning `old` into `new`. Rows are identified by path.
pub fn diff_rows(old: &[PathEntry], new: &[PathEntry]) -> Vec<DiffOp> {
    let new_pos: HashMap<&Path, usize> = new
        .iter()
        .enumerate()
        .map(|(i, e)| (e.path(), i))
        .collect();

    let mut ops = Vec::new();

    // Removals, highest index first so earlier indices stay valid.
    for (i, e) in old.iter().enumerate().rev() {
        if !new_pos.contains_key(e.path()) {
            ops.push(DiffOp::Remove {
                index: i,
                name: e.name().to_os_string(),
            });
        }
    }

    // Survivors in old order, tagged with their rank among survivors in new order.
    let mut work: Vec<&Path> = old
        .iter()
        .map(PathEntry::path)
        .filter(|p| new_pos.contains_key(p))
        .collect();
    let mut target: Vec<&Path> = work.clone();
    target.sort_by_key(|p| new_pos[p]);
    let rank: HashMap<&Path, usize> = target.iter().enumerate().map(|(i, p)| (*p, i)).collect();

    let ranks: Vec<usize> = work.iter().map(|p| rank[p]).collect();
    let stable = longest_increasing_subsequence(&ranks);
    let mut is_stable = vec![false; target.len()];
    for idx in stable {
        is_stable[ranks[idx]] = true;
    }

    // Each unstable survivor is moved right behind its predecessor in the target order.
    for (r, path) in target.iter().enumerate() {
        if is_stable[r] {
            continue;
        }
        let Some(from) = work.iter().position(|p| p == path) else {
            continue;
        };
        let moved = work.remove(from);
        let to = if r == 0 {
            0
        } else {
            let pred = target[r - 1];
            work.iter().position(|p| *p == pred).map_or(0, |i| i + 1)
        };
        work.insert(to, moved);
        if from != to {
            ops.push(DiffOp::Move { from, to });
        }
    }

    // Insertions in ascending final index.
    let old_by_path: HashMap<&Path, &PathEntry> = old.iter().map(|e| (e.path(), e)).collect();
    for (i, e) in new.iter().enumerate() {
        if !old_by_path.contains_key(e.path()) {
            ops.push(DiffOp::Insert {
                index: i,
                entry: e.clone(),
            });
        }
    }

    // Replaced snapshots at their final position.
    for (i, e) in new.iter().enumerate() {
        if let Some(prev) = old_by_path.get(e.path())
            && *prev != e
        {
            ops.push(DiffOp::Update {
                index: i,
                entry: e.clone(),
            });
        }
    }

    ops
}

/// Indices (into `seq`) of one longest strictly increasing subsequence.
fn longest_increasing_subsequence(seq: &[usize]) -> Vec<usize> {
    // tails[k] = index into seq of the smallest tail of an increasing run of length k + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, &v) in seq.iter().enumerate() {
        let k = tails.partition_point(|&t| seq[t] < v);
        if k > 0 {
            prev[i] = Some(tails[k - 1]);
        }
        if k == tails.len() {
            tails.push(i);
        } else {
            tails[k] = i;
        }
    }

    let mut out = Vec::with_capacity(tails.len());
    let mut cur = tails.last().copied();
    while let Some(i) = cur {
        out.push(i);
        cur = prev[i];
    }
    out.reverse();
    out
}

/// The listing of one directory: the unfiltered set the engine has observed, the current
/// sort and filter, and the published visible sequence with its generation.
#[derive(Debug, Clone)]
pub struct DirectoryListing {
    path: PathBuf,
    all: HashMap<OsString, PathEntry>,
    visible: Vec<PathEntry>,
    sort: SortSpec,
    filter: EntryFilter,
    generation: u64,
}

impl DirectoryListing {
    pub fn new(path: PathBuf, sort: SortSpec, filter: EntryFilter) -> Self {
        DirectoryListing {
            path,
            all: HashMap::new(),
            visible: Vec::new(),
            sort,
            filter,
            generation: 0,
        }
    }

    // Accessors

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The published, ordered, filtered sequence.
    #[inline]
    pub fn entries(&self) -> &[PathEntry] {
        &self.visible
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    #[inline]
    pub fn filter(&self) -> &EntryFilter {
        &self.filter
    }

    /// Number of entries observed, visible or not.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.all.len()
    }

    pub fn get(&self, name: &OsStr) -> Option<&PathEntry> {
        self.all.get(name)
    }

    pub fn contains(&self, name: &OsStr) -> bool {
        self.all.contains_key(name)
    }

    // Mutations. Each returns the published diff, or None when nothing visible changed.

    /// Replaces the whole observed set, e.g. after a fresh enumeration.
    pub fn replace_all(&mut self, entries: Vec<PathEntry>) -> Option<ListingDiff> {
        self.all = entries
            .into_iter()
            .map(|e| (e.name().to_os_string(), e))
            .collect();
        self.republish()
    }

    /// Inserts or replaces the entry with the same name.
    pub fn upsert(&mut self, entry: PathEntry) -> Option<ListingDiff> {
        if self.all.get(entry.name()) == Some(&entry) {
            return None;
        }
        self.all.insert(entry.name().to_os_string(), entry);
        self.republish()
    }

    pub fn remove(&mut self, name: &OsStr) -> Option<ListingDiff> {
        self.all.remove(name)?;
        self.republish()
    }

    pub fn set_sort(&mut self, sort: SortSpec) -> Option<ListingDiff> {
        if self.sort == sort {
            return None;
        }
        self.sort = sort;
        self.republish()
    }

    pub fn set_filter(&mut self, filter: EntryFilter) -> Option<ListingDiff> {
        if self.filter == filter {
            return None;
        }
        self.filter = filter;
        self.republish()
    }

    fn derive_visible(&self) -> Vec<PathEntry> {
        let mut rows: Vec<PathEntry> = self
            .all
            .values()
            .filter(|e| self.filter.matches(e))
            .cloned()
            .collect();
        rows.sort_by(|a, b| self.sort.compare(a, b));
        rows
    }

    fn republish(&mut self) -> Option<ListingDiff> {
        let next = self.derive_visible();
        let ops = diff_rows(&self.visible, &next);
        self.visible = next;
        if ops.is_empty() {
            return None;
        }
        self.generation += 1;
        Some(ListingDiff {
            path: self.path.clone(),
            generation: self.generation,
            ops,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::seq::SliceRandom;
    use rand::{Rng, rng};
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::{TempDir, tempdir};

    fn make_dir(files: &[(&str, usize)]) -> Result<TempDir, Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        for (name, len) in files {
            let mut f = File::create(dir.path().join(name))?;
            f.write_all(&vec![b'x'; *len])?;
        }
        Ok(dir)
    }

    fn snapshot(dir: &Path, name: &str) -> Result<PathEntry, Box<dyn std::error::Error>> {
        Ok(PathEntry::from_path(&dir.join(name))?)
    }

    fn names(rows: &[PathEntry]) -> Vec<String> {
        rows.iter().map(|e| e.name_str().into_owned()).collect()
    }

    #[test]
    fn lis_picks_longest_run() {
        let idx = longest_increasing_subsequence(&[3, 0, 1, 4, 2]);
        let vals: Vec<_> = idx.iter().map(|&i| [3, 0, 1, 4, 2][i]).collect();
        assert_eq!(vals.len(), 3);
        assert!(vals.windows(2).all(|w| w[0] < w[1]));
        assert!(longest_increasing_subsequence(&[]).is_empty());
    }

    #[test]
    fn rotation_costs_one_move() -> Result<(), Box<dyn std::error::Error>> {
        let dir = make_dir(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)])?;
        let a = snapshot(dir.path(), "a")?;
        let b = snapshot(dir.path(), "b")?;
        let c = snapshot(dir.path(), "c")?;
        let d = snapshot(dir.path(), "d")?;

        let old = vec![a.clone(), b.clone(), c.clone(), d.clone()];
        let new = vec![b, c, d, a];
        let ops = diff_rows(&old, &new);
        assert_eq!(ops, vec![DiffOp::Move { from: 0, to: 3 }]);

        let mut rows = old;
        apply_ops(&ops, &mut rows);
        assert_eq!(rows, new);
        Ok(())
    }

    #[test]
    fn initial_listing_is_all_inserts() -> Result<(), Box<dyn std::error::Error>> {
        let dir = make_dir(&[("b.txt", 10), ("a.txt", 5)])?;
        let mut listing =
            DirectoryListing::new(dir.path().to_path_buf(), SortSpec::default(), EntryFilter::default());
        let diff = listing
            .replace_all(crate::core::read_entries(dir.path())?)
            .ok_or("expected a diff")?;

        assert_eq!(diff.generation, 1);
        assert!(diff.ops.iter().all(|op| matches!(op, DiffOp::Insert { .. })));
        assert_eq!(names(listing.entries()), vec!["a.txt", "b.txt"]);
        Ok(())
    }

    #[test]
    fn sort_change_emits_moves_only() -> Result<(), Box<dyn std::error::Error>> {
        let dir = make_dir(&[("a", 30), ("b", 10), ("c", 20)])?;
        let mut listing =
            DirectoryListing::new(dir.path().to_path_buf(), SortSpec::default(), EntryFilter::default());
        listing.replace_all(crate::core::read_entries(dir.path())?);

        let by_size = SortSpec {
            key: SortKey::Size,
            ..SortSpec::default()
        };
        let mut rows = listing.entries().to_vec();
        let diff = listing.set_sort(by_size).ok_or("expected a diff")?;
        assert!(diff.ops.iter().all(|op| matches!(op, DiffOp::Move { .. })));
        assert_eq!(diff.generation, 2);

        diff.apply_to(&mut rows);
        assert_eq!(names(&rows), vec!["b", "c", "a"]);
        assert_eq!(rows, listing.entries());

        // Same sort again is a no-op and does not bump the generation.
        assert!(listing.set_sort(by_size).is_none());
        assert_eq!(listing.generation(), 2);
        Ok(())
    }

    #[test]
    fn descending_name_sort() -> Result<(), Box<dyn std::error::Error>> {
        let dir = make_dir(&[("a", 1), ("B", 1), ("c", 1)])?;
        fs::create_dir(dir.path().join("zdir"))?;
        let mut listing =
            DirectoryListing::new(dir.path().to_path_buf(), SortSpec::default(), EntryFilter::default());
        listing.replace_all(crate::core::read_entries(dir.path())?);
        assert_eq!(names(listing.entries()), vec!["zdir", "a", "B", "c"]);

        listing.set_sort(SortSpec {
            descending: true,
            dirs_first: false,
            ..SortSpec::default()
        });
        assert_eq!(names(listing.entries()), vec!["zdir", "c", "B", "a"]);
        Ok(())
    }

    #[test]
    fn filter_hides_and_reveals() -> Result<(), Box<dyn std::error::Error>> {
        let dir = make_dir(&[("notes.md", 1), ("photo.jpg", 1), (".secret", 1)])?;
        let mut listing =
            DirectoryListing::new(dir.path().to_path_buf(), SortSpec::default(), EntryFilter::default());
        listing.replace_all(crate::core::read_entries(dir.path())?);
        assert_eq!(names(listing.entries()), vec!["notes.md", "photo.jpg"]);

        let mut rows = listing.entries().to_vec();
        let diff = listing
            .set_filter(EntryFilter::new(true, true).with_pattern("*.JPG"))
            .ok_or("expected a diff")?;
        diff.apply_to(&mut rows);
        assert_eq!(names(&rows), vec!["photo.jpg"]);

        let diff = listing
            .set_filter(EntryFilter::new(true, true).with_pattern("e"))
            .ok_or("expected a diff")?;
        diff.apply_to(&mut rows);
        assert_eq!(names(&rows), vec![".secret", "notes.md"]);
        assert_eq!(rows, listing.entries());
        Ok(())
    }

    #[test]
    fn upsert_same_snapshot_is_silent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = make_dir(&[("a", 1)])?;
        let mut listing =
            DirectoryListing::new(dir.path().to_path_buf(), SortSpec::default(), EntryFilter::default());
        let a = snapshot(dir.path(), "a")?;
        assert!(listing.upsert(a.clone()).is_some());
        assert!(listing.upsert(a).is_none());
        assert!(listing.remove(OsStr::new("missing")).is_none());
        assert_eq!(listing.generation(), 1);
        Ok(())
    }

    #[test]
    fn hidden_entry_changes_do_not_publish() -> Result<(), Box<dyn std::error::Error>> {
        let dir = make_dir(&[("a", 1), (".h", 1)])?;
        let mut listing =
            DirectoryListing::new(dir.path().to_path_buf(), SortSpec::default(), EntryFilter::default());
        listing.upsert(snapshot(dir.path(), "a")?);
        assert!(listing.upsert(snapshot(dir.path(), ".h")?).is_none());
        assert_eq!(listing.total_len(), 2);
        assert_eq!(listing.entries().len(), 1);
        Ok(())
    }

    #[test]
    fn randomized_diffs_reproduce_target() -> Result<(), Box<dyn std::error::Error>> {
        let files: Vec<(String, usize)> = (0..24).map(|i| (format!("f{i:02}"), i * 7 % 13)).collect();
        let dir = tempdir()?;
        for (name, len) in &files {
            fs::write(dir.path().join(name), vec![b'x'; *len])?;
        }
        let pool: Vec<PathEntry> = crate::core::read_entries(dir.path())?;

        let mut rng = rng();
        for _ in 0..200 {
            let mut old = pool.clone();
            old.shuffle(&mut rng);
            old.truncate(rng.random_range(0..pool.len()));
            let mut new = pool.clone();
            new.shuffle(&mut rng);
            new.truncate(rng.random_range(0..pool.len()));

            let ops = diff_rows(&old, &new);
            let mut rows = old.clone();
            apply_ops(&ops, &mut rows);
            assert_eq!(rows, new);

            let moves = ops.iter().filter(|op| matches!(op, DiffOp::Move { .. })).count();
            let survivors = old.iter().filter(|e| new.contains(e)).count();
            assert!(moves <= survivors);
        }
        Ok(())
    }
}
