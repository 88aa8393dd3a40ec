use fbrowse::config::Config;
use fbrowse::core::{ListingDiff, ModelEvent, PathEntry, SortKey};
use fbrowse::Engine;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

#[derive(Default)]
struct Rows {
    rows: Vec<PathEntry>,
    generation: u64,
    loaded: bool,
}

impl Rows {
    fn apply(&mut self, diff: &ListingDiff) {
        assert_eq!(diff.generation, self.generation + 1);
        self.generation = diff.generation;
        diff.apply_to(&mut self.rows);
    }

    fn names(&self) -> Vec<String> {
        self.rows.iter().map(|e| e.name_str().into_owned()).collect()
    }
}

fn pump(model: &mut fbrowse::core::DirectoryModel, rows: &mut Rows) {
    model.process_pending();
    while let Ok(ev) = model.events().try_recv() {
        match ev {
            ModelEvent::Loaded { diff, .. } => {
                rows.rows.clear();
                rows.generation = 0;
                rows.loaded = true;
                if let Some(diff) = diff {
                    rows.apply(&diff);
                }
            }
            ModelEvent::Diff(diff) => rows.apply(&diff),
            _ => {}
        }
    }
}

fn settle<F>(model: &mut fbrowse::core::DirectoryModel, rows: &mut Rows, mut done: F) -> bool
where
    F: FnMut(&Rows) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        pump(model, rows);
        if done(rows) {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn test_diffs_track_external_changes_and_refresh() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    for name in ["c.txt", "a.txt", "b.txt"] {
        fs::write(dir.path().join(name), name)?;
    }

    let engine = Engine::new(Config::default());
    let mut model = engine.directory_model();
    let mut rows = Rows::default();
    model.set_directory(dir.path());
    assert!(settle(&mut model, &mut rows, |r| r.loaded));
    assert_eq!(rows.names(), vec!["a.txt", "b.txt", "c.txt"]);

    fs::remove_file(dir.path().join("b.txt"))?;
    fs::write(dir.path().join("d.txt"), "dddd")?;
    fs::create_dir(dir.path().join("music"))?;
    let expected = vec!["music", "a.txt", "c.txt", "d.txt"];
    assert!(settle(&mut model, &mut rows, |r| r.names() == expected));

    model.refresh();
    assert!(settle(&mut model, &mut rows, |r| r.names() == expected));

    model.set_sort_key(SortKey::Name, true);
    pump(&mut model, &mut rows);
    assert_eq!(rows.names(), vec!["music", "d.txt", "c.txt", "a.txt"]);
    assert_eq!(model.listing().map(|l| l.entries().len()), Some(4));
    Ok(())
}
