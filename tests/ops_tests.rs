use fbrowse::core::{
    ConflictPolicy, FileOperationEngine, FsBackend, FsError, ItemState, JobEvent, JobSettings,
    JobSpec, JobState, WorkerPool,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(10);

/// Refuses to delete one particular file.
struct Stubborn(PathBuf);

impl FsBackend for Stubborn {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        if path == self.0 {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        fs::remove_file(path)
    }
}

fn engine_with(backend: Arc<dyn FsBackend>, settings: JobSettings) -> FileOperationEngine {
    FileOperationEngine::with_backend(Arc::new(WorkerPool::spawn("ops-it", 2)), settings, backend)
}

#[test]
fn test_copy_conflict_policies() -> Result<(), Box<dyn std::error::Error>> {
    let src_dir = tempdir()?;
    let dst_dir = tempdir()?;
    let src = src_dir.path().join("photo.jpg");
    let dst = dst_dir.path().join("photo.jpg");
    fs::write(&src, "fresh bytes")?;
    fs::write(&dst, "original")?;

    let ops = FileOperationEngine::new(Arc::new(WorkerPool::spawn("ops-it", 1)), JobSettings::default());

    let (_, job) = ops.submit(JobSpec::copy(vec![src.clone()], dst_dir.path())).wait(WAIT);
    let job = job.ok_or("copy did not finish")?;
    assert_eq!(job.items()[0].state(), ItemState::Failed);
    assert_eq!(job.errors()[0].error, FsError::AlreadyExists(dst.clone()));
    assert_eq!(fs::read_to_string(&dst)?, "original");

    let spec = JobSpec::copy(vec![src], dst_dir.path()).with_conflict(ConflictPolicy::Overwrite);
    let (_, job) = ops.submit(spec).wait(WAIT);
    let job = job.ok_or("overwrite did not finish")?;
    assert_eq!(job.state(), JobState::Succeeded);
    assert_eq!(fs::read_to_string(&dst)?, "fresh bytes");
    Ok(())
}

#[test]
fn test_delete_with_one_failing_child() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let album = dir.path().join("album");
    fs::create_dir(&album)?;
    for i in 0..10 {
        fs::write(album.join(format!("img{i}.png")), "png")?;
    }
    let locked = album.join("img7.png");

    let ops = engine_with(Arc::new(Stubborn(locked.clone())), JobSettings::default());
    let (events, job) = ops.submit(JobSpec::delete(vec![album.clone()])).wait(WAIT);
    let job = job.ok_or("delete did not finish")?;

    assert!(album.is_dir());
    assert!(locked.exists());
    assert_eq!(fs::read_dir(&album)?.count(), 1);
    assert_eq!(job.state(), JobState::PartiallyFailed);
    assert_eq!(job.items()[0].state(), ItemState::PartiallyFailed);
    assert_eq!(job.errors().len(), 1);
    assert_eq!(job.errors()[0].path, locked);

    assert!(matches!(events.first(), Some(JobEvent::Queued { .. })));
    assert!(events.iter().any(|e| matches!(e, JobEvent::Started { .. })));
    Ok(())
}

#[test]
fn test_large_copy_reports_coalesced_progress() -> Result<(), Box<dyn std::error::Error>> {
    let src_dir = tempdir()?;
    let dst_dir = tempdir()?;
    let src = src_dir.path().join("video.mp4");
    fs::write(&src, vec![42u8; 4 * 1024 * 1024])?;

    let settings = JobSettings {
        chunk_size: 64 * 1024,
        progress_interval: Duration::from_secs(60),
        ..JobSettings::default()
    };
    let ops = FileOperationEngine::new(Arc::new(WorkerPool::spawn("ops-it", 1)), settings);
    let (events, job) = ops.submit(JobSpec::copy(vec![src], dst_dir.path())).wait(WAIT);
    let job = job.ok_or("copy did not finish")?;
    assert_eq!(job.state(), JobState::Succeeded);

    let progress: Vec<(u64, u64)> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress {
                bytes_done,
                bytes_total,
                ..
            } => Some((*bytes_done, *bytes_total)),
            _ => None,
        })
        .collect();
    // First chunk, then the final total; the long interval swallows everything between.
    assert_eq!(progress.len(), 2);
    assert_eq!(progress.last(), Some(&(4 * 1024 * 1024, 4 * 1024 * 1024)));
    Ok(())
}
