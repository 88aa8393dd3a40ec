//! Shell command execution for the console view.
//!
//! [CommandRunner::run] spawns `shell -c <command line>` and returns a [CommandHandle].
//! The handle is a blocking iterator over [CommandEvent]s: tagged stdout/stderr lines in
//! arrival order, closed by exactly one [CommandEvent::Exited]. Each `run` is independent;
//! a handle is consumed once.

use crate::core::error::FsError;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use log::{debug, info, warn};

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// How often the waiter thread checks whether the child has exited.
const EXIT_POLL: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamTag {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommandState {
    Running,
    Succeeded,
    /// Non-zero exit. `code` is `None` when the process died from a signal.
    Failed { code: Option<i32> },
    /// Stopped through [CommandHandle::kill].
    Terminated,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommandEvent {
    Line { tag: StreamTag, text: String },
    Exited(CommandState),
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    shell: PathBuf,
}

impl CommandRunner {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        CommandRunner {
            shell: shell.into(),
        }
    }

    /// Looks `shell` up on `PATH` (absolute paths are taken as is).
    pub fn resolve(shell: &str) -> Result<Self, FsError> {
        which::which(shell)
            .map(CommandRunner::new)
            .map_err(|e| FsError::invalid(Path::new(shell), e.to_string()))
    }

    #[inline]
    pub fn shell(&self) -> &Path {
        &self.shell
    }

    pub fn run(&self, command_line: &str) -> Result<CommandHandle, FsError> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FsError::from_io(e, &self.shell))?;

        let id = NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed);
        debug!("command {id} spawned (pid {}): {command_line}", child.id());

        let (tx, rx) = unbounded::<CommandEvent>();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, StreamTag::Stdout, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, StreamTag::Stderr, tx.clone()));
        }

        let child = Arc::new(Mutex::new(child));
        let killed = Arc::new(AtomicBool::new(false));
        {
            let child = Arc::clone(&child);
            let killed = Arc::clone(&killed);
            thread::Builder::new()
                .name(format!("cmd-wait-{id}"))
                .spawn(move || wait_child(id, child, killed, readers, tx))
                .map_err(|e| FsError::from_io(e, &self.shell))?;
        }

        Ok(CommandHandle {
            id,
            command_line: command_line.to_string(),
            child,
            killed,
            events: rx,
            state: CommandState::Running,
        })
    }
}

fn spawn_reader<R>(stream: R, tag: StreamTag, tx: Sender<CommandEvent>) -> Option<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name(format!("cmd-{tag:?}").to_lowercase())
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        while matches!(buf.last(), Some(b'\n' | b'\r')) {
                            buf.pop();
                        }
                        let text = String::from_utf8_lossy(&buf).into_owned();
                        if tx.send(CommandEvent::Line { tag, text }).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("could not start {tag:?} reader: {e}");
            None
        }
    }
}

/// Polls the child without holding its lock across a blocking wait, so `kill` stays usable.
fn wait_child(
    id: u64,
    child: Arc<Mutex<Child>>,
    killed: Arc<AtomicBool>,
    readers: Vec<Option<thread::JoinHandle<()>>>,
    tx: Sender<CommandEvent>,
) {
    let status = loop {
        let polled = match child.lock() {
            Ok(mut c) => c.try_wait(),
            Err(poisoned) => poisoned.into_inner().try_wait(),
        };
        match polled {
            Ok(Some(status)) => break Some(status),
            Ok(None) => thread::sleep(EXIT_POLL),
            Err(e) => {
                warn!("command {id}: wait failed: {e}");
                break None;
            }
        }
    };

    let state = if killed.load(Ordering::Acquire) {
        // Grandchildren may still hold the pipes open; do not wait for the readers.
        CommandState::Terminated
    } else {
        for reader in readers.into_iter().flatten() {
            let _ = reader.join();
        }
        match status {
            Some(s) if s.success() => CommandState::Succeeded,
            Some(s) => CommandState::Failed { code: s.code() },
            None => CommandState::Failed { code: None },
        }
    };

    info!("command {id} exited: {state:?}");
    let _ = tx.send(CommandEvent::Exited(state));
}

/// A running (or finished) command. Iterating blocks until the next line or the exit.
#[derive(Debug)]
pub struct CommandHandle {
    id: u64,
    command_line: String,
    child: Arc<Mutex<Child>>,
    killed: Arc<AtomicBool>,
    events: Receiver<CommandEvent>,
    state: CommandState,
}

impl CommandHandle {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Last observed state; `Running` until the exit event has been consumed.
    #[inline]
    pub fn state(&self) -> &CommandState {
        &self.state
    }

    pub fn try_next(&mut self) -> Option<CommandEvent> {
        if self.state != CommandState::Running {
            return None;
        }
        match self.events.try_recv() {
            Ok(ev) => Some(self.observe(ev)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.state = CommandState::Failed { code: None };
                None
            }
        }
    }

    /// Sends a termination signal. The command then ends as [CommandState::Terminated].
    /// A command that already exited keeps its own exit state.
    pub fn kill(&self) -> Result<(), FsError> {
        let mut child = match self.child.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }
        debug!("killing command {}", self.id);
        child
            .kill()
            .map_err(|e| FsError::from_io(e, Path::new(&self.command_line)))?;
        // Still under the lock, so the waiter cannot observe the exit before the flag.
        self.killed.store(true, Ordering::Release);
        Ok(())
    }

    fn observe(&mut self, ev: CommandEvent) -> CommandEvent {
        if let CommandEvent::Exited(state) = &ev {
            self.state = state.clone();
        }
        ev
    }
}

impl Iterator for CommandHandle {
    type Item = CommandEvent;

    fn next(&mut self) -> Option<CommandEvent> {
        if self.state != CommandState::Running {
            return None;
        }
        match self.events.recv() {
            Ok(ev) => Some(self.observe(ev)),
            Err(_) => {
                self.state = CommandState::Failed { code: None };
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Instant;

    fn sh_available() -> bool {
        which::which("sh").is_ok()
    }

    macro_rules! skip_if_no_sh {
        () => {
            if !sh_available() {
                return Ok(());
            }
        };
    }

    fn lines(events: &[CommandEvent], want: StreamTag) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                CommandEvent::Line { tag, text } if *tag == want => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn streams_tagged_lines_then_exit() -> Result<(), Box<dyn std::error::Error>> {
        skip_if_no_sh!();
        let runner = CommandRunner::resolve("sh")?;
        let handle = runner.run("echo one; echo two; echo oops >&2")?;
        let events: Vec<CommandEvent> = handle.collect();

        assert_eq!(lines(&events, StreamTag::Stdout), vec!["one", "two"]);
        assert_eq!(lines(&events, StreamTag::Stderr), vec!["oops"]);
        assert_eq!(
            events.last(),
            Some(&CommandEvent::Exited(CommandState::Succeeded))
        );
        Ok(())
    }

    #[test]
    fn non_zero_exit_is_failed() -> Result<(), Box<dyn std::error::Error>> {
        skip_if_no_sh!();
        let mut handle = CommandRunner::resolve("sh")?.run("exit 3")?;
        let last = handle.by_ref().last();
        assert_eq!(
            last,
            Some(CommandEvent::Exited(CommandState::Failed { code: Some(3) }))
        );
        assert_eq!(handle.state(), &CommandState::Failed { code: Some(3) });
        assert_eq!(handle.next(), None);
        Ok(())
    }

    #[test]
    fn kill_reports_terminated() -> Result<(), Box<dyn std::error::Error>> {
        skip_if_no_sh!();
        let mut handle = CommandRunner::resolve("sh")?.run("sleep 30")?;
        assert_eq!(handle.try_next(), None);

        let started = Instant::now();
        handle.kill()?;
        let last = handle.by_ref().last();
        assert_eq!(last, Some(CommandEvent::Exited(CommandState::Terminated)));
        assert!(started.elapsed() < Duration::from_secs(10));
        Ok(())
    }

    #[test]
    fn kill_after_exit_keeps_exit_state() -> Result<(), Box<dyn std::error::Error>> {
        skip_if_no_sh!();
        let mut handle = CommandRunner::resolve("sh")?.run("exit 0")?;

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let exited = handle
                .child
                .lock()
                .map(|mut c| matches!(c.try_wait(), Ok(Some(_))))
                .unwrap_or(false);
            if exited {
                break;
            }
            assert!(Instant::now() < deadline, "command never exited");
            thread::sleep(Duration::from_millis(10));
        }

        handle.kill()?;
        assert!(!handle.killed.load(Ordering::Acquire));
        let last = handle.by_ref().last();
        assert_eq!(last, Some(CommandEvent::Exited(CommandState::Succeeded)));
        Ok(())
    }

    #[test]
    fn missing_shell_fails_to_spawn() {
        let runner = CommandRunner::new("/definitely/not/a/shell");
        assert!(matches!(runner.run("true"), Err(FsError::NotFound(_))));
        assert!(CommandRunner::resolve("definitely-not-a-shell-xyz").is_err());
    }
}
