use crate::input::Payload;
use log::{debug, warn};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// First sleep between `try_wait` polls. Doubles up to [`MAX_POLL_INTERVAL`].
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long the stdin writer may take to wind down once the target is dead.
const WRITER_GRACE: Duration = Duration::from_millis(100);

/// Classified result of one supervised execution.
///
/// Every execution yields exactly one variant. Only `Normal` (exit code 0)
/// is a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Normal { code: i32 },
    /// Non-zero exit. A target terminated by a signal reports the negated
    /// signal number, e.g. `-11` for SIGSEGV.
    AbnormalExit { code: i32 },
    Timeout,
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Normal { code: 0 })
    }

    /// Signal number that terminated the target, if any.
    pub fn signal(&self) -> Option<i32> {
        match self {
            Outcome::AbnormalExit { code } if *code < 0 => Some(-code),
            _ => None,
        }
    }

    fn from_exit_status(status: ExitStatus) -> Self {
        if status.success() {
            return Outcome::Normal { code: 0 };
        }
        let code = match status.code() {
            Some(code) => code,
            None => terminating_signal(status).map_or(-1, |signal| -signal),
        };
        Outcome::AbnormalExit { code }
    }
}

#[cfg(unix)]
fn terminating_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: ExitStatus) -> Option<i32> {
    None
}

/// Failures of the supervising infrastructure itself. These are never a
/// finding about the target and abort the campaign.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Target executable not found: {0:?}")]
    TargetNotFound(PathBuf),
    #[error("Failed to spawn target {target:?}: {source}")]
    Spawn {
        target: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Target stdin was not available after piping")]
    StdinUnavailable,
    #[error("Failed to wait for target process: {0}")]
    Wait(#[source] io::Error),
    #[error("Failed to kill timed-out target process: {0}")]
    Kill(#[source] io::Error),
}

/// A `Supervisor` runs the target once per payload and classifies how it
/// ended. Implementations must not return before the target has been reaped.
pub trait Supervisor {
    fn run(&mut self, payload: &Payload) -> Result<Outcome, SupervisorError>;
}

/// Owns a spawned child and guarantees it, and every process it started,
/// is killed and reaped however the supervising scope is left.
struct ChildGuard {
    child: Child,
    reaped: bool,
    group_killed: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
            group_killed: false,
        }
    }

    fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    fn id(&self) -> u32 {
        self.child.id()
    }

    /// Polls the child until it exits or `timeout` elapses. `Ok(None)` means
    /// the deadline passed with the child still running.
    fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>, SupervisorError> {
        let deadline = Instant::now() + timeout;
        let mut interval = MIN_POLL_INTERVAL;
        loop {
            if let Some(status) = self.child.try_wait().map_err(SupervisorError::Wait)? {
                self.reaped = true;
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(interval.min(deadline - now));
            interval = (interval * 2).min(MAX_POLL_INTERVAL);
        }
    }

    /// SIGKILLs the target's whole process group, then reaps the target if
    /// it is still outstanding. Safe to call after the target exited.
    fn kill_and_reap(&mut self) -> Result<(), SupervisorError> {
        if !self.group_killed {
            self.kill_group().map_err(SupervisorError::Kill)?;
            self.group_killed = true;
        }
        if !self.reaped {
            self.child.wait().map_err(SupervisorError::Wait)?;
            self.reaped = true;
        }
        Ok(())
    }

    /// The target leads its own group, so the group id is its pid. The id
    /// stays reserved while any member, a zombie leader included, remains.
    #[cfg(unix)]
    fn kill_group(&mut self) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(self.child.id() as i32);
        match killpg(pgid, Signal::SIGKILL) {
            // Nothing left in the group.
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&mut self) -> io::Result<()> {
        if self.reaped {
            return Ok(());
        }
        match self.child.kill() {
            Err(e) if e.kind() != io::ErrorKind::InvalidInput => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.group_killed {
            let _ = self.kill_group();
        }
        if !self.reaped {
            let _ = self.child.wait();
        }
    }
}

/// Delivers the payload on a helper thread so a target that never reads
/// stdin cannot block the supervisor past its deadline. Dropping `stdin`
/// at the end of the thread closes the pipe and signals end-of-input.
fn spawn_stdin_writer(mut stdin: ChildStdin, payload: &Payload) -> JoinHandle<()> {
    let bytes = payload.as_bytes().to_vec();
    thread::spawn(move || {
        if let Err(e) = stdin.write_all(&bytes).and_then(|()| stdin.flush()) {
            // The target may legitimately exit without consuming its input.
            if e.kind() != io::ErrorKind::BrokenPipe {
                warn!("Error writing payload to target stdin: {e}");
            }
        }
    })
}

/// Joins the writer once the target's group is dead. A process that left
/// the group can still hold the pipe open; after `WRITER_GRACE` the writer
/// is detached and finishes whenever that process lets go.
fn finish_stdin_writer(writer: JoinHandle<()>) {
    let deadline = Instant::now() + WRITER_GRACE;
    while !writer.is_finished() {
        if Instant::now() >= deadline {
            debug!("Target stdin still held open after kill, detaching writer");
            return;
        }
        thread::sleep(MIN_POLL_INTERVAL);
    }
    if writer.join().is_err() {
        warn!("Stdin writer thread panicked");
    }
}

/// Runs the target as a fresh process per payload, with no arguments, the
/// payload on stdin, and stdout/stderr discarded.
#[derive(Debug, Clone)]
pub struct CommandSupervisor {
    target: PathBuf,
    timeout: Duration,
}

impl CommandSupervisor {
    pub fn new(target: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn spawn(&self) -> Result<ChildGuard, SupervisorError> {
        let mut command = Command::new(&self.target);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SupervisorError::TargetNotFound(self.target.clone()),
            _ => SupervisorError::Spawn {
                target: self.target.clone(),
                source: e,
            },
        })?;
        Ok(ChildGuard::new(child))
    }
}

impl Supervisor for CommandSupervisor {
    fn run(&mut self, payload: &Payload) -> Result<Outcome, SupervisorError> {
        let mut guard = self.spawn()?;
        let stdin = guard
            .take_stdin()
            .ok_or(SupervisorError::StdinUnavailable)?;
        let writer = spawn_stdin_writer(stdin, payload);

        let outcome = match guard.wait_timeout(self.timeout)? {
            Some(status) => Outcome::from_exit_status(status),
            None => {
                debug!(
                    "Target pid {} exceeded {:?}, killing its process group",
                    guard.id(),
                    self.timeout
                );
                Outcome::Timeout
            }
        };
        // Descendants left behind by a target that exited on its own go too.
        guard.kill_and_reap()?;

        finish_stdin_writer(writer);
        Ok(outcome)
    }
}
