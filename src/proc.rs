//! Handle to a single worker process.
//!
//! A `WorkerHandle` lives in the supervisor's roster from successful spawn
//! until the worker is reaped. It owns the supervisor-side channel endpoint
//! into the worker (the worker's stdin); the endpoint out of the worker is
//! surrendered to a reader thread at spawn time.

use std::io;
use std::os::unix::io::OwnedFd;
use std::process::Child;
use std::time::Instant;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;

use crate::error::{PreforkError, Result};
use crate::ipc::{PipeFd, RecordWriter};
use crate::signals::{TerminationReason, analyze_wait_status};

pub(crate) struct WorkerHandle {
    pid: Pid,
    writer: RecordWriter,
    spawned_at: Instant,
    reaped: bool,
}

impl WorkerHandle {
    /// Wrap a freshly spawned child.
    ///
    /// Takes ownership of the child's piped stdin (kept as the inbound
    /// endpoint) and returns its piped stdout for the caller's reader thread.
    pub fn from_child(mut child: Child) -> Result<(Self, PipeFd)> {
        let pid = Pid::from_raw(child.id() as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PreforkError::Spawn("worker stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PreforkError::Spawn("worker stdout not captured".into()))?;

        let handle = Self {
            pid,
            writer: RecordWriter::new(PipeFd::new(OwnedFd::from(stdin))),
            spawned_at: Instant::now(),
            reaped: false,
        };
        Ok((handle, PipeFd::new(OwnedFd::from(stdout))))
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// When the worker was spawned; diagnostics only.
    pub fn spawned_at(&self) -> Instant {
        self.spawned_at
    }

    /// Append one message record to the worker's inbound endpoint.
    pub fn send(&mut self, text: &str) -> io::Result<()> {
        self.writer.send(text)
    }

    /// Non-blocking reap. `None` while the worker is still running; once it
    /// returns a reason the handle counts as reaped.
    pub fn try_wait(&mut self) -> Option<TerminationReason> {
        if self.reaped {
            return None;
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(nix::sys::wait::WaitStatus::StillAlive) => None,
            Ok(status) => {
                self.reaped = true;
                Some(analyze_wait_status(status))
            }
            Err(_) => {
                // ECHILD: reaped through another path. Nothing left to track.
                self.reaped = true;
                Some(TerminationReason::Unknown)
            }
        }
    }

    /// Blocking reap, retried when the wait is interrupted.
    pub fn wait(&mut self) -> TerminationReason {
        if self.reaped {
            return TerminationReason::Unknown;
        }
        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    self.reaped = true;
                    return analyze_wait_status(status);
                }
                Err(Errno::EINTR) => continue,
                Err(_) => {
                    self.reaped = true;
                    return TerminationReason::Unknown;
                }
            }
        }
    }

    /// Send SIGTERM; a worker that is already gone is not an error.
    pub fn terminate(&self) {
        if self.reaped {
            return;
        }
        match signal::kill(self.pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::debug!(pid = %self.pid, error = %e, "SIGTERM failed"),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        // Supervisor teardown: give the worker a moment to honor SIGTERM,
        // then make sure it does not outlive its handle.
        self.terminate();
        std::thread::sleep(std::time::Duration::from_millis(10));
        if self.try_wait().is_some() {
            return;
        }
        let _ = signal::kill(self.pid, Signal::SIGKILL);
        let _ = waitpid(self.pid, None);
        self.reaped = true;
    }
}
