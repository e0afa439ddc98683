//! Signal plumbing shared by both sides of the process boundary.
//!
//! Both the supervisor and each worker use the same discipline: the
//! supervised signal set is blocked in the main thread before any other
//! thread exists, and a dedicated dispatch thread turns pending signals into
//! hook invocations with `SigSet::wait`. Handler logic therefore runs as
//! ordinary code in one thread, never in async-signal context.

use nix::sys::signal::{self, SigHandler, SigSet, Signal};
use nix::sys::wait::WaitStatus;

/// Signals that mean "shut down", on either side.
pub(crate) const TERMINATION_SIGNALS: [Signal; 4] = [
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGABRT,
];

/// The set the supervisor waits on: hang-up, terminations, child deaths.
pub(crate) fn supervised_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGHUP);
    for sig in TERMINATION_SIGNALS {
        set.add(sig);
    }
    set.add(Signal::SIGCHLD);
    set
}

/// The set a worker waits on: hang-up and terminations.
pub(crate) fn worker_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGHUP);
    for sig in TERMINATION_SIGNALS {
        set.add(sig);
    }
    set
}

pub(crate) fn is_termination(sig: Signal) -> bool {
    TERMINATION_SIGNALS.contains(&sig)
}

/// Block `set` in the calling thread; threads created afterwards inherit it.
pub(crate) fn block(set: &SigSet) -> nix::Result<()> {
    set.thread_block()
}

/// Route broken-pipe conditions through `EPIPE` instead of process death.
pub(crate) fn ignore_sigpipe() {
    // Safety: replacing the SIGPIPE disposition with SIG_IGN installs no
    // user handler and is called before channel writes can occur.
    unsafe {
        let _ = signal::signal(Signal::SIGPIPE, SigHandler::SigIgn);
    }
}

/// Why a worker process stopped running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Process is still running.
    StillAlive,
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// True for a voluntary exit with status zero.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Signaled(sig) => write!(f, "killed by signal {:?}", sig),
            Self::StillAlive => write!(f, "still running"),
            Self::Unknown => write!(f, "unknown reason"),
        }
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub(crate) fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, sig, _) => TerminationReason::Signaled(sig),
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_supervised_set_members() {
        let set = supervised_set();
        assert!(set.contains(Signal::SIGHUP));
        assert!(set.contains(Signal::SIGTERM));
        assert!(set.contains(Signal::SIGINT));
        assert!(set.contains(Signal::SIGQUIT));
        assert!(set.contains(Signal::SIGABRT));
        assert!(set.contains(Signal::SIGCHLD));
    }

    #[test]
    fn test_worker_set_excludes_chld() {
        let set = worker_set();
        assert!(set.contains(Signal::SIGHUP));
        assert!(!set.contains(Signal::SIGCHLD));
    }

    #[test]
    fn test_is_termination() {
        assert!(is_termination(Signal::SIGTERM));
        assert!(is_termination(Signal::SIGQUIT));
        assert!(!is_termination(Signal::SIGHUP));
        assert!(!is_termination(Signal::SIGCHLD));
    }

    #[test]
    fn test_analyze_wait_status() {
        let pid = Pid::from_raw(1);
        assert_eq!(
            analyze_wait_status(WaitStatus::Exited(pid, 0)),
            TerminationReason::Exited(0)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            TerminationReason::Signaled(Signal::SIGKILL)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::StillAlive),
            TerminationReason::StillAlive
        );
    }

    #[test]
    fn test_clean_exit() {
        assert!(TerminationReason::Exited(0).is_clean());
        assert!(!TerminationReason::Exited(1).is_clean());
        assert!(!TerminationReason::Signaled(Signal::SIGTERM).is_clean());
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(TerminationReason::Exited(3).to_string(), "exited with code 3");
        assert!(
            TerminationReason::Signaled(Signal::SIGTERM)
                .to_string()
                .contains("SIGTERM")
        );
    }
}
