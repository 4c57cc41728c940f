//! The SIGCHLD handler.
//!
//! One delivered SIGCHLD can stand for any number of children, because a
//! second SIGCHLD raised while the first is pending is simply dropped. The
//! handler therefore polls `waitpid(-1, WNOHANG)` until nothing is left.
//!
//! Everything here runs in signal context: no allocation, no `tracing`, no
//! locks. Problems are parked in atomics and collected later by normal code
//! through [`take_report`].

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::error::{JobError, Result};
use crate::job::{JobState, Termination};
use crate::registry;
use crate::signals::{self, CriticalSection};

static INVOCATIONS: AtomicUsize = AtomicUsize::new(0);
static REAPED: AtomicUsize = AtomicUsize::new(0);
static FATAL_ERRNO: AtomicI32 = AtomicI32::new(0);
static UNKNOWN_CHILD: AtomicI32 = AtomicI32::new(0);
static TABLE_FAULTS: AtomicUsize = AtomicUsize::new(0);

const FATAL_MESSAGE: &[u8] = b"jobsh: waitpid failed in SIGCHLD handler\n";

/// Anomalies the handler ran into since the last report was taken.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandlerReport {
    /// `waitpid` failed with something other than `ECHILD`.
    pub fatal: Option<Errno>,
    /// Last reaped pid that had no job table entry.
    pub unknown_child: Option<Pid>,
    /// Times the handler could not enter the job table.
    pub table_faults: usize,
}

impl HandlerReport {
    pub fn is_clean(&self) -> bool {
        *self == HandlerReport::default()
    }
}

/// Running totals, mostly for tests and debug logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapStats {
    pub invocations: usize,
    pub reaped: usize,
}

pub fn install() -> Result<()> {
    signals::install_sigchld_handler(on_sigchld)
}

/// Collects and clears the handler's report.
pub fn take_report(_blocked: &CriticalSection) -> HandlerReport {
    let fatal = match FATAL_ERRNO.swap(0, Ordering::Relaxed) {
        0 => None,
        raw => Some(Errno::from_raw(raw)),
    };
    let unknown_child = match UNKNOWN_CHILD.swap(0, Ordering::Relaxed) {
        0 => None,
        raw => Some(Pid::from_raw(raw)),
    };
    HandlerReport {
        fatal,
        unknown_child,
        table_faults: TABLE_FAULTS.swap(0, Ordering::Relaxed),
    }
}

pub fn stats() -> ReapStats {
    ReapStats {
        invocations: INVOCATIONS.load(Ordering::Relaxed),
        reaped: REAPED.load(Ordering::Relaxed),
    }
}

extern "C" fn on_sigchld(_signo: libc::c_int) {
    let saved_errno = Errno::last_raw();
    INVOCATIONS.fetch_add(1, Ordering::Relaxed);
    drain();
    Errno::set_raw(saved_errno);
}

fn drain() {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match waitpid(Pid::from_raw(-1), Some(flags)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return,
            Ok(status) => record(status),
            Err(Errno::EINTR) => continue,
            Err(errno) => {
                FATAL_ERRNO.store(errno as i32, Ordering::Relaxed);
                write_stderr(FATAL_MESSAGE);
                return;
            }
        }
    }
}

fn record(status: WaitStatus) {
    let Some(pid) = status.pid() else { return };
    let Ok(cs) = CriticalSection::enter() else {
        TABLE_FAULTS.fetch_add(1, Ordering::Relaxed);
        return;
    };
    let termination = Termination::from_wait_status(&status);
    let outcome = registry::try_with_jobs(&cs, |jobs| match (termination, status) {
        (Some(t), _) => jobs.retire(pid, t).map(drop),
        (None, WaitStatus::Stopped(..)) => jobs.set_state(pid, JobState::Stopped),
        (None, WaitStatus::Continued(_)) => jobs.set_state(pid, JobState::Running),
        (None, _) => Ok(()),
    });
    drop(cs);

    match outcome {
        Ok(()) => {
            if termination.is_some() {
                REAPED.fetch_add(1, Ordering::Relaxed);
            }
        }
        Err(JobError::NotFound { pid }) => {
            if termination.is_some() {
                REAPED.fetch_add(1, Ordering::Relaxed);
            }
            UNKNOWN_CHILD.store(pid.as_raw(), Ordering::Relaxed);
        }
        Err(_) => {
            TABLE_FAULTS.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn write_stderr(message: &[u8]) {
    // SAFETY: write(2) is async-signal-safe and the buffer is static.
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            message.as_ptr().cast(),
            message.len(),
        );
    }
}
