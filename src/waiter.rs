//! Waiting on the job table: check with `SIGCHLD` blocked, then `sigsuspend`.

use tracing::trace;

use crate::error::{Result, ShellError};
use crate::job::{JobId, JobState, JobTable, Termination};
use crate::registry;
use crate::signals::{self, CriticalSection, MaskGuard};

/// Why a foreground wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Terminated(Termination),
    Stopped,
}

impl WaitOutcome {
    /// Shell-style `$?` value; a stop reports as 128 + SIGTSTP.
    pub fn exit_code(&self) -> i32 {
        match self {
            WaitOutcome::Terminated(t) => t.exit_code(),
            WaitOutcome::Stopped => 128 + libc::SIGTSTP,
        }
    }
}

fn wait_until<R>(
    blocked: &MaskGuard,
    mut ready: impl FnMut(&mut JobTable) -> Option<R>,
) -> Result<R> {
    loop {
        let cs = CriticalSection::enter()?;
        if let Some(value) = registry::with_jobs(&cs, &mut ready)? {
            return Ok(value);
        }
        drop(cs);
        signals::suspend(blocked)?;
        trace!("woken by SIGCHLD");
    }
}

/// Takes the job's outcome, so it is never announced as a completion.
pub fn wait_job(blocked: &MaskGuard, id: JobId) -> Result<Termination> {
    wait_until(blocked, |jobs| {
        if let Some(t) = jobs.take_retired(id).and_then(|job| job.termination()) {
            return Some(Ok(t));
        }
        if jobs.get(id).is_none() {
            return Some(Err(ShellError::UnknownJob {
                spec: format!("%{id}"),
            }));
        }
        None
    })?
}

/// `None` if nothing was in the foreground.
pub fn wait_foreground(blocked: &MaskGuard) -> Result<Option<(JobId, WaitOutcome)>> {
    let current = {
        let cs = CriticalSection::enter()?;
        registry::with_jobs(&cs, |jobs| jobs.foreground())?
    };
    let Some(id) = current else {
        return Ok(None);
    };

    let outcome = wait_until(blocked, |jobs| {
        if jobs.foreground() == Some(id) {
            return None;
        }
        if let Some(t) = jobs.take_retired(id).and_then(|job| job.termination()) {
            return Some(Ok(WaitOutcome::Terminated(t)));
        }
        Some(match jobs.get(id) {
            Some(job) if job.state == JobState::Stopped => Ok(WaitOutcome::Stopped),
            _ => Err(ShellError::UnknownJob {
                spec: format!("%{id}"),
            }),
        })
    })??;
    Ok(Some((id, outcome)))
}

/// Stopped jobs are not waited for.
pub fn wait_all(blocked: &MaskGuard) -> Result<()> {
    wait_until(blocked, |jobs| (!jobs.has_running()).then_some(()))
}
