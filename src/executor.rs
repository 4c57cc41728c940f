use nix::unistd::Pid;
use tracing::{debug, error, warn};

use crate::builtins::{try_builtin, BuiltinResult};
use crate::error::Result;
use crate::job::{Job, JobId};
use crate::launcher::{self, Command};
use crate::parser::parse;
use crate::reaper::{self, HandlerReport};
use crate::registry;
use crate::signals::{self, CriticalSection, MaskGuard};
use crate::waiter::{self, WaitOutcome};

/// What the prompt loop should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue(i32),
    Exit(i32),
}

/// Process exit status for a `$?` value: its low eight bits.
pub fn exit_status(code: i32) -> u8 {
    (code & 0xff) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launched {
    Background { id: JobId, pid: Pid },
    Foreground { id: JobId, outcome: WaitOutcome },
}

/// Runs one line: a builtin, or an external command in the foreground or
/// background.
pub fn execute_command(line: &str) -> Result<Flow> {
    let Some(parsed) = parse(line) else {
        return Ok(Flow::Continue(0));
    };
    if let BuiltinResult::Handled(flow) = try_builtin(&parsed.argv)? {
        return Ok(flow);
    }

    let command = Command::new(&parsed.argv)?.own_process_group(parsed.background);
    match launch(&command, parsed.background)? {
        Launched::Background { id, pid } => {
            println!("[{id}] {pid}");
            Ok(Flow::Continue(0))
        }
        Launched::Foreground { id, outcome } => {
            if outcome == WaitOutcome::Stopped {
                println!("[{id}]+ Stopped {}", command.command_line());
            }
            Ok(Flow::Continue(outcome.exit_code()))
        }
    }
}

/// Starts `command` and, unless `background`, waits for it.
///
/// `SIGCHLD` stays blocked from before the fork until the child is in the
/// table, so the handler can never see a child it does not know about.
pub fn launch(command: &Command, background: bool) -> Result<Launched> {
    let blocked = MaskGuard::block(&signals::sigchld())?;
    let (id, pid) = spawn_job(&blocked, command, !background)?;
    if background {
        blocked.restore()?;
        return Ok(Launched::Background { id, pid });
    }

    let outcome = match waiter::wait_foreground(&blocked)? {
        Some((_, outcome)) => outcome,
        None => WaitOutcome::Terminated(waiter::wait_job(&blocked, id)?),
    };
    blocked.restore()?;
    Ok(Launched::Foreground { id, outcome })
}

/// Forks `command` and registers it, without waiting.
///
/// `blocked` must keep `SIGCHLD` blocked and must outlive the call; the job
/// is only safe from premature reaping while it does.
pub fn spawn_job(blocked: &MaskGuard, command: &Command, foreground: bool) -> Result<(JobId, Pid)> {
    {
        let cs = CriticalSection::enter()?;
        registry::try_with_jobs(&cs, |jobs| jobs.reserve())?;
    }

    let pid = launcher::spawn(command, blocked)?;

    let command_line = command.command_line().to_owned();
    let cs = CriticalSection::enter()?;
    let id = registry::try_with_jobs(&cs, |jobs| jobs.insert(pid, command_line, foreground))?;
    drop(cs);
    debug!(%id, %pid, foreground, "registered job");
    Ok((id, pid))
}

/// Takes every finished job nobody waited for, and logs whatever the
/// SIGCHLD handler had to complain about.
pub fn collect_completed() -> Result<Vec<Job>> {
    let cs = CriticalSection::enter()?;
    let report = reaper::take_report(&cs);
    let done = registry::with_jobs(&cs, |jobs| jobs.drain_retired())?;
    drop(cs);
    log_report(&report);
    Ok(done)
}

/// Prints `[id] + done CMDLINE` for each finished background job.
pub fn notify_completed() -> Result<()> {
    for job in collect_completed()? {
        println!("[{}] + {} {}", job.id, job.state, job.command_line);
    }
    Ok(())
}

fn log_report(report: &HandlerReport) {
    if report.is_clean() {
        return;
    }
    if let Some(errno) = report.fatal {
        error!(%errno, "SIGCHLD handler could not reap children");
    }
    if let Some(pid) = report.unknown_child {
        warn!(%pid, "reaped a child that was not in the job table");
    }
    if report.table_faults > 0 {
        error!(faults = report.table_faults, "SIGCHLD handler found the job table in use");
    }
}
