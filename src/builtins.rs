use std::env;

use nix::sys::signal::{kill, Signal};
use tracing::{debug, warn};

use crate::error::{Result, ShellError};
use crate::executor::Flow;
use crate::job::JobId;
use crate::registry;
use crate::signals::{self, CriticalSection, MaskGuard};
use crate::waiter::{self, WaitOutcome};

fn expand_cd_arg(s: &str) -> String {
    let home = || env::var("HOME").unwrap_or_else(|_| "/".to_string());
    if s == "~" {
        return home();
    }
    if let Some(rest) = s.strip_prefix("~/") {
        return format!("{}/{}", home(), rest);
    }
    s.to_string()
}

pub enum BuiltinResult {
    Handled(Flow),
    NotHandled,
}

pub fn try_builtin(argv: &[String]) -> Result<BuiltinResult> {
    let Some((name, args)) = argv.split_first() else {
        return Ok(BuiltinResult::NotHandled);
    };
    let flow = match name.as_str() {
        "exit" => builtin_exit(args)?,
        "cd" => builtin_cd(args),
        "jobs" => builtin_jobs()?,
        "wait" => builtin_wait(args)?,
        "fg" => builtin_fg(args)?,
        "bg" => builtin_bg(args)?,
        _ => return Ok(BuiltinResult::NotHandled),
    };
    Ok(BuiltinResult::Handled(flow))
}

/// Finds the job named by `spec`, or the most recent one.
fn resolve_job(spec: Option<&String>) -> Result<(JobId, nix::unistd::Pid, String)> {
    let cs = CriticalSection::enter()?;
    let found = registry::with_jobs(&cs, |jobs| {
        let id = match spec {
            Some(s) => jobs.resolve(s)?,
            None => jobs.latest()?,
        };
        jobs.get(id).map(|j| (j.id, j.pid, j.command_line.clone()))
    })?;
    drop(cs);
    found.ok_or_else(|| ShellError::UnknownJob {
        spec: spec.cloned().unwrap_or_else(|| "current".to_string()),
    })
}

/// Hangs up stopped jobs and waits for running ones, then leaves.
fn builtin_exit(args: &[String]) -> Result<Flow> {
    let code = args.first().and_then(|a| a.parse().ok()).unwrap_or(0);
    let blocked = MaskGuard::block(&signals::sigchld())?;

    let cs = CriticalSection::enter()?;
    let stopped = registry::with_jobs(&cs, |jobs| jobs.stopped())?;
    drop(cs);
    for (id, pid) in stopped {
        warn!(%id, %pid, "hanging up stopped job");
        // SIGHUP stays pending until SIGCONT wakes the job.
        kill(pid, Signal::SIGHUP).map_err(ShellError::sys("kill"))?;
        kill(pid, Signal::SIGCONT).map_err(ShellError::sys("kill"))?;
        waiter::wait_job(&blocked, id)?;
    }

    waiter::wait_all(&blocked)?;
    blocked.restore()?;
    Ok(Flow::Exit(code))
}

fn builtin_cd(args: &[String]) -> Flow {
    let target = match args {
        [] => env::var("HOME").unwrap_or_else(|_| String::from("/")),
        [dir] => expand_cd_arg(dir),
        _ => {
            eprintln!("cd: too many arguments");
            return Flow::Continue(1);
        }
    };
    match env::set_current_dir(&target) {
        Ok(()) => Flow::Continue(0),
        Err(e) => {
            eprintln!("cd: {}: {}", target, e);
            Flow::Continue(1)
        }
    }
}

/// Format: `[Job number]+ [PID] [STATE] [CMDLINE]`
fn builtin_jobs() -> Result<Flow> {
    let cs = CriticalSection::enter()?;
    let jobs = registry::with_jobs(&cs, |jobs| jobs.snapshot())?;
    drop(cs);
    if jobs.is_empty() {
        println!("no active background processes");
    }
    for j in jobs {
        println!("[{}]+ {} {} {}", j.id, j.pid, j.state, j.command_line);
    }
    Ok(Flow::Continue(0))
}

/// `wait` waits for every running job; `wait %N` or `wait PID` for one.
fn builtin_wait(args: &[String]) -> Result<Flow> {
    let blocked = MaskGuard::block(&signals::sigchld())?;
    let code = match args.first() {
        None => {
            waiter::wait_all(&blocked)?;
            0
        }
        Some(spec) => {
            // A job that already finished but was not announced yet still
            // resolves, and its status is returned right away.
            let cs = CriticalSection::enter()?;
            let id = registry::with_jobs(&cs, |jobs| jobs.resolve(spec))?;
            drop(cs);
            let id = id.ok_or_else(|| ShellError::UnknownJob { spec: spec.clone() })?;
            waiter::wait_job(&blocked, id)?.exit_code()
        }
    };
    blocked.restore()?;
    Ok(Flow::Continue(code))
}

/// Continues a job and waits for it as the foreground job.
fn builtin_fg(args: &[String]) -> Result<Flow> {
    let blocked = MaskGuard::block(&signals::sigchld())?;
    let (id, pid, command_line) = resolve_job(args.first())?;
    {
        let cs = CriticalSection::enter()?;
        registry::with_jobs(&cs, |jobs| jobs.set_foreground(id))?;
    }
    println!("{command_line}");
    kill(pid, Signal::SIGCONT).map_err(ShellError::sys("kill"))?;
    debug!(%id, %pid, "continued in foreground");

    let outcome = match waiter::wait_foreground(&blocked)? {
        Some((_, outcome)) => outcome,
        None => WaitOutcome::Terminated(waiter::wait_job(&blocked, id)?),
    };
    blocked.restore()?;
    if outcome == WaitOutcome::Stopped {
        println!("[{id}]+ Stopped {command_line}");
    }
    Ok(Flow::Continue(outcome.exit_code()))
}

/// Continues a stopped job in the background.
fn builtin_bg(args: &[String]) -> Result<Flow> {
    let (id, pid, command_line) = resolve_job(args.first())?;
    kill(pid, Signal::SIGCONT).map_err(ShellError::sys("kill"))?;
    println!("[{id}]+ {command_line} &");
    Ok(Flow::Continue(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_expands_to_home() {
        let home = env::var("HOME").unwrap_or_else(|_| "/".to_string());
        assert_eq!(expand_cd_arg("~"), home);
        assert_eq!(expand_cd_arg("~/src"), format!("{home}/src"));
        assert_eq!(expand_cd_arg("/tmp"), "/tmp");
    }

    #[test]
    fn unknown_names_fall_through() {
        let argv = vec!["ls".to_string(), "-l".to_string()];
        assert!(matches!(try_builtin(&argv), Ok(BuiltinResult::NotHandled)));
        assert!(matches!(try_builtin(&[]), Ok(BuiltinResult::NotHandled)));
    }

    #[test]
    fn cd_rejects_extra_arguments() {
        let args = vec!["a".to_string(), "b".to_string()];
        assert_eq!(builtin_cd(&args), Flow::Continue(1));
    }
}
