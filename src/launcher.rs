use std::convert::Infallible;
use std::ffi::CString;

use nix::errno::Errno;
use nix::unistd::{execvp, execvpe, fork, setpgid, ForkResult, Pid};
use tracing::debug;

use crate::error::{Result, ShellError};
use crate::signals::{self, MaskGuard};

/// Exit status of a child whose program could not be started.
pub const LAUNCH_FAILURE: i32 = 127;

/// An external command, converted to C strings before forking so the child
/// does not have to allocate.
#[derive(Debug, Clone)]
pub struct Command {
    program: CString,
    args: Vec<CString>,
    env: Option<Vec<CString>>,
    own_group: bool,
    command_line: String,
}

impl Command {
    /// `argv[0]` is the program; it is looked up in `PATH` by `execvp`.
    pub fn new<S: AsRef<str>>(argv: &[S]) -> Result<Command> {
        let command_line = argv
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(" ");
        let args = argv
            .iter()
            .map(|a| CString::new(a.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|source| ShellError::Launch {
                command: command_line.clone(),
                source,
            })?;
        let program = args.first().cloned().unwrap_or_default();
        Ok(Command {
            program,
            args,
            env: None,
            own_group: false,
            command_line,
        })
    }

    /// Replaces the inherited environment with `KEY=VALUE` pairs.
    pub fn env<S: AsRef<str>>(mut self, vars: &[S]) -> Result<Command> {
        let env = vars
            .iter()
            .map(|v| CString::new(v.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|source| ShellError::Launch {
                command: self.command_line.clone(),
                source,
            })?;
        self.env = Some(env);
        Ok(self)
    }

    /// Runs the child in a process group of its own, out of reach of
    /// keyboard-generated signals.
    pub fn own_process_group(mut self, yes: bool) -> Command {
        self.own_group = yes;
        self
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn program(&self) -> &str {
        self.program.to_str().unwrap_or("?")
    }
}

/// Forks and execs `command`, returning the child's pid in the parent.
///
/// `blocked` must be the guard holding `SIGCHLD` blocked across this call and
/// the job table insertion that follows; otherwise the child could be reaped
/// before it is registered. The child puts back `blocked.previous()` before
/// exec, since exec keeps whatever mask it inherits.
pub fn spawn(command: &Command, blocked: &MaskGuard) -> Result<Pid> {
    // SAFETY: the child only makes async-signal-safe calls until exec, apart
    // from reporting a failed exec right before `_exit`.
    match unsafe { fork() }.map_err(ShellError::sys("fork"))? {
        ForkResult::Parent { child } => {
            if command.own_group {
                // Also done in the child; whichever runs first wins. EACCES
                // means the child already exec'd and did it itself.
                match setpgid(child, child) {
                    Ok(()) | Err(Errno::EACCES) => {}
                    Err(errno) => debug!(%child, %errno, "setpgid in parent failed"),
                }
            }
            debug!(%child, command = command.command_line(), "forked");
            Ok(child)
        }
        ForkResult::Child => exec_child(command, blocked),
    }
}

fn exec_child(command: &Command, blocked: &MaskGuard) -> ! {
    if command.own_group {
        let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
    }
    signals::restore_default_dispositions();
    let _ = signals::set_mask(blocked.previous());

    let result: nix::Result<Infallible> = match &command.env {
        None => execvp(&command.program, &command.args),
        Some(env) => execvpe(&command.program, &command.args, env),
    };
    let errno = match result {
        Ok(never) => match never {},
        Err(errno) => errno,
    };
    eprintln!("jobsh: {}: {}", command.program(), errno.desc());
    // SAFETY: leaves without running the parent's atexit handlers or
    // flushing buffers inherited from it.
    unsafe { libc::_exit(LAUNCH_FAILURE) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_joins_argv() {
        let cmd = Command::new(&["sleep", "10"]).unwrap();
        assert_eq!(cmd.command_line(), "sleep 10");
        assert_eq!(cmd.program(), "sleep");
    }

    #[test]
    fn interior_nul_is_a_launch_error() {
        let err = Command::new(&["ec\0ho"]).unwrap_err();
        assert!(matches!(err, ShellError::Launch { .. }));
    }
}
