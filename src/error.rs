use nix::errno::Errno;
use nix::unistd::Pid;

/// Job table consistency errors.
///
/// `Duplicate`, `NotFound` and `Busy` are internal-logic violations: they mean
/// a caller broke the registration protocol, not that the user did something
/// wrong.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("pid {pid} is already registered")]
    Duplicate { pid: Pid },

    #[error("pid {pid} is not in the job table")]
    NotFound { pid: Pid },

    #[error("too many jobs (max {capacity})")]
    Full { capacity: usize },

    #[error("job table entered while already in use")]
    Busy,
}

/// Errors returned on the shell's normal control-flow path.
#[derive(thiserror::Error, Debug)]
pub enum ShellError {
    #[error("{op} failed: {source}")]
    Sys {
        op: &'static str,
        #[source]
        source: Errno,
    },

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("cannot launch {command}: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::ffi::NulError,
    },

    #[error("no such job: {spec}")]
    UnknownJob { spec: String },
}

impl ShellError {
    pub(crate) fn sys(op: &'static str) -> impl FnOnce(Errno) -> ShellError {
        move |source| ShellError::Sys { op, source }
    }
}

pub type Result<T> = std::result::Result<T, ShellError>;
