//! Job control for a small Unix shell.
//!
//! Children are forked with `SIGCHLD` blocked, registered in a job table, and
//! reaped asynchronously by a `SIGCHLD` handler that drains every finished
//! child per delivery. Signal masking is the only thing standing between the
//! prompt loop and the handler; see [`signals::CriticalSection`].

pub mod builtins;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod launcher;
pub mod parser;
pub mod reaper;
pub mod registry;
pub mod signals;
pub mod waiter;

pub use error::{JobError, Result, ShellError};

/// Sizes the job table and installs the `SIGCHLD` handler.
///
/// Must run before the first child is forked.
pub fn init(max_jobs: usize) -> Result<()> {
    let cs = signals::CriticalSection::enter()?;
    registry::init(&cs, max_jobs)?;
    drop(cs);
    reaper::install()
}
