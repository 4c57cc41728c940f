//! The shell's one job table.
//!
//! There is no lock. The table is written from normal code and from the
//! SIGCHLD handler on the same thread, and both only touch it inside a
//! [`CriticalSection`], which keeps the handler from starting. The `in_use`
//! flag never waits; it only turns a broken masking discipline into
//! [`JobError::Busy`] instead of two live `&mut` to the same table.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::JobError;
use crate::job::JobTable;
use crate::signals::CriticalSection;

struct Registry {
    in_use: AtomicBool,
    table: UnsafeCell<JobTable>,
}

// SAFETY: access is serialized by `in_use`, and callers hold every signal
// blocked while they have it.
unsafe impl Sync for Registry {}

static REGISTRY: Registry = Registry {
    in_use: AtomicBool::new(false),
    table: UnsafeCell::new(JobTable::empty()),
};

struct Borrow;

impl Borrow {
    fn acquire() -> Result<Borrow, JobError> {
        REGISTRY
            .in_use
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| Borrow)
            .map_err(|_| JobError::Busy)
    }
}

impl Drop for Borrow {
    fn drop(&mut self) {
        REGISTRY.in_use.store(false, Ordering::Release);
    }
}

/// Runs `f` on the job table.
///
/// The `CriticalSection` argument is proof that all signals are blocked.
pub fn with_jobs<R>(
    _blocked: &CriticalSection,
    f: impl FnOnce(&mut JobTable) -> R,
) -> Result<R, JobError> {
    let _borrow = Borrow::acquire()?;
    // SAFETY: `_borrow` is the only outstanding borrow of the table.
    let table = unsafe { &mut *REGISTRY.table.get() };
    Ok(f(table))
}

/// Like [`with_jobs`] for closures that can themselves fail.
pub fn try_with_jobs<R>(
    blocked: &CriticalSection,
    f: impl FnOnce(&mut JobTable) -> Result<R, JobError>,
) -> Result<R, JobError> {
    with_jobs(blocked, f)?
}

/// Replaces the table with an empty one that can hold `capacity` jobs.
///
/// Called once at startup, before the SIGCHLD handler is installed.
pub fn init(blocked: &CriticalSection, capacity: usize) -> Result<(), JobError> {
    with_jobs(blocked, |table| *table = JobTable::with_capacity(capacity))
}
