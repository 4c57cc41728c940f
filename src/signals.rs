//! Signal masking for the calling thread.

use nix::errno::Errno;
use nix::sys::signal::{
    pthread_sigmask, sigaction, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};

use crate::error::{Result, ShellError};

/// Signals the shell ignores so that keyboard job control only hits children.
const JOB_CONTROL_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTSTP, Signal::SIGTTOU];

pub fn sigchld() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    set
}

pub fn current_mask() -> Result<SigSet> {
    let mut current = SigSet::empty();
    pthread_sigmask(SigmaskHow::SIG_BLOCK, None, Some(&mut current))
        .map_err(ShellError::sys("sigprocmask"))?;
    Ok(current)
}

pub fn set_mask(mask: &SigSet) -> Result<()> {
    pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(mask), None)
        .map_err(ShellError::sys("sigprocmask"))
}

/// Blocks signals until dropped, then puts back the mask it replaced.
#[must_use = "the mask is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct MaskGuard {
    previous: SigSet,
    restored: bool,
}

impl MaskGuard {
    pub fn block(kinds: &SigSet) -> Result<MaskGuard> {
        let mut previous = SigSet::empty();
        pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(kinds), Some(&mut previous))
            .map_err(ShellError::sys("sigprocmask"))?;
        Ok(MaskGuard {
            previous,
            restored: false,
        })
    }

    pub fn block_all() -> Result<MaskGuard> {
        MaskGuard::block(&SigSet::all())
    }

    pub fn previous(&self) -> &SigSet {
        &self.previous
    }

    /// Like dropping the guard, but reports failure.
    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        set_mask(&self.previous)
    }
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        if !self.restored {
            let _ = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
        }
    }
}

/// Every signal blocked; the only lock the job table has.
#[derive(Debug)]
pub struct CriticalSection {
    _mask: MaskGuard,
}

impl CriticalSection {
    pub fn enter() -> Result<CriticalSection> {
        Ok(CriticalSection {
            _mask: MaskGuard::block_all()?,
        })
    }
}

/// Atomically unblocks `SIGCHLD` and sleeps until some handler has run.
///
/// `blocked` must be the guard keeping `SIGCHLD` blocked.
pub fn suspend(blocked: &MaskGuard) -> Result<()> {
    // A pending SIGCHLD is delivered as soon as this mask is in place.
    let mut wake_on = *blocked.previous();
    wake_on.remove(Signal::SIGCHLD);
    // SAFETY: sigsuspend only reads the mask it is given.
    let rc = unsafe { libc::sigsuspend(wake_on.as_ref()) };
    debug_assert_eq!(rc, -1);
    match Errno::last() {
        Errno::EINTR => Ok(()),
        source => Err(ShellError::Sys {
            op: "sigsuspend",
            source,
        }),
    }
}

/// The handler runs with every signal blocked.
pub fn install_sigchld_handler(handler: extern "C" fn(libc::c_int)) -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::SA_RESTART,
        SigSet::all(),
    );
    // SAFETY: the handler only calls async-signal-safe functions.
    unsafe { sigaction(Signal::SIGCHLD, &action) }
        .map(drop)
        .map_err(ShellError::sys("sigaction"))
}

/// Makes the shell itself immune to Ctrl-C, Ctrl-Z and background tty writes.
pub fn ignore_job_control_signals() -> Result<()> {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    for signal in JOB_CONTROL_SIGNALS {
        // SAFETY: SIG_IGN installs no code.
        unsafe { sigaction(signal, &ignore) }.map_err(ShellError::sys("sigaction"))?;
    }
    Ok(())
}

/// Runs in the child between fork and exec; ignored signals survive `execve`.
pub fn restore_default_dispositions() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in JOB_CONTROL_SIGNALS.into_iter().chain([Signal::SIGCHLD]) {
        // SAFETY: SIG_DFL installs no code.
        let _ = unsafe { sigaction(signal, &default) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BLOCKABLE: [Signal; 14] = [
        Signal::SIGHUP,
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGUSR1,
        Signal::SIGUSR2,
        Signal::SIGPIPE,
        Signal::SIGALRM,
        Signal::SIGTERM,
        Signal::SIGCHLD,
        Signal::SIGCONT,
        Signal::SIGTSTP,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
        Signal::SIGWINCH,
    ];

    fn set_from_bits(bits: u16) -> SigSet {
        let mut set = SigSet::empty();
        for (i, signal) in BLOCKABLE.iter().enumerate() {
            if bits & (1 << i) != 0 {
                set.add(*signal);
            }
        }
        set
    }

    fn same_signals(a: &SigSet, b: &SigSet) -> bool {
        Signal::iterator().all(|s| a.contains(s) == b.contains(s))
    }

    proptest! {
        #[test]
        fn block_then_restore_leaves_mask_unchanged(start in any::<u16>(), kinds in any::<u16>()) {
            let original = current_mask().unwrap();
            set_mask(&set_from_bits(start)).unwrap();
            let before = current_mask().unwrap();

            let guard = MaskGuard::block(&set_from_bits(kinds)).unwrap();
            guard.restore().unwrap();
            let after = current_mask().unwrap();

            set_mask(&original).unwrap();
            prop_assert!(same_signals(&before, &after));
        }
    }

    #[test]
    fn guard_blocks_until_dropped() {
        let original = current_mask().unwrap();
        set_mask(&SigSet::empty()).unwrap();
        {
            let guard = MaskGuard::block(&sigchld()).unwrap();
            assert!(current_mask().unwrap().contains(Signal::SIGCHLD));
            assert!(!guard.previous().contains(Signal::SIGCHLD));
        }
        assert!(!current_mask().unwrap().contains(Signal::SIGCHLD));
        set_mask(&original).unwrap();
    }

    #[test]
    fn nested_guards_unwind_in_order() {
        let original = current_mask().unwrap();
        set_mask(&SigSet::empty()).unwrap();
        let outer = MaskGuard::block(&sigchld()).unwrap();
        {
            let _cs = CriticalSection::enter().unwrap();
            assert!(current_mask().unwrap().contains(Signal::SIGTERM));
        }
        let mask = current_mask().unwrap();
        assert!(mask.contains(Signal::SIGCHLD));
        assert!(!mask.contains(Signal::SIGTERM));
        drop(outer);
        assert!(same_signals(&current_mask().unwrap(), &SigSet::empty()));
        set_mask(&original).unwrap();
    }
}
