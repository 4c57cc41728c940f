use std::fmt;

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use crate::error::JobError;

/// Shell-assigned job number. Starts at 1, increases monotonically and is
/// never reused, unlike the pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(Signal),
}

impl Termination {
    /// Returns `None` for statuses that do not end the child.
    pub fn from_wait_status(status: &WaitStatus) -> Option<Termination> {
        match *status {
            WaitStatus::Exited(_, code) => Some(Termination::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(Termination::Signaled(signal)),
            _ => None,
        }
    }

    /// Shell-style `$?` value.
    pub fn exit_code(&self) -> i32 {
        match *self {
            Termination::Exited(code) => code,
            Termination::Signaled(signal) => 128 + signal as i32,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(0) => write!(f, "done"),
            Termination::Exited(code) => write!(f, "exit {code}"),
            Termination::Signaled(signal) => write!(f, "{}", signal.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    /// Only ever seen on jobs that have already left the live table.
    Terminated(Termination),
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Running => write!(f, "Running"),
            JobState::Stopped => write!(f, "Stopped"),
            JobState::Terminated(t) => write!(f, "{t}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub pid: Pid,
    pub command_line: String,
    pub state: JobState,
}

impl Job {
    pub fn termination(&self) -> Option<Termination> {
        match self.state {
            JobState::Terminated(t) => Some(t),
            _ => None,
        }
    }
}

/// Children that have been forked and not yet reaped, plus reaped jobs whose
/// outcome nobody has collected yet.
///
/// `live` holds exactly the unreaped children. Reaping moves an entry into
/// `retired` instead of dropping it, and both vectors are allocated up front,
/// so the SIGCHLD handler can update the table without touching the
/// allocator. Insertion refuses once `live + retired` reaches capacity, which
/// keeps that true.
#[derive(Debug)]
pub struct JobTable {
    next_id: usize,
    capacity: usize,
    live: Vec<Job>,
    retired: Vec<Job>,
    foreground: Option<JobId>,
}

impl Default for JobTable {
    fn default() -> Self {
        JobTable::empty()
    }
}

impl JobTable {
    /// A table that accepts no jobs until replaced by [`JobTable::with_capacity`].
    pub const fn empty() -> Self {
        JobTable {
            next_id: 1,
            capacity: 0,
            live: Vec::new(),
            retired: Vec::new(),
            foreground: None,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        JobTable {
            next_id: 1,
            capacity,
            live: Vec::with_capacity(capacity),
            retired: Vec::with_capacity(capacity),
            foreground: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live (unreaped) jobs.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Checks there is room for one more job. Call before forking.
    pub fn reserve(&self) -> Result<(), JobError> {
        if self.live.len() + self.retired.len() < self.capacity {
            Ok(())
        } else {
            Err(JobError::Full {
                capacity: self.capacity,
            })
        }
    }

    pub fn insert(
        &mut self,
        pid: Pid,
        command_line: String,
        foreground: bool,
    ) -> Result<JobId, JobError> {
        if self.lookup(pid).is_some() {
            return Err(JobError::Duplicate { pid });
        }
        self.reserve()?;
        let id = JobId(self.next_id);
        self.next_id += 1;
        self.live.push(Job {
            id,
            pid,
            command_line,
            state: JobState::Running,
        });
        if foreground {
            self.foreground = Some(id);
        }
        Ok(id)
    }

    /// Removes a live job and hands it back to the caller.
    ///
    /// Dropping the returned job frees its command line, so the signal handler
    /// uses [`JobTable::retire`] instead.
    pub fn delete(&mut self, pid: Pid) -> Result<Job, JobError> {
        let index = self
            .live
            .iter()
            .position(|j| j.pid == pid)
            .ok_or(JobError::NotFound { pid })?;
        let job = self.live.remove(index);
        if self.foreground == Some(job.id) {
            self.foreground = None;
        }
        Ok(job)
    }

    /// Moves a reaped child from the live set into the retired buffer.
    ///
    /// Never allocates or frees.
    pub fn retire(&mut self, pid: Pid, termination: Termination) -> Result<JobId, JobError> {
        let mut job = self.delete(pid)?;
        job.state = JobState::Terminated(termination);
        let id = job.id;
        debug_assert!(self.retired.len() < self.retired.capacity());
        self.retired.push(job);
        Ok(id)
    }

    /// Records a stop or continue. A stopped job gives up the foreground.
    pub fn set_state(&mut self, pid: Pid, state: JobState) -> Result<(), JobError> {
        let job = self
            .live
            .iter_mut()
            .find(|j| j.pid == pid)
            .ok_or(JobError::NotFound { pid })?;
        job.state = state;
        if state == JobState::Stopped && self.foreground == Some(job.id) {
            self.foreground = None;
        }
        Ok(())
    }

    pub fn lookup(&self, pid: Pid) -> Option<&Job> {
        self.live.iter().find(|j| j.pid == pid)
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.live.iter().find(|j| j.id == id)
    }

    pub fn foreground(&self) -> Option<JobId> {
        self.foreground
    }

    /// Hands the foreground to a live job and returns its pid.
    pub fn set_foreground(&mut self, id: JobId) -> Option<Pid> {
        let pid = self.get(id)?.pid;
        self.foreground = Some(id);
        Some(pid)
    }

    /// The most recently started live job.
    pub fn latest(&self) -> Option<JobId> {
        self.live.last().map(|j| j.id)
    }

    pub fn has_running(&self) -> bool {
        self.live.iter().any(|j| j.state == JobState::Running)
    }

    pub fn stopped(&self) -> Vec<(JobId, Pid)> {
        self.live
            .iter()
            .filter(|j| j.state == JobState::Stopped)
            .map(|j| (j.id, j.pid))
            .collect()
    }

    /// Live jobs in the order they were started.
    pub fn snapshot(&self) -> Vec<Job> {
        self.live.clone()
    }

    /// Takes the outcome of one reaped job.
    pub fn take_retired(&mut self, id: JobId) -> Option<Job> {
        let index = self.retired.iter().position(|j| j.id == id)?;
        Some(self.retired.remove(index))
    }

    /// Takes every uncollected outcome, oldest first.
    pub fn drain_retired(&mut self) -> Vec<Job> {
        self.retired.drain(..).collect()
    }

    /// Resolves `%N` as a job number and a bare number as a pid. A pid that
    /// is no longer live falls back to the newest uncollected job that had it.
    pub fn resolve(&self, spec: &str) -> Option<JobId> {
        if let Some(number) = spec.strip_prefix('%') {
            let id = JobId(number.parse().ok()?);
            let known = self.get(id).is_some() || self.retired.iter().any(|j| j.id == id);
            return known.then_some(id);
        }
        let pid = Pid::from_raw(spec.parse().ok()?);
        self.lookup(pid)
            .or_else(|| self.retired.iter().rev().find(|j| j.pid == pid))
            .map(|j| j.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: i32) -> Pid {
        Pid::from_raw(n)
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let mut table = JobTable::with_capacity(4);
        let a = table.insert(pid(100), "sleep 1".into(), false).unwrap();
        let b = table.insert(pid(101), "sleep 2".into(), false).unwrap();
        assert_eq!(a, JobId(1));
        assert_eq!(b, JobId(2));
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(pid(101)).unwrap().command_line, "sleep 2");
    }

    #[test]
    fn duplicate_live_pid_is_rejected() {
        let mut table = JobTable::with_capacity(4);
        table.insert(pid(100), "a".into(), false).unwrap();
        assert_eq!(
            table.insert(pid(100), "b".into(), false),
            Err(JobError::Duplicate { pid: pid(100) })
        );
    }

    #[test]
    fn delete_of_unknown_pid_is_an_error() {
        let mut table = JobTable::with_capacity(4);
        assert_eq!(
            table.delete(pid(7)),
            Err(JobError::NotFound { pid: pid(7) })
        );
    }

    #[test]
    fn retire_moves_job_out_of_live_set() {
        let mut table = JobTable::with_capacity(4);
        let id = table.insert(pid(100), "true".into(), true).unwrap();
        assert_eq!(table.foreground(), Some(id));

        table.retire(pid(100), Termination::Exited(0)).unwrap();
        assert!(table.lookup(pid(100)).is_none());
        assert!(table.is_empty());
        assert_eq!(table.foreground(), None);

        let job = table.take_retired(id).unwrap();
        assert_eq!(job.termination(), Some(Termination::Exited(0)));
        assert!(table.take_retired(id).is_none());
    }

    #[test]
    fn reused_pid_maps_to_new_job() {
        let mut table = JobTable::with_capacity(4);
        let old = table.insert(pid(100), "first".into(), false).unwrap();
        table.retire(pid(100), Termination::Exited(1)).unwrap();
        let new = table.insert(pid(100), "second".into(), false).unwrap();

        assert_ne!(old, new);
        assert_eq!(table.lookup(pid(100)).unwrap().id, new);
        assert_eq!(table.take_retired(old).unwrap().command_line, "first");
    }

    #[test]
    fn uncollected_outcomes_count_against_capacity() {
        let mut table = JobTable::with_capacity(2);
        table.insert(pid(1), "a".into(), false).unwrap();
        table.insert(pid(2), "b".into(), false).unwrap();
        assert_eq!(table.reserve(), Err(JobError::Full { capacity: 2 }));

        table.retire(pid(1), Termination::Exited(0)).unwrap();
        assert!(table.reserve().is_err());

        let done = table.drain_retired();
        assert_eq!(done.len(), 1);
        assert!(table.reserve().is_ok());
    }

    #[test]
    fn empty_table_accepts_nothing() {
        let mut table = JobTable::empty();
        assert_eq!(
            table.insert(pid(1), "a".into(), false),
            Err(JobError::Full { capacity: 0 })
        );
    }

    #[test]
    fn stop_releases_foreground_and_continue_keeps_job() {
        let mut table = JobTable::with_capacity(4);
        let id = table.insert(pid(100), "vim".into(), true).unwrap();
        table.set_state(pid(100), JobState::Stopped).unwrap();
        assert_eq!(table.foreground(), None);
        assert!(!table.has_running());

        assert_eq!(table.stopped(), [(id, pid(100))]);

        table.set_state(pid(100), JobState::Running).unwrap();
        assert!(table.has_running());
        assert!(table.stopped().is_empty());
        assert_eq!(table.get(id).unwrap().state, JobState::Running);

        assert_eq!(table.set_foreground(id), Some(pid(100)));
        assert_eq!(table.foreground(), Some(id));
        assert_eq!(table.set_foreground(JobId(9)), None);
    }

    #[test]
    fn snapshot_keeps_start_order() {
        let mut table = JobTable::with_capacity(4);
        table.insert(pid(30), "c".into(), false).unwrap();
        table.insert(pid(10), "a".into(), false).unwrap();
        table.insert(pid(20), "b".into(), false).unwrap();
        table.retire(pid(10), Termination::Exited(0)).unwrap();

        let lines: Vec<_> = table
            .snapshot()
            .into_iter()
            .map(|j| j.command_line)
            .collect();
        assert_eq!(lines, ["c", "b"]);
    }

    #[test]
    fn resolve_accepts_job_numbers_and_pids() {
        let mut table = JobTable::with_capacity(4);
        let id = table.insert(pid(4242), "sleep 9".into(), false).unwrap();
        assert_eq!(table.resolve("%1"), Some(id));
        assert_eq!(table.resolve("4242"), Some(id));
        assert_eq!(table.resolve("%2"), None);
        assert_eq!(table.resolve("nope"), None);
    }

    #[test]
    fn finished_job_still_resolves_by_pid() {
        let mut table = JobTable::with_capacity(4);
        let first = table.insert(pid(4242), "sleep 1".into(), false).unwrap();
        table.retire(pid(4242), Termination::Exited(0)).unwrap();
        assert_eq!(table.resolve("%1"), Some(first));
        assert_eq!(table.resolve("4242"), Some(first));

        let second = table.insert(pid(4242), "sleep 2".into(), false).unwrap();
        assert_eq!(table.resolve("4242"), Some(second));
        table.retire(pid(4242), Termination::Exited(1)).unwrap();
        assert_eq!(table.resolve("4242"), Some(second));
    }

    #[test]
    fn termination_exit_codes() {
        assert_eq!(Termination::Exited(3).exit_code(), 3);
        assert_eq!(Termination::Signaled(Signal::SIGTERM).exit_code(), 143);
        assert_eq!(Termination::Exited(0).to_string(), "done");
        assert_eq!(Termination::Signaled(Signal::SIGKILL).to_string(), "SIGKILL");
    }
}
