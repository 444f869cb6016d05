// Copyright © The Slate Developers. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A condition variable with signal-and-continue semantics, paired
//! with a binary [`Semaphore`] acting as the monitor mutex.
//!
//! `wait` queues the caller *before* releasing the mutex, all with
//! preemption disabled, so a signal between release and sleep cannot
//! be missed. Signalers keep the CPU; a woken waiter must reacquire
//! the mutex before its wait completes, and under the restart protocol
//! that spans several re-issued calls tracked by a per-thread phase.

use alloc::collections::VecDeque;

use hashbrown::HashMap;
use log::trace;

use crate::machine::{IntStatus, Machine};
use crate::scheduler::Kernel;
use crate::semaphore::{SemAcquire, Semaphore};
use crate::threads::Pid;

/// Outcome of a `wait` call under the restart protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CondWait {
    /// Signaled and holding the mutex again; the caller proceeds.
    Complete,
    /// Still waiting for a signal, or signaled but not yet holding the
    /// mutex. The caller slept; re-issue the call when it runs again.
    Waiting,
}

/// Where a waiter stands across re-issued `wait` calls.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum WaitPhase {
    /// Queued on the condition, mutex released, no signal yet.
    Queued,
    /// Signaled; must win the mutex back to complete.
    Reacquire,
}

#[derive(Default)]
pub struct CondVar {
    /// Threads waiting for a signal, woken in FIFO order.
    waiters: VecDeque<Pid>,
    phases: HashMap<Pid, WaitPhase>,
}

impl CondVar {
    pub fn new() -> CondVar {
        CondVar {
            waiters: VecDeque::new(),
            phases: HashMap::new(),
        }
    }

    pub fn has_waiters(&self) -> bool {
        !self.waiters.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn tracked_waiters(&self) -> usize {
        self.phases.len()
    }

    /// A signaled waiter can exit before its reacquire completes and
    /// would otherwise stay in the phase map forever; drop tracking
    /// for pids that have exited.
    fn prune_exited<M: Machine>(&mut self, kernel: &Kernel<M>) {
        self.waiters.retain(|&pid| !kernel.has_exited(pid));
        self.phases.retain(|&pid, _| !kernel.has_exited(pid));
    }

    /// Release `mutex`, sleep until signaled, reacquire `mutex`.
    ///
    /// The caller must hold `mutex`. Returns [`CondWait::Waiting`]
    /// every time the thread slept along the way; the trap layer keeps
    /// re-issuing the call until it gets [`CondWait::Complete`].
    pub fn wait<M: Machine>(
        &mut self,
        mutex: &mut Semaphore,
        kernel: &mut Kernel<M>,
    ) -> CondWait {
        let old_level = kernel.set_int_level(IntStatus::Off);
        self.prune_exited(kernel);
        let pid = kernel.current();
        let result = match self.phases.get(&pid) {
            None => {
                trace!("Thread {} waiting on condition", pid);
                self.phases.insert(pid, WaitPhase::Queued);
                self.waiters.push_back(pid);
                mutex.v(kernel);
                kernel.sleep();
                CondWait::Waiting
            }
            Some(WaitPhase::Queued) => {
                // Woken without a signal; keep waiting.
                kernel.sleep();
                CondWait::Waiting
            }
            Some(WaitPhase::Reacquire) => match mutex.p(kernel) {
                SemAcquire::Acquired => {
                    self.phases.remove(&pid);
                    trace!("Thread {} completed its wait", pid);
                    CondWait::Complete
                }
                SemAcquire::WouldBlock => CondWait::Waiting,
            },
        };
        kernel.set_int_level(old_level);
        result
    }

    /// Wake the longest-waiting thread, if any. The signaler keeps the
    /// CPU and (per signal-and-continue) typically still holds the
    /// mutex; the waiter contends for it when it runs.
    pub fn signal<M: Machine>(&mut self, kernel: &mut Kernel<M>) {
        let old_level = kernel.set_int_level(IntStatus::Off);
        self.prune_exited(kernel);
        if let Some(pid) = self.waiters.pop_front() {
            trace!("Signaling thread {}", pid);
            self.phases.insert(pid, WaitPhase::Reacquire);
            kernel.ready_to_run_locked(pid);
        }
        kernel.set_int_level(old_level);
    }

    /// Wake every waiter atomically. They reacquire the mutex one at a
    /// time as it becomes available.
    pub fn broadcast<M: Machine>(&mut self, kernel: &mut Kernel<M>) {
        let old_level = kernel.set_int_level(IntStatus::Off);
        self.prune_exited(kernel);
        while let Some(pid) = self.waiters.pop_front() {
            trace!("Broadcast waking thread {}", pid);
            self.phases.insert(pid, WaitPhase::Reacquire);
            kernel.ready_to_run_locked(pid);
        }
        kernel.set_int_level(old_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;
    use crate::scheduler::ROOT_PID;
    use crate::testing::kernel_with;
    use crate::threads::ThreadStatus;

    #[test]
    fn signal_with_no_waiter_is_lost() {
        let (mut kernel, _log) = kernel_with(Policy::Fcfs);
        let mut cond = CondVar::new();
        kernel.fork("other");

        cond.signal(&mut kernel);
        assert!(!cond.has_waiters());
        assert_eq!(kernel.current(), ROOT_PID);
    }

    #[test]
    fn wait_releases_the_mutex_and_signal_completes_one_waiter() {
        let (mut kernel, _log) = kernel_with(Policy::Fcfs);
        let mut mutex = Semaphore::new(1);
        let mut cond = CondVar::new();
        let waiter = kernel.fork("waiter");

        kernel.yield_now();
        assert_eq!(kernel.current(), waiter);
        assert_eq!(mutex.p(&mut kernel), SemAcquire::Acquired);
        assert_eq!(cond.wait(&mut mutex, &mut kernel), CondWait::Waiting);

        // The mutex was released before the waiter slept.
        assert_eq!(kernel.current(), ROOT_PID);
        assert_eq!(mutex.count(), 1);
        assert!(cond.has_waiters());

        assert_eq!(mutex.p(&mut kernel), SemAcquire::Acquired);
        cond.signal(&mut kernel);
        // Signal-and-continue: the signaler keeps running.
        assert_eq!(kernel.current(), ROOT_PID);
        assert_eq!(kernel.thread(waiter).unwrap().status(), ThreadStatus::Ready);

        mutex.v(&mut kernel);
        kernel.yield_now();
        assert_eq!(kernel.current(), waiter);
        assert_eq!(cond.wait(&mut mutex, &mut kernel), CondWait::Complete);
        assert_eq!(mutex.count(), 0, "the waiter holds the mutex again");
    }

    #[test]
    fn signaled_waiter_contends_for_a_held_mutex() {
        let (mut kernel, _log) = kernel_with(Policy::Fcfs);
        let mut mutex = Semaphore::new(1);
        let mut cond = CondVar::new();
        let waiter = kernel.fork("waiter");

        kernel.yield_now();
        assert_eq!(mutex.p(&mut kernel), SemAcquire::Acquired);
        assert_eq!(cond.wait(&mut mutex, &mut kernel), CondWait::Waiting);
        assert_eq!(kernel.current(), ROOT_PID);

        // Root holds the mutex across the signal.
        assert_eq!(mutex.p(&mut kernel), SemAcquire::Acquired);
        cond.signal(&mut kernel);
        kernel.yield_now();

        // The waiter runs, re-issues, and blocks on the mutex.
        assert_eq!(kernel.current(), waiter);
        assert_eq!(cond.wait(&mut mutex, &mut kernel), CondWait::Waiting);
        assert_eq!(kernel.current(), ROOT_PID);

        // Releasing the mutex wakes it; the next re-issue completes.
        mutex.v(&mut kernel);
        kernel.yield_now();
        assert_eq!(kernel.current(), waiter);
        assert_eq!(cond.wait(&mut mutex, &mut kernel), CondWait::Complete);
    }

    #[test]
    fn exited_waiter_leaves_no_tracking_behind() {
        let (mut kernel, _log) = kernel_with(Policy::Fcfs);
        let mut mutex = Semaphore::new(1);
        let mut cond = CondVar::new();
        let waiter = kernel.fork("waiter");

        kernel.yield_now();
        assert_eq!(kernel.current(), waiter);
        assert_eq!(mutex.p(&mut kernel), SemAcquire::Acquired);
        assert_eq!(cond.wait(&mut mutex, &mut kernel), CondWait::Waiting);
        assert_eq!(kernel.current(), ROOT_PID);

        cond.signal(&mut kernel);
        assert_eq!(cond.tracked_waiters(), 1);
        kernel.yield_now();

        // The signaled waiter exits instead of finishing its wait.
        assert_eq!(kernel.current(), waiter);
        kernel.exit(0, false);
        assert_eq!(kernel.current(), ROOT_PID);

        cond.signal(&mut kernel);
        assert_eq!(cond.tracked_waiters(), 0);
        assert!(!cond.has_waiters());
    }

    #[test]
    fn broadcast_wakes_every_waiter() {
        let (mut kernel, _log) = kernel_with(Policy::Fcfs);
        let mut mutex = Semaphore::new(1);
        let mut cond = CondVar::new();
        let a = kernel.fork("a");
        let b = kernel.fork("b");

        kernel.yield_now();
        assert_eq!(kernel.current(), a);
        assert_eq!(mutex.p(&mut kernel), SemAcquire::Acquired);
        assert_eq!(cond.wait(&mut mutex, &mut kernel), CondWait::Waiting);

        assert_eq!(kernel.current(), b);
        assert_eq!(mutex.p(&mut kernel), SemAcquire::Acquired);
        assert_eq!(cond.wait(&mut mutex, &mut kernel), CondWait::Waiting);

        assert_eq!(kernel.current(), ROOT_PID);
        cond.broadcast(&mut kernel);
        assert!(!cond.has_waiters());
        assert_eq!(kernel.thread(a).unwrap().status(), ThreadStatus::Ready);
        assert_eq!(kernel.thread(b).unwrap().status(), ThreadStatus::Ready);

        // They reacquire the mutex one at a time, in wake order.
        kernel.yield_now();
        assert_eq!(kernel.current(), a);
        assert_eq!(cond.wait(&mut mutex, &mut kernel), CondWait::Complete);
        mutex.v(&mut kernel);
        kernel.yield_now();
        assert_eq!(kernel.current(), b);
        assert_eq!(cond.wait(&mut mutex, &mut kernel), CondWait::Complete);
    }
}
