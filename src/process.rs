// Copyright © The Slate Developers. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process lifecycle: fork, exit and join.
//!
//! Children are tracked in the parent's child table in creation order.
//! An exiting thread records its code with its parent (if any), wakes a
//! parent blocked in `join`, and marks itself for deferred destruction;
//! the record and context are reclaimed after the next dispatch. The
//! exit code stays cached in the parent's table, so joining the same
//! child twice yields the same code.

use log::trace;

use crate::error::KError;
use crate::machine::{IntStatus, Machine};
use crate::scheduler::{Kernel, ROOT_PID};
use crate::threads::{Pid, ThreadStatus};

/// Outcome of a `join` call under the restart protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinResult {
    /// The child has exited with this code.
    Exited(i32),
    /// The child is still live; the caller slept and must re-issue the
    /// call now that it has been dispatched again.
    Pending,
}

impl<M: Machine> Kernel<M> {
    /// Fork a child of the current thread with default priority and
    /// make it ready. Returns the child's pid; the caller keeps the
    /// CPU.
    pub fn fork(&mut self, entry: M::Entry) -> Pid {
        self.fork_with(entry, 0, false)
    }

    /// Fork with a nice offset on the base priority. An `orphan` child
    /// is not registered in the caller's child table and cannot be
    /// joined.
    pub fn fork_with(&mut self, entry: M::Entry, nice: i64, orphan: bool) -> Pid {
        let old_level = self.set_int_level(IntStatus::Off);
        let parent = self.current;
        let child = self.allocate_thread(Some(parent), nice, entry);
        if !orphan {
            self.threads
                .get_mut(&parent)
                .expect("Can't find thread state?")
                .register_child(child);
        }
        trace!("Thread {} forked thread {}", parent, child);
        self.ready_to_run_locked(child);
        self.set_int_level(old_level);
        child
    }

    /// Terminate the current thread.
    ///
    /// The exit code is recorded with the parent (when one is live) and
    /// a parent blocked joining this thread is woken. The carcass is
    /// reclaimed after the dispatch away from it. When this was the
    /// last live thread and `terminate_if_last` is set the simulation
    /// halts immediately; otherwise the kernel dispatches or idles as
    /// usual.
    pub fn exit(&mut self, code: i32, terminate_if_last: bool) {
        let old_level = self.set_int_level(IntStatus::Off);
        let pid = self.current;
        trace!("Thread {} exiting with code {}", pid, code);

        self.finish_burst(pid);
        let now = self.now();
        let (ppid, turnaround, wait) = {
            let t = self
                .threads
                .get_mut(&pid)
                .expect("Can't find thread state?");
            t.status = ThreadStatus::Blocked;
            t.block_start = now;
            t.total_time = now - t.created_at;
            (t.ppid, t.total_time, t.wait_time)
        };
        if pid != ROOT_PID {
            self.stats.record_exit(turnaround, wait, now);
        }

        self.exited[pid.0] = true;
        self.live -= 1;
        self.to_destroy = Some(pid);

        if let Some(ppid) = ppid {
            let waiting = match self.threads.get_mut(&ppid) {
                Some(parent) if parent.is_child(pid) => {
                    parent.set_child_exit_code(pid, code);
                    parent.waiting_on_child == Some(pid)
                }
                _ => false,
            };
            if waiting {
                trace!("Waking thread {} joined on {}", ppid, pid);
                self.ready_to_run_locked(ppid);
            }
        }

        loop {
            if let Some(next) = self.find_next_to_run() {
                self.run(next);
                break;
            }
            if self.live == 0 && terminate_if_last {
                self.halt();
                break;
            }
            if !self.idle() {
                break;
            }
        }
        self.set_int_level(old_level);
    }

    /// Wait for a child to exit.
    ///
    /// Fails for pids that were never allocated or never registered as
    /// the caller's children. A call on an exited child returns the
    /// cached code, every time. A call on a live child blocks the
    /// caller and returns [`JoinResult::Pending`]; re-issue the call
    /// once it runs again.
    pub fn join(&mut self, child: Pid) -> Result<JoinResult, KError> {
        let old_level = self.set_int_level(IntStatus::Off);
        let result = self.join_locked(child);
        self.set_int_level(old_level);
        result
    }

    fn join_locked(&mut self, child: Pid) -> Result<JoinResult, KError> {
        let pid = self.current;
        if child.0 >= self.next_pid {
            return Err(KError::UnknownPid { pid: child });
        }
        let caller = self.threads.get(&pid).expect("Can't find thread state?");
        if !caller.is_child(child) {
            return Err(KError::NotAChild { pid: child });
        }
        if let Some(code) = caller.child_exit_code(child) {
            let caller = self
                .threads
                .get_mut(&pid)
                .expect("Can't find thread state?");
            if caller.waiting_on_child == Some(child) {
                caller.waiting_on_child = None;
            }
            return Ok(JoinResult::Exited(code));
        }

        trace!("Thread {} joining on live child {}", pid, child);
        self.threads
            .get_mut(&pid)
            .expect("Can't find thread state?")
            .waiting_on_child = Some(child);
        self.sleep();
        Ok(JoinResult::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;
    use crate::testing::{kernel_with, Event};

    #[test]
    fn fork_readies_the_child_and_keeps_the_cpu() {
        let (mut kernel, log) = kernel_with(Policy::Fcfs);
        let child = kernel.fork("child");

        assert_eq!(kernel.current(), ROOT_PID);
        assert_eq!(kernel.ready_pids(), vec![child]);
        assert_eq!(
            kernel.thread(child).unwrap().status(),
            ThreadStatus::Ready
        );
        assert!(log.borrow().contains(&Event::Prepared(child)));
    }

    #[test]
    fn join_on_an_exited_child_returns_the_code_without_blocking() {
        let (mut kernel, _log) = kernel_with(Policy::Fcfs);
        let child = kernel.fork("child");
        kernel.yield_now();
        assert_eq!(kernel.current(), child);
        kernel.exit(7, false);

        assert_eq!(kernel.current(), ROOT_PID);
        assert_eq!(kernel.join(child), Ok(JoinResult::Exited(7)));
        // The code stays cached: a second join sees it again.
        assert_eq!(kernel.join(child), Ok(JoinResult::Exited(7)));
    }

    #[test]
    fn join_on_a_live_child_blocks_until_its_exit() {
        let (mut kernel, _log) = kernel_with(Policy::Fcfs);
        let child = kernel.fork("child");

        assert_eq!(kernel.join(child), Ok(JoinResult::Pending));
        // The sleeping join dispatched the child.
        assert_eq!(kernel.current(), child);
        assert_eq!(
            kernel.thread(ROOT_PID).unwrap().status(),
            ThreadStatus::Blocked
        );

        kernel.advance(25);
        kernel.exit(7, false);

        // The exit woke the parent; the re-issued call gets the code.
        assert_eq!(kernel.current(), ROOT_PID);
        assert_eq!(kernel.join(child), Ok(JoinResult::Exited(7)));
        assert_eq!(kernel.thread(ROOT_PID).unwrap().block_time(), 25);
    }

    #[test]
    fn join_rejects_strangers_and_unknown_pids() {
        let (mut kernel, _log) = kernel_with(Policy::Fcfs);
        let orphan = kernel.fork_with("orphan", 0, true);

        assert_eq!(
            kernel.join(orphan),
            Err(KError::NotAChild { pid: orphan })
        );
        assert_eq!(
            kernel.join(Pid(42)),
            Err(KError::UnknownPid { pid: Pid(42) })
        );
    }

    #[test]
    fn grandchild_is_not_joinable_by_the_root() {
        let (mut kernel, _log) = kernel_with(Policy::Fcfs);
        let child = kernel.fork("child");
        kernel.yield_now();
        assert_eq!(kernel.current(), child);
        let grandchild = kernel.fork("grandchild");
        kernel.yield_now();
        assert_eq!(kernel.current(), ROOT_PID);

        assert_eq!(
            kernel.join(grandchild),
            Err(KError::NotAChild { pid: grandchild })
        );
    }

    #[test]
    fn exit_of_the_last_thread_halts_when_asked() {
        let (mut kernel, log) = kernel_with(Policy::Fcfs);
        kernel.advance(10);
        kernel.exit(0, true);

        assert!(kernel.is_halted());
        assert!(log.borrow().contains(&Event::Halt));
    }

    #[test]
    fn exit_of_the_last_thread_idles_into_the_halt_otherwise() {
        let (mut kernel, log) = kernel_with(Policy::Fcfs);
        kernel.exit(0, false);

        // Nothing ready, nothing pending: the idle loop concludes all
        // programs completed and halts.
        assert!(kernel.is_halted());
        assert!(log.borrow().contains(&Event::Halt));
    }

    #[test]
    fn stale_wake_for_an_exited_thread_is_dropped() {
        let (mut kernel, log) = kernel_with(Policy::Fcfs);
        // A timed wake armed earlier comes due after the exit; it must
        // not resurrect the carcass.
        kernel.machine_mut().wakes.push((500, ROOT_PID));
        kernel.exit(0, false);

        assert!(kernel.is_halted());
        assert!(log.borrow().contains(&Event::Halt));
        assert!(!log
            .borrow()
            .iter()
            .any(|e| matches!(e, Event::Switch(_, _))));
    }

    #[test]
    fn exit_statistics_exclude_the_root_thread() {
        let (mut kernel, _log) = kernel_with(Policy::Fcfs);
        let child = kernel.fork("child");
        kernel.advance(10);
        kernel.yield_now();
        assert_eq!(kernel.current(), child);

        kernel.advance(40);
        kernel.exit(0, false);

        let stats = kernel.stats();
        assert_eq!(stats.threads_completed, 1);
        // Created at 0, exited at 50.
        assert_eq!(stats.total_turnaround, 50);
        assert_eq!(stats.total_completion, 50);
        // The child waited ticks 0..10 while the root ran.
        assert_eq!(stats.total_wait, 10);
        // Only the child's 40-tick burst counts.
        assert_eq!(stats.burst_count, 1);
        assert_eq!(stats.total_burst, 40);
    }

    // The end-to-end lifecycle: root forks a worker, joins it while it
    // is still running, the worker computes and exits, the root gets
    // the code on the re-issued join and shuts the machine down.
    #[test]
    fn fork_join_exit_round_trip() {
        let (mut kernel, log) = kernel_with(Policy::Fcfs);
        let worker = kernel.fork("worker");

        assert_eq!(kernel.join(worker), Ok(JoinResult::Pending));
        assert_eq!(kernel.current(), worker);

        kernel.advance(100);
        kernel.exit(7, false);

        assert_eq!(kernel.current(), ROOT_PID);
        assert_eq!(kernel.join(worker), Ok(JoinResult::Exited(7)));
        assert!(kernel.thread(worker).is_none(), "worker reclaimed");
        assert!(kernel.has_exited(worker));

        kernel.exit(0, true);
        assert!(kernel.is_halted());
        let log = log.borrow();
        let switch = log
            .iter()
            .position(|e| *e == Event::Switch(worker, ROOT_PID))
            .expect("worker dispatched away from");
        let dropped = log
            .iter()
            .position(|e| *e == Event::ContextDropped(worker))
            .expect("worker context reclaimed");
        assert!(switch < dropped);
    }
}
