// Copyright © The Slate Developers. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-thread state record.
//!
//! A `Thread` is pure bookkeeping: identity, scheduling status,
//! priority and burst-estimate fields, timing accumulators and the
//! child table. Its machine context lives in the kernel's context
//! table, and the ready container only ever holds pids.

use core::fmt;

use arrayvec::ArrayVec;

use crate::{Ticks, DEFAULT_BASE_PRIORITY, INITIAL_BURST_ESTIMATE, MAX_CHILDREN};

/// The id of a thread. Assigned monotonically, never reused during a
/// run; doubles as the thread's slot in the per-pid flag arrays.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(pub usize);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling status.
///
/// There is no stored `Terminated` state: a thread that has exited is
/// `Blocked` (plus a sticky per-pid exited flag) until the kernel has
/// switched onto a different thread's context and can reclaim it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThreadStatus {
    Created,
    Ready,
    Running,
    Blocked,
}

/// One entry in a thread's child table, in creation order.
/// `exit_code` doubles as the has-exited flag.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Child {
    pub(crate) pid: Pid,
    pub(crate) exit_code: Option<i32>,
}

pub struct Thread {
    pub(crate) pid: Pid,
    pub(crate) ppid: Option<Pid>,
    pub(crate) status: ThreadStatus,

    /// Lower value = dispatched first.
    pub(crate) base_priority: i64,
    /// Effective priority; mutated by the usage-decay policy.
    pub(crate) priority: i64,
    /// Exponentially averaged CPU-burst estimate, in ticks.
    pub(crate) burst_estimate: f64,
    /// Ticks consumed by the last completed CPU burst.
    pub(crate) burst_previous: Ticks,

    pub(crate) created_at: Ticks,
    pub(crate) total_time: Ticks,
    pub(crate) cpu_time: Ticks,
    pub(crate) burst_start: Ticks,
    pub(crate) wait_time: Ticks,
    pub(crate) wait_start: Ticks,
    pub(crate) block_time: Ticks,
    pub(crate) block_start: Ticks,

    pub(crate) children: ArrayVec<Child, MAX_CHILDREN>,
    /// The one child a blocked `join` call is waiting for.
    pub(crate) waiting_on_child: Option<Pid>,
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Thread#{}", self.pid.0)
    }
}

impl Thread {
    pub(crate) fn new(pid: Pid, ppid: Option<Pid>, nice: i64, now: Ticks) -> Thread {
        let base_priority = DEFAULT_BASE_PRIORITY + nice;
        Thread {
            pid,
            ppid,
            status: ThreadStatus::Created,
            base_priority,
            priority: base_priority,
            burst_estimate: INITIAL_BURST_ESTIMATE,
            burst_previous: 0,
            created_at: now,
            total_time: 0,
            cpu_time: 0,
            burst_start: now,
            wait_time: 0,
            wait_start: now,
            block_time: 0,
            block_start: now,
            children: ArrayVec::new(),
            waiting_on_child: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn ppid(&self) -> Option<Pid> {
        self.ppid
    }

    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    pub fn base_priority(&self) -> i64 {
        self.base_priority
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn burst_estimate(&self) -> f64 {
        self.burst_estimate
    }

    pub fn cpu_time(&self) -> Ticks {
        self.cpu_time
    }

    pub fn wait_time(&self) -> Ticks {
        self.wait_time
    }

    pub fn block_time(&self) -> Ticks {
        self.block_time
    }

    /// Lifetime from creation to exit; finalized when the thread exits.
    pub fn total_time(&self) -> Ticks {
        self.total_time
    }

    pub(crate) fn register_child(&mut self, pid: Pid) {
        self.children
            .try_push(Child { pid, exit_code: None })
            .expect("Child table full");
    }

    pub(crate) fn is_child(&self, pid: Pid) -> bool {
        self.children.iter().any(|c| c.pid == pid)
    }

    pub(crate) fn child_exit_code(&self, pid: Pid) -> Option<i32> {
        self.children
            .iter()
            .find(|c| c.pid == pid)
            .and_then(|c| c.exit_code)
    }

    /// Called by an exiting child on its parent's record.
    pub(crate) fn set_child_exit_code(&mut self, pid: Pid, code: i32) {
        let child = self
            .children
            .iter_mut()
            .find(|c| c.pid == pid)
            .expect("Exiting thread is not registered with its parent?");
        child.exit_code = Some(code);
    }
}
