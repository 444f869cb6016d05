// Copyright © The Slate Developers. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scheduling policies and the ready container.
//!
//! The original design reused one linked list for FIFO order, sorted
//! insertion and a priority scan; here the ready container is a closed
//! set of tagged variants behind a single insert/remove interface,
//! chosen once when the kernel is configured.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::threads::Pid;
use crate::Ticks;

/// CPU scheduling policy, fixed for one simulation run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Policy {
    /// Strict arrival order; threads run until they suspend themselves.
    Fcfs,
    /// Arrival order with timer preemption every `quantum` ticks.
    RoundRobin { quantum: Ticks },
    /// Non-preemptive shortest-job-first with exponential averaging of
    /// observed bursts: `estimate' = alpha*burst + (1-alpha)*estimate`.
    ShortestJobFirst { alpha: f64 },
    /// Preemptive; the numerically smallest priority value wins.
    StaticPriority { quantum: Ticks },
    /// Preemptive; CPU usage decays into the effective priority so
    /// hungry threads drift to the back.
    MultilevelFeedback { quantum: Ticks },
}

impl Policy {
    /// Preemption interval, if the policy is preemptive.
    pub fn quantum(&self) -> Option<Ticks> {
        match *self {
            Policy::RoundRobin { quantum }
            | Policy::StaticPriority { quantum }
            | Policy::MultilevelFeedback { quantum } => Some(quantum),
            Policy::Fcfs | Policy::ShortestJobFirst { .. } => None,
        }
    }

    pub(crate) fn sjf_alpha(&self) -> Option<f64> {
        match *self {
            Policy::ShortestJobFirst { alpha } => Some(alpha),
            _ => None,
        }
    }

    pub(crate) fn decays_usage(&self) -> bool {
        matches!(self, Policy::MultilevelFeedback { .. })
    }
}

/// The ready container: holds `Ready` threads only, mutated only with
/// preemption disabled.
#[derive(Debug)]
pub(crate) enum ReadyQueue {
    /// FCFS / round-robin arrival order.
    Fifo(VecDeque<Pid>),
    /// Keyed by burst estimate; selection removes the minimum key.
    /// Threads without burst history are appended unkeyed-at-tail.
    Sorted(Vec<(f64, Pid)>),
    /// Unordered; selection scans for the minimum priority value.
    ScanMin(Vec<Pid>),
}

impl ReadyQueue {
    pub(crate) fn for_policy(policy: &Policy) -> ReadyQueue {
        match policy {
            Policy::Fcfs | Policy::RoundRobin { .. } => ReadyQueue::Fifo(VecDeque::new()),
            Policy::ShortestJobFirst { .. } => ReadyQueue::Sorted(Vec::new()),
            Policy::StaticPriority { .. } | Policy::MultilevelFeedback { .. } => {
                ReadyQueue::ScanMin(Vec::new())
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            ReadyQueue::Fifo(q) => q.is_empty(),
            ReadyQueue::Sorted(q) => q.is_empty(),
            ReadyQueue::ScanMin(q) => q.is_empty(),
        }
    }

    pub(crate) fn contains(&self, pid: Pid) -> bool {
        match self {
            ReadyQueue::Fifo(q) => q.iter().any(|&p| p == pid),
            ReadyQueue::Sorted(q) => q.iter().any(|&(_, p)| p == pid),
            ReadyQueue::ScanMin(q) => q.iter().any(|&p| p == pid),
        }
    }

    /// Append in arrival order. `key` is only meaningful for the sorted
    /// variant, where an appended thread keeps its current estimate.
    pub(crate) fn append(&mut self, pid: Pid, key: f64) {
        match self {
            ReadyQueue::Fifo(q) => q.push_back(pid),
            ReadyQueue::Sorted(q) => q.push((key, pid)),
            ReadyQueue::ScanMin(q) => q.push(pid),
        }
    }

    /// Insert ordered by ascending key; equal keys keep insertion
    /// order. Falls back to an append for the unkeyed variants.
    pub(crate) fn insert_sorted(&mut self, pid: Pid, key: f64) {
        match self {
            ReadyQueue::Sorted(q) => {
                let pos = q.iter().position(|&(k, _)| k > key).unwrap_or(q.len());
                q.insert(pos, (key, pid));
            }
            ReadyQueue::Fifo(q) => q.push_back(pid),
            ReadyQueue::ScanMin(q) => q.push(pid),
        }
    }

    /// Remove and return the next thread to dispatch.
    ///
    /// Ties on the minimum key/priority go to the earliest-inserted
    /// thread (strict `<` during the scan).
    pub(crate) fn remove_next<F>(&mut self, priority_of: F) -> Option<Pid>
    where
        F: Fn(Pid) -> i64,
    {
        match self {
            ReadyQueue::Fifo(q) => q.pop_front(),
            ReadyQueue::Sorted(q) => {
                if q.is_empty() {
                    return None;
                }
                let mut min = 0;
                for i in 1..q.len() {
                    if q[i].0 < q[min].0 {
                        min = i;
                    }
                }
                Some(q.remove(min).1)
            }
            ReadyQueue::ScanMin(q) => {
                if q.is_empty() {
                    return None;
                }
                let mut min = 0;
                for i in 1..q.len() {
                    if priority_of(q[i]) < priority_of(q[min]) {
                        min = i;
                    }
                }
                Some(q.remove(min))
            }
        }
    }

    /// Contents in container order, for diagnostics.
    pub(crate) fn pids(&self) -> Vec<Pid> {
        match self {
            ReadyQueue::Fifo(q) => q.iter().copied().collect(),
            ReadyQueue::Sorted(q) => q.iter().map(|&(_, p)| p).collect(),
            ReadyQueue::ScanMin(q) => q.iter().copied().collect(),
        }
    }
}
