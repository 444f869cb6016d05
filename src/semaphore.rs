// Copyright © The Slate Developers. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A counting semaphore, with P()/V() and a queue of sleeping threads.
//!
//! Under the restart protocol `p()` never spins: a caller that finds
//! the count exhausted queues itself, sleeps and returns
//! [`SemAcquire::WouldBlock`]; it re-issues the call when dispatched
//! again and re-checks the count then. A wakeup is no guarantee of
//! acquisition, another thread may take the unit first.

use alloc::collections::VecDeque;

use log::trace;

use crate::machine::{IntStatus, Machine};
use crate::scheduler::Kernel;
use crate::threads::Pid;

/// Outcome of a `p()` call under the restart protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SemAcquire {
    /// One unit was taken; the caller proceeds.
    Acquired,
    /// The count was exhausted. The caller slept and must re-issue the
    /// call now that it has been dispatched again.
    WouldBlock,
}

pub struct Semaphore {
    /// Available units. Never negative: exhaustion queues the caller
    /// instead of going below zero.
    count: isize,
    /// Threads sleeping in `p()`, woken in FIFO order.
    waiters: VecDeque<Pid>,
}

impl Semaphore {
    pub fn new(count: isize) -> Semaphore {
        assert!(count >= 0, "Semaphore count can't start negative");
        Semaphore {
            count,
            waiters: VecDeque::new(),
        }
    }

    pub fn count(&self) -> isize {
        self.count
    }

    /// Take one unit, sleeping while none is available.
    pub fn p<M: Machine>(&mut self, kernel: &mut Kernel<M>) -> SemAcquire {
        let old_level = kernel.set_int_level(IntStatus::Off);
        let result = if self.count > 0 {
            self.count -= 1;
            SemAcquire::Acquired
        } else {
            let pid = kernel.current();
            trace!("Thread {} blocking on semaphore", pid);
            // A spurious wakeup re-issues p() while still queued.
            if !self.waiters.contains(&pid) {
                self.waiters.push_back(pid);
            }
            kernel.sleep();
            SemAcquire::WouldBlock
        };
        kernel.set_int_level(old_level);
        result
    }

    /// Return one unit and wake the longest-sleeping waiter, if any.
    /// Never yields the CPU.
    pub fn v<M: Machine>(&mut self, kernel: &mut Kernel<M>) {
        let old_level = kernel.set_int_level(IntStatus::Off);
        self.count += 1;
        if let Some(pid) = self.waiters.pop_front() {
            trace!("Thread {} woken from semaphore", pid);
            kernel.ready_to_run_locked(pid);
        }
        kernel.set_int_level(old_level);
    }
}
