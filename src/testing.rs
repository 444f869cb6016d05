// Copyright © The Slate Developers. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Machine mock shared by the module tests.
//!
//! `TestMachine` records the machine-level events the kernel drives
//! (context creation, switches, context drops, halt) into a shared log
//! the tests assert against, and serves a time-ordered wake list so
//! idle periods can be scripted.

use std::cell::RefCell;
use std::rc::Rc;

use crate::machine::{IdleResult, Machine};
use crate::policy::Policy;
use crate::scheduler::Kernel;
use crate::stats::Clock;
use crate::threads::Pid;
use crate::Ticks;

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Event {
    Prepared(Pid),
    Switch(Pid, Pid),
    ContextDropped(Pid),
    Halt,
}

pub(crate) type EventLog = Rc<RefCell<Vec<Event>>>;

/// A fake context: just the owning pid plus a handle to the log, so
/// its destruction (deferred thread reclamation) leaves a trace.
pub(crate) struct TestContext {
    pid: Pid,
    log: EventLog,
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.log.borrow_mut().push(Event::ContextDropped(self.pid));
    }
}

pub(crate) struct TestMachine {
    log: EventLog,
    /// Scripted external wakeups as (due tick, pid), consumed by
    /// `wait_for_interrupt` in time order.
    pub(crate) wakes: Vec<(Ticks, Pid)>,
}

impl TestMachine {
    pub(crate) fn new(log: EventLog) -> TestMachine {
        TestMachine {
            log,
            wakes: Vec::new(),
        }
    }
}

impl Machine for TestMachine {
    type Context = TestContext;
    type Entry = &'static str;

    fn prepare_context(&mut self, pid: Pid, entry: Self::Entry) -> TestContext {
        let _ = entry;
        self.log.borrow_mut().push(Event::Prepared(pid));
        TestContext {
            pid,
            log: self.log.clone(),
        }
    }

    fn context_switch(&mut self, from: &mut TestContext, to: &mut TestContext) {
        self.log
            .borrow_mut()
            .push(Event::Switch(from.pid, to.pid));
    }

    fn wait_for_interrupt(&mut self, clock: &mut Clock) -> IdleResult {
        let target = match self.wakes.iter().map(|&(t, _)| t).min() {
            Some(t) => t,
            None => return IdleResult::NoPendingEvents,
        };
        let now = clock.now();
        if target > now {
            clock.advance(target - now);
        }
        let due = clock.now();
        let mut woken = Vec::new();
        let mut i = 0;
        while i < self.wakes.len() {
            if self.wakes[i].0 <= due {
                woken.push(self.wakes.remove(i).1);
            } else {
                i += 1;
            }
        }
        woken.sort();
        IdleResult::Woken(woken)
    }

    fn halt(&mut self) {
        self.log.borrow_mut().push(Event::Halt);
    }
}

/// Fresh kernel on a `TestMachine`, root thread already running.
pub(crate) fn kernel_with(policy: Policy) -> (Kernel<TestMachine>, EventLog) {
    let _r = env_logger::try_init();
    let log = EventLog::default();
    let machine = TestMachine::new(log.clone());
    let kernel = Kernel::new(policy, machine, "root");
    (kernel, log)
}
