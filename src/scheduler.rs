// Copyright © The Slate Developers. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The core logic of the scheduler.
//!
//! Has the following properties:
//! * Uniprocessor: one logical thread of control at a time.
//! * Cooperative dispatch points plus timer-driven preemption under
//!   the preemptive policies.
//! * One ready container, shaped by the policy chosen at start.
//! * Disable-interrupts-as-mutex: every mutation of the ready list,
//!   thread status or wait queues happens with the level `Off`, and
//!   nested sections restore the prior level.
//! * Deferred destruction: an exited thread is reclaimed only after
//!   the dispatch has moved execution off its stack.

use alloc::vec::Vec;

use hashbrown::HashMap;
use log::{debug, info, trace};

use crate::machine::{IdleResult, IntStatus, Machine};
use crate::policy::{Policy, ReadyQueue};
use crate::stats::{Clock, Statistics};
use crate::threads::{Pid, Thread, ThreadStatus};
use crate::{Ticks, MAX_THREADS};

/// Pid of the boot thread, created running by [`Kernel::new`].
pub const ROOT_PID: Pid = Pid(0);

/// All mutable kernel state for one simulation run: clock, statistics,
/// ready container, pid table and context table. Every operation takes
/// `&mut self` and acts on behalf of the current thread.
pub struct Kernel<M: Machine> {
    machine: M,
    clock: Clock,
    pub(crate) stats: Statistics,
    policy: Policy,
    ready: ReadyQueue,

    /// Thread records of all live (and exited-but-unreclaimed) threads.
    pub(crate) threads: HashMap<Pid, Thread>,
    /// Saved machine contexts, split from the records so a dispatch
    /// can hold both sides of a switch mutably at once.
    contexts: HashMap<Pid, M::Context>,
    /// Per-pid CPU usage counters for the usage-decay policy.
    usage: [Ticks; MAX_THREADS],
    /// Sticky per-pid exit flags; they outlive the thread records.
    pub(crate) exited: [bool; MAX_THREADS],

    pub(crate) current: Pid,
    /// Carcass of an exited thread, reclaimed after the next dispatch.
    pub(crate) to_destroy: Option<Pid>,
    pub(crate) next_pid: usize,
    pub(crate) live: usize,
    halted: bool,

    int_status: IntStatus,
    /// The timer fired inside a critical section; replay on enable.
    pending_preempt: bool,
}

impl<M: Machine> Kernel<M> {
    /// Build the kernel with its boot thread (pid 0) already running.
    pub fn new(policy: Policy, machine: M, root_entry: M::Entry) -> Kernel<M> {
        let mut kernel = Kernel {
            machine,
            clock: Clock::new(),
            stats: Statistics::new(),
            policy,
            ready: ReadyQueue::for_policy(&policy),
            threads: HashMap::with_capacity(MAX_THREADS),
            contexts: HashMap::with_capacity(MAX_THREADS),
            usage: [0; MAX_THREADS],
            exited: [false; MAX_THREADS],
            current: ROOT_PID,
            to_destroy: None,
            next_pid: 0,
            live: 0,
            halted: false,
            int_status: IntStatus::On,
            pending_preempt: false,
        };
        let root = kernel.allocate_thread(None, 0, root_entry);
        debug_assert_eq!(root, ROOT_PID);
        kernel
            .threads
            .get_mut(&root)
            .expect("Can't find thread state?")
            .status = ThreadStatus::Running;
        kernel
    }

    /// Create a thread record and its machine context. Fatal if the
    /// fixed-size table is exhausted; pids are never reused so the
    /// table cannot be compacted.
    pub(crate) fn allocate_thread(
        &mut self,
        ppid: Option<Pid>,
        nice: i64,
        entry: M::Entry,
    ) -> Pid {
        assert!(
            self.next_pid < MAX_THREADS,
            "Thread table full ({} slots)",
            MAX_THREADS
        );
        let pid = Pid(self.next_pid);
        self.next_pid += 1;

        let thread = Thread::new(pid, ppid, nice, self.clock.now());
        trace!(
            "Creating thread {} with base priority {}",
            pid,
            thread.base_priority
        );
        let context = self.machine.prepare_context(pid, entry);
        self.threads.insert(pid, thread);
        self.contexts.insert(pid, context);
        self.live += 1;
        pid
    }

    pub fn current(&self) -> Pid {
        self.current
    }

    pub fn now(&self) -> Ticks {
        self.clock.now()
    }

    /// Burn simulated CPU time on behalf of the running thread.
    pub fn advance(&mut self, ticks: Ticks) {
        self.clock.advance(ticks);
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn live_threads(&self) -> usize {
        self.live
    }

    pub fn thread(&self, pid: Pid) -> Option<&Thread> {
        self.threads.get(&pid)
    }

    pub fn has_exited(&self, pid: Pid) -> bool {
        pid.0 < MAX_THREADS && self.exited[pid.0]
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    /// Ready-list contents in container order.
    pub fn ready_pids(&self) -> Vec<Pid> {
        self.ready.pids()
    }

    /// Diagnostics hook: log the ready-list contents.
    pub fn print(&self) {
        info!("Ready list contents: {:?}", self.ready.pids());
    }

    /// Set the interrupt level, returning the prior one. Restoring to
    /// `On` replays a timer preemption that arrived while the level
    /// was `Off`.
    pub fn set_int_level(&mut self, level: IntStatus) -> IntStatus {
        let old = self.int_status;
        self.int_status = level;
        if old == IntStatus::Off && level == IntStatus::On && self.pending_preempt {
            self.pending_preempt = false;
            self.timer_interrupt();
        }
        old
    }

    pub fn int_level(&self) -> IntStatus {
        self.int_status
    }

    /// Mark a thread ready and place it in the public ready container.
    ///
    /// If the thread was running, its CPU burst is closed out first; if
    /// it was blocked, its block interval is. The placement is
    /// policy-specific: SJF re-ranks by the freshly updated burst
    /// estimate, everything else appends in arrival order.
    pub fn ready_to_run(&mut self, pid: Pid) {
        let old_level = self.set_int_level(IntStatus::Off);
        self.ready_to_run_locked(pid);
        self.set_int_level(old_level);
    }

    pub(crate) fn ready_to_run_locked(&mut self, pid: Pid) {
        debug_assert!(
            !self.ready.contains(pid),
            "Thread {} is already on the ready list",
            pid
        );
        let now = self.clock.now();

        let status = self
            .threads
            .get(&pid)
            .expect("Can't find thread state?")
            .status;
        match status {
            ThreadStatus::Running => self.finish_burst(pid),
            ThreadStatus::Blocked => {
                let t = self.threads.get_mut(&pid).expect("Can't find thread state?");
                t.block_time += now - t.block_start;
            }
            ThreadStatus::Created => {}
            ThreadStatus::Ready => panic!("ReadyToRun on thread {} which is already ready", pid),
        }

        let alpha = self.policy.sjf_alpha();
        let (sort_key, estimate_error) = {
            let t = self.threads.get_mut(&pid).expect("Can't find thread state?");
            t.status = ThreadStatus::Ready;
            t.wait_start = now;
            match alpha {
                Some(alpha) if t.burst_previous > 0 => {
                    let estimate =
                        alpha * t.burst_previous as f64 + (1.0 - alpha) * t.burst_estimate;
                    trace!(
                        "[pid {}] E(n) {} E(n-1) {} burst {}",
                        pid,
                        estimate,
                        t.burst_estimate,
                        t.burst_previous
                    );
                    let mut error = t.burst_previous as f64 - estimate;
                    if error < 0.0 {
                        error = -error;
                    }
                    t.burst_estimate = estimate;
                    (Some(estimate), error)
                }
                _ => (None, 0.0),
            }
        };

        match sort_key {
            Some(key) => {
                self.stats.record_estimate_error(estimate_error);
                self.ready.insert_sorted(pid, key);
            }
            None => {
                let key = self
                    .threads
                    .get(&pid)
                    .expect("Can't find thread state?")
                    .burst_estimate;
                self.ready.append(pid, key);
            }
        }
        trace!("Putting thread {} on the ready list", pid);
    }

    /// Close out the current CPU burst of `pid`: remember it for the
    /// burst estimator, fold it into the aggregate statistics and,
    /// under the usage-decay policy, age every live thread's priority.
    pub(crate) fn finish_burst(&mut self, pid: Pid) {
        let now = self.clock.now();
        let burst = {
            let t = self.threads.get_mut(&pid).expect("Can't find thread state?");
            debug_assert_eq!(t.status, ThreadStatus::Running);
            let burst = now - t.burst_start;
            t.burst_previous = burst;
            t.cpu_time += burst;
            burst
        };
        trace!("[pid {}] burst of {} ticks ended at {}", pid, burst, now);

        if burst == 0 {
            return;
        }
        if pid != ROOT_PID {
            self.stats.record_burst(burst);
        }
        if self.policy.decays_usage() {
            self.usage[pid.0] += burst;
            for slot in 0..MAX_THREADS {
                self.usage[slot] /= 2;
                if let Some(t) = self.threads.get_mut(&Pid(slot)) {
                    t.priority = t.base_priority + (self.usage[slot] / 2) as i64;
                }
            }
        }
    }

    /// Remove and return the next thread to dispatch, per policy.
    /// `None` means the caller must idle or halt.
    pub fn find_next_to_run(&mut self) -> Option<Pid> {
        let threads = &self.threads;
        self.ready
            .remove_next(|pid| threads.get(&pid).map_or(i64::MAX, |t| t.priority))
    }

    /// Dispatch the CPU to `next`: close its wait interval, start its
    /// burst, and hand the machine both contexts for the transfer.
    ///
    /// A thread that exited is reclaimed here, after the switch; it
    /// could not free its own stack while still running on it.
    pub(crate) fn run(&mut self, next: Pid) {
        let old = self.current;
        debug_assert_ne!(old, next, "Dispatching the running thread onto itself");
        let now = self.clock.now();

        self.machine.save_address_space(old);

        {
            let t = self
                .threads
                .get_mut(&next)
                .expect("Can't find thread state?");
            t.wait_time += now - t.wait_start;
            t.burst_start = now;
            t.status = ThreadStatus::Running;
        }
        trace!("Switching from thread {} to thread {}", old, next);
        self.current = next;

        let mut from = self
            .contexts
            .remove(&old)
            .expect("Outgoing thread has no context?");
        let mut to = self
            .contexts
            .remove(&next)
            .expect("Incoming thread has no context?");
        self.machine.context_switch(&mut from, &mut to);
        self.contexts.insert(next, to);

        match self.to_destroy.take() {
            Some(carcass) => {
                debug_assert_eq!(carcass, old, "Only the outgoing thread can be a carcass");
                debug!("Deleting thread {}", carcass);
                self.threads.remove(&carcass);
                drop(from);
            }
            None => {
                self.contexts.insert(old, from);
            }
        }

        self.machine.restore_address_space(next);
    }

    /// Selection picked the thread that is already current: close its
    /// wait interval and start a fresh burst without a context switch.
    fn resume_in_place(&mut self, pid: Pid) {
        let now = self.clock.now();
        let t = self.threads.get_mut(&pid).expect("Can't find thread state?");
        t.wait_time += now - t.wait_start;
        t.burst_start = now;
        t.status = ThreadStatus::Running;
    }

    /// Relinquish the CPU if any other thread is ready.
    ///
    /// Voluntary yields and timer preemptions share one rule: the
    /// caller is requeued first and selection runs over the full ready
    /// set. If the caller is still the best candidate it keeps the CPU
    /// with a fresh burst.
    pub fn yield_now(&mut self) {
        let old_level = self.set_int_level(IntStatus::Off);
        if !self.ready.is_empty() {
            let pid = self.current;
            trace!("Yielding thread {}", pid);
            self.ready_to_run_locked(pid);
            let next = self
                .find_next_to_run()
                .expect("Ready list can't be empty here");
            if next == pid {
                self.resume_in_place(pid);
            } else {
                self.run(next);
            }
        }
        self.set_int_level(old_level);
    }

    /// Periodic timer tick. Under a preemptive policy, force the
    /// running thread to yield once its quantum has elapsed. A tick
    /// arriving inside a critical section is latched and replayed when
    /// the prior interrupt level is restored.
    ///
    /// Returns whether a preemption took place (or was latched).
    pub fn timer_interrupt(&mut self) -> bool {
        if self.halted {
            return false;
        }
        let quantum = match self.policy.quantum() {
            Some(q) => q,
            None => return false,
        };
        let elapsed = {
            let t = self
                .threads
                .get(&self.current)
                .expect("Can't find thread state?");
            self.clock.now() - t.burst_start
        };
        if elapsed < quantum {
            return false;
        }
        if self.int_status == IntStatus::Off {
            self.pending_preempt = true;
            return true;
        }
        trace!(
            "Preempting thread {} after {} ticks (quantum {})",
            self.current,
            elapsed,
            quantum
        );
        self.yield_now();
        true
    }

    /// Relinquish the CPU because the current thread is blocked on a
    /// synchronization variable or a child. Dispatches the next ready
    /// thread, idling through the machine when none exists. The caller
    /// runs again only after some other operation readies it.
    ///
    /// Interrupts must already be disabled; the synchronization
    /// routines establish atomicity before calling this.
    pub fn sleep(&mut self) {
        assert_eq!(
            self.int_status,
            IntStatus::Off,
            "Sleep requires interrupts to be disabled"
        );
        let pid = self.current;
        trace!("Sleeping thread {}", pid);

        self.finish_burst(pid);
        let now = self.clock.now();
        {
            let t = self.threads.get_mut(&pid).expect("Can't find thread state?");
            t.status = ThreadStatus::Blocked;
            t.block_start = now;
        }

        loop {
            if let Some(next) = self.find_next_to_run() {
                // An external wake during the idle below can target
                // the sleeper itself; there is no context to switch.
                if next == pid {
                    self.resume_in_place(pid);
                } else {
                    self.run(next);
                }
                return;
            }
            if !self.idle() {
                return;
            }
        }
    }

    /// No thread is ready: wait for an external event to supply one.
    /// Returns false once the machine reports that nothing is pending
    /// and the simulation has been halted.
    pub(crate) fn idle(&mut self) -> bool {
        let before = self.clock.now();
        match self.machine.wait_for_interrupt(&mut self.clock) {
            IdleResult::Woken(pids) => {
                self.stats.record_idle(self.clock.now() - before);
                for pid in pids {
                    // A wake for a thread that was already readied by
                    // other means is dropped, as is a stale wake for a
                    // carcass (exited threads stay Blocked in the
                    // table until they are reclaimed).
                    if self.threads.get(&pid).map(|t| t.status) == Some(ThreadStatus::Blocked)
                        && !self.has_exited(pid)
                    {
                        self.ready_to_run_locked(pid);
                    }
                }
                true
            }
            IdleResult::NoPendingEvents => {
                info!("No threads ready or runnable, and no pending interrupts.");
                info!("Assuming all programs completed.");
                self.halt();
                false
            }
        }
    }

    /// Dump the aggregate statistics and stop the machine.
    pub(crate) fn halt(&mut self) {
        if self.halted {
            return;
        }
        self.halted = true;
        self.stats.report(self.clock.now());
        self.machine.halt();
    }
}
