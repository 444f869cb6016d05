// Copyright © The Slate Developers. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The machine-dependent side of the core.
//!
//! The scheduler never touches registers, stacks or address spaces
//! itself; everything machine-specific sits behind [`Machine`]. A real
//! embedding wires this to the instruction emulator; the tests use a
//! mock that records events and serves a time-ordered wake list.

use alloc::vec::Vec;

use crate::stats::Clock;
use crate::threads::Pid;

/// Interrupt level of the simulated CPU.
///
/// Disabling interrupts is the uniprocessor's mutual exclusion: no
/// preemption can occur while the level is `Off`. Nested sections must
/// restore the *prior* level, never unconditionally re-enable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IntStatus {
    Off,
    On,
}

/// What one idle period produced.
#[derive(Debug)]
pub enum IdleResult {
    /// Threads whose external wake time came due while idling. The
    /// kernel marks them ready; an empty list just means time passed.
    Woken(Vec<Pid>),
    /// No interrupt will ever arrive. The kernel halts the simulation.
    NoPendingEvents,
}

/// Hooks the kernel needs from the simulated machine.
pub trait Machine {
    /// Saved register/stack state of one thread. Owned by the kernel's
    /// context table, opaque to the scheduler; dropped when the thread
    /// is destroyed.
    type Context;

    /// Describes what a forked thread runs (procedure and argument).
    /// Opaque to the core; only `prepare_context` interprets it.
    type Entry;

    /// Build the initial context for a newly forked thread, the
    /// machine equivalent of allocating and seeding its stack.
    fn prepare_context(&mut self, pid: Pid, entry: Self::Entry) -> Self::Context;

    /// Low-level transfer of control between two saved contexts. The
    /// `from` side does not resume until it is scheduled again.
    fn context_switch(&mut self, from: &mut Self::Context, to: &mut Self::Context);

    /// Save/restore hooks for threads that own a user address space.
    fn save_address_space(&mut self, _pid: Pid) {}
    fn restore_address_space(&mut self, _pid: Pid) {}

    /// Wait for the next external event, advancing the clock to it.
    /// This is the kernel's only source of asynchronous wakeups (the
    /// time-ordered wake list of timed sleeps lives out here).
    fn wait_for_interrupt(&mut self, clock: &mut Clock) -> IdleResult;

    /// Stop the simulation.
    fn halt(&mut self);
}
