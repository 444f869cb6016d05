// Copyright © The Slate Developers. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The kernel execution core of a teaching operating-system simulator:
//! a uniprocessor thread scheduler with a fixed set of selectable
//! policies, counting semaphores and condition variables built on it,
//! and fork/exit/join process lifecycle on top.
//!
//! The simulated machine (context transfer, address spaces, external
//! interrupts) sits behind the [`Machine`] trait; everything else
//! (ready container, pid table, accounting, dispatch) lives in one
//! explicitly owned [`Kernel`] value.
//!
//! Operations that must block (`Semaphore::p`, `CondVar::wait`, `join`
//! on a live child) follow a restart protocol: they do their
//! bookkeeping, put the caller to sleep and dispatch away, and return a
//! `WouldBlock`-style value. The trap layer re-issues the call once the
//! thread is dispatched again; the re-issue re-checks the condition.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod condvar;
pub mod error;
pub mod machine;
pub mod policy;
pub mod process;
pub mod scheduler;
pub mod semaphore;
pub mod stats;
pub mod threads;

#[cfg(test)]
pub(crate) mod testing;

use static_assertions::const_assert;

pub use crate::condvar::{CondVar, CondWait};
pub use crate::error::KError;
pub use crate::machine::{IdleResult, IntStatus, Machine};
pub use crate::policy::Policy;
pub use crate::process::JoinResult;
pub use crate::scheduler::{Kernel, ROOT_PID};
pub use crate::semaphore::{SemAcquire, Semaphore};
pub use crate::stats::{Clock, Statistics};
pub use crate::threads::{Pid, Thread, ThreadStatus};

/// Simulated time, in ticks.
pub type Ticks = u64;

/// How many thread slots one simulation run gets. Pids are never
/// reused, so this bounds the total number of threads created, not
/// just the concurrently live ones. Exceeding it is a fatal error;
/// the table does not grow.
pub const MAX_THREADS: usize = 64;

/// Upper bound on the children a single thread may fork.
pub const MAX_CHILDREN: usize = 32;

/// Base priority of a thread forked without a nice value. Lower
/// values are dispatched first.
pub const DEFAULT_BASE_PRIORITY: i64 = 50;

/// CPU-burst estimate of a thread with no burst history yet.
pub const INITIAL_BURST_ESTIMATE: f64 = 200.0;

const_assert!(MAX_THREADS > 1);
const_assert!(MAX_CHILDREN <= MAX_THREADS);
