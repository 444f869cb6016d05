// Copyright © The Slate Developers. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Simulated clock and aggregate scheduling statistics.
//!
//! Both are owned by the kernel for the lifetime of one simulation
//! run: reset at start, dumped through the log at shutdown.

use log::info;

use crate::Ticks;

/// Process-wide simulated tick counter.
///
/// Monotonically increasing; advanced by the driver while a thread
/// burns CPU and by the machine while the kernel idles. Read-only to
/// the scheduler itself.
#[derive(Debug, Default)]
pub struct Clock {
    ticks: Ticks,
}

impl Clock {
    pub fn new() -> Clock {
        Clock { ticks: 0 }
    }

    pub fn now(&self) -> Ticks {
        self.ticks
    }

    pub fn advance(&mut self, ticks: Ticks) {
        self.ticks += ticks;
    }
}

/// Aggregate counters the scheduler maintains across a run.
///
/// Bursts are recorded every time a thread gives up the CPU;
/// turnaround, wait and completion figures are recorded once per
/// exiting thread. The boot thread is excluded from the aggregates.
#[derive(Debug)]
pub struct Statistics {
    /// Ticks spent with no thread ready.
    pub idle_ticks: Ticks,

    pub burst_count: u64,
    pub total_burst: Ticks,
    pub min_burst: Ticks,
    pub max_burst: Ticks,

    /// Accumulated |observed burst - new estimate| under SJF.
    pub estimate_error: f64,

    pub threads_completed: u64,
    pub total_wait: Ticks,

    pub total_turnaround: Ticks,
    pub min_turnaround: Ticks,
    pub max_turnaround: Ticks,
    square_turnaround: u128,

    pub total_completion: Ticks,
    pub min_completion: Ticks,
    pub max_completion: Ticks,
    square_completion: u128,
}

impl Statistics {
    pub fn new() -> Statistics {
        Statistics {
            idle_ticks: 0,
            burst_count: 0,
            total_burst: 0,
            min_burst: Ticks::MAX,
            max_burst: 0,
            estimate_error: 0.0,
            threads_completed: 0,
            total_wait: 0,
            total_turnaround: 0,
            min_turnaround: Ticks::MAX,
            max_turnaround: 0,
            square_turnaround: 0,
            total_completion: 0,
            min_completion: Ticks::MAX,
            max_completion: 0,
            square_completion: 0,
        }
    }

    pub(crate) fn record_idle(&mut self, ticks: Ticks) {
        self.idle_ticks += ticks;
    }

    pub(crate) fn record_burst(&mut self, burst: Ticks) {
        self.burst_count += 1;
        self.total_burst += burst;
        if burst > self.max_burst {
            self.max_burst = burst;
        }
        if burst < self.min_burst {
            self.min_burst = burst;
        }
    }

    pub(crate) fn record_estimate_error(&mut self, error: f64) {
        self.estimate_error += error;
    }

    pub(crate) fn record_exit(&mut self, turnaround: Ticks, wait: Ticks, completion: Ticks) {
        self.threads_completed += 1;
        self.total_wait += wait;

        self.total_turnaround += turnaround;
        self.square_turnaround += turnaround as u128 * turnaround as u128;
        if turnaround > self.max_turnaround {
            self.max_turnaround = turnaround;
        }
        if turnaround < self.min_turnaround {
            self.min_turnaround = turnaround;
        }

        self.total_completion += completion;
        self.square_completion += completion as u128 * completion as u128;
        if completion > self.max_completion {
            self.max_completion = completion;
        }
        if completion < self.min_completion {
            self.min_completion = completion;
        }
    }

    pub fn avg_wait(&self) -> f64 {
        if self.threads_completed == 0 {
            return 0.0;
        }
        self.total_wait as f64 / self.threads_completed as f64
    }

    pub fn avg_turnaround(&self) -> f64 {
        if self.threads_completed == 0 {
            return 0.0;
        }
        self.total_turnaround as f64 / self.threads_completed as f64
    }

    /// Population variance of per-thread turnaround.
    pub fn turnaround_variance(&self) -> f64 {
        if self.threads_completed == 0 {
            return 0.0;
        }
        let avg = self.avg_turnaround();
        self.square_turnaround as f64 / self.threads_completed as f64 - avg * avg
    }

    pub fn avg_completion(&self) -> f64 {
        if self.threads_completed == 0 {
            return 0.0;
        }
        self.total_completion as f64 / self.threads_completed as f64
    }

    pub fn completion_variance(&self) -> f64 {
        if self.threads_completed == 0 {
            return 0.0;
        }
        let avg = self.avg_completion();
        self.square_completion as f64 / self.threads_completed as f64 - avg * avg
    }

    /// Dump everything at shutdown.
    pub fn report(&self, total_ticks: Ticks) {
        info!("Ticks: total {} idle {}", total_ticks, self.idle_ticks);
        info!(
            "CPU bursts: count {} total {} min {} max {}",
            self.burst_count,
            self.total_burst,
            if self.burst_count > 0 { self.min_burst } else { 0 },
            self.max_burst
        );
        if self.total_burst > 0 {
            info!(
                "Burst estimation error: {} (normalized {})",
                self.estimate_error,
                self.estimate_error / self.total_burst as f64
            );
        }
        info!(
            "Threads completed: {} avg wait {} avg turnaround {} (variance {})",
            self.threads_completed,
            self.avg_wait(),
            self.avg_turnaround(),
            self.turnaround_variance()
        );
        info!(
            "Completion time: total {} min {} max {} avg {} (variance {})",
            self.total_completion,
            if self.threads_completed > 0 { self.min_completion } else { 0 },
            self.max_completion,
            self.avg_completion(),
            self.completion_variance()
        );
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Statistics::new()
    }
}
