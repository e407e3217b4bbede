//! Scheduler policies and the shared ready/delayed list machinery (§4.3)
//!
//! Policy is fixed for the kernel's lifetime rather than swapped at
//! runtime, so instead of a dispatch table of function pointers this picks
//! the implementation at compile time: a Cargo feature selects which
//! `impl` block on [`SchedulerState`] gets compiled in. Exactly one of the
//! three `scheduler-*` features must be enabled
//! (`default = ["scheduler-fixed-priority"]` in Cargo.toml); the
//! `compile_error!` checks below fail the build otherwise.

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

mod cooperative;
mod fixed_priority;
mod round_robin;

use crate::config;
use crate::kcell::{Cs, KCell};
use crate::task::{TaskId, TaskPool, TaskState};
use crate::utils::tick_reached;

#[cfg(all(
    feature = "scheduler-fixed-priority",
    any(feature = "scheduler-cooperative", feature = "scheduler-round-robin")
))]
compile_error!("enable exactly one scheduler-* feature");
#[cfg(all(
    feature = "scheduler-cooperative",
    feature = "scheduler-round-robin"
))]
compile_error!("enable exactly one scheduler-* feature");
#[cfg(not(any(
    feature = "scheduler-fixed-priority",
    feature = "scheduler-cooperative",
    feature = "scheduler-round-robin"
)))]
compile_error!("enable exactly one scheduler-* feature");

/// Which policy was compiled in. Used only for logging.
#[derive(Debug, defmt::Format, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    FixedPriority,
    Cooperative,
    RoundRobin,
}

pub(crate) const ACTIVE_KIND: SchedulerKind = {
    #[cfg(feature = "scheduler-fixed-priority")]
    {
        SchedulerKind::FixedPriority
    }
    #[cfg(feature = "scheduler-cooperative")]
    {
        SchedulerKind::Cooperative
    }
    #[cfg(feature = "scheduler-round-robin")]
    {
        SchedulerKind::RoundRobin
    }
};

/// Ready lists, priority bitmap, and the delayed list. Exactly one set of
/// the `impl` blocks in `fixed_priority.rs`/`cooperative.rs`/`round_robin.rs`
/// is compiled in, selected by Cargo feature.
pub(crate) struct SchedulerState {
    /// One FIFO head/tail per priority level. The cooperative and
    /// round-robin policies only ever use index 0.
    ready_heads: [KCell<Option<TaskId>>; config::MAX_PRIORITIES],
    ready_tails: [KCell<Option<TaskId>>; config::MAX_PRIORITIES],
    /// Bit `i` set means `ready_heads[i]` is non-empty. Fixed-priority only.
    bitmap: KCell<u32>,
    /// Singly-linked, sorted ascending by wake-tick. Shared by all three
    /// policies (§4.3 "All three share the same delayed-list discipline").
    delayed_head: KCell<Option<TaskId>>,
}

impl SchedulerState {
    pub(crate) const fn new() -> Self {
        const EMPTY: KCell<Option<TaskId>> = KCell::new(None);
        Self {
            ready_heads: [EMPTY; config::MAX_PRIORITIES],
            ready_tails: [EMPTY; config::MAX_PRIORITIES],
            bitmap: KCell::new(0),
            delayed_head: KCell::new(None),
        }
    }

    pub(crate) fn init(&self, cs: &Cs) {
        for level in &self.ready_heads {
            level.set(cs, None);
        }
        for level in &self.ready_tails {
            level.set(cs, None);
        }
        self.bitmap.set(cs, 0);
        self.delayed_head.set(cs, None);
    }

    /// Push `task` onto a ready list, at the priority it currently reports.
    /// Dispatches to the active policy's placement rule (priority level for
    /// fixed-priority, always level 0 for the other two); within a level
    /// the insertion is always FIFO (append to the tail).
    fn ready_list_push(&self, cs: &Cs, pool: &TaskPool, task: TaskId, level: usize) {
        task.tcb(pool).set_sched_link(cs, None);
        match self.ready_tails[level].get(cs) {
            Some(tail) => tail.tcb(pool).set_sched_link(cs, Some(task)),
            None => self.ready_heads[level].set(cs, Some(task)),
        }
        self.ready_tails[level].set(cs, Some(task));
        self.bitmap
            .set(cs, self.bitmap.get(cs) | (1 << level));
    }

    /// Remove `task` from ready list `level`, wherever it is in the FIFO.
    fn ready_list_remove(&self, cs: &Cs, pool: &TaskPool, task: TaskId, level: usize) {
        let mut prev: Option<TaskId> = None;
        let mut cur = self.ready_heads[level].get(cs);
        while let Some(id) = cur {
            let next = id.tcb(pool).sched_link(cs);
            if id == task {
                match prev {
                    Some(p) => p.tcb(pool).set_sched_link(cs, next),
                    None => self.ready_heads[level].set(cs, next),
                }
                if self.ready_tails[level].get(cs) == Some(task) {
                    self.ready_tails[level].set(cs, prev);
                }
                if self.ready_heads[level].get(cs).is_none() {
                    self.bitmap.set(cs, self.bitmap.get(cs) & !(1 << level));
                }
                return;
            }
            prev = Some(id);
            cur = next;
        }
    }

    /// Insert `task` into the delayed list, sorted ascending by wake-tick.
    pub(crate) fn delayed_push(&self, cs: &Cs, pool: &TaskPool, task: TaskId, wake_tick: u32) {
        task.tcb(pool).set_wake_tick(cs, wake_tick);
        task.tcb(pool).set_sched_link(cs, None);

        let mut prev: Option<TaskId> = None;
        let mut cur = self.delayed_head.get(cs);
        while let Some(id) = cur {
            // Stop at the first entry whose expiry is strictly after the
            // new one, so ties keep FIFO order among entries with the same
            // wake-tick.
            if crate::utils::wrapping_cmp(id.tcb(pool).wake_tick(cs), wake_tick)
                == core::cmp::Ordering::Greater
            {
                break;
            }
            prev = Some(id);
            cur = id.tcb(pool).sched_link(cs);
        }

        task.tcb(pool).set_sched_link(cs, cur);
        match prev {
            Some(p) => p.tcb(pool).set_sched_link(cs, Some(task)),
            None => self.delayed_head.set(cs, Some(task)),
        }
    }

    /// Remove `task` from the delayed list if present. Safe to call on a
    /// task that is not on the list (no-op).
    pub(crate) fn delayed_remove(&self, cs: &Cs, pool: &TaskPool, task: TaskId) {
        let mut prev: Option<TaskId> = None;
        let mut cur = self.delayed_head.get(cs);
        while let Some(id) = cur {
            let next = id.tcb(pool).sched_link(cs);
            if id == task {
                match prev {
                    Some(p) => p.tcb(pool).set_sched_link(cs, next),
                    None => self.delayed_head.set(cs, next),
                }
                return;
            }
            prev = Some(id);
            cur = next;
        }
    }

    /// Move every task whose wake-tick has been reached onto its ready
    /// list. The sort invariant guarantees we can stop at the first
    /// unexpired entry without scanning the tail (§4.3).
    pub(crate) fn advance_delayed(&self, cs: &Cs, pool: &TaskPool, now: u32) {
        loop {
            let Some(id) = self.delayed_head.get(cs) else {
                break;
            };
            if !tick_reached(id.tcb(pool).wake_tick(cs), now) {
                break;
            }
            let next = id.tcb(pool).sched_link(cs);
            self.delayed_head.set(cs, next);

            // A timed-wait task may also still be on a sync wait list; if
            // so this is a timeout wakeup and the sync primitive is
            // responsible for noticing via `blocked_on` next time it looks,
            // or `task_unblock`/timeout handling removes it explicitly. The
            // tick path's job is only to make the task Ready again.
            if id.tcb(pool).state(cs) == TaskState::Blocked {
                id.tcb(pool).set_state(cs, TaskState::Ready);
                self.ready_push(cs, pool, id);
                defmt::debug!("task {=u8} woken by delayed-list expiry", id);
            }
        }
    }
}

impl TaskId {
    /// Convenience: borrow this id's TCB out of `pool`.
    pub(crate) fn tcb<'p>(self, pool: &'p TaskPool) -> &'p crate::task::Tcb {
        pool.get(self)
    }
}
