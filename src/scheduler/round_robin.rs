//! Round-robin policy (§4.3.3): single FIFO, time-sliced.

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

#![cfg(feature = "scheduler-round-robin")]

use super::SchedulerState;
use crate::config;
use crate::kcell::Cs;
use crate::task::{TaskId, TaskPool};

const LEVEL: usize = 0;

impl SchedulerState {
    pub(crate) fn ready_push(&self, cs: &Cs, pool: &TaskPool, task: TaskId) {
        self.ready_list_push(cs, pool, task, LEVEL);
    }

    pub(crate) fn ready_remove(&self, cs: &Cs, pool: &TaskPool, task: TaskId) {
        self.ready_list_remove(cs, pool, task, LEVEL);
    }

    pub(crate) fn pick_next(&self, cs: &Cs) -> Option<TaskId> {
        self.ready_heads[LEVEL].get(cs)
    }

    /// Round-robin never preempts on a ready-event; it only ever preempts
    /// on slice exhaustion, via [`Self::tick_preempt`].
    pub(crate) fn should_preempt(&self, _cs: &Cs, _pool: &TaskPool, _current: TaskId, _newly_ready: TaskId) -> bool {
        false
    }

    /// Called once per tick for the running task. Decrements its slice and
    /// asks for a switch only once the slice is spent and there is actually
    /// someone else to run (a lone task never pays a switch for no reason).
    pub(crate) fn tick_preempt(&self, cs: &Cs, pool: &TaskPool, current: TaskId) -> bool {
        let tcb = current.tcb(pool);
        let remaining = tcb.slice(cs).saturating_sub(1);
        tcb.set_slice(cs, remaining);
        if remaining > 0 {
            return false;
        }
        self.ready_heads[LEVEL].get(cs).is_some_and(|head| head != current)
    }

    /// The kernel core already moved `completed` to the ready-list tail
    /// before calling this; round-robin's own job is just to hand it a
    /// fresh slice for its next turn.
    pub(crate) fn on_yield(&self, cs: &Cs, pool: &TaskPool, completed: TaskId) {
        completed.tcb(pool).set_slice(cs, config::TIME_SLICE_TICKS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_entry(_: usize) -> ! {
        unreachable!("test task entry is never actually run")
    }

    fn setup(n: usize) -> (TaskPool, SchedulerState, std::vec::Vec<TaskId>) {
        let pool = TaskPool::new();
        let sched = SchedulerState::new();
        let mut ids = std::vec::Vec::new();
        let cs = Cs::enter();
        sched.init(&cs);
        for _ in 0..n {
            let stack: &'static mut [u8; 64] = std::boxed::Box::leak(std::boxed::Box::new([0u8; 64]));
            let id = pool.create(&cs, None, stack.as_mut_ptr(), 64, noop_entry, 0, 1).unwrap();
            sched.ready_push(&cs, &pool, id);
            ids.push(id);
        }
        (pool, sched, ids)
    }

    #[test]
    fn tick_preempt_fires_only_after_slice_exhausted() {
        let (pool, sched, ids) = setup(2);
        let cs = Cs::enter();
        let current = ids[0];
        // `current` is conceptually Running, not sitting in the ready FIFO.
        sched.ready_remove(&cs, &pool, current);
        for _ in 0..(config::TIME_SLICE_TICKS - 1) {
            assert!(!sched.tick_preempt(&cs, &pool, current));
        }
        assert!(sched.tick_preempt(&cs, &pool, current));
    }

    #[test]
    fn tick_preempt_never_fires_for_a_lone_task() {
        let (pool, sched, ids) = setup(1);
        let cs = Cs::enter();
        let current = ids[0];
        sched.ready_remove(&cs, &pool, current);
        for _ in 0..config::TIME_SLICE_TICKS {
            assert!(!sched.tick_preempt(&cs, &pool, current));
        }
    }

    #[test]
    fn on_yield_resets_slice() {
        let (pool, sched, ids) = setup(1);
        let cs = Cs::enter();
        let id = ids[0];
        id.tcb(&pool).set_slice(&cs, 1);
        sched.on_yield(&cs, &pool, id);
        assert_eq!(id.tcb(&pool).slice(&cs), config::TIME_SLICE_TICKS);
    }
}
