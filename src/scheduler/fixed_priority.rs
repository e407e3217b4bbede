//! Fixed-priority preemptive policy (§4.3.1)

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

#![cfg(feature = "scheduler-fixed-priority")]

use super::SchedulerState;
use crate::kcell::Cs;
use crate::task::{TaskId, TaskPool};

impl SchedulerState {
    /// Push `task` onto the ready list for its current effective priority.
    pub(crate) fn ready_push(&self, cs: &Cs, pool: &TaskPool, task: TaskId) {
        let level = task.tcb(pool).eff_priority(cs) as usize;
        self.ready_list_push(cs, pool, task, level);
    }

    pub(crate) fn ready_remove(&self, cs: &Cs, pool: &TaskPool, task: TaskId) {
        let level = task.tcb(pool).eff_priority(cs) as usize;
        self.ready_list_remove(cs, pool, task, level);
    }

    /// Highest set bit in the priority bitmap, O(1) with `leading_zeros`.
    pub(crate) fn pick_next(&self, cs: &Cs) -> Option<TaskId> {
        let bitmap = self.bitmap.get(cs);
        if bitmap == 0 {
            return None;
        }
        let level = 31 - bitmap.leading_zeros();
        self.ready_heads[level as usize].get(cs)
    }

    /// A newly-ready task preempts iff it outranks the running task.
    pub(crate) fn should_preempt(&self, cs: &Cs, pool: &TaskPool, current: TaskId, newly_ready: TaskId) -> bool {
        newly_ready.tcb(pool).eff_priority(cs) > current.tcb(pool).eff_priority(cs)
    }

    /// Fixed priority never reorders on voluntary yield: the task simply
    /// goes back to the tail of its own level (done by the caller via
    /// `ready_push`, which always appends).
    pub(crate) fn on_yield(&self, _cs: &Cs, _pool: &TaskPool, _completed: TaskId) {}

    /// Fixed priority never preempts on tick alone; only rank matters.
    pub(crate) fn tick_preempt(&self, _cs: &Cs, _pool: &TaskPool, _current: TaskId) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_entry(_: usize) -> ! {
        unreachable!("test task entry is never actually run")
    }

    fn setup(priorities: &[u8]) -> (TaskPool, SchedulerState) {
        let pool = TaskPool::new();
        let sched = SchedulerState::new();
        let cs = Cs::enter();
        sched.init(&cs);
        for &prio in priorities {
            let stack: &'static mut [u8; 64] = std::boxed::Box::leak(std::boxed::Box::new([0u8; 64]));
            let id = pool.create(&cs, None, stack.as_mut_ptr(), 64, noop_entry, 0, prio).unwrap();
            sched.ready_push(&cs, &pool, id);
        }
        (pool, sched)
    }

    #[test]
    fn pick_next_returns_globally_highest_priority() {
        let (pool, sched) = setup(&[1, 4, 2]);
        let cs = Cs::enter();
        let next = sched.pick_next(&cs).unwrap();
        assert_eq!(next.tcb(&pool).eff_priority(&cs), 4);
    }

    #[test]
    fn pick_next_is_fifo_among_same_priority_level() {
        let (pool, sched) = setup(&[2, 2]);
        let cs = Cs::enter();
        let first = sched.pick_next(&cs).unwrap();
        assert_eq!(first.tcb(&pool).eff_priority(&cs), 2);
        sched.ready_remove(&cs, &pool, first);
        let second = sched.pick_next(&cs).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn should_preempt_requires_strictly_higher_priority() {
        let (pool, sched) = setup(&[2, 2, 5]);
        let cs = Cs::enter();
        let same = pool.get(0).id();
        let other_same = pool.get(1).id();
        let higher = pool.get(2).id();
        assert!(!sched.should_preempt(&cs, &pool, same, other_same));
        assert!(sched.should_preempt(&cs, &pool, same, higher));
        assert!(!sched.should_preempt(&cs, &pool, higher, same));
    }
}
