//! Synchronization primitives (§3 "Sync objects", §4.5, §4.6)

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod mutex;
pub mod queue;
pub mod semaphore;

use crate::kcell::{Cs, KCell};
use crate::task::{TaskId, TaskPool};

/// A priority-ordered intrusive wait list, threaded through each TCB's
/// `wait_link` field the same way the scheduler threads its ready/delayed
/// lists through `sched_link` — the two are separate fields (§3) precisely
/// so a timed-wait task can sit on both at once.
///
/// Ordering is strictly descending effective priority, FIFO among ties
/// (§5).
pub(crate) struct WaitList {
    head: KCell<Option<TaskId>>,
}

impl WaitList {
    pub(crate) const fn new() -> Self {
        Self {
            head: KCell::new(None),
        }
    }

    pub(crate) fn is_empty(&self, cs: &Cs) -> bool {
        self.head.get(cs).is_none()
    }

    pub(crate) fn peek(&self, cs: &Cs) -> Option<TaskId> {
        self.head.get(cs)
    }

    pub(crate) fn push(&self, cs: &Cs, pool: &TaskPool, task: TaskId) {
        let prio = task.tcb(pool).eff_priority(cs);
        let mut prev: Option<TaskId> = None;
        let mut cur = self.head.get(cs);
        while let Some(id) = cur {
            if id.tcb(pool).eff_priority(cs) < prio {
                break;
            }
            prev = Some(id);
            cur = id.tcb(pool).wait_link(cs);
        }
        task.tcb(pool).set_wait_link(cs, cur);
        match prev {
            Some(p) => p.tcb(pool).set_wait_link(cs, Some(task)),
            None => self.head.set(cs, Some(task)),
        }
    }

    /// Remove `task` from wherever it sits. No-op if it isn't on this list.
    pub(crate) fn remove(&self, cs: &Cs, pool: &TaskPool, task: TaskId) {
        let mut prev: Option<TaskId> = None;
        let mut cur = self.head.get(cs);
        while let Some(id) = cur {
            let next = id.tcb(pool).wait_link(cs);
            if id == task {
                match prev {
                    Some(p) => p.tcb(pool).set_wait_link(cs, next),
                    None => self.head.set(cs, next),
                }
                return;
            }
            prev = Some(id);
            cur = next;
        }
    }

    pub(crate) fn pop(&self, cs: &Cs, pool: &TaskPool) -> Option<TaskId> {
        let head = self.head.get(cs)?;
        self.head.set(cs, head.tcb(pool).wait_link(cs));
        Some(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_entry(_: usize) -> ! {
        unreachable!("test task entry is never actually run")
    }

    fn make_pool(priorities: &[u8]) -> (TaskPool, std::vec::Vec<TaskId>) {
        let pool = TaskPool::new();
        let mut ids = std::vec::Vec::new();
        let cs = Cs::enter();
        for &prio in priorities {
            let stack: &'static mut [u8; 64] = std::boxed::Box::leak(std::boxed::Box::new([0u8; 64]));
            ids.push(pool.create(&cs, None, stack.as_mut_ptr(), 64, noop_entry, 0, prio).unwrap());
        }
        (pool, ids)
    }

    #[test]
    fn push_orders_by_descending_priority_fifo_on_ties() {
        let (pool, ids) = make_pool(&[1, 3, 3, 2]);
        let list = WaitList::new();
        let cs = Cs::enter();
        for &id in &ids {
            list.push(&cs, &pool, id);
        }
        assert_eq!(list.pop(&cs, &pool), Some(ids[1]));
        assert_eq!(list.pop(&cs, &pool), Some(ids[2]));
        assert_eq!(list.pop(&cs, &pool), Some(ids[3]));
        assert_eq!(list.pop(&cs, &pool), Some(ids[0]));
        assert!(list.is_empty(&cs));
    }

    #[test]
    fn remove_detaches_from_the_middle() {
        let (pool, ids) = make_pool(&[3, 3, 3]);
        let list = WaitList::new();
        let cs = Cs::enter();
        for &id in &ids {
            list.push(&cs, &pool, id);
        }
        list.remove(&cs, &pool, ids[1]);
        assert_eq!(list.pop(&cs, &pool), Some(ids[0]));
        assert_eq!(list.pop(&cs, &pool), Some(ids[2]));
        assert!(list.is_empty(&cs));
    }

    /// Whatever priorities get pushed, popping drains them in
    /// non-increasing order — the invariant every caller (mutex/semaphore/
    /// queue wakeup selection) relies on.
    #[quickcheck_macros::quickcheck]
    fn pop_order_is_never_increasing(priorities: std::vec::Vec<u8>) -> quickcheck::TestResult {
        if priorities.len() > crate::config::MAX_TASKS {
            return quickcheck::TestResult::discard();
        }
        let priorities: std::vec::Vec<u8> = priorities.iter().map(|p| p % crate::config::MAX_PRIORITIES as u8).collect();
        let (pool, ids) = make_pool(&priorities);
        let list = WaitList::new();
        let cs = Cs::enter();
        for &id in &ids {
            list.push(&cs, &pool, id);
        }

        let mut last = u8::MAX;
        while let Some(id) = list.pop(&cs, &pool) {
            let prio = id.tcb(&pool).eff_priority(&cs);
            if prio > last {
                return quickcheck::TestResult::failed();
            }
            last = prio;
        }
        quickcheck::TestResult::passed()
    }
}
