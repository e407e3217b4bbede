//! Counting semaphore (§4.6)

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use super::WaitList;
use crate::config;
use crate::error::Status;
use crate::kcell::{Cs, KCell};
use crate::kernel;
use crate::task::BlockedOn;

/// `{count, max, waiters}` (§3). `max == 0` means unbounded.
pub struct Semaphore {
    count: KCell<u32>,
    max: KCell<u32>,
    waiters: WaitList,
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl Semaphore {
    pub const fn new() -> Self {
        Self {
            count: KCell::new(0),
            max: KCell::new(0),
            waiters: WaitList::new(),
        }
    }

    /// `sem_init(initial, max)` (§6).
    pub fn init(&self, initial: u32, max: u32) {
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        self.count.set(cs, initial);
        self.max.set(cs, max);
    }

    /// `sem_wait(timeout)` (§4.6).
    pub fn wait(&self, timeout: u32) -> Status {
        let pool = kernel::pool();
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();

        let Some(caller) = kernel::current_task_id(cs) else {
            return Status::InvalidState;
        };

        let count = self.count.get(cs);
        if count > 0 {
            self.count.set(cs, count - 1);
            return Status::Success;
        }

        if timeout == config::NO_WAIT {
            return Status::Timeout;
        }

        self.waiters.push(cs, pool, caller);
        kernel::task_block(cs, caller, BlockedOn::Semaphore(self as *const Semaphore), timeout);
        drop(cs_owner);

        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        if caller.tcb(pool).blocked_on(cs) == BlockedOn::Semaphore(self as *const Semaphore) {
            self.waiters.remove(cs, pool, caller);
            caller.tcb(pool).set_blocked_on(cs, BlockedOn::None);
            Status::Timeout
        } else {
            Status::Success
        }
    }

    /// `sem_try_wait()`: equivalent to `wait(NO_WAIT)`.
    pub fn try_wait(&self) -> Status {
        self.wait(config::NO_WAIT)
    }

    /// `sem_signal()` (§4.6). A waiter's wakeup directly consumes the
    /// would-be increment, so `count` only rises when nobody is waiting.
    pub fn signal(&self) -> Status {
        let pool = kernel::pool();
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();

        if let Some(waiter) = self.waiters.pop(cs, pool) {
            waiter.tcb(pool).set_blocked_on(cs, BlockedOn::None);
            kernel::task_unblock(cs, waiter);
            return Status::Success;
        }

        let count = self.count.get(cs);
        let max = self.max.get(cs);
        if max != 0 && count >= max {
            return Status::Overflow;
        }
        self.count.set(cs, count + 1);
        Status::Success
    }

    /// `sem_count()`.
    pub fn count(&self) -> u32 {
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        self.count.get(cs)
    }
}

// Safety: every field is a `KCell`/`WaitList`, both gated by `Cs`.
unsafe impl Sync for Semaphore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests as th;
    use crate::task::TaskState;

    #[test]
    fn wait_consumes_count_signal_replenishes_when_no_waiters() {
        let _g = th::GUARD.lock().unwrap();
        th::ensure_init();
        let (l, _, _) = th::shared_tasks();
        th::set_current(l);

        let sem = Semaphore::new();
        sem.init(1, 3);
        assert_eq!(sem.wait(config::NO_WAIT), Status::Success);
        assert_eq!(sem.count(), 0);
        assert_eq!(sem.try_wait(), Status::Timeout);
        assert_eq!(sem.signal(), Status::Success);
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn signal_refuses_past_bounded_max() {
        let _g = th::GUARD.lock().unwrap();
        th::ensure_init();
        let (l, _, _) = th::shared_tasks();
        th::set_current(l);

        let sem = Semaphore::new();
        sem.init(2, 2);
        assert_eq!(sem.signal(), Status::Overflow);
    }

    #[test]
    fn signal_wakes_the_highest_priority_waiter() {
        let _g = th::GUARD.lock().unwrap();
        th::ensure_init();
        let (l, m_task, h) = th::shared_tasks();
        let pool = crate::kernel::pool();

        let sem = Semaphore::new();
        sem.init(0, 0);

        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        for id in [l, m_task, h] {
            id.tcb(pool).restore_base_priority(cs);
            id.tcb(pool).set_state(cs, TaskState::Blocked);
        }
        // Insertion order deliberately not priority order.
        sem.waiters.push(cs, pool, l);
        sem.waiters.push(cs, pool, h);
        sem.waiters.push(cs, pool, m_task);
        drop(cs_owner);

        assert_eq!(sem.signal(), Status::Success);

        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        assert_eq!(h.tcb(pool).state(cs), TaskState::Ready);
        assert_eq!(l.tcb(pool).state(cs), TaskState::Blocked);
        assert_eq!(m_task.tcb(pool).state(cs), TaskState::Blocked);
        // count is untouched: the wakeup itself satisfied the signal.
        assert_eq!(sem.count(), 0);

        // Cleanup for later tests reusing these shared tasks.
        l.tcb(pool).set_state(cs, TaskState::Ready);
        m_task.tcb(pool).set_state(cs, TaskState::Ready);
    }
}
