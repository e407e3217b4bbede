//! Recursive mutex with transitive priority inheritance (§4.5)

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use super::WaitList;
use crate::config;
use crate::error::Status;
use crate::kcell::{Cs, KCell};
use crate::kernel;
use crate::task::{BlockedOn, TaskId, TaskState};

/// `{owner, recursion, waiters}` (§3).
pub struct Mutex {
    owner: KCell<Option<TaskId>>,
    recursion: KCell<u8>,
    waiters: WaitList,
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            owner: KCell::new(None),
            recursion: KCell::new(0),
            waiters: WaitList::new(),
        }
    }

    /// `mutex_init` (§6): reset to the unlocked state. Intended to be
    /// called once on a caller-declared `static Mutex`.
    pub fn init(&self) {
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        self.owner.set(cs, None);
        self.recursion.set(cs, 0);
        while let Some(waiter) = self.waiters.pop(cs, kernel::pool()) {
            defmt::warn!("mutex {=usize:x} re-initialized with waiters present", self as *const Self as usize);
            kernel::task_unblock(cs, waiter);
        }
    }

    /// `lock(timeout)` (§4.5). `NO_WAIT` tries once; `MAX_WAIT` blocks
    /// forever.
    pub fn lock(&self, timeout: u32) -> Status {
        let pool = kernel::pool();
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();

        let Some(caller) = kernel::current_task_id(cs) else {
            return Status::InvalidState;
        };

        match self.owner.get(cs) {
            None => {
                self.owner.set(cs, Some(caller));
                self.recursion.set(cs, 1);
                return Status::Success;
            }
            Some(owner) if owner == caller => {
                let rec = self.recursion.get(cs);
                self.recursion.set(cs, rec.saturating_add(1).min(255));
                return Status::Success;
            }
            Some(_) => {}
        }

        if timeout == config::NO_WAIT {
            return Status::Timeout;
        }

        self.waiters.push(cs, pool, caller);
        self.inherit_priority(cs, caller);
        kernel::task_block(cs, caller, BlockedOn::Mutex(self as *const Mutex), timeout);
        drop(cs_owner);

        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        if caller.tcb(pool).blocked_on(cs) == BlockedOn::Mutex(self as *const Mutex) {
            // Still tagged as waiting on us: the delayed list woke it, not
            // an unlock.
            self.waiters.remove(cs, pool, caller);
            caller.tcb(pool).set_blocked_on(cs, BlockedOn::None);
            Status::Timeout
        } else {
            Status::Success
        }
    }

    /// `unlock()` (§4.5). Errors if the caller is not the current owner.
    pub fn unlock(&self) -> Status {
        let pool = kernel::pool();
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();

        let Some(caller) = kernel::current_task_id(cs) else {
            return Status::InvalidState;
        };
        if self.owner.get(cs) != Some(caller) {
            return Status::InvalidState;
        }

        let rec = self.recursion.get(cs);
        if rec > 1 {
            self.recursion.set(cs, rec - 1);
            return Status::Success;
        }

        caller.tcb(pool).restore_base_priority(cs);
        match self.waiters.pop(cs, pool) {
            Some(next_owner) => {
                self.owner.set(cs, Some(next_owner));
                self.recursion.set(cs, 1);
                kernel::task_unblock(cs, next_owner);
            }
            None => {
                self.owner.set(cs, None);
                self.recursion.set(cs, 0);
            }
        }
        Status::Success
    }

    /// Transitive priority-inheritance walk (§4.5). Bounded by
    /// `MAX_CHAIN`; a cycle (which would otherwise spin forever) is logged
    /// and the walk simply stops, per spec: deadlock prevention is the
    /// application's responsibility, not this kernel's.
    fn inherit_priority(&self, cs: &Cs, waiter: TaskId) {
        let pool = kernel::pool();
        let mut boost = waiter.tcb(pool).eff_priority(cs);
        let mut target = self.owner.get(cs);
        let mut depth = 0;

        while let Some(target_id) = target {
            if depth >= config::MAX_CHAIN {
                defmt::warn!("priority inheritance walk truncated at MAX_CHAIN");
                break;
            }
            let target_tcb = target_id.tcb(pool);
            if target_tcb.eff_priority(cs) < boost {
                kernel::boost_priority(cs, target_id, boost);
            } else {
                boost = target_tcb.eff_priority(cs);
            }

            if target_tcb.state(cs) == TaskState::Blocked {
                if let BlockedOn::Mutex(next_mutex) = target_tcb.blocked_on(cs) {
                    // Safety: a task's blocked-on mutex stays live as long
                    // as it remains tagged Blocked on it, since unlocking
                    // always clears the tag before any further use.
                    target = unsafe { (*next_mutex).owner.get(cs) };
                    depth += 1;
                    continue;
                }
            }
            break;
        }
    }
}

// Safety: every field is a `KCell`/`WaitList`, both gated by `Cs`.
unsafe impl Sync for Mutex {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests as th;

    #[test]
    fn uncontended_lock_recurses_then_unlocks_in_step() {
        let _g = th::GUARD.lock().unwrap();
        th::ensure_init();
        let (l, _, _) = th::shared_tasks();
        th::set_current(l);

        let m = Mutex::new();
        assert_eq!(m.lock(config::NO_WAIT), Status::Success);
        assert_eq!(m.lock(config::NO_WAIT), Status::Success);
        assert_eq!(m.unlock(), Status::Success);
        assert_eq!(m.unlock(), Status::Success);
        // Fully released: a third unlock from the same (now non-owner) task
        // is an error rather than a no-op.
        assert_eq!(m.unlock(), Status::InvalidState);
    }

    #[test]
    fn unlock_hands_off_to_highest_priority_waiter() {
        let _g = th::GUARD.lock().unwrap();
        th::ensure_init();
        let (l, m_task, h) = th::shared_tasks();
        let pool = crate::kernel::pool();

        let m = Mutex::new();
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        for id in [l, m_task, h] {
            id.tcb(pool).restore_base_priority(cs);
        }
        m.owner.set(cs, Some(l));
        m.recursion.set(cs, 1);
        // Insertion order deliberately not priority order.
        m_task.tcb(pool).set_state(cs, TaskState::Blocked);
        h.tcb(pool).set_state(cs, TaskState::Blocked);
        m.waiters.push(cs, pool, m_task);
        m.waiters.push(cs, pool, h);
        drop(cs_owner);

        th::set_current(l);
        assert_eq!(m.unlock(), Status::Success);

        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        assert_eq!(m.owner.get(cs), Some(h));
        assert_eq!(h.tcb(pool).state(cs), TaskState::Ready);
        assert_eq!(m_task.tcb(pool).state(cs), TaskState::Blocked);
    }

    #[test]
    fn inherit_priority_walks_transitively_across_two_mutexes() {
        let _g = th::GUARD.lock().unwrap();
        th::ensure_init();
        let (l, m_task, h) = th::shared_tasks();
        let pool = crate::kernel::pool();

        let mutex_a = Mutex::new();
        let mutex_b = Mutex::new();
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();

        // Reset to base priorities/states: these three TCBs are shared
        // across tests.
        l.tcb(pool).restore_base_priority(cs);
        m_task.tcb(pool).restore_base_priority(cs);
        h.tcb(pool).restore_base_priority(cs);
        l.tcb(pool).set_state(cs, TaskState::Ready);

        // L owns A. M owns B and is blocked on A (waiting behind L).
        mutex_a.owner.set(cs, Some(l));
        mutex_a.recursion.set(cs, 1);
        mutex_b.owner.set(cs, Some(m_task));
        mutex_b.recursion.set(cs, 1);
        m_task.tcb(pool).set_state(cs, TaskState::Blocked);
        m_task.tcb(pool).set_blocked_on(cs, BlockedOn::Mutex(&mutex_a as *const Mutex));

        // H attempts to lock B: boosts M to H's priority, then continues
        // the walk through A to L.
        mutex_b.inherit_priority(cs, h);

        assert_eq!(m_task.tcb(pool).eff_priority(cs), h.tcb(pool).eff_priority(cs));
        assert_eq!(l.tcb(pool).eff_priority(cs), h.tcb(pool).eff_priority(cs));

        // Cleanup so later tests see M back in a sane (non-Blocked) state.
        m_task.tcb(pool).set_state(cs, TaskState::Ready);
        m_task.tcb(pool).set_blocked_on(cs, BlockedOn::None);
    }
}
