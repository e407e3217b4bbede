//! Bounded message queue (§4.6)

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use super::WaitList;
use crate::config;
use crate::error::Status;
use crate::kcell::{Cs, KCell};
use crate::kernel;
use crate::task::{BlockedOn, TaskPool};

/// `{buffer, item_size, capacity, count, read_idx, write_idx, senders,
/// receivers}` (§3). The byte buffer is arena-allocated at `create` time,
/// since its size is a runtime parameter rather than known at compile time
/// the way `Mutex`/`Semaphore` are sized.
pub struct Queue {
    buffer: *mut u8,
    item_size: usize,
    capacity: usize,
    count: KCell<usize>,
    read_idx: KCell<usize>,
    write_idx: KCell<usize>,
    senders: WaitList,
    receivers: WaitList,
}

impl Queue {
    /// `queue_create(capacity, item_size)` (§6). Both must be non-zero.
    pub fn create(capacity: usize, item_size: usize) -> Result<&'static Queue, Status> {
        if capacity == 0 || item_size == 0 {
            return Err(Status::InvalidParam);
        }
        let bytes = capacity.checked_mul(item_size).ok_or(Status::InvalidParam)?;

        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        let buffer = kernel::arena().alloc(cs, bytes).ok_or(Status::NoMemory)?;
        let queue = Queue {
            buffer,
            item_size,
            capacity,
            count: KCell::new(0),
            read_idx: KCell::new(0),
            write_idx: KCell::new(0),
            senders: WaitList::new(),
            receivers: WaitList::new(),
        };
        kernel::arena().alloc_value(cs, queue).ok_or(Status::NoMemory)
    }

    /// `queue_send(item, timeout)` (§4.6). `item.len()` must equal the
    /// queue's `item_size`.
    pub fn send(&self, item: &[u8], timeout: u32) -> Status {
        if item.len() != self.item_size {
            return Status::InvalidParam;
        }
        let pool = kernel::pool();

        loop {
            let mut cs_owner = Cs::enter();
            let cs = cs_owner.borrow();

            if self.count.get(cs) < self.capacity {
                self.push_locked(cs, item);
                self.wake_one(cs, pool, &self.receivers);
                return Status::Success;
            }

            let Some(caller) = kernel::current_task_id(cs) else {
                return Status::InvalidState;
            };
            if timeout == config::NO_WAIT {
                return Status::Full;
            }

            self.senders.push(cs, pool, caller);
            kernel::task_block(cs, caller, BlockedOn::Queue(self as *const Queue), timeout);
            drop(cs_owner);

            let mut cs_owner = Cs::enter();
            let cs = cs_owner.borrow();
            if caller.tcb(pool).blocked_on(cs) == BlockedOn::Queue(self as *const Queue) {
                self.senders.remove(cs, pool, caller);
                caller.tcb(pool).set_blocked_on(cs, BlockedOn::None);
                return Status::Timeout;
            }
            drop(cs_owner);
            // Woken because a slot opened up, or spuriously: loop re-checks
            // `count` rather than assuming success (§4.6 "defensively
            // returns Full/Empty if violated").
        }
    }

    /// `queue_receive(timeout) -> (buf, Status)`. `out.len()` must equal
    /// the queue's `item_size`.
    pub fn receive(&self, out: &mut [u8], timeout: u32) -> Status {
        if out.len() != self.item_size {
            return Status::InvalidParam;
        }
        let pool = kernel::pool();

        loop {
            let mut cs_owner = Cs::enter();
            let cs = cs_owner.borrow();

            if self.count.get(cs) > 0 {
                self.pop_locked(cs, out);
                self.wake_one(cs, pool, &self.senders);
                return Status::Success;
            }

            let Some(caller) = kernel::current_task_id(cs) else {
                return Status::InvalidState;
            };
            if timeout == config::NO_WAIT {
                return Status::Empty;
            }

            self.receivers.push(cs, pool, caller);
            kernel::task_block(cs, caller, BlockedOn::Queue(self as *const Queue), timeout);
            drop(cs_owner);

            let mut cs_owner = Cs::enter();
            let cs = cs_owner.borrow();
            if caller.tcb(pool).blocked_on(cs) == BlockedOn::Queue(self as *const Queue) {
                self.receivers.remove(cs, pool, caller);
                caller.tcb(pool).set_blocked_on(cs, BlockedOn::None);
                return Status::Timeout;
            }
            drop(cs_owner);
        }
    }

    /// `queue_reset()`: clears the buffer and releases every blocked
    /// sender (never receivers — there is nothing new for a receiver to
    /// read).
    pub fn reset(&self) {
        let pool = kernel::pool();
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        self.count.set(cs, 0);
        self.read_idx.set(cs, 0);
        self.write_idx.set(cs, 0);
        while let Some(id) = self.senders.pop(cs, pool) {
            id.tcb(pool).set_blocked_on(cs, BlockedOn::None);
            kernel::task_unblock(cs, id);
        }
    }

    pub fn messages_waiting(&self) -> usize {
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        self.count.get(cs)
    }

    pub fn spaces_available(&self) -> usize {
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        self.capacity - self.count.get(cs)
    }

    pub fn is_full(&self) -> bool {
        self.messages_waiting() == self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.messages_waiting() == 0
    }

    fn push_locked(&self, cs: &Cs, item: &[u8]) {
        let idx = self.write_idx.get(cs);
        // Safety: `idx < capacity` was just checked by the caller; `buffer`
        // holds `capacity * item_size` bytes and `item.len() == item_size`.
        unsafe {
            core::ptr::copy_nonoverlapping(item.as_ptr(), self.buffer.add(idx * self.item_size), self.item_size);
        }
        self.write_idx.set(cs, (idx + 1) % self.capacity);
        self.count.set(cs, self.count.get(cs) + 1);
    }

    fn pop_locked(&self, cs: &Cs, out: &mut [u8]) {
        let idx = self.read_idx.get(cs);
        // Safety: see `push_locked`.
        unsafe {
            core::ptr::copy_nonoverlapping(self.buffer.add(idx * self.item_size), out.as_mut_ptr(), self.item_size);
        }
        self.read_idx.set(cs, (idx + 1) % self.capacity);
        self.count.set(cs, self.count.get(cs) - 1);
    }

    fn wake_one(&self, cs: &Cs, pool: &TaskPool, list: &WaitList) {
        if let Some(id) = list.pop(cs, pool) {
            id.tcb(pool).set_blocked_on(cs, BlockedOn::None);
            kernel::task_unblock(cs, id);
        }
    }
}

// Safety: `buffer` is only ever touched by `push_locked`/`pop_locked`,
// both of which require a `Cs`; every other field is a `KCell`/`WaitList`.
unsafe impl Sync for Queue {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests as th;
    use crate::task::TaskState;

    #[test]
    fn send_then_receive_round_trips_fifo() {
        let _g = th::GUARD.lock().unwrap();
        th::ensure_init();
        let (l, _, _) = th::shared_tasks();
        th::set_current(l);

        let q = Queue::create(2, 4).expect("arena has room");
        assert!(q.is_empty());
        assert_eq!(q.send(&1u32.to_le_bytes(), 0), Status::Success);
        assert_eq!(q.send(&2u32.to_le_bytes(), 0), Status::Success);
        assert!(q.is_full());

        let mut out = [0u8; 4];
        assert_eq!(q.receive(&mut out, 0), Status::Success);
        assert_eq!(u32::from_le_bytes(out), 1);
        assert_eq!(q.receive(&mut out, 0), Status::Success);
        assert_eq!(u32::from_le_bytes(out), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn send_reports_full_without_blocking_when_no_wait() {
        let _g = th::GUARD.lock().unwrap();
        th::ensure_init();
        let (l, _, _) = th::shared_tasks();
        th::set_current(l);

        let q = Queue::create(1, 1).unwrap();
        assert_eq!(q.send(&[1], config::NO_WAIT), Status::Success);
        assert_eq!(q.send(&[2], config::NO_WAIT), Status::Full);
    }

    #[test]
    fn receive_reports_empty_without_blocking_when_no_wait() {
        let _g = th::GUARD.lock().unwrap();
        th::ensure_init();
        let (l, _, _) = th::shared_tasks();
        th::set_current(l);

        let q = Queue::create(1, 1).unwrap();
        let mut out = [0u8];
        assert_eq!(q.receive(&mut out, config::NO_WAIT), Status::Empty);
    }

    #[test]
    fn reset_wakes_blocked_senders() {
        let _g = th::GUARD.lock().unwrap();
        th::ensure_init();
        let (l, m_task, _) = th::shared_tasks();
        let pool = crate::kernel::pool();

        let q = Queue::create(1, 1).unwrap();
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        q.count.set(cs, 1); // full
        m_task.tcb(pool).set_state(cs, TaskState::Blocked);
        q.senders.push(cs, pool, m_task);
        drop(cs_owner);

        th::set_current(l);
        q.reset();

        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        assert_eq!(m_task.tcb(pool).state(cs), TaskState::Ready);
        assert_eq!(q.messages_waiting(), 0);
        m_task.tcb(pool).set_state(cs, TaskState::Ready);
    }
}
