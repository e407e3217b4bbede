//! Holds the [`Tcb`] type and task creation (§3 "Task Control Block", §4.2)

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::UnsafeCell;

use crate::config;
use crate::error::Status;
use crate::kcell::{Cs, KCell};
use crate::sync::{mutex::Mutex, queue::Queue, semaphore::Semaphore};

/// Index into the static task pool. `0..MAX_TASKS`.
pub type TaskId = u8;

/// Handle returned to callers of `task_create`. Currently identical to
/// `TaskId`; kept as a distinct alias so the public API can grow an
/// epoch/generation field later without breaking callers (there is no
/// generation today because deleted TCB slots are never reused — a
/// Non-goal, §1).
pub type TaskHandle = TaskId;

/// Entry point signature. `param` is the opaque word passed to
/// `task_create`.
pub type TaskEntry = fn(usize) -> !;

/// Task execution state (§3).
#[derive(Debug, defmt::Format, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Suspended,
    Deleted,
}

/// What a [`Blocked`](TaskState::Blocked) task is waiting on.
///
/// The pointers are opaque: only used for identity comparison ("is this
/// wakeup for me, or a timeout") and by the priority-inheritance walker,
/// never dereferenced without going back through a critical section and a
/// known-live sync object.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockedOn {
    None,
    Mutex(*const Mutex),
    Semaphore(*const Semaphore),
    Queue(*const Queue),
}

// Safety: `BlockedOn` is only ever read/written from inside a `Cs` critical
// section, same discipline as every other `KCell` payload.
unsafe impl Send for BlockedOn {}

/// The part of [`Tcb`] with real fields, before the size-rounding pad is
/// appended. Kept as its own type so [`TCB_STRIDE`] can be derived from its
/// actual compiled size rather than a hand-counted literal.
#[repr(C)]
struct TcbCore {
    /// Saved stack pointer. MUST be the first field: the PendSV trampoline
    /// dereferences the current-task pointer and then this word directly,
    /// with no knowledge of any other field (§3).
    sp: UnsafeCell<*mut u32>,

    stack_base: *mut u8,
    stack_size: usize,
    entry: TaskEntry,
    param: usize,
    name: Option<&'static str>,

    state: KCell<TaskState>,
    base_priority: KCell<u8>,
    eff_priority: KCell<u8>,
    wake_tick: KCell<u32>,
    slice: KCell<u32>,

    /// Places this task in exactly one scheduler-owned list: a priority
    /// ready list, or the delayed list. Never both.
    sched_link: KCell<Option<TaskId>>,
    /// Places this task in at most one sync-object wait list.
    wait_link: KCell<Option<TaskId>>,
    blocked_on: KCell<BlockedOn>,

    id: TaskId,
}

const TCB_CORE_SIZE: usize = core::mem::size_of::<TcbCore>();

/// Smallest power-of-two byte stride that fits [`TcbCore`]. The PendSV
/// trampoline indexes the TCB pool with a left-shift by [`TCB_SIZE_BITS`]
/// instead of a multiply.
const TCB_SIZE_BITS: u32 = {
    let mut bits = 2; // never shift by less than 4 bytes
    while (1usize << bits) < TCB_CORE_SIZE {
        bits += 1;
    }
    bits
};
const TCB_STRIDE: usize = 1 << TCB_SIZE_BITS;

/// Task Control Block (§3).
#[repr(C)]
pub struct Tcb {
    core: TcbCore,
    _pad: [u8; TCB_STRIDE - TCB_CORE_SIZE],
}

impl Tcb {
    pub(crate) const SIZE_BITS: u32 = TCB_SIZE_BITS;

    pub(crate) const UNINIT: Tcb = Tcb {
        core: TcbCore {
            sp: UnsafeCell::new(core::ptr::null_mut()),
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            entry: trampoline_of_unused_slot,
            param: 0,
            name: None,
            state: KCell::new(TaskState::Deleted),
            base_priority: KCell::new(0),
            eff_priority: KCell::new(0),
            wake_tick: KCell::new(0),
            slice: KCell::new(0),
            sched_link: KCell::new(None),
            wait_link: KCell::new(None),
            blocked_on: KCell::new(BlockedOn::None),
            id: 0,
        },
        _pad: [0; TCB_STRIDE - TCB_CORE_SIZE],
    };

    pub(crate) fn id(&self) -> TaskId {
        self.core.id
    }

    pub(crate) fn name(&self) -> Option<&'static str> {
        self.core.name
    }

    pub(crate) fn sp_ptr(&self) -> *mut *mut u32 {
        self.core.sp.get()
    }

    pub(crate) fn state(&self, cs: &Cs) -> TaskState {
        self.core.state.get(cs)
    }

    pub(crate) fn set_state(&self, cs: &Cs, state: TaskState) {
        self.core.state.set(cs, state);
    }

    pub(crate) fn base_priority(&self, cs: &Cs) -> u8 {
        self.core.base_priority.get(cs)
    }

    pub(crate) fn eff_priority(&self, cs: &Cs) -> u8 {
        self.core.eff_priority.get(cs)
    }

    pub(crate) fn set_eff_priority(&self, cs: &Cs, prio: u8) {
        self.core.eff_priority.set(cs, prio);
    }

    pub(crate) fn restore_base_priority(&self, cs: &Cs) {
        let base = self.base_priority(cs);
        self.set_eff_priority(cs, base);
    }

    pub(crate) fn wake_tick(&self, cs: &Cs) -> u32 {
        self.core.wake_tick.get(cs)
    }

    pub(crate) fn set_wake_tick(&self, cs: &Cs, tick: u32) {
        self.core.wake_tick.set(cs, tick);
    }

    pub(crate) fn slice(&self, cs: &Cs) -> u32 {
        self.core.slice.get(cs)
    }

    pub(crate) fn set_slice(&self, cs: &Cs, slice: u32) {
        self.core.slice.set(cs, slice);
    }

    pub(crate) fn sched_link(&self, cs: &Cs) -> Option<TaskId> {
        self.core.sched_link.get(cs)
    }

    pub(crate) fn set_sched_link(&self, cs: &Cs, next: Option<TaskId>) {
        self.core.sched_link.set(cs, next);
    }

    pub(crate) fn wait_link(&self, cs: &Cs) -> Option<TaskId> {
        self.core.wait_link.get(cs)
    }

    pub(crate) fn set_wait_link(&self, cs: &Cs, next: Option<TaskId>) {
        self.core.wait_link.set(cs, next);
    }

    pub(crate) fn blocked_on(&self, cs: &Cs) -> BlockedOn {
        self.core.blocked_on.get(cs)
    }

    pub(crate) fn set_blocked_on(&self, cs: &Cs, on: BlockedOn) {
        self.core.blocked_on.set(cs, on);
    }

    /// Read the sentinel word at the lowest address of this task's stack.
    pub(crate) fn canary(&self) -> u32 {
        // Safety: `stack_base` always points to a live, arena-owned region
        // at least `size_of::<u32>()` bytes long once the task is created.
        unsafe { (self.core.stack_base as *const u32).read_volatile() }
    }

    /// Build the initial saved context for a freshly created task and wire
    /// up its stack bookkeeping. Called once, from `task_create`, under a
    /// critical section.
    #[allow(clippy::too_many_arguments)]
    fn init(
        &mut self,
        id: TaskId,
        name: Option<&'static str>,
        stack: *mut u8,
        stack_size: usize,
        entry: TaskEntry,
        param: usize,
        priority: u8,
    ) {
        self.core.id = id;
        self.core.name = name;
        self.core.stack_base = stack;
        self.core.stack_size = stack_size;
        self.core.entry = entry;
        self.core.param = param;
        self.core.base_priority = KCell::new(priority);
        self.core.eff_priority = KCell::new(priority);
        self.core.state = KCell::new(TaskState::Ready);
        self.core.wake_tick = KCell::new(0);
        self.core.slice = KCell::new(crate::config::TIME_SLICE_TICKS);
        self.core.sched_link = KCell::new(None);
        self.core.wait_link = KCell::new(None);
        self.core.blocked_on = KCell::new(BlockedOn::None);

        // Safety: `stack` points to `stack_size` freshly-arena-allocated
        // bytes; the first word becomes the overflow canary, and the
        // region above it is this task's full-descending stack.
        unsafe {
            (stack as *mut u32).write_volatile(config::STACK_CANARY);
            let stack_top = stack.add(stack_size) as *mut u32;
            let sp = crate::port::build_initial_frame(stack_top, entry, param);
            *self.core.sp.get() = sp;
        }
    }
}

fn trampoline_of_unused_slot(_: usize) -> ! {
    unreachable!("unused TCB slot was scheduled")
}

/// Fixed-size pool of TCBs; slots are never freed once allocated (§3
/// "Lifecycles").
pub(crate) struct TaskPool {
    tasks: [Tcb; config::MAX_TASKS],
    next_free: KCell<usize>,
}

impl TaskPool {
    pub(crate) const fn new() -> Self {
        Self {
            tasks: [Tcb::UNINIT; config::MAX_TASKS],
            next_free: KCell::new(0),
        }
    }

    pub(crate) fn get(&self, id: TaskId) -> &Tcb {
        &self.tasks[id as usize]
    }

    /// Allocate the next free slot and initialize it. Returns
    /// `Status::TooManyTasks` if the pool is exhausted.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        &self,
        cs: &Cs,
        name: Option<&'static str>,
        stack: *mut u8,
        stack_size: usize,
        entry: TaskEntry,
        param: usize,
        priority: u8,
    ) -> Result<TaskId, Status> {
        let next = self.next_free.get(cs);
        if next >= config::MAX_TASKS {
            return Err(Status::TooManyTasks);
        }
        self.next_free.set(cs, next + 1);

        let id = next as TaskId;
        // Safety: slot `next` has not been handed out before (the bump
        // counter only increases), so we hold the only reference to it
        // while we initialize it; no other code has seen this `TaskId` yet.
        let tcb = unsafe { &mut *(self.tasks.as_ptr().add(next) as *mut Tcb) };
        tcb.init(id, name, stack, stack_size, entry, param, priority);

        Ok(id)
    }

    pub(crate) fn len(&self, cs: &Cs) -> usize {
        self.next_free.get(cs)
    }

    /// Base address of the TCB array, for the port layer to wire into
    /// `Kernel::tasks_ptr` once at init.
    pub(crate) fn base_ptr(&self) -> *const Tcb {
        self.tasks.as_ptr()
    }
}

// Safety: every mutable access to a `Tcb`'s fields goes through `KCell`,
// gated by a `Cs`; `TaskPool::create` only mutates a slot before its
// `TaskId` has been observed by anyone else.
unsafe impl Sync for TaskPool {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcb_stride_is_power_of_two_and_fits_core() {
        assert_eq!(TCB_STRIDE, 1 << TCB_SIZE_BITS);
        assert!(TCB_STRIDE >= TCB_CORE_SIZE);
        assert_eq!(core::mem::size_of::<Tcb>(), TCB_STRIDE);
    }

    #[test]
    fn sp_field_is_at_offset_zero() {
        assert_eq!(core::mem::offset_of!(TcbCore, sp), 0);
        assert_eq!(core::mem::offset_of!(Tcb, core), 0);
    }
}
