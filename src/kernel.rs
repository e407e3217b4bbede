//! Global kernel singleton and state machine (§3 "Global kernel state", §4.4)

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::arena::Arena;
use crate::config;
use crate::error::{kernel_assert, kernel_fault, Status};
use crate::kcell::{Cs, KCell};
use crate::port;
use crate::scheduler::SchedulerState;
use crate::task::{BlockedOn, TaskEntry, TaskHandle, TaskId, TaskPool, TaskState, Tcb};
use crate::timer::TimerList;
use crate::utils::ms_to_ticks;

/// Top-level kernel lifecycle state (§3). Distinct from a single task's
/// [`TaskState`].
#[derive(Debug, defmt::Format, Clone, Copy, PartialEq, Eq)]
enum KernelState {
    Inactive,
    Ready,
    Running,
    Suspended,
}

/// Sentinel stored in [`Kernel::current_task`] meaning "no task is current".
/// Read directly by the PendSV trampoline, which is why it's a plain `u32`
/// rather than an `Option<TaskId>` — the asm only ever compares it to -1.
const NO_TASK: u32 = u32::MAX;

/// The kernel's global, process-wide state (§9: "a module-scope cell of a
/// struct whose methods require proof of critical-section holding").
///
/// `#[repr(C)]` with the asm-visible fields first: the PendSV trampoline in
/// `port::asm` reads `current_task` and `tasks_ptr` by fixed byte offset
/// (`CURRENT_TASK_OFFSET` etc.). The global kernel state is a singleton, so
/// `sym KERNEL` gives the asm the object's address directly rather than
/// going through an `AtomicPtr<Kernel>` indirection.
#[repr(C)]
pub(crate) struct Kernel {
    current_task: AtomicU32,
    tasks_ptr: AtomicPtr<Tcb>,

    tick: KCell<u32>,
    state: KCell<KernelState>,
    /// Part of the data model (§3); no operation in §4/§6 ever sets it.
    /// Kept so the field is representable, touched by nothing.
    scheduler_suspended: KCell<bool>,
    idle_task: KCell<Option<TaskId>>,

    pool: TaskPool,
    scheduler: SchedulerState,
    arena: Arena<{ config::TOTAL_HEAP }>,
    timers: TimerList,
}

impl Kernel {
    pub(crate) const CURRENT_TASK_OFFSET: usize = core::mem::offset_of!(Kernel, current_task);
    pub(crate) const TASKS_PTR_OFFSET: usize = core::mem::offset_of!(Kernel, tasks_ptr);

    const fn new() -> Self {
        Self {
            current_task: AtomicU32::new(NO_TASK),
            tasks_ptr: AtomicPtr::new(core::ptr::null_mut()),
            tick: KCell::new(0),
            state: KCell::new(KernelState::Inactive),
            scheduler_suspended: KCell::new(false),
            idle_task: KCell::new(None),
            pool: TaskPool::new(),
            scheduler: SchedulerState::new(),
            arena: Arena::new(),
            timers: TimerList::new(),
        }
    }

    fn current_task_id(&self, cs: &Cs) -> Option<TaskId> {
        let _ = cs;
        match self.current_task.load(Ordering::Relaxed) {
            NO_TASK => None,
            id => Some(id as TaskId),
        }
    }

    fn set_current_task_id(&self, cs: &Cs, id: Option<TaskId>) {
        let _ = cs;
        let raw = match id {
            Some(id) => id as u32,
            None => NO_TASK,
        };
        self.current_task.store(raw, Ordering::Relaxed);
    }
}

// Safety: every field is either a `KCell` (gated by `Cs`), an atomic used
// only by the asm trampoline and by methods above that take a `Cs`, or
// `Sync` in its own right (`TaskPool`, `SchedulerState`, `Arena`).
unsafe impl Sync for Kernel {}

pub(crate) static KERNEL: Kernel = Kernel::new();

fn idle_task_entry(_param: usize) -> ! {
    loop {
        #[cfg(not(test))]
        cortex_m::asm::wfi();
        #[cfg(feature = "scheduler-cooperative")]
        yield_now();
    }
}

/// `init()` (§6): create the arena-backed singletons, the idle task, and
/// wire `Kernel::tasks_ptr` for the asm trampoline. Must be called exactly
/// once, before `task_create`/`start_scheduler`.
pub fn init() -> Status {
    let mut cs_owner = Cs::enter();
    let cs = cs_owner.borrow();

    if KERNEL.state.get(cs) != KernelState::Inactive {
        return Status::InvalidState;
    }

    KERNEL.tasks_ptr.store(KERNEL.pool.base_ptr() as *mut Tcb, Ordering::Relaxed);
    KERNEL.scheduler.init(cs);

    match create_task_locked(cs, idle_task_entry, Some("idle"), 0, 0, config::IDLE_PRIORITY) {
        Ok(id) => {
            KERNEL.idle_task.set(cs, Some(id));
        }
        Err(status) => return status,
    }

    port::init();
    KERNEL.state.set(cs, KernelState::Ready);
    defmt::info!("kernel init complete");
    Status::Success
}

/// `start_scheduler()` (§6): never returns on success. `syst` and
/// `systicks_per_tick` configure the periodic tick timer.
pub fn start_scheduler(syst: cortex_m::peripheral::SYST, systicks_per_tick: u32) -> Status {
    {
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        if KERNEL.state.get(cs) != KernelState::Ready {
            return Status::InvalidState;
        }
        KERNEL.state.set(cs, KernelState::Running);
    }
    port::start_tick(syst, systicks_per_tick);
    defmt::info!("scheduler starting");
    port::start_first_task()
}

pub fn get_tick() -> u32 {
    let mut cs_owner = Cs::enter();
    let cs = cs_owner.borrow();
    KERNEL.tick.get(cs)
}

/// `delay_ticks(n)` (§4.4): `0` is a no-op; otherwise block the current task
/// until `tick >= now + n`.
pub fn delay_ticks(ticks: u32) {
    if ticks == 0 {
        return;
    }
    let mut cs_owner = Cs::enter();
    let cs = cs_owner.borrow();
    let Some(id) = KERNEL.current_task_id(cs) else {
        return;
    };
    task_block(cs, id, BlockedOn::None, ticks);
}

/// `delay_ms(ms)`: converts via [`ms_to_ticks`] (rounds up, minimum 1 tick).
pub fn delay_ms(ms: u32) {
    delay_ticks(ms_to_ticks(ms));
}

/// `yield_now()` (§6): give up the remainder of the current time slice.
pub fn yield_now() {
    port::yield_now();
}

pub fn task_current() -> Option<TaskHandle> {
    let mut cs_owner = Cs::enter();
    let cs = cs_owner.borrow();
    KERNEL.current_task_id(cs)
}

pub fn task_state(handle: TaskHandle) -> Result<TaskState, Status> {
    let mut cs_owner = Cs::enter();
    let cs = cs_owner.borrow();
    if handle as usize >= KERNEL.pool.len(cs) {
        return Err(Status::TaskNotFound);
    }
    Ok(handle.tcb(&KERNEL.pool).state(cs))
}

/// `task_priority(h)` (§6): reads the task's current effective priority.
pub fn task_priority(handle: TaskHandle) -> Result<u8, Status> {
    let mut cs_owner = Cs::enter();
    let cs = cs_owner.borrow();
    if handle as usize >= KERNEL.pool.len(cs) {
        return Err(Status::TaskNotFound);
    }
    Ok(handle.tcb(&KERNEL.pool).eff_priority(cs))
}

/// `task_suspend(h)` (§4.4 state machine): the only drawn `suspend` edge is
/// `Running -> Suspended`; every other source state is an invalid
/// transition and is rejected and logged rather than silently performed.
pub fn task_suspend(handle: TaskHandle) -> Status {
    let mut cs_owner = Cs::enter();
    let cs = cs_owner.borrow();
    if handle as usize >= KERNEL.pool.len(cs) {
        return Status::TaskNotFound;
    }
    let tcb = handle.tcb(&KERNEL.pool);
    if tcb.state(cs) != TaskState::Running {
        defmt::warn!("task {=u8} suspend rejected: not Running", handle);
        return Status::InvalidState;
    }
    tcb.set_state(cs, TaskState::Suspended);
    if KERNEL.current_task_id(cs) == Some(handle) {
        port::yield_now();
    }
    Status::Success
}

/// `task_resume(h)`: valid only from Suspended.
pub fn task_resume(handle: TaskHandle) -> Status {
    let mut cs_owner = Cs::enter();
    let cs = cs_owner.borrow();
    if handle as usize >= KERNEL.pool.len(cs) {
        return Status::TaskNotFound;
    }
    let tcb = handle.tcb(&KERNEL.pool);
    if tcb.state(cs) != TaskState::Suspended {
        return Status::InvalidState;
    }
    make_ready(cs, handle);
    Status::Success
}

/// `task_check_stack(h)` (§6, supplemented by §3's canary invariant):
/// compares the canary word to [`config::STACK_CANARY`].
pub fn task_check_stack(handle: TaskHandle) -> Status {
    let mut cs_owner = Cs::enter();
    let cs = cs_owner.borrow();
    if handle as usize >= KERNEL.pool.len(cs) {
        return Status::TaskNotFound;
    }
    let tcb = handle.tcb(&KERNEL.pool);
    if tcb.canary() != config::STACK_CANARY {
        kernel_fault!("stack overflow detected on task {=u8}", handle);
        return Status::General;
    }
    Status::Success
}

/// `task_create` (§4.2).
#[allow(clippy::too_many_arguments)]
pub fn task_create(entry: TaskEntry, name: Option<&'static str>, stack_size: usize, param: usize, priority: u8) -> Result<TaskHandle, Status> {
    let mut cs_owner = Cs::enter();
    let cs = cs_owner.borrow();
    create_task_locked(cs, entry, name, stack_size, param, priority)
}

fn create_task_locked(cs: &Cs, entry: TaskEntry, name: Option<&'static str>, stack_size: usize, param: usize, priority: u8) -> Result<TaskId, Status> {
    if priority as usize >= config::MAX_PRIORITIES {
        return Err(Status::InvalidParam);
    }
    let stack_size = if stack_size == 0 { config::DEFAULT_STACK } else { stack_size.max(config::MIN_STACK) };
    let stack_size = crate::utils::round_up_8(stack_size);

    let stack = KERNEL.arena.alloc(cs, stack_size).ok_or(Status::NoMemory)?;
    let id = KERNEL.pool.create(cs, name, stack, stack_size, entry, param, priority)?;
    make_ready(cs, id);
    defmt::info!("task {=u8} created at priority {=u8}", id, priority);
    Ok(id)
}

fn make_ready(cs: &Cs, id: TaskId) {
    id.tcb(&KERNEL.pool).set_state(cs, TaskState::Ready);
    KERNEL.scheduler.ready_push(cs, &KERNEL.pool, id);
    maybe_preempt(cs, id);
}

fn maybe_preempt(cs: &Cs, newly_ready: TaskId) {
    if let Some(current) = KERNEL.current_task_id(cs) {
        if current != newly_ready && KERNEL.scheduler.should_preempt(cs, &KERNEL.pool, current, newly_ready) {
            port::yield_now();
        }
    }
}

/// Mark `id` Blocked on `on` with the given timeout (`config::MAX_WAIT`
/// means wait forever) and request a yield. Called by the sync primitives.
pub(crate) fn task_block(cs: &Cs, id: TaskId, on: BlockedOn, timeout: u32) {
    let tcb = id.tcb(&KERNEL.pool);
    tcb.set_state(cs, TaskState::Blocked);
    tcb.set_blocked_on(cs, on);
    if timeout != config::MAX_WAIT {
        let wake = KERNEL.tick.get(cs).wrapping_add(timeout);
        KERNEL.scheduler.delayed_push(cs, &KERNEL.pool, id, wake);
    }
    if KERNEL.current_task_id(cs) == Some(id) {
        port::yield_now();
    }
}

/// Idempotent (§5): safe to call whether the wakeup came from a timeout or
/// a peer signal, and safe to call twice for the same task.
pub(crate) fn task_unblock(cs: &Cs, id: TaskId) {
    let tcb = id.tcb(&KERNEL.pool);
    if tcb.state(cs) != TaskState::Blocked {
        return;
    }
    KERNEL.scheduler.delayed_remove(cs, &KERNEL.pool, id);
    tcb.set_blocked_on(cs, BlockedOn::None);
    make_ready(cs, id);
}

pub(crate) fn current_task_id(cs: &Cs) -> Option<TaskId> {
    KERNEL.current_task_id(cs)
}

pub(crate) fn now(cs: &Cs) -> u32 {
    KERNEL.tick.get(cs)
}

pub(crate) fn pool() -> &'static TaskPool {
    &KERNEL.pool
}

pub(crate) fn timers() -> &'static TimerList {
    &KERNEL.timers
}

pub(crate) fn arena() -> &'static Arena<{ config::TOTAL_HEAP }> {
    &KERNEL.arena
}

/// Raise `id`'s effective priority to `new_priority`, repositioning it in
/// the ready list if it currently holds one (§4.5 priority inheritance: a
/// boosted task's position in a priority-indexed ready list must reflect
/// its new rank). No-op change if `id` isn't Ready — a Running task holds
/// no ready-list slot, and a Blocked task's slot is the sync wait list,
/// untouched here.
pub(crate) fn boost_priority(cs: &Cs, id: TaskId, new_priority: u8) {
    let tcb = id.tcb(&KERNEL.pool);
    if tcb.state(cs) == TaskState::Ready {
        KERNEL.scheduler.ready_remove(cs, &KERNEL.pool, id);
        tcb.set_eff_priority(cs, new_priority);
        KERNEL.scheduler.ready_push(cs, &KERNEL.pool, id);
    } else {
        tcb.set_eff_priority(cs, new_priority);
    }
}

/// Called by the naked PendSV trampoline after it has saved the outgoing
/// task's registers (if any) and before it restores the new current task's.
/// Implements `switch_context()` (§4.4).
pub(crate) extern "C" fn switch_context() {
    let mut cs_owner = Cs::enter();
    let cs = cs_owner.borrow();

    if let Some(id) = KERNEL.current_task_id(cs) {
        let tcb = id.tcb(&KERNEL.pool);
        let state = tcb.state(cs);
        if state != TaskState::Blocked && state != TaskState::Suspended {
            tcb.set_state(cs, TaskState::Ready);
            KERNEL.scheduler.ready_push(cs, &KERNEL.pool, id);
            KERNEL.scheduler.on_yield(cs, &KERNEL.pool, id);
        }
    }

    let next = match KERNEL.scheduler.pick_next(cs) {
        Some(id) => id,
        None => match KERNEL.idle_task.get(cs) {
            Some(id) => id,
            None => {
                kernel_fault!("pick_next returned None with no idle task installed");
                return;
            }
        },
    };
    KERNEL.scheduler.ready_remove(cs, &KERNEL.pool, next);
    next.tcb(&KERNEL.pool).set_state(cs, TaskState::Running);
    KERNEL.set_current_task_id(cs, Some(next));
}

/// `tick_handler()` (§4.4): increments the tick counter, services software
/// timers, advances the delayed list, and requests a switch if the active
/// policy's per-tick check demands one.
pub(crate) fn tick_handler() {
    let tick = {
        let saved = port::enter_critical_isr();
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        let tick = KERNEL.tick.get(cs).wrapping_add(1);
        KERNEL.tick.set(cs, tick);
        defmt::trace!("tick {=u32}", tick);
        drop(cs_owner);
        port::exit_critical_isr(saved);
        tick
    };

    // Deliberately outside any critical section here: `TimerList::service`
    // takes its own, released around each callback invocation, exactly as
    // §4.7's tick-service pseudocode requires.
    KERNEL.timers.service(tick);

    let saved = port::enter_critical_isr();
    let mut cs_owner = Cs::enter();
    let cs = cs_owner.borrow();
    KERNEL.scheduler.advance_delayed(cs, &KERNEL.pool, tick);
    if let Some(current) = KERNEL.current_task_id(cs) {
        kernel_assert!(current.tcb(&KERNEL.pool).state(cs) == TaskState::Running, "current task not Running at tick");
        if KERNEL.scheduler.tick_preempt(cs, &KERNEL.pool, current) {
            port::yield_now();
        }
    }
    drop(cs_owner);
    port::exit_critical_isr(saved);
}

/// Test-only access to the process-wide [`KERNEL`] singleton, which —
/// unlike every other object exercised under test — has no per-test reset:
/// `init()` only ever runs its setup once per process, and task slots are
/// never freed. Every test anywhere in this crate that touches a sync
/// primitive (which always reads "the current task" from here) goes
/// through [`tests::GUARD`] and resets whatever state it depends on at
/// entry, rather than assuming a pristine kernel.
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Serializes any test that touches [`KERNEL`].
    pub(crate) static GUARD: StdMutex<()> = StdMutex::new(());

    /// Safe to call more than once in a process; later calls are no-ops.
    pub(crate) fn ensure_init() {
        let _ = init();
    }

    pub(crate) fn set_current(id: TaskId) {
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        KERNEL.set_current_task_id(cs, Some(id));
    }

    fn new_task(priority: u8) -> TaskId {
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        create_task_locked(cs, unused_entry, None, 0, 0, priority).expect("test task budget exhausted")
    }

    fn unused_entry(_: usize) -> ! {
        unreachable!("test task entry is never actually run")
    }

    /// Three tasks at priorities 1, 2, 3, created once and reused by every
    /// test that needs "some real tasks" — `MAX_TASKS` is a small, never-
    /// reset, process-wide budget, so tests share rather than each
    /// allocating their own.
    pub(crate) fn shared_tasks() -> (TaskId, TaskId, TaskId) {
        static TASKS: std::sync::OnceLock<(TaskId, TaskId, TaskId)> = std::sync::OnceLock::new();
        *TASKS.get_or_init(|| {
            ensure_init();
            (new_task(1), new_task(2), new_task(3))
        })
    }

    #[test]
    fn init_creates_idle_task_and_is_idempotent() {
        let _g = GUARD.lock().unwrap();
        ensure_init();
        ensure_init();
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        assert_eq!(KERNEL.state.get(cs), KernelState::Ready);
        assert!(KERNEL.idle_task.get(cs).is_some());
    }

    #[test]
    fn tick_handler_advances_tick_and_wakes_delayed_task() {
        let _g = GUARD.lock().unwrap();
        ensure_init();
        let (l, _, _) = shared_tasks();

        let before = get_tick();
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        // `l` is actually sitting on the ready list from its creation;
        // simulate it having been picked as current (and thus removed)
        // before blocking, the way `switch_context`/`task_block` would.
        KERNEL.scheduler.ready_remove(cs, &KERNEL.pool, l);
        l.tcb(&KERNEL.pool).set_state(cs, TaskState::Blocked);
        KERNEL.scheduler.delayed_push(cs, &KERNEL.pool, l, before.wrapping_add(1));
        drop(cs_owner);

        tick_handler();

        assert_eq!(get_tick(), before.wrapping_add(1));
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        assert_eq!(l.tcb(&KERNEL.pool).state(cs), TaskState::Ready);
    }

    #[test]
    fn suspend_rejects_non_running_source_and_accepts_running() {
        let _g = GUARD.lock().unwrap();
        ensure_init();
        let (l, _, _) = shared_tasks();

        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        l.tcb(&KERNEL.pool).set_state(cs, TaskState::Ready);
        drop(cs_owner);

        // Only `Running -> Suspended` is a drawn edge; from Ready it is
        // rejected and the state is left untouched.
        assert_eq!(task_suspend(l), Status::InvalidState);
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        assert_eq!(l.tcb(&KERNEL.pool).state(cs), TaskState::Ready);
        KERNEL.scheduler.ready_remove(cs, &KERNEL.pool, l);
        l.tcb(&KERNEL.pool).set_state(cs, TaskState::Running);
        drop(cs_owner);

        set_current(l);
        assert_eq!(task_suspend(l), Status::Success);
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        assert_eq!(l.tcb(&KERNEL.pool).state(cs), TaskState::Suspended);
        drop(cs_owner);

        assert_eq!(task_resume(l), Status::Success);
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        assert_eq!(l.tcb(&KERNEL.pool).state(cs), TaskState::Ready);
    }
}
