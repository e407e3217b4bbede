//! Host-side stand-ins for the port layer (§1.4), used only by `cargo test`.
//!
//! No real interrupts exist on the host, so "critical section" here is just
//! the same nesting counter the hardware backend uses, without touching
//! PRIMASK; the kernel logic under test only ever observes the `Cs` proof
//! token, not how it was obtained. `build_initial_frame` returns the stack
//! pointer untouched, since tests drive scheduler/sync state machines
//! directly and never actually context-switch into a task's machine code.

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use core::sync::atomic::{AtomicU32, Ordering};

use crate::task::TaskEntry;

static NEST: AtomicU32 = AtomicU32::new(0);

pub(crate) fn enter_critical() {
    NEST.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn exit_critical() {
    NEST.fetch_sub(1, Ordering::Relaxed);
}

pub(crate) fn enter_critical_isr() -> bool {
    enter_critical();
    true
}

pub(crate) fn exit_critical_isr(_was_active: bool) {
    exit_critical();
}

/// No SCB/NVIC exists on the host; kernel logic under test drives
/// `switch_context`/`tick_handler` directly instead of waiting for a real
/// pend to fire.
pub(crate) fn yield_now() {}

pub(crate) fn init() {}

pub(crate) fn start_tick(_syst: cortex_m::peripheral::SYST, _systicks_per_tick: u32) {}

pub(crate) fn start_first_task() -> ! {
    unreachable!("start_first_task is hardware bootstrap, never exercised by host tests")
}

/// # Safety
/// Never dereferenced; tests only compare/store the returned pointer.
pub(crate) unsafe fn build_initial_frame(stack_top: *mut u32, _entry: TaskEntry, _param: usize) -> *mut u32 {
    stack_top
}
