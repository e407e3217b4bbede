//! Port layer contract (§4.8): critical sections, tick start, first-task
//! bootstrap, and the per-ABI initial stack frame.
//!
//! The hardware backend lives in `asm/`, selected by the `arm_abi`/
//! `arm_architecture` cfgs the `arm-targets` build script sets. Host-side
//! tests swap in `test_support`'s equivalents so kernel logic can run under
//! `cargo test` without real Cortex-M registers.

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

#[cfg(not(test))]
mod asm;

#[cfg(not(test))]
pub(crate) use asm::build_initial_frame;
#[cfg(test)]
pub(crate) use crate::test_support::build_initial_frame;

#[cfg(not(test))]
mod hw {
    use core::sync::atomic::{AtomicU32, Ordering};

    /// Nesting depth of [`super::enter_critical`]/[`super::exit_critical`].
    /// Only the outermost pair actually touches PRIMASK.
    static NEST: AtomicU32 = AtomicU32::new(0);

    /// Mask interrupts at or below the kernel priority threshold. This
    /// target's critical section is a global PRIMASK disable rather than a
    /// BASEPRI priority-threshold mask: it is the one primitive common to
    /// every Armv6-M/v7-M/v8-M variant this crate targets, at the cost of
    /// also blocking interrupts at "Critical" priority (§5, strictly above
    /// kernel priority) for the (short) duration of a kernel critical
    /// section.
    pub(crate) fn enter_critical() {
        cortex_m::interrupt::disable();
        NEST.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn exit_critical() {
        if NEST.fetch_sub(1, Ordering::Relaxed) == 1 {
            // Safety: this is the outermost exit, matching the outermost
            // `enter_critical` that actually disabled interrupts.
            unsafe { cortex_m::interrupt::enable() };
        }
    }

    /// ISR-variant (§4.8 "ISR-variant critical-section primitives that
    /// return a saved mask and accept it on exit"): the tick path calls
    /// this instead of `enter_critical`/`exit_critical` for symmetry with
    /// that contract. It still goes through the same nesting counter —
    /// giving the mask its own independent bookkeeping would let the two
    /// call sites disagree about whether interrupts are currently masked.
    pub(crate) fn enter_critical_isr() -> bool {
        enter_critical();
        true
    }

    pub(crate) fn exit_critical_isr(_was_active: bool) {
        exit_critical();
    }

    /// Configure PendSV and SysTick priorities and zero critical-nesting
    /// state. PendSV must be the lowest priority in the system so a pend
    /// only fires once every other exception has drained.
    pub(crate) fn init() {
        NEST.store(0, Ordering::Relaxed);
        let mut scb = unsafe { cortex_m::Peripherals::steal().SCB };
        unsafe {
            scb.set_priority(cortex_m::peripheral::scb::SystemHandler::PendSV, 0xFF);
            scb.set_priority(cortex_m::peripheral::scb::SystemHandler::SysTick, 0x80);
        }
    }

    /// Program the periodic tick timer for `crate::config::TICK_HZ`.
    pub(crate) fn start_tick(mut syst: cortex_m::peripheral::SYST, systicks_per_tick: u32) {
        syst.set_reload(systicks_per_tick);
        syst.clear_current();
        syst.enable_counter();
        syst.enable_interrupt();
    }

    /// Trigger the very first context switch. `Kernel::current_task` must
    /// already hold the sentinel ("no task") value: the PendSV trampoline's
    /// usual "nothing to save" path doubles as the bootstrap path, so there
    /// is nothing special to do here beyond pending the exception.
    pub(crate) fn start_first_task() -> ! {
        cortex_m::peripheral::SCB::set_pendsv();
        cortex_m::asm::isb();
        unreachable!("returned from the first task switch")
    }

    /// Request a context switch as soon as outstanding higher-priority
    /// exceptions drain.
    pub(crate) fn yield_now() {
        cortex_m::peripheral::SCB::set_pendsv();
    }
}

#[cfg(not(test))]
pub(crate) use hw::*;

#[cfg(test)]
pub(crate) use crate::test_support::{enter_critical, enter_critical_isr, exit_critical, exit_critical_isr, init, start_first_task, start_tick, yield_now};
