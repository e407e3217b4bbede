//! Armv7-M / Armv8-M Mainline EABI context switch

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::kernel::{self, Kernel};
use crate::task::{TaskEntry, Tcb};

/// The CPSR value a freshly created task starts with: just the Thumb bit,
/// since this is a Thumb-only target.
const DEFAULT_CPSR: u32 = 1 << 24;

/// The `EXC_RETURN` value meaning "return to thread mode, use PSP, standard
/// (non-extended) frame" — correct for every task, since none of them start
/// out having touched the FPU.
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Lay out a 17-word initial frame: the 8-word hardware exception frame
/// (R0..R3, R12, LR, PC, xPSR) that the processor will unstack automatically
/// on the first `bx lr`, followed by the 9 words ([`PendSV`]'s `stmdb`/`ldmia`
/// group: R4..R11, LR) that the software switch path pops on every
/// subsequent switch.
pub(crate) unsafe fn build_initial_frame(stack_top: *mut u32, entry: TaskEntry, param: usize) -> *mut u32 {
    // Safety: the caller guarantees `stack_top` has enough free space below
    // it for a full initial frame (enforced by `config::MIN_STACK`).
    let mut pusher = unsafe { crate::stack_pusher::StackPusher::new(stack_top) };

    // Hardware exception frame.
    pusher.push(DEFAULT_CPSR);
    pusher.push(entry as usize as u32); // PC
    pusher.push(0); // LR
    pusher.push(0); // R12
    pusher.push(0); // R3
    pusher.push(0); // R2
    pusher.push(0); // R1
    pusher.push(param as u32); // R0: the task's entry parameter

    // Software-saved group, low-to-high: R4..R11, LR(EXC_RETURN).
    pusher.push(EXC_RETURN_THREAD_PSP);
    pusher.push(0); // R11
    pusher.push(0); // R10
    pusher.push(0); // R9
    pusher.push(0); // R8
    pusher.push(0); // R7
    pusher.push(0); // R6
    pusher.push(0); // R5
    pusher.push(0); // R4

    pusher.current()
}

/// PendSV handler for Armv7-M / Armv8-M Mainline EABI.
///
/// Stacks the outgoing task's callee-saved registers (if there is one),
/// calls into [`kernel::switch_context`] to pick the next task and update
/// `Kernel::current_task`, then restores the now-current task's registers
/// and returns to it in thread mode.
///
/// Naked: the compiler must not spill anything else onto this stack, since
/// R4-R11 here belong to the interrupted task, not this function.
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    core::arch::naked_asm!(r#"
    // r1 = &KERNEL
    ldr     r1, ={kernel_ptr}

    // r2 = current task id
    ldr     r2, [r1, {current_task_offset}]

    // r3 = tasks array base pointer
    ldr     r3, [r1, {tasks_ptr_offset}]

    // if current task id is the sentinel, there is nothing to save
    cmp     r2, #-1
    beq     1f

    lsl     r2, {tcb_size_bits}
    mrs     r0, psp
    stmdb   r0!, {{ r4 - r11, lr }}
    str     r0, [r3, r2]

    1:
    // r1/r3 are caller-saved under AAPCS; reload them after the call
    push    {{ r1, lr }}
    bl      {switch_context}
    pop     {{ r1, lr }}

    ldr     r2, [r1, {current_task_offset}]
    ldr     r3, [r1, {tasks_ptr_offset}]
    lsl     r2, {tcb_size_bits}
    ldr     r0, [r3, r2]
    ldmia   r0!, {{ r4 - r11, lr }}
    msr     psp, r0
    bx      lr
    "#,
    kernel_ptr = sym kernel::KERNEL,
    current_task_offset = const Kernel::CURRENT_TASK_OFFSET,
    tasks_ptr_offset = const Kernel::TASKS_PTR_OFFSET,
    tcb_size_bits = const Tcb::SIZE_BITS,
    switch_context = sym kernel::switch_context,
    );
}
