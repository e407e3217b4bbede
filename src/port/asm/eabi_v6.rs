//! Armv6-M / Armv8-M Baseline EABI context switch
//!
//! Same contract as `eabi.rs`, restricted to the Thumb-1 instruction subset:
//! no `stmdb`/`ldmia` with a register list spanning r8-r11, so the switch
//! shuffles the high registers through r4-r7 instead.

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::kernel::{self, Kernel};
use crate::task::{TaskEntry, Tcb};

const DEFAULT_CPSR: u32 = 1 << 24;
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Lay out the same 17-word frame as the Armv7-M variant, but ordered to
/// match this file's `push`/`pop` shuffle: ascending from the stack pointer,
/// R8..R11, R4..R7, LR, then the 8-word hardware frame.
pub(crate) unsafe fn build_initial_frame(stack_top: *mut u32, entry: TaskEntry, param: usize) -> *mut u32 {
    // Safety: see `eabi::build_initial_frame`.
    let mut pusher = unsafe { crate::stack_pusher::StackPusher::new(stack_top) };

    pusher.push(DEFAULT_CPSR);
    pusher.push(entry as usize as u32);
    pusher.push(0); // LR
    pusher.push(0); // R12
    pusher.push(0); // R3
    pusher.push(0); // R2
    pusher.push(0); // R1
    pusher.push(param as u32); // R0

    pusher.push(EXC_RETURN_THREAD_PSP);
    pusher.push(0); // R7
    pusher.push(0); // R6
    pusher.push(0); // R5
    pusher.push(0); // R4
    pusher.push(0); // R11
    pusher.push(0); // R10
    pusher.push(0); // R9
    pusher.push(0); // R8

    pusher.current()
}

/// PendSV handler for Armv6-M / Armv8-M Baseline EABI.
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    core::arch::naked_asm!(r#"
    ldr     r1, ={kernel_ptr}
    ldr     r2, [r1, {current_task_offset}]
    ldr     r3, [r1, {tasks_ptr_offset}]
    mov     r12, sp

    // if current task id == -1 (sentinel), skip the stacking
    movs    r0, #1
    cmn     r2, r0
    beq     1f

    lsls    r2, {tcb_size_bits}
    mrs     r0, psp
    mov     sp, r0

    push    {{ lr }}
    push    {{ r4 - r7 }}
    mov     r4, r8
    mov     r5, r9
    mov     r6, r10
    mov     r7, r11
    push    {{ r4 - r7 }}

    mov     r0, sp
    str     r0, [r3, r2]

    1:
    // r12 (holding the handler's own sp) is caller-saved under AAPCS and
    // would otherwise be clobbered by the call; stash it through r2.
    mov     r2, r12
    push    {{ r1, r2, lr }}
    bl      {switch_context}
    pop     {{ r1, r2, lr }}
    mov     r12, r2

    ldr     r2, [r1, {current_task_offset}]
    ldr     r3, [r1, {tasks_ptr_offset}]
    lsls    r2, {tcb_size_bits}
    ldr     r0, [r3, r2]
    mov     sp, r0

    pop     {{ r4 - r7 }}
    mov     r8, r4
    mov     r9, r5
    mov     r10, r6
    mov     r11, r7
    pop     {{ r4 - r7 }}
    pop     {{ r0 }}
    mov     lr, r0

    mov     r0, sp
    msr     psp, r0
    mov     sp, r12
    bx      lr
    "#,
    kernel_ptr = sym kernel::KERNEL,
    current_task_offset = const Kernel::CURRENT_TASK_OFFSET,
    tasks_ptr_offset = const Kernel::TASKS_PTR_OFFSET,
    tcb_size_bits = const Tcb::SIZE_BITS,
    switch_context = sym kernel::switch_context,
    );
}
