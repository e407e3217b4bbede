//! Armv7-M / Armv8-M Mainline EABIHF context switch
//!
//! As `eabi.rs`, but a task that has touched the FPU gets its high FPU
//! registers (s16-s31) saved and restored too; the low ones (s0-s15, FPSCR)
//! are handled by the hardware exception frame itself. Whether a task used
//! the FPU is recorded by hardware in bit 4 of its `EXC_RETURN` value.

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::kernel::{self, Kernel};
use crate::task::{TaskEntry, Tcb};

const DEFAULT_CPSR: u32 = 1 << 24;
/// Thread mode, PSP, standard (non-extended, no FPU state) frame.
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Same 17-word layout as `eabi::build_initial_frame`. A fresh task has
/// never touched the FPU, so `EXC_RETURN_THREAD_PSP`'s bit 4 correctly tells
/// the restore path to skip the high FPU registers.
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

/// PendSV handler for Armv7-M / Armv8-M Mainline EABIHF.
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    core::arch::naked_asm!(r#"
    // Workaround https://github.com/rust-lang/rust/issues/127269
    .fpu vfpv3

    ldr      r1, ={kernel_ptr}
    ldr      r2, [r1, {current_task_offset}]
    ldr      r3, [r1, {tasks_ptr_offset}]

    cmp      r2, #-1
    beq      1f

    lsl      r2, {tcb_size_bits}
    mrs      r0, psp

    // if the outgoing task used the FPU (EXC_RETURN bit 4 clear), stack the
    // high FPU registers too; the low ones are already in the hardware frame
    tst      lr, #0x10
    it       eq
    vstmdbeq r0!, {{ s16 - s31 }}

    stmdb    r0!, {{ r4 - r11, lr }}
    str      r0, [r3, r2]

    1:
    push     {{ r1, lr }}
    bl       {switch_context}
    pop      {{ r1, lr }}

    ldr      r2, [r1, {current_task_offset}]
    ldr      r3, [r1, {tasks_ptr_offset}]
    lsl      r2, {tcb_size_bits}
    ldr      r0, [r3, r2]
    ldmia    r0!, {{ r4 - r11, lr }}

    tst      lr, #0x10
    it       eq
    vldmiaeq r0!, {{ s16 - s31 }}

    msr      psp, r0
    bx       lr
    "#,
    kernel_ptr = sym kernel::KERNEL,
    current_task_offset = const Kernel::CURRENT_TASK_OFFSET,
    tasks_ptr_offset = const Kernel::TASKS_PTR_OFFSET,
    tcb_size_bits = const Tcb::SIZE_BITS,
    switch_context = sym kernel::switch_context,
    );
}
