//! Compile-time kernel configuration
//!
//! Every item here has a documented default and can be overridden by
//! re-exporting a differently-valued `config` module from a consuming crate
//! in the usual `no_std` way (a `build.rs`-free const override). The
//! scheduler policy is chosen with a Cargo feature instead, since it must
//! be fixed for the lifetime of the kernel (see `scheduler::Policy`).

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

/// Ticks per second the port layer is expected to generate.
pub const TICK_HZ: u32 = 1000;

/// Number of TCB slots in the static task pool.
pub const MAX_TASKS: usize = 8;

/// Number of priority levels, numbered `0..MAX_PRIORITIES`.
///
/// Priority 0 is reserved for the idle task.
pub const MAX_PRIORITIES: usize = 8;

/// Priority assigned to the idle task.
pub const IDLE_PRIORITY: u8 = 0;

/// Stack size used when a caller passes `stack_size == 0` to `task_create`.
pub const DEFAULT_STACK: usize = 1024;

/// Hard floor below which a requested stack size is clamped up.
pub const MIN_STACK: usize = 128;

/// Size, in bytes, of the arena backing task stacks and sync/timer objects.
pub const TOTAL_HEAP: usize = 16384;

/// Ticks granted to a task before the round-robin policy rotates it to the
/// tail of the ready list. Unused by the other two policies.
pub const TIME_SLICE_TICKS: u32 = 20;

/// Sentinel word written at the lowest address of every task stack.
pub const STACK_CANARY: u32 = 0xC0DE_C0DE;

/// Depth limit for the transitive priority-inheritance walk (§4.5).
pub const MAX_CHAIN: usize = 16;

/// Timeout value meaning "do not block; try once".
pub const NO_WAIT: u32 = 0;

/// Timeout value meaning "block forever".
pub const MAX_WAIT: u32 = u32::MAX;
