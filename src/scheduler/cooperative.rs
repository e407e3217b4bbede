//! Cooperative policy (§4.3.2): single FIFO, never preempts.

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

#![cfg(feature = "scheduler-cooperative")]

use super::SchedulerState;
use crate::kcell::Cs;
use crate::task::{TaskId, TaskPool};

const LEVEL: usize = 0;

impl SchedulerState {
    pub(crate) fn ready_push(&self, cs: &Cs, pool: &TaskPool, task: TaskId) {
        self.ready_list_push(cs, pool, task, LEVEL);
    }

    pub(crate) fn ready_remove(&self, cs: &Cs, pool: &TaskPool, task: TaskId) {
        self.ready_list_remove(cs, pool, task, LEVEL);
    }

    pub(crate) fn pick_next(&self, cs: &Cs) -> Option<TaskId> {
        self.ready_heads[LEVEL].get(cs)
    }

    pub(crate) fn should_preempt(&self, _cs: &Cs, _pool: &TaskPool, _current: TaskId, _newly_ready: TaskId) -> bool {
        false
    }

    /// Nothing to do: the kernel core already appended the yielding task to
    /// the tail of the ready list before calling this (the FIFO append
    /// itself is the round-robin rotation this policy needs).
    pub(crate) fn on_yield(&self, _cs: &Cs, _pool: &TaskPool, _completed: TaskId) {}

    /// Cooperative never preempts: a task runs until it yields.
    pub(crate) fn tick_preempt(&self, _cs: &Cs, _pool: &TaskPool, _current: TaskId) -> bool {
        false
    }
}
