//! Software timers (§3 "Software timer", §4.7)

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::Status;
use crate::kcell::{Cs, KCell};
use crate::kernel;
use crate::utils::wrapping_cmp;

/// One-shot vs. periodic (§3).
#[derive(Debug, defmt::Format, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    AutoReload,
}

/// Callback invoked from the tick handler's interrupt context (§4.7);
/// must not call any blocking kernel API.
pub type TimerCallback = fn(&Timer, usize);

/// `{period, absolute_expiry, mode, callback, parameter, active, link}`
/// (§3).
pub struct Timer {
    name: Option<&'static str>,
    period: KCell<u32>,
    expiry: KCell<u32>,
    mode: TimerMode,
    callback: TimerCallback,
    parameter: usize,
    active: KCell<bool>,
    link: KCell<Option<&'static Timer>>,
}

impl Timer {
    /// `timer_create(name, period_ticks, mode, cb, param)` (§6). The timer
    /// is arena-allocated and starts inactive; call `start` to arm it.
    pub fn create(name: Option<&'static str>, period_ticks: u32, mode: TimerMode, callback: TimerCallback, parameter: usize) -> Result<&'static Timer, Status> {
        if period_ticks == 0 {
            return Err(Status::InvalidParam);
        }
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        let timer = Timer {
            name,
            period: KCell::new(period_ticks),
            expiry: KCell::new(0),
            mode,
            callback,
            parameter,
            active: KCell::new(false),
            link: KCell::new(None),
        };
        let timer = kernel::arena().alloc_value(cs, timer).ok_or(Status::NoMemory)?;
        defmt::info!("timer {=str} created, period {=u32}", name.unwrap_or("<unnamed>"), period_ticks);
        Ok(timer)
    }

    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    pub fn is_active(&self) -> bool {
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        self.active.get(cs)
    }

    /// `timer_start(t)` (§4.7): if already active, detach first, then
    /// insert at `now + period`.
    pub fn start(&'static self) {
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        if self.active.get(cs) {
            kernel::timers().detach(cs, self);
        }
        let expiry = kernel::now(cs).wrapping_add(self.period.get(cs));
        self.expiry.set(cs, expiry);
        self.active.set(cs, true);
        kernel::timers().insert(cs, self);
    }

    /// `timer_stop(t)`.
    pub fn stop(&'static self) {
        let mut cs_owner = Cs::enter();
        let cs = cs_owner.borrow();
        if self.active.get(cs) {
            kernel::timers().detach(cs, self);
            self.active.set(cs, false);
        }
    }

    /// `timer_change_period(t, p)`: if active, re-arms with a fresh expiry.
    pub fn change_period(&'static self, period_ticks: u32) -> Status {
        if period_ticks == 0 {
            return Status::InvalidParam;
        }
        let was_active = {
            let mut cs_owner = Cs::enter();
            let cs = cs_owner.borrow();
            self.period.set(cs, period_ticks);
            let was_active = self.active.get(cs);
            if was_active {
                kernel::timers().detach(cs, self);
            }
            was_active
        };
        if was_active {
            self.start();
        }
        Status::Success
    }

    /// `timer_delete(t)`: stop only. TCB-style "Deleted" reuse is out of
    /// scope (§3 "Neither is freed").
    pub fn delete(&'static self) {
        self.stop();
    }
}

// Safety: every field is either `Copy` data read only at construction
// (`name`, `mode`, `callback`, `parameter`) or a `KCell`, gated by `Cs`.
unsafe impl Sync for Timer {}

/// Global sorted list of active timers (§4.7), threaded through each
/// `Timer`'s own `link` field the same intrusive-list discipline the
/// scheduler and sync wait lists use.
pub(crate) struct TimerList {
    head: KCell<Option<&'static Timer>>,
}

impl TimerList {
    pub(crate) const fn new() -> Self {
        Self {
            head: KCell::new(None),
        }
    }

    /// Insert `timer` in ascending-expiry order, wrap-safe (§4.7).
    fn insert(&self, cs: &Cs, timer: &'static Timer) {
        let expiry = timer.expiry.get(cs);
        let mut prev: Option<&'static Timer> = None;
        let mut cur = self.head.get(cs);
        while let Some(node) = cur {
            if wrapping_cmp(node.expiry.get(cs), expiry) == core::cmp::Ordering::Greater {
                break;
            }
            prev = Some(node);
            cur = node.link.get(cs);
        }
        timer.link.set(cs, cur);
        match prev {
            Some(p) => p.link.set(cs, Some(timer)),
            None => self.head.set(cs, Some(timer)),
        }
    }

    /// Remove `timer` from the list if present. No-op otherwise.
    fn detach(&self, cs: &Cs, timer: &'static Timer) {
        let mut prev: Option<&'static Timer> = None;
        let mut cur = self.head.get(cs);
        while let Some(node) = cur {
            let next = node.link.get(cs);
            if core::ptr::eq(node, timer) {
                match prev {
                    Some(p) => p.link.set(cs, next),
                    None => self.head.set(cs, next),
                }
                return;
            }
            prev = Some(node);
            cur = next;
        }
    }

    /// Tick-service pass (§4.7): fire every timer whose expiry has been
    /// reached, reinserting auto-reload timers with their expiry caught
    /// up to whole periods past `now` (no drift, no re-fire storm even if
    /// the callback stalled for many periods).
    pub(crate) fn service(&self, now: u32) {
        loop {
            let expired = {
                let mut cs_owner = Cs::enter();
                let cs = cs_owner.borrow();
                match self.head.get(cs) {
                    Some(node) if wrapping_cmp(node.expiry.get(cs), now) != core::cmp::Ordering::Greater => {
                        self.detach(cs, node);
                        Some(node)
                    }
                    _ => None,
                }
            };

            let Some(timer) = expired else {
                break;
            };

            // `cs_owner` above was dropped before this call: the callback
            // runs with interrupts genuinely unmasked (§4.7), not merely
            // nested one level shallower.
            (timer.callback)(timer, timer.parameter);

            let mut cs_owner = Cs::enter();
            let cs = cs_owner.borrow();
            if timer.mode == TimerMode::AutoReload {
                let mut expiry = timer.expiry.get(cs);
                let period = timer.period.get(cs);
                while wrapping_cmp(expiry, now) != core::cmp::Ordering::Greater {
                    expiry = expiry.wrapping_add(period);
                }
                timer.expiry.set(cs, expiry);
                self.insert(cs, timer);
            } else {
                timer.active.set(cs, false);
            }
        }
    }
}

// Safety: the only field is a `KCell`, gated by `Cs`.
unsafe impl Sync for TimerList {}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_cb(_t: &Timer, _p: usize) {}

    fn make_timer(period: u32, mode: TimerMode) -> &'static Timer {
        std::boxed::Box::leak(std::boxed::Box::new(Timer {
            name: None,
            period: KCell::new(period),
            expiry: KCell::new(0),
            mode,
            callback: noop_cb,
            parameter: 0,
            active: KCell::new(false),
            link: KCell::new(None),
        }))
    }

    #[test]
    fn auto_reload_catches_up_after_a_stalled_callback() {
        let list = TimerList::new();
        let timer = make_timer(10, TimerMode::AutoReload);
        {
            let cs = Cs::enter();
            timer.expiry.set(&cs, 10);
            timer.active.set(&cs, true);
            list.insert(&cs, timer);
        }

        // As if the tick handler had been blocked for 35 ticks past the
        // original expiry: one catch-up invocation, no re-fire storm.
        list.service(45);

        let cs = Cs::enter();
        // First multiple of the period strictly after 45, counting up from
        // the original expiry of 10: 10 + 4*10 = 50.
        assert_eq!(timer.expiry.get(&cs), 50);
        assert!(timer.active.get(&cs));
    }

    #[test]
    fn one_shot_goes_inactive_after_firing_and_is_not_reinserted() {
        let list = TimerList::new();
        let timer = make_timer(5, TimerMode::OneShot);
        {
            let cs = Cs::enter();
            timer.expiry.set(&cs, 5);
            timer.active.set(&cs, true);
            list.insert(&cs, timer);
        }

        list.service(5);

        let cs = Cs::enter();
        assert!(!timer.active.get(&cs));
        assert!(list.head.get(&cs).is_none());
    }

    #[test]
    fn insert_keeps_ascending_expiry_order() {
        let list = TimerList::new();
        let late = make_timer(100, TimerMode::OneShot);
        let early = make_timer(100, TimerMode::OneShot);
        let cs = Cs::enter();
        late.expiry.set(&cs, 50);
        early.expiry.set(&cs, 10);
        list.insert(&cs, late);
        list.insert(&cs, early);
        assert!(core::ptr::eq(list.head.get(&cs).unwrap(), early));
        assert!(core::ptr::eq(early.link.get(&cs).unwrap(), late));
    }
}
