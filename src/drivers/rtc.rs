//! Seconds counter with drift correction and a one-shot alarm

use core::convert::Infallible;

use crate::protocol::registers::{Slot, WakeEnable};
use crate::shared::SharedState;
use crate::sync::IrqControl;

/// State advanced by the one-second interrupt.
#[derive(Clone, Debug)]
pub struct ClockCore {
    time: u32,
    alarm: Option<u32>,
    saw_alarm: bool,
    correction: i32,
    countdown: u32,
}

impl ClockCore {
    pub const fn new() -> Self {
        Self {
            time: 0,
            alarm: None,
            saw_alarm: false,
            correction: 0,
            countdown: 0,
        }
    }

    /// One-second interrupt.
    pub fn on_second(&mut self) {
        self.time = self.time.wrapping_add(1);

        if self.correction != 0 {
            self.countdown -= 1;
            if self.countdown == 0 {
                self.countdown = self.correction.unsigned_abs();
                self.time = if self.correction > 0 {
                    self.time.wrapping_add(1)
                } else {
                    self.time.wrapping_sub(1)
                };
            }
        }

        if let Some(target) = self.alarm {
            if self.time >= target {
                self.alarm = None;
                self.saw_alarm = true;
            }
        }
    }

    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn set_time(&mut self, time: u32) {
        self.time = time;
    }

    pub fn alarm(&self) -> Option<u32> {
        self.alarm
    }

    pub fn arm_alarm(&mut self, target: u32) {
        self.alarm = Some(target);
    }

    pub fn disarm_alarm(&mut self) {
        self.alarm = None;
    }

    /// Alarm fired and has not been cleared.
    pub fn alarm_pending(&self) -> bool {
        self.saw_alarm
    }

    pub fn clear_alarm(&mut self) {
        self.saw_alarm = false;
    }

    /// Every `|correction|` seconds one second is added (positive, slow
    /// crystal) or dropped (negative, fast crystal). Zero disables.
    pub fn set_correction(&mut self, correction: i32) {
        self.correction = correction;
        self.countdown = correction.unsigned_abs();
    }

    pub fn correction(&self) -> i32 {
        self.correction
    }
}

impl Default for ClockCore {
    fn default() -> Self {
        Self::new()
    }
}

/// What one clock evaluation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockUpdate {
    pub time_set: bool,
    pub alarm_armed: bool,
    pub alarm_disarmed: bool,
    pub correction_changed: bool,
}

/// Loop-side half of the clock: mirrors host requests into [`ClockCore`]
/// and publishes the counter.
pub struct RealTimeClock {
    alarm_enabled: bool,
    alarm_target: u32,
    correction: i32,
}

impl RealTimeClock {
    pub const fn new() -> Self {
        Self {
            alarm_enabled: false,
            alarm_target: 0,
            correction: 0,
        }
    }

    /// One scheduler pass. Returns `WouldBlock` while a host transfer is in
    /// flight; the caller retries on its next pass.
    pub fn evaluate<C: IrqControl>(
        &mut self,
        shared: &SharedState,
        ctl: &C,
    ) -> nb::Result<ClockUpdate, Infallible> {
        shared.exchange_clock(ctl, |bus, clock| {
            let mut update = ClockUpdate::default();

            if bus.take_time_commit() {
                clock.set_time(bus.regs.get_u32(Slot::Time));
                update.time_set = true;
            }

            let regs = &mut bus.regs;

            let enabled = regs.wake_enable().contains(WakeEnable::ALARM);
            let target = regs.get_u32(Slot::Alarm);
            if enabled && (!self.alarm_enabled || target != self.alarm_target) {
                clock.arm_alarm(target);
                update.alarm_armed = true;
            } else if !enabled && self.alarm_enabled {
                clock.disarm_alarm();
                update.alarm_disarmed = true;
            }
            self.alarm_enabled = enabled;
            self.alarm_target = target;

            let correction = regs.get_u32(Slot::Correction) as i32;
            if correction != self.correction {
                clock.set_correction(correction);
                self.correction = correction;
                update.correction_changed = true;
            }

            regs.set_u32(Slot::Time, clock.time());
            update
        })
    }
}

impl Default for RealTimeClock {
    fn default() -> Self {
        Self::new()
    }
}
