//! Tick-driven phase scheduler
//!
//! A 200 us timer interrupt walks through one phase per tick, five ticks per
//! millisecond. Each phase belongs to one consumer; the super-loop runs a
//! consumer only when its flag is up, so one tick carries at most one
//! module's evaluation. Consumers that run slower than once per millisecond
//! are decimated here.

use crate::config::{INDICATOR_EVAL_MS, IO_EVAL_MS, PHASES_PER_MS};
use crate::shared::SharedState;
use crate::sync::IrqControl;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Phase {
    Io = 0,
    Indicator = 1,
    Store = 2,
    Clock = 3,
    Run = 4,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Io,
        Phase::Indicator,
        Phase::Store,
        Phase::Clock,
        Phase::Run,
    ];

    const fn period_ms(self) -> u8 {
        match self {
            Phase::Io => IO_EVAL_MS,
            Phase::Indicator => INDICATOR_EVAL_MS,
            _ => 1,
        }
    }
}

/// Tick interrupt state.
#[derive(Clone, Debug)]
pub struct TickState {
    millis: u32,
    phase: u8,
    pending: u8,
}

impl TickState {
    pub const fn new() -> Self {
        Self {
            millis: 0,
            phase: 0,
            pending: 0,
        }
    }

    pub fn on_tick(&mut self) {
        self.pending |= 1 << self.phase;
        self.phase += 1;
        if self.phase == PHASES_PER_MS {
            self.phase = 0;
            self.millis = self.millis.wrapping_add(1);
        }
    }

    pub fn millis(&self) -> u32 {
        self.millis
    }

    fn take(&mut self, phase: Phase) -> bool {
        let bit = 1 << phase as u8;
        let due = self.pending & bit != 0;
        self.pending &= !bit;
        due
    }

    fn clear(&mut self) {
        self.phase = 0;
        self.pending = 0;
    }
}

impl Default for TickState {
    fn default() -> Self {
        Self::new()
    }
}

/// Loop-side phase polling with per-consumer decimation.
pub struct Scheduler {
    countdown: [u8; 5],
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            countdown: [
                Phase::Io.period_ms(),
                Phase::Indicator.period_ms(),
                Phase::Store.period_ms(),
                Phase::Clock.period_ms(),
                Phase::Run.period_ms(),
            ],
        }
    }

    /// Restarts the phase sequence and every decimation counter.
    pub fn reset<C: IrqControl>(&mut self, shared: &SharedState, ctl: &C) {
        *self = Self::new();
        shared.ticks.masked(ctl, |ticks| ticks.clear());
    }

    /// Consumes `phase`'s flag. True when the consumer is due.
    pub fn take<C: IrqControl>(&mut self, phase: Phase, shared: &SharedState, ctl: &C) -> bool {
        if !shared.ticks.masked(ctl, |ticks| ticks.take(phase)) {
            return false;
        }
        let slot = &mut self.countdown[phase as usize];
        *slot -= 1;
        if *slot == 0 {
            *slot = phase.period_ms();
            true
        } else {
            false
        }
    }

    pub fn millis<C: IrqControl>(&self, shared: &SharedState, ctl: &C) -> u32 {
        shared.ticks.masked(ctl, |ticks| ticks.millis())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
