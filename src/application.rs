//! Run/power state machine
//!
//! [`Supervisor`] owns every loop-side driver and runs one awake period:
//! from the wake-up that follows deep sleep until the state machine reaches
//! [`RunState::Sleep`]. Each pass of the super-loop feeds the watchdog and
//! runs whichever module the tick scheduler marked due.

use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_hal::watchdog::{Watchdog, WatchdogDisable, WatchdogEnable};
use embedded_hal::PwmPin;
use embedded_storage::nor_flash::NorFlash;
use ufmt::derive::uDebug;

use crate::config::{
    BATTERY_CRITICAL_MV, BATTERY_TURN_ON_MV, CRITICAL_TIMEOUT_EVALS, WATCHDOG_TIMEOUT_MS,
};
use crate::diagnostics::{Diagnostics, Fault};
use crate::drivers::indicator::Indicator;
use crate::drivers::io_monitor::{ChargeState, IoMonitor, PressEvent};
use crate::drivers::nvram::{PersistentStore, StoreEvent};
use crate::drivers::power_rails::{PowerRails, Rail};
use crate::drivers::rtc::RealTimeClock;
use crate::drivers::sampler::Channel;
use crate::logger::{LogEvent, Logger};
use crate::protocol::registers::{Slot, Status, WakeEnable, WakeReason, SHUTDOWN_TRIGGER};
use crate::protocol::BusPort;
use crate::rtos::{Phase, Scheduler};
use crate::shared::SharedState;
use crate::sync::IrqControl;

#[derive(Clone, Copy, PartialEq, Eq, Debug, uDebug)]
#[repr(u8)]
pub enum RunState {
    /// Deciding what woke the controller
    Wake = 0,
    /// Host off, charger active
    Charge = 1,
    /// Host powered, waiting for the button to come up
    Wait = 2,
    /// Host running
    Power = 3,
    /// Host switched off by a long press, waiting for release
    PowerOff = 4,
    /// Awake period over
    Sleep = 5,
}

/// Analog converter seen by the supervisor.
pub trait Converter {
    /// One blocking conversion.
    fn convert(&mut self, channel: Channel) -> u16;
    /// Starts timer-triggered conversions beginning with `first`.
    fn start(&mut self, first: Channel);
    fn stop(&mut self);
}

/// Peripheral types of one board.
pub trait Board {
    type Irqs: IrqControl;
    type Input: InputPin;
    type Output: OutputPin;
    type Pwm: PwmPin<Duty = u8>;
    type Storage: NorFlash;
    type Bus: BusPort;
    type Adc: Converter;
    type Wdt: Watchdog + WatchdogEnable<Time = u16> + WatchdogDisable;
}

/// Everything the supervisor takes ownership of.
pub struct Parts<B: Board> {
    pub irq: B::Irqs,
    pub button: B::Input,
    pub charge_1: B::Input,
    pub charge_2: B::Input,
    pub card: B::Input,
    pub main_rail: B::Output,
    pub aux_rail: B::Output,
    pub status_led: B::Pwm,
    pub backlight: B::Pwm,
    pub storage: B::Storage,
    pub bus: B::Bus,
    pub adc: B::Adc,
    pub watchdog: B::Wdt,
}

/// Reasons a deep sleep ended, from the lines sampled right after wake-up.
pub fn wake_reasons(button_down: bool, alarm_fired: bool, charger_active: bool) -> WakeReason {
    let mut reasons = WakeReason::empty();
    reasons.set(WakeReason::BUTTON, button_down);
    reasons.set(WakeReason::ALARM, alarm_fired);
    reasons.set(WakeReason::CHARGE, charger_active);
    reasons
}

/// Classification of one battery reading by [`CriticalTimer`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BatteryReading {
    Healthy,
    /// First low reading since the timer was armed or recovered
    FirstLow,
    Low,
}

/// Bounded countdown of consecutive low battery readings while powered.
#[derive(Clone, Debug)]
pub struct CriticalTimer {
    remaining: u16,
}

impl CriticalTimer {
    pub const fn new() -> Self {
        Self {
            remaining: CRITICAL_TIMEOUT_EVALS,
        }
    }

    pub fn arm(&mut self) {
        self.remaining = CRITICAL_TIMEOUT_EVALS;
    }

    pub fn evaluate(&mut self, battery_mv: u16) -> BatteryReading {
        if battery_mv >= BATTERY_CRITICAL_MV {
            self.arm();
            return BatteryReading::Healthy;
        }
        let first = self.remaining == CRITICAL_TIMEOUT_EVALS;
        self.remaining = self.remaining.saturating_sub(1);
        if first {
            BatteryReading::FirstLow
        } else {
            BatteryReading::Low
        }
    }

    pub fn expired(&self) -> bool {
        self.remaining == 0
    }
}

impl Default for CriticalTimer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Supervisor<'a, B: Board> {
    shared: &'a SharedState,
    irq: B::Irqs,
    io: IoMonitor<B::Input>,
    indicator: Indicator<B::Pwm>,
    rails: PowerRails<B::Output>,
    store: PersistentStore<B::Storage>,
    clock: RealTimeClock,
    bus: B::Bus,
    adc: B::Adc,
    watchdog: B::Wdt,
    scheduler: Scheduler,
    state: RunState,
    wake: WakeReason,
    critical: CriticalTimer,
    temperature_offset: i16,
    pub log: Logger,
    pub diagnostics: Diagnostics,
}

impl<'a, B: Board> Supervisor<'a, B> {
    pub fn new(shared: &'a SharedState, parts: Parts<B>) -> Self {
        Self {
            shared,
            irq: parts.irq,
            io: IoMonitor::new(parts.button, parts.charge_1, parts.charge_2, parts.card),
            indicator: Indicator::new(parts.status_led, parts.backlight),
            rails: PowerRails::new(parts.main_rail, parts.aux_rail),
            store: PersistentStore::new(parts.storage),
            clock: RealTimeClock::new(),
            bus: parts.bus,
            adc: parts.adc,
            watchdog: parts.watchdog,
            scheduler: Scheduler::new(),
            state: RunState::Sleep,
            wake: WakeReason::empty(),
            critical: CriticalTimer::new(),
            temperature_offset: 0,
            log: Logger::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// One-time start-up after reset: restores the persistent slice and
    /// reads the temperature calibration.
    pub fn power_on(&mut self, reset_cause: u8) {
        self.log.record(0, LogEvent::Boot { reset_cause });
        self.diagnostics.note_reset_cause(reset_cause, &mut self.log);

        if self.store.reload(self.shared, &self.irq).is_err() {
            self.diagnostics
                .report(Fault::StorageFailure, 1, &mut self.log, 0);
        }
        self.temperature_offset = match self.store.temperature_offset() {
            Ok(offset) => offset,
            Err(_) => {
                self.diagnostics
                    .report(Fault::StorageFailure, 1, &mut self.log, 0);
                0
            }
        };
    }

    /// Why the last deep sleep ended.
    pub fn sense_wake(&self) -> WakeReason {
        let (button, charger) = self.io.wake_lines();
        wake_reasons(button, self.shared.alarm_pending(&self.irq), charger)
    }

    /// Begins an awake period.
    pub fn start(&mut self, wake: WakeReason) {
        self.wake = wake;
        self.log.record(
            self.millis(),
            LogEvent::Wake {
                reasons: wake.bits(),
            },
        );
        self.enter(RunState::Wake);

        // Prime the filters with blocking readings, then hand the converter
        // to the sample timer
        let shared = self.shared;
        let adc = &mut self.adc;
        let offset = self.temperature_offset;
        let first = shared.sampler.masked(&self.irq, |sampler| {
            shared
                .measurements
                .masked(&self.irq, |m| sampler.seed(offset, m, |ch| adc.convert(ch)))
        });
        self.adc.start(first);
        self.watchdog.start(WATCHDOG_TIMEOUT_MS);

        let battery_mv = self.shared.battery_mv(&self.irq);
        if battery_mv < BATTERY_TURN_ON_MV && self.io.charge_state() != ChargeState::Charging {
            self.enter(RunState::Sleep);
        }
    }

    /// One super-loop pass.
    pub fn step(&mut self) -> RunState {
        self.watchdog.feed();

        if self.scheduler.take(Phase::Io, self.shared, &self.irq) {
            self.evaluate_io();
        }
        if self.scheduler.take(Phase::Indicator, self.shared, &self.irq) {
            let charge = self.io.charge_state();
            self.indicator.evaluate(charge, self.shared, &self.irq);
        }
        if self.scheduler.take(Phase::Store, self.shared, &self.irq) {
            self.evaluate_store();
        }
        if self.scheduler.take(Phase::Clock, self.shared, &self.irq) {
            self.evaluate_clock();
        }
        if self.scheduler.take(Phase::Run, self.shared, &self.irq) {
            self.harvest_faults();
            self.evaluate_run();
        }
        self.state
    }

    /// Ends the awake period before deep sleep.
    pub fn finish(&mut self) {
        self.adc.stop();
        self.watchdog.disable();
    }

    /// Runs a whole awake period.
    pub fn run(&mut self, wake: WakeReason) {
        self.start(wake);
        while self.state != RunState::Sleep {
            self.step();
        }
        self.finish();
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn rails(&self) -> &PowerRails<B::Output> {
        &self.rails
    }

    pub fn indicator(&self) -> &Indicator<B::Pwm> {
        &self.indicator
    }

    pub fn io(&self) -> &IoMonitor<B::Input> {
        &self.io
    }

    pub fn store(&self) -> &PersistentStore<B::Storage> {
        &self.store
    }

    pub fn irq(&self) -> &B::Irqs {
        &self.irq
    }

    fn millis(&self) -> u32 {
        self.scheduler.millis(self.shared, &self.irq)
    }

    fn evaluate_io(&mut self) {
        match self.io.evaluate(self.shared, &self.irq) {
            Some(PressEvent::Short) => self.log.record(self.millis(), LogEvent::ShortPress),
            Some(PressEvent::Long) => self.log.record(self.millis(), LogEvent::LongPress),
            None => {}
        }
    }

    fn evaluate_store(&mut self) {
        let event = match self.store.evaluate(self.shared, &self.irq) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(_) => {
                let ms = self.millis();
                self.diagnostics
                    .report(Fault::StorageFailure, 1, &mut self.log, ms);
                return;
            }
        };
        let ms = self.millis();
        let logged = match event {
            StoreEvent::CommitStarted => LogEvent::CommitStarted,
            StoreEvent::CommitRestarted => LogEvent::CommitRestarted,
            StoreEvent::CommitFinished => LogEvent::CommitFinished,
            StoreEvent::Reloaded => LogEvent::Reloaded,
            StoreEvent::Rejected(value) => {
                self.diagnostics
                    .report(Fault::MalformedCommand, 1, &mut self.log, ms);
                LogEvent::StoreRejected { value }
            }
        };
        self.log.record(ms, logged);
    }

    fn evaluate_clock(&mut self) {
        // WouldBlock: a host transfer is open, retry next pass
        let Ok(update) = self.clock.evaluate(self.shared, &self.irq) else {
            return;
        };
        let ms = self.millis();
        if update.time_set {
            let time = self.shared.clock.masked(&self.irq, |c| c.time());
            self.log.record(ms, LogEvent::ClockSet { time });
        }
        if update.alarm_armed {
            self.log.record(ms, LogEvent::AlarmArmed);
        }
        if update.alarm_disarmed {
            self.log.record(ms, LogEvent::AlarmDisarmed);
        }
        if update.correction_changed {
            let correction = self.shared.clock.masked(&self.irq, |c| c.correction());
            self.log
                .record(ms, LogEvent::CorrectionChanged { correction });
        }
    }

    fn harvest_faults(&mut self) {
        let faults = self.shared.bus.masked(&self.irq, |bus| bus.faults.take());
        let ms = self.millis();
        self.diagnostics.harvest(faults, &mut self.log, ms);
    }

    fn evaluate_run(&mut self) {
        let battery_mv = self.shared.battery_mv(&self.irq);
        let battery_ok = battery_mv >= BATTERY_TURN_ON_MV;
        let enabled = self.shared.registers(&self.irq, |r| r.wake_enable());

        let next = match self.state {
            RunState::Wake => self.evaluate_wake(battery_ok, enabled),
            RunState::Charge => self.evaluate_charge(battery_ok, enabled),
            RunState::Wait => self.evaluate_wait(),
            RunState::Power => self.evaluate_power(battery_mv),
            RunState::PowerOff => self.evaluate_power_off(),
            RunState::Sleep => None,
        };
        if let Some(next) = next {
            self.enter(next);
        }
    }

    fn evaluate_wake(&mut self, battery_ok: bool, enabled: WakeEnable) -> Option<RunState> {
        let charge = self.io.charge_state();
        if self.wake.contains(WakeReason::ALARM)
            && enabled.contains(WakeEnable::ALARM)
            && battery_ok
        {
            self.announce_power_on(WakeReason::ALARM);
            self.shared.clear_alarm(&self.irq);
            Some(RunState::Power)
        } else if self.wake.contains(WakeReason::CHARGE) {
            let start =
                enabled.contains(WakeEnable::CHARGE_START) && charge == ChargeState::Charging;
            let done =
                enabled.contains(WakeEnable::CHARGE_DONE) && charge == ChargeState::Complete;
            if (start || done) && battery_ok {
                self.announce_power_on(WakeReason::CHARGE);
                Some(RunState::Power)
            } else if charge != ChargeState::Off {
                Some(RunState::Charge)
            } else {
                Some(RunState::Sleep)
            }
        } else if self.io.short_period_expired() && battery_ok {
            Some(RunState::Wait)
        } else if !self.io.button_down() {
            Some(RunState::Sleep)
        } else {
            None
        }
    }

    fn evaluate_charge(&mut self, battery_ok: bool, enabled: WakeEnable) -> Option<RunState> {
        let charge = self.io.charge_state();
        if !battery_ok {
            return (charge == ChargeState::Off).then_some(RunState::Sleep);
        }
        if self.shared.alarm_pending(&self.irq) && enabled.contains(WakeEnable::ALARM) {
            self.announce_power_on(WakeReason::ALARM);
            self.shared.clear_alarm(&self.irq);
            Some(RunState::Power)
        } else if self.io.short_period_expired() {
            Some(RunState::Wait)
        } else if charge == ChargeState::Complete && enabled.contains(WakeEnable::CHARGE_DONE) {
            self.announce_power_on(WakeReason::CHARGE);
            Some(RunState::Power)
        } else if charge == ChargeState::Off {
            Some(RunState::Sleep)
        } else {
            None
        }
    }

    fn evaluate_wait(&mut self) -> Option<RunState> {
        if self.io.button_down() {
            return None;
        }
        self.announce_power_on(WakeReason::BUTTON);
        // The press that got us here is not a host-visible press
        self.io.take_long_press();
        self.shared
            .registers(&self.irq, |r| r.update_status(|s| s.remove(Status::SHORT_PRESS)));
        Some(RunState::Power)
    }

    fn evaluate_power(&mut self, battery_mv: u16) -> Option<RunState> {
        let ms = self.millis();
        match self.critical.evaluate(battery_mv) {
            BatteryReading::FirstLow => {
                self.set_critical(true);
                self.log
                    .record(ms, LogEvent::CriticalBatteryRaised { mv: battery_mv });
            }
            BatteryReading::Low => {}
            BatteryReading::Healthy => {
                let raised = self
                    .shared
                    .registers(&self.irq, |r| r.status().contains(Status::CRITICAL_BATTERY));
                if raised {
                    self.set_critical(false);
                    self.log
                        .record(ms, LogEvent::CriticalBatteryCleared { mv: battery_mv });
                }
            }
        }

        if self.io.take_long_press() {
            return Some(RunState::PowerOff);
        }

        let shutdown =
            self.shared.registers(&self.irq, |r| r.get(Slot::Shutdown)) == SHUTDOWN_TRIGGER;
        if self.critical.expired() {
            self.diagnostics
                .report(Fault::CriticalBattery, 1, &mut self.log, ms);
        } else if shutdown {
            self.log.record(ms, LogEvent::HostShutdown);
        } else {
            return None;
        }
        Some(self.off_state())
    }

    fn evaluate_power_off(&mut self) -> Option<RunState> {
        if self.io.button_down() {
            return None;
        }
        self.io.take_long_press();
        Some(self.off_state())
    }

    /// Where the host-off path leads: keep charging or go to sleep.
    fn off_state(&self) -> RunState {
        if self.io.charge_state() == ChargeState::Off {
            RunState::Sleep
        } else {
            RunState::Charge
        }
    }

    fn set_critical(&self, on: bool) {
        self.shared.registers(&self.irq, |r| {
            r.update_status(|s| s.set(Status::CRITICAL_BATTERY, on))
        });
    }

    /// Records why the host is being powered and disarms the wake mask.
    fn announce_power_on(&mut self, reason: WakeReason) {
        self.shared.registers(&self.irq, |r| {
            r.update_status(|s| s.set_power_on_reason(reason));
            r.set(Slot::WakeEnable, 0);
        });
        self.log.record(
            self.millis(),
            LogEvent::PowerOn {
                reason: reason.bits(),
            },
        );
    }

    fn clear_shutdown(&self) {
        self.shared.registers(&self.irq, |r| r.set(Slot::Shutdown, 0));
    }

    fn suspend_bus(&mut self) {
        self.bus.suspend();
        self.shared.bus.masked(&self.irq, |bus| bus.clear_transfer());
    }

    fn resume_bus(&mut self) {
        self.shared.bus.masked(&self.irq, |bus| bus.clear_transfer());
        self.bus.resume();
    }

    fn shutdown_bus(&mut self) {
        self.bus.shutdown();
        self.shared.bus.masked(&self.irq, |bus| bus.clear_transfer());
    }

    /// Entry actions, then the state change itself.
    fn enter(&mut self, next: RunState) {
        match next {
            RunState::Wake => {
                self.io.reset(self.shared, &self.irq);
                self.indicator.reset();
                self.scheduler.reset(self.shared, &self.irq);
                self.rails.set(Rail::Aux, true);
            }
            RunState::Charge => {
                self.rails.set(Rail::Main, false);
                // Back on after PowerOff; the sampler reference hangs off it
                self.rails.set(Rail::Aux, true);
                self.indicator.enable_backlight(false, self.shared, &self.irq);
                self.suspend_bus();
                self.clear_shutdown();
            }
            RunState::Wait => {
                self.rails.set(Rail::Main, true);
                self.indicator.enable_backlight(true, self.shared, &self.irq);
            }
            RunState::Power => {
                self.rails.set(Rail::Main, true);
                self.indicator.enable_backlight(true, self.shared, &self.irq);
                self.resume_bus();
                self.critical.arm();
            }
            RunState::PowerOff => {
                self.rails.all_off();
                self.indicator.enable_backlight(false, self.shared, &self.irq);
            }
            RunState::Sleep => {
                self.clear_shutdown();
                self.shutdown_bus();
                self.rails.all_off();
                self.indicator.show_charge(ChargeState::Off);
                self.indicator.enable_backlight(false, self.shared, &self.irq);
                // Alarms that fired while awake must not wake us again
                self.shared.clear_alarm(&self.irq);
            }
        }
        let from = self.state;
        self.state = next;
        self.log
            .record(self.millis(), LogEvent::Transition { from, to: next });
    }
}
