//! Status indicator and display backlight PWM
//!
//! The status channel animates the charger state. The backlight follows the
//! host brightness slot while the run state machine has it enabled.

use embedded_hal::PwmPin;

use crate::config::{
    STATUS_BLINK_EVALS, STATUS_BLINK_LEVEL, STATUS_COMPLETE_LEVEL, STATUS_PULSE_PEAK,
    STATUS_PULSE_STEP, STATUS_PULSE_STEPS,
};
use crate::drivers::io_monitor::ChargeState;
use crate::protocol::registers::Slot;
use crate::shared::SharedState;
use crate::sync::IrqControl;

/// Pulse trough
const PULSE_FLOOR: u8 = STATUS_PULSE_PEAK - STATUS_PULSE_STEP * STATUS_PULSE_STEPS;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Animation {
    Off,
    Solid,
    FadeUp,
    FadeDown,
    BlinkOn,
    BlinkOff,
}

/// Sets a duty, disconnecting the output entirely at zero.
fn drive<P: PwmPin<Duty = u8>>(pin: &mut P, duty: u8) {
    pin.set_duty(duty);
    if duty == 0 {
        pin.disable();
    } else {
        pin.enable();
    }
}

pub struct Indicator<P> {
    status: P,
    backlight: P,
    animation: Animation,
    remaining: u8,
    level: u8,
    backlight_enabled: bool,
    backlight_level: u8,
    charge: ChargeState,
}

impl<P: PwmPin<Duty = u8>> Indicator<P> {
    pub fn new(status: P, backlight: P) -> Self {
        Self {
            status,
            backlight,
            animation: Animation::Off,
            remaining: STATUS_BLINK_EVALS,
            level: 0,
            backlight_enabled: false,
            backlight_level: 0,
            charge: ChargeState::Off,
        }
    }

    /// Both outputs dark, backlight disabled, animation stopped.
    pub fn reset(&mut self) {
        self.backlight_enabled = false;
        self.animation = Animation::Off;
        self.charge = ChargeState::Off;
        self.remaining = STATUS_BLINK_EVALS;
        self.set_status(0);
        self.set_backlight(0);
    }

    fn set_status(&mut self, level: u8) {
        self.level = level;
        drive(&mut self.status, level);
    }

    fn set_backlight(&mut self, level: u8) {
        self.backlight_level = level;
        drive(&mut self.backlight, level);
    }

    pub fn enable_backlight<C: IrqControl>(&mut self, enable: bool, shared: &SharedState, ctl: &C) {
        self.backlight_enabled = enable;
        let level = if enable {
            shared.registers(ctl, |regs| regs.get(Slot::Brightness))
        } else {
            0
        };
        self.set_backlight(level);
    }

    /// Restarts the status animation for `charge`.
    pub fn show_charge(&mut self, charge: ChargeState) {
        self.charge = charge;
        match charge {
            ChargeState::Off => {
                self.animation = Animation::Off;
                self.set_status(0);
            }
            ChargeState::Charging => {
                self.animation = Animation::FadeUp;
                self.remaining = STATUS_PULSE_STEPS;
                self.set_status(PULSE_FLOOR);
            }
            ChargeState::Complete => {
                self.animation = Animation::Solid;
                self.set_status(STATUS_COMPLETE_LEVEL);
            }
            ChargeState::Fault => {
                self.animation = Animation::BlinkOn;
                self.remaining = STATUS_BLINK_EVALS;
                self.set_status(STATUS_BLINK_LEVEL);
            }
        }
    }

    /// One animation step. Picks up brightness changes and charge state
    /// changes first.
    pub fn evaluate<C: IrqControl>(&mut self, charge: ChargeState, shared: &SharedState, ctl: &C) {
        let brightness = shared.registers(ctl, |regs| regs.get(Slot::Brightness));
        if self.backlight_enabled && brightness != self.backlight_level {
            self.set_backlight(brightness);
        }

        if charge != self.charge {
            self.show_charge(charge);
        }

        match self.animation {
            Animation::Off | Animation::Solid => {}
            Animation::FadeUp => {
                let level = self.level + STATUS_PULSE_STEP;
                self.set_status(level);
                self.turn(Animation::FadeDown, STATUS_PULSE_STEPS);
            }
            Animation::FadeDown => {
                let level = self.level - STATUS_PULSE_STEP;
                self.set_status(level);
                self.turn(Animation::FadeUp, STATUS_PULSE_STEPS);
            }
            Animation::BlinkOn => {
                if self.turn(Animation::BlinkOff, STATUS_BLINK_EVALS) {
                    self.set_status(0);
                }
            }
            Animation::BlinkOff => {
                if self.turn(Animation::BlinkOn, STATUS_BLINK_EVALS) {
                    self.set_status(STATUS_BLINK_LEVEL);
                }
            }
        }
    }

    /// Counts down the current half and switches to `next` when it ends.
    fn turn(&mut self, next: Animation, length: u8) -> bool {
        self.remaining -= 1;
        if self.remaining == 0 {
            self.remaining = length;
            self.animation = next;
            true
        } else {
            false
        }
    }

    pub fn animation(&self) -> Animation {
        self.animation
    }

    pub fn status_level(&self) -> u8 {
        self.level
    }

    pub fn backlight_level(&self) -> u8 {
        self.backlight_level
    }
}
