//! Sleep modes and wake sources
//!
//! Power-save keeps Timer2 running from the crystal, so the one-second
//! clock and alarm survive sleep. Pin-change interrupts on port D wake the
//! part on button presses and charger activity.

use avr_device::atmega1284p::{CPU, EXINT};

use crate::hal::gpio::board::WAKE_PCINT_MASK;

const SMCR_SE: u8 = 1 << 0;
const PCICR_PCIE3: u8 = 1 << 3;
const PCIFR_PCIF3: u8 = 1 << 3;

#[derive(Clone, Copy)]
#[repr(u8)]
pub enum SleepMode {
    Idle = 0,
    AdcNoiseReduction = 1,
    PowerDown = 2,
    PowerSave = 3,
    Standby = 6,
    ExtendedStandby = 7,
}

pub struct Power {
    _private: (),
}

impl Power {
    pub fn new() -> Self {
        Self { _private: () }
    }

    #[inline]
    pub fn set_sleep_mode(&mut self, mode: SleepMode) {
        unsafe {
            (*CPU::ptr())
                .smcr
                .write(|w| w.bits((mode as u8) << 1));
        }
    }

    /// Arms the pin-change wake for the button and charger lines.
    pub fn enable_pin_wake(&mut self) {
        unsafe {
            let p = EXINT::ptr();
            (*p).pcmsk3.write(|w| w.bits(WAKE_PCINT_MASK));
            (*p).pcifr.write(|w| w.bits(PCIFR_PCIF3));
            (*p).pcicr
                .modify(|r, w| w.bits(r.bits() | PCICR_PCIE3));
        }
    }

    pub fn disable_pin_wake(&mut self) {
        unsafe {
            (*EXINT::ptr())
                .pcicr
                .modify(|r, w| w.bits(r.bits() & !PCICR_PCIE3));
        }
    }

    /// Sleeps until any enabled interrupt. Global interrupts must be on.
    pub fn sleep(&mut self, mode: SleepMode) {
        self.set_sleep_mode(mode);
        unsafe {
            let p = CPU::ptr();
            (*p).smcr.modify(|r, w| w.bits(r.bits() | SMCR_SE));
            avr_device::asm::sleep();
            (*p).smcr.modify(|r, w| w.bits(r.bits() & !SMCR_SE));
        }
    }
}

impl Default for Power {
    fn default() -> Self {
        Self::new()
    }
}
