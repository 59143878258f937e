//! Indicator PWM on Timer3
//!
//! Timer3 runs 8-bit fast PWM at F_CPU / 64 / 256 (about 490 Hz). OC3A
//! drives the status LED and OC3B the backlight.

use avr_device::atmega1284p::{PORTB, TC3};
use embedded_hal::PwmPin;

use crate::hal::gpio::board;

const TCCR3A_WGM30: u8 = 1 << 0;
const TCCR3B_WGM32: u8 = 1 << 3;
const TCCR3B_CS_DIV64: u8 = 0x03;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PwmChannel {
    /// OC3A, status LED
    A,
    /// OC3B, backlight
    B,
}

impl PwmChannel {
    const fn com_bit(self) -> u8 {
        match self {
            PwmChannel::A => 1 << 7,
            PwmChannel::B => 1 << 5,
        }
    }
}

/// Starts the shared timebase. Outputs stay disconnected until enabled.
pub fn init() {
    let pins = (1 << board::STATUS_LED.1) | (1 << board::BACKLIGHT.1);
    unsafe {
        (*PORTB::ptr())
            .portb
            .modify(|r, w| w.bits(r.bits() & !pins));
        (*PORTB::ptr())
            .ddrb
            .modify(|r, w| w.bits(r.bits() | pins));
        let p = TC3::ptr();
        (*p).tccr3a.write(|w| w.bits(TCCR3A_WGM30));
        (*p).tccr3b.write(|w| w.bits(TCCR3B_WGM32 | TCCR3B_CS_DIV64));
        (*p).ocr3a.write(|w| w.bits(0));
        (*p).ocr3b.write(|w| w.bits(0));
    }
}

/// Stops the timebase, leaving both pins at their port level.
pub fn shutdown() {
    unsafe {
        let p = TC3::ptr();
        (*p).tccr3a.write(|w| w.bits(0));
        (*p).tccr3b.write(|w| w.bits(0));
    }
}

pub struct Timer3Pwm {
    channel: PwmChannel,
}

impl Timer3Pwm {
    pub fn new(channel: PwmChannel) -> Self {
        Self { channel }
    }
}

impl PwmPin for Timer3Pwm {
    type Duty = u8;

    fn disable(&mut self) {
        let com = self.channel.com_bit();
        unsafe {
            (*TC3::ptr())
                .tccr3a
                .modify(|r, w| w.bits(r.bits() & !com));
        }
    }

    fn enable(&mut self) {
        let com = self.channel.com_bit();
        unsafe {
            (*TC3::ptr())
                .tccr3a
                .modify(|r, w| w.bits(r.bits() | com));
        }
    }

    fn get_duty(&self) -> u8 {
        let raw = unsafe {
            match self.channel {
                PwmChannel::A => (*TC3::ptr()).ocr3a.read().bits(),
                PwmChannel::B => (*TC3::ptr()).ocr3b.read().bits(),
            }
        };
        raw as u8
    }

    fn get_max_duty(&self) -> u8 {
        u8::MAX
    }

    fn set_duty(&mut self, duty: u8) {
        unsafe {
            match self.channel {
                PwmChannel::A => (*TC3::ptr()).ocr3a.write(|w| w.bits(duty as u16)),
                PwmChannel::B => (*TC3::ptr()).ocr3b.write(|w| w.bits(duty as u16)),
            }
        }
    }
}
