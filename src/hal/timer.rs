//! Timebases: Timer1 scheduler tick and bus guard, Timer0 sample trigger,
//! Timer2 one-second clock from the 32.768 kHz crystal.

use avr_device::atmega1284p::{TC0, TC1, TC2};

use crate::config::{CPU_FREQ_HZ, JITTER_START, TICK_US};

/// Clock select encoding shared by Timer0 and Timer1.
#[derive(Clone, Copy)]
#[repr(u8)]
pub enum Prescaler {
    Stop = 0,
    Direct = 1,
    Div8 = 2,
    Div64 = 3,
    Div256 = 4,
    Div1024 = 5,
}

const PRESCALER_MASK: u8 = 0x07;

const TCCR0A_WGM01: u8 = 1 << 1;
const TCCR1B_WGM12: u8 = 1 << 3;
const TIMSK0_OCIE0A: u8 = 1 << 1;
const TIMSK1_OCIE1A: u8 = 1 << 1;
const TIMSK1_OCIE1B: u8 = 1 << 2;
const TIFR1_OCF1B: u8 = 1 << 2;
const TIMSK2_TOIE2: u8 = 1 << 0;
const TIFR2_TOV2: u8 = 1 << 0;
const ASSR_AS2: u8 = 1 << 5;
/// TCN2UB, OCR2AUB, OCR2BUB, TCR2AUB, TCR2BUB
const ASSR_BUSY: u8 = 0x1F;
/// 32768 / 128 / 256 = one overflow per second
const TCCR2B_DIV128: u8 = 0x05;

const TICK_TOP: u16 = ((CPU_FREQ_HZ / 8 / 1_000_000) as u16 * TICK_US) - 1;
/// Guard compare sits half way through the tick period
const GUARD_COMPARE: u16 = TICK_TOP / 2;

/// Timer1 in CTC mode: compare A is the scheduler tick, compare B the bus
/// hang guard.
pub struct TickTimer {
    _private: (),
}

impl TickTimer {
    pub fn new() -> Self {
        unsafe {
            let p = TC1::ptr();
            (*p).timsk1.write(|w| w.bits(0));
            (*p).tccr1a.write(|w| w.bits(0));
            (*p).tccr1b.write(|w| w.bits(TCCR1B_WGM12));
            (*p).tcnt1.write(|w| w.bits(0));
            (*p).ocr1a.write(|w| w.bits(TICK_TOP));
            (*p).ocr1b.write(|w| w.bits(GUARD_COMPARE));
        }
        Self { _private: () }
    }

    pub fn start(&mut self) {
        unsafe {
            let p = TC1::ptr();
            (*p).tcnt1.write(|w| w.bits(0));
            (*p).timsk1
                .modify(|r, w| w.bits(r.bits() | TIMSK1_OCIE1A));
            (*p).tccr1b
                .write(|w| w.bits(TCCR1B_WGM12 | Prescaler::Div8 as u8));
        }
    }

    pub fn stop(&mut self) {
        unsafe {
            let p = TC1::ptr();
            (*p).tccr1b
                .modify(|r, w| w.bits(r.bits() & !PRESCALER_MASK));
            (*p).timsk1.write(|w| w.bits(0));
        }
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Enables or disables the bus hang guard on Timer1 compare B.
pub fn guard_enable(on: bool) {
    unsafe {
        let p = TC1::ptr();
        if on {
            (*p).tifr1.write(|w| w.bits(TIFR1_OCF1B));
            (*p).timsk1
                .modify(|r, w| w.bits(r.bits() | TIMSK1_OCIE1B));
        } else {
            (*p).timsk1
                .modify(|r, w| w.bits(r.bits() & !TIMSK1_OCIE1B));
        }
    }
}

/// Timer0 in CTC mode; each compare match A triggers one conversion.
pub struct SampleTimer {
    _private: (),
}

impl SampleTimer {
    pub fn new() -> Self {
        unsafe {
            let p = TC0::ptr();
            (*p).timsk0.write(|w| w.bits(0));
            (*p).tccr0a.write(|w| w.bits(TCCR0A_WGM01));
            (*p).tccr0b.write(|w| w.bits(Prescaler::Stop as u8));
            (*p).ocr0a.write(|w| w.bits(JITTER_START));
        }
        Self { _private: () }
    }

    pub fn start(&mut self) {
        unsafe {
            let p = TC0::ptr();
            (*p).tcnt0.write(|w| w.bits(0));
            (*p).timsk0
                .modify(|r, w| w.bits(r.bits() | TIMSK0_OCIE0A));
            (*p).tccr0b.write(|w| w.bits(Prescaler::Div64 as u8));
        }
    }

    pub fn stop(&mut self) {
        unsafe {
            let p = TC0::ptr();
            (*p).tccr0b.write(|w| w.bits(Prescaler::Stop as u8));
            (*p).timsk0
                .modify(|r, w| w.bits(r.bits() & !TIMSK0_OCIE0A));
        }
    }
}

impl Default for SampleTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads the next sample period. Called from the compare handler.
#[inline]
pub fn set_sample_compare(value: u8) {
    unsafe {
        (*TC0::ptr()).ocr0a.write(|w| w.bits(value));
    }
}

/// Starts Timer2 from the external crystal. Keeps running in power-save
/// sleep, so the overflow also wakes the part once a second.
pub fn start_clock() {
    unsafe {
        let p = TC2::ptr();
        (*p).timsk2.write(|w| w.bits(0));
        (*p).assr.write(|w| w.bits(ASSR_AS2));
        (*p).tcnt2.write(|w| w.bits(0));
        (*p).tccr2a.write(|w| w.bits(0));
        (*p).tccr2b.write(|w| w.bits(TCCR2B_DIV128));
        while (*p).assr.read().bits() & ASSR_BUSY != 0 {}
        (*p).tifr2.write(|w| w.bits(TIFR2_TOV2));
        (*p).timsk2.write(|w| w.bits(TIMSK2_TOIE2));
    }
}

/// Power-save entry must wait until the asynchronous registers have synced,
/// or the part can sleep through the next overflow.
pub fn wait_clock_sync() {
    unsafe {
        let p = TC2::ptr();
        // Dummy write to a control register forces a sync cycle
        (*p).tccr2a.write(|w| w.bits(0));
        while (*p).assr.read().bits() & ASSR_BUSY != 0 {}
    }
}
