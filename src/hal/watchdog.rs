use avr_device::atmega1284p::{CPU, WDT};
use embedded_hal::watchdog;

const WDTCSR_WDCE: u8 = 1 << 4;
const WDTCSR_WDE: u8 = 1 << 3;
const WDTCSR_WDP3: u8 = 1 << 5;
const MCUSR_WDRF: u8 = 1 << 3;

/// Prescaler settings; the period is 16 ms doubled per step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WatchdogTimeout {
    Ms16 = 0,
    Ms32 = 1,
    Ms64 = 2,
    Ms125 = 3,
    Ms250 = 4,
    Ms500 = 5,
    Ms1000 = 6,
    Ms2000 = 7,
    Ms4000 = 8,
    Ms8000 = 9,
}

impl WatchdogTimeout {
    /// Shortest period covering `ms`, capped at 8 s.
    pub const fn covering(ms: u16) -> Self {
        match ms {
            0..=16 => Self::Ms16,
            17..=32 => Self::Ms32,
            33..=64 => Self::Ms64,
            65..=125 => Self::Ms125,
            126..=250 => Self::Ms250,
            251..=500 => Self::Ms500,
            501..=1000 => Self::Ms1000,
            1001..=2000 => Self::Ms2000,
            2001..=4000 => Self::Ms4000,
            _ => Self::Ms8000,
        }
    }

    const fn bits(self) -> u8 {
        let n = self as u8;
        (n & 0x07) | if n & 0x08 != 0 { WDTCSR_WDP3 } else { 0 }
    }
}

/// Reads and clears the reset cause flags.
pub fn take_reset_cause() -> u8 {
    unsafe {
        let p = CPU::ptr();
        let cause = (*p).mcusr.read().bits();
        (*p).mcusr.write(|w| w.bits(0));
        cause
    }
}

pub struct Watchdog {
    _private: (),
}

impl Watchdog {
    #[inline]
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn timed_write(value: u8) {
        avr_device::interrupt::free(|_| unsafe {
            let p = WDT::ptr();
            avr_device::asm::wdr();
            (*p).wdtcsr.write(|w| w.bits(WDTCSR_WDCE | WDTCSR_WDE));
            (*p).wdtcsr.write(|w| w.bits(value));
        });
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl watchdog::Watchdog for Watchdog {
    #[inline]
    fn feed(&mut self) {
        avr_device::asm::wdr();
    }
}

impl watchdog::WatchdogEnable for Watchdog {
    type Time = u16;

    fn start<T: Into<u16>>(&mut self, period: T) {
        let timeout = WatchdogTimeout::covering(period.into());
        Self::timed_write(WDTCSR_WDE | timeout.bits());
    }
}

impl watchdog::WatchdogDisable for Watchdog {
    fn disable(&mut self) {
        // WDE is forced on while WDRF is set
        unsafe {
            (*CPU::ptr())
                .mcusr
                .modify(|r, w| w.bits(r.bits() & !MCUSR_WDRF));
        }
        Self::timed_write(0);
    }
}
