use avr_device::atmega1284p::{PORTB, PORTD};
use core::convert::Infallible;
use embedded_hal::digital::v2::{InputPin, OutputPin};

/// Ports with board wiring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Port {
    B,
    D,
}

// Expands `$body` with `$r` bound to the named register of the selected port.
macro_rules! with_reg {
    ($port:expr, [$b:ident, $d:ident], |$r:ident| $body:expr) => {
        match $port {
            Port::B => unsafe {
                let $r = &(*PORTB::ptr()).$b;
                $body
            },
            Port::D => unsafe {
                let $r = &(*PORTD::ptr()).$d;
                $body
            },
        }
    };
}

fn set_bits(port: Port, mask: u8, on: bool) {
    let apply = |bits: u8| if on { bits | mask } else { bits & !mask };
    with_reg!(port, [portb, portd], |r| r.modify(|v, w| w.bits(apply(v.bits()))));
}

fn set_direction(port: Port, mask: u8, output: bool) {
    let apply = |bits: u8| if output { bits | mask } else { bits & !mask };
    with_reg!(port, [ddrb, ddrd], |r| r.modify(|v, w| w.bits(apply(v.bits()))));
}

/// Input line, optionally with the internal pull-up.
pub struct InputLine {
    port: Port,
    mask: u8,
}

impl InputLine {
    pub fn new(port: Port, pin: u8, pull_up: bool) -> Self {
        let mask = 1 << pin;
        set_direction(port, mask, false);
        set_bits(port, mask, pull_up);
        Self { port, mask }
    }
}

impl InputPin for InputLine {
    type Error = Infallible;

    #[inline]
    fn is_high(&self) -> Result<bool, Infallible> {
        let bits = with_reg!(self.port, [pinb, pind], |r| r.read().bits());
        Ok(bits & self.mask != 0)
    }

    #[inline]
    fn is_low(&self) -> Result<bool, Infallible> {
        self.is_high().map(|high| !high)
    }
}

/// Push-pull output line, driven low on creation.
pub struct OutputLine {
    port: Port,
    mask: u8,
}

impl OutputLine {
    pub fn new(port: Port, pin: u8) -> Self {
        let mask = 1 << pin;
        set_bits(port, mask, false);
        set_direction(port, mask, true);
        Self { port, mask }
    }
}

impl OutputPin for OutputLine {
    type Error = Infallible;

    #[inline]
    fn set_high(&mut self) -> Result<(), Infallible> {
        set_bits(self.port, self.mask, true);
        Ok(())
    }

    #[inline]
    fn set_low(&mut self) -> Result<(), Infallible> {
        set_bits(self.port, self.mask, false);
        Ok(())
    }
}

/// Board wiring
pub mod board {
    use super::Port;

    pub const MAIN_RAIL: (Port, u8) = (Port::B, 0);
    pub const AUX_RAIL: (Port, u8) = (Port::B, 1);
    pub const STATUS_LED: (Port, u8) = (Port::B, 6);
    pub const BACKLIGHT: (Port, u8) = (Port::B, 7);

    // Active low, pulled up
    pub const BUTTON: (Port, u8) = (Port::D, 2);
    pub const CHARGE_1: (Port, u8) = (Port::D, 4);
    pub const CHARGE_2: (Port, u8) = (Port::D, 5);
    pub const CARD: (Port, u8) = (Port::D, 6);

    /// Pin-change mask (PCMSK3) for the inputs that wake the controller
    pub const WAKE_PCINT_MASK: u8 = (1 << BUTTON.1) | (1 << CHARGE_1.1) | (1 << CHARGE_2.1);
}
