//! Register-level drivers for the ATmega1284P

pub mod adc;
pub mod eeprom;
pub mod gpio;
pub mod irq;
pub mod power;
pub mod pwm;
pub mod timer;
pub mod twi;
pub mod uart;
pub mod watchdog;

pub use adc::Adc;
pub use eeprom::Eeprom;
pub use gpio::{board, InputLine, OutputLine, Port};
pub use irq::AvrIrq;
pub use power::{Power, SleepMode};
pub use pwm::{PwmChannel, Timer3Pwm};
pub use timer::{SampleTimer, TickTimer};
pub use twi::TwiSlave;
pub use uart::Uart;
pub use watchdog::Watchdog;

use crate::application::Board;

/// The production board.
pub struct Gcore;

impl Board for Gcore {
    type Irqs = AvrIrq;
    type Input = InputLine;
    type Output = OutputLine;
    type Pwm = Timer3Pwm;
    type Storage = Eeprom;
    type Bus = TwiSlave;
    type Adc = Adc;
    type Wdt = Watchdog;
}
