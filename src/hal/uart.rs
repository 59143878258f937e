use avr_device::atmega1284p::USART0;
use core::convert::Infallible;
use embedded_hal::serial;

use crate::config::{CPU_FREQ_HZ, UART_BAUD};

const UBRR: u16 = (CPU_FREQ_HZ / (16 * UART_BAUD) - 1) as u16;

const UCSRA_TXC: u8 = 1 << 6;
const UCSRA_UDRE: u8 = 1 << 5;
const UCSRB_TXEN: u8 = 1 << 3;
/// Asynchronous, 8 data bits, no parity, one stop bit
const UCSRC_8N1: u8 = 0x06;

/// Transmit-only USART0, polled.
pub struct Uart {
    pending: bool,
}

impl Uart {
    pub fn new() -> Self {
        unsafe {
            let p = USART0::ptr();
            (*p).ubrr0.write(|w| w.bits(UBRR));
            (*p).ucsr0c.write(|w| w.bits(UCSRC_8N1));
            (*p).ucsr0b.write(|w| w.bits(UCSRB_TXEN));
        }
        Self { pending: false }
    }

    /// Turns the transmitter off so TXD floats during sleep.
    pub fn disable(&mut self) {
        unsafe {
            (*USART0::ptr()).ucsr0b.write(|w| w.bits(0));
        }
    }
}

impl Default for Uart {
    fn default() -> Self {
        Self::new()
    }
}

impl serial::Write<u8> for Uart {
    type Error = Infallible;

    fn write(&mut self, word: u8) -> nb::Result<(), Infallible> {
        unsafe {
            let p = USART0::ptr();
            if (*p).ucsr0a.read().bits() & UCSRA_UDRE == 0 {
                return Err(nb::Error::WouldBlock);
            }
            // TXC is cleared by writing one
            (*p).ucsr0a
                .modify(|r, w| w.bits(r.bits() | UCSRA_TXC));
            (*p).udr0.write(|w| w.bits(word));
        }
        self.pending = true;
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Infallible> {
        let done = unsafe { (*USART0::ptr()).ucsr0a.read().bits() & UCSRA_TXC != 0 };
        if !self.pending || done {
            self.pending = false;
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}
