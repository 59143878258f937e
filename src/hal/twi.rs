//! TWI slave
//!
//! Every bus interrupt is turned into a [`BusEvent`] by [`decode`]; the
//! protocol answer goes back through [`respond`], which also releases the
//! stretched clock.

use avr_device::atmega1284p::TWI;

use crate::config::BUS_ADDRESS;
use crate::hal::timer;
use crate::protocol::{BusEvent, BusPort, BusResponse};

const TWCR_TWINT: u8 = 1 << 7;
const TWCR_TWEA: u8 = 1 << 6;
const TWCR_TWSTO: u8 = 1 << 4;
const TWCR_TWEN: u8 = 1 << 2;
const TWCR_TWIE: u8 = 1 << 0;

const STATUS_MASK: u8 = 0xF8;

/// Slave status codes (TWSR with the prescaler bits masked)
#[derive(Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum TwiStatus {
    OwnWriteAck = 0x60,
    ArbLostOwnWrite = 0x68,
    ArbLostGeneralCall = 0x78,
    DataReceivedAck = 0x80,
    StopOrRestart = 0xA0,
    OwnReadAck = 0xA8,
    ArbLostOwnRead = 0xB0,
    DataSentAck = 0xB8,
    DataSentNack = 0xC0,
    LastDataSentAck = 0xC8,
}

/// Reads the status and data registers of the pending interrupt.
pub fn decode() -> BusEvent {
    let (status, data) = unsafe {
        let p = TWI::ptr();
        ((*p).twsr.read().bits() & STATUS_MASK, (*p).twdr.read().bits())
    };
    match status {
        s if s == TwiStatus::OwnWriteAck as u8 => BusEvent::Start { read: false },
        s if s == TwiStatus::OwnReadAck as u8 => BusEvent::Start { read: true },
        s if s == TwiStatus::DataReceivedAck as u8 => BusEvent::Received(data),
        s if s == TwiStatus::DataSentAck as u8 => BusEvent::Transmitted { acked: true },
        s if s == TwiStatus::DataSentNack as u8 || s == TwiStatus::LastDataSentAck as u8 => {
            BusEvent::Transmitted { acked: false }
        }
        s if s == TwiStatus::StopOrRestart as u8 => BusEvent::Stop,
        s if s == TwiStatus::ArbLostOwnWrite as u8
            || s == TwiStatus::ArbLostGeneralCall as u8
            || s == TwiStatus::ArbLostOwnRead as u8 =>
        {
            BusEvent::ArbitrationLost
        }
        other => BusEvent::Unknown(other),
    }
}

/// Applies the protocol answer and clears TWINT.
pub fn respond(response: BusResponse) {
    const LISTEN: u8 = TWCR_TWINT | TWCR_TWEA | TWCR_TWEN | TWCR_TWIE;
    unsafe {
        let p = TWI::ptr();
        match response {
            BusResponse::Ack | BusResponse::Listen => (*p).twcr.write(|w| w.bits(LISTEN)),
            BusResponse::Transmit(byte) => {
                (*p).twdr.write(|w| w.bits(byte));
                (*p).twcr.write(|w| w.bits(LISTEN));
            }
            // Stop in slave mode only resets the peripheral to unaddressed
            BusResponse::Reset => (*p).twcr.write(|w| w.bits(LISTEN | TWCR_TWSTO)),
        }
    }
}

/// True while the peripheral is stretching the clock waiting for software.
#[inline]
pub fn clock_held() -> bool {
    unsafe { (*TWI::ptr()).twcr.read().bits() & TWCR_TWINT != 0 }
}

pub struct TwiSlave {
    _private: (),
}

impl TwiSlave {
    /// Loads the own address. The slave stays off until [`BusPort::resume`].
    pub fn new() -> Self {
        unsafe {
            let p = TWI::ptr();
            (*p).twcr.write(|w| w.bits(0));
            (*p).twar.write(|w| w.bits(BUS_ADDRESS << 1));
        }
        Self { _private: () }
    }
}

impl Default for TwiSlave {
    fn default() -> Self {
        Self::new()
    }
}

impl BusPort for TwiSlave {
    fn suspend(&mut self) {
        timer::guard_enable(false);
        // Enabled but not acknowledging: the host sees no device
        unsafe {
            (*TWI::ptr())
                .twcr
                .write(|w| w.bits(TWCR_TWINT | TWCR_TWEN));
        }
    }

    fn resume(&mut self) {
        unsafe {
            let p = TWI::ptr();
            (*p).twar.write(|w| w.bits(BUS_ADDRESS << 1));
            (*p).twcr
                .write(|w| w.bits(TWCR_TWINT | TWCR_TWEA | TWCR_TWEN | TWCR_TWIE));
        }
        timer::guard_enable(true);
    }

    fn shutdown(&mut self) {
        timer::guard_enable(false);
        unsafe {
            (*TWI::ptr()).twcr.write(|w| w.bits(0));
        }
    }
}
