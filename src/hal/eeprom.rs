//! On-chip EEPROM behind the `embedded-storage` NOR flash traits
//!
//! The EEPROM can erase and program single bytes, so both the write and
//! erase granularity are one byte. Erase leaves 0xFF and program only
//! clears bits, which is exactly the NOR model.

use avr_device::atmega1284p::EEPROM;
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

pub const EEPROM_SIZE: usize = 4096;

const EECR_EERE: u8 = 1 << 0;
const EECR_EEPE: u8 = 1 << 1;
const EECR_EEMPE: u8 = 1 << 2;
const EEPM_ERASE_ONLY: u8 = 0x01 << 4;
const EEPM_WRITE_ONLY: u8 = 0x02 << 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromError {
    OutOfBounds,
}

impl NorFlashError for EepromError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            EepromError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
        }
    }
}

pub struct Eeprom {
    _private: (),
}

impl Eeprom {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn check(offset: u32, len: usize) -> Result<(), EepromError> {
        match (offset as usize).checked_add(len) {
            Some(end) if end <= EEPROM_SIZE => Ok(()),
            _ => Err(EepromError::OutOfBounds),
        }
    }

    fn wait_ready() {
        unsafe { while (*EEPROM::ptr()).eecr.read().bits() & EECR_EEPE != 0 {} }
    }

    fn read_byte(addr: u16) -> u8 {
        Self::wait_ready();
        unsafe {
            let p = EEPROM::ptr();
            (*p).eear.write(|w| w.bits(addr));
            (*p).eecr.write(|w| w.bits(EECR_EERE));
            (*p).eedr.read().bits()
        }
    }

    fn program(addr: u16, data: u8, mode: u8) {
        Self::wait_ready();
        // EEPE must follow EEMPE within four cycles
        avr_device::interrupt::free(|_| unsafe {
            let p = EEPROM::ptr();
            (*p).eear.write(|w| w.bits(addr));
            (*p).eedr.write(|w| w.bits(data));
            (*p).eecr.write(|w| w.bits(mode | EECR_EEMPE));
            (*p).eecr.modify(|r, w| w.bits(r.bits() | EECR_EEPE));
        });
    }
}

impl Default for Eeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorType for Eeprom {
    type Error = EepromError;
}

impl ReadNorFlash for Eeprom {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), EepromError> {
        Self::check(offset, bytes.len())?;
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = Self::read_byte(offset as u16 + i as u16);
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        EEPROM_SIZE
    }
}

impl NorFlash for Eeprom {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = 1;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), EepromError> {
        if from > to {
            return Err(EepromError::OutOfBounds);
        }
        Self::check(from, (to - from) as usize)?;
        for addr in from..to {
            // Skip cells that are already blank
            if Self::read_byte(addr as u16) != 0xFF {
                Self::program(addr as u16, 0xFF, EEPM_ERASE_ONLY);
            }
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), EepromError> {
        Self::check(offset, bytes.len())?;
        for (i, &byte) in bytes.iter().enumerate() {
            if byte != 0xFF {
                Self::program(offset as u16 + i as u16, byte, EEPM_WRITE_ONLY);
            }
        }
        Ok(())
    }
}
