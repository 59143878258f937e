//! Line-oriented debug console over any byte-wide serial transmitter

use embedded_hal::serial::Write;

pub struct SerialConsole<S> {
    serial: S,
}

impl<S: Write<u8>> SerialConsole<S> {
    pub fn new(serial: S) -> Self {
        Self { serial }
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<(), S::Error> {
        nb::block!(self.serial.write(byte))
    }

    pub fn write_str(&mut self, s: &str) -> Result<(), S::Error> {
        for byte in s.bytes() {
            self.write_byte(byte)?;
        }
        Ok(())
    }

    pub fn write_line(&mut self, s: &str) -> Result<(), S::Error> {
        self.write_str(s)?;
        self.write_str("\r\n")
    }

    /// Waits for the transmitter to drain.
    pub fn flush(&mut self) -> Result<(), S::Error> {
        nb::block!(self.serial.flush())
    }

    pub fn release(self) -> S {
        self.serial
    }
}

impl<S: Write<u8>> ufmt::uWrite for SerialConsole<S> {
    type Error = S::Error;

    fn write_str(&mut self, s: &str) -> Result<(), S::Error> {
        // ufmt terminates lines with a bare LF
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r')?;
            }
            self.write_byte(byte)?;
        }
        Ok(())
    }
}
