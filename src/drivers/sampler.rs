//! Analog sampler: filtered supply measurements and averaged temperature
//!
//! A timer triggers one conversion at a time. The conversion-complete
//! handler feeds the result to [`Sampler::on_conversion`], which filters it,
//! publishes the calibrated value into [`Measurements`] and picks the next
//! input. The sample timer sweeps its period with [`Jitter`] so sampling
//! does not lock onto the switching ripple of the charger.

use crate::config::{
    CURRENT_FILTER_SHIFT, CURRENT_FULL_SCALE_MA, JITTER_MAX, JITTER_MIN, JITTER_START,
    TEMPERATURE_DEPTH, TEMPERATURE_PERIOD, TEMPERATURE_SCALE_DEN, TEMPERATURE_SCALE_NUM,
    TEMPERATURE_ZERO_COUNTS, VOLTAGE_FILTER_SHIFT, VOLTAGE_FULL_SCALE_MV,
};
use crate::protocol::registers::{ControlRegisters, Slot};

/// Converter inputs in sampling order; temperature is the occasional detour.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Channel {
    UsbVoltage = 0,
    UsbCurrent = 1,
    BatteryVoltage = 2,
    LoadCurrent = 3,
    Temperature = 4,
}

impl Channel {
    const ROTATION: [Channel; 4] = [
        Channel::UsbVoltage,
        Channel::UsbCurrent,
        Channel::BatteryVoltage,
        Channel::LoadCurrent,
    ];
}

/// Published quantities.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Measurement {
    UsbVoltage = 0,
    UsbCurrent = 1,
    BatteryVoltage = 2,
    LoadCurrent = 3,
    /// Tenths of a degree C, two's complement
    Temperature = 4,
}

impl Measurement {
    const ALL: [Measurement; 5] = [
        Measurement::UsbVoltage,
        Measurement::UsbCurrent,
        Measurement::BatteryVoltage,
        Measurement::LoadCurrent,
        Measurement::Temperature,
    ];

    pub fn slot(self) -> Slot {
        match self {
            Measurement::UsbVoltage => Slot::UsbVoltage,
            Measurement::UsbCurrent => Slot::UsbCurrent,
            Measurement::BatteryVoltage => Slot::BatteryVoltage,
            Measurement::LoadCurrent => Slot::LoadCurrent,
            Measurement::Temperature => Slot::Temperature,
        }
    }
}

/// Latest calibrated values, copied into the register slots when a host
/// read starts.
#[derive(Clone, Debug)]
pub struct Measurements {
    values: [u16; 5],
}

impl Measurements {
    pub const fn new() -> Self {
        Self { values: [0; 5] }
    }

    pub fn get(&self, m: Measurement) -> u16 {
        self.values[m as usize]
    }

    pub fn set(&mut self, m: Measurement, value: u16) {
        self.values[m as usize] = value;
    }

    pub fn battery_mv(&self) -> u16 {
        self.get(Measurement::BatteryVoltage)
    }

    pub fn temperature(&self) -> i16 {
        self.get(Measurement::Temperature) as i16
    }

    pub fn publish(&self, regs: &mut ControlRegisters) {
        for m in Measurement::ALL {
            regs.set_u16(m.slot(), self.get(m));
        }
    }
}

impl Default for Measurements {
    fn default() -> Self {
        Self::new()
    }
}

/// Converter count to calibrated units, rounded to nearest.
#[derive(Clone, Copy, Debug)]
pub struct Calibration {
    full_scale: u32,
}

impl Calibration {
    pub const VOLTAGE: Self = Self {
        full_scale: VOLTAGE_FULL_SCALE_MV,
    };
    pub const CURRENT: Self = Self {
        full_scale: CURRENT_FULL_SCALE_MA,
    };

    pub const fn lookup(self, count: u16) -> u16 {
        let count = if count > 1023 { 1023 } else { count as u32 };
        ((count * self.full_scale + 511) / 1023) as u16
    }
}

/// Tenths of a degree C from an averaged sensor count.
pub fn temperature_tenths(counts: u16, offset: i16) -> i16 {
    let t = counts as i32 - TEMPERATURE_ZERO_COUNTS - offset as i32;
    (t * TEMPERATURE_SCALE_NUM / TEMPERATURE_SCALE_DEN) as i16
}

/// Sample timer compare value, swept up and down one step per sample.
#[derive(Clone, Debug)]
pub struct Jitter {
    reload: u8,
    rising: bool,
}

impl Jitter {
    pub const fn new() -> Self {
        Self {
            reload: JITTER_START,
            rising: true,
        }
    }

    pub fn next(&mut self) -> u8 {
        if self.rising {
            self.reload += 1;
            if self.reload == JITTER_MAX {
                self.rising = false;
            }
        } else {
            self.reload -= 1;
            if self.reload == JITTER_MIN {
                self.rising = true;
            }
        }
        self.reload
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
struct TemperatureAverage {
    ring: [u16; TEMPERATURE_DEPTH],
    index: usize,
}

impl TemperatureAverage {
    const fn new() -> Self {
        Self {
            ring: [0; TEMPERATURE_DEPTH],
            index: 0,
        }
    }

    fn push(&mut self, count: u16) -> u16 {
        self.ring[self.index] = count;
        self.index = (self.index + 1) % TEMPERATURE_DEPTH;
        let sum: u16 = self.ring.iter().sum();
        (sum + (TEMPERATURE_DEPTH as u16 / 2)) / TEMPERATURE_DEPTH as u16
    }
}

/// Conversion bookkeeping owned by the conversion-complete handler.
#[derive(Clone, Debug)]
pub struct Sampler {
    sums: [u32; 4],
    index: usize,
    detour: bool,
    until_temperature: u16,
    temperature: TemperatureAverage,
    temperature_offset: i16,
}

impl Sampler {
    pub const fn new() -> Self {
        Self {
            sums: [0; 4],
            index: 0,
            detour: false,
            until_temperature: TEMPERATURE_PERIOD,
            temperature: TemperatureAverage::new(),
            temperature_offset: 0,
        }
    }

    const fn shift(index: usize) -> u8 {
        // Even inputs are voltages, odd are currents
        if index & 1 == 0 {
            VOLTAGE_FILTER_SHIFT
        } else {
            CURRENT_FILTER_SHIFT
        }
    }

    fn calibrate(index: usize, count: u16) -> u16 {
        if index & 1 == 0 {
            Calibration::VOLTAGE.lookup(count)
        } else {
            Calibration::CURRENT.lookup(count)
        }
    }

    /// Primes every filter from one blocking reading per input and returns
    /// the input the first triggered conversion must use.
    pub fn seed(
        &mut self,
        temperature_offset: i16,
        out: &mut Measurements,
        mut read: impl FnMut(Channel) -> u16,
    ) -> Channel {
        *self = Self::new();
        self.temperature_offset = temperature_offset;
        for (i, channel) in Channel::ROTATION.into_iter().enumerate() {
            let count = read(channel);
            self.sums[i] = (count as u32) << Self::shift(i);
            out.set(Measurement::ALL[i], Self::calibrate(i, count));
        }
        let count = read(Channel::Temperature);
        self.temperature.ring = [count; TEMPERATURE_DEPTH];
        let t = temperature_tenths(self.temperature.push(count), temperature_offset);
        out.set(Measurement::Temperature, t as u16);
        Channel::ROTATION[0]
    }

    /// Input of the conversion in flight.
    pub fn current(&self) -> Channel {
        if self.detour {
            Channel::Temperature
        } else {
            Channel::ROTATION[self.index]
        }
    }

    /// Consumes one finished conversion and returns the next input.
    pub fn on_conversion(&mut self, count: u16, out: &mut Measurements) -> Channel {
        if self.detour {
            let avg = self.temperature.push(count);
            let t = temperature_tenths(avg, self.temperature_offset);
            out.set(Measurement::Temperature, t as u16);
            self.detour = false;
            return self.current();
        }

        let i = self.index;
        let k = Self::shift(i);
        self.sums[i] = self.sums[i] - (self.sums[i] >> k) + count as u32;
        let filtered = (self.sums[i] >> k) as u16;
        out.set(Measurement::ALL[i], Self::calibrate(i, filtered));

        self.index = (i + 1) % Channel::ROTATION.len();
        self.until_temperature -= 1;
        if self.until_temperature == 0 {
            self.until_temperature = TEMPERATURE_PERIOD;
            self.detour = true;
        }
        self.current()
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}
