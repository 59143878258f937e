//! Configuration constants for the power-management controller

/// CPU frequency in Hz (internal RC oscillator)
pub const CPU_FREQ_HZ: u32 = 8_000_000;

/// Serial console baud rate
pub const UART_BAUD: u32 = 38_400;

/// Identity register contents
pub const FIRMWARE_ID: u8 = 1;

/// Version register contents, major in the high nibble
pub const FIRMWARE_VERSION: u8 = (1 << 4) | 1;

/// 7-bit register bus address
pub const BUS_ADDRESS: u8 = 0x12;

/// Battery must read at least this to power the host
pub const BATTERY_TURN_ON_MV: u16 = 3500;

/// Below this the critical-battery timer runs
pub const BATTERY_CRITICAL_MV: u16 = 3300;

/// Run evaluations (one per ms) spent below critical before forced shutdown
pub const CRITICAL_TIMEOUT_EVALS: u16 = 10_000;

/// Digital input evaluation period in milliseconds
pub const IO_EVAL_MS: u8 = 10;

/// Indicator animation period in milliseconds
pub const INDICATOR_EVAL_MS: u8 = 10;

pub const SHORT_PRESS_MS: u16 = 100;
pub const LONG_PRESS_MS: u16 = 5000;

/// Default short-press threshold in units of [`IO_EVAL_MS`]
pub const SHORT_PRESS_DEFAULT: u8 = (SHORT_PRESS_MS / IO_EVAL_MS as u16) as u8;

/// Long-press threshold in units of [`IO_EVAL_MS`]
pub const LONG_PRESS_EVALS: u16 = LONG_PRESS_MS / IO_EVAL_MS as u16;

pub const BACKLIGHT_DEFAULT: u8 = 128;

/// Status indicator while the charger reports a fault: blink at this level
pub const STATUS_BLINK_LEVEL: u8 = 192;
/// Indicator evaluations per blink half-period
pub const STATUS_BLINK_EVALS: u8 = 20;
/// Status indicator level once charging completes
pub const STATUS_COMPLETE_LEVEL: u8 = 128;
/// Charging pulse: peak level, step per evaluation and steps per half
pub const STATUS_PULSE_PEAK: u8 = 250;
pub const STATUS_PULSE_STEP: u8 = 2;
pub const STATUS_PULSE_STEPS: u8 = 120;

/// Bytes in the bus-addressable persistent region
pub const PERSISTENT_LEN: usize = 4096;

/// Leading bytes of the persistent region mirrored to EEPROM
pub const MIRRORED_LEN: usize = 1024;

/// Bytes written back per store evaluation. A pass erases and programs its
/// batch with blocking EEPROM cycles (up to about 30 ms), so the decimated
/// I/O and indicator phases run late while a commit is in flight.
pub const WRITE_BACK_BATCH: usize = 8;

/// Scheduler tick period in microseconds
pub const TICK_US: u16 = 200;

/// Ticks (and so phases) per millisecond
pub const PHASES_PER_MS: u8 = (1000 / TICK_US) as u8;

pub const VOLTAGE_FILTER_SHIFT: u8 = 5;
pub const CURRENT_FILTER_SHIFT: u8 = 8;

/// Depth of the temperature averaging ring
pub const TEMPERATURE_DEPTH: usize = 8;

/// Regular conversions between temperature detours
pub const TEMPERATURE_PERIOD: u16 = 2000;

/// Sample timer compare values swept back and forth to spread sampling
pub const JITTER_START: u8 = 0x80;
pub const JITTER_MIN: u8 = 0x77;
pub const JITTER_MAX: u8 = 0x88;

/// Millivolts at full-scale conversion (1023) after the input divider
pub const VOLTAGE_FULL_SCALE_MV: u32 = 6275;

/// Milliamps at full-scale conversion after the sense amplifier
pub const CURRENT_FULL_SCALE_MA: u32 = 1250;

/// Temperature sensor reading at 0 C
pub const TEMPERATURE_ZERO_COUNTS: i32 = 769;

/// Temperature slope: counts * NUM / DEN gives tenths of a degree
pub const TEMPERATURE_SCALE_NUM: i32 = 125_000;
pub const TEMPERATURE_SCALE_DEN: i32 = 34_782;

/// EEPROM location of the factory temperature offset (little-endian i16)
pub const TEMPERATURE_CAL_ADDR: u16 = 0x0FFE;

/// Watchdog timeout period in milliseconds
pub const WATCHDOG_TIMEOUT_MS: u16 = 2000;

/// Event log records held before the oldest is dropped
pub const LOG_CAPACITY: usize = 16;
