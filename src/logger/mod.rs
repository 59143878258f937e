//! Event log
//!
//! The super-loop records compact events into a small ring; formatting only
//! happens when the ring is drained into a `ufmt` writer, normally the serial
//! console.

use ufmt::derive::uDebug;
use ufmt::{uWrite, uwriteln};

use crate::application::RunState;
use crate::config::LOG_CAPACITY;
use crate::diagnostics::Fault;

#[derive(Clone, Copy, PartialEq, Eq, Debug, uDebug)]
pub enum LogEvent {
    /// Controller started; `reset_cause` is the raw MCU status register
    Boot { reset_cause: u8 },
    /// Woke from deep sleep with these wake reason bits
    Wake { reasons: u8 },
    Transition { from: RunState, to: RunState },
    /// Power-on reason handed to the host
    PowerOn { reason: u8 },
    ShortPress,
    LongPress,
    CommitStarted,
    CommitRestarted,
    CommitFinished,
    Reloaded,
    StoreRejected { value: u8 },
    CriticalBatteryRaised { mv: u16 },
    CriticalBatteryCleared { mv: u16 },
    HostShutdown,
    ClockSet { time: u32 },
    AlarmArmed,
    AlarmDisarmed,
    CorrectionChanged { correction: i32 },
    Fault { fault: Fault, count: u16 },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, uDebug)]
pub struct LogRecord {
    pub ms: u32,
    pub event: LogEvent,
}

pub struct Logger {
    ring: [Option<LogRecord>; LOG_CAPACITY],
    head: usize,
    len: usize,
    dropped: u16,
}

impl Logger {
    pub const fn new() -> Self {
        Self {
            ring: [None; LOG_CAPACITY],
            head: 0,
            len: 0,
            dropped: 0,
        }
    }

    /// Appends a record, overwriting the oldest one when full.
    pub fn record(&mut self, ms: u32, event: LogEvent) {
        let tail = (self.head + self.len) % LOG_CAPACITY;
        self.ring[tail] = Some(LogRecord { ms, event });
        if self.len == LOG_CAPACITY {
            self.head = (self.head + 1) % LOG_CAPACITY;
            self.dropped = self.dropped.saturating_add(1);
        } else {
            self.len += 1;
        }
    }

    /// Oldest record.
    pub fn pop(&mut self) -> Option<LogRecord> {
        if self.len == 0 {
            return None;
        }
        let record = self.ring[self.head].take();
        self.head = (self.head + 1) % LOG_CAPACITY;
        self.len -= 1;
        record
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records lost to overflow since the last drain.
    pub fn dropped(&self) -> u16 {
        self.dropped
    }

    /// Writes every pending record, one per line, then the overflow count if
    /// anything was lost.
    pub fn drain<W: uWrite + ?Sized>(&mut self, out: &mut W) -> Result<(), W::Error> {
        while let Some(record) = self.pop() {
            uwriteln!(out, "{:?}", record)?;
        }
        if self.dropped > 0 {
            uwriteln!(out, "log: {} dropped", self.dropped)?;
            self.dropped = 0;
        }
        Ok(())
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}
