//! Fault accounting
//!
//! Every fault is recovered locally or by a full reset; nothing here changes
//! behaviour. The counters exist so the serial log shows what happened.

use ufmt::derive::uDebug;

use crate::logger::{LogEvent, Logger};
use crate::protocol::BusFaults;

#[derive(Debug, Clone, Copy, PartialEq, Eq, uDebug)]
#[repr(u8)]
pub enum Fault {
    /// Unexpected bus vector; the slave was reset to idle
    ProtocolDesync = 0,
    /// Hang guard released an acknowledge line left held
    HangGuardRelease = 1,
    /// Battery stayed below critical for the full timeout
    CriticalBattery = 2,
    /// Invalid trigger byte or a write to a read-only slot
    MalformedCommand = 3,
    /// Write-back or reload failed in the storage backend
    StorageFailure = 4,
    /// Previous run ended in a watchdog reset
    WatchdogReset = 5,
}

impl Fault {
    pub const ALL: [Fault; 6] = [
        Fault::ProtocolDesync,
        Fault::HangGuardRelease,
        Fault::CriticalBattery,
        Fault::MalformedCommand,
        Fault::StorageFailure,
        Fault::WatchdogReset,
    ];
}

/// MCUSR watchdog reset flag
pub const RESET_CAUSE_WATCHDOG: u8 = 1 << 3;

pub struct Diagnostics {
    counts: [u16; 6],
}

impl Diagnostics {
    pub const fn new() -> Self {
        Self { counts: [0; 6] }
    }

    pub fn count(&self, fault: Fault) -> u16 {
        self.counts[fault as usize]
    }

    /// Adds `n` occurrences and logs the new total.
    pub fn report(&mut self, fault: Fault, n: u16, log: &mut Logger, ms: u32) {
        if n == 0 {
            return;
        }
        let slot = &mut self.counts[fault as usize];
        *slot = slot.saturating_add(n);
        log.record(
            ms,
            LogEvent::Fault {
                fault,
                count: *slot,
            },
        );
    }

    /// Folds the counters collected by the bus handlers.
    pub fn harvest(&mut self, faults: BusFaults, log: &mut Logger, ms: u32) {
        self.report(Fault::ProtocolDesync, faults.desyncs.into(), log, ms);
        self.report(Fault::HangGuardRelease, faults.guard_releases.into(), log, ms);
        self.report(Fault::MalformedCommand, faults.dropped_writes.into(), log, ms);
    }

    /// Inspects the reset cause captured at power-on.
    pub fn note_reset_cause(&mut self, cause: u8, log: &mut Logger) {
        if cause & RESET_CAUSE_WATCHDOG != 0 {
            self.report(Fault::WatchdogReset, 1, log, 0);
        }
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().map(|&c| c as u32).sum()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}
