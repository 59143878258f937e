//! Register bus slave protocol
//!
//! The host addresses one 16-bit register space. Every write transaction
//! starts with the pointer (high byte, then low byte); further bytes are
//! stored at the pointer, which advances after each byte. Read transactions
//! return bytes from the pointer onward, so a write of just the pointer
//! followed by a repeated start and a read fetches any field.
//!
//! [`Transfer`] is the byte-level state machine. It is driven from the bus
//! interrupt by [`BusEvent`]s decoded by the hardware layer and answers with
//! the [`BusResponse`] the hardware should apply.

pub mod registers;

use crate::drivers::nvram::PersistentArray;
use crate::drivers::sampler::Measurements;
use registers::{ControlRegisters, Slot, CONTROL_BASE, TIME_COMMIT_INDEX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Vector that does not fit the current phase
    Desync,
    /// Another master won the bus
    ArbitrationLost,
}

pub type Result<T> = core::result::Result<T, ProtocolError>;

/// One decoded bus interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Own address matched after a start or repeated start
    Start { read: bool },
    /// Data byte from the master
    Received(u8),
    /// Data byte sent to the master
    Transmitted { acked: bool },
    /// Stop, or a repeated start about to be announced with `Start`
    Stop,
    ArbitrationLost,
    /// Any other hardware status code
    Unknown(u8),
}

/// What the hardware does before releasing the clock line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusResponse {
    /// Acknowledge the next received byte
    Ack,
    /// Load this byte for the master to read
    Transmit(u8),
    /// Nothing to send; keep listening for the own address
    Listen,
    /// Abandon the transaction and reset the peripheral
    Reset,
}

/// Protocol phase within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AddressHigh,
    AddressLow,
    Data,
}

/// Storage behind the bus pointer.
pub trait RegisterSpace {
    fn host_read(&mut self, pointer: u16) -> u8;
    fn host_write(&mut self, pointer: u16, value: u8);

    /// Called when a read transaction starts.
    fn snapshot(&mut self) {}
}

/// Hardware half of the bus lifecycle.
pub trait BusPort {
    /// Stop the protocol and guard interrupts and release the acknowledge line.
    fn suspend(&mut self);
    /// Reassert slave configuration and restart both interrupts.
    fn resume(&mut self);
    /// Disable the slave outright.
    fn shutdown(&mut self);
}

/// Transaction state of the slave.
#[derive(Debug, Clone)]
pub struct Transfer {
    phase: Phase,
    pointer: u16,
    in_transfer: bool,
}

impl Transfer {
    pub const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            pointer: 0,
            in_transfer: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pointer(&self) -> u16 {
        self.pointer
    }

    /// Set from own-address match until stop or reset. Multi-byte publishers
    /// wait on this.
    pub fn in_transfer(&self) -> bool {
        self.in_transfer
    }

    /// Drops any partial transaction. The pointer survives.
    pub fn abandon(&mut self) {
        self.phase = Phase::Idle;
        self.in_transfer = false;
    }

    /// Advances the state machine by one bus event.
    pub fn handle<S: RegisterSpace>(
        &mut self,
        event: BusEvent,
        space: &mut S,
    ) -> Result<BusResponse> {
        match event {
            BusEvent::Start { read: true } => {
                self.in_transfer = true;
                self.phase = Phase::Data;
                space.snapshot();
                Ok(BusResponse::Transmit(self.next_out(space)))
            }
            BusEvent::Start { read: false } => {
                self.in_transfer = true;
                self.phase = Phase::AddressHigh;
                Ok(BusResponse::Ack)
            }
            BusEvent::Received(byte) => match self.phase {
                Phase::AddressHigh => {
                    self.pointer = (byte as u16) << 8;
                    self.phase = Phase::AddressLow;
                    Ok(BusResponse::Ack)
                }
                Phase::AddressLow => {
                    self.pointer |= byte as u16;
                    self.phase = Phase::Data;
                    Ok(BusResponse::Ack)
                }
                Phase::Data => {
                    space.host_write(self.pointer, byte);
                    self.pointer = self.pointer.wrapping_add(1);
                    Ok(BusResponse::Ack)
                }
                Phase::Idle => {
                    self.abandon();
                    Err(ProtocolError::Desync)
                }
            },
            BusEvent::Transmitted { acked: true } => {
                if self.phase == Phase::Data {
                    Ok(BusResponse::Transmit(self.next_out(space)))
                } else {
                    self.abandon();
                    Err(ProtocolError::Desync)
                }
            }
            // Last byte of a read. The hardware reports no stop after this
            BusEvent::Transmitted { acked: false } => {
                self.abandon();
                Ok(BusResponse::Listen)
            }
            BusEvent::Stop => {
                self.abandon();
                Ok(BusResponse::Listen)
            }
            BusEvent::ArbitrationLost => {
                self.abandon();
                Err(ProtocolError::ArbitrationLost)
            }
            BusEvent::Unknown(_) => {
                self.abandon();
                Err(ProtocolError::Desync)
            }
        }
    }

    fn next_out<S: RegisterSpace>(&mut self, space: &mut S) -> u8 {
        let byte = space.host_read(self.pointer);
        self.pointer = self.pointer.wrapping_add(1);
        byte
    }
}

impl Default for Transfer {
    fn default() -> Self {
        Self::new()
    }
}

/// Saturating counters for faults raised inside the bus handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusFaults {
    pub desyncs: u8,
    pub guard_releases: u8,
    pub dropped_writes: u8,
}

impl BusFaults {
    pub const fn new() -> Self {
        Self {
            desyncs: 0,
            guard_releases: 0,
            dropped_writes: 0,
        }
    }

    /// Returns the counts and zeroes them.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }
}

/// Bus-owned shared state: control slots plus transaction state.
pub struct BusShared {
    pub regs: ControlRegisters,
    pub transfer: Transfer,
    time_commit: bool,
    held_idle: bool,
    pub faults: BusFaults,
}

impl BusShared {
    pub const fn new() -> Self {
        Self {
            regs: ControlRegisters::new(),
            transfer: Transfer::new(),
            time_commit: false,
            held_idle: false,
            faults: BusFaults::new(),
        }
    }

    /// Consumes a pending host time commit.
    pub fn take_time_commit(&mut self) -> bool {
        core::mem::replace(&mut self.time_commit, false)
    }

    /// Runs one event against the full register space.
    pub fn on_event(
        &mut self,
        event: BusEvent,
        persistent: &mut PersistentArray,
        measurements: &Measurements,
    ) -> BusResponse {
        let mut view = BusView {
            regs: &mut self.regs,
            time_commit: &mut self.time_commit,
            dropped: &mut self.faults.dropped_writes,
            persistent,
            measurements,
        };
        match self.transfer.handle(event, &mut view) {
            Ok(response) => response,
            Err(_) => {
                self.faults.desyncs = self.faults.desyncs.saturating_add(1);
                BusResponse::Reset
            }
        }
    }

    /// Hang-guard period elapsed; `held` says the peripheral is stretching
    /// the clock. Returns true when the line must be released: held with no
    /// transfer open on two guard periods in a row. A single sighting may be
    /// a bus interrupt that has not been serviced yet.
    pub fn on_guard_tick(&mut self, held: bool) -> bool {
        if !held || self.transfer.in_transfer() {
            self.held_idle = false;
            return false;
        }
        if !self.held_idle {
            self.held_idle = true;
            return false;
        }
        self.held_idle = false;
        self.faults.guard_releases = self.faults.guard_releases.saturating_add(1);
        true
    }

    /// Protocol half of suspend, resume and shutdown.
    pub fn clear_transfer(&mut self) {
        self.transfer.abandon();
    }
}

impl Default for BusShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Address decoding for one bus event.
struct BusView<'a> {
    regs: &'a mut ControlRegisters,
    time_commit: &'a mut bool,
    dropped: &'a mut u8,
    persistent: &'a mut PersistentArray,
    measurements: &'a Measurements,
}

impl RegisterSpace for BusView<'_> {
    fn host_read(&mut self, pointer: u16) -> u8 {
        if pointer < CONTROL_BASE {
            self.persistent.read(pointer)
        } else {
            self.regs.host_read(pointer as u8)
        }
    }

    fn host_write(&mut self, pointer: u16, value: u8) {
        if pointer < CONTROL_BASE {
            self.persistent.write(pointer, value);
            return;
        }
        let index = (pointer & registers::SLOT_MASK) as u8;
        if !self.regs.host_write(index, value) {
            *self.dropped = self.dropped.saturating_add(1);
        } else if index == TIME_COMMIT_INDEX {
            *self.time_commit = true;
        }
    }

    fn snapshot(&mut self) {
        self.measurements.publish(self.regs);
    }
}

#[cfg(test)]
mod tests {
    use super::registers::{Status, READ_WRITE_START};
    use super::*;
    use crate::drivers::sampler::Measurement;

    struct Host {
        bus: BusShared,
        persistent: PersistentArray,
        measurements: Measurements,
    }

    impl Host {
        fn new() -> Self {
            Self {
                bus: BusShared::new(),
                persistent: PersistentArray::new(),
                measurements: Measurements::new(),
            }
        }

        fn event(&mut self, event: BusEvent) -> BusResponse {
            self.bus
                .on_event(event, &mut self.persistent, &self.measurements)
        }

        fn write(&mut self, pointer: u16, data: &[u8]) {
            assert_eq!(self.event(BusEvent::Start { read: false }), BusResponse::Ack);
            self.event(BusEvent::Received((pointer >> 8) as u8));
            self.event(BusEvent::Received(pointer as u8));
            for &b in data {
                assert_eq!(self.event(BusEvent::Received(b)), BusResponse::Ack);
            }
            self.event(BusEvent::Stop);
        }

        fn read(&mut self, pointer: u16, out: &mut [u8]) {
            self.event(BusEvent::Start { read: false });
            self.event(BusEvent::Received((pointer >> 8) as u8));
            self.event(BusEvent::Received(pointer as u8));
            self.event(BusEvent::Stop);
            self.read_on(out);
        }

        fn read_on(&mut self, out: &mut [u8]) {
            let mut response = self.event(BusEvent::Start { read: true });
            let len = out.len();
            for (i, slot) in out.iter_mut().enumerate() {
                match response {
                    BusResponse::Transmit(b) => *slot = b,
                    other => panic!("expected data, got {:?}", other),
                }
                let last = i + 1 == len;
                response = self.event(BusEvent::Transmitted { acked: !last });
            }
            self.event(BusEvent::Stop);
        }
    }

    #[test]
    fn write_then_read_persistent_bytes() {
        let mut host = Host::new();
        host.write(0x0100, &[1, 2, 3]);
        let mut out = [0u8; 3];
        host.read(0x0100, &mut out);
        assert_eq!(out, [1, 2, 3]);
        assert!(!host.bus.transfer.in_transfer());
    }

    #[test]
    fn last_persistent_byte_and_first_slot() {
        let mut host = Host::new();
        host.write(4095, &[0x5A]);
        assert_eq!(host.persistent.read(4095), 0x5A);
        let mut out = [0u8; 2];
        host.read(4095, &mut out);
        assert_eq!(out, [0x5A, crate::config::FIRMWARE_ID]);
    }

    #[test]
    fn control_pointer_wraps_modulo_32() {
        let mut host = Host::new();
        let mut out = [0u8; 1];
        host.read(CONTROL_BASE + 64 + 1, &mut out);
        assert_eq!(out[0], crate::config::FIRMWARE_VERSION);
    }

    #[test]
    fn read_only_write_is_dropped_and_counted() {
        let mut host = Host::new();
        host.write(CONTROL_BASE, &[0x77]);
        assert_eq!(host.bus.regs.get(Slot::Id), crate::config::FIRMWARE_ID);
        assert_eq!(host.bus.faults.dropped_writes, 1);
    }

    #[test]
    fn every_writable_slot_reads_back() {
        let mut host = Host::new();
        for index in READ_WRITE_START..31 {
            let value = index.wrapping_mul(7);
            host.write(CONTROL_BASE + index as u16, &[value]);
            let mut out = [0u8];
            host.read(CONTROL_BASE + index as u16, &mut out);
            assert_eq!(out[0], value);
        }
    }

    #[test]
    fn time_commit_fires_on_low_byte_only() {
        let mut host = Host::new();
        host.write(CONTROL_BASE + Slot::Time as u16, &[0, 0, 1]);
        assert!(!host.bus.take_time_commit());
        host.write(CONTROL_BASE + Slot::Time as u16, &[0, 0, 1, 0]);
        assert!(host.bus.take_time_commit());
        assert!(!host.bus.take_time_commit());
        assert_eq!(host.bus.regs.get_u32(Slot::Time), 0x100);
    }

    #[test]
    fn status_read_clears_short_press() {
        let mut host = Host::new();
        host.bus.regs.update_status(|s| s.insert(Status::SHORT_PRESS));
        let mut out = [0u8];
        host.read(CONTROL_BASE + Slot::Status as u16, &mut out);
        assert_eq!(out[0] & Status::SHORT_PRESS.bits(), Status::SHORT_PRESS.bits());
        host.read(CONTROL_BASE + Slot::Status as u16, &mut out);
        assert_eq!(out[0] & Status::SHORT_PRESS.bits(), 0);
    }

    #[test]
    fn plain_read_continues_from_pointer() {
        let mut host = Host::new();
        host.write(0x0010, &[9, 8, 7, 6]);
        let mut first = [0u8; 2];
        host.read(0x0010, &mut first);
        let mut rest = [0u8; 2];
        host.read_on(&mut rest);
        assert_eq!(first, [9, 8]);
        assert_eq!(rest, [7, 6]);
    }

    #[test]
    fn repeated_start_reads_without_stop() {
        let mut host = Host::new();
        host.write(0x0020, &[0xAB]);
        host.event(BusEvent::Start { read: false });
        host.event(BusEvent::Received(0x00));
        host.event(BusEvent::Received(0x20));
        // Hardware reports the repeated start as a stop before the new address
        host.event(BusEvent::Stop);
        assert_eq!(
            host.event(BusEvent::Start { read: true }),
            BusResponse::Transmit(0xAB)
        );
    }

    #[test]
    fn snapshot_taken_at_read_start() {
        let mut host = Host::new();
        host.measurements.set(Measurement::BatteryVoltage, 0x0DAC);
        host.event(BusEvent::Start { read: false });
        host.event(BusEvent::Received(0x10));
        host.event(BusEvent::Received(Slot::BatteryVoltage as u8));
        host.event(BusEvent::Stop);

        let hi = host.event(BusEvent::Start { read: true });
        // Sampler publishes mid-transfer
        host.measurements.set(Measurement::BatteryVoltage, 0x0E01);
        let lo = host.event(BusEvent::Transmitted { acked: true });
        assert_eq!(hi, BusResponse::Transmit(0x0D));
        assert_eq!(lo, BusResponse::Transmit(0xAC));
        host.event(BusEvent::Transmitted { acked: false });
        host.event(BusEvent::Stop);

        let mut out = [0u8; 2];
        host.read(CONTROL_BASE + Slot::BatteryVoltage as u16, &mut out);
        assert_eq!(u16::from_be_bytes(out), 0x0E01);
    }

    #[test]
    fn final_nack_closes_read_without_stop() {
        let mut host = Host::new();
        host.event(BusEvent::Start { read: true });
        assert!(host.bus.transfer.in_transfer());
        assert_eq!(
            host.event(BusEvent::Transmitted { acked: false }),
            BusResponse::Listen
        );
        assert!(!host.bus.transfer.in_transfer());
        assert_eq!(host.bus.transfer.pointer(), 1);
    }

    #[test]
    fn unexpected_vector_resets_to_idle() {
        let mut host = Host::new();
        host.event(BusEvent::Start { read: false });
        host.event(BusEvent::Received(0x00));
        assert!(host.bus.transfer.in_transfer());
        assert_eq!(host.event(BusEvent::Unknown(0x00)), BusResponse::Reset);
        assert_eq!(host.bus.transfer.phase(), Phase::Idle);
        assert!(!host.bus.transfer.in_transfer());
        assert_eq!(host.bus.faults.desyncs, 1);

        host.event(BusEvent::Start { read: false });
        assert_eq!(host.event(BusEvent::ArbitrationLost), BusResponse::Reset);
        assert_eq!(host.bus.faults.take().desyncs, 2);
        assert_eq!(host.bus.faults.desyncs, 0);
    }

    #[test]
    fn data_without_start_is_desync() {
        let mut host = Host::new();
        assert_eq!(host.event(BusEvent::Received(1)), BusResponse::Reset);
        assert_eq!(
            host.event(BusEvent::Transmitted { acked: true }),
            BusResponse::Reset
        );
    }

    #[test]
    fn guard_releases_only_when_idle() {
        let mut host = Host::new();
        assert!(!host.bus.on_guard_tick(false));
        assert!(!host.bus.on_guard_tick(false));

        host.event(BusEvent::Start { read: false });
        assert!(!host.bus.on_guard_tick(true));
        assert!(!host.bus.on_guard_tick(true));

        host.event(BusEvent::Stop);
        assert!(!host.bus.on_guard_tick(true));
        assert!(host.bus.on_guard_tick(true));
        assert_eq!(host.bus.faults.take().guard_releases, 1);
    }

    #[test]
    fn guard_ignores_a_single_held_sighting() {
        let mut host = Host::new();
        assert!(!host.bus.on_guard_tick(true));
        assert!(!host.bus.on_guard_tick(false));
        assert!(!host.bus.on_guard_tick(true));
        assert_eq!(host.bus.faults.take().guard_releases, 0);
    }

    #[test]
    fn clear_transfer_keeps_pointer() {
        let mut host = Host::new();
        host.event(BusEvent::Start { read: false });
        host.event(BusEvent::Received(0x02));
        host.event(BusEvent::Received(0x00));
        host.bus.clear_transfer();
        assert!(!host.bus.transfer.in_transfer());
        assert_eq!(host.bus.transfer.pointer(), 0x0200);
    }
}
