//! Persistent region and its EEPROM write-back
//!
//! The host sees a 4 KiB byte array. The first 1 KiB is mirrored to
//! non-volatile storage when the host writes the commit sentinel into the
//! store control slot, and copied back on the reload sentinel. Commit runs a
//! small batch per scheduler pass so the loop never stalls on the storage.

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

use crate::config::{MIRRORED_LEN, PERSISTENT_LEN, TEMPERATURE_CAL_ADDR, WRITE_BACK_BATCH};
use crate::protocol::registers::{Slot, STORE_BUSY, STORE_COMMIT, STORE_IDLE, STORE_RELOAD};
use crate::shared::SharedState;
use crate::sync::IrqControl;

const ADDR_MASK: u16 = (PERSISTENT_LEN - 1) as u16;

/// Bytes copied per masked section during reload.
const RELOAD_CHUNK: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    Backend(NorFlashErrorKind),
}

pub type Result<T> = core::result::Result<T, StoreError>;

fn backend<E: NorFlashError>(e: E) -> StoreError {
    StoreError::Backend(e.kind())
}

/// The bus-addressable persistent array.
pub struct PersistentArray {
    bytes: [u8; PERSISTENT_LEN],
}

impl PersistentArray {
    pub const fn new() -> Self {
        Self {
            bytes: [0; PERSISTENT_LEN],
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        self.bytes[(addr & ADDR_MASK) as usize]
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        self.bytes[(addr & ADDR_MASK) as usize] = value;
    }

    pub fn mirrored(&self) -> &[u8] {
        &self.bytes[..MIRRORED_LEN]
    }

    pub fn mirrored_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..MIRRORED_LEN]
    }
}

impl Default for PersistentArray {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress reported by [`PersistentStore::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    CommitStarted,
    /// Commit sentinel written again while busy
    CommitRestarted,
    CommitFinished,
    Reloaded,
    /// Unknown control value reset to idle
    Rejected(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transaction {
    Idle,
    Writing { next: usize },
}

/// Write-back engine over a NOR-flash style backend.
pub struct PersistentStore<F> {
    flash: F,
    state: Transaction,
}

impl<F: NorFlash> PersistentStore<F> {
    pub fn new(flash: F) -> Self {
        Self {
            flash,
            state: Transaction::Idle,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state != Transaction::Idle
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// True when each batch covers whole erase units, so a pass can erase
    /// exactly what it is about to write.
    fn erase_per_batch() -> bool {
        WRITE_BACK_BATCH % F::ERASE_SIZE.max(1) == 0
    }

    /// One scheduler pass of the store.
    pub fn evaluate<C: IrqControl>(
        &mut self,
        shared: &SharedState,
        ctl: &C,
    ) -> Result<Option<StoreEvent>> {
        let request = shared.registers(ctl, |regs| regs.get(Slot::StoreControl));

        match self.state {
            Transaction::Idle => match request {
                STORE_IDLE => Ok(None),
                STORE_COMMIT => {
                    self.start_commit(shared, ctl)?;
                    Ok(Some(StoreEvent::CommitStarted))
                }
                STORE_RELOAD => {
                    let result = self.reload(shared, ctl);
                    self.set_control(shared, ctl, STORE_IDLE);
                    result.map(|_| Some(StoreEvent::Reloaded))
                }
                other => {
                    self.set_control(shared, ctl, STORE_IDLE);
                    Ok(Some(StoreEvent::Rejected(other)))
                }
            },
            _ if request == STORE_COMMIT => {
                self.start_commit(shared, ctl)?;
                Ok(Some(StoreEvent::CommitRestarted))
            }
            busy => {
                if request != STORE_BUSY {
                    self.set_control(shared, ctl, STORE_BUSY);
                }
                match self.step(busy, shared, ctl) {
                    Ok(finished) => Ok(finished.then_some(StoreEvent::CommitFinished)),
                    Err(e) => {
                        self.abort(shared, ctl);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Erases up front when the erase unit is larger than a batch, then
    /// writes the first batch.
    fn start_commit<C: IrqControl>(&mut self, shared: &SharedState, ctl: &C) -> Result<()> {
        self.set_control(shared, ctl, STORE_BUSY);
        self.state = Transaction::Writing { next: 0 };
        let result = if Self::erase_per_batch() {
            Ok(())
        } else {
            let unit = F::ERASE_SIZE.max(1);
            let end = MIRRORED_LEN.div_ceil(unit) * unit;
            self.flash.erase(0, end as u32).map_err(backend)
        };
        match result.and_then(|_| self.step(self.state, shared, ctl)) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.abort(shared, ctl);
                Err(e)
            }
        }
    }

    /// Advances the transaction by one batch. Returns true when the mirrored
    /// region is fully written.
    fn step<C: IrqControl>(
        &mut self,
        state: Transaction,
        shared: &SharedState,
        ctl: &C,
    ) -> Result<bool> {
        match state {
            Transaction::Idle => Ok(false),
            Transaction::Writing { next } => {
                let end = (next + WRITE_BACK_BATCH).min(MIRRORED_LEN);
                if Self::erase_per_batch() {
                    self.flash.erase(next as u32, end as u32).map_err(backend)?;
                }
                let mut batch = [0u8; WRITE_BACK_BATCH];
                let batch = &mut batch[..end - next];
                shared
                    .persistent
                    .masked(ctl, |array| batch.copy_from_slice(&array.mirrored()[next..end]));
                self.flash.write(next as u32, batch).map_err(backend)?;
                if end == MIRRORED_LEN {
                    self.state = Transaction::Idle;
                    self.set_control(shared, ctl, STORE_IDLE);
                    Ok(true)
                } else {
                    self.state = Transaction::Writing { next: end };
                    Ok(false)
                }
            }
        }
    }

    /// Copies the mirrored slice back from storage.
    pub fn reload<C: IrqControl>(&mut self, shared: &SharedState, ctl: &C) -> Result<()> {
        let mut chunk = [0u8; RELOAD_CHUNK];
        for start in (0..MIRRORED_LEN).step_by(RELOAD_CHUNK) {
            let end = (start + RELOAD_CHUNK).min(MIRRORED_LEN);
            let chunk = &mut chunk[..end - start];
            self.flash.read(start as u32, chunk).map_err(backend)?;
            shared
                .persistent
                .masked(ctl, |array| array.mirrored_mut()[start..end].copy_from_slice(chunk));
        }
        Ok(())
    }

    /// Factory temperature offset kept past the mirrored slice. An erased
    /// cell means no offset.
    pub fn temperature_offset(&mut self) -> Result<i16> {
        let mut raw = [0u8; 2];
        self.flash
            .read(TEMPERATURE_CAL_ADDR as u32, &mut raw)
            .map_err(backend)?;
        Ok(match u16::from_le_bytes(raw) {
            0xFFFF => 0,
            offset => offset as i16,
        })
    }

    fn abort<C: IrqControl>(&mut self, shared: &SharedState, ctl: &C) {
        self.state = Transaction::Idle;
        self.set_control(shared, ctl, STORE_IDLE);
    }

    fn set_control<C: IrqControl>(&self, shared: &SharedState, ctl: &C, value: u8) {
        shared.registers(ctl, |regs| regs.set(Slot::StoreControl, value));
    }
}
