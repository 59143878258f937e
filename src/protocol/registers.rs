//! Control-region register map

use crate::config;

/// Bus address of control slot 0. Everything below is the persistent region.
pub const CONTROL_BASE: u16 = config::PERSISTENT_LEN as u16;
pub const SLOT_COUNT: usize = 32;
pub const SLOT_MASK: u16 = (SLOT_COUNT - 1) as u16;

/// First host-writable slot.
pub const READ_WRITE_START: u8 = 14;

/// Shutdown slot value requesting immediate power-off.
pub const SHUTDOWN_TRIGGER: u8 = 0x0F;

/// Store control slot values.
pub const STORE_IDLE: u8 = 0;
pub const STORE_BUSY: u8 = 1;
pub const STORE_COMMIT: u8 = b'W';
pub const STORE_RELOAD: u8 = b'R';

/// Slot indices. Multi-byte fields name their most significant byte.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Slot {
    Id = 0,
    Version = 1,
    Status = 2,
    Inputs = 3,
    UsbVoltage = 4,
    UsbCurrent = 6,
    BatteryVoltage = 8,
    LoadCurrent = 10,
    Temperature = 12,
    Brightness = 14,
    WakeEnable = 15,
    Shutdown = 16,
    ShortPress = 17,
    StoreControl = 18,
    Time = 19,
    Alarm = 23,
    Correction = 27,
}

impl Slot {
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn is_host_writable(index: u8) -> bool {
        index >= READ_WRITE_START
    }
}

/// Index of the byte whose host write commits a new time.
pub const TIME_COMMIT_INDEX: u8 = Slot::Time as u8 + 3;

macro_rules! bit_register {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr,)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
        pub struct $name(u8);

        impl $name {
            $($(#[$fmeta])* pub const $flag: Self = Self($bit);)*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn from_bits(bits: u8) -> Self {
                Self(bits)
            }

            pub const fn bits(self) -> u8 {
                self.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            pub fn set(&mut self, other: Self, on: bool) {
                if on {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

bit_register! {
    /// Status slot.
    Status {
        CRITICAL_BATTERY = 0x80,
        /// Set on a completed short press, cleared when the host reads it.
        SHORT_PRESS = 0x10,
    }
}

impl Status {
    const REASON_MASK: u8 = 0x07;

    pub fn power_on_reason(self) -> WakeReason {
        WakeReason(self.0 & Self::REASON_MASK)
    }

    pub fn set_power_on_reason(&mut self, reason: WakeReason) {
        self.0 = (self.0 & !Self::REASON_MASK) | (reason.0 & Self::REASON_MASK);
    }
}

bit_register! {
    /// Debounced digital-input snapshot. A set bit means the line is active.
    Inputs {
        CARD_PRESENT = 0x08,
        BUTTON_DOWN = 0x04,
        CHARGE_2 = 0x02,
        CHARGE_1 = 0x01,
    }
}

bit_register! {
    /// Conditions allowed to power the host from charge or sleep.
    WakeEnable {
        ALARM = 0x01,
        CHARGE_START = 0x02,
        CHARGE_DONE = 0x04,
    }
}

bit_register! {
    /// Why the host was powered. Also the power-on-reason field of [`Status`].
    WakeReason {
        BUTTON = 0x01,
        ALARM = 0x02,
        CHARGE = 0x04,
    }
}

/// The 32 control slots.
#[derive(Clone)]
pub struct ControlRegisters {
    slots: [u8; SLOT_COUNT],
}

impl ControlRegisters {
    /// Power-on contents.
    pub const fn new() -> Self {
        let mut slots = [0u8; SLOT_COUNT];
        slots[Slot::Id as usize] = config::FIRMWARE_ID;
        slots[Slot::Version as usize] = config::FIRMWARE_VERSION;
        slots[Slot::Brightness as usize] = config::BACKLIGHT_DEFAULT;
        slots[Slot::ShortPress as usize] = config::SHORT_PRESS_DEFAULT;
        Self { slots }
    }

    pub fn get(&self, slot: Slot) -> u8 {
        self.slots[slot.index()]
    }

    pub fn set(&mut self, slot: Slot, value: u8) {
        self.slots[slot.index()] = value;
    }

    pub fn get_u16(&self, slot: Slot) -> u16 {
        let i = slot.index();
        u16::from_be_bytes([self.slots[i], self.slots[i + 1]])
    }

    pub fn set_u16(&mut self, slot: Slot, value: u16) {
        let i = slot.index();
        self.slots[i..i + 2].copy_from_slice(&value.to_be_bytes());
    }

    pub fn get_u32(&self, slot: Slot) -> u32 {
        let i = slot.index();
        u32::from_be_bytes([
            self.slots[i],
            self.slots[i + 1],
            self.slots[i + 2],
            self.slots[i + 3],
        ])
    }

    pub fn set_u32(&mut self, slot: Slot, value: u32) {
        let i = slot.index();
        self.slots[i..i + 4].copy_from_slice(&value.to_be_bytes());
    }

    pub fn status(&self) -> Status {
        Status::from_bits(self.get(Slot::Status))
    }

    pub fn update_status(&mut self, f: impl FnOnce(&mut Status)) {
        let mut status = self.status();
        f(&mut status);
        self.set(Slot::Status, status.bits());
    }

    pub fn wake_enable(&self) -> WakeEnable {
        WakeEnable::from_bits(self.get(Slot::WakeEnable))
    }

    /// Host-side read of slot `index & 31`.
    ///
    /// Reading the status slot clears [`Status::SHORT_PRESS`]; the byte
    /// returned still carries the bit.
    pub fn host_read(&mut self, index: u8) -> u8 {
        let i = (index as u16 & SLOT_MASK) as usize;
        let value = self.slots[i];
        if i == Slot::Status.index() {
            self.slots[i] = value & !Status::SHORT_PRESS.bits();
        }
        value
    }

    /// Host-side write of slot `index & 31`. Returns false when the slot is
    /// system-owned and the write was dropped.
    pub fn host_write(&mut self, index: u8, value: u8) -> bool {
        let i = (index as u16 & SLOT_MASK) as u8;
        if !Slot::is_host_writable(i) {
            return false;
        }
        self.slots[i as usize] = value;
        true
    }
}

impl Default for ControlRegisters {
    fn default() -> Self {
        Self::new()
    }
}
