//! Host-side board for driving the supervisor and the interrupt entry
//! points together.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_hal::watchdog::{Watchdog, WatchdogDisable, WatchdogEnable};
use embedded_hal::PwmPin;
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

use pmc_firmware::application::Converter;
use pmc_firmware::drivers::sampler::{Channel, Measurement};
use pmc_firmware::protocol::registers::WakeReason;
use pmc_firmware::protocol::{BusEvent, BusPort, BusResponse};
use pmc_firmware::sync::{Irq, IrqControl, IrqSet, IsrCtx};
use pmc_firmware::{Board, Parts, RunState, SharedState, Supervisor};

/// Tracks per-source enable bits like the real peripheral registers.
pub struct FakeIrq {
    enabled: Cell<u8>,
}

impl FakeIrq {
    pub fn new() -> Self {
        Self {
            enabled: Cell::new(0x3F),
        }
    }
}

unsafe impl IrqControl for FakeIrq {
    fn mask(&self, set: IrqSet) -> IrqSet {
        let was = set
            .iter()
            .filter(|irq| self.enabled.get() & IrqSet::of(*irq).bits() != 0)
            .fold(IrqSet::EMPTY, IrqSet::with);
        self.enabled.set(self.enabled.get() & !set.bits());
        was
    }

    fn unmask(&self, set: IrqSet) {
        self.enabled.set(self.enabled.get() | set.bits());
    }
}

/// Active-low input line. `true` in the cell means the line is asserted.
pub struct FakeInput(Rc<Cell<bool>>);

impl InputPin for FakeInput {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Infallible> {
        Ok(!self.0.get())
    }

    fn is_low(&self) -> Result<bool, Infallible> {
        Ok(self.0.get())
    }
}

pub struct FakeOutput(Rc<Cell<bool>>);

impl OutputPin for FakeOutput {
    type Error = Infallible;

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.set(true);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.set(false);
        Ok(())
    }
}

/// (duty, enabled)
pub struct FakePwm(Rc<Cell<(u8, bool)>>);

impl PwmPin for FakePwm {
    type Duty = u8;

    fn disable(&mut self) {
        self.0.set((self.0.get().0, false));
    }

    fn enable(&mut self) {
        self.0.set((self.0.get().0, true));
    }

    fn get_duty(&self) -> u8 {
        self.0.get().0
    }

    fn get_max_duty(&self) -> u8 {
        u8::MAX
    }

    fn set_duty(&mut self, duty: u8) {
        self.0.set((duty, self.0.get().1));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeFlashError;

impl NorFlashError for FakeFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::OutOfBounds
    }
}

/// Byte-erasable storage the size of the on-chip EEPROM.
pub struct FakeEeprom(Rc<RefCell<Vec<u8>>>);

pub const EEPROM_SIZE: usize = 4096;

impl ErrorType for FakeEeprom {
    type Error = FakeFlashError;
}

impl ReadNorFlash for FakeEeprom {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), FakeFlashError> {
        let cells = self.0.borrow();
        let start = offset as usize;
        let src = cells
            .get(start..start + bytes.len())
            .ok_or(FakeFlashError)?;
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        EEPROM_SIZE
    }
}

impl NorFlash for FakeEeprom {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = 1;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), FakeFlashError> {
        let mut cells = self.0.borrow_mut();
        cells
            .get_mut(from as usize..to as usize)
            .ok_or(FakeFlashError)?
            .fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), FakeFlashError> {
        let mut cells = self.0.borrow_mut();
        let start = offset as usize;
        let dst = cells
            .get_mut(start..start + bytes.len())
            .ok_or(FakeFlashError)?;
        for (cell, b) in dst.iter_mut().zip(bytes) {
            *cell &= *b;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    Off,
    Suspended,
    Active,
}

pub struct FakeBus(Rc<Cell<BusMode>>);

impl BusPort for FakeBus {
    fn suspend(&mut self) {
        self.0.set(BusMode::Suspended);
    }

    fn resume(&mut self) {
        self.0.set(BusMode::Active);
    }

    fn shutdown(&mut self) {
        self.0.set(BusMode::Off);
    }
}

/// Converter returning fixed counts per channel.
pub struct FakeAdc {
    counts: Rc<RefCell<[u16; 5]>>,
    running: Rc<Cell<bool>>,
}

impl Converter for FakeAdc {
    fn convert(&mut self, channel: Channel) -> u16 {
        self.counts.borrow()[channel as usize]
    }

    fn start(&mut self, _first: Channel) {
        self.running.set(true);
    }

    fn stop(&mut self) {
        self.running.set(false);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WatchdogLog {
    pub running: bool,
    pub period: u16,
    pub feeds: u32,
}

pub struct FakeWatchdog(Rc<Cell<WatchdogLog>>);

impl Watchdog for FakeWatchdog {
    fn feed(&mut self) {
        let mut log = self.0.get();
        log.feeds += 1;
        self.0.set(log);
    }
}

impl WatchdogEnable for FakeWatchdog {
    type Time = u16;

    fn start<T: Into<u16>>(&mut self, period: T) {
        let mut log = self.0.get();
        log.running = true;
        log.period = period.into();
        self.0.set(log);
    }
}

impl WatchdogDisable for FakeWatchdog {
    fn disable(&mut self) {
        let mut log = self.0.get();
        log.running = false;
        self.0.set(log);
    }
}

pub struct TestBoard;

impl Board for TestBoard {
    type Irqs = FakeIrq;
    type Input = FakeInput;
    type Output = FakeOutput;
    type Pwm = FakePwm;
    type Storage = FakeEeprom;
    type Bus = FakeBus;
    type Adc = FakeAdc;
    type Wdt = FakeWatchdog;
}

/// ADC count giving roughly `mv` on the voltage inputs.
pub const fn voltage_count(mv: u32) -> u16 {
    ((mv * 1023 + 6275 / 2) / 6275) as u16
}

/// Handles on everything the board exposes to the outside world.
pub struct Rig {
    pub button: Rc<Cell<bool>>,
    pub charge_1: Rc<Cell<bool>>,
    pub charge_2: Rc<Cell<bool>>,
    pub card: Rc<Cell<bool>>,
    pub main_rail: Rc<Cell<bool>>,
    pub aux_rail: Rc<Cell<bool>>,
    pub status_led: Rc<Cell<(u8, bool)>>,
    pub backlight: Rc<Cell<(u8, bool)>>,
    pub eeprom: Rc<RefCell<Vec<u8>>>,
    pub bus: Rc<Cell<BusMode>>,
    pub counts: Rc<RefCell<[u16; 5]>>,
    pub sampling: Rc<Cell<bool>>,
    pub watchdog: Rc<Cell<WatchdogLog>>,
}

impl Rig {
    pub fn new() -> Self {
        let mut counts = [0u16; 5];
        counts[Channel::BatteryVoltage as usize] = voltage_count(4000);
        // About 26 C
        counts[Channel::Temperature as usize] = 842;
        Self {
            button: Rc::default(),
            charge_1: Rc::default(),
            charge_2: Rc::default(),
            card: Rc::default(),
            main_rail: Rc::default(),
            aux_rail: Rc::default(),
            status_led: Rc::default(),
            backlight: Rc::default(),
            eeprom: Rc::new(RefCell::new(vec![0xFF; EEPROM_SIZE])),
            bus: Rc::new(Cell::new(BusMode::Off)),
            counts: Rc::new(RefCell::new(counts)),
            sampling: Rc::default(),
            watchdog: Rc::default(),
        }
    }

    pub fn parts(&self) -> Parts<TestBoard> {
        Parts {
            irq: FakeIrq::new(),
            button: FakeInput(self.button.clone()),
            charge_1: FakeInput(self.charge_1.clone()),
            charge_2: FakeInput(self.charge_2.clone()),
            card: FakeInput(self.card.clone()),
            main_rail: FakeOutput(self.main_rail.clone()),
            aux_rail: FakeOutput(self.aux_rail.clone()),
            status_led: FakePwm(self.status_led.clone()),
            backlight: FakePwm(self.backlight.clone()),
            storage: FakeEeprom(self.eeprom.clone()),
            bus: FakeBus(self.bus.clone()),
            adc: FakeAdc {
                counts: self.counts.clone(),
                running: self.sampling.clone(),
            },
            watchdog: FakeWatchdog(self.watchdog.clone()),
        }
    }
}

/// Runs `ms` milliseconds of scheduler ticks with a super-loop pass after
/// each tick.
pub fn run_ms(sv: &mut Supervisor<'_, TestBoard>, shared: &SharedState, ms: u32) {
    for _ in 0..ms * 5 {
        let ctx = unsafe { IsrCtx::enter(Irq::Tick) };
        shared.on_tick(&ctx);
        sv.step();
    }
}

/// Like [`run_ms`] but stops early once `state` is reached. Returns the
/// milliseconds spent.
pub fn run_until(
    sv: &mut Supervisor<'_, TestBoard>,
    shared: &SharedState,
    state: RunState,
    limit_ms: u32,
) -> Option<u32> {
    for ms in 0..limit_ms {
        for _ in 0..5 {
            let ctx = unsafe { IsrCtx::enter(Irq::Tick) };
            shared.on_tick(&ctx);
            if sv.step() == state {
                return Some(ms + 1);
            }
        }
    }
    None
}

pub fn seconds(shared: &SharedState, n: u32) {
    for _ in 0..n {
        let ctx = unsafe { IsrCtx::enter(Irq::Clock) };
        shared.on_second(&ctx);
    }
}

pub fn set_measurement(shared: &SharedState, m: Measurement, value: u16) {
    shared
        .measurements
        .masked(&FakeIrq::new(), |all| all.set(m, value));
}

/// Host side of the register bus.
pub struct Host<'a> {
    shared: &'a SharedState,
}

impl<'a> Host<'a> {
    pub fn new(shared: &'a SharedState) -> Self {
        Self { shared }
    }

    pub fn event(&self, event: BusEvent) -> BusResponse {
        let ctx = unsafe { IsrCtx::enter(Irq::Bus) };
        self.shared.on_bus_event(&ctx, event)
    }

    fn address(&self, pointer: u16) {
        assert_eq!(self.event(BusEvent::Start { read: false }), BusResponse::Ack);
        self.event(BusEvent::Received((pointer >> 8) as u8));
        self.event(BusEvent::Received(pointer as u8));
    }

    pub fn write(&self, pointer: u16, data: &[u8]) {
        self.address(pointer);
        for &b in data {
            assert_eq!(self.event(BusEvent::Received(b)), BusResponse::Ack);
        }
        self.event(BusEvent::Stop);
    }

    /// Pointer write, repeated start, then `n` bytes.
    pub fn read(&self, pointer: u16, n: usize) -> Vec<u8> {
        self.address(pointer);
        self.event(BusEvent::Stop);
        let mut out = Vec::with_capacity(n);
        let mut response = self.event(BusEvent::Start { read: true });
        for i in 0..n {
            match response {
                BusResponse::Transmit(b) => out.push(b),
                other => panic!("expected data, got {:?}", other),
            }
            response = self.event(BusEvent::Transmitted { acked: i + 1 < n });
        }
        out
    }

    pub fn read_u8(&self, pointer: u16) -> u8 {
        self.read(pointer, 1)[0]
    }

    pub fn read_u32(&self, pointer: u16) -> u32 {
        let b = self.read(pointer, 4);
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }
}

/// Button wake, hold past the short threshold, release: ends in Power.
pub fn power_up(rig: &Rig, sv: &mut Supervisor<'_, TestBoard>, shared: &SharedState) {
    rig.button.set(true);
    let wake = sv.sense_wake();
    assert_eq!(wake, WakeReason::BUTTON);
    sv.start(wake);
    assert_eq!(sv.state(), RunState::Wake);
    assert!(run_until(sv, shared, RunState::Wait, 500).is_some());
    rig.button.set(false);
    assert!(run_until(sv, shared, RunState::Power, 100).is_some());
}
