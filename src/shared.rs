//! State shared between the super-loop and the interrupt handlers
//!
//! Each field is one atomicity group. Handlers enter through the `on_*`
//! functions; the super-loop goes through the masked accessors.

use core::convert::Infallible;

use crate::drivers::nvram::PersistentArray;
use crate::drivers::rtc::ClockCore;
use crate::drivers::sampler::{Channel, Jitter, Measurements, Sampler};
use crate::protocol::registers::ControlRegisters;
use crate::protocol::{BusEvent, BusResponse, BusShared};
use crate::rtos::scheduler::TickState;
use crate::sync::{Irq, IrqCell, IrqControl, IrqMask, IrqSet, IsrCtx};

const BUS: IrqSet = IrqSet::of(Irq::Bus).with(Irq::BusGuard);
const MEASUREMENTS: IrqSet = IrqSet::of(Irq::Bus).with(Irq::Sampler);

pub struct SharedState {
    /// Control slots and transaction state
    pub bus: IrqCell<BusShared>,
    pub persistent: IrqCell<PersistentArray>,
    /// Written by the sampler, copied to the slots by the bus at read start
    pub measurements: IrqCell<Measurements>,
    pub sampler: IrqCell<Sampler>,
    pub jitter: IrqCell<Jitter>,
    pub clock: IrqCell<ClockCore>,
    pub ticks: IrqCell<TickState>,
}

impl SharedState {
    pub const fn new() -> Self {
        Self {
            bus: IrqCell::new(BUS, BusShared::new()),
            persistent: IrqCell::new(IrqSet::of(Irq::Bus), PersistentArray::new()),
            measurements: IrqCell::new(MEASUREMENTS, Measurements::new()),
            sampler: IrqCell::new(IrqSet::of(Irq::Sampler), Sampler::new()),
            jitter: IrqCell::new(IrqSet::of(Irq::SampleTimer), Jitter::new()),
            clock: IrqCell::new(IrqSet::of(Irq::Clock), ClockCore::new()),
            ticks: IrqCell::new(IrqSet::of(Irq::Tick), TickState::new()),
        }
    }

    /// Bus protocol interrupt.
    pub fn on_bus_event(&self, ctx: &IsrCtx, event: BusEvent) -> BusResponse {
        self.bus.with_isr(ctx, |bus| {
            self.persistent.with_isr(ctx, |persistent| {
                self.measurements
                    .with_isr(ctx, |m| bus.on_event(event, persistent, m))
            })
        })
    }

    /// Hang-guard interrupt. True when the held clock line must be released.
    pub fn on_bus_guard(&self, ctx: &IsrCtx, held: bool) -> bool {
        self.bus.with_isr(ctx, |bus| bus.on_guard_tick(held))
    }

    /// Conversion-complete interrupt. Returns the next input.
    pub fn on_conversion(&self, ctx: &IsrCtx, count: u16) -> Channel {
        self.sampler.with_isr(ctx, |sampler| {
            self.measurements
                .with_isr(ctx, |m| sampler.on_conversion(count, m))
        })
    }

    /// Sample timer interrupt. Returns the next compare value.
    pub fn on_sample_timer(&self, ctx: &IsrCtx) -> u8 {
        self.jitter.with_isr(ctx, |jitter| jitter.next())
    }

    /// One-second interrupt.
    pub fn on_second(&self, ctx: &IsrCtx) {
        self.clock.with_isr(ctx, |clock| clock.on_second());
    }

    /// Scheduler tick interrupt.
    pub fn on_tick(&self, ctx: &IsrCtx) {
        self.ticks.with_isr(ctx, |ticks| ticks.on_tick());
    }

    /// Single-slot access. Byte-wide updates cannot tear, so this does not
    /// wait for a host transfer to finish.
    pub fn registers<C, R>(&self, ctl: &C, f: impl FnOnce(&mut ControlRegisters) -> R) -> R
    where
        C: IrqControl + ?Sized,
    {
        self.bus.masked(ctl, |bus| f(&mut bus.regs))
    }

    /// Multi-byte access to the bus state. Fails with `WouldBlock` while a
    /// host transfer is in flight so the host never sees half an update.
    pub fn publish<C, R>(
        &self,
        ctl: &C,
        f: impl FnOnce(&mut BusShared) -> R,
    ) -> nb::Result<R, Infallible>
    where
        C: IrqControl + ?Sized,
    {
        let mask = IrqMask::new(ctl, BUS.with(Irq::Sampler));
        self.bus.lock(&mask, |bus| {
            if bus.transfer.in_transfer() {
                Err(nb::Error::WouldBlock)
            } else {
                Ok(f(bus))
            }
        })
    }

    /// [`publish`](Self::publish) with the clock held as well.
    pub fn exchange_clock<C, R>(
        &self,
        ctl: &C,
        f: impl FnOnce(&mut BusShared, &mut ClockCore) -> R,
    ) -> nb::Result<R, Infallible>
    where
        C: IrqControl + ?Sized,
    {
        let mask = IrqMask::new(ctl, BUS.with(Irq::Sampler).with(Irq::Clock));
        self.bus.lock(&mask, |bus| {
            if bus.transfer.in_transfer() {
                return Err(nb::Error::WouldBlock);
            }
            Ok(self.clock.lock(&mask, |clock| f(bus, clock)))
        })
    }

    pub fn battery_mv<C: IrqControl + ?Sized>(&self, ctl: &C) -> u16 {
        self.measurements.masked(ctl, |m| m.battery_mv())
    }

    pub fn alarm_pending<C: IrqControl + ?Sized>(&self, ctl: &C) -> bool {
        self.clock.masked(ctl, |clock| clock.alarm_pending())
    }

    pub fn clear_alarm<C: IrqControl + ?Sized>(&self, ctl: &C) {
        self.clock.masked(ctl, |clock| clock.clear_alarm());
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
