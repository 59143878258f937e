//! Per-source interrupt enable bits

use avr_device::atmega1284p::{ADC, TC0, TC1, TC2, TWI};

use crate::sync::{Irq, IrqControl, IrqSet};

const TWCR_TWINT: u8 = 1 << 7;
const TWCR_TWIE: u8 = 1 << 0;
const ADCSRA_ADIF: u8 = 1 << 4;
const ADCSRA_ADIE: u8 = 1 << 3;
const TIMSK0_OCIE0A: u8 = 1 << 1;
const TIMSK1_OCIE1A: u8 = 1 << 1;
const TIMSK1_OCIE1B: u8 = 1 << 2;
const TIMSK2_TOIE2: u8 = 1 << 0;

/// Masks sources by clearing their peripheral enable bits. Read-modify-write
/// runs with global interrupts off so a handler cannot change a bit under us.
pub struct AvrIrq {
    _private: (),
}

impl AvrIrq {
    /// # Safety
    ///
    /// One instance only; every enable bit listed above is owned by it while
    /// the super-loop runs.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn is_enabled(irq: Irq) -> bool {
        unsafe {
            match irq {
                Irq::Bus => (*TWI::ptr()).twcr.read().bits() & TWCR_TWIE != 0,
                Irq::BusGuard => (*TC1::ptr()).timsk1.read().bits() & TIMSK1_OCIE1B != 0,
                Irq::Sampler => (*ADC::ptr()).adcsra.read().bits() & ADCSRA_ADIE != 0,
                Irq::SampleTimer => (*TC0::ptr()).timsk0.read().bits() & TIMSK0_OCIE0A != 0,
                Irq::Clock => (*TC2::ptr()).timsk2.read().bits() & TIMSK2_TOIE2 != 0,
                Irq::Tick => (*TC1::ptr()).timsk1.read().bits() & TIMSK1_OCIE1A != 0,
            }
        }
    }

    fn set_enabled(irq: Irq, on: bool) {
        let apply = |bits: u8, mask: u8| if on { bits | mask } else { bits & !mask };
        unsafe {
            match irq {
                // Writing TWINT or ADIF back as one would clear the flag
                Irq::Bus => (*TWI::ptr())
                    .twcr
                    .modify(|r, w| w.bits(apply(r.bits() & !TWCR_TWINT, TWCR_TWIE))),
                Irq::BusGuard => (*TC1::ptr())
                    .timsk1
                    .modify(|r, w| w.bits(apply(r.bits(), TIMSK1_OCIE1B))),
                Irq::Sampler => (*ADC::ptr())
                    .adcsra
                    .modify(|r, w| w.bits(apply(r.bits() & !ADCSRA_ADIF, ADCSRA_ADIE))),
                Irq::SampleTimer => (*TC0::ptr())
                    .timsk0
                    .modify(|r, w| w.bits(apply(r.bits(), TIMSK0_OCIE0A))),
                Irq::Clock => (*TC2::ptr())
                    .timsk2
                    .modify(|r, w| w.bits(apply(r.bits(), TIMSK2_TOIE2))),
                Irq::Tick => (*TC1::ptr())
                    .timsk1
                    .modify(|r, w| w.bits(apply(r.bits(), TIMSK1_OCIE1A))),
            }
        }
    }
}

unsafe impl IrqControl for AvrIrq {
    fn mask(&self, set: IrqSet) -> IrqSet {
        avr_device::interrupt::free(|_| {
            let mut was = IrqSet::EMPTY;
            for irq in set.iter() {
                if Self::is_enabled(irq) {
                    was = was.with(irq);
                    Self::set_enabled(irq, false);
                }
            }
            was
        })
    }

    fn unmask(&self, set: IrqSet) {
        avr_device::interrupt::free(|_| {
            for irq in set.iter() {
                Self::set_enabled(irq, true);
            }
        });
    }
}
