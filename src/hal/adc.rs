use avr_device::atmega1284p::ADC;

use crate::application::Converter;
use crate::drivers::sampler::Channel;
use crate::hal::timer::SampleTimer;

const ADMUX_REFS_AVCC: u8 = 0x40;
const ADMUX_MUX_MASK: u8 = 0x1F;

const ADCSRA_ADEN: u8 = 1 << 7;
const ADCSRA_ADSC: u8 = 1 << 6;
const ADCSRA_ADATE: u8 = 1 << 5;
const ADCSRA_ADIF: u8 = 1 << 4;
const ADCSRA_ADIE: u8 = 1 << 3;
/// 8 MHz / 64 = 125 kHz conversion clock
const ADCSRA_DIV64: u8 = 0x06;

/// Auto-trigger source: Timer0 compare match A
const ADCSRB_TIMER0_COMPA: u8 = 0x03;

/// Converter input for each sampled channel.
pub const fn mux(channel: Channel) -> u8 {
    match channel {
        Channel::UsbVoltage => 0,
        Channel::UsbCurrent => 1,
        Channel::BatteryVoltage => 2,
        Channel::LoadCurrent => 3,
        Channel::Temperature => 7,
    }
}

/// Selects the input for the next conversion. Used from the
/// conversion-complete handler as well as by [`Adc`].
#[inline]
pub fn select(channel: Channel) {
    unsafe {
        (*ADC::ptr())
            .admux
            .write(|w| w.bits(ADMUX_REFS_AVCC | (mux(channel) & ADMUX_MUX_MASK)));
    }
}

/// Result of the conversion that just finished.
#[inline]
pub fn result() -> u16 {
    unsafe { (*ADC::ptr()).adc.read().bits() }
}

pub struct Adc {
    trigger: SampleTimer,
}

impl Adc {
    pub fn new(trigger: SampleTimer) -> Self {
        unsafe {
            let p = ADC::ptr();
            (*p).admux.write(|w| w.bits(ADMUX_REFS_AVCC));
            (*p).adcsra.write(|w| w.bits(ADCSRA_ADEN | ADCSRA_DIV64));
        }
        Self { trigger }
    }
}

impl Converter for Adc {
    fn convert(&mut self, channel: Channel) -> u16 {
        select(channel);
        unsafe {
            let p = ADC::ptr();
            (*p).adcsra
                .write(|w| w.bits(ADCSRA_ADEN | ADCSRA_ADSC | ADCSRA_ADIF | ADCSRA_DIV64));
            while (*p).adcsra.read().bits() & ADCSRA_ADSC != 0 {}
        }
        result()
    }

    fn start(&mut self, first: Channel) {
        select(first);
        unsafe {
            let p = ADC::ptr();
            (*p).adcsrb.write(|w| w.bits(ADCSRB_TIMER0_COMPA));
            (*p).adcsra.write(|w| {
                w.bits(ADCSRA_ADEN | ADCSRA_ADATE | ADCSRA_ADIF | ADCSRA_ADIE | ADCSRA_DIV64)
            });
        }
        self.trigger.start();
    }

    /// Also powers the converter down; the next conversion re-enables it.
    fn stop(&mut self) {
        self.trigger.stop();
        unsafe {
            (*ADC::ptr()).adcsra.write(|w| w.bits(ADCSRA_ADIF));
        }
    }
}
