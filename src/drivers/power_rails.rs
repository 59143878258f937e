//! Host power rail switches

use embedded_hal::digital::v2::OutputPin;

#[derive(Clone, Copy, PartialEq, Eq, Debug, ufmt::derive::uDebug)]
pub enum Rail {
    /// Host processor supply
    Main,
    /// Peripheral supply, up while the controller is awake
    Aux,
}

pub struct PowerRails<O> {
    main: O,
    aux: O,
    main_on: bool,
    aux_on: bool,
}

impl<O: OutputPin> PowerRails<O> {
    /// Takes the enable pins and switches both rails off.
    pub fn new(main: O, aux: O) -> Self {
        let mut rails = Self {
            main,
            aux,
            main_on: false,
            aux_on: false,
        };
        rails.set(Rail::Main, false);
        rails.set(Rail::Aux, false);
        rails
    }

    pub fn set(&mut self, rail: Rail, on: bool) {
        let (pin, state) = match rail {
            Rail::Main => (&mut self.main, &mut self.main_on),
            Rail::Aux => (&mut self.aux, &mut self.aux_on),
        };
        // State only follows successful writes
        let result = if on { pin.set_high() } else { pin.set_low() };
        if result.is_ok() {
            *state = on;
        }
    }

    pub fn is_on(&self, rail: Rail) -> bool {
        match rail {
            Rail::Main => self.main_on,
            Rail::Aux => self.aux_on,
        }
    }

    pub fn all_off(&mut self) {
        self.set(Rail::Main, false);
        self.set(Rail::Aux, false);
    }

    pub fn release(self) -> (O, O) {
        (self.main, self.aux)
    }
}
