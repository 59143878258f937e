//! Push-button, charger status and card-detect monitoring
//!
//! All four inputs are active low. Each is sampled once per evaluation and
//! only changes state after two equal samples in a row.

use embedded_hal::digital::v2::InputPin;

use crate::config::{LONG_PRESS_EVALS, SHORT_PRESS_DEFAULT};
use crate::protocol::registers::{Inputs, Slot, Status};
use crate::shared::SharedState;
use crate::sync::IrqControl;

/// Charger status decoded from its two open-drain status lines.
#[derive(Clone, Copy, PartialEq, Eq, Debug, ufmt::derive::uDebug)]
#[repr(u8)]
pub enum ChargeState {
    Off = 0,
    Charging = 1,
    Complete = 2,
    Fault = 3,
}

impl ChargeState {
    pub fn from_lines(line_1: bool, line_2: bool) -> Self {
        match (line_1, line_2) {
            (false, false) => ChargeState::Off,
            (true, false) => ChargeState::Charging,
            (false, true) => ChargeState::Complete,
            (true, true) => ChargeState::Fault,
        }
    }
}

/// Button events reported by [`IoMonitor::evaluate`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PressEvent {
    /// Released after the short threshold but before a long press
    Short,
    /// Held for the long-press threshold
    Long,
}

/// Two-sample debounce of one line.
#[derive(Clone, Copy, Default, Debug)]
struct Debounce {
    prev: bool,
    level: bool,
}

impl Debounce {
    /// Returns the debounced level and whether it just fell.
    fn sample(&mut self, active: bool) -> (bool, bool) {
        let was = self.level;
        if active == self.prev {
            self.level = active;
        }
        self.prev = active;
        (self.level, was && !self.level)
    }
}

fn active<P: InputPin>(pin: &P) -> bool {
    // A failed read counts as inactive
    pin.is_low().unwrap_or(false)
}

pub struct IoMonitor<P> {
    button: P,
    charge_1: P,
    charge_2: P,
    card: P,
    button_line: Debounce,
    charge_1_line: Debounce,
    charge_2_line: Debounce,
    card_line: Debounce,
    press_timer: u16,
    short_threshold: u8,
    long_press: bool,
}

impl<P: InputPin> IoMonitor<P> {
    pub fn new(button: P, charge_1: P, charge_2: P, card: P) -> Self {
        Self {
            button,
            charge_1,
            charge_2,
            card,
            button_line: Debounce::default(),
            charge_1_line: Debounce::default(),
            charge_2_line: Debounce::default(),
            card_line: Debounce::default(),
            press_timer: 0,
            short_threshold: SHORT_PRESS_DEFAULT,
            long_press: false,
        }
    }

    /// Forgets all input history and samples twice so every line starts
    /// out debounced.
    pub fn reset<C: IrqControl>(&mut self, shared: &SharedState, ctl: &C) {
        self.button_line = Debounce::default();
        self.charge_1_line = Debounce::default();
        self.charge_2_line = Debounce::default();
        self.card_line = Debounce::default();
        self.press_timer = 0;
        self.long_press = false;
        self.short_threshold = shared.registers(ctl, |regs| regs.get(Slot::ShortPress));
        self.sample();
        self.sample();
    }

    fn sample(&mut self) -> bool {
        let (_, released) = self.button_line.sample(active(&self.button));
        self.charge_1_line.sample(active(&self.charge_1));
        self.charge_2_line.sample(active(&self.charge_2));
        self.card_line.sample(active(&self.card));
        released
    }

    /// One evaluation period.
    pub fn evaluate<C: IrqControl>(
        &mut self,
        shared: &SharedState,
        ctl: &C,
    ) -> Option<PressEvent> {
        self.short_threshold = shared.registers(ctl, |regs| regs.get(Slot::ShortPress));
        let released = self.sample();
        let mut event = None;

        if self.button_down() {
            if self.press_timer < LONG_PRESS_EVALS {
                self.press_timer += 1;
                if self.press_timer == LONG_PRESS_EVALS {
                    self.long_press = true;
                    event = Some(PressEvent::Long);
                }
            }
        } else if released
            && self.press_timer >= self.short_threshold as u16
            && self.press_timer < LONG_PRESS_EVALS
        {
            event = Some(PressEvent::Short);
        }

        if !self.button_down() {
            self.press_timer = 0;
        }

        let inputs = self.inputs();
        shared.registers(ctl, |regs| {
            if event == Some(PressEvent::Short) {
                regs.update_status(|s| s.insert(Status::SHORT_PRESS));
            }
            regs.set(Slot::Inputs, inputs.bits());
        });
        event
    }

    pub fn inputs(&self) -> Inputs {
        let mut inputs = Inputs::empty();
        inputs.set(Inputs::CHARGE_1, self.charge_1_line.level);
        inputs.set(Inputs::CHARGE_2, self.charge_2_line.level);
        inputs.set(Inputs::BUTTON_DOWN, self.button_line.level);
        inputs.set(Inputs::CARD_PRESENT, self.card_line.level);
        inputs
    }

    pub fn button_down(&self) -> bool {
        self.button_line.level
    }

    /// Consumes a pending long press. The press timer stays saturated until
    /// release, so the same hold cannot also count as a short press.
    pub fn take_long_press(&mut self) -> bool {
        core::mem::take(&mut self.long_press)
    }

    /// Button held past the short-press threshold.
    pub fn short_period_expired(&self) -> bool {
        self.press_timer > self.short_threshold as u16
    }

    /// Raw button and charger lines, read without debouncing. Used right
    /// after wake-up to tell what ended the sleep.
    pub fn wake_lines(&self) -> (bool, bool) {
        let charger = active(&self.charge_1) || active(&self.charge_2);
        (active(&self.button), charger)
    }

    pub fn charge_state(&self) -> ChargeState {
        ChargeState::from_lines(self.charge_1_line.level, self.charge_2_line.level)
    }

    pub fn release(self) -> (P, P, P, P) {
        (self.button, self.charge_1, self.charge_2, self.card)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::mock::MockIrq;
    use embedded_hal_mock::pin::{Mock as PinMock, State, Transaction};

    /// `n` reads of the same level.
    fn reads(level: State, n: usize) -> std::vec::Vec<Transaction> {
        (0..n).map(|_| Transaction::get(level)).collect()
    }

    fn monitor(button: &[Transaction]) -> IoMonitor<PinMock> {
        let n = button.len();
        IoMonitor::new(
            PinMock::new(button),
            PinMock::new(&reads(State::High, n)),
            PinMock::new(&reads(State::High, n)),
            PinMock::new(&reads(State::Low, n)),
        )
    }

    #[test]
    fn charge_state_decoding() {
        assert_eq!(ChargeState::from_lines(false, false), ChargeState::Off);
        assert_eq!(ChargeState::from_lines(true, false), ChargeState::Charging);
        assert_eq!(ChargeState::from_lines(false, true), ChargeState::Complete);
        assert_eq!(ChargeState::from_lines(true, true), ChargeState::Fault);
    }

    #[test]
    fn level_needs_two_equal_samples() {
        let mut line = Debounce::default();
        assert_eq!(line.sample(true), (false, false));
        assert_eq!(line.sample(true), (true, false));
        assert_eq!(line.sample(false), (true, false));
        assert_eq!(line.sample(true), (true, false));
        assert_eq!(line.sample(false), (true, false));
        assert_eq!(line.sample(false), (false, true));
    }

    #[test]
    fn short_press_sets_status_bit() {
        let shared = SharedState::new();
        let irq = MockIrq::new();
        // reset (2) + 12 held + 2 released
        let mut seq = reads(State::Low, 14);
        seq.extend(reads(State::High, 2));
        let mut io = monitor(&seq);
        io.reset(&shared, &irq);
        assert!(io.button_down());

        let mut events = std::vec::Vec::new();
        for _ in 0..14 {
            events.extend(io.evaluate(&shared, &irq));
        }
        assert_eq!(events, [PressEvent::Short]);
        let status = shared.registers(&irq, |r| r.status());
        assert!(status.contains(Status::SHORT_PRESS));
        assert!(!io.button_down());

        let (mut b, mut c1, mut c2, mut card) = io.release();
        b.done();
        c1.done();
        c2.done();
        card.done();
    }

    #[test]
    fn press_below_threshold_is_ignored() {
        let shared = SharedState::new();
        let irq = MockIrq::new();
        let mut seq = reads(State::High, 2);
        seq.extend(reads(State::Low, 4));
        seq.extend(reads(State::High, 2));
        let mut io = monitor(&seq);
        io.reset(&shared, &irq);
        for _ in 0..6 {
            assert_eq!(io.evaluate(&shared, &irq), None);
        }
        assert!(!shared.registers(&irq, |r| r.status()).contains(Status::SHORT_PRESS));
    }

    #[test]
    fn long_press_fires_once_and_is_consumed() {
        let shared = SharedState::new();
        let irq = MockIrq::new();
        let held = LONG_PRESS_EVALS as usize + 20;
        let mut seq = reads(State::Low, held + 2);
        seq.extend(reads(State::High, 2));
        let mut io = monitor(&seq);
        io.reset(&shared, &irq);
        let mut longs = 0;
        for _ in 0..held {
            if io.evaluate(&shared, &irq) == Some(PressEvent::Long) {
                longs += 1;
            }
        }
        assert_eq!(longs, 1);
        assert!(io.take_long_press());
        assert!(!io.take_long_press());

        // Releasing the same hold is not a short press
        assert_eq!(io.evaluate(&shared, &irq), None);
        assert_eq!(io.evaluate(&shared, &irq), None);
        assert!(!io.button_down());
        assert!(!shared.registers(&irq, |r| r.status()).contains(Status::SHORT_PRESS));
    }

    #[test]
    fn threshold_follows_register() {
        let shared = SharedState::new();
        let irq = MockIrq::new();
        shared.registers(&irq, |r| r.set(Slot::ShortPress, 3));
        let mut io = monitor(&reads(State::Low, 7));
        io.reset(&shared, &irq);
        for _ in 0..3 {
            io.evaluate(&shared, &irq);
        }
        assert!(!io.short_period_expired());
        io.evaluate(&shared, &irq);
        assert!(io.short_period_expired());
    }

    #[test]
    fn snapshot_published_to_inputs_slot() {
        let shared = SharedState::new();
        let irq = MockIrq::new();
        let mut io = IoMonitor::new(
            PinMock::new(&reads(State::High, 3)),
            PinMock::new(&reads(State::Low, 3)),
            PinMock::new(&reads(State::High, 3)),
            PinMock::new(&reads(State::Low, 3)),
        );
        io.reset(&shared, &irq);
        io.evaluate(&shared, &irq);
        let inputs = shared.registers(&irq, |r| r.get(Slot::Inputs));
        assert_eq!(inputs, (Inputs::CHARGE_1 | Inputs::CARD_PRESENT).bits());
        assert_eq!(io.charge_state(), ChargeState::Charging);
    }

    #[test]
    fn wake_lines_read_raw_levels() {
        let io = IoMonitor::new(
            PinMock::new(&reads(State::Low, 1)),
            PinMock::new(&reads(State::High, 1)),
            PinMock::new(&reads(State::Low, 1)),
            PinMock::new(&[]),
        );
        // No debouncing: one read each decides
        assert_eq!(io.wake_lines(), (true, true));

        let (mut b, mut c1, mut c2, mut card) = io.release();
        b.done();
        c1.done();
        c2.done();
        card.done();
    }
}
