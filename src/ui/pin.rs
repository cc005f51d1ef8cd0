//! Unlock PIN entry with a bounded number of attempts.

use crate::config::{PIN_LENGTH, PIN_MAX_ATTEMPTS};
use crate::ui::credentials::CredentialStore;
use crate::ui::input_logic::{digit_down, digit_up};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinOutcome {
    /// More digits to enter.
    Pending,
    Unlocked,
    /// Wrong PIN; entry restarts from the first digit.
    Rejected { remaining: u8 },
    /// Attempt limit reached.
    Exhausted,
}

/// Digit-by-digit PIN editor.
#[derive(Debug)]
pub struct PinGate {
    digits: [u8; PIN_LENGTH],
    cursor: usize,
    failures: u8,
}

impl PinGate {
    pub const fn new() -> Self {
        Self {
            digits: [0; PIN_LENGTH],
            cursor: 0,
            failures: 0,
        }
    }

    pub fn digits(&self) -> &[u8; PIN_LENGTH] {
        &self.digits
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn failures(&self) -> u8 {
        self.failures
    }

    pub fn increment(&mut self) {
        self.digits[self.cursor] = digit_up(self.digits[self.cursor]);
    }

    pub fn decrement(&mut self) {
        self.digits[self.cursor] = digit_down(self.digits[self.cursor]);
    }

    /// Step back to the previous digit.
    pub fn back(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    /// Accept the digit under the cursor; checks the PIN after the last one.
    pub fn commit<S: CredentialStore + ?Sized>(&mut self, store: &S) -> PinOutcome {
        if self.cursor + 1 < PIN_LENGTH {
            self.cursor += 1;
            return PinOutcome::Pending;
        }

        let accepted = store.verify_pin(&self.digits);
        self.clear();
        if accepted {
            self.failures = 0;
            return PinOutcome::Unlocked;
        }

        self.failures = self.failures.saturating_add(1);
        if self.failures >= PIN_MAX_ATTEMPTS {
            warn!("pin: attempt limit reached");
            PinOutcome::Exhausted
        } else {
            PinOutcome::Rejected {
                remaining: PIN_MAX_ATTEMPTS - self.failures,
            }
        }
    }

    /// Forget the digits typed so far (the failure count is kept).
    pub fn clear(&mut self) {
        self.digits = [0; PIN_LENGTH];
        self.cursor = 0;
    }
}

impl Default for PinGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::credentials::SliceStore;

    fn enter(gate: &mut PinGate, store: &SliceStore<'_>, pin: [u8; PIN_LENGTH]) -> PinOutcome {
        let mut outcome = PinOutcome::Pending;
        for digit in pin {
            for _ in 0..digit {
                gate.increment();
            }
            outcome = gate.commit(store);
        }
        outcome
    }

    #[test]
    fn correct_pin_unlocks() {
        let store = SliceStore::new(&[], [1, 2, 3, 4]);
        let mut gate = PinGate::new();
        assert_eq!(enter(&mut gate, &store, [1, 2, 3, 4]), PinOutcome::Unlocked);
        assert_eq!(gate.cursor(), 0);
        assert_eq!(gate.digits(), &[0; PIN_LENGTH]);
    }

    #[test]
    fn wrong_pins_exhaust_attempts() {
        let store = SliceStore::new(&[], [1, 2, 3, 4]);
        let mut gate = PinGate::new();
        assert_eq!(
            enter(&mut gate, &store, [0, 0, 0, 0]),
            PinOutcome::Rejected {
                remaining: PIN_MAX_ATTEMPTS - 1
            }
        );
        for _ in 1..PIN_MAX_ATTEMPTS - 1 {
            enter(&mut gate, &store, [9, 9, 9, 9]);
        }
        assert_eq!(enter(&mut gate, &store, [4, 3, 2, 1]), PinOutcome::Exhausted);
    }

    #[test]
    fn back_and_wrap() {
        let store = SliceStore::new(&[], [9, 0, 0, 0]);
        let mut gate = PinGate::new();
        gate.decrement();
        assert_eq!(gate.digits()[0], 9);
        assert_eq!(gate.commit(&store), PinOutcome::Pending);
        gate.back();
        assert_eq!(gate.cursor(), 0);
        gate.back();
        assert_eq!(gate.cursor(), 0);
    }
}
