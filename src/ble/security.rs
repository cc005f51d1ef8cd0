//! Pairing capabilities and security manager responses.
//!
//! The keyboard has a 5-button UI and a small display, but it never shows
//! a passkey: it announces "no input, no output" so that Just Works is
//! negotiated in the common case. A peer that insists on passkey entry
//! still gets one through [`crate::ble::hogp::Hogp::enter_passkey_digit`].

use bitflags::bitflags;

use crate::ble::crypto::EncryptionInformation;
use crate::ble::{Ltk, MAX_ENCRYPTION_KEY_SIZE};

/// SMP IO capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum IoCapability {
    DisplayOnly = 0x00,
    DisplayYesNo = 0x01,
    KeyboardOnly = 0x02,
    NoInputNoOutput = 0x03,
    KeyboardDisplay = 0x04,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BondingType {
    NoBonding,
    Bonding,
}

bitflags! {
    /// SMP key distribution bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct KeyDistribution: u8 {
        /// LTK + EDIV/Rand.
        const ENC_KEY = 0x01;
        /// IRK + identity address.
        const ID_KEY = 0x02;
        /// CSRK.
        const SIGN_KEY = 0x04;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for KeyDistribution {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "KeyDistribution({=u8:#04x})", self.bits())
    }
}

/// Pairing features, either ours or those of the requesting master.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PairingCapabilities {
    pub io: IoCapability,
    pub oob: bool,
    pub bonding: BondingType,
    pub mitm: bool,
    pub max_key_size: u8,
    /// Keys the master distributes to us.
    pub initiator_keys: KeyDistribution,
    /// Keys we distribute to the master.
    pub responder_keys: KeyDistribution,
}

impl PairingCapabilities {
    /// The fixed set this keyboard answers every pairing request with.
    ///
    /// Always asks for the largest key; the stack negotiates down when the
    /// master cannot follow.
    pub const fn keyboard() -> Self {
        Self {
            io: IoCapability::NoInputNoOutput,
            oob: false,
            bonding: BondingType::Bonding,
            mitm: false,
            max_key_size: MAX_ENCRYPTION_KEY_SIZE,
            initiator_keys: KeyDistribution::ID_KEY,
            responder_keys: KeyDistribution::ENC_KEY,
        }
    }
}

/// Answer to an [`crate::ble::stack::AuthEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthenticationResponse {
    Pairing(PairingCapabilities),
    LongTermKey { ltk: Ltk, key_size: u8 },
    /// We cannot supply a key; the master has to pair again.
    LongTermKeyUnavailable,
    ConfirmationAccept(bool),
    Passkey(u32),
    EncryptionInformation(EncryptionInformation),
}

/// Decimal accumulator for a passkey keyed in one digit at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PasskeyEntry {
    digits: u8,
    value: u32,
}

impl PasskeyEntry {
    /// Longest decimal that always fits the `u32` accumulator.
    pub const MAX_DIGITS: u8 = 9;

    pub const fn new() -> Self {
        Self { digits: 0, value: 0 }
    }

    /// Append `digit` (0-9). Returns `true` once all digits are in.
    ///
    /// Digits past the last are ignored. `total_digits` is capped at
    /// [`Self::MAX_DIGITS`].
    pub fn push(&mut self, digit: u8, total_digits: u8) -> bool {
        let total_digits = total_digits.min(Self::MAX_DIGITS);
        if digit <= 9 && self.digits < total_digits {
            self.value = self.value * 10 + u32::from(digit);
            self.digits += 1;
        }
        self.digits >= total_digits
    }

    pub fn digits(&self) -> u8 {
        self.digits
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_caps_request_irk_and_send_ltk_only() {
        let caps = PairingCapabilities::keyboard();
        assert_eq!(caps.io, IoCapability::NoInputNoOutput);
        assert_eq!(caps.bonding, BondingType::Bonding);
        assert!(!caps.mitm);
        assert_eq!(caps.max_key_size, 16);
        assert_eq!(caps.initiator_keys, KeyDistribution::ID_KEY);
        assert_eq!(caps.responder_keys, KeyDistribution::ENC_KEY);
        assert!(!caps.initiator_keys.contains(KeyDistribution::SIGN_KEY));
    }

    #[test]
    fn passkey_accumulates_six_digits() {
        let mut p = PasskeyEntry::new();
        for d in [1, 2, 3, 4, 5] {
            assert!(!p.push(d, 6));
        }
        assert!(p.push(6, 6));
        assert_eq!(p.value(), 123_456);

        // extra digits do not change the value
        assert!(p.push(7, 6));
        assert_eq!(p.value(), 123_456);
    }

    #[test]
    fn passkey_length_is_capped_to_fit_the_accumulator() {
        let mut p = PasskeyEntry::new();
        for _ in 0..PasskeyEntry::MAX_DIGITS - 1 {
            assert!(!p.push(9, 12));
        }
        assert!(p.push(9, 12));
        assert_eq!(p.value(), 999_999_999);

        assert!(p.push(9, 12));
        assert_eq!(p.digits(), PasskeyEntry::MAX_DIGITS);
        assert_eq!(p.value(), 999_999_999);
    }

    #[test]
    fn passkey_ignores_non_digits_and_resets() {
        let mut p = PasskeyEntry::new();
        p.push(0, 6);
        p.push(42, 6);
        assert_eq!(p.digits(), 1);
        p.reset();
        assert_eq!(p, PasskeyEntry::default());
    }
}
