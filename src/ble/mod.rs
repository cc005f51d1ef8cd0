//! Bluetooth Low Energy subsystem.
//!
//! This module drives a vendor BLE stack in **Peripheral** role as an
//! HID-over-GATT keyboard:
//!
//! 1. **Registry** - remembers every peer that ever connected, resolving
//!    rotating private addresses through the peer's IRK.
//! 2. **Security** - answers pairing requests with a fixed capability set
//!    and regenerates long-term keys from fixed roots instead of storing
//!    them.
//! 3. **HOGP application** - the connection state machine, GATT dispatch
//!    for the Battery/Device-Info/HID services and the HID report path.
//!
//! The stack itself is reached only through the [`stack::HostStack`] seam.

pub mod advertising;
pub mod connection;
pub mod crypto;
pub mod hogp;
pub mod registry;
pub mod security;
pub mod stack;

/// Peer address type as carried in GAP events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

/// 48-bit device address, least significant octet first (air order).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Random resolvable private address: the two most significant bits
    /// are `0b01`.
    pub const fn is_resolvable_private(&self) -> bool {
        self.0[5] & 0xC0 == 0x40
    }

    /// 24-bit `hash` part of a resolvable private address.
    pub fn hash(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// 24-bit `prand` part of a resolvable private address.
    pub fn prand(&self) -> [u8; 3] {
        [self.0[3], self.0[4], self.0[5]]
    }

    pub const fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

/// Identity Resolving Key, least significant octet first (as received
/// over SMP).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Irk(pub [u8; 16]);

/// Long Term Key, least significant octet first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ltk(pub [u8; 16]);

/// Link-layer connection handle.
pub type ConnHandle = u16;

/// Largest encryption key size SMP can negotiate.
pub const MAX_ENCRYPTION_KEY_SIZE: u8 = 16;

/// HCI status "success".
pub const HCI_SUCCESS: u8 = 0x00;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolvable_private_marker_bits() {
        assert!(BdAddr::new([1, 2, 3, 4, 5, 0x40]).is_resolvable_private());
        assert!(BdAddr::new([1, 2, 3, 4, 5, 0x7F]).is_resolvable_private());
        // static random
        assert!(!BdAddr::new([1, 2, 3, 4, 5, 0xC0]).is_resolvable_private());
        // non-resolvable private
        assert!(!BdAddr::new([1, 2, 3, 4, 5, 0x3F]).is_resolvable_private());
    }

    #[test]
    fn hash_and_prand_split() {
        let a = BdAddr::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        assert_eq!(a.hash(), [0x11, 0x22, 0x33]);
        assert_eq!(a.prand(), [0x44, 0x55, 0x66]);
    }
}
