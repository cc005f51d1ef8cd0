//! Bookkeeping of the single active connection.

use bitflags::bitflags;

use crate::ble::registry::PeerId;
use crate::ble::security::PasskeyEntry;
use crate::ble::stack::{ConnectionParameters, TimerId};
use crate::ble::{AddressType, BdAddr, ConnHandle};
use crate::config::SECURITY_TIMER_LATENCY_GRACE;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ConnFlags: u8 {
        const ENCRYPTED = 1 << 0;
        const AWAITING_PASSKEY = 1 << 1;
        const CONNECTION_VALID = 1 << 2;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ConnFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ConnFlags({=u8:#04x})", self.bits())
    }
}

/// The one link the radio supports.
///
/// Everything but `flags` is meaningful only while
/// [`ConnFlags::CONNECTION_VALID`] is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionInfo {
    pub handle: ConnHandle,
    pub address_type: AddressType,
    pub address: BdAddr,
    pub flags: ConnFlags,
    pub peer: Option<PeerId>,
    pub security_timer: Option<TimerId>,
    pub passkey: PasskeyEntry,
    pub params: ConnectionParameters,
}

impl ConnectionInfo {
    pub const fn new() -> Self {
        Self {
            handle: 0,
            address_type: AddressType::Public,
            address: BdAddr([0; 6]),
            flags: ConnFlags::empty(),
            peer: None,
            security_timer: None,
            passkey: PasskeyEntry::new(),
            params: ConnectionParameters {
                interval_ms: 0,
                slave_latency: 0,
                supervision_timeout_ms: 0,
            },
        }
    }

    pub fn open(
        &mut self,
        handle: ConnHandle,
        address_type: AddressType,
        address: BdAddr,
        params: ConnectionParameters,
    ) {
        *self = Self {
            handle,
            address_type,
            address,
            flags: ConnFlags::CONNECTION_VALID,
            params,
            ..Self::new()
        };
    }

    /// Forget the link. Every field goes back to zero in one step.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn is_valid(&self) -> bool {
        self.flags.contains(ConnFlags::CONNECTION_VALID)
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(ConnFlags::CONNECTION_VALID | ConnFlags::ENCRYPTED)
    }

    pub fn is_awaiting_passkey(&self) -> bool {
        self.flags.contains(ConnFlags::CONNECTION_VALID | ConnFlags::AWAITING_PASSKEY)
    }

    /// Is `handle` the active link?
    pub fn is_handle(&self, handle: ConnHandle) -> bool {
        self.is_valid() && self.handle == handle
    }

    /// Is `address` the active peer? The address may have been rebased
    /// to the identity address in the meantime, so the registry handle is
    /// not consulted here.
    pub fn is_peer(&self, address: &BdAddr) -> bool {
        self.is_valid() && self.address == *address
    }

    /// Take the running security timer, leaving none.
    pub fn take_security_timer(&mut self) -> Option<TimerId> {
        self.security_timer.take()
    }
}

/// How long a returning bonded master gets to re-encrypt on its own:
/// `interval * (latency + 8)` ms.
pub fn security_grace_ms(params: &ConnectionParameters) -> u32 {
    params
        .interval_ms
        .saturating_mul(u32::from(params.slave_latency) + SECURITY_TIMER_LATENCY_GRACE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(interval_ms: u32, slave_latency: u16) -> ConnectionParameters {
        ConnectionParameters {
            interval_ms,
            slave_latency,
            supervision_timeout_ms: 4000,
        }
    }

    #[test]
    fn grace_scales_with_interval_and_latency() {
        assert_eq!(security_grace_ms(&params(30, 0)), 240);
        assert_eq!(security_grace_ms(&params(15, 4)), 180);
        assert_eq!(security_grace_ms(&params(u32::MAX, 4)), u32::MAX);
    }

    #[test]
    fn open_then_clear_zeroes_everything() {
        let mut c = ConnectionInfo::new();
        c.open(7, AddressType::Random, BdAddr([1; 6]), params(30, 0));
        c.flags |= ConnFlags::ENCRYPTED;
        c.security_timer = Some(TimerId(3));
        assert!(c.is_handle(7));
        assert!(c.is_encrypted());

        c.clear();
        assert_eq!(c, ConnectionInfo::default());
        assert!(!c.is_valid());
        assert!(!c.is_handle(7));
    }

    #[test]
    fn flags_are_ignored_without_a_valid_link() {
        let mut c = ConnectionInfo::new();
        c.flags = ConnFlags::ENCRYPTED | ConnFlags::AWAITING_PASSKEY;
        assert!(!c.is_encrypted());
        assert!(!c.is_awaiting_passkey());
    }

    #[test]
    fn security_timer_is_taken_once() {
        let mut c = ConnectionInfo::new();
        c.security_timer = Some(TimerId(9));
        assert_eq!(c.take_security_timer(), Some(TimerId(9)));
        assert_eq!(c.take_security_timer(), None);
    }
}
