//! Registry of every peer that connected since boot.
//!
//! Records live in a fixed slot map addressed by a generation-checked
//! [`PeerId`], so a handle cached in the connection state can never reach
//! a record that was deleted and its slot reused.
//!
//! Lookup is a two-phase search: a random resolvable address is first
//! matched against every record holding an IRK, then every address falls
//! back to an exact (type, address) match. The first match wins.

use crate::ble::crypto::{self, BlockCipher, EncryptionInformation};
use crate::ble::{AddressType, BdAddr, Irk, MAX_ENCRYPTION_KEY_SIZE};
use crate::gatt::ClientConfig;

/// Per-peer state kept across connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerRecord {
    pub address_type: AddressType,
    /// Identity address once the peer disclosed it, else the connect address.
    pub address: BdAddr,
    pub irk: Option<Irk>,
    pub battery_cccd: ClientConfig,
    pub boot_input_cccd: ClientConfig,
    pub report_input_cccd: ClientConfig,
    /// Negotiated encryption key size, 0 until pairing completed.
    pub key_size: u8,
    /// Last battery level notified to this peer.
    pub last_battery_level: Option<u8>,
    /// LTK the stack generated and distributed itself; RAM only.
    pub stack_key: Option<EncryptionInformation>,
}

impl PeerRecord {
    pub const fn new(address_type: AddressType, address: BdAddr) -> Self {
        Self {
            address_type,
            address,
            irk: None,
            battery_cccd: ClientConfig::empty(),
            boot_input_cccd: ClientConfig::empty(),
            report_input_cccd: ClientConfig::empty(),
            key_size: 0,
            last_battery_level: None,
            stack_key: None,
        }
    }

    /// Key size to hand back with a regenerated LTK.
    pub fn effective_key_size(&self) -> u8 {
        if self.key_size == 0 {
            MAX_ENCRYPTION_KEY_SIZE
        } else {
            self.key_size
        }
    }

    /// The stack-distributed LTK if `ediv`/`rand` name it.
    pub fn stack_key_for(&self, ediv: u16, rand: &[u8; 8]) -> Option<EncryptionInformation> {
        self.stack_key.filter(|key| key.ediv == ediv && key.rand == *rand)
    }

    fn matches_exactly(&self, address_type: AddressType, address: &BdAddr) -> bool {
        self.address_type == address_type && self.address == *address
    }
}

/// Stable handle of a registry slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerId {
    index: u8,
    generation: u16,
}

#[derive(Clone, Copy)]
struct Slot {
    generation: u16,
    record: Option<PeerRecord>,
}

impl Slot {
    const EMPTY: Self = Self {
        generation: 0,
        record: None,
    };
}

pub struct PeerRegistry<const N: usize> {
    slots: [Slot; N],
}

impl<const N: usize> PeerRegistry<N> {
    pub const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; N],
        }
    }

    /// Find the record for a connecting or referenced address.
    pub fn find_by_address<C: BlockCipher + ?Sized>(
        &self,
        cipher: &C,
        address_type: AddressType,
        address: &BdAddr,
    ) -> Option<PeerId> {
        if address_type == AddressType::Random && address.is_resolvable_private() {
            let resolved = self.ids().find(|(_, rec)| {
                rec.irk
                    .as_ref()
                    .is_some_and(|irk| crypto::resolve_address(cipher, irk, address))
            });
            if let Some((id, _)) = resolved {
                return Some(id);
            }
        }
        self.ids()
            .find(|(_, rec)| rec.matches_exactly(address_type, address))
            .map(|(id, _)| id)
    }

    /// Insert a zeroed record. `None` when every slot is taken.
    pub fn create(&mut self, address_type: AddressType, address: BdAddr) -> Option<PeerId> {
        let index = self.slots.iter().position(|s| s.record.is_none())?;
        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        slot.record = Some(PeerRecord::new(address_type, address));
        Some(PeerId {
            index: index as u8,
            generation: slot.generation,
        })
    }

    /// Remove the record `address` resolves to and hand it back.
    ///
    /// No-op when nothing matches.
    pub fn delete<C: BlockCipher + ?Sized>(
        &mut self,
        cipher: &C,
        address_type: AddressType,
        address: &BdAddr,
    ) -> Option<PeerRecord> {
        let id = self.find_by_address(cipher, address_type, address)?;
        self.remove(id)
    }

    pub fn remove(&mut self, id: PeerId) -> Option<PeerRecord> {
        let slot = self.slot_mut(id)?;
        slot.record.take()
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerRecord> {
        let slot = self.slots.get(usize::from(id.index))?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_ref()
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut PeerRecord> {
        self.slot_mut(id)?.record.as_mut()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.record.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.slots.iter().filter_map(|s| s.record.as_ref())
    }

    fn ids(&self) -> impl Iterator<Item = (PeerId, &PeerRecord)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.record.as_ref().map(|rec| {
                (
                    PeerId {
                        index: i as u8,
                        generation: s.generation,
                    },
                    rec,
                )
            })
        })
    }

    fn slot_mut(&mut self, id: PeerId) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(usize::from(id.index))?;
        (slot.generation == id.generation).then_some(slot)
    }
}

impl<const N: usize> Default for PeerRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}
