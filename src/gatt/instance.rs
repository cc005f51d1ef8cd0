//! Fixed arena of service instances for the standalone profiles.
//!
//! Instance ids handed to the application are 1-based; 0 is never valid.
//! Every accessor re-checks the caller's stack id against the one the
//! instance was registered under.

use core::array;

use crate::ble::stack::{HostStack, ServiceId, StackId};
use crate::error::ProfileError;
use crate::gatt::Attribute;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InstanceId(pub u8);

/// Which slot an `initialize_service` call should take.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lookup {
    /// Exactly this slot; it must be free.
    ByIndex(InstanceId),
    /// The lowest free slot.
    FirstFree,
}

/// A registered service and the profile's per-instance state.
#[derive(Debug)]
pub struct Instance<T> {
    pub stack_id: StackId,
    pub service: ServiceId,
    pub table: &'static [Attribute],
    pub state: T,
}

pub struct InstanceArena<T, const N: usize> {
    slots: [Option<Instance<T>>; N],
}

impl<T, const N: usize> InstanceArena<T, N> {
    pub fn new() -> Self {
        Self {
            slots: array::from_fn(|_| None),
        }
    }

    /// Register `table` with the stack and park `state` in the slot chosen
    /// by `lookup`.
    pub fn register<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        lookup: Lookup,
        table: &'static [Attribute],
        state: T,
    ) -> Result<InstanceId, ProfileError> {
        let stack_id = stack.stack_id();
        if !stack_id.is_valid() {
            return Err(ProfileError::InvalidStackId);
        }
        let id = self.vacant(lookup)?;
        let service = stack.register_service(table).map_err(|e| {
            warn!("gatt: service registration refused: {}", e);
            ProfileError::InsufficientResources
        })?;
        self.insert(
            id,
            Instance {
                stack_id,
                service,
                table,
                state,
            },
        )?;
        Ok(id)
    }

    /// Unregister the service of `id` and free its slot.
    pub fn unregister<S: HostStack + ?Sized>(&mut self, stack: &mut S, id: InstanceId) -> Result<T, ProfileError> {
        let service = self.get(stack.stack_id(), id)?.service;
        stack.unregister_service(service)?;
        Ok(self.remove(stack.stack_id(), id)?.state)
    }

    /// Pick a free slot for `lookup` without taking it.
    pub fn vacant(&self, lookup: Lookup) -> Result<InstanceId, ProfileError> {
        match lookup {
            Lookup::ByIndex(id) => {
                let slot = self.index(id).ok_or(ProfileError::InvalidInstance)?;
                if self.slots[slot].is_some() {
                    return Err(ProfileError::InsufficientResources);
                }
                Ok(id)
            }
            Lookup::FirstFree => self
                .slots
                .iter()
                .position(Option::is_none)
                .map(|i| InstanceId(i as u8 + 1))
                .ok_or(ProfileError::InsufficientResources),
        }
    }

    /// Occupy the slot returned by [`Self::vacant`].
    pub fn insert(&mut self, id: InstanceId, instance: Instance<T>) -> Result<(), ProfileError> {
        let slot = self.index(id).ok_or(ProfileError::InvalidInstance)?;
        if self.slots[slot].is_some() {
            return Err(ProfileError::InsufficientResources);
        }
        self.slots[slot] = Some(instance);
        Ok(())
    }

    pub fn get(&self, stack_id: StackId, id: InstanceId) -> Result<&Instance<T>, ProfileError> {
        let slot = self.checked(stack_id, id)?;
        self.slots[slot].as_ref().ok_or(ProfileError::InvalidInstance)
    }

    pub fn get_mut(&mut self, stack_id: StackId, id: InstanceId) -> Result<&mut Instance<T>, ProfileError> {
        let slot = self.checked(stack_id, id)?;
        self.slots[slot].as_mut().ok_or(ProfileError::InvalidInstance)
    }

    pub fn remove(&mut self, stack_id: StackId, id: InstanceId) -> Result<Instance<T>, ProfileError> {
        let slot = self.checked(stack_id, id)?;
        self.slots[slot].take().ok_or(ProfileError::InvalidInstance)
    }

    /// The instance owning `service`, for routing stack events.
    pub fn by_service(&mut self, service: ServiceId) -> Option<(InstanceId, &mut Instance<T>)> {
        self.slots.iter_mut().enumerate().find_map(|(i, slot)| match slot {
            Some(inst) if inst.service == service => Some((InstanceId(i as u8 + 1), inst)),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(&self, id: InstanceId) -> Option<usize> {
        let i = usize::from(id.0).checked_sub(1)?;
        (i < N).then_some(i)
    }

    fn checked(&self, stack_id: StackId, id: InstanceId) -> Result<usize, ProfileError> {
        if !stack_id.is_valid() {
            return Err(ProfileError::InvalidStackId);
        }
        let slot = self.index(id).ok_or(ProfileError::InvalidInstance)?;
        match &self.slots[slot] {
            Some(inst) if inst.stack_id == stack_id => Ok(slot),
            _ => Err(ProfileError::InvalidInstance),
        }
    }
}

impl<T, const N: usize> Default for InstanceArena<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
