//! Reference Time Update Service (0x1806).

use crate::ble::stack::{GattEvent, HostStack};
use crate::ble::ConnHandle;
use crate::config::MAX_PROFILE_INSTANCES;
use crate::error::{AttError, ProfileError, StackError};
use crate::gatt::instance::{InstanceArena, InstanceId, Lookup};
use crate::gatt::{self, uuid, Access, Attribute, Dispatch, Properties, ReadTarget, WriteTarget};

pub static TABLE: [Attribute; 5] = [
    Attribute::PrimaryService(uuid::REFERENCE_TIME_UPDATE),
    Attribute::characteristic(uuid::TIME_UPDATE_CONTROL_POINT, Properties::WRITE_WITHOUT_RESPONSE),
    Attribute::dynamic(uuid::TIME_UPDATE_CONTROL_POINT, Access::Open),
    Attribute::characteristic(uuid::TIME_UPDATE_STATE, Properties::READ),
    Attribute::dynamic(uuid::TIME_UPDATE_STATE, Access::Open),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TimeUpdateCommand {
    GetReferenceUpdate = 1,
    CancelReferenceUpdate = 2,
}

impl TryFrom<u8> for TimeUpdateCommand {
    type Error = AttError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TimeUpdateCommand::GetReferenceUpdate),
            2 => Ok(TimeUpdateCommand::CancelReferenceUpdate),
            _ => Err(AttError::ValueNotAllowed),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CurrentState {
    #[default]
    Idle = 0,
    UpdatePending = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum UpdateResult {
    Successful = 0,
    Canceled = 1,
    NoConnectionToReference = 2,
    ReferenceRespondedWithError = 3,
    Timeout = 4,
    #[default]
    NotAttemptedAfterReset = 5,
}

/// Time Update State value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimeUpdateState {
    pub current_state: CurrentState,
    pub result: UpdateResult,
}

impl TimeUpdateState {
    pub fn encode(&self) -> [u8; 2] {
        [self.current_state as u8, self.result as u8]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtusEvent {
    Command { conn: ConnHandle, command: TimeUpdateCommand },
}

#[derive(Debug)]
struct RtusInstance {
    control_point: u16,
    update_state: TimeUpdateState,
}

pub struct ReferenceTimeUpdateProfile {
    instances: InstanceArena<RtusInstance, MAX_PROFILE_INSTANCES>,
}

impl ReferenceTimeUpdateProfile {
    pub fn new() -> Self {
        Self {
            instances: InstanceArena::new(),
        }
    }

    pub fn initialize_service<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        lookup: Lookup,
    ) -> Result<InstanceId, ProfileError> {
        let state = RtusInstance {
            control_point: gatt::require(&TABLE, uuid::TIME_UPDATE_CONTROL_POINT, 0)?.value,
            update_state: TimeUpdateState::default(),
        };
        let id = self.instances.register(stack, lookup, &TABLE, state)?;
        info!("rtus: instance {} registered", id.0);
        Ok(id)
    }

    pub fn cleanup_service<S: HostStack + ?Sized>(&mut self, stack: &mut S, id: InstanceId) -> Result<(), ProfileError> {
        self.instances.unregister(stack, id).map(|_| ())
    }

    pub fn handle_gatt_event<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        event: &GattEvent<'_>,
    ) -> Result<Dispatch<(InstanceId, RtusEvent)>, StackError> {
        let Some((id, inst)) = self.instances.by_service(event.service()) else {
            return Ok(Dispatch::Ignored);
        };
        let state = &inst.state;
        match event {
            GattEvent::Read(req) => {
                // Time Update State is the only readable value
                if let Some(ReadTarget::Value(_)) = gatt::serve_read(stack, &TABLE, req, false)? {
                    gatt::respond_value(stack, req, &state.update_state.encode())?;
                }
                Ok(Dispatch::Handled)
            }
            GattEvent::Write(req) => match gatt::serve_write(stack, &TABLE, req, false)? {
                Some(WriteTarget::Value(offset)) if offset == state.control_point => {
                    let decoded = match req.value {
                        [b] => TimeUpdateCommand::try_from(*b),
                        _ => Err(AttError::InvalidAttributeValueLength),
                    };
                    match decoded {
                        Ok(command) => {
                            gatt::acknowledge(stack, req)?;
                            Ok(Dispatch::Event((id, RtusEvent::Command { conn: req.conn, command })))
                        }
                        Err(e) => {
                            gatt::refuse(stack, req, e)?;
                            Ok(Dispatch::Handled)
                        }
                    }
                }
                Some(_) => {
                    gatt::refuse(stack, req, AttError::WriteNotPermitted)?;
                    Ok(Dispatch::Handled)
                }
                None => Ok(Dispatch::Handled),
            },
            GattEvent::Confirmation { .. } => Ok(Dispatch::Handled),
        }
    }

    pub fn state<S: HostStack + ?Sized>(&self, stack: &S, id: InstanceId) -> Result<TimeUpdateState, ProfileError> {
        Ok(self.instances.get(stack.stack_id(), id)?.state.update_state)
    }

    /// Update the Time Update State served on reads.
    pub fn set_state<S: HostStack + ?Sized>(
        &mut self,
        stack: &S,
        id: InstanceId,
        state: TimeUpdateState,
    ) -> Result<(), ProfileError> {
        self.instances.get_mut(stack.stack_id(), id)?.state.update_state = state;
        Ok(())
    }
}

impl Default for ReferenceTimeUpdateProfile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_point_commands() {
        assert_eq!(TimeUpdateCommand::try_from(1), Ok(TimeUpdateCommand::GetReferenceUpdate));
        assert_eq!(TimeUpdateCommand::try_from(2), Ok(TimeUpdateCommand::CancelReferenceUpdate));
        assert_eq!(TimeUpdateCommand::try_from(0), Err(AttError::ValueNotAllowed));
    }

    #[test]
    fn state_after_reset() {
        assert_eq!(TimeUpdateState::default().encode(), [0, 5]);
    }

    #[test]
    fn control_point_is_write_only() {
        let cp = gatt::characteristic(&TABLE, uuid::TIME_UPDATE_CONTROL_POINT, 0).unwrap();
        assert_eq!(cp.value, 2);
        assert!(!cp.properties.contains(Properties::READ));
    }
}
