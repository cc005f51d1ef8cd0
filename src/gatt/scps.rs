//! Scan Parameters Service (0x1813).

use crate::ble::stack::{AttributeRef, GattEvent, HostStack, TransactionId};
use crate::ble::ConnHandle;
use crate::config::MAX_PROFILE_INSTANCES;
use crate::error::{AttError, ProfileError, StackError};
use crate::gatt::instance::{InstanceArena, InstanceId, Lookup};
use crate::gatt::{self, uuid, Access, Attribute, ClientConfig, Dispatch, Properties, ReadTarget, WriteTarget};

pub static TABLE: [Attribute; 6] = [
    Attribute::PrimaryService(uuid::SCAN_PARAMETERS),
    Attribute::characteristic(uuid::SCAN_INTERVAL_WINDOW, Properties::WRITE_WITHOUT_RESPONSE),
    Attribute::dynamic(uuid::SCAN_INTERVAL_WINDOW, Access::Open),
    Attribute::characteristic(uuid::SCAN_REFRESH, Properties::NOTIFY),
    Attribute::dynamic(uuid::SCAN_REFRESH, Access::Open),
    Attribute::Cccd,
];

/// The client wants fresh scan parameters.
const SERVER_REQUIRES_REFRESH: u8 = 0x00;

/// LE scan interval and window, in 0.625 ms units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanIntervalWindow {
    pub interval: u16,
    pub window: u16,
}

impl ScanIntervalWindow {
    const RANGE: core::ops::RangeInclusive<u16> = 0x0004..=0x4000;

    pub fn decode(bytes: &[u8]) -> Result<Self, AttError> {
        let [i0, i1, w0, w1] = *bytes else {
            return Err(AttError::InvalidAttributeValueLength);
        };
        let siw = Self {
            interval: u16::from_le_bytes([i0, i1]),
            window: u16::from_le_bytes([w0, w1]),
        };
        if !Self::RANGE.contains(&siw.interval) || !Self::RANGE.contains(&siw.window) || siw.window > siw.interval {
            return Err(AttError::ValueNotAllowed);
        }
        Ok(siw)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScpsEvent {
    ScanIntervalWindowChanged { conn: ConnHandle, value: ScanIntervalWindow },
    /// Answer with [`ScanParametersProfile::respond_client_configuration`].
    ReadClientConfiguration { conn: ConnHandle, txn: TransactionId },
    ClientConfigurationChanged { conn: ConnHandle, config: ClientConfig },
}

#[derive(Debug)]
struct ScpsInstance {
    interval_window: u16,
    refresh: u16,
}

pub struct ScanParametersProfile {
    instances: InstanceArena<ScpsInstance, MAX_PROFILE_INSTANCES>,
}

impl ScanParametersProfile {
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
        let state = ScpsInstance {
            interval_window: gatt::require(&TABLE, uuid::SCAN_INTERVAL_WINDOW, 0)?.value,
            refresh: gatt::require(&TABLE, uuid::SCAN_REFRESH, 0)?.value,
        };
        let id = self.instances.register(stack, lookup, &TABLE, state)?;
        info!("scps: instance {} registered", id.0);
        Ok(id)
    }

    pub fn cleanup_service<S: HostStack + ?Sized>(&mut self, stack: &mut S, id: InstanceId) -> Result<(), ProfileError> {
        self.instances.unregister(stack, id).map(|_| ())
    }

    pub fn handle_gatt_event<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        event: &GattEvent<'_>,
    ) -> Result<Dispatch<(InstanceId, ScpsEvent)>, StackError> {
        let Some((id, inst)) = self.instances.by_service(event.service()) else {
            return Ok(Dispatch::Ignored);
        };
        let state = &inst.state;
        let event = match event {
            GattEvent::Read(req) => match gatt::serve_read(stack, &TABLE, req, false)? {
                Some(ReadTarget::Cccd(..)) => ScpsEvent::ReadClientConfiguration {
                    conn: req.conn,
                    txn: req.txn,
                },
                Some(ReadTarget::Value(_)) | None => return Ok(Dispatch::Handled),
            },
            GattEvent::Write(req) => match gatt::serve_write(stack, &TABLE, req, false)? {
                Some(WriteTarget::Cccd(_, config)) => ScpsEvent::ClientConfigurationChanged { conn: req.conn, config },
                Some(WriteTarget::Value(offset)) if offset == state.interval_window => {
                    match ScanIntervalWindow::decode(req.value) {
                        Ok(value) => {
                            gatt::acknowledge(stack, req)?;
                            ScpsEvent::ScanIntervalWindowChanged { conn: req.conn, value }
                        }
                        Err(e) => {
                            gatt::refuse(stack, req, e)?;
                            return Ok(Dispatch::Handled);
                        }
                    }
                }
                Some(WriteTarget::Value(_)) => {
                    gatt::refuse(stack, req, AttError::WriteNotPermitted)?;
                    return Ok(Dispatch::Handled);
                }
                None => return Ok(Dispatch::Handled),
            },
            GattEvent::Confirmation { .. } => return Ok(Dispatch::Handled),
        };
        Ok(Dispatch::Event((id, event)))
    }

    pub fn respond_client_configuration<S: HostStack + ?Sized>(
        &self,
        stack: &mut S,
        id: InstanceId,
        txn: TransactionId,
        config: ClientConfig,
    ) -> Result<(), ProfileError> {
        self.instances.get(stack.stack_id(), id)?;
        Ok(stack.read_response(txn, &config.to_le_bytes())?)
    }

    /// Ask the client to write its scan parameters again.
    pub fn notify_scan_refresh<S: HostStack + ?Sized>(
        &self,
        stack: &mut S,
        id: InstanceId,
        conn: ConnHandle,
    ) -> Result<(), ProfileError> {
        let inst = self.instances.get(stack.stack_id(), id)?;
        let attribute = AttributeRef {
            service: inst.service,
            offset: inst.state.refresh,
        };
        Ok(stack.notify(conn, attribute, &[SERVER_REQUIRES_REFRESH])?)
    }
}

impl Default for ScanParametersProfile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_window_bounds() {
        let ok = ScanIntervalWindow::decode(&[0x10, 0x00, 0x08, 0x00]).unwrap();
        assert_eq!((ok.interval, ok.window), (0x10, 0x08));
        // window larger than interval
        assert_eq!(
            ScanIntervalWindow::decode(&[0x08, 0x00, 0x10, 0x00]),
            Err(AttError::ValueNotAllowed)
        );
        assert_eq!(
            ScanIntervalWindow::decode(&[0x01, 0x40, 0x04, 0x00]),
            Err(AttError::ValueNotAllowed)
        );
        assert_eq!(
            ScanIntervalWindow::decode(&[0x10, 0x00, 0x08]),
            Err(AttError::InvalidAttributeValueLength)
        );
    }
}
