//! Battery Service (0x180F).

use crate::ble::stack::{AttributeRef, GattEvent, HostStack, ServiceId, TransactionId};
use crate::ble::ConnHandle;
use crate::error::{ProfileError, StackError};
use crate::gatt::{
    self, uuid, Access, Attribute, CharacteristicOffsets, ClientConfig, Dispatch, Properties, ReadTarget, WriteTarget,
};

pub static TABLE: [Attribute; 4] = [
    Attribute::PrimaryService(uuid::BATTERY_SERVICE),
    Attribute::characteristic(uuid::BATTERY_LEVEL, Properties::READ.union(Properties::NOTIFY)),
    Attribute::dynamic(uuid::BATTERY_LEVEL, Access::Open),
    Attribute::Cccd,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BatteryEvent {
    /// The client reads the Battery Level CCCD; answer with
    /// [`BatteryService::respond_client_configuration`].
    ReadClientConfiguration { conn: ConnHandle, txn: TransactionId },
    ClientConfigurationChanged { conn: ConnHandle, config: ClientConfig },
}

pub struct BatteryService {
    service: ServiceId,
    level_char: CharacteristicOffsets,
    level: u8,
}

impl BatteryService {
    pub fn register<S: HostStack + ?Sized>(stack: &mut S) -> Result<Self, ProfileError> {
        let level_char = gatt::require(&TABLE, uuid::BATTERY_LEVEL, 0)?;
        let service = stack.register_service(&TABLE)?;
        Ok(Self {
            service,
            level_char,
            level: 100,
        })
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Store `percent` (clamped to 100) as the value served on reads.
    pub fn set_level(&mut self, percent: u8) {
        self.level = percent.min(100);
    }

    pub fn handle_gatt_event<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        event: &GattEvent<'_>,
    ) -> Result<Dispatch<BatteryEvent>, StackError> {
        if event.service() != self.service {
            return Ok(Dispatch::Ignored);
        }
        match event {
            GattEvent::Read(req) => match gatt::serve_read(stack, &TABLE, req, false)? {
                Some(ReadTarget::Value(_)) => {
                    gatt::respond_value(stack, req, &[self.level])?;
                    Ok(Dispatch::Handled)
                }
                Some(ReadTarget::Cccd(..)) => Ok(Dispatch::Event(BatteryEvent::ReadClientConfiguration {
                    conn: req.conn,
                    txn: req.txn,
                })),
                None => Ok(Dispatch::Handled),
            },
            GattEvent::Write(req) => match gatt::serve_write(stack, &TABLE, req, false)? {
                Some(WriteTarget::Cccd(_, config)) => Ok(Dispatch::Event(BatteryEvent::ClientConfigurationChanged {
                    conn: req.conn,
                    config,
                })),
                // no writable values
                Some(WriteTarget::Value(_)) | None => Ok(Dispatch::Handled),
            },
            GattEvent::Confirmation { .. } => Ok(Dispatch::Handled),
        }
    }

    pub fn respond_client_configuration<S: HostStack + ?Sized>(
        &self,
        stack: &mut S,
        txn: TransactionId,
        config: ClientConfig,
    ) -> Result<(), StackError> {
        stack.read_response(txn, &config.to_le_bytes())
    }

    /// Notify the stored level.
    pub fn notify<S: HostStack + ?Sized>(&self, stack: &mut S, conn: ConnHandle) -> Result<(), StackError> {
        let attribute = AttributeRef {
            service: self.service,
            offset: self.level_char.value,
        };
        stack.notify(conn, attribute, &[self.level])
    }
}
