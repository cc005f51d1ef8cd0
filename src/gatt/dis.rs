//! Device Information Service (0x180A). Every value is fixed at build time.

use crate::ble::stack::{GattEvent, HostStack, ServiceId};
use crate::config;
use crate::error::{ProfileError, StackError};
use crate::gatt::{self, uuid, Access, Attribute, Dispatch, Properties};

/// PnP ID: vendor id source, vendor id, product id, product version (LE).
pub const PNP_ID: [u8; 7] = [
    config::PNP_VENDOR_ID_SOURCE,
    config::PNP_VENDOR_ID as u8,
    (config::PNP_VENDOR_ID >> 8) as u8,
    config::PNP_PRODUCT_ID as u8,
    (config::PNP_PRODUCT_ID >> 8) as u8,
    config::PNP_PRODUCT_VERSION as u8,
    (config::PNP_PRODUCT_VERSION >> 8) as u8,
];

pub static TABLE: [Attribute; 11] = [
    Attribute::PrimaryService(uuid::DEVICE_INFORMATION),
    Attribute::characteristic(uuid::MANUFACTURER_NAME_STRING, Properties::READ),
    Attribute::fixed(
        uuid::MANUFACTURER_NAME_STRING,
        config::DIS_MANUFACTURER_NAME.as_bytes(),
        Access::Open,
    ),
    Attribute::characteristic(uuid::MODEL_NUMBER_STRING, Properties::READ),
    Attribute::fixed(uuid::MODEL_NUMBER_STRING, config::DIS_MODEL_NUMBER.as_bytes(), Access::Open),
    Attribute::characteristic(uuid::SERIAL_NUMBER_STRING, Properties::READ),
    Attribute::fixed(uuid::SERIAL_NUMBER_STRING, config::DIS_SERIAL_NUMBER.as_bytes(), Access::Open),
    Attribute::characteristic(uuid::FIRMWARE_REVISION_STRING, Properties::READ),
    Attribute::fixed(
        uuid::FIRMWARE_REVISION_STRING,
        config::DIS_FIRMWARE_REVISION.as_bytes(),
        Access::Open,
    ),
    Attribute::characteristic(uuid::PNP_ID, Properties::READ),
    Attribute::fixed(uuid::PNP_ID, &PNP_ID, Access::Open),
];

pub struct DeviceInformationService {
    service: ServiceId,
}

impl DeviceInformationService {
    pub fn register<S: HostStack + ?Sized>(stack: &mut S) -> Result<Self, ProfileError> {
        let service = stack.register_service(&TABLE)?;
        Ok(Self { service })
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    /// Reads are answered from the table; writes are refused.
    pub fn handle_gatt_event<S: HostStack + ?Sized>(
        &self,
        stack: &mut S,
        event: &GattEvent<'_>,
    ) -> Result<Dispatch<()>, StackError> {
        if event.service() != self.service {
            return Ok(Dispatch::Ignored);
        }
        match event {
            GattEvent::Read(req) => {
                gatt::serve_read(stack, &TABLE, req, false)?;
            }
            GattEvent::Write(req) => {
                gatt::serve_write(stack, &TABLE, req, false)?;
            }
            GattEvent::Confirmation { .. } => {}
        }
        Ok(Dispatch::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pnp_id_is_little_endian() {
        assert_eq!(PNP_ID, [0x02, 0x09, 0x12, 0x01, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn every_characteristic_has_a_fixed_value() {
        for u in [
            uuid::MANUFACTURER_NAME_STRING,
            uuid::MODEL_NUMBER_STRING,
            uuid::SERIAL_NUMBER_STRING,
            uuid::FIRMWARE_REVISION_STRING,
            uuid::PNP_ID,
        ] {
            let c = gatt::characteristic(&TABLE, u, 0).unwrap();
            assert!(matches!(
                TABLE[usize::from(c.value)],
                Attribute::Value {
                    source: gatt::ValueSource::Static(_),
                    ..
                }
            ));
            assert_eq!(c.cccd, None);
        }
    }
}
