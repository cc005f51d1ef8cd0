//! Legacy advertising payload for the keyboard.

use heapless::Vec;

use crate::config::{ADV_INTERVAL_MAX, ADV_INTERVAL_MIN};
use crate::ble::stack::AdvertisingPayload;
use crate::gatt::Uuid16;

/// Legacy advertising PDU payload limit.
pub const MAX_ADV_DATA_LEN: usize = 31;

// AD types
const AD_FLAGS: u8 = 0x01;
const AD_UUID16_COMPLETE: u8 = 0x03;
const AD_SHORTENED_LOCAL_NAME: u8 = 0x08;
const AD_COMPLETE_LOCAL_NAME: u8 = 0x09;
const AD_APPEARANCE: u8 = 0x19;

// Flags
const LE_GENERAL_DISCOVERABLE: u8 = 0x02;
const BR_EDR_NOT_SUPPORTED: u8 = 0x04;

/// Advertising data did not fit even without the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvertisingOverflow;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdvertisingData {
    data: Vec<u8, MAX_ADV_DATA_LEN>,
}

impl AdvertisingData {
    /// Flags, appearance, `services` and as much of `name` as fits.
    ///
    /// A name that does not fit is cut and sent as a shortened local name.
    pub fn new(appearance: u16, services: &[Uuid16], name: &str) -> Result<Self, AdvertisingOverflow> {
        let mut data = Vec::new();
        push_field(&mut data, AD_FLAGS, &[LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED])?;
        push_field(&mut data, AD_APPEARANCE, &appearance.to_le_bytes())?;

        let mut uuids: Vec<u8, MAX_ADV_DATA_LEN> = Vec::new();
        for uuid in services {
            uuids
                .extend_from_slice(&uuid.0.to_le_bytes())
                .map_err(|_| AdvertisingOverflow)?;
        }
        if !uuids.is_empty() {
            push_field(&mut data, AD_UUID16_COMPLETE, &uuids)?;
        }

        let room = MAX_ADV_DATA_LEN.saturating_sub(data.len() + 2);
        let name = name.as_bytes();
        if name.len() <= room {
            push_field(&mut data, AD_COMPLETE_LOCAL_NAME, name)?;
        } else if room > 0 {
            push_field(&mut data, AD_SHORTENED_LOCAL_NAME, &name[..room])?;
        }

        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn payload(&self) -> AdvertisingPayload<'_> {
        AdvertisingPayload {
            data: &self.data,
            interval_min: ADV_INTERVAL_MIN,
            interval_max: ADV_INTERVAL_MAX,
        }
    }
}

fn push_field(buf: &mut Vec<u8, MAX_ADV_DATA_LEN>, ad_type: u8, value: &[u8]) -> Result<(), AdvertisingOverflow> {
    let len = u8::try_from(value.len() + 1).map_err(|_| AdvertisingOverflow)?;
    buf.push(len).map_err(|_| AdvertisingOverflow)?;
    buf.push(ad_type).map_err(|_| AdvertisingOverflow)?;
    buf.extend_from_slice(value).map_err(|_| AdvertisingOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::uuid;

    const SERVICES: [Uuid16; 3] = [uuid::HUMAN_INTERFACE_DEVICE, uuid::BATTERY_SERVICE, uuid::DEVICE_INFORMATION];

    #[test]
    fn keyboard_payload_layout() {
        let adv = AdvertisingData::new(0x03C1, &SERVICES, "BLE Password Keyboard").unwrap();
        let bytes = adv.as_bytes();
        assert_eq!(bytes.len(), MAX_ADV_DATA_LEN);
        assert_eq!(&bytes[..3], &[0x02, 0x01, 0x06]);
        assert_eq!(&bytes[3..7], &[0x03, 0x19, 0xC1, 0x03]);
        assert_eq!(&bytes[7..15], &[0x07, 0x03, 0x12, 0x18, 0x0F, 0x18, 0x0A, 0x18]);
        // shortened name fills the rest
        assert_eq!(bytes[15], 15);
        assert_eq!(bytes[16], 0x08);
        assert_eq!(&bytes[17..], b"BLE Password K");
    }

    #[test]
    fn short_name_is_sent_complete() {
        let adv = AdvertisingData::new(0x03C1, &SERVICES, "blepass").unwrap();
        let bytes = adv.as_bytes();
        assert_eq!(&bytes[15..17], &[8, 0x09]);
        assert_eq!(&bytes[17..], b"blepass");
    }

    #[test]
    fn payload_carries_interval_range() {
        let adv = AdvertisingData::new(0x03C1, &[], "x").unwrap();
        let p = adv.payload();
        assert_eq!(p.interval_min, ADV_INTERVAL_MIN);
        assert_eq!(p.interval_max, ADV_INTERVAL_MAX);
        assert_eq!(p.data, adv.as_bytes());
    }
}
