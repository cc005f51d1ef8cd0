//! HID Service (0x1812) for a single keyboard.
//!
//! One input and one output report (no report ids) plus the boot keyboard
//! characteristics, so hosts that switch to boot protocol keep working.

use crate::ble::stack::{AttributeRef, GattEvent, HostStack, ServiceId, TransactionId, WriteRequest};
use crate::ble::ConnHandle;
use crate::error::{AttError, ProfileError, StackError};
use crate::gatt::{
    self, uuid, Access, Attribute, CharacteristicOffsets, ClientConfig, Dispatch, Properties, ReadTarget, WriteTarget,
};
use crate::hid::keyboard::{KeyboardReport, KEYBOARD_REPORT_DESCRIPTOR, KEYBOARD_REPORT_SIZE};

/// bcdHID 1.11, country code 0, flags: normally connectable.
pub const HID_INFORMATION: [u8; 4] = [0x11, 0x01, 0x00, 0x02];

const REPORT_TYPE_INPUT: u8 = 0x01;
const REPORT_TYPE_OUTPUT: u8 = 0x02;

pub static TABLE: [Attribute; 21] = [
    Attribute::PrimaryService(uuid::HUMAN_INTERFACE_DEVICE),
    Attribute::characteristic(uuid::HID_INFORMATION, Properties::READ),
    Attribute::fixed(uuid::HID_INFORMATION, &HID_INFORMATION, Access::Open),
    Attribute::characteristic(uuid::REPORT_MAP, Properties::READ),
    Attribute::fixed(uuid::REPORT_MAP, KEYBOARD_REPORT_DESCRIPTOR, Access::Open),
    Attribute::characteristic(
        uuid::PROTOCOL_MODE,
        Properties::READ.union(Properties::WRITE_WITHOUT_RESPONSE),
    ),
    Attribute::dynamic(uuid::PROTOCOL_MODE, Access::Encrypted),
    // Input report
    Attribute::characteristic(uuid::REPORT, Properties::READ.union(Properties::NOTIFY)),
    Attribute::dynamic(uuid::REPORT, Access::Encrypted),
    Attribute::Cccd,
    Attribute::Descriptor {
        uuid: uuid::REPORT_REFERENCE,
        value: &[0x00, REPORT_TYPE_INPUT],
    },
    // Output report (keyboard LEDs)
    Attribute::characteristic(
        uuid::REPORT,
        Properties::READ
            .union(Properties::WRITE)
            .union(Properties::WRITE_WITHOUT_RESPONSE),
    ),
    Attribute::dynamic(uuid::REPORT, Access::Encrypted),
    Attribute::Descriptor {
        uuid: uuid::REPORT_REFERENCE,
        value: &[0x00, REPORT_TYPE_OUTPUT],
    },
    Attribute::characteristic(
        uuid::BOOT_KEYBOARD_INPUT_REPORT,
        Properties::READ.union(Properties::NOTIFY),
    ),
    Attribute::dynamic(uuid::BOOT_KEYBOARD_INPUT_REPORT, Access::Encrypted),
    Attribute::Cccd,
    Attribute::characteristic(
        uuid::BOOT_KEYBOARD_OUTPUT_REPORT,
        Properties::READ
            .union(Properties::WRITE)
            .union(Properties::WRITE_WITHOUT_RESPONSE),
    ),
    Attribute::dynamic(uuid::BOOT_KEYBOARD_OUTPUT_REPORT, Access::Encrypted),
    Attribute::characteristic(uuid::HID_CONTROL_POINT, Properties::WRITE_WITHOUT_RESPONSE),
    Attribute::dynamic(uuid::HID_CONTROL_POINT, Access::Open),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ProtocolMode {
    Boot = 0x00,
    #[default]
    Report = 0x01,
}

impl TryFrom<u8> for ProtocolMode {
    type Error = AttError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ProtocolMode::Boot),
            0x01 => Ok(ProtocolMode::Report),
            _ => Err(AttError::ValueNotAllowed),
        }
    }
}

/// Which of the two keyboard input characteristics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputReport {
    Boot,
    Report,
}

impl From<ProtocolMode> for InputReport {
    fn from(mode: ProtocolMode) -> Self {
        match mode {
            ProtocolMode::Boot => InputReport::Boot,
            ProtocolMode::Report => InputReport::Report,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidEvent {
    /// Answer with [`HidService::respond_client_configuration`].
    ReadClientConfiguration {
        conn: ConnHandle,
        txn: TransactionId,
        report: InputReport,
    },
    ClientConfigurationChanged {
        conn: ConnHandle,
        report: InputReport,
        config: ClientConfig,
    },
    ProtocolModeChanged(ProtocolMode),
    /// The host wrote the LED output report.
    LedsChanged(u8),
    Suspend,
    ExitSuspend,
}

pub struct HidService {
    service: ServiceId,
    protocol_mode_char: CharacteristicOffsets,
    input_char: CharacteristicOffsets,
    output_char: CharacteristicOffsets,
    boot_input_char: CharacteristicOffsets,
    boot_output_char: CharacteristicOffsets,
    control_point_char: CharacteristicOffsets,
    protocol_mode: ProtocolMode,
    input_report: KeyboardReport,
    output_report: u8,
}

impl HidService {
    pub fn register<S: HostStack + ?Sized>(stack: &mut S) -> Result<Self, ProfileError> {
        let protocol_mode_char = gatt::require(&TABLE, uuid::PROTOCOL_MODE, 0)?;
        let input_char = gatt::require(&TABLE, uuid::REPORT, 0)?;
        let output_char = gatt::require(&TABLE, uuid::REPORT, 1)?;
        let boot_input_char = gatt::require(&TABLE, uuid::BOOT_KEYBOARD_INPUT_REPORT, 0)?;
        let boot_output_char = gatt::require(&TABLE, uuid::BOOT_KEYBOARD_OUTPUT_REPORT, 0)?;
        let control_point_char = gatt::require(&TABLE, uuid::HID_CONTROL_POINT, 0)?;
        let service = stack.register_service(&TABLE)?;
        Ok(Self {
            service,
            protocol_mode_char,
            input_char,
            output_char,
            boot_input_char,
            boot_output_char,
            control_point_char,
            protocol_mode: ProtocolMode::default(),
            input_report: KeyboardReport::default(),
            output_report: 0,
        })
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn protocol_mode(&self) -> ProtocolMode {
        self.protocol_mode
    }

    pub fn input_report(&self) -> &KeyboardReport {
        &self.input_report
    }

    pub fn output_report(&self) -> u8 {
        self.output_report
    }

    /// Back to report protocol, as after every new connection.
    pub fn reset(&mut self) {
        self.protocol_mode = ProtocolMode::default();
        self.input_report = KeyboardReport::default();
    }

    fn input_for(&self, value_offset: u16) -> Option<InputReport> {
        if value_offset == self.input_char.value {
            Some(InputReport::Report)
        } else if value_offset == self.boot_input_char.value {
            Some(InputReport::Boot)
        } else {
            None
        }
    }

    pub fn handle_gatt_event<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        event: &GattEvent<'_>,
        encrypted: bool,
    ) -> Result<Dispatch<HidEvent>, StackError> {
        if event.service() != self.service {
            return Ok(Dispatch::Ignored);
        }
        match event {
            GattEvent::Read(req) => match gatt::serve_read(stack, &TABLE, req, encrypted)? {
                Some(ReadTarget::Cccd(_, value)) => match self.input_for(value) {
                    Some(report) => Ok(Dispatch::Event(HidEvent::ReadClientConfiguration {
                        conn: req.conn,
                        txn: req.txn,
                        report,
                    })),
                    None => {
                        gatt::reject(stack, req.txn, req.attribute_offset, AttError::InvalidHandle)?;
                        Ok(Dispatch::Handled)
                    }
                },
                Some(ReadTarget::Value(offset)) => {
                    let mut report = [0u8; KEYBOARD_REPORT_SIZE];
                    let value: &[u8] = if offset == self.protocol_mode_char.value {
                        report[0] = self.protocol_mode as u8;
                        &report[..1]
                    } else if self.input_for(offset).is_some() {
                        self.input_report.serialize(&mut report);
                        &report
                    } else {
                        report[0] = self.output_report;
                        &report[..1]
                    };
                    gatt::respond_value(stack, req, value)?;
                    Ok(Dispatch::Handled)
                }
                None => Ok(Dispatch::Handled),
            },
            GattEvent::Write(req) => match gatt::serve_write(stack, &TABLE, req, encrypted)? {
                Some(WriteTarget::Cccd(value, config)) => Ok(match self.input_for(value) {
                    Some(report) => Dispatch::Event(HidEvent::ClientConfigurationChanged {
                        conn: req.conn,
                        report,
                        config,
                    }),
                    None => Dispatch::Handled,
                }),
                Some(WriteTarget::Value(offset)) => self.write_value(stack, req, offset),
                None => Ok(Dispatch::Handled),
            },
            GattEvent::Confirmation { .. } => Ok(Dispatch::Handled),
        }
    }

    fn write_value<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        req: &WriteRequest<'_>,
        offset: u16,
    ) -> Result<Dispatch<HidEvent>, StackError> {
        let event = if offset == self.protocol_mode_char.value {
            match req.value {
                [mode] => ProtocolMode::try_from(*mode).map(|mode| {
                    self.protocol_mode = mode;
                    HidEvent::ProtocolModeChanged(mode)
                }),
                _ => Err(AttError::InvalidAttributeValueLength),
            }
        } else if offset == self.output_char.value || offset == self.boot_output_char.value {
            match req.value.first() {
                Some(leds) => {
                    self.output_report = *leds;
                    Ok(HidEvent::LedsChanged(*leds))
                }
                None => Err(AttError::InvalidAttributeValueLength),
            }
        } else if offset == self.control_point_char.value {
            match req.value {
                [0x00] => Ok(HidEvent::Suspend),
                [0x01] => Ok(HidEvent::ExitSuspend),
                _ => Err(AttError::ValueNotAllowed),
            }
        } else {
            Err(AttError::WriteNotPermitted)
        };

        match event {
            Ok(event) => {
                gatt::acknowledge(stack, req)?;
                Ok(Dispatch::Event(event))
            }
            Err(e) => {
                gatt::refuse(stack, req, e)?;
                Ok(Dispatch::Handled)
            }
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

    /// Store `report` and notify it on the input characteristic of the
    /// current protocol mode.
    pub fn notify_input<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        conn: ConnHandle,
        report: KeyboardReport,
    ) -> Result<(), StackError> {
        self.input_report = report;
        let offset = match InputReport::from(self.protocol_mode) {
            InputReport::Boot => self.boot_input_char.value,
            InputReport::Report => self.input_char.value,
        };
        let mut bytes = [0u8; KEYBOARD_REPORT_SIZE];
        report.serialize(&mut bytes);
        stack.notify(
            conn,
            AttributeRef {
                service: self.service,
                offset,
            },
            &bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_offsets() {
        let input = gatt::characteristic(&TABLE, uuid::REPORT, 0).unwrap();
        assert_eq!((input.value, input.cccd), (8, Some(9)));
        let output = gatt::characteristic(&TABLE, uuid::REPORT, 1).unwrap();
        assert_eq!((output.value, output.cccd), (12, None));
        let boot = gatt::characteristic(&TABLE, uuid::BOOT_KEYBOARD_INPUT_REPORT, 0).unwrap();
        assert_eq!((boot.value, boot.cccd), (15, Some(16)));
    }

    #[test]
    fn cccds_belong_to_input_reports() {
        assert_eq!(gatt::owning_characteristic(&TABLE, 9).map(|c| c.0), Some(8));
        assert_eq!(gatt::owning_characteristic(&TABLE, 16).map(|c| c.0), Some(15));
        // the report reference descriptor belongs to the input report too
        assert_eq!(gatt::owning_characteristic(&TABLE, 10).map(|c| c.0), Some(8));
    }

    #[test]
    fn protocol_mode_decode() {
        assert_eq!(ProtocolMode::try_from(0), Ok(ProtocolMode::Boot));
        assert_eq!(ProtocolMode::try_from(1), Ok(ProtocolMode::Report));
        assert_eq!(ProtocolMode::try_from(2), Err(AttError::ValueNotAllowed));
    }

    #[test]
    fn report_map_is_served_verbatim() {
        let map = gatt::characteristic(&TABLE, uuid::REPORT_MAP, 0).unwrap();
        assert_eq!(
            TABLE[usize::from(map.value)],
            Attribute::fixed(uuid::REPORT_MAP, KEYBOARD_REPORT_DESCRIPTOR, Access::Open)
        );
    }
}
