//! GATT server building blocks shared by every service.
//!
//! A service is a `'static` table of [`Attribute`]s registered with the
//! stack as a whole. Read and write requests identify their target by its
//! offset in that table (declarations included). Services never hard-code
//! those offsets: they look them up once with [`characteristic`] when the
//! service is registered, so optional characteristics can be compiled in
//! or out without breaking dispatch.

pub mod bas;
pub mod cts;
pub mod dis;
pub mod gls;
pub mod hids;
pub mod instance;
pub mod rtus;
pub mod scps;

use bitflags::bitflags;

use crate::ble::stack::{HostStack, ReadRequest, TransactionId, WriteKind, WriteRequest};
use crate::config::ATT_DEFAULT_MTU;
use crate::error::{AttError, StackError};

/// 16-bit Bluetooth SIG UUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uuid16(pub u16);

/// Assigned numbers used by the services in this crate.
pub mod uuid {
    use super::Uuid16;

    // Services
    pub const CURRENT_TIME_SERVICE: Uuid16 = Uuid16(0x1805);
    pub const REFERENCE_TIME_UPDATE: Uuid16 = Uuid16(0x1806);
    pub const GLUCOSE: Uuid16 = Uuid16(0x1808);
    pub const DEVICE_INFORMATION: Uuid16 = Uuid16(0x180A);
    pub const BATTERY_SERVICE: Uuid16 = Uuid16(0x180F);
    pub const HUMAN_INTERFACE_DEVICE: Uuid16 = Uuid16(0x1812);
    pub const SCAN_PARAMETERS: Uuid16 = Uuid16(0x1813);

    // Characteristics
    pub const LOCAL_TIME_INFORMATION: Uuid16 = Uuid16(0x2A0F);
    pub const REFERENCE_TIME_INFORMATION: Uuid16 = Uuid16(0x2A14);
    pub const TIME_UPDATE_CONTROL_POINT: Uuid16 = Uuid16(0x2A16);
    pub const TIME_UPDATE_STATE: Uuid16 = Uuid16(0x2A17);
    pub const GLUCOSE_MEASUREMENT: Uuid16 = Uuid16(0x2A18);
    pub const BATTERY_LEVEL: Uuid16 = Uuid16(0x2A19);
    pub const BOOT_KEYBOARD_INPUT_REPORT: Uuid16 = Uuid16(0x2A22);
    pub const MODEL_NUMBER_STRING: Uuid16 = Uuid16(0x2A24);
    pub const SERIAL_NUMBER_STRING: Uuid16 = Uuid16(0x2A25);
    pub const FIRMWARE_REVISION_STRING: Uuid16 = Uuid16(0x2A26);
    pub const MANUFACTURER_NAME_STRING: Uuid16 = Uuid16(0x2A29);
    pub const CURRENT_TIME: Uuid16 = Uuid16(0x2A2B);
    pub const SCAN_REFRESH: Uuid16 = Uuid16(0x2A31);
    pub const BOOT_KEYBOARD_OUTPUT_REPORT: Uuid16 = Uuid16(0x2A32);
    pub const GLUCOSE_MEASUREMENT_CONTEXT: Uuid16 = Uuid16(0x2A34);
    pub const HID_INFORMATION: Uuid16 = Uuid16(0x2A4A);
    pub const REPORT_MAP: Uuid16 = Uuid16(0x2A4B);
    pub const HID_CONTROL_POINT: Uuid16 = Uuid16(0x2A4C);
    pub const REPORT: Uuid16 = Uuid16(0x2A4D);
    pub const PROTOCOL_MODE: Uuid16 = Uuid16(0x2A4E);
    pub const SCAN_INTERVAL_WINDOW: Uuid16 = Uuid16(0x2A4F);
    pub const PNP_ID: Uuid16 = Uuid16(0x2A50);
    pub const GLUCOSE_FEATURE: Uuid16 = Uuid16(0x2A51);
    pub const RECORD_ACCESS_CONTROL_POINT: Uuid16 = Uuid16(0x2A52);

    // Descriptors
    pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid16 = Uuid16(0x2902);
    pub const REPORT_REFERENCE: Uuid16 = Uuid16(0x2908);
}

bitflags! {
    /// Characteristic properties as carried in the declaration.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Properties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

bitflags! {
    /// Client Characteristic Configuration descriptor value.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ClientConfig: u16 {
        const NOTIFY = 0x0001;
        const INDICATE = 0x0002;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Properties {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Properties({=u8:#04x})", self.bits())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ClientConfig {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ClientConfig({=u16:#06x})", self.bits())
    }
}

impl ClientConfig {
    /// The configuration bits a characteristic with `props` can honour.
    pub fn supported_by(props: Properties) -> Self {
        let mut mask = ClientConfig::empty();
        if props.contains(Properties::NOTIFY) {
            mask |= ClientConfig::NOTIFY;
        }
        if props.contains(Properties::INDICATE) {
            mask |= ClientConfig::INDICATE;
        }
        mask
    }

    /// Decode a CCCD write: a bare flag byte or the full 16-bit word.
    ///
    /// Unknown bits are dropped.
    pub fn decode(value: &[u8]) -> Result<Self, AttError> {
        let raw = match *value {
            [b] => u16::from(b),
            [lo, hi] => u16::from_le_bytes([lo, hi]),
            _ => return Err(AttError::InvalidAttributeValueLength),
        };
        Ok(ClientConfig::from_bits_truncate(raw))
    }

    pub fn to_le_bytes(self) -> [u8; 2] {
        self.bits().to_le_bytes()
    }
}

/// Access requirement on a characteristic value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Access {
    Open,
    /// Only over an encrypted link.
    Encrypted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValueSource {
    /// Served straight from the table.
    Static(&'static [u8]),
    /// Owned by the service; every access is dispatched.
    Dynamic,
}

/// One entry of a service table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Attribute {
    PrimaryService(Uuid16),
    Characteristic { uuid: Uuid16, properties: Properties },
    Value { uuid: Uuid16, source: ValueSource, access: Access },
    /// Client Characteristic Configuration of the preceding value.
    Cccd,
    Descriptor { uuid: Uuid16, value: &'static [u8] },
}

impl Attribute {
    pub const fn characteristic(uuid: Uuid16, properties: Properties) -> Self {
        Attribute::Characteristic { uuid, properties }
    }

    pub const fn dynamic(uuid: Uuid16, access: Access) -> Self {
        Attribute::Value {
            uuid,
            source: ValueSource::Dynamic,
            access,
        }
    }

    pub const fn fixed(uuid: Uuid16, value: &'static [u8], access: Access) -> Self {
        Attribute::Value {
            uuid,
            source: ValueSource::Static(value),
            access,
        }
    }
}

/// Where a characteristic sits in its service table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicOffsets {
    pub value: u16,
    pub cccd: Option<u16>,
    pub properties: Properties,
}

/// Locate the `nth` (0-based) characteristic with `uuid` in `table`.
pub fn characteristic(table: &[Attribute], uuid: Uuid16, nth: usize) -> Option<CharacteristicOffsets> {
    let decl = table
        .iter()
        .enumerate()
        .filter(|(_, a)| matches!(a, Attribute::Characteristic { uuid: u, .. } if *u == uuid))
        .nth(nth)?
        .0;
    let Attribute::Characteristic { properties, .. } = table[decl] else {
        return None;
    };
    let value = decl + 1;
    if !matches!(table.get(value), Some(Attribute::Value { .. })) {
        return None;
    }
    let cccd = table[value + 1..]
        .iter()
        .take_while(|a| matches!(a, Attribute::Cccd | Attribute::Descriptor { .. }))
        .position(|a| matches!(a, Attribute::Cccd))
        .map(|p| value + 1 + p);
    Some(CharacteristicOffsets {
        value: value as u16,
        cccd: cccd.map(|c| c as u16),
        properties,
    })
}

/// Like [`characteristic`] for a characteristic every table must carry.
pub(crate) fn require(
    table: &[Attribute],
    uuid: Uuid16,
    nth: usize,
) -> Result<CharacteristicOffsets, crate::error::ProfileError> {
    characteristic(table, uuid, nth).ok_or(crate::error::ProfileError::InvalidParameter)
}

pub fn attribute_at(table: &[Attribute], offset: u16) -> Option<&Attribute> {
    table.get(usize::from(offset))
}

/// Bytes of a static value to return for a read at `value_offset`.
///
/// A read blob on a value that fits a single response is rejected with
/// `AttributeNotLong`; one past the end with `InvalidOffset`.
pub fn read_slice(value: &[u8], value_offset: u16, mtu: u16) -> Result<&[u8], AttError> {
    let chunk = usize::from(mtu.saturating_sub(1));
    let offset = usize::from(value_offset);
    if offset == 0 {
        return Ok(&value[..value.len().min(chunk)]);
    }
    if value.len() <= chunk {
        return Err(AttError::AttributeNotLong);
    }
    if offset > value.len() {
        return Err(AttError::InvalidOffset);
    }
    Ok(&value[offset..value.len().min(offset + chunk)])
}

/// Reject long or queued writes.
pub fn check_single_write(req: &WriteRequest<'_>) -> Result<(), AttError> {
    if req.value_offset != 0 || req.delayed {
        return Err(AttError::AttributeNotLong);
    }
    Ok(())
}

/// Value offset and properties of the characteristic that `offset` (its
/// value or one of its descriptors) belongs to.
pub fn owning_characteristic(table: &[Attribute], offset: u16) -> Option<(u16, Properties)> {
    let upto = usize::from(offset);
    if upto >= table.len() {
        return None;
    }
    table[..=upto]
        .iter()
        .enumerate()
        .rev()
        .take_while(|(_, a)| !matches!(a, Attribute::PrimaryService(_)))
        .find_map(|(i, a)| match a {
            Attribute::Characteristic { properties, .. } => Some(((i + 1) as u16, *properties)),
            _ => None,
        })
}

/// What a read request needs from the owning service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReadTarget {
    /// Value owned by the service, at this offset.
    Value(u16),
    /// CCCD at this offset, configuring the value at the second offset.
    Cccd(u16, u16),
}

/// Answer everything a read can be answered with from the table alone.
///
/// Returns `None` once a response (value or error) went out.
pub(crate) fn serve_read<S: HostStack + ?Sized>(
    stack: &mut S,
    table: &[Attribute],
    req: &ReadRequest,
    encrypted: bool,
) -> Result<Option<ReadTarget>, StackError> {
    let offset = req.attribute_offset;
    let Some(attribute) = attribute_at(table, offset) else {
        reject(stack, req.txn, offset, AttError::InvalidHandle)?;
        return Ok(None);
    };
    match *attribute {
        Attribute::Value { source, access, .. } => {
            let props = owning_characteristic(table, offset).map_or(Properties::empty(), |(_, p)| p);
            if !props.contains(Properties::READ) {
                reject(stack, req.txn, offset, AttError::ReadNotPermitted)?;
                return Ok(None);
            }
            if access == Access::Encrypted && !encrypted {
                reject(stack, req.txn, offset, AttError::InsufficientEncryption)?;
                return Ok(None);
            }
            match source {
                ValueSource::Static(value) => {
                    respond_value(stack, req, value)?;
                    Ok(None)
                }
                ValueSource::Dynamic => Ok(Some(ReadTarget::Value(offset))),
            }
        }
        Attribute::Cccd => {
            if req.value_offset != 0 {
                reject(stack, req.txn, offset, AttError::AttributeNotLong)?;
                return Ok(None);
            }
            match owning_characteristic(table, offset) {
                Some((value, _)) => Ok(Some(ReadTarget::Cccd(offset, value))),
                None => {
                    reject(stack, req.txn, offset, AttError::InvalidHandle)?;
                    Ok(None)
                }
            }
        }
        Attribute::Descriptor { value, .. } => {
            respond_value(stack, req, value)?;
            Ok(None)
        }
        // declarations are served by the stack itself
        Attribute::PrimaryService(_) | Attribute::Characteristic { .. } => {
            reject(stack, req.txn, offset, AttError::ReadNotPermitted)?;
            Ok(None)
        }
    }
}

/// What a write request needs from the owning service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteTarget {
    /// Value owned by the service, at this offset. The service must
    /// acknowledge or reject.
    Value(u16),
    /// A CCCD write already decoded, masked and acknowledged, configuring
    /// the value at this offset.
    Cccd(u16, ClientConfig),
}

/// Validate a write against the table.
///
/// Returns `None` once a response went out and nothing is left to do.
pub(crate) fn serve_write<S: HostStack + ?Sized>(
    stack: &mut S,
    table: &[Attribute],
    req: &WriteRequest<'_>,
    encrypted: bool,
) -> Result<Option<WriteTarget>, StackError> {
    let offset = req.attribute_offset;
    if let Err(e) = check_single_write(req) {
        refuse(stack, req, e)?;
        return Ok(None);
    }
    let owner = owning_characteristic(table, offset);
    match attribute_at(table, offset) {
        Some(Attribute::Cccd) => {
            let Some((value, props)) = owner else {
                refuse(stack, req, AttError::InvalidHandle)?;
                return Ok(None);
            };
            Ok(accept_cccd_write(stack, req, props)?.map(|config| WriteTarget::Cccd(value, config)))
        }
        Some(Attribute::Value {
            source: ValueSource::Dynamic,
            access,
            ..
        }) => {
            let props = owner.map_or(Properties::empty(), |(_, p)| p);
            if !props.intersects(Properties::WRITE | Properties::WRITE_WITHOUT_RESPONSE) {
                refuse(stack, req, AttError::WriteNotPermitted)?;
                return Ok(None);
            }
            if *access == Access::Encrypted && !encrypted {
                refuse(stack, req, AttError::InsufficientEncryption)?;
                return Ok(None);
            }
            Ok(Some(WriteTarget::Value(offset)))
        }
        Some(_) => {
            refuse(stack, req, AttError::WriteNotPermitted)?;
            Ok(None)
        }
        None => {
            refuse(stack, req, AttError::InvalidHandle)?;
            Ok(None)
        }
    }
}

/// Outcome of offering a GATT event to a service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch<E> {
    /// The event targets another service.
    Ignored,
    /// Answered in place; nothing for the application.
    Handled,
    /// The application must act (and, for reads, respond).
    Event(E),
}

impl<E> Dispatch<E> {
    pub fn event(self) -> Option<E> {
        match self {
            Dispatch::Event(e) => Some(e),
            _ => None,
        }
    }
}

// Responders

pub(crate) fn respond_value<S: HostStack + ?Sized>(
    stack: &mut S,
    req: &ReadRequest,
    value: &[u8],
) -> Result<(), StackError> {
    match read_slice(value, req.value_offset, ATT_DEFAULT_MTU) {
        Ok(bytes) => stack.read_response(req.txn, bytes),
        Err(e) => stack.error_response(req.txn, req.attribute_offset, e),
    }
}

pub(crate) fn reject<S: HostStack + ?Sized>(
    stack: &mut S,
    txn: TransactionId,
    attribute_offset: u16,
    error: AttError,
) -> Result<(), StackError> {
    debug!("gatt: reject offset {} with {}", attribute_offset, error);
    stack.error_response(txn, attribute_offset, error)
}

/// Refuse a write. Write commands get no response, not even an error.
pub(crate) fn refuse<S: HostStack + ?Sized>(
    stack: &mut S,
    req: &WriteRequest<'_>,
    error: AttError,
) -> Result<(), StackError> {
    match req.kind {
        WriteKind::Request => reject(stack, req.txn, req.attribute_offset, error),
        WriteKind::Command => {
            debug!("gatt: drop write command to {}: {}", req.attribute_offset, error);
            Ok(())
        }
    }
}

/// Finish a write the service accepted.
pub(crate) fn acknowledge<S: HostStack + ?Sized>(stack: &mut S, req: &WriteRequest<'_>) -> Result<(), StackError> {
    match req.kind {
        WriteKind::Request => stack.write_response(req.txn),
        WriteKind::Command => Ok(()),
    }
}

/// Decode, mask and acknowledge a CCCD write for a characteristic with
/// `props`. On a malformed value the write has been refused.
pub(crate) fn accept_cccd_write<S: HostStack + ?Sized>(
    stack: &mut S,
    req: &WriteRequest<'_>,
    props: Properties,
) -> Result<Option<ClientConfig>, StackError> {
    let decoded = check_single_write(req).and_then(|()| ClientConfig::decode(req.value));
    match decoded {
        Ok(config) => {
            acknowledge(stack, req)?;
            Ok(Some(config & ClientConfig::supported_by(props)))
        }
        Err(e) => {
            refuse(stack, req, e)?;
            Ok(None)
        }
    }
}
