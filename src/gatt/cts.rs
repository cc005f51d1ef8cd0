//! Current Time Service (0x1805).
//!
//! Current Time is owned by the application: reads are forwarded and
//! answered with [`CurrentTimeProfile::respond_current_time`]. Local Time
//! Information is stored per instance and served directly. Both Local
//! Time Information and Reference Time Information are optional and
//! selected per instance with [`CtsConfig`].

use crate::ble::stack::{AttributeRef, GattEvent, HostStack, TransactionId};
use crate::ble::ConnHandle;
use crate::config::MAX_PROFILE_INSTANCES;
use crate::error::{AttError, ProfileError, StackError};
use crate::gatt::instance::{InstanceArena, InstanceId, Lookup};
use crate::gatt::{self, uuid, Access, Attribute, ClientConfig, Dispatch, Properties, ReadTarget, WriteTarget};

macro_rules! cts_table {
    ($($optional:expr),* $(,)?) => {
        [
            Attribute::PrimaryService(uuid::CURRENT_TIME_SERVICE),
            Attribute::characteristic(uuid::CURRENT_TIME, Properties::READ.union(Properties::NOTIFY)),
            Attribute::dynamic(uuid::CURRENT_TIME, Access::Open),
            Attribute::Cccd,
            $($optional),*
        ]
    };
}

const LTI_DECLARATION: Attribute = Attribute::characteristic(uuid::LOCAL_TIME_INFORMATION, Properties::READ);
const LTI_VALUE: Attribute = Attribute::dynamic(uuid::LOCAL_TIME_INFORMATION, Access::Open);
const RTI_DECLARATION: Attribute = Attribute::characteristic(uuid::REFERENCE_TIME_INFORMATION, Properties::READ);
const RTI_VALUE: Attribute = Attribute::dynamic(uuid::REFERENCE_TIME_INFORMATION, Access::Open);

static TABLE_BASE: [Attribute; 4] = cts_table!();
static TABLE_LTI: [Attribute; 6] = cts_table!(LTI_DECLARATION, LTI_VALUE);
static TABLE_RTI: [Attribute; 6] = cts_table!(RTI_DECLARATION, RTI_VALUE);
static TABLE_FULL: [Attribute; 8] = cts_table!(LTI_DECLARATION, LTI_VALUE, RTI_DECLARATION, RTI_VALUE);

/// Calendar date and wall-clock time, as in the SIG Date Time
/// characteristic (7 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DateTime {
    /// 1582..=9999, 0 if unknown.
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl DateTime {
    pub const LEN: usize = 7;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let y = self.year.to_le_bytes();
        [y[0], y[1], self.month, self.day, self.hours, self.minutes, self.seconds]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AttError> {
        let [y0, y1, month, day, hours, minutes, seconds] = *bytes else {
            return Err(AttError::InvalidAttributeValueLength);
        };
        let dt = Self {
            year: u16::from_le_bytes([y0, y1]),
            month,
            day,
            hours,
            minutes,
            seconds,
        };
        if dt.month > 12 || dt.day > 31 || dt.hours > 23 || dt.minutes > 59 || dt.seconds > 59 {
            return Err(AttError::ValueNotAllowed);
        }
        Ok(dt)
    }
}

/// Current Time characteristic value (10 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentTime {
    pub date_time: DateTime,
    /// 1 = Monday .. 7 = Sunday, 0 unknown.
    pub day_of_week: u8,
    /// 1/256 s.
    pub fractions256: u8,
    pub adjust_reason: AdjustReason,
}

impl CurrentTime {
    pub const LEN: usize = 10;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..DateTime::LEN].copy_from_slice(&self.date_time.encode());
        out[7] = self.day_of_week;
        out[8] = self.fractions256;
        out[9] = self.adjust_reason.bits();
        out
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct AdjustReason: u8 {
        const MANUAL_TIME_UPDATE = 0x01;
        const EXTERNAL_REFERENCE_TIME_UPDATE = 0x02;
        const CHANGE_OF_TIME_ZONE = 0x04;
        const CHANGE_OF_DST = 0x08;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for AdjustReason {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "AdjustReason({=u8:#04x})", self.bits())
    }
}

/// Local Time Information: zone offset in 15 minute steps and DST offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LocalTimeInformation {
    /// -48..=56, or -128 if unknown.
    pub time_zone: i8,
    /// 0 standard, 2 half hour, 4 daylight, 8 double daylight, 255 unknown.
    pub dst_offset: u8,
}

impl LocalTimeInformation {
    pub fn encode(&self) -> [u8; 2] {
        [self.time_zone as u8, self.dst_offset]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TimeSource {
    #[default]
    Unknown = 0,
    NetworkTimeProtocol = 1,
    Gps = 2,
    RadioTimeSignal = 3,
    Manual = 4,
    AtomicClock = 5,
    CellularNetwork = 6,
}

/// Reference Time Information value (4 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReferenceTimeInformation {
    pub source: TimeSource,
    /// Drift in 1/8 s steps, 254 for larger, 255 unknown.
    pub accuracy: u8,
    pub days_since_update: u8,
    pub hours_since_update: u8,
}

impl ReferenceTimeInformation {
    pub fn encode(&self) -> [u8; 4] {
        [
            self.source as u8,
            self.accuracy,
            self.days_since_update,
            self.hours_since_update,
        ]
    }
}

/// Optional characteristics of an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CtsConfig {
    /// Expose Local Time Information with this initial value.
    pub local_time: Option<LocalTimeInformation>,
    pub reference_time: bool,
}

impl CtsConfig {
    fn table(&self) -> &'static [Attribute] {
        match (self.local_time.is_some(), self.reference_time) {
            (false, false) => &TABLE_BASE,
            (true, false) => &TABLE_LTI,
            (false, true) => &TABLE_RTI,
            (true, true) => &TABLE_FULL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CtsEvent {
    /// Answer with [`CurrentTimeProfile::respond_current_time`].
    ReadCurrentTime { conn: ConnHandle, txn: TransactionId },
    /// Answer with [`CurrentTimeProfile::respond_reference_time`].
    ReadReferenceTimeInformation { conn: ConnHandle, txn: TransactionId },
    /// Answer with [`CurrentTimeProfile::respond_client_configuration`].
    ReadClientConfiguration { conn: ConnHandle, txn: TransactionId },
    ClientConfigurationChanged { conn: ConnHandle, config: ClientConfig },
}

#[derive(Debug)]
struct CtsInstance {
    current_time: u16,
    local_time_offset: Option<u16>,
    reference_time_offset: Option<u16>,
    local_time: LocalTimeInformation,
}

pub struct CurrentTimeProfile {
    instances: InstanceArena<CtsInstance, MAX_PROFILE_INSTANCES>,
}

impl CurrentTimeProfile {
    pub fn new() -> Self {
        Self {
            instances: InstanceArena::new(),
        }
    }

    pub fn initialize_service<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        lookup: Lookup,
        config: &CtsConfig,
    ) -> Result<InstanceId, ProfileError> {
        let table = config.table();
        let current_time = gatt::require(table, uuid::CURRENT_TIME, 0)?.value;
        let local_time_offset = gatt::characteristic(table, uuid::LOCAL_TIME_INFORMATION, 0).map(|c| c.value);
        let reference_time_offset = gatt::characteristic(table, uuid::REFERENCE_TIME_INFORMATION, 0).map(|c| c.value);
        let state = CtsInstance {
            current_time,
            local_time_offset,
            reference_time_offset,
            local_time: config.local_time.unwrap_or_default(),
        };
        let id = self.instances.register(stack, lookup, table, state)?;
        info!("cts: instance {} registered", id.0);
        Ok(id)
    }

    pub fn cleanup_service<S: HostStack + ?Sized>(&mut self, stack: &mut S, id: InstanceId) -> Result<(), ProfileError> {
        self.instances.unregister(stack, id).map(|_| ())
    }

    pub fn handle_gatt_event<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        event: &GattEvent<'_>,
    ) -> Result<Dispatch<(InstanceId, CtsEvent)>, StackError> {
        let Some((id, inst)) = self.instances.by_service(event.service()) else {
            return Ok(Dispatch::Ignored);
        };
        let table = inst.table;
        let state = &inst.state;
        let event = match event {
            GattEvent::Read(req) => match gatt::serve_read(stack, table, req, false)? {
                Some(ReadTarget::Cccd(..)) => CtsEvent::ReadClientConfiguration {
                    conn: req.conn,
                    txn: req.txn,
                },
                Some(ReadTarget::Value(offset)) if Some(offset) == state.local_time_offset => {
                    gatt::respond_value(stack, req, &state.local_time.encode())?;
                    return Ok(Dispatch::Handled);
                }
                Some(ReadTarget::Value(_)) if req.value_offset != 0 => {
                    gatt::reject(stack, req.txn, req.attribute_offset, AttError::AttributeNotLong)?;
                    return Ok(Dispatch::Handled);
                }
                Some(ReadTarget::Value(offset)) if offset == state.current_time => CtsEvent::ReadCurrentTime {
                    conn: req.conn,
                    txn: req.txn,
                },
                Some(ReadTarget::Value(offset)) if Some(offset) == state.reference_time_offset => {
                    CtsEvent::ReadReferenceTimeInformation {
                        conn: req.conn,
                        txn: req.txn,
                    }
                }
                Some(ReadTarget::Value(_)) => {
                    gatt::reject(stack, req.txn, req.attribute_offset, AttError::ReadNotPermitted)?;
                    return Ok(Dispatch::Handled);
                }
                None => return Ok(Dispatch::Handled),
            },
            GattEvent::Write(req) => match gatt::serve_write(stack, table, req, false)? {
                Some(WriteTarget::Cccd(_, config)) => CtsEvent::ClientConfigurationChanged { conn: req.conn, config },
                Some(WriteTarget::Value(_)) | None => return Ok(Dispatch::Handled),
            },
            GattEvent::Confirmation { .. } => return Ok(Dispatch::Handled),
        };
        Ok(Dispatch::Event((id, event)))
    }

    pub fn respond_current_time<S: HostStack + ?Sized>(
        &self,
        stack: &mut S,
        id: InstanceId,
        txn: TransactionId,
        time: &CurrentTime,
    ) -> Result<(), ProfileError> {
        self.instances.get(stack.stack_id(), id)?;
        Ok(stack.read_response(txn, &time.encode())?)
    }

    pub fn respond_reference_time<S: HostStack + ?Sized>(
        &self,
        stack: &mut S,
        id: InstanceId,
        txn: TransactionId,
        info: &ReferenceTimeInformation,
    ) -> Result<(), ProfileError> {
        let inst = self.instances.get(stack.stack_id(), id)?;
        if inst.state.reference_time_offset.is_none() {
            return Err(ProfileError::InvalidParameter);
        }
        Ok(stack.read_response(txn, &info.encode())?)
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

    pub fn notify_current_time<S: HostStack + ?Sized>(
        &self,
        stack: &mut S,
        id: InstanceId,
        conn: ConnHandle,
        time: &CurrentTime,
    ) -> Result<(), ProfileError> {
        let inst = self.instances.get(stack.stack_id(), id)?;
        let attribute = AttributeRef {
            service: inst.service,
            offset: inst.state.current_time,
        };
        Ok(stack.notify(conn, attribute, &time.encode())?)
    }

    /// Replace the stored Local Time Information.
    pub fn set_local_time<S: HostStack + ?Sized>(
        &mut self,
        stack: &S,
        id: InstanceId,
        local_time: LocalTimeInformation,
    ) -> Result<(), ProfileError> {
        let inst = self.instances.get_mut(stack.stack_id(), id)?;
        if inst.state.local_time_offset.is_none() {
            return Err(ProfileError::InvalidParameter);
        }
        inst.state.local_time = local_time;
        Ok(())
    }
}

impl Default for CurrentTimeProfile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_characteristics_shift_offsets() {
        let full = CtsConfig {
            local_time: Some(LocalTimeInformation::default()),
            reference_time: true,
        };
        let rti_only = CtsConfig {
            local_time: None,
            reference_time: true,
        };
        let at = |cfg: &CtsConfig| gatt::characteristic(cfg.table(), uuid::REFERENCE_TIME_INFORMATION, 0).map(|c| c.value);
        assert_eq!(at(&full), Some(7));
        assert_eq!(at(&rti_only), Some(5));
        assert_eq!(at(&CtsConfig::default()), None);
    }

    #[test]
    fn current_time_encoding() {
        let t = CurrentTime {
            date_time: DateTime {
                year: 2024,
                month: 3,
                day: 9,
                hours: 13,
                minutes: 5,
                seconds: 59,
            },
            day_of_week: 6,
            fractions256: 128,
            adjust_reason: AdjustReason::MANUAL_TIME_UPDATE,
        };
        assert_eq!(t.encode(), [0xE8, 0x07, 3, 9, 13, 5, 59, 6, 128, 0x01]);
    }

    #[test]
    fn date_time_decode_validates() {
        let dt = DateTime::decode(&[0xE8, 0x07, 12, 31, 23, 59, 59]).unwrap();
        assert_eq!(dt.year, 2024);
        assert_eq!(DateTime::decode(&[0xE8, 0x07, 13, 1, 0, 0, 0]), Err(AttError::ValueNotAllowed));
        assert_eq!(DateTime::decode(&[0xE8, 0x07, 1]), Err(AttError::InvalidAttributeValueLength));
    }

    #[test]
    fn local_time_is_twos_complement() {
        let lti = LocalTimeInformation {
            time_zone: -20,
            dst_offset: 4,
        };
        assert_eq!(lti.encode(), [0xEC, 4]);
    }
}
