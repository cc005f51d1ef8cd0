//! Glucose Service (0x1808).
//!
//! The Record Access Control Point (RACP) is the only writable value.
//! Writes are decoded and checked here and handed to the application as
//! [`RacpCommand`]s; the application answers with
//! [`GlucoseProfile::send_racp_response`]. Only one RACP indication may be
//! outstanding per instance.

use crate::ble::stack::{AttributeRef, GattEvent, HostStack, TransactionId, WriteRequest};
use crate::ble::ConnHandle;
use crate::config::MAX_PROFILE_INSTANCES;
use crate::error::{AttError, ProfileError, StackError};
use crate::gatt::cts::DateTime;
use crate::gatt::instance::{InstanceArena, InstanceId, Lookup};
use crate::gatt::{self, uuid, Access, Attribute, ClientConfig, Dispatch, Properties, ReadTarget, WriteTarget};

pub static TABLE: [Attribute; 12] = [
    Attribute::PrimaryService(uuid::GLUCOSE),
    Attribute::characteristic(uuid::GLUCOSE_MEASUREMENT, Properties::NOTIFY),
    Attribute::dynamic(uuid::GLUCOSE_MEASUREMENT, Access::Open),
    Attribute::Cccd,
    Attribute::characteristic(uuid::GLUCOSE_MEASUREMENT_CONTEXT, Properties::NOTIFY),
    Attribute::dynamic(uuid::GLUCOSE_MEASUREMENT_CONTEXT, Access::Open),
    Attribute::Cccd,
    Attribute::characteristic(uuid::GLUCOSE_FEATURE, Properties::READ),
    Attribute::dynamic(uuid::GLUCOSE_FEATURE, Access::Open),
    Attribute::characteristic(
        uuid::RECORD_ACCESS_CONTROL_POINT,
        Properties::WRITE.union(Properties::INDICATE),
    ),
    Attribute::dynamic(uuid::RECORD_ACCESS_CONTROL_POINT, Access::Open),
    Attribute::Cccd,
];

bitflags::bitflags! {
    /// Glucose Feature characteristic bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct GlucoseFeature: u16 {
        const LOW_BATTERY_DETECTION = 1 << 0;
        const SENSOR_MALFUNCTION_DETECTION = 1 << 1;
        const SENSOR_SAMPLE_SIZE = 1 << 2;
        const SENSOR_STRIP_INSERTION_ERROR = 1 << 3;
        const SENSOR_STRIP_TYPE_ERROR = 1 << 4;
        const SENSOR_RESULT_HIGH_LOW = 1 << 5;
        const SENSOR_TEMPERATURE_HIGH_LOW = 1 << 6;
        const SENSOR_READ_INTERRUPT = 1 << 7;
        const GENERAL_DEVICE_FAULT = 1 << 8;
        const TIME_FAULT = 1 << 9;
        const MULTIPLE_BOND = 1 << 10;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for GlucoseFeature {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "GlucoseFeature({=u16:#06x})", self.bits())
    }
}

// RACP wire format

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RacpOpcode {
    ReportStoredRecords = 1,
    DeleteStoredRecords = 2,
    AbortOperation = 3,
    ReportNumberOfStoredRecords = 4,
    NumberOfStoredRecordsResponse = 5,
    ResponseCode = 6,
}

impl TryFrom<u8> for RacpOpcode {
    type Error = RacpResponseCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => RacpOpcode::ReportStoredRecords,
            2 => RacpOpcode::DeleteStoredRecords,
            3 => RacpOpcode::AbortOperation,
            4 => RacpOpcode::ReportNumberOfStoredRecords,
            5 => RacpOpcode::NumberOfStoredRecordsResponse,
            6 => RacpOpcode::ResponseCode,
            _ => return Err(RacpResponseCode::OpCodeNotSupported),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RacpOperator {
    Null = 0,
    AllRecords = 1,
    LessThanOrEqual = 2,
    GreaterThanOrEqual = 3,
    WithinRange = 4,
    FirstRecord = 5,
    LastRecord = 6,
}

impl TryFrom<u8> for RacpOperator {
    type Error = RacpResponseCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => RacpOperator::Null,
            1 => RacpOperator::AllRecords,
            2 => RacpOperator::LessThanOrEqual,
            3 => RacpOperator::GreaterThanOrEqual,
            4 => RacpOperator::WithinRange,
            5 => RacpOperator::FirstRecord,
            6 => RacpOperator::LastRecord,
            _ => return Err(RacpResponseCode::OperatorNotSupported),
        })
    }
}

const FILTER_SEQUENCE_NUMBER: u8 = 0x01;
const FILTER_USER_FACING_TIME: u8 = 0x02;

/// Filter carried by a RACP request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RacpOperand {
    None,
    Sequence(u16),
    SequenceRange(u16, u16),
    Time(DateTime),
    TimeRange(DateTime, DateTime),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RacpResponseCode {
    Success = 1,
    OpCodeNotSupported = 2,
    InvalidOperator = 3,
    OperatorNotSupported = 4,
    InvalidOperand = 5,
    NoRecordsFound = 6,
    AbortUnsuccessful = 7,
    ProcedureNotCompleted = 8,
    OperandNotSupported = 9,
}

/// A decoded RACP write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RacpCommand {
    pub opcode: RacpOpcode,
    pub operator: RacpOperator,
    pub operand: RacpOperand,
}

impl RacpCommand {
    /// Decode a control point write.
    ///
    /// Errors are RACP response codes: the write itself is acknowledged and
    /// the application reports the failure through an indication.
    pub fn decode(bytes: &[u8]) -> Result<Self, RacpResponseCode> {
        let [opcode, operator, rest @ ..] = bytes else {
            return Err(RacpResponseCode::InvalidOperator);
        };
        let opcode = RacpOpcode::try_from(*opcode)?;
        let operator = RacpOperator::try_from(*operator)?;
        match opcode {
            RacpOpcode::NumberOfStoredRecordsResponse | RacpOpcode::ResponseCode => {
                return Err(RacpResponseCode::OpCodeNotSupported)
            }
            RacpOpcode::AbortOperation => {
                if operator != RacpOperator::Null || !rest.is_empty() {
                    return Err(RacpResponseCode::InvalidOperator);
                }
                return Ok(Self {
                    opcode,
                    operator,
                    operand: RacpOperand::None,
                });
            }
            _ => {}
        }
        let operand = match operator {
            RacpOperator::Null => return Err(RacpResponseCode::InvalidOperator),
            RacpOperator::AllRecords | RacpOperator::FirstRecord | RacpOperator::LastRecord => {
                if !rest.is_empty() {
                    return Err(RacpResponseCode::InvalidOperand);
                }
                RacpOperand::None
            }
            RacpOperator::LessThanOrEqual | RacpOperator::GreaterThanOrEqual => decode_filter(rest, 1)?,
            RacpOperator::WithinRange => decode_filter(rest, 2)?,
        };
        Ok(Self {
            opcode,
            operator,
            operand,
        })
    }
}

fn decode_filter(bytes: &[u8], count: usize) -> Result<RacpOperand, RacpResponseCode> {
    let [filter, values @ ..] = bytes else {
        return Err(RacpResponseCode::InvalidOperand);
    };
    let width = match *filter {
        FILTER_SEQUENCE_NUMBER => 2,
        FILTER_USER_FACING_TIME => DateTime::LEN,
        _ => return Err(RacpResponseCode::OperandNotSupported),
    };
    if values.len() != width * count {
        return Err(RacpResponseCode::InvalidOperand);
    }
    let (first, second) = values.split_at(width);
    let operand = match (*filter, count) {
        (FILTER_SEQUENCE_NUMBER, 1) => RacpOperand::Sequence(u16::from_le_bytes([first[0], first[1]])),
        (FILTER_SEQUENCE_NUMBER, _) => {
            let lo = u16::from_le_bytes([first[0], first[1]]);
            let hi = u16::from_le_bytes([second[0], second[1]]);
            if lo > hi {
                return Err(RacpResponseCode::InvalidOperand);
            }
            RacpOperand::SequenceRange(lo, hi)
        }
        (_, 1) => RacpOperand::Time(DateTime::decode(first).map_err(|_| RacpResponseCode::InvalidOperand)?),
        (_, _) => RacpOperand::TimeRange(
            DateTime::decode(first).map_err(|_| RacpResponseCode::InvalidOperand)?,
            DateTime::decode(second).map_err(|_| RacpResponseCode::InvalidOperand)?,
        ),
    };
    Ok(operand)
}

/// Indication sent back on the RACP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RacpResponse {
    ResponseCode { request: RacpOpcode, code: RacpResponseCode },
    NumberOfRecords(u16),
}

impl RacpResponse {
    pub fn encode(&self) -> [u8; 4] {
        match *self {
            RacpResponse::ResponseCode { request, code } => {
                [RacpOpcode::ResponseCode as u8, RacpOperator::Null as u8, request as u8, code as u8]
            }
            RacpResponse::NumberOfRecords(n) => {
                let n = n.to_le_bytes();
                [
                    RacpOpcode::NumberOfStoredRecordsResponse as u8,
                    RacpOperator::Null as u8,
                    n[0],
                    n[1],
                ]
            }
        }
    }
}

// Measurement encoding

const MEAS_TIME_OFFSET_PRESENT: u8 = 0x01;
const MEAS_CONCENTRATION_PRESENT: u8 = 0x02;
const MEAS_UNITS_MOL_PER_L: u8 = 0x04;
const MEAS_STATUS_PRESENT: u8 = 0x08;
const MEAS_CONTEXT_FOLLOWS: u8 = 0x10;

/// Concentration unit of a measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConcentrationUnit {
    KgPerL,
    MolPerL,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Concentration {
    /// IEEE-11073 16-bit SFLOAT, already encoded.
    pub sfloat: u16,
    pub unit: ConcentrationUnit,
    /// Type in the low nibble, sample location in the high nibble.
    pub type_location: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GlucoseMeasurement {
    pub sequence: u16,
    pub base_time: DateTime,
    /// Minutes.
    pub time_offset: Option<i16>,
    pub concentration: Option<Concentration>,
    pub sensor_status: Option<u16>,
    pub context_follows: bool,
}

impl GlucoseMeasurement {
    pub const MAX_LEN: usize = 17;

    /// Encode into `buf`, returning the number of bytes used.
    pub fn encode(&self, buf: &mut [u8; Self::MAX_LEN]) -> usize {
        let mut flags = 0u8;
        let mut n = 1;
        buf[n..n + 2].copy_from_slice(&self.sequence.to_le_bytes());
        n += 2;
        buf[n..n + DateTime::LEN].copy_from_slice(&self.base_time.encode());
        n += DateTime::LEN;
        if let Some(offset) = self.time_offset {
            flags |= MEAS_TIME_OFFSET_PRESENT;
            buf[n..n + 2].copy_from_slice(&offset.to_le_bytes());
            n += 2;
        }
        if let Some(c) = self.concentration {
            flags |= MEAS_CONCENTRATION_PRESENT;
            if c.unit == ConcentrationUnit::MolPerL {
                flags |= MEAS_UNITS_MOL_PER_L;
            }
            buf[n..n + 2].copy_from_slice(&c.sfloat.to_le_bytes());
            buf[n + 2] = c.type_location;
            n += 3;
        }
        if let Some(status) = self.sensor_status {
            flags |= MEAS_STATUS_PRESENT;
            buf[n..n + 2].copy_from_slice(&status.to_le_bytes());
            n += 2;
        }
        if self.context_follows {
            flags |= MEAS_CONTEXT_FOLLOWS;
        }
        buf[0] = flags;
        n
    }
}

const CTX_CARBOHYDRATE_PRESENT: u8 = 0x01;
const CTX_MEAL_PRESENT: u8 = 0x02;
const CTX_EXERCISE_PRESENT: u8 = 0x08;
const CTX_HBA1C_PRESENT: u8 = 0x40;

/// Glucose Measurement Context, limited to the commonly used fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GlucoseContext {
    pub sequence: u16,
    /// Carbohydrate id and SFLOAT amount.
    pub carbohydrate: Option<(u8, u16)>,
    pub meal: Option<u8>,
    /// Duration in seconds and intensity in percent.
    pub exercise: Option<(u16, u8)>,
    /// SFLOAT percentage.
    pub hba1c: Option<u16>,
}

impl GlucoseContext {
    pub const MAX_LEN: usize = 14;

    pub fn encode(&self, buf: &mut [u8; Self::MAX_LEN]) -> usize {
        let mut flags = 0u8;
        let mut n = 1;
        buf[n..n + 2].copy_from_slice(&self.sequence.to_le_bytes());
        n += 2;
        if let Some((id, amount)) = self.carbohydrate {
            flags |= CTX_CARBOHYDRATE_PRESENT;
            buf[n] = id;
            buf[n + 1..n + 3].copy_from_slice(&amount.to_le_bytes());
            n += 3;
        }
        if let Some(meal) = self.meal {
            flags |= CTX_MEAL_PRESENT;
            buf[n] = meal;
            n += 1;
        }
        if let Some((duration, intensity)) = self.exercise {
            flags |= CTX_EXERCISE_PRESENT;
            buf[n..n + 2].copy_from_slice(&duration.to_le_bytes());
            buf[n + 2] = intensity;
            n += 3;
        }
        if let Some(hba1c) = self.hba1c {
            flags |= CTX_HBA1C_PRESENT;
            buf[n..n + 2].copy_from_slice(&hba1c.to_le_bytes());
            n += 2;
        }
        buf[0] = flags;
        n
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GlsEvent {
    /// A RACP procedure was accepted; answer with
    /// [`GlucoseProfile::send_racp_response`].
    RacpRequest { conn: ConnHandle, command: RacpCommand },
    /// A RACP write that could not be decoded. The write was acknowledged;
    /// the application should indicate `code` for `opcode`.
    RacpInvalid { conn: ConnHandle, opcode: u8, code: RacpResponseCode },
    RacpResponseConfirmed { conn: ConnHandle },
    ReadClientConfiguration { conn: ConnHandle, txn: TransactionId, characteristic: GlucoseCharacteristic },
    ClientConfigurationChanged { conn: ConnHandle, characteristic: GlucoseCharacteristic, config: ClientConfig },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GlucoseCharacteristic {
    Measurement,
    Context,
    RecordAccessControlPoint,
}

#[derive(Debug)]
struct GlsInstance {
    measurement: u16,
    context: u16,
    feature_value: u16,
    racp: u16,
    feature: GlucoseFeature,
    racp_config: ClientConfig,
    procedure_active: bool,
    outstanding: Option<TransactionId>,
}

impl GlsInstance {
    fn characteristic(&self, value_offset: u16) -> Option<GlucoseCharacteristic> {
        match value_offset {
            o if o == self.measurement => Some(GlucoseCharacteristic::Measurement),
            o if o == self.context => Some(GlucoseCharacteristic::Context),
            o if o == self.racp => Some(GlucoseCharacteristic::RecordAccessControlPoint),
            _ => None,
        }
    }
}

pub struct GlucoseProfile {
    instances: InstanceArena<GlsInstance, MAX_PROFILE_INSTANCES>,
}

impl GlucoseProfile {
    pub fn new() -> Self {
        Self {
            instances: InstanceArena::new(),
        }
    }

    pub fn initialize_service<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        lookup: Lookup,
        feature: GlucoseFeature,
    ) -> Result<InstanceId, ProfileError> {
        let state = GlsInstance {
            measurement: gatt::require(&TABLE, uuid::GLUCOSE_MEASUREMENT, 0)?.value,
            context: gatt::require(&TABLE, uuid::GLUCOSE_MEASUREMENT_CONTEXT, 0)?.value,
            feature_value: gatt::require(&TABLE, uuid::GLUCOSE_FEATURE, 0)?.value,
            racp: gatt::require(&TABLE, uuid::RECORD_ACCESS_CONTROL_POINT, 0)?.value,
            feature,
            racp_config: ClientConfig::empty(),
            procedure_active: false,
            outstanding: None,
        };
        let id = self.instances.register(stack, lookup, &TABLE, state)?;
        info!("gls: instance {} registered", id.0);
        Ok(id)
    }

    pub fn cleanup_service<S: HostStack + ?Sized>(&mut self, stack: &mut S, id: InstanceId) -> Result<(), ProfileError> {
        self.instances.unregister(stack, id).map(|_| ())
    }

    pub fn handle_gatt_event<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        event: &GattEvent<'_>,
    ) -> Result<Dispatch<(InstanceId, GlsEvent)>, StackError> {
        let Some((id, inst)) = self.instances.by_service(event.service()) else {
            return Ok(Dispatch::Ignored);
        };
        let state = &mut inst.state;
        let event = match event {
            GattEvent::Read(req) => match gatt::serve_read(stack, &TABLE, req, false)? {
                Some(ReadTarget::Value(offset)) if offset == state.feature_value => {
                    gatt::respond_value(stack, req, &state.feature.bits().to_le_bytes())?;
                    return Ok(Dispatch::Handled);
                }
                Some(ReadTarget::Cccd(_, value)) => match state.characteristic(value) {
                    Some(characteristic) => GlsEvent::ReadClientConfiguration {
                        conn: req.conn,
                        txn: req.txn,
                        characteristic,
                    },
                    None => {
                        gatt::reject(stack, req.txn, req.attribute_offset, AttError::InvalidHandle)?;
                        return Ok(Dispatch::Handled);
                    }
                },
                Some(ReadTarget::Value(_)) | None => return Ok(Dispatch::Handled),
            },
            GattEvent::Write(req) => match gatt::serve_write(stack, &TABLE, req, false)? {
                Some(WriteTarget::Cccd(value, config)) => {
                    let Some(characteristic) = state.characteristic(value) else {
                        return Ok(Dispatch::Handled);
                    };
                    if characteristic == GlucoseCharacteristic::RecordAccessControlPoint {
                        state.racp_config = config;
                    }
                    GlsEvent::ClientConfigurationChanged {
                        conn: req.conn,
                        characteristic,
                        config,
                    }
                }
                Some(WriteTarget::Value(offset)) if offset == state.racp => match write_racp(stack, state, req)? {
                    Some(event) => event,
                    None => return Ok(Dispatch::Handled),
                },
                Some(WriteTarget::Value(_)) => {
                    gatt::refuse(stack, req, AttError::WriteNotPermitted)?;
                    return Ok(Dispatch::Handled);
                }
                None => return Ok(Dispatch::Handled),
            },
            GattEvent::Confirmation { conn, txn, status, .. } => {
                if state.outstanding != Some(*txn) {
                    debug!("gls: confirmation for unknown indication");
                    return Ok(Dispatch::Handled);
                }
                state.outstanding = None;
                if *status != 0 {
                    warn!("gls: RACP indication failed with status {}", status);
                }
                GlsEvent::RacpResponseConfirmed { conn: *conn }
            }
        };
        Ok(Dispatch::Event((id, event)))
    }

    /// Indicate `response` on the RACP.
    ///
    /// Fails with [`ProfileError::IndicationOutstanding`] while the previous
    /// indication is unconfirmed; the tracked transaction is left as is.
    pub fn send_racp_response<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        id: InstanceId,
        conn: ConnHandle,
        response: &RacpResponse,
    ) -> Result<(), ProfileError> {
        let inst = self.instances.get_mut(stack.stack_id(), id)?;
        if inst.state.outstanding.is_some() {
            return Err(ProfileError::IndicationOutstanding);
        }
        let attribute = AttributeRef {
            service: inst.service,
            offset: inst.state.racp,
        };
        let txn = stack.indicate(conn, attribute, &response.encode())?;
        inst.state.outstanding = Some(txn);
        inst.state.procedure_active = false;
        Ok(())
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

    pub fn notify_measurement<S: HostStack + ?Sized>(
        &self,
        stack: &mut S,
        id: InstanceId,
        conn: ConnHandle,
        measurement: &GlucoseMeasurement,
    ) -> Result<(), ProfileError> {
        let inst = self.instances.get(stack.stack_id(), id)?;
        let mut buf = [0u8; GlucoseMeasurement::MAX_LEN];
        let len = measurement.encode(&mut buf);
        let attribute = AttributeRef {
            service: inst.service,
            offset: inst.state.measurement,
        };
        Ok(stack.notify(conn, attribute, &buf[..len])?)
    }

    pub fn notify_context<S: HostStack + ?Sized>(
        &self,
        stack: &mut S,
        id: InstanceId,
        conn: ConnHandle,
        context: &GlucoseContext,
    ) -> Result<(), ProfileError> {
        let inst = self.instances.get(stack.stack_id(), id)?;
        let mut buf = [0u8; GlucoseContext::MAX_LEN];
        let len = context.encode(&mut buf);
        let attribute = AttributeRef {
            service: inst.service,
            offset: inst.state.context,
        };
        Ok(stack.notify(conn, attribute, &buf[..len])?)
    }

    pub fn set_feature<S: HostStack + ?Sized>(
        &mut self,
        stack: &S,
        id: InstanceId,
        feature: GlucoseFeature,
    ) -> Result<(), ProfileError> {
        self.instances.get_mut(stack.stack_id(), id)?.state.feature = feature;
        Ok(())
    }
}

impl Default for GlucoseProfile {
    fn default() -> Self {
        Self::new()
    }
}

fn write_racp<S: HostStack + ?Sized>(
    stack: &mut S,
    state: &mut GlsInstance,
    req: &WriteRequest<'_>,
) -> Result<Option<GlsEvent>, StackError> {
    if !state.racp_config.contains(ClientConfig::INDICATE) {
        gatt::refuse(stack, req, AttError::CccdImproperlyConfigured)?;
        return Ok(None);
    }
    let opcode = req.value.first().copied().unwrap_or(0);
    if state.procedure_active && opcode != RacpOpcode::AbortOperation as u8 {
        gatt::refuse(stack, req, AttError::ProcedureAlreadyInProgress)?;
        return Ok(None);
    }
    gatt::acknowledge(stack, req)?;
    match RacpCommand::decode(req.value) {
        Ok(command) => {
            state.procedure_active = true;
            debug!("gls: RACP {} accepted", command.opcode);
            Ok(Some(GlsEvent::RacpRequest { conn: req.conn, command }))
        }
        Err(code) => {
            state.procedure_active = true;
            Ok(Some(GlsEvent::RacpInvalid {
                conn: req.conn,
                opcode,
                code,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_offsets() {
        assert_eq!(gatt::characteristic(&TABLE, uuid::GLUCOSE_MEASUREMENT, 0).unwrap().cccd, Some(3));
        let racp = gatt::characteristic(&TABLE, uuid::RECORD_ACCESS_CONTROL_POINT, 0).unwrap();
        assert_eq!(racp.value, 10);
        assert_eq!(racp.cccd, Some(11));
        assert!(racp.properties.contains(Properties::INDICATE));
    }

    #[test]
    fn decode_report_all() {
        let cmd = RacpCommand::decode(&[1, 1]).unwrap();
        assert_eq!(cmd.opcode, RacpOpcode::ReportStoredRecords);
        assert_eq!(cmd.operator, RacpOperator::AllRecords);
        assert_eq!(cmd.operand, RacpOperand::None);
    }

    #[test]
    fn decode_sequence_filters() {
        let cmd = RacpCommand::decode(&[4, 3, 0x01, 0x10, 0x00]).unwrap();
        assert_eq!(cmd.operand, RacpOperand::Sequence(0x10));
        let cmd = RacpCommand::decode(&[2, 4, 0x01, 1, 0, 9, 0]).unwrap();
        assert_eq!(cmd.operand, RacpOperand::SequenceRange(1, 9));
        assert_eq!(
            RacpCommand::decode(&[2, 4, 0x01, 9, 0, 1, 0]),
            Err(RacpResponseCode::InvalidOperand)
        );
    }

    #[test]
    fn decode_time_filter() {
        let cmd = RacpCommand::decode(&[1, 2, 0x02, 0xE8, 0x07, 1, 2, 3, 4, 5]).unwrap();
        let RacpOperand::Time(t) = cmd.operand else {
            panic!("expected a time operand");
        };
        assert_eq!((t.year, t.month, t.seconds), (2024, 1, 5));
    }

    #[test]
    fn decode_errors() {
        assert_eq!(RacpCommand::decode(&[]), Err(RacpResponseCode::InvalidOperator));
        assert_eq!(RacpCommand::decode(&[9, 1]), Err(RacpResponseCode::OpCodeNotSupported));
        assert_eq!(RacpCommand::decode(&[1, 7]), Err(RacpResponseCode::OperatorNotSupported));
        assert_eq!(RacpCommand::decode(&[1, 0]), Err(RacpResponseCode::InvalidOperator));
        assert_eq!(RacpCommand::decode(&[1, 2, 0x03, 0, 0]), Err(RacpResponseCode::OperandNotSupported));
        assert_eq!(RacpCommand::decode(&[1, 1, 0]), Err(RacpResponseCode::InvalidOperand));
        assert_eq!(RacpCommand::decode(&[3, 1]), Err(RacpResponseCode::InvalidOperator));
        assert!(RacpCommand::decode(&[3, 0]).is_ok());
    }

    #[test]
    fn response_encoding() {
        let r = RacpResponse::ResponseCode {
            request: RacpOpcode::DeleteStoredRecords,
            code: RacpResponseCode::NoRecordsFound,
        };
        assert_eq!(r.encode(), [6, 0, 2, 6]);
        assert_eq!(RacpResponse::NumberOfRecords(0x0102).encode(), [5, 0, 0x02, 0x01]);
    }

    #[test]
    fn measurement_flags_follow_fields() {
        let m = GlucoseMeasurement {
            sequence: 7,
            base_time: DateTime::default(),
            time_offset: None,
            concentration: Some(Concentration {
                sfloat: 0xB05A,
                unit: ConcentrationUnit::MolPerL,
                type_location: 0x11,
            }),
            sensor_status: None,
            context_follows: true,
        };
        let mut buf = [0u8; GlucoseMeasurement::MAX_LEN];
        let len = m.encode(&mut buf);
        assert_eq!(len, 1 + 2 + 7 + 3);
        assert_eq!(buf[0], MEAS_CONCENTRATION_PRESENT | MEAS_UNITS_MOL_PER_L | MEAS_CONTEXT_FOLLOWS);
        assert_eq!(&buf[1..3], &[7, 0]);
        assert_eq!(&buf[10..13], &[0x5A, 0xB0, 0x11]);
    }

    #[test]
    fn context_encoding() {
        let c = GlucoseContext {
            sequence: 1,
            carbohydrate: None,
            meal: Some(2),
            exercise: None,
            hba1c: Some(0x0040),
        };
        let mut buf = [0u8; GlucoseContext::MAX_LEN];
        let len = c.encode(&mut buf);
        assert_eq!(&buf[..len], &[CTX_MEAL_PRESENT | CTX_HBA1C_PRESENT, 1, 0, 2, 0x40, 0x00]);
    }
}
