//! Seam between the firmware and the vendor Bluetooth stack.
//!
//! The stack is consumed as an opaque API. Everything the state machine
//! needs from it is expressed by [`HostStack`]; everything it reports back
//! arrives as a [`GapEvent`], a [`GattEvent`] or a timer expiry.
//!
//! # Contract
//!
//! * Events are delivered strictly serially, never re-entrantly.
//! * No [`HostStack`] method may deliver an event synchronously. A handler
//!   that issues a stack call while processing an event must never wait
//!   for a further event to complete that call.
//! * Every method returns immediately.

use crate::ble::crypto::{BlockCipher, EncryptionInformation};
use crate::ble::security::{AuthenticationResponse, PairingCapabilities};
use crate::ble::{AddressType, BdAddr, ConnHandle, Irk};
use crate::error::{AttError, StackError};
use crate::gatt::Attribute;

/// Handle of an opened stack instance. Zero is never a valid id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StackId(pub u32);

impl StackId {
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Handle of a service registered with [`HostStack::register_service`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceId(pub u32);

/// Stack-side transaction of a pending read, write or indication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransactionId(pub u32);

/// One-shot timer started with [`HostStack::start_timer`]. Zero is never
/// handed out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerId(pub u32);

/// An attribute of a registered service, by table offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttributeRef {
    pub service: ServiceId,
    pub offset: u16,
}

/// Negotiated link-layer parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionParameters {
    pub interval_ms: u32,
    pub slave_latency: u16,
    pub supervision_timeout_ms: u32,
}

/// Advertising payload handed to the stack: encoded AD structures plus
/// the interval range in 0.625 ms units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvertisingPayload<'a> {
    pub data: &'a [u8],
    pub interval_min: u16,
    pub interval_max: u16,
}

// GAP events

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GapEvent {
    ConnectionComplete {
        status: u8,
        conn: ConnHandle,
        address_type: AddressType,
        address: BdAddr,
        params: ConnectionParameters,
    },
    DisconnectionComplete {
        conn: ConnHandle,
        address_type: AddressType,
        address: BdAddr,
        reason: u8,
    },
    /// Link encryption was switched on or off.
    EncryptionChange { conn: ConnHandle, encrypted: bool },
    /// Security manager event for the peer at `address`.
    Authentication { address: BdAddr, event: AuthEvent },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Confirmation {
    JustWorks,
    /// The peer displays a passkey that the user must key in here.
    Passkey,
    /// We are asked to display `passkey`.
    Display { passkey: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairingStatus {
    Success,
    Failed(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityEstablishment {
    NoError,
    /// The bonded peer lost its keys and started pairing again.
    DeviceTriedToRepair,
    Failed(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthEvent {
    /// The master resumes encryption and wants the LTK for `ediv`/`rand`.
    LongTermKeyRequest { ediv: u16, rand: [u8; 8] },
    /// The master's pairing features.
    PairingRequest(PairingCapabilities),
    ConfirmationRequest(Confirmation),
    /// Key distribution: the stack wants the LTK we hand out.
    EncryptionInformationRequest { key_size: u8 },
    /// Key distribution: the stack chose and sent its own LTK.
    KeysDistributed(EncryptionInformation),
    IdentityInformation {
        address_type: AddressType,
        address: BdAddr,
        irk: Irk,
    },
    PairingStatus { status: PairingStatus, key_size: u8 },
    SecurityEstablishmentComplete { status: SecurityEstablishment },
}

// GATT events

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadRequest {
    pub service: ServiceId,
    pub conn: ConnHandle,
    pub txn: TransactionId,
    pub attribute_offset: u16,
    pub value_offset: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteKind {
    /// Write Request: expects a write response.
    Request,
    /// Write Command: no response.
    Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriteRequest<'a> {
    pub service: ServiceId,
    pub conn: ConnHandle,
    pub txn: TransactionId,
    pub attribute_offset: u16,
    pub value_offset: u16,
    /// Part of a prepared (queued) write.
    pub delayed: bool,
    pub kind: WriteKind,
    pub value: &'a [u8],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattEvent<'a> {
    Read(ReadRequest),
    Write(WriteRequest<'a>),
    /// The client confirmed (or failed to confirm) an indication.
    Confirmation {
        service: ServiceId,
        conn: ConnHandle,
        txn: TransactionId,
        status: u8,
    },
}

impl GattEvent<'_> {
    pub fn service(&self) -> ServiceId {
        match self {
            GattEvent::Read(r) => r.service,
            GattEvent::Write(w) => w.service,
            GattEvent::Confirmation { service, .. } => *service,
        }
    }
}

/// Everything the firmware asks of the vendor stack.
///
/// The AES-128 block of [`BlockCipher`] is part of the seam: on target it
/// is the SoftDevice ECB, in tests a deterministic stand-in.
pub trait HostStack: BlockCipher {
    fn stack_id(&self) -> StackId;

    // GAP
    fn set_gap_identity(&mut self, name: &str, appearance: u16) -> Result<(), StackError>;
    fn start_advertising(&mut self, payload: &AdvertisingPayload<'_>) -> Result<(), StackError>;
    fn stop_advertising(&mut self) -> Result<(), StackError>;
    fn disconnect(&mut self, address: &BdAddr) -> Result<(), StackError>;

    // Security manager
    fn authentication_response(
        &mut self,
        address: &BdAddr,
        response: AuthenticationResponse,
    ) -> Result<(), StackError>;
    /// Slave Security Request: ask the master to (re-)encrypt.
    fn request_security(&mut self, address: &BdAddr, caps: &PairingCapabilities) -> Result<(), StackError>;

    // Timers
    fn start_timer(&mut self, ms: u32) -> Result<TimerId, StackError>;
    fn stop_timer(&mut self, timer: TimerId);

    // GATT server
    fn register_service(&mut self, table: &'static [Attribute]) -> Result<ServiceId, StackError>;
    fn unregister_service(&mut self, service: ServiceId) -> Result<(), StackError>;
    fn read_response(&mut self, txn: TransactionId, value: &[u8]) -> Result<(), StackError>;
    fn write_response(&mut self, txn: TransactionId) -> Result<(), StackError>;
    fn error_response(&mut self, txn: TransactionId, attribute_offset: u16, error: AttError) -> Result<(), StackError>;
    fn notify(&mut self, conn: ConnHandle, attribute: AttributeRef, value: &[u8]) -> Result<(), StackError>;
    fn indicate(&mut self, conn: ConnHandle, attribute: AttributeRef, value: &[u8]) -> Result<TransactionId, StackError>;

    /// Fill `buf` from the stack's random number generator.
    fn random(&mut self, buf: &mut [u8]) -> Result<(), StackError>;
}
