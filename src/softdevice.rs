//! `HostStack` over the Nordic S140 SoftDevice.
//!
//! The SoftDevice is driven through `nrf-softdevice`'s async API, the
//! state machine through synchronous callbacks. [`Ble`] glues the two:
//! every SoftDevice callback is turned into a `GapEvent`/`GattEvent` and
//! handed to [`Hogp`] while the `RefCell` around [`Ble`] is borrowed. No
//! borrow is held across an `.await`.
//!
//! Limitations of the SoftDevice security API:
//! - pairing parameters are taken from `PairingCapabilities::keyboard()`
//!   up front, the master's request is never seen;
//! - the SoftDevice generates the LTK it distributes. It is kept in the
//!   peer's RAM record, so a master has to pair again only after a power
//!   cycle.

use core::cell::RefCell;

use defmt::{debug, error, info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant};
use heapless::Vec;
use nrf_softdevice::ble::gatt_server::builder::ServiceBuilder;
use nrf_softdevice::ble::gatt_server::characteristic::{Attribute as SdAttribute, Metadata, Properties as SdProperties};
use nrf_softdevice::ble::gatt_server::{self, DeferredReadReply, DeferredWriteReply, WriteOp};
use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{
    Address, AddressType as SdAddressType, Connection, EncryptionInfo, GattError, IdentityKey, MasterId, PasskeyReply,
    SecurityMode, Uuid,
};
use nrf_softdevice::{raw, RawError, Softdevice};

use blepass::ble::crypto::{BlockCipher, EncryptionInformation};
use blepass::ble::hogp::Hogp;
use blepass::ble::security::{AuthenticationResponse, BondingType, IoCapability, PairingCapabilities};
use blepass::ble::stack::{
    AdvertisingPayload, AttributeRef, AuthEvent, Confirmation, ConnectionParameters, GapEvent, GattEvent, HostStack,
    PairingStatus, ReadRequest, ServiceId, StackId, TimerId, TransactionId, WriteKind, WriteRequest,
};
use blepass::ble::{AddressType, BdAddr, ConnHandle, Irk, Ltk, HCI_SUCCESS, MAX_ENCRYPTION_KEY_SIZE};
use blepass::gatt::{Attribute, Properties, ValueSource};
use blepass::{AttError, StackError};

const MAX_SERVICES: usize = 4;
const MAX_TABLE_LEN: usize = 24;
const MAX_TIMERS: usize = 4;
const MAX_INDICATIONS: usize = 2;
const MAX_VALUE_LEN: u16 = 64;
/// Legacy advertising payload limit.
const ADV_DATA_LEN: usize = 31;
/// HCI "connection failed to be established".
const HCI_CONNECTION_FAILED: u8 = 0x3E;
/// HCI "remote user terminated connection"; the SoftDevice API does not
/// surface the real reason.
const HCI_REMOTE_USER_TERMINATED: u8 = 0x13;
/// `ble_gap_enc_info_t` packs `lesc:1, auth:1, ltk_len:6` into `flags`.
const ENC_INFO_LTK_LEN_SHIFT: u8 = 2;

/// Raised whenever the state machine starts or stops advertising.
pub static ADVERTISING_CHANGED: Signal<CriticalSectionRawMutex, ()> = Signal::new();

struct RegisteredService {
    id: ServiceId,
    table: &'static [Attribute],
    /// SoftDevice handle per table offset; 0 where none was assigned.
    handles: Vec<u16, MAX_TABLE_LEN>,
}

impl RegisteredService {
    fn find(&self, handle: u16) -> Option<u16> {
        self.handles
            .iter()
            .position(|&h| h != 0 && h == handle)
            .map(|p| p as u16)
    }
}

/// The SoftDevice seen through [`HostStack`].
pub struct SoftdeviceStack {
    /// Held mutably until the services are registered.
    setup: Option<&'static mut Softdevice>,
    sd: Option<&'static Softdevice>,
    services: Vec<RegisteredService, MAX_SERVICES>,
    conn: Option<Connection>,
    caps: PairingCapabilities,
    adv_data: Vec<u8, ADV_DATA_LEN>,
    adv_interval: u32,
    advertising: bool,
    next_id: u32,
    timers: Vec<(TimerId, Instant), MAX_TIMERS>,
    indications: Vec<(ServiceId, u16, TransactionId), MAX_INDICATIONS>,
    pending_read: Option<(TransactionId, DeferredReadReply)>,
    pending_write: Option<(TransactionId, DeferredWriteReply)>,
    passkey_reply: Option<PasskeyReply>,
    ltk_reply: Option<EncryptionInfo>,
}

impl SoftdeviceStack {
    pub fn new(sd: &'static mut Softdevice) -> Self {
        Self {
            setup: Some(sd),
            sd: None,
            services: Vec::new(),
            conn: None,
            caps: PairingCapabilities::keyboard(),
            adv_data: Vec::new(),
            adv_interval: 0,
            advertising: false,
            next_id: 1,
            timers: Vec::new(),
            indications: Vec::new(),
            pending_read: None,
            pending_write: None,
            passkey_reply: None,
            ltk_reply: None,
        }
    }

    /// End of service registration; hands out the SoftDevice for `run()`.
    pub fn start(&mut self) -> Option<&'static Softdevice> {
        let sd: &'static Softdevice = self.setup.take()?;
        self.sd = Some(sd);
        Some(sd)
    }

    /// Advertising requested by the state machine: payload and interval.
    pub fn advertisement(&self) -> Option<(Vec<u8, ADV_DATA_LEN>, u32)> {
        self.advertising.then(|| (self.adv_data.clone(), self.adv_interval))
    }

    /// Pop one expired timer.
    pub fn take_expired_timer(&mut self, now: Instant) -> Option<TimerId> {
        let pos = self.timers.iter().position(|(_, deadline)| *deadline <= now)?;
        Some(self.timers.swap_remove(pos).0)
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    fn conn_for(&self, conn: ConnHandle) -> Result<&Connection, StackError> {
        self.conn
            .as_ref()
            .filter(|c| c.handle() == Some(conn))
            .ok_or(StackError::NotConnected)
    }

    fn value_handle(&self, attribute: AttributeRef) -> Result<u16, StackError> {
        self.services
            .iter()
            .find(|s| s.id == attribute.service)
            .and_then(|s| s.handles.get(usize::from(attribute.offset)).copied())
            .filter(|&h| h != 0)
            .ok_or(StackError::InvalidState)
    }

    fn locate(&self, handle: u16) -> Option<(ServiceId, u16)> {
        self.services.iter().find_map(|s| s.find(handle).map(|offset| (s.id, offset)))
    }

    fn add_table(sd: &mut Softdevice, table: &'static [Attribute]) -> Result<Vec<u16, MAX_TABLE_LEN>, StackError> {
        let Some(Attribute::PrimaryService(uuid)) = table.first() else {
            return Err(StackError::InvalidState);
        };
        let mut sb = ServiceBuilder::new(sd, Uuid::new_16(uuid.0)).map_err(|_| StackError::NoResources)?;
        let mut handles: Vec<u16, MAX_TABLE_LEN> = Vec::new();
        handles.resize(table.len(), 0).map_err(|_| StackError::NoResources)?;

        let mut offset = 1;
        while offset < table.len() {
            let Attribute::Characteristic { uuid, properties } = table[offset] else {
                offset += 1;
                continue;
            };
            let Some(&Attribute::Value { source, .. }) = table.get(offset + 1) else {
                return Err(StackError::InvalidState);
            };
            let value = match source {
                ValueSource::Static(bytes) => SdAttribute::new(bytes),
                ValueSource::Dynamic => {
                    let empty: &'static [u8] = &[];
                    let mut attr = SdAttribute::new(empty).variable_len(MAX_VALUE_LEN);
                    if properties.contains(Properties::READ) {
                        attr = attr.deferred_read();
                    }
                    if properties.intersects(Properties::WRITE | Properties::WRITE_WITHOUT_RESPONSE) {
                        attr = attr.deferred_write();
                    }
                    attr
                }
            };
            let mut cb = sb
                .add_characteristic(Uuid::new_16(uuid.0), value, Metadata::new(sd_properties(properties)))
                .map_err(|_| StackError::NoResources)?;
            let mut next = offset + 2;
            while let Some(attribute) = table.get(next) {
                match *attribute {
                    Attribute::Cccd => {}
                    Attribute::Descriptor { uuid, value } => {
                        cb.add_descriptor(Uuid::new_16(uuid.0), SdAttribute::new(value))
                            .map_err(|_| StackError::NoResources)?;
                    }
                    _ => break,
                }
                next += 1;
            }
            let built = cb.build();
            handles[offset + 1] = built.value_handle;
            if let Some(cccd) = table[offset + 2..next].iter().position(|a| matches!(a, Attribute::Cccd)) {
                handles[offset + 2 + cccd] = built.cccd_handle;
            }
            offset = next;
        }
        sb.build();
        Ok(handles)
    }
}

fn sd_properties(props: Properties) -> SdProperties {
    let mut p = SdProperties::new();
    if props.contains(Properties::READ) {
        p = p.read();
    }
    if props.contains(Properties::WRITE) {
        p = p.write();
    }
    if props.contains(Properties::WRITE_WITHOUT_RESPONSE) {
        p = p.write_without_response();
    }
    if props.contains(Properties::NOTIFY) {
        p = p.notify();
    }
    if props.contains(Properties::INDICATE) {
        p = p.indicate();
    }
    p
}

fn raw_error(err: RawError) -> StackError {
    match err {
        // notification queue full
        RawError::Resources => StackError::NoResources,
        err => StackError::Raw(err as u32),
    }
}

fn bd_addr(addr: &Address) -> (AddressType, BdAddr) {
    let kind = match addr.address_type() {
        SdAddressType::Public => AddressType::Public,
        _ => AddressType::Random,
    };
    (kind, BdAddr::new(addr.bytes()))
}

fn gatt_error(err: AttError) -> GattError {
    GattError::from_att_error(err as u8)
}

impl BlockCipher for SoftdeviceStack {
    fn encrypt_block(&self, key: &[u8; 16], plaintext: &[u8; 16]) -> [u8; 16] {
        let mut ecb = raw::nrf_ecb_hal_data_t {
            key: *key,
            cleartext: *plaintext,
            ciphertext: [0; 16],
        };
        let ret = unsafe { raw::sd_ecb_block_encrypt(&mut ecb) };
        if let Err(e) = RawError::convert(ret) {
            error!("sd: ECB failed: {:?}", e);
        }
        ecb.ciphertext
    }
}

impl HostStack for SoftdeviceStack {
    fn stack_id(&self) -> StackId {
        StackId(1)
    }

    fn set_gap_identity(&mut self, name: &str, appearance: u16) -> Result<(), StackError> {
        let mut mode: raw::ble_gap_conn_sec_mode_t = unsafe { core::mem::zeroed() };
        mode.set_sm(1);
        mode.set_lv(1);
        let ret = unsafe { raw::sd_ble_gap_device_name_set(&mode, name.as_ptr(), name.len() as u16) };
        RawError::convert(ret).map_err(raw_error)?;
        let ret = unsafe { raw::sd_ble_gap_appearance_set(appearance) };
        RawError::convert(ret).map_err(raw_error)
    }

    fn start_advertising(&mut self, payload: &AdvertisingPayload<'_>) -> Result<(), StackError> {
        self.adv_data = Vec::from_slice(payload.data).map_err(|_| StackError::NoResources)?;
        self.adv_interval = u32::from(payload.interval_min);
        self.advertising = true;
        ADVERTISING_CHANGED.signal(());
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), StackError> {
        self.advertising = false;
        ADVERTISING_CHANGED.signal(());
        Ok(())
    }

    fn disconnect(&mut self, address: &BdAddr) -> Result<(), StackError> {
        let conn = self.conn.as_ref().ok_or(StackError::NotConnected)?;
        if bd_addr(&conn.peer_address()).1 != *address {
            return Err(StackError::NotConnected);
        }
        conn.disconnect().map_err(|_| StackError::NotConnected)
    }

    fn authentication_response(&mut self, _address: &BdAddr, response: AuthenticationResponse) -> Result<(), StackError> {
        match response {
            AuthenticationResponse::Pairing(caps) => self.caps = caps,
            AuthenticationResponse::LongTermKey { ltk, key_size } => {
                self.ltk_reply = Some(EncryptionInfo {
                    ltk: ltk.0,
                    flags: key_size << ENC_INFO_LTK_LEN_SHIFT,
                });
            }
            AuthenticationResponse::LongTermKeyUnavailable => self.ltk_reply = None,
            AuthenticationResponse::Passkey(value) => {
                let reply = self.passkey_reply.take().ok_or(StackError::InvalidState)?;
                let mut digits = [b'0'; 6];
                let mut rest = value;
                for d in digits.iter_mut().rev() {
                    *d = b'0' + (rest % 10) as u8;
                    rest /= 10;
                }
                reply.reply(Some(&digits));
            }
            // Just Works is confirmed by the SoftDevice itself; our own
            // keys are generated by the SoftDevice too.
            AuthenticationResponse::ConfirmationAccept(_) | AuthenticationResponse::EncryptionInformation(_) => {}
        }
        Ok(())
    }

    fn request_security(&mut self, _address: &BdAddr, _caps: &PairingCapabilities) -> Result<(), StackError> {
        let conn = self.conn.as_ref().ok_or(StackError::NotConnected)?;
        conn.request_security().map_err(|_| StackError::InvalidState)
    }

    fn start_timer(&mut self, ms: u32) -> Result<TimerId, StackError> {
        let id = TimerId(self.next_id());
        let deadline = Instant::now() + Duration::from_millis(u64::from(ms));
        self.timers.push((id, deadline)).map_err(|_| StackError::NoResources)?;
        Ok(id)
    }

    fn stop_timer(&mut self, timer: TimerId) {
        self.timers.retain(|(id, _)| *id != timer);
    }

    fn register_service(&mut self, table: &'static [Attribute]) -> Result<ServiceId, StackError> {
        let sd = self.setup.as_deref_mut().ok_or(StackError::InvalidState)?;
        let handles = Self::add_table(sd, table)?;
        let id = ServiceId(self.next_id());
        self.services
            .push(RegisteredService { id, table, handles })
            .map_err(|_| StackError::NoResources)?;
        debug!("sd: service {} registered, {} attributes", id.0, table.len());
        Ok(id)
    }

    fn unregister_service(&mut self, _service: ServiceId) -> Result<(), StackError> {
        // the SoftDevice attribute table only grows
        Err(StackError::InvalidState)
    }

    fn read_response(&mut self, txn: TransactionId, value: &[u8]) -> Result<(), StackError> {
        match self.pending_read.take() {
            Some((pending, reply)) if pending == txn => reply.reply(Ok(Some(value))).map_err(raw_error),
            other => {
                self.pending_read = other;
                Ok(())
            }
        }
    }

    fn write_response(&mut self, txn: TransactionId) -> Result<(), StackError> {
        match self.pending_write.take() {
            Some((pending, reply)) if pending == txn => reply.reply(Ok(None)).map_err(raw_error),
            // SoftDevice-handled writes (CCCDs) need no response
            other => {
                self.pending_write = other;
                Ok(())
            }
        }
    }

    fn error_response(&mut self, txn: TransactionId, _attribute_offset: u16, error: AttError) -> Result<(), StackError> {
        if let Some((pending, reply)) = self.pending_read.take() {
            if pending == txn {
                return reply.reply(Err(gatt_error(error))).map_err(raw_error);
            }
            self.pending_read = Some((pending, reply));
        }
        if let Some((pending, reply)) = self.pending_write.take() {
            if pending == txn {
                return reply.reply(Err(gatt_error(error))).map_err(raw_error);
            }
            self.pending_write = Some((pending, reply));
        }
        Ok(())
    }

    fn notify(&mut self, conn: ConnHandle, attribute: AttributeRef, value: &[u8]) -> Result<(), StackError> {
        let handle = self.value_handle(attribute)?;
        let conn = self.conn_for(conn)?;
        gatt_server::notify_value(conn, handle, value).map_err(|e| match e {
            gatt_server::NotifyValueError::Disconnected => StackError::NotConnected,
            gatt_server::NotifyValueError::Raw(e) => raw_error(e),
        })
    }

    fn indicate(&mut self, conn: ConnHandle, attribute: AttributeRef, value: &[u8]) -> Result<TransactionId, StackError> {
        let handle = self.value_handle(attribute)?;
        gatt_server::indicate_value(self.conn_for(conn)?, handle, value).map_err(|e| match e {
            gatt_server::IndicateValueError::Disconnected => StackError::NotConnected,
            gatt_server::IndicateValueError::Raw(e) => raw_error(e),
        })?;
        let txn = TransactionId(self.next_id());
        self.indications
            .push((attribute.service, handle, txn))
            .map_err(|_| StackError::NoResources)?;
        Ok(txn)
    }

    fn random(&mut self, buf: &mut [u8]) -> Result<(), StackError> {
        let sd = self.sd.ok_or(StackError::InvalidState)?;
        nrf_softdevice::random_bytes(sd, buf).map_err(|_| StackError::NoResources)
    }
}

/// The BLE context shared by the SoftDevice callbacks and the main loop.
pub struct Ble {
    pub stack: SoftdeviceStack,
    pub hogp: Hogp,
}

impl Ble {
    fn gap(&mut self, event: GapEvent) {
        if let Err(e) = self.hogp.on_gap_event(&mut self.stack, &event) {
            warn!("sd: GAP event failed: {}", e);
        }
    }

    fn gatt(&mut self, event: GattEvent<'_>) {
        if let Err(e) = self.hogp.on_gatt_event(&mut self.stack, &event) {
            warn!("sd: GATT event failed: {}", e);
        }
    }

    fn address_of(&self, conn: &Connection) -> BdAddr {
        bd_addr(&conn.peer_address()).1
    }

    /// A connection came out of advertising.
    pub fn connected(&mut self, conn: &Connection) {
        self.stack.advertising = false;
        self.stack.conn = Some(conn.clone());
        let (address_type, address) = bd_addr(&conn.peer_address());
        let raw = conn.conn_params();
        let params = ConnectionParameters {
            interval_ms: u32::from(raw.max_conn_interval) * 5 / 4,
            slave_latency: raw.slave_latency,
            supervision_timeout_ms: u32::from(raw.conn_sup_timeout) * 10,
        };
        self.gap(GapEvent::ConnectionComplete {
            status: HCI_SUCCESS,
            conn: conn.handle().unwrap_or_default(),
            address_type,
            address,
            params,
        });
    }

    pub fn advertising_failed(&mut self) {
        self.stack.advertising = false;
        self.gap(GapEvent::ConnectionComplete {
            status: HCI_CONNECTION_FAILED,
            conn: 0,
            address_type: AddressType::Public,
            address: BdAddr::default(),
            params: ConnectionParameters::default(),
        });
    }

    pub fn disconnected(&mut self, conn: &Connection) {
        let (address_type, address) = bd_addr(&conn.peer_address());
        let handle = self
            .stack
            .conn
            .take()
            .and_then(|c| c.handle())
            .unwrap_or_default();
        self.stack.indications.clear();
        self.stack.pending_read = None;
        self.stack.pending_write = None;
        self.stack.passkey_reply = None;
        self.gap(GapEvent::DisconnectionComplete {
            conn: handle,
            address_type,
            address,
            reason: HCI_REMOTE_USER_TERMINATED,
        });
    }

    /// Drain expired security timers into the state machine.
    pub fn poll_timers(&mut self) {
        while let Some(timer) = self.stack.take_expired_timer(Instant::now()) {
            if let Err(e) = self.hogp.on_timer(&mut self.stack, timer) {
                warn!("sd: timer event failed: {}", e);
            }
        }
    }
}

/// Forwards SoftDevice GATT and security callbacks to [`Ble`].
pub struct Bridge {
    ble: &'static RefCell<Ble>,
}

impl Bridge {
    pub const fn new(ble: &'static RefCell<Ble>) -> Self {
        Self { ble }
    }

    fn write(&self, conn: &Connection, handle: u16, op: WriteOp, offset: usize, data: &[u8], reply: Option<DeferredWriteReply>) {
        let mut ble = self.ble.borrow_mut();
        let Some((service, attribute_offset)) = ble.stack.locate(handle) else {
            debug!("sd: write to unmapped handle {}", handle);
            return;
        };
        let txn = TransactionId(ble.stack.next_id());
        if let Some(reply) = reply {
            ble.stack.pending_write = Some((txn, reply));
        }
        let kind = match op {
            WriteOp::Command | WriteOp::SignedWriteCommand => WriteKind::Command,
            _ => WriteKind::Request,
        };
        ble.gatt(GattEvent::Write(WriteRequest {
            service,
            conn: conn.handle().unwrap_or_default(),
            txn,
            attribute_offset,
            value_offset: offset as u16,
            delayed: matches!(op, WriteOp::PrepareWriteRequest | WriteOp::ExecuteWriteRequest),
            kind,
            value: data,
        }));
    }
}

impl gatt_server::Server for Bridge {
    type Event = ();

    fn on_write(&self, conn: &Connection, handle: u16, op: WriteOp, offset: usize, data: &[u8]) -> Option<()> {
        self.write(conn, handle, op, offset, data, None);
        None
    }

    fn on_deferred_read(&self, handle: u16, offset: usize, reply: DeferredReadReply) -> Option<()> {
        let mut ble = self.ble.borrow_mut();
        let Some(conn) = ble.stack.conn.as_ref().and_then(|c| c.handle()) else {
            return None;
        };
        let Some((service, attribute_offset)) = ble.stack.locate(handle) else {
            return None;
        };
        let txn = TransactionId(ble.stack.next_id());
        ble.stack.pending_read = Some((txn, reply));
        ble.gatt(GattEvent::Read(ReadRequest {
            service,
            conn,
            txn,
            attribute_offset,
            value_offset: offset as u16,
        }));
        None
    }

    fn on_deferred_write(
        &self,
        handle: u16,
        op: WriteOp,
        offset: usize,
        data: &[u8],
        reply: DeferredWriteReply,
    ) -> Option<()> {
        let conn = self.ble.borrow().stack.conn.clone();
        if let Some(conn) = conn {
            self.write(&conn, handle, op, offset, data, Some(reply));
        }
        None
    }

    fn on_indicate_confirm(&self, conn: &Connection, handle: u16) -> Option<()> {
        let mut ble = self.ble.borrow_mut();
        let pos = ble.stack.indications.iter().position(|(_, h, _)| *h == handle)?;
        let (service, _, txn) = ble.stack.indications.swap_remove(pos);
        ble.gatt(GattEvent::Confirmation {
            service,
            conn: conn.handle().unwrap_or_default(),
            txn,
            status: 0,
        });
        None
    }
}

impl SecurityHandler for Bridge {
    fn io_capabilities(&self) -> IoCapabilities {
        match self.ble.borrow().stack.caps.io {
            IoCapability::DisplayOnly => IoCapabilities::DisplayOnly,
            IoCapability::DisplayYesNo => IoCapabilities::YesNo,
            IoCapability::KeyboardOnly => IoCapabilities::KeyboardOnly,
            IoCapability::NoInputNoOutput => IoCapabilities::None,
            IoCapability::KeyboardDisplay => IoCapabilities::KeyboardDisplay,
        }
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        self.ble.borrow().stack.caps.bonding == BondingType::Bonding
    }

    fn display_passkey(&self, passkey: &[u8; 6]) {
        let value = passkey
            .iter()
            .fold(0u32, |acc, d| acc * 10 + u32::from(d.wrapping_sub(b'0')));
        let mut ble = self.ble.borrow_mut();
        let Some(conn) = ble.stack.conn.clone() else {
            return;
        };
        let address = ble.address_of(&conn);
        ble.gap(GapEvent::Authentication {
            address,
            event: AuthEvent::ConfirmationRequest(Confirmation::Display { passkey: value }),
        });
    }

    fn enter_passkey(&self, reply: PasskeyReply) {
        let mut ble = self.ble.borrow_mut();
        let Some(conn) = ble.stack.conn.clone() else {
            return;
        };
        ble.stack.passkey_reply = Some(reply);
        let address = ble.address_of(&conn);
        ble.gap(GapEvent::Authentication {
            address,
            event: AuthEvent::ConfirmationRequest(Confirmation::Passkey),
        });
    }

    fn on_security_update(&self, conn: &Connection, security_mode: SecurityMode) {
        self.ble.borrow_mut().gap(GapEvent::EncryptionChange {
            conn: conn.handle().unwrap_or_default(),
            encrypted: security_mode != SecurityMode::Open,
        });
    }

    fn on_bonded(&self, conn: &Connection, master_id: MasterId, key: EncryptionInfo, peer_id: IdentityKey) {
        let mut ble = self.ble.borrow_mut();
        let address = ble.address_of(conn);
        let (address_type, identity) = bd_addr(&peer_id.addr);
        let key_size = match key.flags >> ENC_INFO_LTK_LEN_SHIFT {
            0 => MAX_ENCRYPTION_KEY_SIZE,
            len => len,
        };
        info!("sd: bonded with {}", address.0);
        ble.gap(GapEvent::Authentication {
            address,
            event: AuthEvent::KeysDistributed(EncryptionInformation {
                ltk: Ltk(key.ltk),
                ediv: master_id.ediv,
                rand: master_id.rand,
                key_size,
            }),
        });
        ble.gap(GapEvent::Authentication {
            address,
            event: AuthEvent::IdentityInformation {
                address_type,
                address: identity,
                irk: Irk(peer_id.irk.as_raw().irk),
            },
        });
        ble.gap(GapEvent::Authentication {
            address,
            event: AuthEvent::PairingStatus {
                status: PairingStatus::Success,
                key_size,
            },
        });
    }

    fn get_key(&self, conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        let mut ble = self.ble.borrow_mut();
        let address = ble.address_of(conn);
        ble.stack.ltk_reply = None;
        ble.gap(GapEvent::Authentication {
            address,
            event: AuthEvent::LongTermKeyRequest {
                ediv: master_id.ediv,
                rand: master_id.rand,
            },
        });
        ble.stack.ltk_reply.take()
    }
}
