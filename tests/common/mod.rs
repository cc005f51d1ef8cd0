//! Recording stand-in for the vendor stack, shared by the integration
//! tests.

#![allow(dead_code)]

use blepass::ble::crypto::BlockCipher;
use blepass::ble::hogp::{DriverConfig, Hogp};
use blepass::ble::security::{AuthenticationResponse, PairingCapabilities};
use blepass::ble::stack::{
    AdvertisingPayload, AttributeRef, AuthEvent, ConnectionParameters, GapEvent, GattEvent, HostStack,
    PairingStatus, ReadRequest, ServiceId, StackId, TimerId, TransactionId, WriteKind, WriteRequest,
};
use blepass::ble::{AddressType, BdAddr, ConnHandle, HCI_SUCCESS};
use blepass::gatt::{self, Attribute, Uuid16};
use blepass::sched::MailboxMessage;
use blepass::{AttError, StackError};

pub const CONN: ConnHandle = 0x0040;
pub const PEER: BdAddr = BdAddr::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);

pub const PARAMS: ConnectionParameters = ConnectionParameters {
    interval_ms: 30,
    slave_latency: 0,
    supervision_timeout_ms: 4000,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub conn: ConnHandle,
    pub attribute: AttributeRef,
    pub value: Vec<u8>,
}

/// Records every call the firmware makes.
pub struct MockStack {
    pub id: StackId,
    pub gap_identity: Option<(String, u16)>,
    pub advertising: Option<Vec<u8>>,
    pub advertising_starts: usize,
    pub fail_advertising: bool,
    pub disconnects: Vec<BdAddr>,
    pub auth_responses: Vec<(BdAddr, AuthenticationResponse)>,
    pub security_requests: Vec<BdAddr>,
    pub timers_started: Vec<(TimerId, u32)>,
    pub timers_stopped: Vec<TimerId>,
    pub services: Vec<(ServiceId, &'static [Attribute])>,
    pub refuse_registration: bool,
    pub read_responses: Vec<(TransactionId, Vec<u8>)>,
    pub write_responses: Vec<TransactionId>,
    pub error_responses: Vec<(TransactionId, u16, AttError)>,
    pub notifications: Vec<Notification>,
    /// Every `notify` call, refused ones included.
    pub notify_attempts: usize,
    /// Refuse the `notify` call with this index (0-based) as queue full.
    pub fail_notify_at: Option<usize>,
    pub indications: Vec<(Notification, TransactionId)>,
    next_handle: u32,
}

impl MockStack {
    pub fn new() -> Self {
        Self {
            id: StackId(1),
            gap_identity: None,
            advertising: None,
            advertising_starts: 0,
            fail_advertising: false,
            disconnects: Vec::new(),
            auth_responses: Vec::new(),
            security_requests: Vec::new(),
            timers_started: Vec::new(),
            timers_stopped: Vec::new(),
            services: Vec::new(),
            refuse_registration: false,
            read_responses: Vec::new(),
            write_responses: Vec::new(),
            error_responses: Vec::new(),
            notifications: Vec::new(),
            notify_attempts: 0,
            fail_notify_at: None,
            indications: Vec::new(),
            next_handle: 0,
        }
    }

    fn next_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Id of the registered service whose table declares `uuid`.
    pub fn service(&self, uuid: Uuid16) -> ServiceId {
        self.services
            .iter()
            .find(|(_, table)| table.first() == Some(&Attribute::PrimaryService(uuid)))
            .map(|(id, _)| *id)
            .expect("service not registered")
    }

    pub fn last_auth_response(&self) -> Option<AuthenticationResponse> {
        self.auth_responses.last().map(|(_, r)| *r)
    }
}

/// Same keyed permutation the crate's unit tests use in place of AES.
impl BlockCipher for MockStack {
    fn encrypt_block(&self, key: &[u8; 16], plaintext: &[u8; 16]) -> [u8; 16] {
        let mut state = *plaintext;
        for round in 0..4u8 {
            let mut next = [0u8; 16];
            for i in 0..16 {
                let mixed = state[i] ^ key[(i + round as usize) % 16];
                next[(i * 7 + 3) % 16] = mixed.rotate_left(3).wrapping_add(state[(i + 1) % 16]) ^ round;
            }
            state = next;
        }
        state
    }
}

impl HostStack for MockStack {
    fn stack_id(&self) -> StackId {
        self.id
    }

    fn set_gap_identity(&mut self, name: &str, appearance: u16) -> Result<(), StackError> {
        self.gap_identity = Some((name.to_owned(), appearance));
        Ok(())
    }

    fn start_advertising(&mut self, payload: &AdvertisingPayload<'_>) -> Result<(), StackError> {
        if self.fail_advertising {
            return Err(StackError::NoResources);
        }
        self.advertising = Some(payload.data.to_vec());
        self.advertising_starts += 1;
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), StackError> {
        self.advertising = None;
        Ok(())
    }

    fn disconnect(&mut self, address: &BdAddr) -> Result<(), StackError> {
        self.disconnects.push(*address);
        Ok(())
    }

    fn authentication_response(
        &mut self,
        address: &BdAddr,
        response: AuthenticationResponse,
    ) -> Result<(), StackError> {
        self.auth_responses.push((*address, response));
        Ok(())
    }

    fn request_security(&mut self, address: &BdAddr, _caps: &PairingCapabilities) -> Result<(), StackError> {
        self.security_requests.push(*address);
        Ok(())
    }

    fn start_timer(&mut self, ms: u32) -> Result<TimerId, StackError> {
        let id = TimerId(self.next_handle());
        self.timers_started.push((id, ms));
        Ok(id)
    }

    fn stop_timer(&mut self, timer: TimerId) {
        self.timers_stopped.push(timer);
    }

    fn register_service(&mut self, table: &'static [Attribute]) -> Result<ServiceId, StackError> {
        if self.refuse_registration {
            return Err(StackError::NoResources);
        }
        let id = ServiceId(self.next_handle());
        self.services.push((id, table));
        Ok(id)
    }

    fn unregister_service(&mut self, service: ServiceId) -> Result<(), StackError> {
        let before = self.services.len();
        self.services.retain(|(id, _)| *id != service);
        if self.services.len() == before {
            return Err(StackError::InvalidState);
        }
        Ok(())
    }

    fn read_response(&mut self, txn: TransactionId, value: &[u8]) -> Result<(), StackError> {
        self.read_responses.push((txn, value.to_vec()));
        Ok(())
    }

    fn write_response(&mut self, txn: TransactionId) -> Result<(), StackError> {
        self.write_responses.push(txn);
        Ok(())
    }

    fn error_response(&mut self, txn: TransactionId, attribute_offset: u16, error: AttError) -> Result<(), StackError> {
        self.error_responses.push((txn, attribute_offset, error));
        Ok(())
    }

    fn notify(&mut self, conn: ConnHandle, attribute: AttributeRef, value: &[u8]) -> Result<(), StackError> {
        let attempt = self.notify_attempts;
        self.notify_attempts += 1;
        if self.fail_notify_at == Some(attempt) {
            return Err(StackError::NoResources);
        }
        self.notifications.push(Notification {
            conn,
            attribute,
            value: value.to_vec(),
        });
        Ok(())
    }

    fn indicate(&mut self, conn: ConnHandle, attribute: AttributeRef, value: &[u8]) -> Result<TransactionId, StackError> {
        let txn = TransactionId(self.next_handle());
        let sent = Notification {
            conn,
            attribute,
            value: value.to_vec(),
        };
        self.indications.push((sent, txn));
        Ok(txn)
    }

    fn random(&mut self, buf: &mut [u8]) -> Result<(), StackError> {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = 0xA0 ^ i as u8;
        }
        Ok(())
    }
}

// Fixtures

pub fn init() -> (MockStack, Hogp) {
    let mut stack = MockStack::new();
    let hogp = Hogp::init(&mut stack, &DriverConfig::default()).expect("init");
    (stack, hogp)
}

pub fn connect(stack: &mut MockStack, hogp: &mut Hogp, address_type: AddressType, address: BdAddr) {
    let event = GapEvent::ConnectionComplete {
        status: HCI_SUCCESS,
        conn: CONN,
        address_type,
        address,
        params: PARAMS,
    };
    hogp.on_gap_event(stack, &event).expect("connect");
}

pub fn disconnect(stack: &mut MockStack, hogp: &mut Hogp, address: BdAddr) {
    let event = GapEvent::DisconnectionComplete {
        conn: CONN,
        address_type: AddressType::Public,
        address,
        reason: 0x13,
    };
    hogp.on_gap_event(stack, &event).expect("disconnect");
}

pub fn auth(stack: &mut MockStack, hogp: &mut Hogp, address: BdAddr, event: AuthEvent) {
    hogp.on_gap_event(stack, &GapEvent::Authentication { address, event })
        .expect("auth event");
}

/// Just Works pairing up to a successful status.
pub fn pair(stack: &mut MockStack, hogp: &mut Hogp, address: BdAddr) {
    auth(stack, hogp, address, AuthEvent::PairingRequest(PairingCapabilities::keyboard()));
    auth(
        stack,
        hogp,
        address,
        AuthEvent::ConfirmationRequest(blepass::ble::stack::Confirmation::JustWorks),
    );
    auth(
        stack,
        hogp,
        address,
        AuthEvent::PairingStatus {
            status: PairingStatus::Success,
            key_size: 16,
        },
    );
}

pub fn read(service: ServiceId, attribute_offset: u16, value_offset: u16, txn: u32) -> GattEvent<'static> {
    GattEvent::Read(ReadRequest {
        service,
        conn: CONN,
        txn: TransactionId(txn),
        attribute_offset,
        value_offset,
    })
}

pub fn write<'a>(service: ServiceId, attribute_offset: u16, value: &'a [u8], txn: u32) -> GattEvent<'a> {
    GattEvent::Write(WriteRequest {
        service,
        conn: CONN,
        txn: TransactionId(txn),
        attribute_offset,
        value_offset: 0,
        delayed: false,
        kind: WriteKind::Request,
        value,
    })
}

pub fn write_command<'a>(service: ServiceId, attribute_offset: u16, value: &'a [u8]) -> GattEvent<'a> {
    GattEvent::Write(WriteRequest {
        service,
        conn: CONN,
        txn: TransactionId(0),
        attribute_offset,
        value_offset: 0,
        delayed: false,
        kind: WriteKind::Command,
        value,
    })
}

/// CCCD offset of the `nth` characteristic `uuid` in `table`.
pub fn cccd(table: &[Attribute], uuid: Uuid16, nth: usize) -> u16 {
    gatt::characteristic(table, uuid, nth)
        .and_then(|c| c.cccd)
        .expect("characteristic has a CCCD")
}

pub fn value(table: &[Attribute], uuid: Uuid16, nth: usize) -> u16 {
    gatt::characteristic(table, uuid, nth).expect("characteristic").value
}

/// Drain the mailbox through the task handler.
pub fn drain(stack: &mut MockStack, hogp: &mut Hogp) -> Vec<MailboxMessage> {
    let mut out = Vec::new();
    while let Some(msg) = hogp.task_handler(stack).expect("task handler") {
        out.push(msg);
    }
    out
}
