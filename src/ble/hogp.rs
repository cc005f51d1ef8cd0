//! HID-over-GATT keyboard application.
//!
//! [`Hogp`] is the context object of the whole BLE side: the peer
//! registry, the single connection, the three inline services and the
//! mailbox towards the UI. The main loop owns it and feeds it every stack
//! event through [`Hogp::on_gap_event`], [`Hogp::on_gatt_event`] and
//! [`Hogp::on_timer`], then polls [`Hogp::task_handler`].
//!
//! Bonds are never persisted. A reconnecting master presents EDIV/Rand
//! and the LTK is regenerated from [`ENCRYPTION_ROOT`] and
//! [`DIVERSIFIER_HIDING_KEY`].
//!
//! Connection lifecycle:
//!
//! ```text
//! Disconnected -> Connected (unencrypted) -> Connected (encrypted)
//!                      |  awaiting passkey
//!                      `- grace timer: slave security request
//! ```

use crate::ble::advertising::AdvertisingData;
use crate::ble::connection::{security_grace_ms, ConnFlags, ConnectionInfo};
use crate::ble::crypto;
use crate::ble::registry::{PeerRecord, PeerRegistry};
use crate::ble::security::{AuthenticationResponse, PairingCapabilities};
use crate::ble::stack::{
    AuthEvent, Confirmation, ConnectionParameters, GapEvent, GattEvent, HostStack, PairingStatus,
    SecurityEstablishment, TimerId,
};
use crate::ble::{AddressType, BdAddr, ConnHandle, Irk, HCI_SUCCESS};
use crate::config::{
    APPEARANCE_HID_KEYBOARD, DEVICE_NAME, DIVERSIFIER_HIDING_KEY, ENCRYPTION_ROOT, MAILBOX_DEPTH, MAX_PEERS,
    PASSKEY_DIGITS,
};
use crate::error::{Error, StackError};
use crate::gatt::bas::{BatteryEvent, BatteryService};
use crate::gatt::dis::DeviceInformationService;
use crate::gatt::hids::{HidEvent, HidService, InputReport};
use crate::gatt::{uuid, ClientConfig, Dispatch};
use crate::hid::ascii::TypingSequence;
use crate::hid::keyboard::KeyboardReport;
use crate::sched::{Mailbox, MailboxMessage};

/// Identity and initial state handed to [`Hogp::init`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverConfig {
    pub device_name: &'static str,
    pub appearance: u16,
    /// Battery level served until the first measurement.
    pub battery_percent: u8,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME,
            appearance: APPEARANCE_HID_KEYBOARD,
            battery_percent: 100,
        }
    }
}

pub struct Hogp {
    registry: PeerRegistry<MAX_PEERS>,
    connection: ConnectionInfo,
    /// Stands in for the registry record while the registry is full.
    unrecorded: PeerRecord,
    battery: BatteryService,
    device_info: DeviceInformationService,
    hid: HidService,
    mailbox: Mailbox<MAILBOX_DEPTH>,
    advertising: AdvertisingData,
    advertise_pending: bool,
    usb_mode: bool,
    suspended: bool,
    leds: u8,
}

impl Hogp {
    /// Register the services, set the GAP identity and start advertising.
    ///
    /// Any failure here is fatal; the caller powers off.
    pub fn init<S: HostStack + ?Sized>(stack: &mut S, config: &DriverConfig) -> Result<Self, Error> {
        if !stack.stack_id().is_valid() {
            error!("hogp: stack not open");
            return Err(Error::StackOpen(StackError::InvalidState));
        }
        stack
            .set_gap_identity(config.device_name, config.appearance)
            .map_err(Error::StackOpen)?;

        let mut battery = BatteryService::register(stack)?;
        battery.set_level(config.battery_percent);
        let device_info = DeviceInformationService::register(stack)?;
        let hid = HidService::register(stack)?;

        let advertising = AdvertisingData::new(
            config.appearance,
            &[uuid::HUMAN_INTERFACE_DEVICE, uuid::BATTERY_SERVICE, uuid::DEVICE_INFORMATION],
            config.device_name,
        )
        .map_err(|_| Error::Advertising(StackError::InvalidState))?;
        stack
            .start_advertising(&advertising.payload())
            .map_err(Error::Advertising)?;
        info!("hogp: advertising as {=str}", config.device_name);

        Ok(Self {
            registry: PeerRegistry::new(),
            connection: ConnectionInfo::new(),
            unrecorded: PeerRecord::new(AddressType::Public, BdAddr::default()),
            battery,
            device_info,
            hid,
            mailbox: Mailbox::new(),
            advertising,
            advertise_pending: false,
            usb_mode: false,
            suspended: false,
            leds: 0,
        })
    }

    // Accessors

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    pub fn registry(&self) -> &PeerRegistry<MAX_PEERS> {
        &self.registry
    }

    /// Record of the connected peer, if it has one in the registry.
    pub fn peer_record(&self) -> Option<&PeerRecord> {
        self.connection.peer.and_then(|id| self.registry.get(id))
    }

    pub fn battery_level(&self) -> u8 {
        self.battery.level()
    }

    /// Last LED state written by the host.
    pub fn leds(&self) -> u8 {
        self.leds
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_usb_mode(&self) -> bool {
        self.usb_mode
    }

    /// The link is up and encrypted: credentials may be typed.
    pub fn connection_status(&self) -> bool {
        self.connection.is_encrypted()
    }

    pub fn check_mailbox_status(&self) -> bool {
        self.mailbox.is_pending()
    }

    // Main loop

    /// Poll once per loop iteration.
    ///
    /// Consumes the oldest mailbox message, acts on it and hands it back
    /// so the UI can follow.
    pub fn task_handler<S: HostStack + ?Sized>(&mut self, stack: &mut S) -> Result<Option<MailboxMessage>, StackError> {
        if self.advertise_pending && !self.usb_mode && !self.connection.is_valid() {
            self.advertise(stack);
        }
        let Some(msg) = self.mailbox.try_wait() else {
            return Ok(None);
        };
        if msg == MailboxMessage::PasskeyEntered && self.connection.is_awaiting_passkey() {
            self.connection.flags.remove(ConnFlags::AWAITING_PASSKEY);
            let passkey = self.connection.passkey.value();
            debug!("hogp: passkey entered");
            stack.authentication_response(&self.connection.address, AuthenticationResponse::Passkey(passkey))?;
        }
        Ok(Some(msg))
    }

    /// Feed one digit of the passkey the master displays.
    ///
    /// Returns `true` once every digit is in; the response goes out from
    /// the next [`Self::task_handler`] call.
    pub fn enter_passkey_digit(&mut self, digit: u8) -> bool {
        if !self.connection.is_awaiting_passkey() {
            return false;
        }
        let before = self.connection.passkey.digits();
        let complete = self.connection.passkey.push(digit, PASSKEY_DIGITS);
        if complete && before < PASSKEY_DIGITS {
            self.post(MailboxMessage::PasskeyEntered);
        }
        complete
    }

    /// Whether the host can receive keystrokes: the link is encrypted and
    /// the input report of the current protocol mode is subscribed.
    pub fn typing_allowed(&self) -> bool {
        if !self.connection.is_encrypted() {
            return false;
        }
        let record = self.link_record();
        let cccd = match InputReport::from(self.hid.protocol_mode()) {
            InputReport::Report => record.report_input_cccd,
            InputReport::Boot => record.boot_input_cccd,
        };
        cccd.contains(ClientConfig::NOTIFY)
    }

    /// Type `text` followed by Tab on the host.
    ///
    /// Silently does nothing unless [`Self::typing_allowed`]. If a frame
    /// cannot be sent, an all-keys-up report is attempted before the
    /// error is returned so no key stays pressed on the host.
    pub fn send_data_report<S: HostStack + ?Sized>(&mut self, stack: &mut S, text: &[u8]) -> Result<(), StackError> {
        if !self.typing_allowed() {
            trace!("hogp: typing not allowed, report skipped");
            return Ok(());
        }
        for frame in TypingSequence::new(text) {
            if let Err(e) = self.send_key_frame(stack, frame) {
                warn!("hogp: typing aborted: {}", e);
                self.release_keys(stack);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Send one keyboard frame on the current link.
    pub fn send_key_frame<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        frame: KeyboardReport,
    ) -> Result<(), StackError> {
        if !self.connection.is_valid() {
            return Err(StackError::NotConnected);
        }
        let conn = self.connection.handle;
        self.hid.notify_input(stack, conn, frame)
    }

    /// Best-effort all-keys-up report.
    pub fn release_keys<S: HostStack + ?Sized>(&mut self, stack: &mut S) {
        if let Err(e) = self.send_key_frame(stack, KeyboardReport::empty()) {
            warn!("hogp: key release failed: {}", e);
        }
    }

    /// Store `percent` and notify it if the peer subscribed and has not
    /// seen this level yet.
    pub fn update_battery_level<S: HostStack + ?Sized>(&mut self, stack: &mut S, percent: u8) -> Result<(), StackError> {
        self.battery.set_level(percent);
        if !self.connection.is_valid() {
            return Ok(());
        }
        let level = self.battery.level();
        let conn = self.connection.handle;
        let record = self.link_record_mut();
        if !record.battery_cccd.contains(ClientConfig::NOTIFY) || record.last_battery_level == Some(level) {
            return Ok(());
        }
        record.last_battery_level = Some(level);
        self.battery.notify(stack, conn)
    }

    /// Give the radio up while the USB mass-storage mode is active.
    pub fn enter_usb_mode<S: HostStack + ?Sized>(&mut self, stack: &mut S) -> Result<(), StackError> {
        if self.usb_mode {
            return Ok(());
        }
        info!("hogp: entering USB mode");
        self.usb_mode = true;
        self.advertise_pending = false;
        if self.connection.is_valid() {
            stack.disconnect(&self.connection.address)
        } else {
            stack.stop_advertising()
        }
    }

    pub fn leave_usb_mode<S: HostStack + ?Sized>(&mut self, stack: &mut S) {
        if !self.usb_mode {
            return;
        }
        info!("hogp: leaving USB mode");
        self.usb_mode = false;
        if !self.connection.is_valid() {
            self.advertise(stack);
        }
    }

    // Stack events

    pub fn on_gap_event<S: HostStack + ?Sized>(&mut self, stack: &mut S, event: &GapEvent) -> Result<(), StackError> {
        match *event {
            GapEvent::ConnectionComplete {
                status,
                conn,
                address_type,
                address,
                params,
            } => self.on_connected(stack, status, conn, address_type, address, params),
            GapEvent::DisconnectionComplete { conn, reason, .. } => {
                self.on_disconnected(stack, conn, reason);
                Ok(())
            }
            GapEvent::EncryptionChange { conn, encrypted } => {
                if !self.connection.is_handle(conn) {
                    return Ok(());
                }
                if encrypted {
                    self.cancel_security_timer(stack);
                    self.set_encrypted();
                } else {
                    warn!("hogp: encryption dropped on {}", conn);
                    self.connection.flags.remove(ConnFlags::ENCRYPTED);
                }
                Ok(())
            }
            GapEvent::Authentication { address, event } => {
                if !self.connection.is_peer(&address) {
                    warn!("hogp: security event for unknown peer {}", address);
                    return Ok(());
                }
                self.on_authentication(stack, event)
            }
        }
    }

    fn on_connected<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        status: u8,
        conn: ConnHandle,
        address_type: AddressType,
        address: BdAddr,
        params: ConnectionParameters,
    ) -> Result<(), StackError> {
        if status != HCI_SUCCESS {
            warn!("hogp: connection failed with status {=u8:#x}", status);
            if !self.usb_mode {
                self.advertise(stack);
            }
            return Ok(());
        }
        if self.connection.is_valid() {
            warn!("hogp: second link {} refused", conn);
            return stack.disconnect(&address);
        }

        info!("hogp: connected {} ({})", conn, address);
        self.connection.open(conn, address_type, address, params);
        self.hid.reset();
        self.suspended = false;
        self.advertise_pending = false;
        self.post(MailboxMessage::Connected);

        if let Some(id) = self.registry.find_by_address(&*stack, address_type, &address) {
            // bonded: the master should re-encrypt on its own
            self.connection.peer = Some(id);
            let grace = security_grace_ms(&params);
            debug!("hogp: known peer, security grace {} ms", grace);
            self.connection.security_timer = Some(stack.start_timer(grace)?);
        } else if let Some(id) = self.registry.create(address_type, address) {
            self.connection.peer = Some(id);
        } else {
            warn!("hogp: peer registry full, {} not recorded", address);
            self.unrecorded = PeerRecord::new(address_type, address);
        }
        Ok(())
    }

    fn on_disconnected<S: HostStack + ?Sized>(&mut self, stack: &mut S, conn: ConnHandle, reason: u8) {
        if !self.connection.is_handle(conn) {
            debug!("hogp: disconnect of unknown link {}", conn);
            return;
        }
        info!("hogp: disconnected {}, reason {=u8:#x}", conn, reason);
        self.cancel_security_timer(stack);
        if !self.connection.is_encrypted() {
            // never trusted: forget it
            if let Some(id) = self.connection.peer {
                self.registry.remove(id);
                debug!("hogp: unencrypted peer dropped");
            }
        }
        self.connection.clear();
        self.hid.reset();
        self.suspended = false;
        self.post(MailboxMessage::Disconnected);
        if !self.usb_mode {
            self.advertise(stack);
        }
    }

    fn on_authentication<S: HostStack + ?Sized>(&mut self, stack: &mut S, event: AuthEvent) -> Result<(), StackError> {
        let address = self.connection.address;
        match event {
            AuthEvent::LongTermKeyRequest { ediv, rand } => {
                self.cancel_security_timer(stack);
                debug!("hogp: LTK request, ediv {=u16:#x}", ediv);
                let record = self.link_record();
                let (ltk, key_size) = match record.stack_key_for(ediv, &rand) {
                    Some(key) => (key.ltk, key.key_size),
                    None => {
                        let ltk = crypto::diversify_ltk(&*stack, &ENCRYPTION_ROOT, &DIVERSIFIER_HIDING_KEY, ediv, &rand);
                        (ltk, record.effective_key_size())
                    }
                };
                stack.authentication_response(&address, AuthenticationResponse::LongTermKey { ltk, key_size })
            }
            AuthEvent::PairingRequest(_) => {
                self.cancel_security_timer(stack);
                info!("hogp: pairing request");
                stack.authentication_response(&address, AuthenticationResponse::Pairing(PairingCapabilities::keyboard()))
            }
            AuthEvent::ConfirmationRequest(Confirmation::JustWorks) => {
                debug!("hogp: just works, accepting");
                stack.authentication_response(&address, AuthenticationResponse::ConfirmationAccept(true))
            }
            AuthEvent::ConfirmationRequest(Confirmation::Passkey) => {
                info!("hogp: passkey requested");
                self.connection.flags.insert(ConnFlags::AWAITING_PASSKEY);
                self.connection.passkey.reset();
                self.post(MailboxMessage::PasskeyRequested);
                Ok(())
            }
            AuthEvent::ConfirmationRequest(Confirmation::Display { passkey }) => {
                // nothing to show it on during pairing
                info!("hogp: passkey {=u32} for display", passkey);
                Ok(())
            }
            AuthEvent::EncryptionInformationRequest { key_size } => {
                let mut random = [0u8; 10];
                stack.random(&mut random)?;
                let div = u16::from_le_bytes([random[0], random[1]]);
                let mut rand = [0u8; 8];
                rand.copy_from_slice(&random[2..]);
                let info = crypto::new_encryption_info(
                    &*stack,
                    &ENCRYPTION_ROOT,
                    &DIVERSIFIER_HIDING_KEY,
                    div,
                    rand,
                    key_size,
                );
                stack.authentication_response(&address, AuthenticationResponse::EncryptionInformation(info))
            }
            AuthEvent::KeysDistributed(info) => {
                debug!("hogp: stack distributed its own LTK, ediv {=u16:#x}", info.ediv);
                self.link_record_mut().stack_key = Some(info);
                Ok(())
            }
            AuthEvent::IdentityInformation {
                address_type,
                address: identity,
                irk,
            } => {
                self.adopt_identity(stack, address_type, identity, irk);
                Ok(())
            }
            AuthEvent::PairingStatus {
                status: PairingStatus::Success,
                key_size,
            } => {
                info!("hogp: paired, key size {=u8}", key_size);
                self.cancel_security_timer(stack);
                self.link_record_mut().key_size = key_size;
                self.connection.flags.remove(ConnFlags::AWAITING_PASSKEY);
                self.set_encrypted();
                Ok(())
            }
            AuthEvent::PairingStatus {
                status: PairingStatus::Failed(reason),
                ..
            } => {
                warn!("hogp: pairing failed, reason {=u8:#x}", reason);
                self.drop_untrusted(stack)
            }
            AuthEvent::SecurityEstablishmentComplete { status } => match status {
                SecurityEstablishment::NoError | SecurityEstablishment::DeviceTriedToRepair => {
                    debug!("hogp: security established ({})", status);
                    Ok(())
                }
                SecurityEstablishment::Failed(code) => {
                    warn!("hogp: security establishment failed, {=u8:#x}", code);
                    self.drop_untrusted(stack)
                }
            },
        }
    }

    /// Rebase the peer's record onto its identity address so later
    /// resolvable private addresses find it.
    fn adopt_identity<S: HostStack + ?Sized>(
        &mut self,
        stack: &mut S,
        address_type: AddressType,
        identity: BdAddr,
        irk: Irk,
    ) {
        info!("hogp: identity {}", identity);
        // an older bond of the same identity is superseded
        if let Some(old) = self.registry.find_by_address(&*stack, address_type, &identity) {
            if Some(old) != self.connection.peer {
                self.registry.remove(old);
            }
        }
        let record = self.link_record_mut();
        record.address_type = address_type;
        record.address = identity;
        record.irk = Some(irk);
    }

    /// Disconnect and forget the peer after a security failure.
    fn drop_untrusted<S: HostStack + ?Sized>(&mut self, stack: &mut S) -> Result<(), StackError> {
        self.cancel_security_timer(stack);
        if let Some(id) = self.connection.peer.take() {
            self.registry.remove(id);
        }
        self.connection.flags.remove(ConnFlags::ENCRYPTED | ConnFlags::AWAITING_PASSKEY);
        self.post(MailboxMessage::PairingFailed);
        stack.disconnect(&self.connection.address)
    }

    /// The security grace timer fired.
    ///
    /// A timer other than the one currently armed is stale and ignored.
    pub fn on_timer<S: HostStack + ?Sized>(&mut self, stack: &mut S, timer: TimerId) -> Result<(), StackError> {
        if self.connection.security_timer != Some(timer) {
            debug!("hogp: stale timer {}", timer);
            return Ok(());
        }
        self.connection.security_timer = None;
        if !self.connection.is_valid() || self.connection.is_encrypted() {
            return Ok(());
        }
        info!("hogp: no re-encryption, sending security request");
        stack.request_security(&self.connection.address, &PairingCapabilities::keyboard())
    }

    pub fn on_gatt_event<S: HostStack + ?Sized>(&mut self, stack: &mut S, event: &GattEvent<'_>) -> Result<(), StackError> {
        match self.battery.handle_gatt_event(stack, event)? {
            Dispatch::Ignored => {}
            Dispatch::Handled => return Ok(()),
            Dispatch::Event(BatteryEvent::ReadClientConfiguration { txn, .. }) => {
                let config = self.link_record().battery_cccd;
                return self.battery.respond_client_configuration(stack, txn, config);
            }
            Dispatch::Event(BatteryEvent::ClientConfigurationChanged { config, .. }) => {
                let record = self.link_record_mut();
                record.battery_cccd = config;
                record.last_battery_level = None;
                return Ok(());
            }
        }
        if self.device_info.handle_gatt_event(stack, event)? != Dispatch::Ignored {
            return Ok(());
        }
        let encrypted = self.connection.is_encrypted();
        match self.hid.handle_gatt_event(stack, event, encrypted)? {
            Dispatch::Ignored => {
                debug!("hogp: event for unknown service {}", event.service());
                Ok(())
            }
            Dispatch::Handled => Ok(()),
            Dispatch::Event(event) => self.on_hid_event(stack, event),
        }
    }

    fn on_hid_event<S: HostStack + ?Sized>(&mut self, stack: &mut S, event: HidEvent) -> Result<(), StackError> {
        match event {
            HidEvent::ReadClientConfiguration { txn, report, .. } => {
                let record = self.link_record();
                let config = match report {
                    InputReport::Report => record.report_input_cccd,
                    InputReport::Boot => record.boot_input_cccd,
                };
                return self.hid.respond_client_configuration(stack, txn, config);
            }
            HidEvent::ClientConfigurationChanged { report, config, .. } => {
                let record = self.link_record_mut();
                match report {
                    InputReport::Report => record.report_input_cccd = config,
                    InputReport::Boot => record.boot_input_cccd = config,
                }
            }
            HidEvent::ProtocolModeChanged(mode) => debug!("hogp: protocol mode {}", mode),
            HidEvent::LedsChanged(leds) => {
                self.leds = leds;
                self.post(MailboxMessage::LedsChanged);
            }
            HidEvent::Suspend => {
                self.suspended = true;
                self.post(MailboxMessage::HostSuspended);
            }
            HidEvent::ExitSuspend => {
                self.suspended = false;
                self.post(MailboxMessage::HostResumed);
            }
        }
        Ok(())
    }

    // Helpers

    fn link_record(&self) -> &PeerRecord {
        match self.connection.peer.and_then(|id| self.registry.get(id)) {
            Some(record) => record,
            None => &self.unrecorded,
        }
    }

    fn link_record_mut(&mut self) -> &mut PeerRecord {
        match self.connection.peer.and_then(|id| self.registry.get_mut(id)) {
            Some(record) => record,
            None => &mut self.unrecorded,
        }
    }

    fn set_encrypted(&mut self) {
        if !self.connection.flags.contains(ConnFlags::ENCRYPTED) {
            self.connection.flags.insert(ConnFlags::ENCRYPTED);
            self.post(MailboxMessage::Encrypted);
        }
    }

    fn cancel_security_timer<S: HostStack + ?Sized>(&mut self, stack: &mut S) {
        if let Some(timer) = self.connection.take_security_timer() {
            stack.stop_timer(timer);
        }
    }

    fn advertise<S: HostStack + ?Sized>(&mut self, stack: &mut S) {
        match stack.start_advertising(&self.advertising.payload()) {
            Ok(()) => self.advertise_pending = false,
            Err(e) => {
                warn!("hogp: advertising failed ({}), will retry", e);
                self.advertise_pending = true;
            }
        }
    }

    fn post(&mut self, msg: MailboxMessage) {
        // a full mailbox is counted and logged by the mailbox itself
        let _ = self.mailbox.post(msg);
    }
}
