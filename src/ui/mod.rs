//! User interface subsystem - OLED display + physical buttons.
//!
//! The [`Ui`] state machine reacts to button presses and BLE mailbox
//! messages and tells the main loop what to do through [`UiAction`].
//! Rendering reads the state back through the accessors.
//!
//! ## Components
//!
//! - **Display**: SSD1306 128×64 OLED via I²C (embedded only)
//! - **Buttons**: 5 tactile switches with debouncing (UP, DOWN, LEFT, RIGHT, SELECT)

#[cfg(feature = "embedded")]
pub mod buttons;
pub mod credentials;
#[cfg(feature = "embedded")]
pub mod display;
pub mod input_logic;
pub mod pin;

use crate::config::PASSKEY_DIGITS;
use crate::sched::MailboxMessage;
use credentials::CredentialStore;
use input_logic::{digit_down, digit_up, select_next, select_prev};
use pin::{PinGate, PinOutcome};

/// Screens (views) the UI can be in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Screen {
    /// PIN entry - nothing else is reachable until unlocked.
    Locked,
    /// Credential list.
    Home,
    /// Keying in the passkey the host displays.
    Passkey,
    /// USB mass-storage mode, buttons are ignored.
    UsbMode,
}

/// Physical button events (after debouncing).
///
/// - UP/DOWN: move through the list, change the digit under the cursor
/// - LEFT: type the login / step back a digit
/// - RIGHT: type the password / accept a digit
/// - SELECT: type login and password / accept a digit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonEvent {
    Up,
    Down,
    Left,
    Right,
    Select,
}

/// Work the main loop performs on behalf of the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UiAction {
    /// Type the login of entry `n`, followed by Tab.
    SendLogin(usize),
    /// Type the password of entry `n`, followed by Tab.
    SendPassword(usize),
    /// Type login then password of entry `n`.
    SendCredential(usize),
    /// Hand one passkey digit to the BLE layer.
    PasskeyDigit(u8),
    /// Too many wrong PINs.
    PowerOff,
}

pub struct Ui {
    screen: Screen,
    /// Where to return after passkey entry.
    resume: Screen,
    pin: PinGate,
    selected: usize,
    passkey_digit: u8,
    passkey_count: u8,
    connected: bool,
    encrypted: bool,
}

impl Ui {
    pub const fn new() -> Self {
        Self {
            screen: Screen::Locked,
            resume: Screen::Locked,
            pin: PinGate::new(),
            selected: 0,
            passkey_digit: 0,
            passkey_count: 0,
            connected: false,
            encrypted: false,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn pin(&self) -> &PinGate {
        &self.pin
    }

    /// Digit currently shown on the passkey screen.
    pub fn passkey_digit(&self) -> u8 {
        self.passkey_digit
    }

    /// Passkey digits already handed over.
    pub fn passkey_count(&self) -> u8 {
        self.passkey_count
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Handle one debounced button press.
    pub fn on_button<S: CredentialStore + ?Sized>(&mut self, button: ButtonEvent, store: &S) -> Option<UiAction> {
        match self.screen {
            Screen::Locked => self.on_locked(button, store),
            Screen::Home => self.on_home(button, store),
            Screen::Passkey => self.on_passkey(button),
            Screen::UsbMode => None,
        }
    }

    fn on_locked<S: CredentialStore + ?Sized>(&mut self, button: ButtonEvent, store: &S) -> Option<UiAction> {
        match button {
            ButtonEvent::Up => self.pin.increment(),
            ButtonEvent::Down => self.pin.decrement(),
            ButtonEvent::Left => self.pin.back(),
            ButtonEvent::Right | ButtonEvent::Select => match self.pin.commit(store) {
                PinOutcome::Pending => {}
                PinOutcome::Unlocked => {
                    info!("ui: unlocked");
                    self.selected = 0;
                    self.screen = Screen::Home;
                }
                PinOutcome::Rejected { remaining } => {
                    warn!("ui: wrong PIN, {=u8} attempts left", remaining);
                }
                PinOutcome::Exhausted => return Some(UiAction::PowerOff),
            },
        }
        None
    }

    fn on_home<S: CredentialStore + ?Sized>(&mut self, button: ButtonEvent, store: &S) -> Option<UiAction> {
        if store.is_empty() {
            return None;
        }
        // the store may have shrunk since the last press
        self.selected = self.selected.min(store.len() - 1);
        match button {
            ButtonEvent::Up => {
                self.selected = select_prev(self.selected);
                None
            }
            ButtonEvent::Down => {
                self.selected = select_next(self.selected, store.len());
                None
            }
            ButtonEvent::Left => Some(UiAction::SendLogin(self.selected)),
            ButtonEvent::Right => Some(UiAction::SendPassword(self.selected)),
            ButtonEvent::Select => Some(UiAction::SendCredential(self.selected)),
        }
    }

    fn on_passkey(&mut self, button: ButtonEvent) -> Option<UiAction> {
        match button {
            ButtonEvent::Up => self.passkey_digit = digit_up(self.passkey_digit),
            ButtonEvent::Down => self.passkey_digit = digit_down(self.passkey_digit),
            ButtonEvent::Left => {}
            ButtonEvent::Right | ButtonEvent::Select => {
                let digit = self.passkey_digit;
                self.passkey_digit = 0;
                self.passkey_count += 1;
                if self.passkey_count >= PASSKEY_DIGITS {
                    self.screen = self.resume;
                }
                return Some(UiAction::PasskeyDigit(digit));
            }
        }
        None
    }

    /// Follow the BLE layer's mailbox messages.
    pub fn on_ble(&mut self, message: MailboxMessage) {
        match message {
            MailboxMessage::Connected => self.connected = true,
            MailboxMessage::Encrypted => self.encrypted = true,
            MailboxMessage::Disconnected | MailboxMessage::PairingFailed => {
                if message == MailboxMessage::Disconnected {
                    self.connected = false;
                }
                self.encrypted = false;
                self.leave_passkey();
            }
            MailboxMessage::PasskeyRequested => {
                if self.screen != Screen::Passkey && self.screen != Screen::UsbMode {
                    self.resume = self.screen;
                    self.screen = Screen::Passkey;
                }
                self.passkey_digit = 0;
                self.passkey_count = 0;
            }
            MailboxMessage::PasskeyEntered => self.leave_passkey(),
            MailboxMessage::HostSuspended | MailboxMessage::HostResumed | MailboxMessage::LedsChanged => {}
        }
    }

    fn leave_passkey(&mut self) {
        if self.screen == Screen::Passkey {
            self.screen = self.resume;
        }
    }

    /// Back to PIN entry.
    pub fn lock(&mut self) {
        self.pin.clear();
        self.screen = Screen::Locked;
        self.resume = Screen::Locked;
    }

    pub fn set_usb_mode(&mut self, usb_mode: bool) {
        match (usb_mode, self.screen) {
            (true, Screen::UsbMode) | (false, Screen::Locked | Screen::Home | Screen::Passkey) => {}
            (true, _) => {
                self.lock();
                self.screen = Screen::UsbMode;
            }
            (false, Screen::UsbMode) => self.screen = Screen::Locked,
        }
    }
}

impl Default for Ui {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PIN_LENGTH;
    use crate::ui::credentials::{Credential, SliceStore};

    const ENTRIES: [Credential<'static>; 3] = [
        Credential {
            name: "a",
            login: b"a",
            password: b"1",
        },
        Credential {
            name: "b",
            login: b"b",
            password: b"2",
        },
        Credential {
            name: "c",
            login: b"c",
            password: b"3",
        },
    ];

    fn store() -> SliceStore<'static> {
        SliceStore::new(&ENTRIES, [0; PIN_LENGTH])
    }

    fn unlocked() -> Ui {
        let mut ui = Ui::new();
        for _ in 0..PIN_LENGTH {
            assert_eq!(ui.on_button(ButtonEvent::Select, &store()), None);
        }
        assert_eq!(ui.screen(), Screen::Home);
        ui
    }

    #[test]
    fn list_navigation_and_send() {
        let mut ui = unlocked();
        let s = store();
        assert_eq!(ui.on_button(ButtonEvent::Up, &s), None);
        assert_eq!(ui.selected(), 0);
        ui.on_button(ButtonEvent::Down, &s);
        ui.on_button(ButtonEvent::Down, &s);
        ui.on_button(ButtonEvent::Down, &s);
        assert_eq!(ui.selected(), 2);
        assert_eq!(ui.on_button(ButtonEvent::Left, &s), Some(UiAction::SendLogin(2)));
        assert_eq!(ui.on_button(ButtonEvent::Right, &s), Some(UiAction::SendPassword(2)));
        assert_eq!(ui.on_button(ButtonEvent::Select, &s), Some(UiAction::SendCredential(2)));
    }

    #[test]
    fn nothing_sent_while_locked() {
        let mut ui = Ui::new();
        let s = SliceStore::new(&ENTRIES, [1; PIN_LENGTH]);
        ui.on_button(ButtonEvent::Up, &s);
        assert_eq!(ui.on_button(ButtonEvent::Right, &s), None);
        assert_eq!(ui.screen(), Screen::Locked);
    }

    #[test]
    fn wrong_pins_power_off() {
        let mut ui = Ui::new();
        let s = SliceStore::new(&ENTRIES, [1; PIN_LENGTH]);
        let mut last = None;
        for _ in 0..crate::config::PIN_MAX_ATTEMPTS {
            for _ in 0..PIN_LENGTH {
                last = ui.on_button(ButtonEvent::Select, &s);
            }
        }
        assert_eq!(last, Some(UiAction::PowerOff));
    }

    #[test]
    fn passkey_entry_returns_to_previous_screen() {
        let mut ui = unlocked();
        ui.on_ble(MailboxMessage::PasskeyRequested);
        assert_eq!(ui.screen(), Screen::Passkey);

        let s = store();
        ui.on_button(ButtonEvent::Down, &s);
        assert_eq!(ui.on_button(ButtonEvent::Select, &s), Some(UiAction::PasskeyDigit(9)));
        for _ in 1..PASSKEY_DIGITS {
            assert_eq!(ui.on_button(ButtonEvent::Right, &s), Some(UiAction::PasskeyDigit(0)));
        }
        assert_eq!(ui.screen(), Screen::Home);
    }

    #[test]
    fn pairing_failure_abandons_passkey() {
        let mut ui = Ui::new();
        ui.on_ble(MailboxMessage::Connected);
        ui.on_ble(MailboxMessage::PasskeyRequested);
        ui.on_ble(MailboxMessage::PairingFailed);
        assert_eq!(ui.screen(), Screen::Locked);
        assert!(ui.is_connected());
        ui.on_ble(MailboxMessage::Disconnected);
        assert!(!ui.is_connected());
    }

    #[test]
    fn usb_mode_ignores_buttons_and_relocks() {
        let mut ui = unlocked();
        ui.set_usb_mode(true);
        assert_eq!(ui.on_button(ButtonEvent::Select, &store()), None);
        ui.on_ble(MailboxMessage::PasskeyRequested);
        assert_eq!(ui.screen(), Screen::UsbMode);
        ui.set_usb_mode(false);
        assert_eq!(ui.screen(), Screen::Locked);
    }
}
