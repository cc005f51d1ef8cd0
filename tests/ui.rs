//! Buttons and screens driving the keyboard end to end.

mod common;

use blepass::ble::security::AuthenticationResponse;
use blepass::ble::stack::{AuthEvent, Confirmation};
use blepass::ble::AddressType;
use blepass::gatt::{hids, uuid};
use blepass::sched::MailboxMessage;
use blepass::ui::credentials::{Credential, CredentialStore, SliceStore};
use blepass::ui::{ButtonEvent, Screen, Ui, UiAction};

use common::*;

const ENTRIES: [Credential<'static>; 2] = [
    Credential {
        name: "mail",
        login: b"ab",
        password: b"c",
    },
    Credential {
        name: "forge",
        login: b"dev",
        password: b"x",
    },
];

fn store() -> SliceStore<'static> {
    SliceStore::new(&ENTRIES, [0, 0, 0, 1])
}

fn press(ui: &mut Ui, store: &SliceStore<'_>, buttons: &[ButtonEvent]) -> Vec<UiAction> {
    buttons.iter().filter_map(|b| ui.on_button(*b, store)).collect()
}

fn unlock(ui: &mut Ui, store: &SliceStore<'_>) {
    use ButtonEvent::*;
    assert!(press(ui, store, &[Select, Select, Select, Up, Select]).is_empty());
    assert_eq!(ui.screen(), Screen::Home);
}

fn follow(ui: &mut Ui, stack: &mut MockStack, hogp: &mut blepass::ble::hogp::Hogp) {
    for msg in drain(stack, hogp) {
        ui.on_ble(msg);
    }
}

#[test]
fn passkey_screen_keys_the_digits_into_pairing() {
    use ButtonEvent::*;
    let store = store();
    let mut ui = Ui::new();
    let (mut stack, mut hogp) = init();
    unlock(&mut ui, &store);

    connect(&mut stack, &mut hogp, AddressType::Public, PEER);
    auth(&mut stack, &mut hogp, PEER, AuthEvent::ConfirmationRequest(Confirmation::Passkey));
    follow(&mut ui, &mut stack, &mut hogp);
    assert!(ui.is_connected());
    assert_eq!(ui.screen(), Screen::Passkey);

    // 000042
    let actions = press(&mut ui, &store, &[Select, Select, Select, Select, Up, Up, Up, Up, Select, Up, Up, Right]);
    assert_eq!(actions.len(), 6);
    for action in actions {
        let UiAction::PasskeyDigit(digit) = action else {
            panic!("unexpected {action:?}");
        };
        hogp.enter_passkey_digit(digit);
    }
    assert_eq!(ui.screen(), Screen::Home);

    follow(&mut ui, &mut stack, &mut hogp);
    assert_eq!(stack.last_auth_response(), Some(AuthenticationResponse::Passkey(42)));
}

#[test]
fn home_screen_types_the_selected_entry() {
    use ButtonEvent::*;
    let store = store();
    let mut ui = Ui::new();
    let (mut stack, mut hogp) = init();
    unlock(&mut ui, &store);

    connect(&mut stack, &mut hogp, AddressType::Public, PEER);
    pair(&mut stack, &mut hogp, PEER);
    let hid = stack.service(uuid::HUMAN_INTERFACE_DEVICE);
    hogp.on_gatt_event(&mut stack, &write(hid, cccd(&hids::TABLE, uuid::REPORT, 0), &[0x01, 0x00], 7))
        .unwrap();
    follow(&mut ui, &mut stack, &mut hogp);
    assert!(ui.is_encrypted());

    assert_eq!(press(&mut ui, &store, &[Down, Left]), [UiAction::SendLogin(1)]);
    let Some(login) = store.login(1) else {
        panic!("entry 1 has a login");
    };
    hogp.send_data_report(&mut stack, login).unwrap();
    // three characters and Tab, each pressed and released
    assert_eq!(stack.notifications.len(), 8);

    // the list stops at its last entry
    assert_eq!(press(&mut ui, &store, &[Down, Right]), [UiAction::SendPassword(1)]);
    assert_eq!(press(&mut ui, &store, &[Up, Select]), [UiAction::SendCredential(0)]);
}

#[test]
fn disconnect_during_passkey_entry_returns_home() {
    let store = store();
    let mut ui = Ui::new();
    let (mut stack, mut hogp) = init();
    unlock(&mut ui, &store);

    connect(&mut stack, &mut hogp, AddressType::Public, PEER);
    auth(&mut stack, &mut hogp, PEER, AuthEvent::ConfirmationRequest(Confirmation::Passkey));
    follow(&mut ui, &mut stack, &mut hogp);
    assert_eq!(ui.screen(), Screen::Passkey);

    disconnect(&mut stack, &mut hogp, PEER);
    follow(&mut ui, &mut stack, &mut hogp);
    assert_eq!(ui.screen(), Screen::Home);
    assert!(!ui.is_connected());
    assert!(!hogp.enter_passkey_digit(1));
}

#[test]
fn usb_power_locks_the_ui_and_silences_the_radio() {
    let store = store();
    let mut ui = Ui::new();
    let (mut stack, mut hogp) = init();
    unlock(&mut ui, &store);

    hogp.enter_usb_mode(&mut stack).unwrap();
    ui.set_usb_mode(true);
    assert_eq!(ui.screen(), Screen::UsbMode);
    assert_eq!(ui.on_button(ButtonEvent::Select, &store), None);
    assert_eq!(stack.advertising, None);

    ui.set_usb_mode(false);
    hogp.leave_usb_mode(&mut stack);
    assert_eq!(ui.screen(), Screen::Locked);
    assert!(stack.advertising.is_some());
    assert_eq!(drain(&mut stack, &mut hogp), Vec::<MailboxMessage>::new());
}
