//! blepass - BLE HID password keyboard firmware core.
//!
//! Everything that does not touch the radio, the OLED or the GPIOs lives
//! in this library so it can be tested on the host:
//!
//! - [`ble`]: peer registry, security crypto and the HID-over-GATT
//!   connection state machine ([`ble::hogp::Hogp`])
//! - [`gatt`]: attribute tables and the profile dispatch layer
//! - [`hid`]: keyboard reports and the text-to-keystroke path
//! - [`tick`], [`sched`]: countdowns, the cooperative scheduler, the mailbox
//! - [`power`], [`ui`]: power policy and the button-driven UI
//!
//! Usage: `cargo test` on the host. The firmware image is `src/main.rs`
//! built with `--features embedded`.

#![cfg_attr(not(test), no_std)]

// must come first: the log macros are used by every module below
#[macro_use]
mod fmt;

pub mod ble;
pub mod config;
pub mod error;
pub mod gatt;
pub mod hid;
pub mod power;
pub mod power_logic;
pub mod sched;
pub mod tick;
pub mod ui;

pub use error::{AttError, Error, ProfileError, StackError};
