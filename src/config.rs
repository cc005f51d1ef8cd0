//! Application-wide constants and compile-time configuration.
//!
//! All timing parameters, capacities, identity strings and the fixed
//! security roots live here so they can be tuned in one place.

// Tick / countdowns

/// Period of the countdown tick interrupt (ms).
pub const TICK_PERIOD_MS: u32 = 1;

/// Button debounce time (ms).
pub const BUTTON_DEBOUNCE_MS: u32 = 50;

/// Minimum interval between two OLED redraws (ms).
pub const DISPLAY_REFRESH_MS: u32 = 100;

/// Auto-repeat period while a navigation button stays pressed (ms).
pub const KEY_REPEAT_MS: u32 = 250;

/// Wait before resending a keyboard frame the full notification queue
/// refused (ms).
pub const TYPING_RETRY_MS: u32 = 15;

/// Resend attempts per keyboard frame.
pub const TYPING_RETRIES: u8 = 20;

/// Battery voltage sampling period (ms).
pub const BATTERY_POLL_MS: u32 = 30_000;

/// Inactivity before the device powers itself off (ms).
pub const INACTIVITY_POWER_OFF_MS: u32 = 5 * 60_000;

/// Period of the status LED handler registered with the scheduler (ms).
pub const LED_TASK_PERIOD_MS: u32 = 500;

/// Period of the BLE task handler registered with the scheduler (ms).
pub const BLE_TASK_PERIOD_MS: u32 = 1;

// Scheduler / mailbox

/// Maximum number of periodic tasks the cooperative scheduler holds.
pub const MAX_SCHEDULED_TASKS: usize = 4;

/// Depth of the event mailbox between stack callbacks and the main loop.
pub const MAILBOX_DEPTH: usize = 16;

// BLE

/// Maximum number of bonded peers tracked in RAM.
pub const MAX_PEERS: usize = 4;

/// Maximum number of instances per standalone GATT profile.
pub const MAX_PROFILE_INSTANCES: usize = 2;

/// Default ATT MTU (no MTU exchange is requested).
pub const ATT_DEFAULT_MTU: u16 = 23;

/// Advertising interval range (in 0.625 ms units). 48 = 30 ms, 96 = 60 ms.
pub const ADV_INTERVAL_MIN: u16 = 48;
pub const ADV_INTERVAL_MAX: u16 = 96;

/// GAP device name (truncated in the advertising payload when needed).
pub const DEVICE_NAME: &str = "BLE Password Keyboard";

/// GAP appearance: HID keyboard.
pub const APPEARANCE_HID_KEYBOARD: u16 = 0x03C1;

/// Grace added to the slave latency when sizing the security
/// re-establishment timer: `interval * (latency + N)`.
pub const SECURITY_TIMER_LATENCY_GRACE: u32 = 8;

/// Number of digits in an SMP passkey.
pub const PASSKEY_DIGITS: u8 = 6;

/// Encryption root (ER) used to diversify every distributed LTK.
///
/// Keys are never persisted: reconnecting masters present EDIV/Rand and
/// the LTK is regenerated from these roots.
pub const ENCRYPTION_ROOT: [u8; 16] = [
    0x3C, 0x7A, 0x51, 0x0E, 0x92, 0xD4, 0x1B, 0x66, 0xA8, 0x05, 0xF3, 0x4D, 0x27, 0xB9, 0x80, 0x1F,
];

/// Diversifier hiding key (DHK) used to mask DIV into EDIV.
pub const DIVERSIFIER_HIDING_KEY: [u8; 16] = [
    0x9E, 0x21, 0x47, 0xC3, 0x58, 0x0A, 0xE6, 0x72, 0x1D, 0xB4, 0x39, 0x8F, 0x64, 0x0C, 0xD1, 0x2B,
];

// Device Information Service

pub const DIS_MANUFACTURER_NAME: &str = "blepass";
pub const DIS_MODEL_NUMBER: &str = "BP-52840";
pub const DIS_SERIAL_NUMBER: &str = "000001";
pub const DIS_FIRMWARE_REVISION: &str = "0.1.0";

/// PnP ID: vendor ID source (0x02 = USB-IF), vendor, product, version.
pub const PNP_VENDOR_ID_SOURCE: u8 = 0x02;
pub const PNP_VENDOR_ID: u16 = 0x1209;
pub const PNP_PRODUCT_ID: u16 = 0x0001;
pub const PNP_PRODUCT_VERSION: u16 = 0x0100;

// UI

/// Number of digits of the unlock PIN.
pub const PIN_LENGTH: usize = 4;

/// Wrong PIN entries tolerated before the device powers off.
pub const PIN_MAX_ATTEMPTS: u8 = 3;

/// Enable automatic OLED screen power-off after inactivity.
pub const SCREEN_AUTO_OFF_ENABLED: bool = true;

/// Inactivity timeout before OLED is turned off (seconds).
pub const SCREEN_AUTO_OFF_TIMEOUT_SECS: u64 = 60;

// Battery

/// Cell voltage reported as 0 % (mV).
pub const BATTERY_EMPTY_MV: u16 = 3300;

/// Cell voltage reported as 100 % (mV).
pub const BATTERY_FULL_MV: u16 = 4200;
