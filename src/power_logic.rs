//! Pure power policy: battery gauge, screen blanking and auto power-off.

use crate::config::{BATTERY_EMPTY_MV, BATTERY_FULL_MV};

/// Piecewise LiPo discharge curve: (millivolts, percent), ascending.
const LIPO_CURVE: [(u16, u8); 6] = [
    (BATTERY_EMPTY_MV, 0),
    (3600, 10),
    (3700, 30),
    (3800, 55),
    (4000, 85),
    (BATTERY_FULL_MV, 100),
];

/// Convert a cell voltage to a Battery Level percentage (0..=100).
pub fn battery_percent(millivolts: u16) -> u8 {
    if millivolts <= BATTERY_EMPTY_MV {
        return 0;
    }
    if millivolts >= BATTERY_FULL_MV {
        return 100;
    }
    for pair in LIPO_CURVE.windows(2) {
        let (lo_mv, lo_pct) = pair[0];
        let (hi_mv, hi_pct) = pair[1];
        if millivolts <= hi_mv {
            let span_mv = u32::from(hi_mv - lo_mv);
            let span_pct = u32::from(hi_pct - lo_pct);
            let above = u32::from(millivolts - lo_mv);
            return lo_pct + (above * span_pct / span_mv) as u8;
        }
    }
    100
}

/// Decide whether screen should be on based on base power state and inactivity policy.
pub fn screen_should_be_on(
    base_display_on: bool,
    auto_off_enabled: bool,
    idle_secs: u64,
    auto_off_timeout_secs: u64,
) -> bool {
    if !base_display_on {
        return false;
    }

    if auto_off_enabled && idle_secs >= auto_off_timeout_secs {
        return false;
    }

    true
}

/// The device switches itself off after `timeout_ms` without a button
/// press, except while USB powers it.
pub fn should_power_off(idle_ms: u32, timeout_ms: u32, usb_mode: bool) -> bool {
    !usb_mode && idle_ms >= timeout_ms
}
