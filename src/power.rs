//! Power management - screen blanking and inactivity power-off.
//!
//! Driven by the tick countdowns rather than wall-clock time:
//! - Any button press reloads `Inactivity`.
//! - The screen blanks after `SCREEN_AUTO_OFF_TIMEOUT_SECS` of idle time.
//! - The device powers off when `Inactivity` runs out (not in USB mode).
//!
//! nRF52840 power modes:
//! - System ON: Normal operation (~3.5 mA with BLE active)
//! - System OFF: Deep sleep, wake on GPIO (~0.3 µA)

use crate::config::{BATTERY_POLL_MS, INACTIVITY_POWER_OFF_MS, SCREEN_AUTO_OFF_ENABLED, SCREEN_AUTO_OFF_TIMEOUT_SECS};
use crate::power_logic;
use crate::tick::{Countdown, Countdowns};

/// Power state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    /// Normal operation - display on.
    Active,
    /// No recent button press - display off, BLE link kept.
    ScreenOff,
    /// Inactivity timeout reached - the board should enter System OFF.
    Off,
}

/// Power manager tracks activity through the `Inactivity` countdown.
pub struct PowerManager {
    state: PowerState,
    usb_mode: bool,
}

impl PowerManager {
    /// Create a new power manager and arm the inactivity and battery
    /// countdowns.
    pub fn new(countdowns: &Countdowns) -> Self {
        countdowns.reload(Countdown::Inactivity, INACTIVITY_POWER_OFF_MS);
        countdowns.reload(Countdown::BatteryPoll, BATTERY_POLL_MS);
        Self {
            state: PowerState::Active,
            usb_mode: false,
        }
    }

    /// Record activity (button press).
    pub fn activity(&mut self, countdowns: &Countdowns) {
        countdowns.reload(Countdown::Inactivity, INACTIVITY_POWER_OFF_MS);
        if self.state != PowerState::Active {
            info!("power: waking from {}", self.state);
            self.state = PowerState::Active;
        }
    }

    /// USB power keeps the device on indefinitely.
    pub fn set_usb_mode(&mut self, usb_mode: bool, countdowns: &Countdowns) {
        if self.usb_mode == usb_mode {
            return;
        }
        self.usb_mode = usb_mode;
        info!("power: usb_mode={}", usb_mode);
        self.activity(countdowns);
    }

    /// Milliseconds since the last recorded activity.
    pub fn idle_ms(&self, countdowns: &Countdowns) -> u32 {
        INACTIVITY_POWER_OFF_MS.saturating_sub(countdowns.remaining(Countdown::Inactivity))
    }

    /// Periodic update from the main loop; returns the new state.
    pub fn update(&mut self, countdowns: &Countdowns) -> PowerState {
        let idle_ms = self.idle_ms(countdowns);
        let new_state = if power_logic::should_power_off(idle_ms, INACTIVITY_POWER_OFF_MS, self.usb_mode) {
            PowerState::Off
        } else if power_logic::screen_should_be_on(
            true,
            SCREEN_AUTO_OFF_ENABLED,
            u64::from(idle_ms / 1000),
            SCREEN_AUTO_OFF_TIMEOUT_SECS,
        ) {
            PowerState::Active
        } else {
            PowerState::ScreenOff
        };

        if new_state != self.state {
            info!("power: {} -> {}", self.state, new_state);
            self.state = new_state;
        }
        self.state
    }

    /// True once per `BATTERY_POLL_MS`; re-arms the poll countdown.
    pub fn battery_poll_due(&self, countdowns: &Countdowns) -> bool {
        if countdowns.expired(Countdown::BatteryPoll) {
            countdowns.reload(Countdown::BatteryPoll, BATTERY_POLL_MS);
            true
        } else {
            false
        }
    }

    /// Check if display should be on.
    pub fn display_on(&self) -> bool {
        self.state == PowerState::Active
    }

    /// Get current power state.
    pub fn state(&self) -> PowerState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN_OFF_MS: u32 = SCREEN_AUTO_OFF_TIMEOUT_SECS as u32 * 1000;

    #[test]
    fn screen_blanks_then_powers_off() {
        let c = Countdowns::new();
        let mut pm = PowerManager::new(&c);
        assert_eq!(pm.update(&c), PowerState::Active);

        c.tick(SCREEN_OFF_MS);
        assert_eq!(pm.update(&c), PowerState::ScreenOff);
        assert!(!pm.display_on());

        c.tick(INACTIVITY_POWER_OFF_MS);
        assert_eq!(pm.update(&c), PowerState::Off);
    }

    #[test]
    fn activity_wakes_and_rearms() {
        let c = Countdowns::new();
        let mut pm = PowerManager::new(&c);
        c.tick(SCREEN_OFF_MS);
        pm.update(&c);
        pm.activity(&c);
        assert!(pm.display_on());
        assert_eq!(pm.idle_ms(&c), 0);
        assert_eq!(pm.update(&c), PowerState::Active);
    }

    #[test]
    fn usb_mode_never_powers_off() {
        let c = Countdowns::new();
        let mut pm = PowerManager::new(&c);
        pm.set_usb_mode(true, &c);
        c.tick(INACTIVITY_POWER_OFF_MS);
        assert_eq!(pm.update(&c), PowerState::ScreenOff);
    }

    #[test]
    fn battery_poll_fires_once_per_period() {
        let c = Countdowns::new();
        let pm = PowerManager::new(&c);
        assert!(!pm.battery_poll_due(&c));
        c.tick(BATTERY_POLL_MS);
        assert!(pm.battery_poll_due(&c));
        assert!(!pm.battery_poll_due(&c));
    }
}
