//! Millisecond countdown counters driven by the tick interrupt.
//!
//! Every owner reloads its own counter and polls `expired()` from the
//! main loop. The tick side only decrements; no callbacks run here.

use core::sync::atomic::{AtomicU32, Ordering};

/// The fixed set of countdowns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(usize)]
pub enum Countdown {
    /// Minimum spacing between display redraws.
    DisplayRefresh,
    /// Battery sampling period.
    BatteryPoll,
    /// Inactivity power-off.
    Inactivity,
}

const COUNTDOWN_COUNT: usize = Countdown::Inactivity as usize + 1;

/// Flat, allocation-free set of countdowns.
pub struct Countdowns {
    counters: [AtomicU32; COUNTDOWN_COUNT],
}

impl Countdowns {
    pub const fn new() -> Self {
        Self {
            counters: [const { AtomicU32::new(0) }; COUNTDOWN_COUNT],
        }
    }

    /// Decrement every counter by `elapsed_ms`, clamping at zero.
    ///
    /// Safe to call from interrupt context: never blocks, never allocates.
    pub fn tick(&self, elapsed_ms: u32) {
        for counter in &self.counters {
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                (v != 0).then(|| v.saturating_sub(elapsed_ms))
            });
        }
    }

    pub fn reload(&self, which: Countdown, ms: u32) {
        self.counters[which as usize].store(ms, Ordering::Relaxed);
    }

    pub fn remaining(&self, which: Countdown) -> u32 {
        self.counters[which as usize].load(Ordering::Relaxed)
    }

    pub fn expired(&self, which: Countdown) -> bool {
        self.remaining(which) == 0
    }
}

impl Default for Countdowns {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_decrements_and_clamps() {
        let c = Countdowns::new();
        c.reload(Countdown::DisplayRefresh, 3);
        c.reload(Countdown::BatteryPoll, 100);

        c.tick(2);
        assert_eq!(c.remaining(Countdown::DisplayRefresh), 1);
        assert_eq!(c.remaining(Countdown::BatteryPoll), 98);

        c.tick(5);
        assert_eq!(c.remaining(Countdown::DisplayRefresh), 0);
        assert!(c.expired(Countdown::DisplayRefresh));
        assert_eq!(c.remaining(Countdown::BatteryPoll), 93);
    }

    #[test]
    fn idle_counters_stay_expired() {
        let c = Countdowns::new();
        c.tick(10);
        assert!(c.expired(Countdown::Inactivity));
        assert!(c.expired(Countdown::BatteryPoll));
    }

    #[test]
    fn owners_reload_independently() {
        let c = Countdowns::new();
        c.reload(Countdown::DisplayRefresh, 10);
        c.tick(10);
        assert!(c.expired(Countdown::DisplayRefresh));
        c.reload(Countdown::DisplayRefresh, 10);
        assert!(!c.expired(Countdown::DisplayRefresh));
        assert!(c.expired(Countdown::Inactivity));
    }

    #[test]
    fn every_countdown_has_its_own_counter() {
        let c = Countdowns::new();
        let all = [Countdown::DisplayRefresh, Countdown::BatteryPoll, Countdown::Inactivity];
        assert_eq!(all.len(), COUNTDOWN_COUNT);
        for (i, which) in all.iter().enumerate() {
            c.reload(*which, 100 + i as u32);
        }
        for (i, which) in all.iter().enumerate() {
            assert_eq!(c.remaining(*which), 100 + i as u32);
        }
    }
}
