//! GPIO button input with async debouncing.
//!
//! Five physical buttons (active-low with internal pull-up):
//!   - UP / DOWN   - move through the list, change a digit (auto-repeat)
//!   - LEFT / RIGHT - type login / password, step between digits
//!   - SELECT      - type login and password, accept a digit
//!
//! Each button is handled by an async task that waits for a GPIO edge,
//! debounces it, and sends a `ButtonEvent` to the UI channel.

use crate::config::{BUTTON_DEBOUNCE_MS, KEY_REPEAT_MS};
use crate::ui::ButtonEvent;
use defmt::info;
use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::{AnyPin, Input, Pull};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_time::{Duration, Timer};

/// Depth of the button event channel.
pub const BUTTON_QUEUE_DEPTH: usize = 4;

pub type ButtonSender = Sender<'static, CriticalSectionRawMutex, ButtonEvent, BUTTON_QUEUE_DEPTH>;

/// Run a single button polling loop.
///
/// Waits for the pin to go low (pressed), debounces, sends the event,
/// then waits for release before repeating. UP and DOWN repeat every
/// `KEY_REPEAT_MS` while held.
pub async fn button_task(pin: AnyPin, event: ButtonEvent, tx: &ButtonSender) -> ! {
    let mut btn = Input::new(pin, Pull::Up);
    let repeats = matches!(event, ButtonEvent::Up | ButtonEvent::Down);

    loop {
        // Wait for falling edge (button press, active-low).
        btn.wait_for_falling_edge().await;

        // Debounce: wait and re-check.
        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS.into())).await;

        if btn.is_low() {
            info!("Button: {}", event);
            tx.send(event).await;

            // Wait for release; held navigation buttons auto-repeat.
            loop {
                let hold = Timer::after(Duration::from_millis(KEY_REPEAT_MS.into()));
                match select(btn.wait_for_rising_edge(), hold).await {
                    Either::First(()) => break,
                    Either::Second(()) if repeats => tx.send(event).await,
                    Either::Second(()) => {}
                }
            }
            Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS.into())).await;
        }
    }
}
