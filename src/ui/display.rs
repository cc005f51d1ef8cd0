//! SSD1306 OLED display wrapper.

use core::cmp::Ordering;
use core::fmt::Write;

use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::mono_font::MonoTextStyleBuilder;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::Text;
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::*;
use ssd1306::I2CDisplayInterface;
use ssd1306::Ssd1306;

use crate::config::{PASSKEY_DIGITS, PIN_LENGTH};
use crate::ui::credentials::CredentialStore;
use crate::ui::{Screen, Ui};

/// Type alias for the concrete display driver.
///
/// Generic over the I²C implementation so callers pass in their HAL's
/// I²C peripheral.
pub type Display<I2C> =
    Ssd1306<I2CInterface<I2C>, DisplaySize128x64, BufferedGraphicsMode<DisplaySize128x64>>;

/// List rows that fit below the title line.
const LIST_ROWS: usize = 4;

/// Initialise the SSD1306 display and clear the screen.
pub fn init<I2C>(i2c: I2C) -> Display<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    let interface = I2CDisplayInterface::new(i2c);
    let mut display = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
        .into_buffered_graphics_mode();
    let _ = display.init();
    display.clear_buffer();
    let _ = display.flush();
    display
}

/// Blank the panel (screen auto-off) or wake it.
pub fn set_power<I2C>(display: &mut Display<I2C>, on: bool)
where
    I2C: embedded_hal::i2c::I2c,
{
    let _ = display.set_display_on(on);
}

fn text_style() -> embedded_graphics::mono_font::MonoTextStyle<'static, BinaryColor> {
    MonoTextStyleBuilder::new()
        .font(&FONT_6X10)
        .text_color(BinaryColor::On)
        .build()
}

fn line<I2C>(display: &mut Display<I2C>, row: i32, text: &str)
where
    I2C: embedded_hal::i2c::I2c,
{
    let _ = Text::new(text, Point::new(0, 10 + row * 14), text_style()).draw(display);
}

/// Render whatever screen `ui` is on.
pub fn render<I2C, S>(display: &mut Display<I2C>, ui: &Ui, store: &S, battery_percent: u8)
where
    I2C: embedded_hal::i2c::I2c,
    S: CredentialStore + ?Sized,
{
    display.clear_buffer();
    match ui.screen() {
        Screen::Locked => draw_locked(display, ui),
        Screen::Home => draw_home(display, ui, store, battery_percent),
        Screen::Passkey => draw_passkey(display, ui),
        Screen::UsbMode => draw_usb_mode(display),
    }
    let _ = display.flush();
}

/// PIN entry: entered digits, the one being edited in brackets.
fn draw_locked<I2C>(display: &mut Display<I2C>, ui: &Ui)
where
    I2C: embedded_hal::i2c::I2c,
{
    line(display, 0, "Enter PIN");

    let pin = ui.pin();
    let mut digits: heapless::String<{ PIN_LENGTH * 3 }> = heapless::String::new();
    for (i, d) in pin.digits().iter().enumerate() {
        let _ = match i.cmp(&pin.cursor()) {
            Ordering::Equal => write!(digits, "[{}]", d),
            Ordering::Less => write!(digits, " * "),
            Ordering::Greater => write!(digits, " _ "),
        };
    }
    line(display, 1, digits.as_str());

    if pin.failures() > 0 {
        let mut msg: heapless::String<24> = heapless::String::new();
        let _ = write!(msg, "Wrong PIN ({})", pin.failures());
        line(display, 3, msg.as_str());
    }
}

/// Credential list with selection marker and a status line.
fn draw_home<I2C, S>(display: &mut Display<I2C>, ui: &Ui, store: &S, battery_percent: u8)
where
    I2C: embedded_hal::i2c::I2c,
    S: CredentialStore + ?Sized,
{
    let mut status: heapless::String<24> = heapless::String::new();
    let link = match (ui.is_connected(), ui.is_encrypted()) {
        (_, true) => "Paired",
        (true, false) => "Connected",
        (false, false) => "Advertising",
    };
    let _ = write!(status, "{} {}%", link, battery_percent);
    let _ = Text::new(status.as_str(), Point::new(0, 8), text_style()).draw(display);

    if store.is_empty() {
        line(display, 1, "No credentials");
        return;
    }

    let first = ui.selected().saturating_sub(LIST_ROWS - 1);
    for (row, index) in (first..store.len()).take(LIST_ROWS).enumerate() {
        let marker = if index == ui.selected() { ">" } else { " " };
        let mut text: heapless::String<24> = heapless::String::new();
        let _ = write!(text, "{} {}", marker, store.name(index).unwrap_or("?"));
        let y = 22 + (row as i32 * 11);
        let _ = Text::new(text.as_str(), Point::new(0, y), text_style()).draw(display);
    }
}

fn draw_passkey<I2C>(display: &mut Display<I2C>, ui: &Ui)
where
    I2C: embedded_hal::i2c::I2c,
{
    line(display, 0, "Pairing passkey");
    let mut progress: heapless::String<24> = heapless::String::new();
    let _ = write!(
        progress,
        "Digit {}/{}: {}",
        ui.passkey_count() + 1,
        PASSKEY_DIGITS,
        ui.passkey_digit()
    );
    line(display, 1, progress.as_str());
    line(display, 3, "UP/DN  SEL:next");
}

fn draw_usb_mode<I2C>(display: &mut Display<I2C>)
where
    I2C: embedded_hal::i2c::I2c,
{
    line(display, 0, "USB mode");
    line(display, 1, "Bluetooth off");
    line(display, 3, "Unplug to resume");
}

/// Render a transient error message.
pub fn draw_error<I2C>(display: &mut Display<I2C>, message: &str)
where
    I2C: embedded_hal::i2c::I2c,
{
    display.clear_buffer();

    line(display, 0, "ERROR");
    line(display, 2, message);

    let _ = display.flush();
}
