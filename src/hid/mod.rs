//! HID keyboard reports and the text-to-keystroke path.

pub mod ascii;
pub mod keyboard;

pub use ascii::{key_for_ascii, TypingSequence};
pub use keyboard::KeyboardReport;
