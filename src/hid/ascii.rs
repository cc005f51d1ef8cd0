//! ASCII to keyboard usage translation (US layout).
//!
//! Each entry of [`ASCII_TO_USAGE`] is a Keyboard/Keypad usage; the high
//! bit asks for Shift. Zero entries have no key and are skipped.

use crate::hid::keyboard::{KeyboardReport, KEY_TAB, MODIFIER_LEFT_SHIFT};

const SHIFT: u8 = 0x80;

#[rustfmt::skip]
pub static ASCII_TO_USAGE: [u8; 128] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // 0x00: . . . . . . . .
    0x2A, 0x2B, 0x28, 0x00, 0x00, 0x28, 0x00, 0x00, // 0x08: BS TAB LF . . CR . .
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // 0x10: . . . . . . . .
    0x00, 0x00, 0x00, 0x29, 0x00, 0x00, 0x00, 0x00, // 0x18: . . . ESC . . . .
    0x2C, 0x9E, 0xB4, 0xA0, 0xA1, 0xA2, 0xA4, 0x34, // 0x20:   ! " # $ % & '
    0xA6, 0xA7, 0xA5, 0xAE, 0x36, 0x2D, 0x37, 0x38, // 0x28: ( ) * + , - . /
    0x27, 0x1E, 0x1F, 0x20, 0x21, 0x22, 0x23, 0x24, // 0x30: 0 1 2 3 4 5 6 7
    0x25, 0x26, 0xB3, 0x33, 0xB6, 0x2E, 0xB7, 0xB8, // 0x38: 8 9 : ; < = > ?
    0x9F, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8A, // 0x40: @ A B C D E F G
    0x8B, 0x8C, 0x8D, 0x8E, 0x8F, 0x90, 0x91, 0x92, // 0x48: H I J K L M N O
    0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9A, // 0x50: P Q R S T U V W
    0x9B, 0x9C, 0x9D, 0x2F, 0x31, 0x30, 0xA3, 0xAD, // 0x58: X Y Z [ \ ] ^ _
    0x35, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, // 0x60: ` a b c d e f g
    0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11, 0x12, // 0x68: h i j k l m n o
    0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, // 0x70: p q r s t u v w
    0x1B, 0x1C, 0x1D, 0xAF, 0xB1, 0xB0, 0xB5, 0x00, // 0x78: x y z { | } ~ DEL
];

/// Key-down report for `byte`, or `None` when no key produces it.
pub fn key_for_ascii(byte: u8) -> Option<KeyboardReport> {
    let entry = *ASCII_TO_USAGE.get(usize::from(byte))?;
    if entry == 0 {
        return None;
    }
    let modifier = if entry & SHIFT != 0 { MODIFIER_LEFT_SHIFT } else { 0 };
    Some(KeyboardReport::press(modifier, entry & !SHIFT))
}

/// Report frames that type `text` followed by a Tab.
///
/// Every key-down frame is followed by an all-released frame so the host
/// sees a clean edge even if it coalesces notifications.
pub struct TypingSequence<'a> {
    text: &'a [u8],
    pos: usize,
    release_next: bool,
    tab_sent: bool,
}

impl<'a> TypingSequence<'a> {
    pub fn new(text: &'a [u8]) -> Self {
        Self {
            text,
            pos: 0,
            release_next: false,
            tab_sent: false,
        }
    }
}

impl Iterator for TypingSequence<'_> {
    type Item = KeyboardReport;

    fn next(&mut self) -> Option<KeyboardReport> {
        if self.release_next {
            self.release_next = false;
            return Some(KeyboardReport::empty());
        }
        while let Some(&byte) = self.text.get(self.pos) {
            self.pos += 1;
            if let Some(report) = key_for_ascii(byte) {
                self.release_next = true;
                return Some(report);
            }
            trace!("no key for byte {=u8:#04x}", byte);
        }
        if !self.tab_sent {
            self.tab_sent = true;
            self.release_next = true;
            return Some(KeyboardReport::press(0, KEY_TAB));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_digits_and_shifted_symbols() {
        assert_eq!(key_for_ascii(b'a'), Some(KeyboardReport::press(0, 0x04)));
        assert_eq!(key_for_ascii(b'Z'), Some(KeyboardReport::press(MODIFIER_LEFT_SHIFT, 0x1D)));
        assert_eq!(key_for_ascii(b'0'), Some(KeyboardReport::press(0, 0x27)));
        assert_eq!(key_for_ascii(b'!'), Some(KeyboardReport::press(MODIFIER_LEFT_SHIFT, 0x1E)));
        assert_eq!(key_for_ascii(b'~'), Some(KeyboardReport::press(MODIFIER_LEFT_SHIFT, 0x35)));
        assert_eq!(key_for_ascii(b' '), Some(KeyboardReport::press(0, 0x2C)));
    }

    #[test]
    fn unmapped_bytes_have_no_key() {
        assert_eq!(key_for_ascii(0x00), None);
        assert_eq!(key_for_ascii(0x7F), None);
        assert_eq!(key_for_ascii(0xC3), None);
    }

    #[test]
    fn shift_bit_matches_case() {
        for c in b'a'..=b'z' {
            assert_eq!(ASCII_TO_USAGE[usize::from(c)] & SHIFT, 0);
            assert_eq!(ASCII_TO_USAGE[usize::from(c.to_ascii_uppercase())], ASCII_TO_USAGE[usize::from(c)] | SHIFT);
        }
    }

    #[test]
    fn sequence_is_down_up_pairs_then_tab() {
        let frames: std::vec::Vec<_> = TypingSequence::new(b"aB").collect();
        assert_eq!(
            frames,
            [
                KeyboardReport::press(0, 0x04),
                KeyboardReport::empty(),
                KeyboardReport::press(MODIFIER_LEFT_SHIFT, 0x05),
                KeyboardReport::empty(),
                KeyboardReport::press(0, KEY_TAB),
                KeyboardReport::empty(),
            ]
        );
    }

    #[test]
    fn unmapped_bytes_are_skipped_and_empty_text_still_tabs() {
        assert_eq!(TypingSequence::new(&[0x00, 0x80]).count(), 2);
        assert_eq!(TypingSequence::new(b"").count(), 2);
    }
}
