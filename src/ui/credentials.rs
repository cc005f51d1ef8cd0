//! Credential source consumed by the UI.
//!
//! Where the entries come from (flash, an SD card, a compiled-in list) is
//! the board's business; the UI only needs the [`CredentialStore`] view.

use crate::config::PIN_LENGTH;

pub trait CredentialStore {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Label shown in the list.
    fn name(&self, index: usize) -> Option<&str>;
    fn login(&self, index: usize) -> Option<&[u8]>;
    fn password(&self, index: usize) -> Option<&[u8]>;

    /// Check an unlock PIN (one decimal digit per byte).
    fn verify_pin(&self, pin: &[u8; PIN_LENGTH]) -> bool;
}

/// One stored login.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Credential<'a> {
    pub name: &'a str,
    pub login: &'a [u8],
    pub password: &'a [u8],
}

/// A [`CredentialStore`] over a borrowed slice.
pub struct SliceStore<'a> {
    entries: &'a [Credential<'a>],
    pin: [u8; PIN_LENGTH],
}

impl<'a> SliceStore<'a> {
    pub const fn new(entries: &'a [Credential<'a>], pin: [u8; PIN_LENGTH]) -> Self {
        Self { entries, pin }
    }
}

impl CredentialStore for SliceStore<'_> {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn name(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|c| c.name)
    }

    fn login(&self, index: usize) -> Option<&[u8]> {
        self.entries.get(index).map(|c| c.login)
    }

    fn password(&self, index: usize) -> Option<&[u8]> {
        self.entries.get(index).map(|c| c.password)
    }

    fn verify_pin(&self, pin: &[u8; PIN_LENGTH]) -> bool {
        // constant time over the digits
        self.pin.iter().zip(pin).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRIES: [Credential<'static>; 2] = [
        Credential {
            name: "mail",
            login: b"alice@example.org",
            password: b"hunter2",
        },
        Credential {
            name: "forge",
            login: b"alice",
            password: b"correct horse",
        },
    ];

    #[test]
    fn lookup_by_index() {
        let store = SliceStore::new(&ENTRIES, [1, 2, 3, 4]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.name(1), Some("forge"));
        assert_eq!(store.password(0), Some(&b"hunter2"[..]));
        assert_eq!(store.login(2), None);
    }

    #[test]
    fn pin_check() {
        let store = SliceStore::new(&ENTRIES, [1, 2, 3, 4]);
        assert!(store.verify_pin(&[1, 2, 3, 4]));
        assert!(!store.verify_pin(&[1, 2, 3, 5]));
    }
}
