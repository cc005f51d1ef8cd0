//! Security-layer key functions built on the stack's AES-128 block.
//!
//! Bluetooth Core Specification, Vol 3 Part H:
//! - `ah`: random address hash, used to resolve private addresses (2.2.2)
//! - `d1`: diversifying function, used to derive LTKs from ER (B.2.1)
//! - `dm`: DIV mask generation, used to hide DIV inside EDIV (B.2.2)
//!
//! All `e()` inputs and outputs are most-significant-octet first, exactly
//! as the Core spec and the nRF ECB peripheral expect. Addresses, IRKs and
//! LTKs travel least-significant-octet first and are flipped here.

use crate::ble::{BdAddr, Irk, Ltk};

/// AES-128 block encryption `e(key, plaintext)` supplied by the platform.
///
/// Must be a pure function: no stack events may be produced while it runs.
pub trait BlockCipher {
    fn encrypt_block(&self, key: &[u8; 16], plaintext: &[u8; 16]) -> [u8; 16];
}

/// Keys we hand to a master during key distribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncryptionInformation {
    pub ltk: Ltk,
    pub ediv: u16,
    /// 64-bit Rand, least significant octet first.
    pub rand: [u8; 8],
    pub key_size: u8,
}

fn reversed(bytes: &[u8; 16]) -> [u8; 16] {
    let mut out = *bytes;
    out.reverse();
    out
}

/// `ah(k, r)`: 24-bit hash of `prand` under `irk`.
///
/// `prand` and the returned hash are least significant octet first, the
/// way they appear in a [`BdAddr`].
pub fn ah<C: BlockCipher + ?Sized>(cipher: &C, irk: &Irk, prand: [u8; 3]) -> [u8; 3] {
    let key = reversed(&irk.0);
    let mut r = [0u8; 16];
    r[13] = prand[2];
    r[14] = prand[1];
    r[15] = prand[0];
    let e = cipher.encrypt_block(&key, &r);
    [e[15], e[14], e[13]]
}

/// Does `addr` resolve under `irk`?
pub fn resolve_address<C: BlockCipher + ?Sized>(cipher: &C, irk: &Irk, addr: &BdAddr) -> bool {
    addr.is_resolvable_private() && ah(cipher, irk, addr.prand()) == addr.hash()
}

/// Build a resolvable private address for `irk` from 24 random bits.
///
/// The two marker bits of `prand` are forced to `0b01`.
pub fn generate_rpa<C: BlockCipher + ?Sized>(cipher: &C, irk: &Irk, prand: [u8; 3]) -> BdAddr {
    let mut p = prand;
    p[2] = (p[2] & 0x3F) | 0x40;
    let hash = ah(cipher, irk, p);
    BdAddr([hash[0], hash[1], hash[2], p[0], p[1], p[2]])
}

/// `d1(k, d, r) = e(k, padding || r || d)`, result MSB first.
pub fn d1<C: BlockCipher + ?Sized>(cipher: &C, k: &[u8; 16], d: u16, r: u16) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[12..14].copy_from_slice(&r.to_be_bytes());
    block[14..16].copy_from_slice(&d.to_be_bytes());
    cipher.encrypt_block(k, &block)
}

/// `dm(k, r) = e(k, padding || r) mod 2^16`, `r` least significant
/// octet first.
pub fn dm<C: BlockCipher + ?Sized>(cipher: &C, k: &[u8; 16], r: &[u8; 8]) -> u16 {
    let mut block = [0u8; 16];
    for (i, b) in r.iter().enumerate() {
        block[15 - i] = *b;
    }
    let e = cipher.encrypt_block(k, &block);
    u16::from_be_bytes([e[14], e[15]])
}

/// Regenerate the LTK a master is asking for from its EDIV/Rand.
///
/// `DIV = dm(DHK, Rand) xor EDIV`, `LTK = d1(ER, DIV, 0)`.
pub fn diversify_ltk<C: BlockCipher + ?Sized>(
    cipher: &C,
    er: &[u8; 16],
    dhk: &[u8; 16],
    ediv: u16,
    rand: &[u8; 8],
) -> Ltk {
    let div = dm(cipher, dhk, rand) ^ ediv;
    Ltk(reversed(&d1(cipher, er, div, 0)))
}

/// Build the key set distributed at pairing time for a fresh `div`/`rand`.
pub fn new_encryption_info<C: BlockCipher + ?Sized>(
    cipher: &C,
    er: &[u8; 16],
    dhk: &[u8; 16],
    div: u16,
    rand: [u8; 8],
    key_size: u8,
) -> EncryptionInformation {
    let ltk = Ltk(reversed(&d1(cipher, er, div, 0)));
    let ediv = dm(cipher, dhk, &rand) ^ div;
    EncryptionInformation {
        ltk,
        ediv,
        rand,
        key_size,
    }
}
