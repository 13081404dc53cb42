//! Byte ↔ printable-character bijection used by byte-level BPE vocabularies
//!
//! Printable ASCII (`!`..`~`) and most of Latin-1 (`¡`..`¬`, `®`..`ÿ`) map to
//! themselves. The remaining 68 byte values map, in ascending order, to
//! code points starting at U+0100, so every surface string in a byte-level
//! vocabulary is printable.

use std::collections::HashMap;
use std::sync::OnceLock;

struct ByteTable {
    encoder: [char; 256],
    decoder: HashMap<char, u8>,
}

fn is_self_mapped(b: u8) -> bool {
    (b'!'..=b'~').contains(&b) || (0xA1..=0xAC).contains(&b) || (0xAE..=0xFF).contains(&b)
}

fn table() -> &'static ByteTable {
    static TABLE: OnceLock<ByteTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut encoder = ['\0'; 256];
        let mut decoder = HashMap::with_capacity(256);
        let mut shifted = 0u32;
        for b in 0..=255u8 {
            let c = if is_self_mapped(b) {
                char::from(b)
            } else {
                // 256 + n stays far below the surrogate range
                let c = char::from_u32(256 + shifted).unwrap_or(char::REPLACEMENT_CHARACTER);
                shifted += 1;
                c
            };
            encoder[usize::from(b)] = c;
            decoder.insert(c, b);
        }
        ByteTable { encoder, decoder }
    })
}

/// Printable character standing for byte `b`
#[must_use]
pub fn byte_to_char(b: u8) -> char {
    table().encoder[usize::from(b)]
}

/// Byte a printable character stands for, if it is in the bijection
#[must_use]
pub fn char_to_byte(c: char) -> Option<u8> {
    table().decoder.get(&c).copied()
}

/// Encode raw bytes as a byte-level surface string
#[must_use]
pub fn encode_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| byte_to_char(b)).collect()
}

/// Decode a byte-level surface string back to raw bytes
///
/// Characters outside the bijection (multi-byte special-token text such as
/// CJK or emoji) pass through as their UTF-8 encoding.
#[must_use]
pub fn decode_surface(surface: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(surface.len());
    for c in surface.chars() {
        match char_to_byte(c) {
            Some(b) => bytes.push(b),
            None => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    bytes
}
