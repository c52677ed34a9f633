//! Hex encoding helpers.
//!
//! Output is always lowercase.  Input accepts either case.

use thiserror::Error;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Error type for hex decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("hex string has odd length {0}")]
    OddLength(usize),

    #[error("invalid hex digit {digit:?} at position {position}")]
    InvalidDigit { digit: char, position: usize },
}

/// Encodes `bytes` as a contiguous lowercase hex string: `[0xde, 0xad]` → `"dead"`.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        push_byte(&mut out, b);
    }
    out
}

/// Encodes `bytes` as colon-separated lowercase hex: `[0x02, 0x00]` → `"02:00"`.
pub fn bytes_to_addr_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, &b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        push_byte(&mut out, b);
    }
    out
}

/// Decodes a contiguous hex string into bytes.
///
/// # Errors
///
/// - [`HexError::OddLength`] if the string has an odd number of characters.
/// - [`HexError::InvalidDigit`] on the first non-hex character.
///
/// # Examples
///
/// ```rust
/// use lowpan_core::hex_to_bytes;
///
/// assert_eq!(hex_to_bytes("DEadBEef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
/// assert!(hex_to_bytes("abc").is_err());
/// ```
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, HexError> {
    let chars: Vec<char> = hex.chars().collect();
    if chars.len() % 2 != 0 {
        return Err(HexError::OddLength(chars.len()));
    }

    let digit = |position: usize| -> Result<u8, HexError> {
        let c = chars[position];
        c.to_digit(16)
            .map(|d| d as u8)
            .ok_or(HexError::InvalidDigit { digit: c, position })
    };

    (0..chars.len())
        .step_by(2)
        .map(|i| Ok((digit(i)? << 4) | digit(i + 1)?))
        .collect()
}

fn push_byte(out: &mut String, b: u8) {
    out.push(HEX_DIGITS[(b >> 4) as usize] as char);
    out.push(HEX_DIGITS[(b & 0x0f) as usize] as char);
}
