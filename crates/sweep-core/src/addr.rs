//! IPv4 address codec.
//!
//! The scanner treats an address as a `u32`; the results table stores the
//! same bit pattern in a signed `INT` column so that row ordering matches
//! Postgres' native integer ordering. This module is the single place where
//! that reinterpretation happens; everything else passes `u32` around.

use thiserror::Error;

/// Reinterpret an unsigned address as its signed storage form.
///
/// Bit-preserving: `0x80000000` becomes `i32::MIN`, `0xFFFFFFFF` becomes
/// `-1`. Never a range-checked conversion.
#[inline]
pub fn to_signed(ip: u32) -> i32 {
    ip as i32
}

/// Reinterpret a signed storage value back into the unsigned address.
#[inline]
pub fn to_unsigned(ip: i32) -> u32 {
    ip as u32
}

/// Format an address as dotted-quad, highest octet first.
pub fn dotted(ip: u32) -> String {
    format!(
        "{}.{}.{}.{}",
        ip >> 24,
        (ip >> 16) & 0xFF,
        (ip >> 8) & 0xFF,
        ip & 0xFF
    )
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrParseError {
    #[error("expected four octets, got {0}")]
    OctetCount(usize),
    #[error("octet {index} is not a decimal number: {text:?}")]
    NotANumber { index: usize, text: String },
    #[error("octet {index} out of range: {value}")]
    OutOfRange { index: usize, value: u64 },
}

/// Parse a dotted-quad string into an address.
///
/// Exactly four `.`-separated decimal octets, each in `[0, 255]`. Empty
/// components, surrounding whitespace, and signs are rejected.
pub fn parse_dotted(s: &str) -> Result<u32, AddrParseError> {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return Err(AddrParseError::OctetCount(parts.len()));
    }

    let mut ip: u32 = 0;
    for (index, part) in parts.iter().enumerate() {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AddrParseError::NotANumber {
                index,
                text: (*part).to_owned(),
            });
        }
        let value: u64 = part.parse().map_err(|_| AddrParseError::NotANumber {
            index,
            text: (*part).to_owned(),
        })?;
        if value > 255 {
            return Err(AddrParseError::OutOfRange { index, value });
        }
        ip = (ip << 8) | value as u32;
    }
    Ok(ip)
}
