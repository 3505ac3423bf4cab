//! Raw transaction repair and decoding.
//!
//! Some Electrum servers return legacy transactions with the input-count
//! varint missing right after the 4-byte version. Everything fetched from
//! upstream goes through [`normalize_raw_tx`] before decoding.

use std::borrow::Cow;

use bitcoin::consensus;
use bitcoin::Transaction;

use crate::error::CoreError;

/// Hex offset of the input-count varint (after the 4-byte version).
const INPUT_COUNT_OFFSET: usize = 8;

/// Insert the `01` input count after the version when it is missing.
///
/// Strings shorter than five bytes of hex are returned unchanged, as are
/// strings that already carry `01` at that position.
pub fn normalize_raw_tx(hex: &str) -> Cow<'_, str> {
    if hex.len() < INPUT_COUNT_OFFSET + 2 || !hex.is_ascii() {
        return Cow::Borrowed(hex);
    }
    if &hex[INPUT_COUNT_OFFSET..INPUT_COUNT_OFFSET + 2] == "01" {
        return Cow::Borrowed(hex);
    }
    let mut fixed = String::with_capacity(hex.len() + 2);
    fixed.push_str(&hex[..INPUT_COUNT_OFFSET]);
    fixed.push_str("01");
    fixed.push_str(&hex[INPUT_COUNT_OFFSET..]);
    Cow::Owned(fixed)
}

/// Normalize, hex-decode and consensus-decode a raw transaction.
///
/// A well-formed transaction with several inputs also trips the `01` check,
/// so when the repaired bytes do not decode the untouched bytes are tried.
pub fn parse_raw_tx(hex: &str) -> Result<Transaction, CoreError> {
    let normalized = normalize_raw_tx(hex.trim());
    match decode_hex_tx(&normalized) {
        Ok(tx) => Ok(tx),
        Err(err) if matches!(normalized, Cow::Borrowed(_)) => Err(err),
        Err(err) => decode_hex_tx(hex.trim()).map_err(|_| err),
    }
}

fn decode_hex_tx(hex: &str) -> Result<Transaction, CoreError> {
    let bytes = hex::decode(hex)
        .map_err(|e| CoreError::MalformedTransaction(format!("invalid hex: {e}")))?;
    consensus::deserialize(&bytes)
        .map_err(|e| CoreError::MalformedTransaction(format!("decode: {e}")))
}

/// Timestamp of an 80-byte block header given as hex.
pub fn block_time_from_header(header_hex: &str) -> Option<u32> {
    if header_hex.len() < 160 {
        return None;
    }
    let bytes = hex::decode(header_hex.get(..160)?).ok()?;
    let time: [u8; 4] = bytes.get(68..72)?.try_into().ok()?;
    Some(u32::from_le_bytes(time))
}
