//! TRON address canonicalization.
//!
//! The chain uses two encodings for the same 21-byte payload (a 0x41 version
//! byte followed by 20 account bytes): base58check strings starting with "T"
//! and 42-character hex starting with "41". Feeds and config may hand us
//! either; everything persisted is keyed by one canonical rendering.

use sha2::{Digest, Sha256};
use thiserror::Error;

const VERSION_BYTE: u8 = 0x41;
const PAYLOAD_LEN: usize = 21;
const CHECKSUM_LEN: usize = 4;

const B58_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("invalid base58 character {0:?}")]
    BadCharacter(char),
    #[error("base58 payload too short")]
    TooShort,
    #[error("base58 checksum mismatch")]
    BadChecksum,
    #[error("expected a 21-byte payload, got {0} bytes")]
    BadLength(usize),
    #[error("payload does not carry the 0x41 version byte")]
    BadVersion,
    #[error("unsupported address encoding: {0:?}")]
    BadEncoding(String),
}

/// Which rendering of an address is used as the persisted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyFormat {
    /// Lowercased 42-char hex with the 41 version prefix (default).
    #[default]
    Hex,
    /// base58check, as seen in wallets and explorers.
    Base58,
}

/// A TRON address held as its 21 raw payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TronAddress([u8; PAYLOAD_LEN]);

impl TronAddress {
    /// Parse an address from either supported encoding.
    ///
    /// Accepts base58check ("T...", checksum verified) and 42-char hex
    /// beginning "41" (case-insensitive, optional "0x" prefix).
    ///
    /// # Errors
    /// Returns an [`AddressError`] describing why the input was rejected;
    /// a failed base58 checksum is always [`AddressError::BadChecksum`].
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        let hex_body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if hex_body.len() == PAYLOAD_LEN * 2 && hex_body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Self::from_payload(
                &hex::decode(hex_body.to_ascii_lowercase())
                    .map_err(|_| AddressError::BadEncoding(trimmed.to_string()))?,
            );
        }

        if trimmed.starts_with('T') {
            return Self::from_payload(&b58check_decode(trimmed)?);
        }

        Err(AddressError::BadEncoding(trimmed.to_string()))
    }

    fn from_payload(payload: &[u8]) -> Result<Self, AddressError> {
        if payload.len() != PAYLOAD_LEN {
            return Err(AddressError::BadLength(payload.len()));
        }
        if payload[0] != VERSION_BYTE {
            return Err(AddressError::BadVersion);
        }
        let mut bytes = [0u8; PAYLOAD_LEN];
        bytes.copy_from_slice(payload);
        Ok(TronAddress(bytes))
    }

    /// Lowercased 42-char hex rendering, version byte included.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// base58check rendering.
    pub fn to_base58(&self) -> String {
        b58check_encode(&self.0)
    }

    /// The canonical persisted key in the configured format.
    pub fn key(&self, format: KeyFormat) -> String {
        match format {
            KeyFormat::Hex => self.to_hex(),
            KeyFormat::Base58 => self.to_base58(),
        }
    }
}

impl std::fmt::Display for TronAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(Sha256::digest(payload));
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

/// base58check decode. Returns the payload with the 4-byte checksum
/// stripped and verified.
fn b58check_decode(s: &str) -> Result<Vec<u8>, AddressError> {
    // Accumulate the base58 digits into a little-endian byte string.
    let mut bytes: Vec<u8> = Vec::with_capacity(PAYLOAD_LEN + CHECKSUM_LEN);
    for ch in s.chars() {
        let digit = B58_ALPHABET
            .iter()
            .position(|&c| c as char == ch)
            .ok_or(AddressError::BadCharacter(ch))? as u32;
        let mut carry = digit;
        for b in bytes.iter_mut() {
            carry += (*b as u32) * 58;
            *b = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    // Each leading '1' encodes a leading zero byte.
    for ch in s.chars() {
        if ch == '1' {
            bytes.push(0);
        } else {
            break;
        }
    }
    bytes.reverse();

    if bytes.len() < CHECKSUM_LEN + 1 {
        return Err(AddressError::TooShort);
    }
    let (payload, check) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if checksum(payload).as_slice() != check {
        return Err(AddressError::BadChecksum);
    }
    Ok(payload.to_vec())
}

/// base58check encode of a raw payload (checksum appended).
fn b58check_encode(payload: &[u8]) -> String {
    let mut data = payload.to_vec();
    data.extend_from_slice(&checksum(payload));

    // Repeated divmod by 58 over the big-endian byte string.
    let mut digits: Vec<u8> = Vec::with_capacity(data.len() * 2);
    for &byte in &data {
        let mut carry = byte as u32;
        for d in digits.iter_mut() {
            carry += (*d as u32) << 8;
            *d = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }
    for &byte in &data {
        if byte == 0 {
            digits.push(0);
        } else {
            break;
        }
    }
    digits
        .iter()
        .rev()
        .map(|&d| B58_ALPHABET[d as usize] as char)
        .collect()
}
