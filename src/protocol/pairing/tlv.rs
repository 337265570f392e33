//! TLV8 encoding for `HomeKit` pairing protocol
//!
//! Records are `type (1 byte) | length (1 byte) | value`. Values longer than
//! 255 bytes are split across consecutive records of the same type; a
//! zero-length [`TlvType::Separator`] record splits adjacent items of the
//! same type.

use thiserror::Error;

/// Largest value a single record can carry
pub const MAX_FRAGMENT_LEN: usize = 255;

/// TLV type codes used in `HomeKit` pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    /// Method to use (pairing method)
    Method = 0x00,
    /// Pairing identifier
    Identifier = 0x01,
    /// Salt for SRP
    Salt = 0x02,
    /// Public key
    PublicKey = 0x03,
    /// Proof (M1/M2 in SRP)
    Proof = 0x04,
    /// Encrypted data
    EncryptedData = 0x05,
    /// Pairing state/sequence number
    State = 0x06,
    /// Error code
    Error = 0x07,
    /// Retry delay
    RetryDelay = 0x08,
    /// Certificate
    Certificate = 0x09,
    /// Signature
    Signature = 0x0A,
    /// Permissions
    Permissions = 0x0B,
    /// Fragment data
    FragmentData = 0x0C,
    /// Fragment last
    FragmentLast = 0x0D,
    /// Flags
    Flags = 0x13,
    /// Separator (empty value, used to separate items)
    Separator = 0xFF,
}

/// TLV encoding errors
#[derive(Debug, Error)]
pub enum TlvError {
    #[error("buffer too small")]
    BufferTooSmall,

    #[error("missing required field: {0:?}")]
    MissingField(TlvType),

    #[error("invalid value for {0:?}")]
    InvalidValue(TlvType),
}

/// One raw record as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvRecord<'a> {
    /// Raw type byte
    pub tlv_type: u8,
    /// Value bytes (at most 255)
    pub value: &'a [u8],
}

/// Read the record at the start of `buf`.
///
/// Returns the record and the rest of the buffer, or `None` once fewer than
/// two bytes remain. A length byte that runs past the end is clamped to the
/// bytes actually present, so a read never leaves `buf`.
#[must_use]
pub fn get_next(buf: &[u8]) -> Option<(TlvRecord<'_>, &[u8])> {
    let (&tlv_type, rest) = buf.split_first()?;
    let (&len, rest) = rest.split_first()?;
    let len = usize::from(len).min(rest.len());
    let (value, rest) = rest.split_at(len);
    Some((TlvRecord { tlv_type, value }, rest))
}

/// Iterator over the raw records of a buffer
pub struct TlvReader<'a> {
    remaining: &'a [u8],
}

impl<'a> TlvReader<'a> {
    /// Start reading at the beginning of `buf`
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { remaining: buf }
    }
}

impl<'a> Iterator for TlvReader<'a> {
    type Item = TlvRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (record, rest) = get_next(self.remaining)?;
        self.remaining = rest;
        Some(record)
    }
}

/// TLV encoder
#[derive(Debug, Clone, Default)]
pub struct TlvEncoder {
    buffer: Vec<u8>,
}

impl TlvEncoder {
    /// Create a new encoder
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Add a TLV item, fragmenting values over 255 bytes
    #[must_use]
    pub fn add(mut self, tlv_type: TlvType, value: &[u8]) -> Self {
        if value.is_empty() {
            self.buffer.push(tlv_type as u8);
            self.buffer.push(0);
            return self;
        }

        for chunk in value.chunks(MAX_FRAGMENT_LEN) {
            self.buffer.push(tlv_type as u8);
            #[allow(clippy::cast_possible_truncation)]
            self.buffer.push(chunk.len() as u8);
            self.buffer.extend_from_slice(chunk);
        }

        self
    }

    /// Add a single byte value
    #[must_use]
    pub fn add_byte(self, tlv_type: TlvType, value: u8) -> Self {
        self.add(tlv_type, &[value])
    }

    /// Add state value
    #[must_use]
    pub fn add_state(self, state: u8) -> Self {
        self.add_byte(TlvType::State, state)
    }

    /// Add method value
    #[must_use]
    pub fn add_method(self, method: u8) -> Self {
        self.add_byte(TlvType::Method, method)
    }

    /// Add error code
    #[must_use]
    pub fn add_error(self, code: u8) -> Self {
        self.add_byte(TlvType::Error, code)
    }

    /// Add a zero-length separator record
    #[must_use]
    pub fn add_separator(self) -> Self {
        self.add(TlvType::Separator, &[])
    }

    /// Build the encoded TLV data
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

/// Reassembled TLV items
#[derive(Debug, Default)]
pub struct TlvDecoder {
    items: Vec<(u8, Vec<u8>)>,
}

impl TlvDecoder {
    /// Decode TLV data, joining consecutive records of the same type
    ///
    /// # Errors
    ///
    /// Returns `TlvError::BufferTooSmall` if the last record is truncated.
    pub fn decode(data: &[u8]) -> Result<Self, TlvError> {
        let mut lists = Self::decode_list(data)?;
        let mut items = Vec::new();
        for decoder in &mut lists {
            items.append(&mut decoder.items);
        }
        Ok(Self { items })
    }

    /// Decode a separator-delimited list of item groups
    ///
    /// # Errors
    ///
    /// Returns `TlvError::BufferTooSmall` if the last record is truncated.
    pub fn decode_list(data: &[u8]) -> Result<Vec<Self>, TlvError> {
        check_framing(data)?;

        let mut groups = vec![Self::default()];
        let mut continuing = false;
        for record in TlvReader::new(data) {
            if record.tlv_type == TlvType::Separator as u8 {
                groups.push(Self::default());
                continuing = false;
                continue;
            }

            let Some(group) = groups.last_mut() else {
                continue;
            };
            match group.items.last_mut() {
                Some((last_type, value)) if continuing && *last_type == record.tlv_type => {
                    value.extend_from_slice(record.value);
                }
                _ => group.items.push((record.tlv_type, record.value.to_vec())),
            }
            continuing = true;
        }

        groups.retain(|g| !g.items.is_empty());
        Ok(groups)
    }

    /// Get a value by type
    #[must_use]
    pub fn get(&self, tlv_type: TlvType) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == tlv_type as u8)
            .map(|(_, v)| v.as_slice())
    }

    /// Get a single byte value
    #[must_use]
    pub fn get_u8(&self, tlv_type: TlvType) -> Option<u8> {
        self.get(tlv_type).and_then(|v| v.first().copied())
    }

    /// Get a required value
    ///
    /// # Errors
    ///
    /// Returns error if field is missing
    pub fn get_required(&self, tlv_type: TlvType) -> Result<&[u8], TlvError> {
        self.get(tlv_type).ok_or(TlvError::MissingField(tlv_type))
    }

    /// Get state value
    ///
    /// # Errors
    ///
    /// Returns error if state field is missing or invalid length
    pub fn get_state(&self) -> Result<u8, TlvError> {
        let value = self.get_required(TlvType::State)?;
        match value {
            [state] => Ok(*state),
            _ => Err(TlvError::InvalidValue(TlvType::State)),
        }
    }

    /// Get error value (if present)
    #[must_use]
    pub fn get_error(&self) -> Option<u8> {
        self.get_u8(TlvType::Error)
    }
}

fn check_framing(data: &[u8]) -> Result<(), TlvError> {
    let mut pos = 0;
    while pos < data.len() {
        if pos + 2 > data.len() {
            return Err(TlvError::BufferTooSmall);
        }
        pos += 2 + usize::from(data[pos + 1]);
        if pos > data.len() {
            return Err(TlvError::BufferTooSmall);
        }
    }
    Ok(())
}

/// Pairing method constants
pub mod methods {
    /// Pair-Setup
    pub const PAIR_SETUP: u8 = 0;
    /// Pair-Setup with auth (`MFi`)
    pub const PAIR_SETUP_AUTH: u8 = 1;
    /// Pair-Verify
    pub const PAIR_VERIFY: u8 = 2;
    /// Add pairing
    pub const ADD_PAIRING: u8 = 3;
    /// Remove pairing
    pub const REMOVE_PAIRING: u8 = 4;
    /// List pairings
    pub const LIST_PAIRINGS: u8 = 5;
}

/// Error codes carried in the `Error` item
pub mod errors {
    pub const UNKNOWN: u8 = 0x01;
    pub const AUTHENTICATION: u8 = 0x02;
    pub const BACKOFF: u8 = 0x03;
    pub const MAX_PEERS: u8 = 0x04;
    pub const MAX_TRIES: u8 = 0x05;
    pub const UNAVAILABLE: u8 = 0x06;
    pub const BUSY: u8 = 0x07;
}

/// Permission bits carried in the `Permissions` item
pub mod permissions {
    /// Regular user
    pub const USER: u8 = 0x00;
    /// Admin, may add/remove/list pairings
    pub const ADMIN: u8 = 0x01;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tlv_encode_simple() {
        let encoded = TlvEncoder::new().add_state(1).add_method(0).build();

        assert_eq!(
            encoded,
            vec![
                0x06, 0x01, 0x01, // State = 1
                0x00, 0x01, 0x00, // Method = 0
            ]
        );
    }

    #[test]
    fn test_tlv_fragmentation() {
        let long_data = vec![0xAA; 300];
        let encoded = TlvEncoder::new().add(TlvType::PublicKey, &long_data).build();

        // 0x03, 0xFF, [255 bytes], 0x03, 0x2D, [45 bytes]
        assert_eq!(encoded[0], TlvType::PublicKey as u8);
        assert_eq!(encoded[1], 255);
        assert_eq!(encoded[257], TlvType::PublicKey as u8);
        assert_eq!(encoded[258], 45);

        let decoder = TlvDecoder::decode(&encoded).unwrap();
        assert_eq!(decoder.get(TlvType::PublicKey).unwrap(), &long_data[..]);
    }

    #[test]
    fn test_get_next_walks_records() {
        let data = [0x06, 0x01, 0x03, 0x04, 0x02, 0xAA, 0xBB];
        let (first, rest) = get_next(&data).unwrap();
        assert_eq!(first.tlv_type, 0x06);
        assert_eq!(first.value, &[0x03]);

        let (second, rest) = get_next(rest).unwrap();
        assert_eq!(second.tlv_type, 0x04);
        assert_eq!(second.value, &[0xAA, 0xBB]);

        assert!(get_next(rest).is_none());
    }

    #[test]
    fn test_get_next_clamps_overlong_length() {
        let data = [0x01, 0x10, 0xAA];
        let (record, rest) = get_next(&data).unwrap();
        assert_eq!(record.value, &[0xAA]);
        assert!(rest.is_empty());

        assert!(get_next(&[0x01]).is_none());
        assert!(get_next(&[]).is_none());
    }

    #[test]
    fn test_strict_decode_rejects_truncation() {
        assert!(matches!(
            TlvDecoder::decode(&[0x01, 0x10, 0xAA]),
            Err(TlvError::BufferTooSmall)
        ));
        assert!(matches!(
            TlvDecoder::decode(&[0x06]),
            Err(TlvError::BufferTooSmall)
        ));
    }

    #[test]
    fn test_unknown_type_is_skipped_not_error() {
        let data = [0x42, 0x02, 0x00, 0x00, 0x06, 0x01, 0x05];
        let decoder = TlvDecoder::decode(&data).unwrap();
        assert_eq!(decoder.get_state().unwrap(), 5);
    }

    #[test]
    fn test_separator_splits_list() {
        let encoded = TlvEncoder::new()
            .add(TlvType::Identifier, b"alice")
            .add_byte(TlvType::Permissions, permissions::ADMIN)
            .add_separator()
            .add(TlvType::Identifier, b"bob")
            .add_byte(TlvType::Permissions, permissions::USER)
            .build();

        let groups = TlvDecoder::decode_list(&encoded).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].get(TlvType::Identifier), Some(&b"alice"[..]));
        assert_eq!(groups[1].get(TlvType::Identifier), Some(&b"bob"[..]));
        assert_eq!(groups[1].get_u8(TlvType::Permissions), Some(0));
    }

    #[test]
    fn test_non_adjacent_same_type_not_joined() {
        let encoded = TlvEncoder::new()
            .add(TlvType::Identifier, b"one")
            .add_state(2)
            .add(TlvType::Identifier, b"two")
            .build();

        let decoder = TlvDecoder::decode(&encoded).unwrap();
        assert_eq!(decoder.get(TlvType::Identifier), Some(&b"one"[..]));
    }

    #[test]
    fn test_invalid_state_length() {
        let decoder = TlvDecoder::decode(&[0x06, 0x02, 0x01, 0x02]).unwrap();
        assert!(matches!(
            decoder.get_state(),
            Err(TlvError::InvalidValue(TlvType::State))
        ));
    }

    #[test]
    fn test_empty_value_encodes_header_only() {
        let encoded = TlvEncoder::new().add(TlvType::Proof, &[]).build();
        assert_eq!(encoded, vec![0x04, 0x00]);
    }
}
