//! `HomeKit` pairing protocol primitives
//!
//! The TLV8 codec and the error type shared by the accessory-side engines in
//! [`crate::server`] and the reference controller in [`crate::testing`].

pub mod tlv;

pub use tlv::{TlvDecoder, TlvEncoder, TlvError, TlvReader, TlvRecord, TlvType, get_next};

use crate::protocol::crypto::CryptoError;
use crate::storage::StorageError;

/// Pairing message sequence numbers (`State` item values)
pub mod states {
    pub const M1: u8 = 1;
    pub const M2: u8 = 2;
    pub const M3: u8 = 3;
    pub const M4: u8 = 4;
    pub const M5: u8 = 5;
    pub const M6: u8 = 6;
}

/// Pairing errors
///
/// Protocol failures that the peer learns about travel as TLV `Error` items
/// inside an `Ok` response; an `Err` of this type means the exchange is
/// aborted and the connection is dropped without a reply.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("unexpected state: expected {expected}, got {actual}")]
    UnexpectedState { expected: u8, actual: u8 },

    #[error("invalid TLV: {0}")]
    InvalidTlv(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("unknown controller: {0}")]
    UnknownController(String),

    #[error("accessory has no long-term key (pair-setup never completed)")]
    NotPaired,

    #[error("encrypted session required")]
    SessionNotEstablished,

    #[error("MFi authenticator failed: {0}")]
    Authenticator(String),

    #[error("peer returned error: {code}")]
    DeviceError { code: u8 },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),
}

/// Copy a fixed-size key out of a TLV value
///
/// # Errors
///
/// Returns `PairingError::InvalidTlv` if the length differs.
pub fn fixed_key<const N: usize>(value: &[u8], what: &str) -> Result<[u8; N], PairingError> {
    value
        .try_into()
        .map_err(|_| PairingError::InvalidTlv(format!("{what}: expected {N} bytes, got {}", value.len())))
}
