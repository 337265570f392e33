use std::io;
use thiserror::Error;

use crate::protocol::crypto::CryptoError;
use crate::protocol::pairing::{PairingError, TlvError};
use crate::server::SessionError;
use crate::server::http::ParseError;
use crate::storage::StorageError;

/// Errors that can occur while serving a controller
#[derive(Debug, Error)]
pub enum HapError {
    // ===== Pairing Errors =====
    /// Pair-setup, pair-verify or pairing management aborted
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    /// Malformed TLV8 payload
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    /// Cryptographic primitive failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    // ===== Transport Errors =====
    /// Encrypted session framing or authentication failed
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Malformed HTTP request
    #[error("HTTP parse error: {0}")]
    Http(#[from] ParseError),

    /// Network I/O error
    #[error("network error: {0}")]
    NetworkError(#[from] io::Error),

    // ===== Storage Errors =====
    /// Pairing list or configuration store failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Peer closed the connection before a complete response
    #[error("connection closed")]
    ConnectionClosed,

    // ===== State Errors =====
    /// Server is already running
    #[error("server already running")]
    AlreadyRunning,

    // ===== Internal Errors =====
    /// Internal library error
    #[error("internal error: {message}")]
    InternalError {
        /// Description of the error
        message: String,
    },

    /// Unexpected HTTP status from the accessory (controller side)
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus {
        /// The status code received
        status: u16,
    },
}

impl HapError {
    /// Whether the controller may retry the same operation on a new connection
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::ConnectionClosed
                | Self::Pairing(PairingError::DeviceError { .. })
        )
    }

    /// Whether this error indicates tampering or a failed proof
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::Session(SessionError::AuthenticationFailed)
                | Self::Pairing(
                    PairingError::SignatureVerificationFailed
                        | PairingError::AuthenticationFailed(_)
                        | PairingError::UnknownController(_)
                )
        )
    }
}

/// Result type alias for accessory operations
pub type Result<T> = std::result::Result<T, HapError>;
