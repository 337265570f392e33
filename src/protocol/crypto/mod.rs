//! Cryptographic primitives for `HomeKit` pairing and session encryption
//!
//! Thin typed wrappers over the `RustCrypto` and dalek crates. Nothing here is
//! protocol-aware beyond the fixed SRP group and the HKDF label table.

#![allow(missing_docs)]

mod chacha;
mod digest;
mod ed25519;
mod error;
mod hkdf;
mod srp;
mod x25519;

pub use self::chacha::{ChaCha20Poly1305Cipher, Nonce, open, seal};
pub use self::digest::{SHA1_LEN, sha1};
pub use self::ed25519::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature, verify_raw};
pub use self::error::CryptoError;
pub use self::hkdf::{HkdfSha512, derive_key, derive_labeled, labels};
pub use self::srp::{
    SRP_MODULUS_LEN, SRP_USERNAME, SessionKey, SrpClient, SrpServer, SrpVerifier,
};
pub use self::x25519::{X25519KeyPair, X25519PublicKey, X25519SharedSecret};

/// Length of various cryptographic values
pub mod lengths {
    /// Ed25519 public key length
    pub const ED25519_PUBLIC_KEY: usize = 32;
    /// Ed25519 signature length
    pub const ED25519_SIGNATURE: usize = 64;
    /// X25519 public key length
    pub const X25519_PUBLIC_KEY: usize = 32;
    /// X25519 shared secret length
    pub const X25519_SHARED_SECRET: usize = 32;
    /// ChaCha20-Poly1305 key length
    pub const CHACHA_KEY: usize = 32;
    /// ChaCha20-Poly1305 nonce length
    pub const CHACHA_NONCE: usize = 12;
    /// ChaCha20-Poly1305 tag length
    pub const CHACHA_TAG: usize = 16;
    /// SRP proof length (SHA-512)
    pub const SRP_PROOF: usize = 64;
}
