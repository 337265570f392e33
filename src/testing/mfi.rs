//! Software stand-in for the MFi authentication coprocessor

use crate::protocol::crypto::{Ed25519KeyPair, SHA1_LEN};
use crate::protocol::pairing::PairingError;
use crate::server::MfiAuthenticator;

/// Signs MFi challenges with an Ed25519 key instead of the coprocessor
pub struct SoftwareMfi {
    certificate: Vec<u8>,
    key: Ed25519KeyPair,
}

impl std::fmt::Debug for SoftwareMfi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareMfi")
            .field("certificate_len", &self.certificate.len())
            .finish_non_exhaustive()
    }
}

impl SoftwareMfi {
    /// Authenticator presenting `certificate`
    #[must_use]
    pub fn new(certificate: Vec<u8>) -> Self {
        Self {
            certificate,
            key: Ed25519KeyPair::generate(),
        }
    }

    /// Public half of the signing key
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        *self.key.public_key().as_bytes()
    }
}

impl MfiAuthenticator for SoftwareMfi {
    fn certificate(&self) -> Result<Vec<u8>, PairingError> {
        Ok(self.certificate.clone())
    }

    fn sign(&self, digest: &[u8; SHA1_LEN]) -> Result<Vec<u8>, PairingError> {
        Ok(self.key.sign(digest).to_bytes().to_vec())
    }
}
