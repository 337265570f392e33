use super::{CryptoError, lengths};
use chacha20poly1305::{
    ChaCha20Poly1305 as ChaChaImpl, Nonce as ChaChaNonce,
    aead::{Aead, KeyInit, Payload},
};

/// 12-byte nonce for ChaCha20-Poly1305
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; 12]);

impl Nonce {
    /// Create from bytes
    ///
    /// # Errors
    ///
    /// Returns error if `bytes` is not 12 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 12] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: lengths::CHACHA_NONCE,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Create from u64 counter (4 zero bytes, then little-endian counter)
    #[must_use]
    pub fn from_counter(counter: u64) -> Self {
        let mut arr = [0u8; 12];
        arr[4..12].copy_from_slice(&counter.to_le_bytes());
        Self(arr)
    }

    /// Create from an 8-byte message label such as `PS-Msg05`
    ///
    /// The label fills the last 8 bytes; the first 4 are zero.
    #[must_use]
    pub fn from_label(label: &[u8; 8]) -> Self {
        let mut arr = [0u8; 12];
        arr[4..12].copy_from_slice(label);
        Self(arr)
    }

    /// Get as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

/// ChaCha20-Poly1305 AEAD cipher
pub struct ChaCha20Poly1305Cipher {
    cipher: ChaChaImpl,
}

impl ChaCha20Poly1305Cipher {
    /// Create cipher with 32-byte key
    ///
    /// # Errors
    ///
    /// Returns error if the key is not 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != lengths::CHACHA_KEY {
            return Err(CryptoError::InvalidKeyLength {
                expected: lengths::CHACHA_KEY,
                actual: key.len(),
            });
        }

        let cipher =
            ChaChaImpl::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
                expected: lengths::CHACHA_KEY,
                actual: key.len(),
            })?;

        Ok(Self { cipher })
    }

    /// Encrypt with authentication
    ///
    /// Returns ciphertext with appended 16-byte tag
    ///
    /// # Errors
    ///
    /// Returns error if the AEAD backend fails.
    pub fn encrypt(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(ChaChaNonce::from_slice(&nonce.0), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    /// Encrypt with associated data
    ///
    /// # Errors
    ///
    /// Returns error if the AEAD backend fails.
    pub fn encrypt_with_aad(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(
                ChaChaNonce::from_slice(&nonce.0),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    /// Decrypt and verify authentication
    ///
    /// Input should be ciphertext with appended 16-byte tag
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::DecryptionFailed` if the tag does not verify.
    pub fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(ChaChaNonce::from_slice(&nonce.0), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    /// Decrypt with associated data
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::DecryptionFailed` if the tag does not verify.
    pub fn decrypt_with_aad(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(
                ChaChaNonce::from_slice(&nonce.0),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

/// One-shot seal under a message label nonce
///
/// # Errors
///
/// Returns error if the key is invalid.
pub fn seal(key: &[u8], label: &[u8; 8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    ChaCha20Poly1305Cipher::new(key)?.encrypt(&Nonce::from_label(label), plaintext)
}

/// One-shot open under a message label nonce
///
/// # Errors
///
/// Returns error if the key is invalid or authentication fails.
pub fn open(key: &[u8], label: &[u8; 8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    ChaCha20Poly1305Cipher::new(key)?.decrypt(&Nonce::from_label(label), ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = [0x42u8; 32];
        let cipher = ChaCha20Poly1305Cipher::new(&key).unwrap();

        let nonce = Nonce::from_counter(1);
        let plaintext = b"Hello, accessory!";

        let ciphertext = cipher.encrypt(&nonce, plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + lengths::CHACHA_TAG);

        let decrypted = cipher.decrypt(&nonce, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_label_nonce_layout() {
        let nonce = Nonce::from_label(b"PS-Msg05");
        assert_eq!(&nonce.as_bytes()[..4], &[0, 0, 0, 0]);
        assert_eq!(&nonce.as_bytes()[4..], b"PS-Msg05");
    }

    #[test]
    fn test_open_wrong_label_fails() {
        let key = [7u8; 32];
        let sealed = seal(&key, b"PV-Msg02", b"payload").unwrap();

        assert!(open(&key, b"PV-Msg02", &sealed).is_ok());
        assert!(matches!(
            open(&key, b"PV-Msg03", &sealed),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_decrypt_wrong_aad_fails() {
        let key = [0x42u8; 32];
        let cipher = ChaCha20Poly1305Cipher::new(&key).unwrap();

        let nonce = Nonce::from_counter(1);
        let ciphertext = cipher.encrypt_with_aad(&nonce, b"aad1", b"data").unwrap();

        let result = cipher.decrypt_with_aad(&nonce, b"aad2", &ciphertext);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(matches!(
            ChaCha20Poly1305Cipher::new(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
    }
}
