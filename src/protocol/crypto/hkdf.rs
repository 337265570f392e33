use super::CryptoError;
use hkdf::Hkdf;
use sha2::Sha512;

/// HKDF-SHA512 for key derivation
pub struct HkdfSha512 {
    hkdf: Hkdf<Sha512>,
}

impl HkdfSha512 {
    /// Create HKDF instance from input key material
    ///
    /// # Arguments
    /// * `salt` - Optional salt (can be None or empty)
    /// * `ikm` - Input key material
    #[must_use]
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        let hkdf = Hkdf::<Sha512>::new(salt, ikm);
        Self { hkdf }
    }

    /// Expand to derive output key material
    ///
    /// # Errors
    ///
    /// Returns error if `length` exceeds the HKDF output limit.
    pub fn expand(&self, info: &[u8], length: usize) -> Result<Vec<u8>, CryptoError> {
        let mut okm = vec![0u8; length];
        self.hkdf
            .expand(info, &mut okm)
            .map_err(|_| CryptoError::KeyDerivationFailed("HKDF expand failed".into()))?;
        Ok(okm)
    }

    /// Expand into fixed-size array
    ///
    /// # Errors
    ///
    /// Returns error if `N` exceeds the HKDF output limit.
    pub fn expand_fixed<const N: usize>(&self, info: &[u8]) -> Result<[u8; N], CryptoError> {
        let mut okm = [0u8; N];
        self.hkdf
            .expand(info, &mut okm)
            .map_err(|_| CryptoError::KeyDerivationFailed("HKDF expand failed".into()))?;
        Ok(okm)
    }
}

/// Derive a 32-byte key from a fixed salt/info pair
///
/// # Errors
///
/// Never fails for 32-byte output; the error is kept for API symmetry.
pub fn derive_key(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    HkdfSha512::new(Some(salt), ikm).expand_fixed::<32>(info)
}

/// Salt/info pairs used by the pairing protocol
pub mod labels {
    /// Pair-setup M4/M5/M6 encryption key
    pub const SETUP_ENCRYPT: (&[u8], &[u8]) = (b"Pair-Setup-Encrypt-Salt", b"Pair-Setup-Encrypt-Info");
    /// Controller signing material in pair-setup M5
    pub const SETUP_CONTROLLER_SIGN: (&[u8], &[u8]) = (
        b"Pair-Setup-Controller-Sign-Salt",
        b"Pair-Setup-Controller-Sign-Info",
    );
    /// Accessory signing material in pair-setup M6
    pub const SETUP_ACCESSORY_SIGN: (&[u8], &[u8]) = (
        b"Pair-Setup-Accessory-Sign-Salt",
        b"Pair-Setup-Accessory-Sign-Info",
    );
    /// MFi challenge in pair-setup M4
    pub const SETUP_MFI: (&[u8], &[u8]) = (b"MFi-Pair-Setup-Salt", b"MFi-Pair-Setup-Info");
    /// Pair-verify M2/M3 encryption key
    pub const VERIFY_ENCRYPT: (&[u8], &[u8]) =
        (b"Pair-Verify-Encrypt-Salt", b"Pair-Verify-Encrypt-Info");
    /// Session key, accessory to controller
    pub const CONTROL_READ: (&[u8], &[u8]) = (b"Control-Salt", b"Control-Read-Encryption-Key");
    /// Session key, controller to accessory
    pub const CONTROL_WRITE: (&[u8], &[u8]) = (b"Control-Salt", b"Control-Write-Encryption-Key");
}

/// Derive a 32-byte key from one of the [`labels`] pairs
///
/// # Errors
///
/// See [`derive_key`].
pub fn derive_labeled(label: (&[u8], &[u8]), ikm: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key(label.0, ikm, label.1)
}
