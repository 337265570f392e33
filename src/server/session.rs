//! Encrypted control session established by pair-verify
//!
//! Every message after pair-verify M4 travels in frames of
//! `length (u16 LE) | ciphertext | tag (16)`, where the length covers at most
//! 1024 plaintext bytes and is authenticated as associated data. Each
//! direction has its own key and a 64-bit frame counter used as the nonce.

use byteorder::{ByteOrder, LittleEndian};
use bytes::BytesMut;
use chacha20poly1305::{AeadInPlace, ChaCha20Poly1305, Key, KeyInit, Nonce, Tag};
use zeroize::Zeroize;

use crate::protocol::crypto::lengths;

/// Largest plaintext carried in one frame
pub const MAX_FRAME_PAYLOAD: usize = 1024;

const LENGTH_PREFIX: usize = 2;

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not established")]
    NotEstablished,

    #[error("frame authentication failed")]
    AuthenticationFailed,

    #[error("frame length {0} exceeds {MAX_FRAME_PAYLOAD}")]
    FrameTooLarge(usize),

    #[error("nonce counter exhausted")]
    NonceExhausted,

    #[error("encryption failed")]
    EncryptionFailed,
}

/// Directional session keys derived at the end of pair-verify
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    /// Accessory to controller (`Control-Read-Encryption-Key`)
    pub read_key: [u8; 32],
    /// Controller to accessory (`Control-Write-Encryption-Key`)
    pub write_key: [u8; 32],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys { .. }")
    }
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.read_key.zeroize();
        self.write_key.zeroize();
    }
}

fn frame_nonce(counter: u64) -> [u8; lengths::CHACHA_NONCE] {
    let mut nonce = [0u8; lengths::CHACHA_NONCE];
    LittleEndian::write_u64(&mut nonce[4..], counter);
    nonce
}

/// Framed ChaCha20-Poly1305 channel with one key per direction
pub struct SecureChannel {
    encrypt_cipher: ChaCha20Poly1305,
    decrypt_cipher: ChaCha20Poly1305,
    encrypt_count: u64,
    decrypt_count: u64,
    pending: BytesMut,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("encrypt_count", &self.encrypt_count)
            .field("decrypt_count", &self.decrypt_count)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl SecureChannel {
    /// Create a channel from raw directional keys
    #[must_use]
    pub fn new(encrypt_key: &[u8; 32], decrypt_key: &[u8; 32]) -> Self {
        Self {
            encrypt_cipher: ChaCha20Poly1305::new(Key::from_slice(encrypt_key)),
            decrypt_cipher: ChaCha20Poly1305::new(Key::from_slice(decrypt_key)),
            encrypt_count: 0,
            decrypt_count: 0,
            pending: BytesMut::new(),
        }
    }

    /// Accessory end: sends with the read key, receives with the write key
    #[must_use]
    pub fn accessory(keys: &SessionKeys) -> Self {
        Self::new(&keys.read_key, &keys.write_key)
    }

    /// Controller end: sends with the write key, receives with the read key
    #[must_use]
    pub fn controller(keys: &SessionKeys) -> Self {
        Self::new(&keys.write_key, &keys.read_key)
    }

    /// Encrypt `data` into one or more frames
    ///
    /// Empty input produces no frames.
    ///
    /// # Errors
    ///
    /// Returns error if the nonce counter is exhausted.
    pub fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, SessionError> {
        let frames = data.len().div_ceil(MAX_FRAME_PAYLOAD);
        let mut output =
            Vec::with_capacity(data.len() + frames * (LENGTH_PREFIX + lengths::CHACHA_TAG));

        for chunk in data.chunks(MAX_FRAME_PAYLOAD) {
            let mut len_bytes = [0u8; LENGTH_PREFIX];
            let len = u16::try_from(chunk.len()).map_err(|_| SessionError::FrameTooLarge(chunk.len()))?;
            LittleEndian::write_u16(&mut len_bytes, len);

            let nonce_bytes = frame_nonce(self.encrypt_count);
            let mut buffer = chunk.to_vec();
            let tag = self
                .encrypt_cipher
                .encrypt_in_place_detached(Nonce::from_slice(&nonce_bytes), &len_bytes, &mut buffer)
                .map_err(|_| SessionError::EncryptionFailed)?;

            output.extend_from_slice(&len_bytes);
            output.extend_from_slice(&buffer);
            output.extend_from_slice(tag.as_slice());

            self.encrypt_count = self
                .encrypt_count
                .checked_add(1)
                .ok_or(SessionError::NonceExhausted)?;
        }

        Ok(output)
    }

    /// Buffer `data` and decrypt every complete frame
    ///
    /// A trailing partial frame stays buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns error if a frame is oversized or fails authentication. The
    /// channel is unusable afterwards.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.pending.extend_from_slice(data);
        let mut output = Vec::new();

        while self.pending.len() >= LENGTH_PREFIX {
            let len = usize::from(LittleEndian::read_u16(&self.pending[..LENGTH_PREFIX]));
            if len > MAX_FRAME_PAYLOAD {
                return Err(SessionError::FrameTooLarge(len));
            }
            let frame_len = LENGTH_PREFIX + len + lengths::CHACHA_TAG;
            if self.pending.len() < frame_len {
                break;
            }

            let frame = self.pending.split_to(frame_len);
            let (aad, rest) = frame.split_at(LENGTH_PREFIX);
            let (ciphertext, tag) = rest.split_at(len);

            let nonce_bytes = frame_nonce(self.decrypt_count);
            let mut buffer = ciphertext.to_vec();
            self.decrypt_cipher
                .decrypt_in_place_detached(
                    Nonce::from_slice(&nonce_bytes),
                    aad,
                    &mut buffer,
                    Tag::from_slice(tag),
                )
                .map_err(|_| SessionError::AuthenticationFailed)?;

            self.decrypt_count = self
                .decrypt_count
                .checked_add(1)
                .ok_or(SessionError::NonceExhausted)?;
            output.extend_from_slice(&buffer);
        }

        Ok(output)
    }

    /// Bytes received but not yet forming a complete frame
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Per-connection security state on the accessory
#[derive(Default)]
pub struct Session {
    channel: Option<SecureChannel>,
    controller_id: Option<Vec<u8>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("established", &self.is_established())
            .field(
                "controller_id",
                &self.controller_id.as_deref().map(String::from_utf8_lossy),
            )
            .finish()
    }
}

impl Session {
    /// A plaintext session
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to encrypted framing for all subsequent traffic
    pub fn establish(&mut self, keys: &SessionKeys, controller_id: Vec<u8>) {
        self.channel = Some(SecureChannel::accessory(keys));
        self.controller_id = Some(controller_id);
    }

    /// Whether pair-verify has completed on this connection
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.channel.is_some()
    }

    /// Identifier of the verified controller
    #[must_use]
    pub fn controller_id(&self) -> Option<&[u8]> {
        self.controller_id.as_deref()
    }

    /// Encrypt outbound bytes
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotEstablished` before pair-verify completes.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.channel
            .as_mut()
            .ok_or(SessionError::NotEstablished)?
            .encrypt(plaintext)
    }

    /// Decrypt inbound bytes
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotEstablished` before pair-verify completes,
    /// or a framing/authentication error.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.channel
            .as_mut()
            .ok_or(SessionError::NotEstablished)?
            .decrypt(ciphertext)
    }
}
