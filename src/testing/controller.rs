//! Reference controller for exercising the accessory
//!
//! Implements the controller half of pair-setup and pair-verify and builds
//! pairing management requests. Not hardened; meant for tests and demos.

use tracing::debug;

use crate::protocol::crypto::{
    Ed25519KeyPair, SRP_USERNAME, SessionKey, SrpClient, SrpVerifier, X25519KeyPair,
    X25519PublicKey, derive_labeled, labels, open, seal, verify_raw,
};
use crate::protocol::pairing::tlv::{TlvDecoder, TlvEncoder, TlvType, methods, permissions};
use crate::protocol::pairing::{PairingError, fixed_key, states};
use crate::server::SessionKeys;
use crate::storage::PairingRecord;

/// Accessory identity learned from pair-setup M6
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryInfo {
    /// Accessory pairing identifier
    pub identifier: Vec<u8>,
    /// Accessory Ed25519 long-term public key
    pub public_key: [u8; 32],
}

/// MFi material the accessory sent encrypted in M4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfiProof {
    /// Signature over the SHA-1 of the MFi challenge
    pub signature: Vec<u8>,
    /// Coprocessor certificate
    pub certificate: Vec<u8>,
    /// The challenge the accessory was expected to sign
    pub challenge: [u8; 32],
}

struct VerifyProgress {
    ephemeral: X25519KeyPair,
    accessory_public: [u8; 32],
    shared_secret: [u8; 32],
}

/// A controller with its own long-term identity
pub struct TestController {
    identifier: Vec<u8>,
    ltsk: Ed25519KeyPair,
    srp_verifier: Option<SrpVerifier>,
    session_key: Option<SessionKey>,
    mfi_proof: Option<MfiProof>,
    verify: Option<VerifyProgress>,
}

impl std::fmt::Debug for TestController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestController")
            .field("identifier", &String::from_utf8_lossy(&self.identifier))
            .finish_non_exhaustive()
    }
}

fn check_reply(tlv: &TlvDecoder, expected: u8) -> Result<(), PairingError> {
    if let Some(code) = tlv.get_error() {
        return Err(PairingError::DeviceError { code });
    }
    let actual = tlv.get_state()?;
    if actual != expected {
        return Err(PairingError::UnexpectedState { expected, actual });
    }
    Ok(())
}

impl TestController {
    /// New controller with a freshly generated long-term key
    #[must_use]
    pub fn new(identifier: impl Into<Vec<u8>>) -> Self {
        Self {
            identifier: identifier.into(),
            ltsk: Ed25519KeyPair::generate(),
            srp_verifier: None,
            session_key: None,
            mfi_proof: None,
            verify: None,
        }
    }

    /// Controller pairing identifier
    #[must_use]
    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    /// Controller long-term public key
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        *self.ltsk.public_key().as_bytes()
    }

    /// MFi proof from the last M4, if the accessory sent one
    #[must_use]
    pub fn mfi_proof(&self) -> Option<&MfiProof> {
        self.mfi_proof.as_ref()
    }

    /// Pair-setup M1
    pub fn pair_setup_m1(&mut self) -> Vec<u8> {
        self.srp_verifier = None;
        self.session_key = None;
        self.mfi_proof = None;
        TlvEncoder::new()
            .add_state(states::M1)
            .add_method(methods::PAIR_SETUP)
            .build()
    }

    /// Process M2 and produce M3 using `setup_code`
    ///
    /// # Errors
    ///
    /// Returns `PairingError::DeviceError` if M2 carries an error code.
    pub fn pair_setup_m3(&mut self, m2: &[u8], setup_code: &str) -> Result<Vec<u8>, PairingError> {
        let tlv = TlvDecoder::decode(m2)?;
        check_reply(&tlv, states::M2)?;
        let salt = tlv.get_required(TlvType::Salt)?;
        let server_public = tlv.get_required(TlvType::PublicKey)?;

        let srp = SrpClient::new()?;
        let verifier =
            srp.process_challenge(SRP_USERNAME, setup_code.as_bytes(), salt, server_public)?;

        let m3 = TlvEncoder::new()
            .add_state(states::M3)
            .add(TlvType::PublicKey, srp.public_key())
            .add(TlvType::Proof, verifier.client_proof())
            .build();

        self.srp_verifier = Some(verifier);
        Ok(m3)
    }

    /// Process M4 and produce M5
    ///
    /// # Errors
    ///
    /// Returns error if M4 carries an error code or the server proof is wrong.
    pub fn pair_setup_m5(&mut self, m4: &[u8]) -> Result<Vec<u8>, PairingError> {
        self.build_m5(m4, false)
    }

    /// Like [`TestController::pair_setup_m5`] but with a corrupted signature
    ///
    /// # Errors
    ///
    /// See [`TestController::pair_setup_m5`].
    pub fn pair_setup_m5_with_bad_signature(&mut self, m4: &[u8]) -> Result<Vec<u8>, PairingError> {
        self.build_m5(m4, true)
    }

    fn build_m5(&mut self, m4: &[u8], corrupt: bool) -> Result<Vec<u8>, PairingError> {
        let tlv = TlvDecoder::decode(m4)?;
        check_reply(&tlv, states::M4)?;
        let verifier = self
            .srp_verifier
            .take()
            .ok_or(PairingError::UnexpectedState {
                expected: states::M2,
                actual: states::M4,
            })?;
        let session_key = verifier
            .verify_server(tlv.get_required(TlvType::Proof)?)
            .map_err(|e| PairingError::AuthenticationFailed(e.to_string()))?;

        let encrypt_key = derive_labeled(labels::SETUP_ENCRYPT, session_key.as_bytes())?;
        if let Some(encrypted) = tlv.get(TlvType::EncryptedData) {
            let sub_tlv = TlvDecoder::decode(&open(&encrypt_key, b"PS-Msg04", encrypted)?)?;
            self.mfi_proof = Some(MfiProof {
                signature: sub_tlv.get_required(TlvType::Signature)?.to_vec(),
                certificate: sub_tlv.get_required(TlvType::Certificate)?.to_vec(),
                challenge: derive_labeled(labels::SETUP_MFI, session_key.as_bytes())?,
            });
        }

        let controller_x = derive_labeled(labels::SETUP_CONTROLLER_SIGN, session_key.as_bytes())?;
        let ltpk = self.public_key();
        let signed = [&controller_x[..], self.identifier.as_slice(), &ltpk[..]].concat();
        let mut signature = self.ltsk.sign(&signed).to_bytes();
        if corrupt {
            signature[0] ^= 0x01;
        }

        let sub_tlv = TlvEncoder::new()
            .add(TlvType::Identifier, &self.identifier)
            .add(TlvType::PublicKey, &ltpk)
            .add(TlvType::Signature, &signature)
            .build();
        let encrypted = seal(&encrypt_key, b"PS-Msg05", &sub_tlv)?;

        self.session_key = Some(session_key);
        Ok(TlvEncoder::new()
            .add_state(states::M5)
            .add(TlvType::EncryptedData, &encrypted)
            .build())
    }

    /// Process M6, checking the accessory signature
    ///
    /// # Errors
    ///
    /// Returns error if M6 carries an error code or does not verify.
    pub fn pair_setup_finish(&mut self, m6: &[u8]) -> Result<AccessoryInfo, PairingError> {
        let tlv = TlvDecoder::decode(m6)?;
        check_reply(&tlv, states::M6)?;
        let session_key = self.session_key.take().ok_or(PairingError::UnexpectedState {
            expected: states::M4,
            actual: states::M6,
        })?;

        let encrypt_key = derive_labeled(labels::SETUP_ENCRYPT, session_key.as_bytes())?;
        let plaintext = open(
            &encrypt_key,
            b"PS-Msg06",
            tlv.get_required(TlvType::EncryptedData)?,
        )?;
        let sub_tlv = TlvDecoder::decode(&plaintext)?;

        let identifier = sub_tlv.get_required(TlvType::Identifier)?;
        let public_key: [u8; 32] =
            fixed_key(sub_tlv.get_required(TlvType::PublicKey)?, "accessory LTPK")?;
        let signature = sub_tlv.get_required(TlvType::Signature)?;

        let accessory_x = derive_labeled(labels::SETUP_ACCESSORY_SIGN, session_key.as_bytes())?;
        let signed = [&accessory_x[..], identifier, &public_key[..]].concat();
        verify_raw(&public_key, &signed, signature)
            .map_err(|_| PairingError::SignatureVerificationFailed)?;

        debug!("Paired with accessory {}", String::from_utf8_lossy(identifier));
        Ok(AccessoryInfo {
            identifier: identifier.to_vec(),
            public_key,
        })
    }

    /// Run the whole pair-setup exchange through `send`
    ///
    /// # Errors
    ///
    /// Returns the first error from `send` or from any step.
    pub fn pair_setup<F, E>(&mut self, mut send: F, setup_code: &str) -> Result<AccessoryInfo, E>
    where
        F: FnMut(&[u8]) -> Result<Vec<u8>, E>,
        E: From<PairingError>,
    {
        let m2 = send(&self.pair_setup_m1())?;
        let m3 = self.pair_setup_m3(&m2, setup_code)?;
        let m4 = send(&m3)?;
        let m5 = self.pair_setup_m5(&m4)?;
        let m6 = send(&m5)?;
        Ok(self.pair_setup_finish(&m6)?)
    }

    /// Pair-verify M1 with a fresh ephemeral key
    pub fn pair_verify_m1(&mut self) -> Vec<u8> {
        let ephemeral = X25519KeyPair::generate();
        let m1 = TlvEncoder::new()
            .add_state(states::M1)
            .add(TlvType::PublicKey, ephemeral.public_key().as_bytes())
            .build();
        self.verify = Some(VerifyProgress {
            ephemeral,
            accessory_public: [0; 32],
            shared_secret: [0; 32],
        });
        m1
    }

    /// Process M2, checking it against `accessory_ltpk`, and produce M3
    ///
    /// # Errors
    ///
    /// Returns error if M2 carries an error code or the accessory proof fails.
    pub fn pair_verify_m3(
        &mut self,
        m2: &[u8],
        accessory_ltpk: &[u8; 32],
    ) -> Result<Vec<u8>, PairingError> {
        let tlv = TlvDecoder::decode(m2)?;
        check_reply(&tlv, states::M2)?;
        let progress = self.verify.as_mut().ok_or(PairingError::UnexpectedState {
            expected: states::M1,
            actual: states::M2,
        })?;

        let accessory_public: [u8; 32] =
            fixed_key(tlv.get_required(TlvType::PublicKey)?, "accessory curve key")?;
        let shared = progress
            .ephemeral
            .diffie_hellman(&X25519PublicKey::from_bytes(&accessory_public)?);
        let encrypt_key = derive_labeled(labels::VERIFY_ENCRYPT, shared.as_bytes())?;

        let plaintext = open(
            &encrypt_key,
            b"PV-Msg02",
            tlv.get_required(TlvType::EncryptedData)?,
        )?;
        let sub_tlv = TlvDecoder::decode(&plaintext)?;
        let accessory_id = sub_tlv.get_required(TlvType::Identifier)?;
        let accessory_sig = sub_tlv.get_required(TlvType::Signature)?;

        let controller_public = *progress.ephemeral.public_key().as_bytes();
        let signed = [&accessory_public[..], accessory_id, &controller_public[..]].concat();
        verify_raw(accessory_ltpk, &signed, accessory_sig)
            .map_err(|_| PairingError::SignatureVerificationFailed)?;

        let signed = [&controller_public[..], self.identifier.as_slice(), &accessory_public[..]].concat();
        let signature = self.ltsk.sign(&signed).to_bytes();
        let sub_tlv = TlvEncoder::new()
            .add(TlvType::Identifier, &self.identifier)
            .add(TlvType::Signature, &signature)
            .build();
        let encrypted = seal(&encrypt_key, b"PV-Msg03", &sub_tlv)?;

        progress.accessory_public = accessory_public;
        progress.shared_secret = *shared.as_bytes();
        Ok(TlvEncoder::new()
            .add_state(states::M3)
            .add(TlvType::EncryptedData, &encrypted)
            .build())
    }

    /// Process M4 and derive the session keys
    ///
    /// # Errors
    ///
    /// Returns error if M4 carries an error code.
    pub fn pair_verify_finish(&mut self, m4: &[u8]) -> Result<SessionKeys, PairingError> {
        let tlv = TlvDecoder::decode(m4)?;
        check_reply(&tlv, states::M4)?;
        let progress = self.verify.take().ok_or(PairingError::UnexpectedState {
            expected: states::M3,
            actual: states::M4,
        })?;

        Ok(SessionKeys {
            read_key: derive_labeled(labels::CONTROL_READ, &progress.shared_secret)?,
            write_key: derive_labeled(labels::CONTROL_WRITE, &progress.shared_secret)?,
        })
    }

    /// Run the whole pair-verify exchange through `send`
    ///
    /// # Errors
    ///
    /// Returns the first error from `send` or from any step.
    pub fn pair_verify<F, E>(
        &mut self,
        mut send: F,
        accessory_ltpk: &[u8; 32],
    ) -> Result<SessionKeys, E>
    where
        F: FnMut(&[u8]) -> Result<Vec<u8>, E>,
        E: From<PairingError>,
    {
        let m2 = send(&self.pair_verify_m1())?;
        let m3 = self.pair_verify_m3(&m2, accessory_ltpk)?;
        let m4 = send(&m3)?;
        Ok(self.pair_verify_finish(&m4)?)
    }

    /// Add-pairing request body
    #[must_use]
    pub fn add_pairing_request(identifier: &[u8], public_key: &[u8; 32], admin: bool) -> Vec<u8> {
        TlvEncoder::new()
            .add_state(states::M1)
            .add_method(methods::ADD_PAIRING)
            .add(TlvType::Identifier, identifier)
            .add(TlvType::PublicKey, public_key)
            .add_byte(
                TlvType::Permissions,
                if admin {
                    permissions::ADMIN
                } else {
                    permissions::USER
                },
            )
            .build()
    }

    /// Remove-pairing request body
    #[must_use]
    pub fn remove_pairing_request(identifier: &[u8]) -> Vec<u8> {
        TlvEncoder::new()
            .add_state(states::M1)
            .add_method(methods::REMOVE_PAIRING)
            .add(TlvType::Identifier, identifier)
            .build()
    }

    /// List-pairings request body
    #[must_use]
    pub fn list_pairings_request() -> Vec<u8> {
        TlvEncoder::new()
            .add_state(states::M1)
            .add_method(methods::LIST_PAIRINGS)
            .build()
    }

    /// Parse a list-pairings response
    ///
    /// # Errors
    ///
    /// Returns error if the response carries an error code or a malformed entry.
    pub fn parse_pairing_list(body: &[u8]) -> Result<Vec<PairingRecord>, PairingError> {
        let groups = TlvDecoder::decode_list(body)?;
        let mut records = Vec::with_capacity(groups.len());
        for (i, group) in groups.iter().enumerate() {
            if i == 0 {
                check_reply(group, states::M2)?;
            }
            let Some(identifier) = group.get(TlvType::Identifier) else {
                continue;
            };
            let public_key = fixed_key(group.get_required(TlvType::PublicKey)?, "controller LTPK")?;
            let admin = group
                .get_u8(TlvType::Permissions)
                .is_some_and(|p| p & permissions::ADMIN != 0);
            records.push(PairingRecord::new(identifier, public_key, admin)?);
        }
        Ok(records)
    }
}
