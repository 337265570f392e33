//! Pair-setup (M1 to M6)
//!
//! SRP-6a authenticates the setup code, then both sides exchange their
//! Ed25519 long-term public keys under the SRP-derived encryption key.
//!
//! Only one pair-setup may be in flight. The [`PairSetupContext`] records
//! which connection owns it; other connections get `Busy` until the owner
//! finishes, fails, or disconnects. Failed attempts are counted and, once
//! the limit is reached, every M1 is answered with `MaxTries`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::RngCore;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::accessory::{Accessory, ConnectionId};
use super::config::SetupCode;
use crate::protocol::crypto::{
    CryptoError, Ed25519KeyPair, SRP_USERNAME, SessionKey, SrpServer, derive_labeled, labels,
    open, seal, sha1, verify_raw,
};
use crate::protocol::pairing::tlv::{TlvDecoder, TlvEncoder, TlvType, errors};
use crate::protocol::pairing::{PairingError, fixed_key, states};
use crate::storage::StorageError;

const SALT_LEN: usize = 16;

/// Where the single pair-setup exchange currently stands
enum SetupStage {
    Idle,
    AwaitingM3 {
        owner: ConnectionId,
        srp: Box<SrpServer>,
        salt: Vec<u8>,
    },
    AwaitingM5 {
        owner: ConnectionId,
        session_key: SessionKey,
        encrypt_key: Zeroizing<[u8; 32]>,
    },
}

impl SetupStage {
    fn owner(&self) -> Option<ConnectionId> {
        match self {
            Self::Idle => None,
            Self::AwaitingM3 { owner, .. } | Self::AwaitingM5 { owner, .. } => Some(*owner),
        }
    }

    fn expected_state(&self) -> u8 {
        match self {
            Self::Idle => states::M1,
            Self::AwaitingM3 { .. } => states::M3,
            Self::AwaitingM5 { .. } => states::M5,
        }
    }
}

/// Result of one step before error accounting
enum Outcome {
    /// M2 or M4
    Continue(Vec<u8>),
    /// M6, the controller is now paired
    Finished(Vec<u8>),
    /// TLV error reply; counts as a failed attempt
    Rejected(Vec<u8>),
}

fn error_reply(state: u8, code: u8) -> Vec<u8> {
    TlvEncoder::new().add_state(state).add_error(code).build()
}

struct SetupState {
    stage: SetupStage,
    error_count: u32,
}

/// The accessory's single pair-setup slot and failure counter
pub struct PairSetupContext {
    state: Mutex<SetupState>,
    max_errors: u32,
}

impl std::fmt::Debug for PairSetupContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("PairSetupContext")
            .field("owner", &state.stage.owner())
            .field("error_count", &state.error_count)
            .field("max_errors", &self.max_errors)
            .finish()
    }
}

impl PairSetupContext {
    /// Idle context allowing `max_errors` failed attempts
    #[must_use]
    pub fn new(max_errors: u32) -> Self {
        Self {
            state: Mutex::new(SetupState {
                stage: SetupStage::Idle,
                error_count: 0,
            }),
            max_errors,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SetupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the exchange if `conn` owns it
    ///
    /// Called when a connection closes. Does not touch the failure counter.
    pub fn clean(&self, conn: ConnectionId) {
        let mut state = self.lock();
        if state.stage.owner() == Some(conn) {
            debug!("Releasing pair-setup held by {}", conn);
            state.stage = SetupStage::Idle;
        }
    }

    /// Abandon any exchange and clear the failure counter
    pub fn reset(&self) {
        let mut state = self.lock();
        state.stage = SetupStage::Idle;
        state.error_count = 0;
    }

    /// Failed attempts since the last success or reset
    #[must_use]
    pub fn error_count(&self) -> u32 {
        self.lock().error_count
    }

    /// Connection currently owning the exchange
    #[must_use]
    pub fn owner(&self) -> Option<ConnectionId> {
        self.lock().stage.owner()
    }
}

/// Handle one pair-setup request body from `conn`
///
/// Returns the TLV response body. Protocol failures the controller should
/// see are encoded as `Error` items in an `Ok` response.
///
/// # Errors
///
/// Returns error when the exchange must be aborted without a reply
/// (malformed input, a bad controller signature in M5, storage failure).
/// The exchange is reset if `conn` owned it.
pub fn pair_setup_engine(
    accessory: &Accessory,
    conn: ConnectionId,
    body: &[u8],
) -> Result<Vec<u8>, PairingError> {
    let context = accessory.pair_setup();
    let mut state = context.lock();

    if state.error_count >= context.max_errors {
        warn!(
            "Refusing pair-setup from {}: {} failed attempts",
            conn, state.error_count
        );
        state.stage = SetupStage::Idle;
        return Ok(error_reply(states::M2, errors::MAX_TRIES));
    }

    match state.step(accessory, conn, body) {
        Ok(Outcome::Continue(response)) => Ok(response),
        Ok(Outcome::Finished(response)) => {
            state.error_count = 0;
            Ok(response)
        }
        Ok(Outcome::Rejected(response)) => {
            state.error_count = state.error_count.saturating_add(1);
            Ok(response)
        }
        Err(e) => {
            state.error_count = state.error_count.saturating_add(1);
            if state.stage.owner() == Some(conn) {
                state.stage = SetupStage::Idle;
            }
            warn!("Pair-setup aborted on {}: {}", conn, e);
            Err(e)
        }
    }
}

impl SetupState {
    fn step(
        &mut self,
        accessory: &Accessory,
        conn: ConnectionId,
        body: &[u8],
    ) -> Result<Outcome, PairingError> {
        let tlv = TlvDecoder::decode(body)?;
        let requested = tlv
            .get_u8(TlvType::State)
            .unwrap_or_else(|| self.stage.expected_state());

        if let Some(owner) = self.stage.owner() {
            if owner != conn {
                info!("Pair-setup busy: {} owns it, rejecting {}", owner, conn);
                return Ok(Outcome::Rejected(error_reply(
                    requested.saturating_add(1),
                    errors::BUSY,
                )));
            }
        }

        let stage = std::mem::replace(&mut self.stage, SetupStage::Idle);
        match (stage, requested) {
            (_, states::M1) => self.start(accessory, conn),
            (SetupStage::AwaitingM3 { srp, salt, .. }, states::M3) => {
                self.verify_proof(accessory, conn, &tlv, &srp, &salt)
            }
            (
                SetupStage::AwaitingM5 {
                    session_key,
                    encrypt_key,
                    ..
                },
                states::M5,
            ) => exchange(accessory, &tlv, &session_key, &encrypt_key),
            (stage, other) => {
                warn!(
                    "Pair-setup out of order on {}: expected M{}, got M{}",
                    conn,
                    stage.expected_state(),
                    other
                );
                Ok(Outcome::Rejected(error_reply(
                    other.saturating_add(1),
                    errors::UNKNOWN,
                )))
            }
        }
    }

    /// M1 -> M2: issue salt and SRP public key
    fn start(&mut self, accessory: &Accessory, conn: ConnectionId) -> Result<Outcome, PairingError> {
        if accessory.keystore().is_pair_setup_finished() {
            info!("Pair-setup refused on {}: already paired", conn);
            return Ok(Outcome::Rejected(error_reply(states::M2, errors::UNAVAILABLE)));
        }

        let (salt, verifier) = match &accessory.config().setup_code {
            SetupCode::Password(code) => {
                let mut salt = vec![0u8; SALT_LEN];
                rand::thread_rng().fill_bytes(&mut salt);
                let verifier = SrpServer::compute_verifier(SRP_USERNAME, code.as_bytes(), &salt)?;
                (salt, verifier)
            }
            SetupCode::Verifier { salt, verifier } => (salt.clone(), verifier.clone()),
        };

        let srp = SrpServer::new(&verifier)?;
        let response = TlvEncoder::new()
            .add_state(states::M2)
            .add(TlvType::Salt, &salt)
            .add(TlvType::PublicKey, srp.public_key())
            .build();

        debug!("Pair-setup M2 sent on {}", conn);
        self.stage = SetupStage::AwaitingM3 {
            owner: conn,
            srp: Box::new(srp),
            salt,
        };
        Ok(Outcome::Continue(response))
    }

    /// M3 -> M4: check the controller's SRP proof
    fn verify_proof(
        &mut self,
        accessory: &Accessory,
        conn: ConnectionId,
        tlv: &TlvDecoder,
        srp: &SrpServer,
        salt: &[u8],
    ) -> Result<Outcome, PairingError> {
        let client_public = tlv.get_required(TlvType::PublicKey)?;
        let client_proof = tlv.get_required(TlvType::Proof)?;

        let (session_key, server_proof) =
            match srp.verify_client(SRP_USERNAME, salt, client_public, client_proof) {
                Ok(result) => result,
                Err(e @ (CryptoError::VerificationFailed | CryptoError::SrpError(_))) => {
                    warn!("Pair-setup M3 on {}: {}", conn, e);
                    return Ok(Outcome::Rejected(error_reply(
                        states::M4,
                        errors::AUTHENTICATION,
                    )));
                }
                Err(e) => return Err(e.into()),
            };

        let encrypt_key = Zeroizing::new(derive_labeled(
            labels::SETUP_ENCRYPT,
            session_key.as_bytes(),
        )?);

        let mut response = TlvEncoder::new()
            .add_state(states::M4)
            .add(TlvType::Proof, &server_proof);

        if let Some(mfi) = accessory.mfi() {
            let challenge = derive_labeled(labels::SETUP_MFI, session_key.as_bytes())?;
            let signature = mfi.sign(&sha1(&challenge))?;
            let certificate = mfi.certificate()?;
            let sub_tlv = TlvEncoder::new()
                .add(TlvType::Signature, &signature)
                .add(TlvType::Certificate, &certificate)
                .build();
            let encrypted = seal(encrypt_key.as_slice(), b"PS-Msg04", &sub_tlv)?;
            response = response.add(TlvType::EncryptedData, &encrypted);
        }

        debug!("Pair-setup M4 sent on {}", conn);
        self.stage = SetupStage::AwaitingM5 {
            owner: conn,
            session_key,
            encrypt_key,
        };
        Ok(Outcome::Continue(response.build()))
    }
}

/// M5 -> M6: store the controller and return the accessory's identity
fn exchange(
    accessory: &Accessory,
    tlv: &TlvDecoder,
    session_key: &SessionKey,
    encrypt_key: &[u8; 32],
) -> Result<Outcome, PairingError> {
    let encrypted = tlv.get_required(TlvType::EncryptedData)?;
    let plaintext = open(encrypt_key, b"PS-Msg05", encrypted)?;
    let sub_tlv = TlvDecoder::decode(&plaintext)?;

    let controller_id = sub_tlv.get_required(TlvType::Identifier)?;
    let controller_ltpk: [u8; 32] =
        fixed_key(sub_tlv.get_required(TlvType::PublicKey)?, "controller LTPK")?;
    let controller_sig = sub_tlv.get_required(TlvType::Signature)?;

    let controller_x = derive_labeled(labels::SETUP_CONTROLLER_SIGN, session_key.as_bytes())?;
    let signed = [&controller_x[..], controller_id, &controller_ltpk[..]].concat();
    verify_raw(&controller_ltpk, &signed, controller_sig)
        .map_err(|_| PairingError::SignatureVerificationFailed)?;

    let mut keystore = accessory.keystore();
    let keypair = keystore
        .accessory_keypair()?
        .unwrap_or_else(Ed25519KeyPair::generate);

    let accessory_x = derive_labeled(labels::SETUP_ACCESSORY_SIGN, session_key.as_bytes())?;
    let accessory_ltpk = keypair.public_key();
    let signed = [
        &accessory_x[..],
        accessory.identifier(),
        &accessory_ltpk.as_bytes()[..],
    ]
    .concat();
    let signature = keypair.sign(&signed).to_bytes();

    let sub_tlv = TlvEncoder::new()
        .add(TlvType::Identifier, accessory.identifier())
        .add(TlvType::PublicKey, accessory_ltpk.as_bytes())
        .add(TlvType::Signature, &signature)
        .build();
    let encrypted = seal(encrypt_key, b"PS-Msg06", &sub_tlv)?;

    match keystore.complete_pair_setup(controller_id, &controller_ltpk, &keypair) {
        Ok(()) => {}
        Err(StorageError::NoSpace) => {
            warn!("Pair-setup M5: pairing list full");
            return Ok(Outcome::Rejected(error_reply(states::M6, errors::MAX_PEERS)));
        }
        Err(e) => return Err(e.into()),
    }
    info!(
        "Pair-setup complete for controller {}",
        String::from_utf8_lossy(controller_id)
    );

    Ok(Outcome::Finished(
        TlvEncoder::new()
            .add_state(states::M6)
            .add(TlvType::EncryptedData, &encrypted)
            .build(),
    ))
}
