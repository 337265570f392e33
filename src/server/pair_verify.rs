//! Pair-verify (M1 to M4)
//!
//! A paired controller proves possession of its long-term key over an
//! ephemeral X25519 exchange. On success both sides derive the directional
//! [`SessionKeys`] for the encrypted control session. State is
//! per-connection and lives in [`PairVerifyInfo`].

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::accessory::Accessory;
use super::session::SessionKeys;
use crate::protocol::crypto::{
    X25519KeyPair, X25519PublicKey, derive_labeled, labels, open, seal, verify_raw,
};
use crate::protocol::pairing::tlv::{TlvDecoder, TlvEncoder, TlvType};
use crate::protocol::pairing::{PairingError, fixed_key, states};
use crate::storage::StorageError;

enum VerifyStage {
    Idle,
    AwaitingM3 {
        accessory_public: [u8; 32],
        controller_public: [u8; 32],
        shared_secret: Zeroizing<[u8; 32]>,
        encrypt_key: Zeroizing<[u8; 32]>,
    },
    Verified,
}

/// Per-connection pair-verify state
pub struct PairVerifyInfo {
    stage: VerifyStage,
}

impl std::fmt::Debug for PairVerifyInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self.stage {
            VerifyStage::Idle => "Idle",
            VerifyStage::AwaitingM3 { .. } => "AwaitingM3",
            VerifyStage::Verified => "Verified",
        };
        f.debug_struct("PairVerifyInfo").field("stage", &stage).finish()
    }
}

impl Default for PairVerifyInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl PairVerifyInfo {
    /// Fresh state for a new connection
    #[must_use]
    pub fn new() -> Self {
        Self {
            stage: VerifyStage::Idle,
        }
    }

    /// Drop any ephemeral keys and return to idle
    pub fn clean(&mut self) {
        self.stage = VerifyStage::Idle;
    }

    /// Whether M4 was sent successfully on this connection
    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self.stage, VerifyStage::Verified)
    }
}

/// Outcome of one pair-verify request
#[derive(Debug)]
pub enum VerifyStep {
    /// Send this TLV body and keep waiting
    Reply(Vec<u8>),
    /// Send `response` in plaintext, then switch the connection to `keys`
    Verified {
        response: Vec<u8>,
        keys: SessionKeys,
        controller_id: Vec<u8>,
    },
}

/// Handle one pair-verify request body
///
/// # Errors
///
/// Returns error when the exchange must be aborted without a reply: no
/// accessory key yet, a malformed message, an unknown controller, or a bad
/// signature. `info` is reset in that case.
pub fn pair_verify_engine(
    accessory: &Accessory,
    info: &mut PairVerifyInfo,
    body: &[u8],
) -> Result<VerifyStep, PairingError> {
    let result = step(accessory, info, body);
    if let Err(e) = &result {
        warn!("Pair-verify aborted: {}", e);
        info.clean();
    }
    result
}

fn step(
    accessory: &Accessory,
    info: &mut PairVerifyInfo,
    body: &[u8],
) -> Result<VerifyStep, PairingError> {
    let tlv = TlvDecoder::decode(body)?;
    match tlv.get_state()? {
        states::M1 => start(accessory, info, &tlv),
        states::M3 => {
            let stage = std::mem::replace(&mut info.stage, VerifyStage::Idle);
            let VerifyStage::AwaitingM3 {
                accessory_public,
                controller_public,
                shared_secret,
                encrypt_key,
            } = stage
            else {
                return Err(PairingError::UnexpectedState {
                    expected: states::M1,
                    actual: states::M3,
                });
            };
            finish(
                accessory,
                info,
                &tlv,
                &accessory_public,
                &controller_public,
                &shared_secret,
                &encrypt_key,
            )
        }
        other => Err(PairingError::UnexpectedState {
            expected: states::M1,
            actual: other,
        }),
    }
}

/// M1 -> M2: ephemeral key exchange and accessory proof
fn start(
    accessory: &Accessory,
    info: &mut PairVerifyInfo,
    tlv: &TlvDecoder,
) -> Result<VerifyStep, PairingError> {
    let controller_public: [u8; 32] =
        fixed_key(tlv.get_required(TlvType::PublicKey)?, "controller curve key")?;

    let ltsk = accessory
        .keystore()
        .accessory_keypair()?
        .ok_or(PairingError::NotPaired)?;

    let ephemeral = X25519KeyPair::generate();
    let shared = ephemeral.diffie_hellman(&X25519PublicKey::from_bytes(&controller_public)?);
    if !shared.is_contributory() {
        return Err(PairingError::AuthenticationFailed(
            "non-contributory controller key".to_string(),
        ));
    }
    let shared_secret = Zeroizing::new(*shared.as_bytes());
    let accessory_public = *ephemeral.public_key().as_bytes();

    let signed = [
        &accessory_public[..],
        accessory.identifier(),
        &controller_public[..],
    ]
    .concat();
    let signature = ltsk.sign(&signed).to_bytes();

    let encrypt_key = Zeroizing::new(derive_labeled(labels::VERIFY_ENCRYPT, &shared_secret[..])?);
    let sub_tlv = TlvEncoder::new()
        .add(TlvType::Identifier, accessory.identifier())
        .add(TlvType::Signature, &signature)
        .build();
    let encrypted = seal(&encrypt_key[..], b"PV-Msg02", &sub_tlv)?;

    info.stage = VerifyStage::AwaitingM3 {
        accessory_public,
        controller_public,
        shared_secret,
        encrypt_key,
    };
    debug!("Pair-verify M2 sent");

    Ok(VerifyStep::Reply(
        TlvEncoder::new()
            .add_state(states::M2)
            .add(TlvType::PublicKey, &accessory_public)
            .add(TlvType::EncryptedData, &encrypted)
            .build(),
    ))
}

/// M3 -> M4: check the controller's proof and derive session keys
fn finish(
    accessory: &Accessory,
    info: &mut PairVerifyInfo,
    tlv: &TlvDecoder,
    accessory_public: &[u8; 32],
    controller_public: &[u8; 32],
    shared_secret: &[u8; 32],
    encrypt_key: &[u8; 32],
) -> Result<VerifyStep, PairingError> {
    let encrypted = tlv.get_required(TlvType::EncryptedData)?;
    let plaintext = open(encrypt_key, b"PV-Msg03", encrypted)?;
    let sub_tlv = TlvDecoder::decode(&plaintext)?;

    let controller_id = sub_tlv.get_required(TlvType::Identifier)?;
    let signature = sub_tlv.get_required(TlvType::Signature)?;

    let controller_ltpk = match accessory.keystore().pairings().find_public_key(controller_id) {
        Ok(key) => key,
        Err(StorageError::NotFound) => {
            return Err(PairingError::UnknownController(
                String::from_utf8_lossy(controller_id).into_owned(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let signed = [&controller_public[..], controller_id, &accessory_public[..]].concat();
    verify_raw(&controller_ltpk, &signed, signature)
        .map_err(|_| PairingError::SignatureVerificationFailed)?;

    let keys = SessionKeys {
        read_key: derive_labeled(labels::CONTROL_READ, shared_secret)?,
        write_key: derive_labeled(labels::CONTROL_WRITE, shared_secret)?,
    };
    info.stage = VerifyStage::Verified;
    info!(
        "Pair-verify complete for controller {}",
        String::from_utf8_lossy(controller_id)
    );

    Ok(VerifyStep::Verified {
        response: TlvEncoder::new().add_state(states::M4).build(),
        keys,
        controller_id: controller_id.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::accessory::ConnectionId;
    use crate::server::config::AccessoryConfig;
    use crate::server::pair_setup::pair_setup_engine;
    use crate::testing::TestController;

    const CODE: &str = "454-45-454";

    fn paired() -> (Accessory, TestController, [u8; 32]) {
        let accessory = Accessory::in_memory(
            AccessoryConfig::new("Test")
                .with_device_id("AA:BB:CC:00:11:22")
                .with_password(CODE),
        );
        let mut controller = TestController::new("controller");
        let info = controller
            .pair_setup(|body| pair_setup_engine(&accessory, ConnectionId(1), body), CODE)
            .unwrap();
        (accessory, controller, info.public_key)
    }

    #[test]
    fn test_verify_derives_matching_keys() {
        let (accessory, mut controller, accessory_ltpk) = paired();
        let mut info = PairVerifyInfo::new();

        let VerifyStep::Reply(m2) =
            pair_verify_engine(&accessory, &mut info, &controller.pair_verify_m1()).unwrap()
        else {
            panic!("expected M2");
        };
        let m3 = controller.pair_verify_m3(&m2, &accessory_ltpk).unwrap();
        let VerifyStep::Verified {
            response,
            keys,
            controller_id,
        } = pair_verify_engine(&accessory, &mut info, &m3).unwrap()
        else {
            panic!("expected M4");
        };

        let controller_keys = controller.pair_verify_finish(&response).unwrap();
        assert_eq!(keys, controller_keys);
        assert_ne!(keys.read_key, keys.write_key);
        assert_eq!(controller_id, b"controller");
        assert!(info.is_verified());
    }

    #[test]
    fn test_unknown_controller_aborts() {
        let (accessory, _, accessory_ltpk) = paired();
        let mut stranger = TestController::new("stranger");
        let mut info = PairVerifyInfo::new();

        let VerifyStep::Reply(m2) =
            pair_verify_engine(&accessory, &mut info, &stranger.pair_verify_m1()).unwrap()
        else {
            panic!("expected M2");
        };
        let m3 = stranger.pair_verify_m3(&m2, &accessory_ltpk).unwrap();

        assert!(matches!(
            pair_verify_engine(&accessory, &mut info, &m3),
            Err(PairingError::UnknownController(_))
        ));
        assert!(!info.is_verified());
    }

    #[test]
    fn test_impostor_with_known_id_aborts() {
        let (accessory, _, accessory_ltpk) = paired();
        // Same identifier, different long-term key
        let mut impostor = TestController::new("controller");
        let mut info = PairVerifyInfo::new();

        let VerifyStep::Reply(m2) =
            pair_verify_engine(&accessory, &mut info, &impostor.pair_verify_m1()).unwrap()
        else {
            panic!("expected M2");
        };
        let m3 = impostor.pair_verify_m3(&m2, &accessory_ltpk).unwrap();
        assert!(matches!(
            pair_verify_engine(&accessory, &mut info, &m3),
            Err(PairingError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_unpaired_accessory_aborts() {
        let accessory = Accessory::in_memory(AccessoryConfig::new("Fresh"));
        let mut controller = TestController::new("controller");
        let mut info = PairVerifyInfo::new();

        assert!(matches!(
            pair_verify_engine(&accessory, &mut info, &controller.pair_verify_m1()),
            Err(PairingError::NotPaired)
        ));
    }

    #[test]
    fn test_m3_without_m1_aborts() {
        let (accessory, _, _) = paired();
        let mut info = PairVerifyInfo::new();
        let m3 = TlvEncoder::new()
            .add_state(states::M3)
            .add(TlvType::EncryptedData, &[0; 32])
            .build();

        assert!(matches!(
            pair_verify_engine(&accessory, &mut info, &m3),
            Err(PairingError::UnexpectedState { .. })
        ));
    }

    #[test]
    fn test_low_order_point_aborts() {
        let (accessory, _, _) = paired();
        let mut info = PairVerifyInfo::new();
        let m1 = TlvEncoder::new()
            .add_state(states::M1)
            .add(TlvType::PublicKey, &[0; 32])
            .build();

        assert!(pair_verify_engine(&accessory, &mut info, &m1).is_err());
    }

    #[test]
    fn test_accessory_signature_checked_by_controller() {
        let (accessory, mut controller, _) = paired();
        let mut info = PairVerifyInfo::new();

        let VerifyStep::Reply(m2) =
            pair_verify_engine(&accessory, &mut info, &controller.pair_verify_m1()).unwrap()
        else {
            panic!("expected M2");
        };
        let wrong_ltpk = [9u8; 32];
        assert!(controller.pair_verify_m3(&m2, &wrong_ltpk).is_err());
    }
}
