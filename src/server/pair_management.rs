//! Add, remove and list pairings over a verified session
//!
//! Only admin controllers may manage pairings. Removing the last admin
//! wipes the list and re-opens pair-setup.

use tracing::{info, warn};

use super::accessory::Accessory;
use super::session::Session;
use crate::protocol::pairing::tlv::{TlvDecoder, TlvEncoder, TlvType, errors, methods, permissions};
use crate::protocol::pairing::{PairingError, fixed_key, states};
use crate::storage::StorageError;

fn error_reply(code: u8) -> Vec<u8> {
    TlvEncoder::new().add_state(states::M2).add_error(code).build()
}

fn ok_reply() -> Vec<u8> {
    TlvEncoder::new().add_state(states::M2).build()
}

/// Handle one pairing management request on an established session
///
/// # Errors
///
/// Returns `PairingError::SessionNotEstablished` if pair-verify has not
/// completed, a TLV error for an undecodable body, or a storage error.
pub fn pair_management_engine(
    accessory: &Accessory,
    session: &Session,
    body: &[u8],
) -> Result<Vec<u8>, PairingError> {
    let requester = session
        .controller_id()
        .filter(|_| session.is_established())
        .ok_or(PairingError::SessionNotEstablished)?;

    let tlv = TlvDecoder::decode(body)?;
    if tlv.get_u8(TlvType::State) != Some(states::M1) {
        warn!("Pairing management request with bad state");
        return Ok(error_reply(errors::UNKNOWN));
    }

    if !accessory.keystore().pairings().find_is_admin(requester) {
        warn!(
            "Pairing management refused: {} is not an admin",
            String::from_utf8_lossy(requester)
        );
        return Ok(error_reply(errors::UNKNOWN));
    }

    match tlv.get_u8(TlvType::Method) {
        Some(methods::ADD_PAIRING) => add_pairing(accessory, &tlv),
        Some(methods::REMOVE_PAIRING) => remove_pairing(accessory, &tlv),
        Some(methods::LIST_PAIRINGS) => list_pairings(accessory),
        other => {
            warn!("Unsupported pairing management method {:?}", other);
            Ok(error_reply(errors::UNKNOWN))
        }
    }
}

fn add_pairing(accessory: &Accessory, tlv: &TlvDecoder) -> Result<Vec<u8>, PairingError> {
    let identifier = tlv.get_required(TlvType::Identifier)?;
    let public_key: [u8; 32] = fixed_key(tlv.get_required(TlvType::PublicKey)?, "controller LTPK")?;
    let is_admin = tlv
        .get_u8(TlvType::Permissions)
        .is_some_and(|p| p & permissions::ADMIN != 0);

    let mut keystore = accessory.keystore();
    match keystore.pairings().find_public_key(identifier) {
        Ok(existing) if existing != public_key => {
            warn!(
                "Add pairing: {} already paired with a different key",
                String::from_utf8_lossy(identifier)
            );
            return Ok(error_reply(errors::UNKNOWN));
        }
        Ok(_) | Err(StorageError::NotFound) => {}
        Err(e) => return Err(e.into()),
    }

    match keystore
        .pairings()
        .insert_or_update(identifier, &public_key, is_admin)
    {
        Ok(()) => {
            info!(
                "Added pairing {} (admin: {})",
                String::from_utf8_lossy(identifier),
                is_admin
            );
            Ok(ok_reply())
        }
        Err(StorageError::NoSpace) => Ok(error_reply(errors::MAX_PEERS)),
        Err(StorageError::InvalidIdentifier(_)) => Ok(error_reply(errors::UNKNOWN)),
        Err(e) => Err(e.into()),
    }
}

fn remove_pairing(accessory: &Accessory, tlv: &TlvDecoder) -> Result<Vec<u8>, PairingError> {
    let identifier = tlv.get_required(TlvType::Identifier)?;

    let mut keystore = accessory.keystore();
    match keystore.pairings().remove(identifier) {
        Ok(()) => {}
        Err(StorageError::NotFound) => return Ok(error_reply(errors::UNKNOWN)),
        Err(e) => return Err(e.into()),
    }
    info!("Removed pairing {}", String::from_utf8_lossy(identifier));

    if !keystore.pairings().has_admin()? {
        info!("Last admin removed");
        keystore.reset_pairings()?;
    }
    Ok(ok_reply())
}

fn list_pairings(accessory: &Accessory) -> Result<Vec<u8>, PairingError> {
    let records = accessory.keystore().pairings().list()?;

    let mut encoder = TlvEncoder::new().add_state(states::M2);
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            encoder = encoder.add_separator();
        }
        let permission = if record.is_admin() {
            permissions::ADMIN
        } else {
            permissions::USER
        };
        encoder = encoder
            .add(TlvType::Identifier, &record.identifier)
            .add(TlvType::PublicKey, &record.public_key)
            .add_byte(TlvType::Permissions, permission);
    }
    Ok(encoder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::AccessoryConfig;
    use crate::server::session::SessionKeys;
    use crate::testing::TestController;

    fn setup() -> (Accessory, Session) {
        let accessory = Accessory::in_memory(AccessoryConfig::new("Test"));
        {
            let mut keystore = accessory.keystore();
            keystore.pairings().insert_or_update(b"admin", &[1; 32], true).unwrap();
            keystore.pairings().insert_or_update(b"user", &[2; 32], false).unwrap();
        }
        (accessory, session_for(b"admin"))
    }

    fn session_for(controller: &[u8]) -> Session {
        let mut session = Session::new();
        session.establish(
            &SessionKeys {
                read_key: [0; 32],
                write_key: [1; 32],
            },
            controller.to_vec(),
        );
        session
    }

    fn error_of(body: &[u8]) -> Option<u8> {
        TlvDecoder::decode(body).unwrap().get_error()
    }

    #[test]
    fn test_requires_session() {
        let (accessory, _) = setup();
        let request = TestController::list_pairings_request();
        assert!(matches!(
            pair_management_engine(&accessory, &Session::new(), &request),
            Err(PairingError::SessionNotEstablished)
        ));
    }

    #[test]
    fn test_non_admin_refused() {
        let (accessory, _) = setup();
        let request = TestController::add_pairing_request(b"new", &[3; 32], false);
        let response = pair_management_engine(&accessory, &session_for(b"user"), &request).unwrap();
        assert_eq!(error_of(&response), Some(errors::UNKNOWN));
        assert!(accessory.keystore().pairings().find_public_key(b"new").is_err());
    }

    #[test]
    fn test_add_and_list() {
        let (accessory, session) = setup();
        let request = TestController::add_pairing_request(b"guest", &[3; 32], true);
        let response = pair_management_engine(&accessory, &session, &request).unwrap();
        assert_eq!(error_of(&response), None);

        let response =
            pair_management_engine(&accessory, &session, &TestController::list_pairings_request())
                .unwrap();
        let listed = TestController::parse_pairing_list(&response).unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.identifier.clone()).collect();
        assert_eq!(ids, vec![b"admin".to_vec(), b"user".to_vec(), b"guest".to_vec()]);
        assert!(listed[2].is_admin());
        assert!(!listed[1].is_admin());
        assert_eq!(listed[2].public_key, [3; 32]);
    }

    #[test]
    fn test_add_same_key_is_idempotent() {
        let (accessory, session) = setup();
        let request = TestController::add_pairing_request(b"user", &[2; 32], true);
        let response = pair_management_engine(&accessory, &session, &request).unwrap();
        assert_eq!(error_of(&response), None);
        assert!(accessory.keystore().pairings().find_is_admin(b"user"));
        assert_eq!(accessory.keystore().pairings().list().unwrap().len(), 2);
    }

    #[test]
    fn test_add_conflicting_key_refused() {
        let (accessory, session) = setup();
        let request = TestController::add_pairing_request(b"user", &[9; 32], false);
        let response = pair_management_engine(&accessory, &session, &request).unwrap();
        assert_eq!(error_of(&response), Some(errors::UNKNOWN));
        assert_eq!(
            accessory.keystore().pairings().find_public_key(b"user").unwrap(),
            [2; 32]
        );
    }

    #[test]
    fn test_add_when_full() {
        let accessory = Accessory::in_memory(AccessoryConfig::new("Test").with_pairing_region_size(100));
        accessory
            .keystore()
            .pairings()
            .insert_or_update(b"admin", &[1; 32], true)
            .unwrap();
        let request = TestController::add_pairing_request(b"extra", &[3; 32], false);
        let response = pair_management_engine(&accessory, &session_for(b"admin"), &request).unwrap();
        assert_eq!(error_of(&response), Some(errors::MAX_PEERS));
    }

    #[test]
    fn test_remove_unknown_is_error() {
        let (accessory, session) = setup();
        let request = TestController::remove_pairing_request(b"nobody");
        let response = pair_management_engine(&accessory, &session, &request).unwrap();
        assert_eq!(error_of(&response), Some(errors::UNKNOWN));
    }

    #[test]
    fn test_remove_last_admin_resets() {
        let (accessory, session) = setup();
        accessory
            .keystore()
            .finish_pair_setup(&crate::protocol::crypto::Ed25519KeyPair::generate())
            .unwrap();

        let request = TestController::remove_pairing_request(b"admin");
        let response = pair_management_engine(&accessory, &session, &request).unwrap();
        assert_eq!(error_of(&response), None);

        let mut keystore = accessory.keystore();
        assert!(keystore.pairings().list().unwrap().is_empty());
        assert!(!keystore.is_pair_setup_finished());
    }

    #[test]
    fn test_remove_user_keeps_admin() {
        let (accessory, session) = setup();
        let request = TestController::remove_pairing_request(b"user");
        pair_management_engine(&accessory, &session, &request).unwrap();

        let records = accessory.keystore().pairings().list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identifier, b"admin");
    }

    #[test]
    fn test_unknown_method() {
        let (accessory, session) = setup();
        let request = TlvEncoder::new().add_state(states::M1).add_method(0x42).build();
        let response = pair_management_engine(&accessory, &session, &request).unwrap();
        assert_eq!(error_of(&response), Some(errors::UNKNOWN));
    }
}
