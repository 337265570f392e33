use std::sync::Arc;

use super::connection::paths;
use super::*;
use crate::error::HapError;
use crate::protocol::crypto::{SRP_USERNAME, SrpServer, sha1, verify_raw};
use crate::protocol::pairing::tlv::{TlvDecoder, errors};
use crate::testing::{LoopbackClient, SoftwareMfi, TestController, expect_ok};

const CODE: &str = "454-45-454";

fn accessory() -> Arc<Accessory> {
    Arc::new(Accessory::in_memory(
        AccessoryConfig::new("Test")
            .with_device_id("01:23:45:67:89:AB")
            .with_password(CODE),
    ))
}

fn paired(accessory: &Arc<Accessory>, controller: &mut TestController) -> [u8; 32] {
    let mut client = LoopbackClient::new(accessory.clone());
    controller
        .pair_setup(|body| client.post_tlv(paths::PAIR_SETUP, body), CODE)
        .unwrap()
        .public_key
}

fn verified(accessory: &Arc<Accessory>, controller: &mut TestController, ltpk: &[u8; 32]) -> LoopbackClient {
    let mut client = LoopbackClient::new(accessory.clone());
    let keys = controller
        .pair_verify(|body| client.post_tlv(paths::PAIR_VERIFY, body), ltpk)
        .unwrap();
    client.enable_encryption(&keys);
    client
}

#[test]
fn test_setup_verify_then_list_over_encrypted_session() {
    let accessory = accessory();
    let mut controller = TestController::new("admin-controller");
    let ltpk = paired(&accessory, &mut controller);

    let mut client = verified(&accessory, &mut controller, &ltpk);
    assert!(client.connection().session().is_established());
    assert_eq!(
        client.connection().session().controller_id(),
        Some(&b"admin-controller"[..])
    );

    let body = client
        .post_tlv(paths::PAIRINGS, &TestController::list_pairings_request())
        .unwrap();
    let records = TestController::parse_pairing_list(&body).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identifier, b"admin-controller");
    assert_eq!(records[0].public_key, controller.public_key());
    assert!(records[0].is_admin());
}

#[test]
fn test_management_requires_verified_session() {
    let accessory = accessory();
    let mut client = LoopbackClient::new(accessory);
    let response = client
        .post(paths::PAIRINGS, TestController::list_pairings_request())
        .unwrap();
    assert_eq!(response.status, StatusCode::CONNECTION_AUTHORIZATION_REQUIRED);

    let response = client
        .post(paths::PAIR_ADD_REMOVE_LIST, TestController::list_pairings_request())
        .unwrap();
    assert_eq!(response.status.0, 470);
}

#[test]
fn test_pairing_response_content_type() {
    let mut client = LoopbackClient::new(accessory());
    let mut controller = TestController::new("content-type");

    let response = client
        .post(paths::PAIR_SETUP, controller.pair_setup_m1())
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.headers.get("content-type"),
        Some("application/x-tlv8")
    );

    let raw = client
        .send_raw(&HttpRequest::pairing_post(paths::PAIR_SETUP, controller.pair_setup_m1()).encode())
        .unwrap();
    let text = String::from_utf8_lossy(&raw);
    assert!(text.contains("Content-Type: application/x-tlv8\r\n"));
}

#[test]
fn test_unknown_path_and_method() {
    let mut client = LoopbackClient::new(accessory());
    let response = client.post("/accessories", Vec::new()).unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let reply = client
        .send_raw(b"GET /pair-setup HTTP/1.1\r\nContent-Length: 0\r\n\r\n")
        .unwrap();
    assert!(reply.starts_with(b"HTTP/1.1 405 "));
}

#[test]
fn test_disconnect_releases_pair_setup() {
    let accessory = accessory();
    let mut first = TestController::new("first");
    {
        let mut client = LoopbackClient::new(accessory.clone());
        client
            .post_tlv(paths::PAIR_SETUP, &first.pair_setup_m1())
            .unwrap();
        assert!(accessory.pair_setup().owner().is_some());
    }
    assert!(accessory.pair_setup().owner().is_none());

    let mut second = TestController::new("second");
    let ltpk = paired(&accessory, &mut second);
    assert_eq!(ltpk.len(), 32);
}

#[test]
fn test_busy_while_other_connection_pairs() {
    let accessory = accessory();
    let mut owner = LoopbackClient::new(accessory.clone());
    let mut intruder = LoopbackClient::new(accessory.clone());
    let mut first = TestController::new("first");
    let mut second = TestController::new("second");

    owner.post_tlv(paths::PAIR_SETUP, &first.pair_setup_m1()).unwrap();
    let body = intruder
        .post_tlv(paths::PAIR_SETUP, &second.pair_setup_m1())
        .unwrap();
    assert_eq!(
        TlvDecoder::decode(&body).unwrap().get_error(),
        Some(errors::BUSY)
    );
}

#[test]
fn test_abort_closes_connection() {
    let accessory = accessory();
    let mut controller = TestController::new("admin");
    let ltpk = paired(&accessory, &mut controller);

    let mut stranger = TestController::new("stranger");
    let mut client = LoopbackClient::new(accessory);
    let result = stranger.pair_verify(|body| client.post_tlv(paths::PAIR_VERIFY, body), &ltpk);
    assert!(matches!(
        result,
        Err(HapError::Pairing(crate::PairingError::UnknownController(_)))
    ));
    assert!(!client.connection().session().is_established());
}

#[test]
fn test_tampered_encrypted_frame_drops_connection() {
    let accessory = accessory();
    let mut controller = TestController::new("admin");
    let ltpk = paired(&accessory, &mut controller);
    let mut client = LoopbackClient::new(accessory);
    let keys = controller
        .pair_verify(|body| client.post_tlv(paths::PAIR_VERIFY, body), &ltpk)
        .unwrap();

    let mut channel = SecureChannel::controller(&keys);
    let mut frame = channel
        .encrypt(&HttpRequest::pairing_post(paths::PAIRINGS, Vec::new()).encode())
        .unwrap();
    frame[3] ^= 0x80;
    assert!(matches!(
        client.send_raw(&frame),
        Err(HapError::Session(SessionError::AuthenticationFailed))
    ));
}

#[test]
fn test_verifier_configured_accessory() {
    let salt = vec![0x5Au8; 16];
    let verifier = SrpServer::compute_verifier(SRP_USERNAME, CODE.as_bytes(), &salt).unwrap();
    let accessory = Arc::new(Accessory::in_memory(
        AccessoryConfig::new("Test").with_verifier(salt.clone(), verifier),
    ));

    let mut client = LoopbackClient::new(accessory.clone());
    let mut controller = TestController::new("controller");
    let m2 = client
        .post_tlv(paths::PAIR_SETUP, &controller.pair_setup_m1())
        .unwrap();
    assert_eq!(
        TlvDecoder::decode(&m2).unwrap().get(crate::protocol::pairing::TlvType::Salt),
        Some(salt.as_slice())
    );

    let m3 = controller.pair_setup_m3(&m2, CODE).unwrap();
    let m4 = client.post_tlv(paths::PAIR_SETUP, &m3).unwrap();
    let m5 = controller.pair_setup_m5(&m4).unwrap();
    let m6 = client.post_tlv(paths::PAIR_SETUP, &m5).unwrap();
    controller.pair_setup_finish(&m6).unwrap();
    assert!(accessory.is_paired());
}

#[test]
fn test_mfi_proof_in_m4() {
    let mfi = Arc::new(SoftwareMfi::new(b"certificate".to_vec()));
    let mfi_key = mfi.public_key();
    let accessory = Arc::new(
        Accessory::in_memory(AccessoryConfig::new("Test").with_password(CODE)).with_mfi(mfi),
    );

    let mut client = LoopbackClient::new(accessory);
    let mut controller = TestController::new("controller");
    controller
        .pair_setup(|body| client.post_tlv(paths::PAIR_SETUP, body), CODE)
        .unwrap();

    let proof = controller.mfi_proof().unwrap();
    assert_eq!(proof.certificate, b"certificate");
    verify_raw(&mfi_key, &sha1(&proof.challenge), &proof.signature).unwrap();
}

#[test]
fn test_reset_pairings_reopens_setup() {
    let accessory = accessory();
    let mut controller = TestController::new("admin");
    paired(&accessory, &mut controller);
    assert!(accessory.is_paired());

    accessory.reset_pairings().unwrap();
    assert!(!accessory.is_paired());

    let mut again = TestController::new("admin-2");
    paired(&accessory, &mut again);
    assert!(accessory.keystore().pairings().find_is_admin(b"admin-2"));
}

#[test]
fn test_non_ok_status_is_reported() {
    let mut client = LoopbackClient::new(accessory());
    let response = client.post("/nowhere", Vec::new()).unwrap();
    assert!(matches!(
        expect_ok(response),
        Err(HapError::UnexpectedStatus { status: 404 })
    ));
}
