//! One controller connection, independent of the transport
//!
//! Inbound bytes go in through [`Connection::receive`], outbound bytes come
//! back out. The connection parses HTTP, routes to the pairing engines and
//! switches to encrypted framing once pair-verify succeeds. Dropping it
//! releases any pair-setup it owns.

use std::sync::Arc;

use tracing::{debug, warn};

use super::accessory::{Accessory, ConnectionId};
use super::http::{HttpRequest, HttpResponse, HttpServerCodec, Method, StatusCode};
use super::pair_management::pair_management_engine;
use super::pair_setup::pair_setup_engine;
use super::pair_verify::{PairVerifyInfo, VerifyStep, pair_verify_engine};
use super::session::{Session, SessionKeys};
use crate::error::HapError;

/// Request paths served by the accessory
pub mod paths {
    pub const PAIR_SETUP: &str = "/pair-setup";
    pub const PAIR_VERIFY: &str = "/pair-verify";
    pub const PAIRINGS: &str = "/pairings";
    pub const PAIR_ADD_REMOVE_LIST: &str = "/pair-add-remove-list";
}

/// Per-connection protocol state
pub struct Connection {
    id: ConnectionId,
    accessory: Arc<Accessory>,
    codec: HttpServerCodec,
    session: Session,
    verify: PairVerifyInfo,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("session", &self.session)
            .field("verify", &self.verify)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Start a plaintext connection
    #[must_use]
    pub fn new(accessory: Arc<Accessory>) -> Self {
        let id = accessory.next_connection_id();
        debug!("Connection {} opened", id);
        Self {
            id,
            accessory,
            codec: HttpServerCodec::new(),
            session: Session::new(),
            verify: PairVerifyInfo::new(),
        }
    }

    /// Connection identifier
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Security state
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Process inbound bytes, returning the bytes to send back
    ///
    /// # Errors
    ///
    /// Any error means the connection must be closed without sending
    /// anything further.
    pub fn receive(&mut self, data: &[u8]) -> Result<Vec<u8>, HapError> {
        if self.session.is_established() {
            let plaintext = self.session.decrypt(data)?;
            self.codec.feed(&plaintext);
        } else {
            self.codec.feed(data);
        }

        let mut output = Vec::new();
        while let Some(request) = self.codec.decode()? {
            let (response, verified) = self.dispatch(&request)?;
            let bytes = response.encode();
            if self.session.is_established() {
                output.extend_from_slice(&self.session.encrypt(&bytes)?);
            } else {
                output.extend_from_slice(&bytes);
            }

            // Pair-verify M4 is the last plaintext message
            if let Some((keys, controller_id)) = verified {
                self.session.establish(&keys, controller_id);
            }
        }
        Ok(output)
    }

    fn dispatch(
        &mut self,
        request: &HttpRequest,
    ) -> Result<(HttpResponse, Option<(SessionKeys, Vec<u8>)>), HapError> {
        debug!(
            "{} {} {} ({} bytes)",
            self.id,
            request.method.as_str(),
            request.path,
            request.body.len()
        );

        let path = request.path.as_str();
        if !matches!(
            path,
            paths::PAIR_SETUP | paths::PAIR_VERIFY | paths::PAIRINGS | paths::PAIR_ADD_REMOVE_LIST
        ) {
            return Ok((HttpResponse::new(StatusCode::NOT_FOUND), None));
        }
        if request.method != Method::Post {
            return Ok((HttpResponse::new(StatusCode::METHOD_NOT_ALLOWED), None));
        }

        match path {
            paths::PAIR_SETUP => {
                let body = pair_setup_engine(&self.accessory, self.id, &request.body)?;
                Ok((HttpResponse::pairing(body), None))
            }
            paths::PAIR_VERIFY => {
                if self.session.is_established() {
                    warn!("{} attempted pair-verify on a verified session", self.id);
                    return Ok((HttpResponse::new(StatusCode::BAD_REQUEST), None));
                }
                match pair_verify_engine(&self.accessory, &mut self.verify, &request.body)? {
                    VerifyStep::Reply(body) => Ok((HttpResponse::pairing(body), None)),
                    VerifyStep::Verified {
                        response,
                        keys,
                        controller_id,
                    } => Ok((HttpResponse::pairing(response), Some((keys, controller_id)))),
                }
            }
            _ => {
                if !self.session.is_established() {
                    return Ok((
                        HttpResponse::new(StatusCode::CONNECTION_AUTHORIZATION_REQUIRED),
                        None,
                    ));
                }
                let body = pair_management_engine(&self.accessory, &self.session, &request.body)?;
                Ok((HttpResponse::pairing(body), None))
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.accessory.pair_setup().clean(self.id);
        self.verify.clean();
        debug!("Connection {} closed", self.id);
    }
}
