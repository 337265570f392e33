//! Accessory-side pairing server
//!
//! The engines ([`pair_setup_engine`], [`pair_verify_engine`],
//! [`pair_management_engine`]) are plain functions over TLV bodies.
//! [`Connection`] routes HTTP requests to them and owns the per-connection
//! state; [`AccessoryServer`] runs connections on a tokio TCP listener.

pub mod accessory;
pub mod config;
pub mod connection;
pub mod http;
#[cfg(feature = "tokio-runtime")]
pub mod listener;
pub mod pair_management;
pub mod pair_setup;
pub mod pair_verify;
pub mod session;

pub use accessory::{Accessory, ConnectionId, MfiAuthenticator};
pub use config::{AccessoryConfig, SetupCode};
pub use connection::Connection;
pub use http::{HttpRequest, HttpResponse, StatusCode};
#[cfg(feature = "tokio-runtime")]
pub use listener::AccessoryServer;
pub use pair_management::pair_management_engine;
pub use pair_setup::{PairSetupContext, pair_setup_engine};
pub use pair_verify::{PairVerifyInfo, VerifyStep, pair_verify_engine};
pub use session::{SecureChannel, Session, SessionError, SessionKeys};

#[cfg(test)]
mod tests;
