//! # mico-hap
//!
//! `HomeKit` accessory pairing in pure Rust.
//!
//! ## Features
//!
//! - TLV8 codec
//! - Pair-setup with SRP-6a (optional MFi authentication)
//! - Pair-verify with X25519 and Ed25519
//! - Pairing management (add, remove, list) for admin controllers
//! - ChaCha20-Poly1305 framed control sessions
//! - Pairing list persisted in a flash-like region
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mico_hap::{Accessory, AccessoryConfig, AccessoryServer, Keystore};
//!
//! # async fn example() -> Result<(), mico_hap::HapError> {
//! let config = AccessoryConfig::new("Lamp").with_password("111-22-333");
//! let keystore = Keystore::open_default("/var/lib/lamp")?;
//! let accessory = Arc::new(Accessory::new(config, keystore));
//!
//! let mut server = AccessoryServer::new(accessory);
//! let addr = server.start().await?;
//! println!("listening on {addr}");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! - **Transport**: `AccessoryServer` - tokio TCP listener, one task per connection
//! - **Connection**: `Connection` - Sans-IO HTTP routing and session encryption
//! - **Engines**: `pair_setup_engine`, `pair_verify_engine`, `pair_management_engine`
//! - **Low-level**: `protocol` (crypto, TLV8) and `storage`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Protocol primitives
pub mod protocol;
/// Accessory server
pub mod server;
/// Persistent state
pub mod storage;

/// Testing utilities
pub mod testing;

// Re-exports
pub use error::HapError;
pub use protocol::pairing::PairingError;
pub use server::{
    Accessory, AccessoryConfig, Connection, ConnectionId, MfiAuthenticator, SessionKeys,
    SetupCode, pair_management_engine, pair_setup_engine, pair_verify_engine,
};
#[cfg(feature = "tokio-runtime")]
pub use server::AccessoryServer;
pub use storage::{Keystore, StorageError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
///
/// Convenient re-exports
pub mod prelude {
    pub use crate::{Accessory, AccessoryConfig, HapError, Keystore, PairingError, SetupCode};
    #[cfg(feature = "tokio-runtime")]
    pub use crate::AccessoryServer;
}
