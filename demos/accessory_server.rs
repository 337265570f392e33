//! Run a pairing-only accessory
//!
//! Pairings and the accessory identity are kept under `./hap-store`, so a
//! controller paired once can reconnect with pair-verify after a restart.
//!
//! ```text
//! RUST_LOG=mico_hap=debug cargo run --example accessory_server -- 111-22-333
//! ```

use std::sync::Arc;

use mico_hap::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mico_hap=info".parse()?),
        )
        .init();

    let setup_code = std::env::args()
        .nth(1)
        .unwrap_or_else(|| mico_hap::server::config::DEFAULT_SETUP_CODE.to_string());

    let config = AccessoryConfig::new("Rust Accessory").with_password(setup_code.clone());
    let keystore = Keystore::open_default("hap-store")?;
    let accessory = Arc::new(Accessory::new(config, keystore));

    let mut server = AccessoryServer::new(accessory.clone());
    let addr = server.start().await?;

    println!("Accessory '{}' listening on {}", accessory.config().name, addr);
    println!("Device ID: {}", accessory.config().device_id);
    if accessory.is_paired() {
        println!("Already paired; controllers may pair-verify.");
    } else {
        println!("Setup code: {setup_code}");
    }
    println!("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    server.stop().await;
    println!("Accessory stopped.");

    Ok(())
}
