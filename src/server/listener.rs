//! TCP accessory server
//!
//! Accepts controller connections and runs each one in its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::accessory::Accessory;
use super::connection::Connection;
use crate::error::HapError;

const READ_BUFFER_SIZE: usize = 4096;

/// `HomeKit` accessory pairing server
pub struct AccessoryServer {
    accessory: Arc<Accessory>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    local_addr: Option<SocketAddr>,
}

impl AccessoryServer {
    /// Create a server for `accessory`
    #[must_use]
    pub fn new(accessory: Arc<Accessory>) -> Self {
        Self {
            accessory,
            shutdown_tx: None,
            local_addr: None,
        }
    }

    /// Shared accessory state
    #[must_use]
    pub fn accessory(&self) -> &Arc<Accessory> {
        &self.accessory
    }

    /// Bound address, once started
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the configured port and start accepting connections
    ///
    /// # Errors
    ///
    /// Returns error if the server is already running or the port cannot be
    /// bound.
    pub async fn start(&mut self) -> Result<SocketAddr, HapError> {
        if self.shutdown_tx.is_some() {
            return Err(HapError::AlreadyRunning);
        }

        let listener = TcpListener::bind(("0.0.0.0", self.accessory.config().port)).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        info!(
            "Accessory '{}' ({}) listening on {}",
            self.accessory.config().name,
            self.accessory.config().device_id,
            local_addr
        );

        let accessory = self.accessory.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                let accessory = accessory.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, addr, accessory).await {
                                        error!("Connection error from {}: {}", addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
            info!("Accessory server stopped");
        });

        Ok(local_addr)
    }

    /// Stop accepting connections
    ///
    /// Established connections run until the controller disconnects.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        self.local_addr = None;
    }
}

/// Pump bytes between one socket and its [`Connection`]
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    accessory: Arc<Accessory>,
) -> Result<(), HapError> {
    let mut connection = Connection::new(accessory);
    debug!("{} accepted from {}", connection.id(), addr);

    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            debug!("{} closed by peer", connection.id());
            return Ok(());
        }

        // Engine steps block on SRP math and flash I/O
        let data = buf[..n].to_vec();
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = connection.receive(&data);
            (connection, result)
        })
        .await
        .map_err(|e| HapError::InternalError {
            message: format!("connection task failed: {e}"),
        })?;
        connection = returned;

        let output = result?;
        if !output.is_empty() {
            stream.write_all(&output).await?;
        }
    }
}
