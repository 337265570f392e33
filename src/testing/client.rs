//! HTTP clients that carry [`TestController`](super::TestController)
//! messages to an accessory, in process or over TCP

use std::sync::Arc;

use crate::error::HapError;
use crate::server::http::{HttpClientCodec, HttpRequest, HttpResponse, StatusCode};
use crate::server::{Accessory, Connection, SecureChannel, SessionKeys};

/// Require a `200 OK` and return its body
///
/// # Errors
///
/// Returns `HapError::UnexpectedStatus` for any other status.
pub fn expect_ok(response: HttpResponse) -> Result<Vec<u8>, HapError> {
    if response.status == StatusCode::OK {
        Ok(response.body)
    } else {
        Err(HapError::UnexpectedStatus {
            status: response.status.0,
        })
    }
}

/// Client wired directly to an in-process [`Connection`]
#[derive(Debug)]
pub struct LoopbackClient {
    connection: Connection,
    codec: HttpClientCodec,
    channel: Option<SecureChannel>,
}

impl LoopbackClient {
    /// Open a new connection to `accessory`
    #[must_use]
    pub fn new(accessory: Arc<Accessory>) -> Self {
        Self {
            connection: Connection::new(accessory),
            codec: HttpClientCodec::new(),
            channel: None,
        }
    }

    /// Accessory end of the connection
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Encrypt all further traffic with `keys`
    pub fn enable_encryption(&mut self, keys: &SessionKeys) {
        self.channel = Some(SecureChannel::controller(keys));
    }

    /// Deliver raw bytes and return the raw reply
    ///
    /// # Errors
    ///
    /// Returns the error that made the accessory drop the connection.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<Vec<u8>, HapError> {
        self.connection.receive(bytes)
    }

    /// `POST` a TLV body to `path`
    ///
    /// # Errors
    ///
    /// Returns error if the accessory aborts or sends no complete response.
    pub fn post(&mut self, path: &str, body: Vec<u8>) -> Result<HttpResponse, HapError> {
        let mut bytes = HttpRequest::pairing_post(path, body).encode();
        if let Some(channel) = self.channel.as_mut() {
            bytes = channel.encrypt(&bytes)?;
        }

        let mut reply = self.connection.receive(&bytes)?;
        if let Some(channel) = self.channel.as_mut() {
            reply = channel.decrypt(&reply)?;
        }

        self.codec.feed(&reply);
        self.codec.decode()?.ok_or(HapError::ConnectionClosed)
    }

    /// `POST` and require `200 OK`, returning the TLV body
    ///
    /// # Errors
    ///
    /// See [`LoopbackClient::post`] and [`expect_ok`].
    pub fn post_tlv(&mut self, path: &str, body: &[u8]) -> Result<Vec<u8>, HapError> {
        expect_ok(self.post(path, body.to_vec())?)
    }
}

#[cfg(feature = "tokio-runtime")]
pub use self::tcp::TcpClient;

#[cfg(feature = "tokio-runtime")]
mod tcp {
    use std::net::SocketAddr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::expect_ok;
    use crate::error::HapError;
    use crate::server::http::{HttpClientCodec, HttpRequest, HttpResponse};
    use crate::server::{SecureChannel, SessionKeys};

    /// Client speaking to an [`AccessoryServer`](crate::server::AccessoryServer)
    #[derive(Debug)]
    pub struct TcpClient {
        stream: TcpStream,
        codec: HttpClientCodec,
        channel: Option<SecureChannel>,
    }

    impl TcpClient {
        /// Connect to `addr`
        ///
        /// # Errors
        ///
        /// Returns error if the connection fails.
        pub async fn connect(addr: SocketAddr) -> Result<Self, HapError> {
            Ok(Self {
                stream: TcpStream::connect(addr).await?,
                codec: HttpClientCodec::new(),
                channel: None,
            })
        }

        /// Encrypt all further traffic with `keys`
        pub fn enable_encryption(&mut self, keys: &SessionKeys) {
            self.channel = Some(SecureChannel::controller(keys));
        }

        /// `POST` a TLV body to `path`
        ///
        /// # Errors
        ///
        /// Returns `HapError::ConnectionClosed` if the accessory hangs up
        /// before a complete response.
        pub async fn post(&mut self, path: &str, body: Vec<u8>) -> Result<HttpResponse, HapError> {
            let mut bytes = HttpRequest::pairing_post(path, body).encode();
            if let Some(channel) = self.channel.as_mut() {
                bytes = channel.encrypt(&bytes)?;
            }
            self.stream.write_all(&bytes).await?;

            let mut buf = [0u8; 4096];
            loop {
                if let Some(response) = self.codec.decode()? {
                    return Ok(response);
                }
                let n = self.stream.read(&mut buf).await?;
                if n == 0 {
                    return Err(HapError::ConnectionClosed);
                }
                match self.channel.as_mut() {
                    Some(channel) => {
                        let plaintext = channel.decrypt(&buf[..n])?;
                        self.codec.feed(&plaintext);
                    }
                    None => self.codec.feed(&buf[..n]),
                }
            }
        }

        /// `POST` and require `200 OK`, returning the TLV body
        ///
        /// # Errors
        ///
        /// See [`TcpClient::post`] and [`expect_ok`].
        pub async fn post_tlv(&mut self, path: &str, body: &[u8]) -> Result<Vec<u8>, HapError> {
            expect_ok(self.post(path, body.to_vec()).await?)
        }
    }
}
