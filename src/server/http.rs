//! Minimal HTTP/1.1 codec for the pairing endpoints
//!
//! # Sans-IO Design
//!
//! No I/O happens here. [`HttpServerCodec::feed`] buffers inbound bytes and
//! [`HttpServerCodec::decode`] yields complete requests; responses are turned
//! into bytes with [`HttpResponse::encode`]. [`HttpClientCodec`] is the mirror
//! image used by the reference controller.

use std::str::{self, FromStr};

use bytes::{Buf, BytesMut};

/// Content type of every pairing request and response body
pub const PAIRING_CONTENT_TYPE: &str = "application/x-tlv8";

/// Maximum allowed body size
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Maximum header section size
const MAX_HEADER_SIZE: usize = 8 * 1024;

/// Errors during HTTP parsing
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid request line: {0}")]
    InvalidRequestLine(String),

    #[error("Invalid status line: {0}")]
    InvalidStatusLine(String),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("Body too large: {size} > {max}")]
    BodyTooLarge { size: usize, max: usize },

    #[error("Invalid UTF-8 in headers")]
    InvalidUtf8,
}

/// Request methods the accessory distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Method token as sent on the wire
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            _ => Err(()),
        }
    }
}

/// Response status codes used by the accessory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: Self = Self(200);
    pub const BAD_REQUEST: Self = Self(400);
    pub const NOT_FOUND: Self = Self(404);
    pub const METHOD_NOT_ALLOWED: Self = Self(405);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    /// `HomeKit`: request needs a verified session
    pub const CONNECTION_AUTHORIZATION_REQUIRED: Self = Self(470);

    /// Canonical reason phrase
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self.0 {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            470 => "Connection Authorization Required",
            500 => "Internal Server Error",
            _ => "Unknown",
        }
    }
}

/// Ordered header list with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Create empty headers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any existing one with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.inner.push((name, value.into()));
    }

    /// Get header value (case-insensitive)
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn content_length(&self) -> Result<usize, ParseError> {
        self.get("Content-Length")
            .map(|v| {
                v.parse::<usize>()
                    .map_err(|_| ParseError::InvalidContentLength(v.to_string()))
            })
            .transpose()
            .map(Option::unwrap_or_default)
    }

    fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.inner.iter()
    }
}

/// A parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// `POST` of a TLV8 body to `path`
    #[must_use]
    pub fn pairing_post(path: &str, body: Vec<u8>) -> Self {
        let mut headers = Headers::new();
        headers.insert("Content-Type", PAIRING_CONTENT_TYPE);
        Self {
            method: Method::Post,
            path: path.to_string(),
            headers,
            body,
        }
    }

    /// Serialize to wire format
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{} {} HTTP/1.1\r\n", self.method.as_str(), self.path).into_bytes();
        encode_headers_and_body(&mut out, &self.headers, &self.body);
        out
    }
}

/// A response to send (or, on the controller side, one received)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Response with no body
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// `200 OK` carrying a TLV8 body
    #[must_use]
    pub fn pairing(body: Vec<u8>) -> Self {
        let mut headers = Headers::new();
        headers.insert("Content-Type", PAIRING_CONTENT_TYPE);
        Self {
            status: StatusCode::OK,
            headers,
            body,
        }
    }

    /// Serialize to wire format
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            format!("HTTP/1.1 {} {}\r\n", self.status.0, self.status.reason()).into_bytes();
        encode_headers_and_body(&mut out, &self.headers, &self.body);
        out
    }
}

fn encode_headers_and_body(out: &mut Vec<u8>, headers: &Headers, body: &[u8]) {
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
}

/// Split a complete message off the front of `buffer`
///
/// Returns the start line, headers and body once all bytes are present.
fn decode_message(
    buffer: &mut BytesMut,
) -> Result<Option<(String, Headers, Vec<u8>)>, ParseError> {
    let Some(header_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") else {
        if buffer.len() > MAX_HEADER_SIZE {
            return Err(ParseError::InvalidHeader("Headers too large".into()));
        }
        return Ok(None);
    };

    let header_str = str::from_utf8(&buffer[..header_end]).map_err(|_| ParseError::InvalidUtf8)?;
    let mut lines = header_str.split("\r\n");
    let start_line = lines.next().unwrap_or_default().to_string();

    let mut headers = Headers::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(ParseError::InvalidHeader(line.to_string()));
        };
        headers.insert(name.trim(), value.trim());
    }

    let content_length = headers.content_length()?;
    if content_length > MAX_BODY_SIZE {
        return Err(ParseError::BodyTooLarge {
            size: content_length,
            max: MAX_BODY_SIZE,
        });
    }

    if buffer.len() < header_end + 4 + content_length {
        return Ok(None);
    }

    buffer.advance(header_end + 4);
    let body = buffer.split_to(content_length).to_vec();
    Ok(Some((start_line, headers, body)))
}

/// Accessory-side request parser
#[derive(Debug)]
pub struct HttpServerCodec {
    buffer: BytesMut,
}

impl HttpServerCodec {
    /// Create a new server codec
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Feed bytes into the internal buffer
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Attempt to decode a complete request
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the request is malformed.
    pub fn decode(&mut self) -> Result<Option<HttpRequest>, ParseError> {
        let Some((request_line, headers, body)) = decode_message(&mut self.buffer)? else {
            return Ok(None);
        };

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, path, version] = parts.as_slice() else {
            return Err(ParseError::InvalidRequestLine(request_line.clone()));
        };
        if !version.starts_with("HTTP/") {
            return Err(ParseError::InvalidRequestLine(request_line.clone()));
        }
        let method =
            Method::from_str(method).map_err(|()| ParseError::InvalidMethod((*method).to_string()))?;

        Ok(Some(HttpRequest {
            method,
            path: (*path).to_string(),
            headers,
            body,
        }))
    }
}

impl Default for HttpServerCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller-side response parser
#[derive(Debug, Default)]
pub struct HttpClientCodec {
    buffer: BytesMut,
}

impl HttpClientCodec {
    /// Create a new client codec
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the internal buffer
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempt to decode a complete response
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the response is malformed.
    pub fn decode(&mut self) -> Result<Option<HttpResponse>, ParseError> {
        let Some((status_line, headers, body)) = decode_message(&mut self.buffer)? else {
            return Ok(None);
        };

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let code = parts.next().and_then(|c| c.parse::<u16>().ok());
        let (true, Some(code)) = (version.starts_with("HTTP/"), code) else {
            return Err(ParseError::InvalidStatusLine(status_line.clone()));
        };

        Ok(Some(HttpResponse {
            status: StatusCode(code),
            headers,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_post_with_body() {
        let mut codec = HttpServerCodec::new();
        codec.feed(
            b"POST /pair-setup HTTP/1.1\r\nContent-Type: application/x-tlv8\r\ncontent-length: 6\r\n\r\n\x00\x01\x00\x06\x01\x01",
        );

        let request = codec.decode().unwrap().unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/pair-setup");
        assert_eq!(request.headers.get("content-type"), Some(PAIRING_CONTENT_TYPE));
        assert_eq!(request.body, vec![0x00, 0x01, 0x00, 0x06, 0x01, 0x01]);
        assert_eq!(codec.buffer_len(), 0);
    }

    #[test]
    fn test_decode_waits_for_body() {
        let mut codec = HttpServerCodec::new();
        codec.feed(b"POST /pair-verify HTTP/1.1\r\nContent-Length: 4\r\n\r\nab");
        assert!(codec.decode().unwrap().is_none());

        codec.feed(b"cd");
        let request = codec.decode().unwrap().unwrap();
        assert_eq!(request.body, b"abcd");
    }

    #[test]
    fn test_pipelined_requests() {
        let mut codec = HttpServerCodec::new();
        let first = HttpRequest::pairing_post("/pair-setup", vec![1, 2]).encode();
        let second = HttpRequest::pairing_post("/pairings", vec![3]).encode();
        codec.feed(&[first, second].concat());

        assert_eq!(codec.decode().unwrap().unwrap().path, "/pair-setup");
        assert_eq!(codec.decode().unwrap().unwrap().path, "/pairings");
        assert!(codec.decode().unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_request_line() {
        let mut codec = HttpServerCodec::new();
        codec.feed(b"POST /pair-setup\r\n\r\n");
        assert!(matches!(
            codec.decode(),
            Err(ParseError::InvalidRequestLine(_))
        ));

        let mut codec = HttpServerCodec::new();
        codec.feed(b"BREW /pot HTTP/1.1\r\n\r\n");
        assert!(matches!(codec.decode(), Err(ParseError::InvalidMethod(_))));
    }

    #[test]
    fn test_rejects_oversized_body() {
        let mut codec = HttpServerCodec::new();
        codec.feed(b"POST /pair-setup HTTP/1.1\r\nContent-Length: 99999999\r\n\r\n");
        assert!(matches!(codec.decode(), Err(ParseError::BodyTooLarge { .. })));
    }

    #[test]
    fn test_response_roundtrip_through_client_codec() {
        let response = HttpResponse::pairing(vec![0x06, 0x01, 0x02]);
        let mut codec = HttpClientCodec::new();
        codec.feed(&response.encode());

        let decoded = codec.decode().unwrap().unwrap();
        assert_eq!(decoded.status, StatusCode::OK);
        assert_eq!(decoded.body, vec![0x06, 0x01, 0x02]);
    }

    #[test]
    fn test_470_status_line() {
        let encoded = HttpResponse::new(StatusCode::CONNECTION_AUTHORIZATION_REQUIRED).encode();
        let text = String::from_utf8(encoded).unwrap();
        assert!(text.starts_with("HTTP/1.1 470 Connection Authorization Required\r\n"));
        assert!(text.ends_with("Content-Length: 0\r\n\r\n"));
    }
}
