//! WebSocket opening handshake (RFC 6455 section 4.2).

use crate::http::HttpRequest;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version accepted.
pub const WEBSOCKET_VERSION: &str = "13";

/// Reasons an upgrade request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("Upgrade header is not \"websocket\"")]
    NotWebSocket,

    #[error("Connection header does not request an upgrade")]
    MissingConnectionUpgrade,

    #[error("Origin header is missing")]
    MissingOrigin,

    #[error("Unsupported WebSocket version {0:?}")]
    UnsupportedVersion(String),

    #[error("Host header is missing or empty")]
    MissingHost,

    #[error("Sec-WebSocket-Key header is missing")]
    MissingKey,
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Check every header an upgrade needs and return the client key.
pub fn validate_upgrade(request: &HttpRequest) -> Result<&str, HandshakeError> {
    if !request.is_websocket_upgrade() {
        return Err(HandshakeError::NotWebSocket);
    }
    let connection = request.header("Connection").unwrap_or_default();
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(HandshakeError::MissingConnectionUpgrade);
    }
    if request.header("Origin").is_none() {
        return Err(HandshakeError::MissingOrigin);
    }
    let version = request.header("Sec-WebSocket-Version").unwrap_or_default();
    if version != WEBSOCKET_VERSION {
        return Err(HandshakeError::UnsupportedVersion(version.to_string()));
    }
    if request.header("Host").map_or(true, str::is_empty) {
        return Err(HandshakeError::MissingHost);
    }
    match request.header("Sec-WebSocket-Key") {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(HandshakeError::MissingKey),
    }
}

/// The `101 Switching Protocols` response for an accept value.
pub fn switching_protocols(accept: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
    .into_bytes()
}

/// Validate an upgrade request and build the response completing it.
pub fn upgrade_response(request: &HttpRequest) -> Result<Vec<u8>, HandshakeError> {
    let key = validate_upgrade(request)?;
    Ok(switching_protocols(&accept_key(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParseStatus;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    const UPGRADE: &str = "GET /ws HTTP/1.1\r\n\
                           Host: pico.local\r\n\
                           Upgrade: websocket\r\n\
                           Connection: keep-alive, Upgrade\r\n\
                           Origin: http://pico.local\r\n\
                           Sec-WebSocket-Version: 13\r\n\
                           Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";

    fn request(text: &str) -> HttpRequest {
        match HttpRequest::parse(Bytes::copy_from_slice(text.as_bytes())).unwrap() {
            ParseStatus::Ready(req) => req,
            ParseStatus::NotYet => panic!("incomplete request"),
        }
    }

    fn without(header: &str) -> HttpRequest {
        let text: String = UPGRADE
            .split_inclusive("\r\n")
            .filter(|line| !line.starts_with(header))
            .collect();
        request(&text)
    }

    #[test]
    fn test_accept_key_rfc_sample() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_valid_upgrade() {
        let req = request(UPGRADE);
        let response = String::from_utf8(upgrade_response(&req).unwrap()).unwrap();
        assert_eq!(
            response,
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
        );
    }

    #[test]
    fn test_missing_headers_rejected() {
        assert_eq!(validate_upgrade(&without("Upgrade:")), Err(HandshakeError::NotWebSocket));
        assert_eq!(
            validate_upgrade(&without("Connection:")),
            Err(HandshakeError::MissingConnectionUpgrade)
        );
        assert_eq!(validate_upgrade(&without("Origin:")), Err(HandshakeError::MissingOrigin));
        assert_eq!(
            validate_upgrade(&without("Sec-WebSocket-Version:")),
            Err(HandshakeError::UnsupportedVersion(String::new()))
        );
        assert_eq!(validate_upgrade(&without("Host:")), Err(HandshakeError::MissingHost));
        assert_eq!(validate_upgrade(&without("Sec-WebSocket-Key:")), Err(HandshakeError::MissingKey));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let text = UPGRADE.replace("Version: 13", "Version: 8");
        assert_eq!(
            validate_upgrade(&request(&text)),
            Err(HandshakeError::UnsupportedVersion("8".to_string()))
        );
    }
}
