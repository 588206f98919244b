//! Server-side opening handshake, WebSocket version 13.
//!
//! From [RFC 6455 §4.2](https://datatracker.ietf.org/doc/html/rfc6455#section-4.2):
//! the server answers a well-formed upgrade request with
//!
//! ```text
//! HTTP/1.1 101 Switching Protocols
//! upgrade: websocket
//! connection: Upgrade
//! sec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
//!
//! where the accept token is the Base64-encoded SHA-1 of the client key
//! concatenated with the fixed protocol GUID.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{
    CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, UPGRADE,
};
use http::{HeaderMap, HeaderValue, Response, StatusCode, Version};
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::buffer::BufAllocator;
use crate::protocol::{FullMessage, Head};
use crate::websocket::{HandshakeError, WebSocketDecoderConfig};

/// The GUID every accept token is derived with (RFC 6455 §1.3).
pub const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derives the `Sec-WebSocket-Accept` token from a client key.
pub fn derive_accept_key(sec_key: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(sec_key);
    sha1.update(WEBSOCKET_GUID);
    STANDARD.encode(sha1.finalize())
}

/// Performs the version-13 server half of the opening handshake.
pub struct ServerHandshaker {
    subprotocols: Vec<String>,
    allocator: Arc<dyn BufAllocator>,
    decoder_config: WebSocketDecoderConfig,
}

impl ServerHandshaker {
    /// Creates a handshaker supporting the given comma-separated
    /// subprotocols (`None` to support none). The allocator supplies the
    /// response body buffer; `decoder_config` is handed to whoever installs
    /// the frame codec after the upgrade.
    pub fn new(
        allocator: Arc<dyn BufAllocator>,
        subprotocols: Option<&str>,
        decoder_config: WebSocketDecoderConfig,
    ) -> Self {
        let subprotocols = subprotocols
            .map(|csv| {
                csv.split(',')
                    .map(str::trim)
                    .filter(|token| !token.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self { subprotocols, allocator, decoder_config }
    }

    /// The frame decoder configuration to install after the upgrade.
    pub fn decoder_config(&self) -> &WebSocketDecoderConfig {
        &self.decoder_config
    }

    /// Picks a subprotocol from the client's comma-separated request, or
    /// `None` when nothing matches. A supported entry of `*` accepts the
    /// client's first offer.
    pub fn select_subprotocol(&self, requested: &str) -> Option<String> {
        for offer in requested.split(',').map(str::trim).filter(|token| !token.is_empty()) {
            for supported in &self.subprotocols {
                if supported == "*" || supported == offer {
                    return Some(offer.to_string());
                }
            }
        }
        None
    }

    /// Builds the `101 Switching Protocols` response for an aggregated
    /// upgrade request. `extra_headers` are merged in order before the
    /// mandatory handshake headers are set.
    ///
    /// Fails with [`HandshakeError::MissingKey`] when the request carries no
    /// usable `Sec-WebSocket-Key`; in that case no response is produced and
    /// the caller decides how to answer.
    pub fn new_handshake_response(
        &self,
        request: &FullMessage,
        extra_headers: Option<&HeaderMap>,
    ) -> Result<FullMessage, HandshakeError> {
        let key = request
            .headers()
            .get(SEC_WEBSOCKET_KEY)
            .map(HeaderValue::as_bytes)
            .filter(|key| !key.is_empty())
            .ok_or(HandshakeError::MissingKey)?;

        let accept = derive_accept_key(key);
        debug!(accept = %accept, "websocket version 13 server handshake");

        let mut response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .version(Version::HTTP_11)
            .body(())?;

        let headers = response.headers_mut();
        if let Some(extra) = extra_headers {
            for (name, value) in extra {
                headers.append(name, value.clone());
            }
        }
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(
            SEC_WEBSOCKET_ACCEPT,
            HeaderValue::from_str(&accept).map_err(http::Error::from)?,
        );

        if let Some(requested) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
            if let Ok(requested) = requested.to_str() {
                match self.select_subprotocol(requested) {
                    Some(selected) => {
                        response.headers_mut().insert(
                            SEC_WEBSOCKET_PROTOCOL,
                            HeaderValue::from_str(&selected).map_err(http::Error::from)?,
                        );
                    }
                    None => {
                        debug!(requested = %requested, "requested subprotocol(s) not supported");
                    }
                }
            }
        }

        Ok(FullMessage::new(Head::Response(response), self.allocator.buffer(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{ByteBuf, Unpooled};
    use http::Request;

    fn upgrade_request(builder: http::request::Builder) -> FullMessage {
        FullMessage::new(Head::Request(builder.body(()).unwrap()), ByteBuf::heap(0))
    }

    fn handshaker(subprotocols: Option<&str>) -> ServerHandshaker {
        ServerHandshaker::new(Unpooled::shared(), subprotocols, WebSocketDecoderConfig::default())
    }

    #[test]
    fn derives_rfc_accept_key() {
        assert_eq!(derive_accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn handshake_response_carries_the_required_headers() {
        let request = upgrade_request(
            Request::builder()
                .method(http::Method::GET)
                .uri("/chat")
                .header("Host", "server.example.com")
                .header(UPGRADE, "websocket")
                .header(CONNECTION, "Upgrade")
                .header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
                .header("Sec-WebSocket-Version", "13")
                .header(SEC_WEBSOCKET_PROTOCOL, "chat, superchat"),
        );

        let handshaker = handshaker(Some("chat"));
        let response = handshaker.new_handshake_response(&request, None).unwrap();

        assert_eq!(response.status(), Some(StatusCode::SWITCHING_PROTOCOLS));
        assert_eq!(response.head().version(), Version::HTTP_11);
        assert_eq!(response.headers().get(UPGRADE).unwrap(), "websocket");
        assert_eq!(response.headers().get(CONNECTION).unwrap(), "Upgrade");
        assert_eq!(
            response.headers().get(SEC_WEBSOCKET_ACCEPT).unwrap(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
        assert_eq!(response.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(), "chat");
        assert!(!response.payload().is_readable());
    }

    #[test]
    fn missing_key_fails_without_a_response() {
        let request = upgrade_request(Request::builder().uri("/chat"));
        let result = handshaker(None).new_handshake_response(&request, None);
        assert!(matches!(result, Err(HandshakeError::MissingKey)));
    }

    #[test]
    fn empty_key_fails_too() {
        let request = upgrade_request(Request::builder().uri("/chat").header(SEC_WEBSOCKET_KEY, ""));
        let result = handshaker(None).new_handshake_response(&request, None);
        assert!(matches!(result, Err(HandshakeError::MissingKey)));
    }

    #[test]
    fn unsupported_subprotocols_omit_the_header() {
        let request = upgrade_request(
            Request::builder()
                .uri("/chat")
                .header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
                .header(SEC_WEBSOCKET_PROTOCOL, "graphql-ws"),
        );
        let response = handshaker(Some("chat, superchat")).new_handshake_response(&request, None).unwrap();
        assert!(response.headers().get(SEC_WEBSOCKET_PROTOCOL).is_none());
    }

    #[test]
    fn empty_subprotocol_offer_is_treated_as_none() {
        let request = upgrade_request(
            Request::builder()
                .uri("/chat")
                .header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
                .header(SEC_WEBSOCKET_PROTOCOL, " , "),
        );
        let response = handshaker(Some("chat")).new_handshake_response(&request, None).unwrap();
        assert!(response.headers().get(SEC_WEBSOCKET_PROTOCOL).is_none());
    }

    #[test]
    fn wildcard_accepts_the_first_offer() {
        assert_eq!(handshaker(Some("*")).select_subprotocol("a, b"), Some("a".to_string()));
    }

    #[test]
    fn extra_headers_are_merged_before_the_mandatory_set() {
        let request = upgrade_request(
            Request::builder().uri("/chat").header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ=="),
        );

        let mut extra = HeaderMap::new();
        extra.insert("x-trace-id", "abc".parse().unwrap());
        // an attempt to override a mandatory header loses
        extra.insert(UPGRADE, "h2c".parse().unwrap());

        let response = handshaker(None).new_handshake_response(&request, Some(&extra)).unwrap();
        assert_eq!(response.headers().get("x-trace-id").unwrap(), "abc");
        assert_eq!(response.headers().get(UPGRADE).unwrap(), "websocket");
    }
}
