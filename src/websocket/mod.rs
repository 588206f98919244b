//! WebSocket server support: opening handshake and permessage-deflate.
//!
//! Two independent pieces, wired into a pipeline after the HTTP upgrade:
//!
//! - [`ServerHandshaker`]: builds the `101 Switching Protocols` response for
//!   a version-13 upgrade request (RFC 6455 §4.2), including subprotocol
//!   negotiation
//! - [`PerMessageDeflateDecoder`]: replaces compressed frames with their
//!   inflated equivalents (RFC 7692), reassembling fragmented messages and
//!   honouring no-context-takeover
//!
//! The wire-level frame codec lives with the transport; this module only
//! assumes frames arrive as [`WebSocketFrame`] values.

mod config;
mod deflate;
mod error;
mod frame;
mod handshake;

pub use config::WebSocketDecoderConfig;
pub use config::WebSocketDecoderConfigBuilder;
pub use deflate::ExtensionDecoderFilter;
pub use deflate::NeverSkip;
pub use deflate::PerMessageDeflateDecoder;
pub use error::HandshakeError;
pub use frame::OpCode;
pub use frame::WebSocketFrame;
pub use frame::{RSV1, RSV2, RSV3};
pub use handshake::derive_accept_key;
pub use handshake::ServerHandshaker;
pub use handshake::WEBSOCKET_GUID;
