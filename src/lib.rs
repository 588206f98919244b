//! Core building blocks for asynchronous network applications.
//!
//! This crate provides the pieces a protocol server is assembled from, from
//! the bottom up:
//!
//! - [`buffer`]: a reference-counted, zero-copy byte buffer ([`buffer::ByteBuf`])
//!   with heap, direct, composite and derived variants, endian-aware primitive
//!   access and blocking/async stream interop.
//! - [`pipeline`]: the handler/pipeline abstraction ([`pipeline::ChannelHandler`],
//!   [`pipeline::Pipeline`]) plus the in-memory [`pipeline::EmbeddedChannel`]
//!   used to host codec implementations.
//! - [`protocol`]: the streaming HTTP object model consumed and produced by
//!   the content codecs.
//! - [`codec`]: the HTTP content decoder stage, which transparently
//!   decompresses message bodies while rewriting the framing headers.
//! - [`websocket`]: the RFC 6455 server handshake (version 13) and the
//!   RFC 7692 permessage-deflate frame decoder.
//!
//! # Example
//!
//! ```no_run
//! use micro_channel::codec::HttpContentDecoder;
//! use micro_channel::pipeline::{EmbeddedChannel, MessageDecoderHandler};
//! use micro_channel::protocol::HttpObject;
//!
//! let mut channel: EmbeddedChannel<HttpObject> =
//!     EmbeddedChannel::single(MessageDecoderHandler::new(HttpContentDecoder::decompressor()))
//!         .unwrap();
//! // feed decoded HTTP objects with channel.write_inbound(..),
//! // drain decompressed objects with channel.read_inbound()
//! ```

extern crate core;

pub mod buffer;
pub mod codec;
pub mod pipeline;
pub mod protocol;
pub mod websocket;
