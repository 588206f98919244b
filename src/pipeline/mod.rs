//! Composable pipeline stages.
//!
//! A pipeline is an ordered chain of handlers, each observing inbound events
//! through its [`HandlerContext`]. The module provides:
//!
//! - [`ChannelHandler`]: the stage contract (lifecycle, reads, exceptions,
//!   and the outbound write/flush/close operations)
//! - [`Pipeline`] / [`ChannelConfig`]: the dispatch machinery and the
//!   channel-level `auto_read` switch
//! - [`MessageDecoder`] / [`MessageDecoderHandler`]: message-to-message
//!   decoding with pass-through, release discipline and the `need_read`
//!   backpressure signal
//! - [`EmbeddedChannel`]: the in-memory channel used to host codecs inside
//!   other handlers
//!
//! # Ordering
//!
//! Dispatch is synchronous and depth-first: everything a handler emits for
//! event *E* is delivered downstream before event *E+1* is processed, and a
//! `channel_read_complete` follows the batch of reads that preceded it.
//! Inbound events travel head→tail; outbound operations travel tail→head.

mod channel;
mod context;
mod decoder;
mod embedded;
mod error;
mod handler;

pub use channel::ChannelConfig;
pub use channel::Pipeline;
pub use context::HandlerContext;
pub use decoder::MessageDecoder;
pub use decoder::MessageDecoderHandler;
pub use embedded::EmbeddedChannel;
pub use error::CodecError;
pub use handler::ChannelHandler;
