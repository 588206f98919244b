//! HTTP content codecs.
//!
//! The stage provided here sits immediately after the HTTP object decoder
//! and transparently decompresses message bodies:
//!
//! - [`HttpContentDecoder`]: the pipeline stage, generic over a
//!   [`ContentCodecFactory`] that maps content codings to decompressors
//! - [`HttpContentDecompressor`]: the stock factory for gzip and deflate
//! - [`InflateHandler`] / [`ZlibWrapper`]: the embedded-channel handler that
//!   hosts the actual flate2 decompressor
//!
//! Decoded heads advertise `Transfer-Encoding: chunked` in place of any
//! `Content-Length`, since the inflated size is unknown until end-of-stream.

mod content_decoder;
mod inflate;

pub use content_decoder::ContentCodecFactory;
pub use content_decoder::HttpContentDecoder;
pub use content_decoder::HttpContentDecompressor;
pub use content_decoder::IDENTITY;
pub use inflate::InflateHandler;
pub use inflate::ZlibWrapper;
