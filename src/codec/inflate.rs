//! Streaming decompression hosted in an embedded channel.
//!
//! [`InflateHandler`] consumes compressed [`ByteBuf`] chunks and emits
//! decompressed buffers. The flate2 `write`-side decoders push their output
//! into a small [`Writer`] sink, mirroring how the response-encoding side of
//! an HTTP server drives `GzEncoder`/`ZlibEncoder`.

use std::io::{self, Write};
use std::mem;

use bytes::{Bytes, BytesMut};
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};

use crate::buffer::ByteBuf;
use crate::pipeline::{ChannelHandler, CodecError, HandlerContext};

/// The framing wrapped around a deflate stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZlibWrapper {
    /// Raw deflate, no wrapper (RFC 1951).
    None,
    /// zlib wrapper (RFC 1950).
    Zlib,
    /// gzip wrapper (RFC 1952).
    Gzip,
    /// Sniff the first two bytes and pick zlib or raw deflate. HTTP clients
    /// disagree on what `Content-Encoding: deflate` means, so both are
    /// accepted.
    ZlibOrNone,
}

// inspired by actix-http
struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Concrete decompressor variants over the [`Writer`] sink.
enum Inflater {
    Deflate(DeflateDecoder<Writer>),
    Zlib(ZlibDecoder<Writer>),
    Gzip(GzDecoder<Writer>),
}

impl Inflater {
    fn raw() -> Self {
        Self::Deflate(DeflateDecoder::new(Writer::new()))
    }

    fn zlib() -> Self {
        Self::Zlib(ZlibDecoder::new(Writer::new()))
    }

    fn gzip() -> Self {
        Self::Gzip(GzDecoder::new(Writer::new()))
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Deflate(decoder) => {
                decoder.write_all(data)?;
                decoder.flush()
            }
            Self::Zlib(decoder) => {
                decoder.write_all(data)?;
                decoder.flush()
            }
            Self::Gzip(decoder) => {
                decoder.write_all(data)?;
                decoder.flush()
            }
        }
    }

    fn take(&mut self) -> Bytes {
        match self {
            Self::Deflate(decoder) => decoder.get_mut().take(),
            Self::Zlib(decoder) => decoder.get_mut().take(),
            Self::Gzip(decoder) => decoder.get_mut().take(),
        }
    }

    fn finish(self) -> io::Result<Bytes> {
        match self {
            Self::Deflate(decoder) => decoder.finish().map(Writer::into_bytes),
            Self::Zlib(decoder) => decoder.finish().map(Writer::into_bytes),
            Self::Gzip(decoder) => decoder.finish().map(Writer::into_bytes),
        }
    }
}

/// zlib streams open with a CMF/FLG pair: compression method 8, a window
/// size of at most 32 KiB, and a header checksum divisible by 31.
fn looks_like_zlib(cmf: u8, flg: u8) -> bool {
    cmf & 0x0f == 0x08 && cmf >> 4 <= 7 && (u16::from(cmf) << 8 | u16::from(flg)) % 31 == 0
}

/// Embedded-channel handler that inflates its input buffers.
///
/// Each inbound buffer is fully consumed and released; decompressed output
/// is emitted as fresh buffers from the channel allocator. Residual output
/// is flushed when the channel goes inactive.
pub struct InflateHandler {
    wrapper: ZlibWrapper,
    inflater: Option<Inflater>,
    detect: Vec<u8>,
}

impl InflateHandler {
    pub fn new(wrapper: ZlibWrapper) -> Self {
        Self { wrapper, inflater: None, detect: Vec::new() }
    }

    fn feed(&mut self, data: &[u8]) -> Result<Option<Bytes>, CodecError> {
        let buffered: Vec<u8>;
        let input: &[u8] = if self.inflater.is_none() {
            let selected = match self.wrapper {
                ZlibWrapper::None => Inflater::raw(),
                ZlibWrapper::Zlib => Inflater::zlib(),
                ZlibWrapper::Gzip => Inflater::gzip(),
                ZlibWrapper::ZlibOrNone => {
                    self.detect.extend_from_slice(data);
                    if self.detect.len() < 2 {
                        return Ok(None);
                    }
                    if looks_like_zlib(self.detect[0], self.detect[1]) {
                        Inflater::zlib()
                    } else {
                        Inflater::raw()
                    }
                }
            };
            self.inflater = Some(selected);
            if self.wrapper == ZlibWrapper::ZlibOrNone {
                buffered = mem::take(&mut self.detect);
                &buffered
            } else {
                data
            }
        } else {
            data
        };
        let Some(inflater) = self.inflater.as_mut() else {
            return Ok(None);
        };
        inflater.write(input)?;
        let produced = inflater.take();
        Ok(if produced.is_empty() { None } else { Some(produced) })
    }

    fn emit(ctx: &mut HandlerContext<ByteBuf>, bytes: &[u8]) -> Result<(), CodecError> {
        let mut out = ctx.alloc().buffer(bytes.len());
        out.write_bytes(bytes)?;
        ctx.fire_channel_read(out);
        Ok(())
    }
}

impl ChannelHandler<ByteBuf> for InflateHandler {
    fn channel_read(&mut self, ctx: &mut HandlerContext<ByteBuf>, msg: ByteBuf) {
        let data = match msg.to_vec() {
            Ok(data) => data,
            Err(e) => {
                ctx.fire_exception_caught(e.into());
                return;
            }
        };
        if let Err(e) = msg.release() {
            ctx.fire_exception_caught(e.into());
            return;
        }
        match self.feed(&data) {
            Ok(Some(produced)) => {
                if let Err(e) = Self::emit(ctx, &produced) {
                    ctx.fire_exception_caught(e);
                }
            }
            Ok(None) => {}
            Err(e) => ctx.fire_exception_caught(e),
        }
    }

    fn channel_inactive(&mut self, ctx: &mut HandlerContext<ByteBuf>) {
        // flush any buffered sniff bytes through a raw inflater first
        if self.inflater.is_none() && !self.detect.is_empty() {
            let buffered = mem::take(&mut self.detect);
            let inflater = self.inflater.insert(Inflater::raw());
            if let Err(e) = inflater.write(&buffered) {
                ctx.fire_exception_caught(e.into());
            }
        }
        if let Some(inflater) = self.inflater.take() {
            match inflater.finish() {
                Ok(residual) => {
                    if !residual.is_empty() {
                        if let Err(e) = Self::emit(ctx, &residual) {
                            ctx.fire_exception_caught(e);
                        }
                    }
                }
                Err(e) => {
                    tracing::trace!(error = %e, "inflater did not finish cleanly");
                    ctx.fire_exception_caught(e.into());
                }
            }
        }
        ctx.fire_channel_inactive();
    }
}
