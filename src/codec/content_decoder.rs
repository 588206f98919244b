//! The HTTP content decoder stage.
//!
//! Placed immediately after the HTTP object decoder, this stage transparently
//! decompresses message bodies. The framing headers are rewritten to match:
//! a `Content-Length` is dropped in favour of `Transfer-Encoding: chunked`
//! (the decoded length is unknown until end-of-stream), and
//! `Content-Encoding` is replaced by the target encoding or removed entirely
//! when the target is identity.
//!
//! While a `100 Continue` exchange is in flight, every object passes through
//! untouched: interpreting body framing before the peer was granted
//! permission to continue would corrupt the stream.

use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::trace;

use crate::buffer::ByteBuf;
use crate::codec::inflate::{InflateHandler, ZlibWrapper};
use crate::pipeline::{CodecError, EmbeddedChannel, HandlerContext, MessageDecoder};
use crate::protocol::{FullMessage, HttpContent, HttpObject, LastHttpContent, MessageHead};

/// The identity content coding: no transformation.
pub const IDENTITY: &str = "identity";

/// Supplies the decompression machinery for a given content coding.
pub trait ContentCodecFactory: Send {
    /// Returns an embedded channel that inflates the given coding, or `None`
    /// for codings that should pass through untouched.
    fn new_content_decoder(
        &mut self,
        encoding: &str,
    ) -> Result<Option<EmbeddedChannel<ByteBuf>>, CodecError>;

    /// The coding advertised on outgoing heads while decoding is active.
    /// Returning [`IDENTITY`] removes the `Content-Encoding` header.
    fn target_content_encoding(&self, _encoding: &str) -> String {
        IDENTITY.to_string()
    }
}

/// Stock factory understanding `gzip`, `x-gzip`, `deflate` and `x-deflate`.
///
/// `deflate` bodies are sniffed for a zlib wrapper, since clients disagree on
/// whether the coding means raw deflate or zlib.
#[derive(Debug, Default)]
pub struct HttpContentDecompressor;

impl ContentCodecFactory for HttpContentDecompressor {
    fn new_content_decoder(
        &mut self,
        encoding: &str,
    ) -> Result<Option<EmbeddedChannel<ByteBuf>>, CodecError> {
        if encoding.eq_ignore_ascii_case("gzip") || encoding.eq_ignore_ascii_case("x-gzip") {
            return Ok(Some(EmbeddedChannel::single(InflateHandler::new(ZlibWrapper::Gzip))?));
        }
        if encoding.eq_ignore_ascii_case("deflate") || encoding.eq_ignore_ascii_case("x-deflate") {
            return Ok(Some(EmbeddedChannel::single(InflateHandler::new(ZlibWrapper::ZlibOrNone))?));
        }
        Ok(None)
    }
}

/// Message-to-message decoder that decompresses HTTP bodies in flight.
pub struct HttpContentDecoder<F> {
    factory: F,
    decoder: Option<EmbeddedChannel<ByteBuf>>,
    continue_response: bool,
}

impl HttpContentDecoder<HttpContentDecompressor> {
    /// A decoder with the stock gzip/deflate factory.
    pub fn decompressor() -> Self {
        Self::new(HttpContentDecompressor)
    }
}

impl<F: ContentCodecFactory> HttpContentDecoder<F> {
    pub fn new(factory: F) -> Self {
        Self { factory, decoder: None, continue_response: false }
    }

    fn content_encoding(headers: &HeaderMap) -> String {
        headers
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| IDENTITY.to_string())
    }

    /// Rewrites framing headers on a head whose body will be decoded.
    fn rewrite_headers(&self, headers: &mut HeaderMap, encoding: &str) -> Result<(), CodecError> {
        if headers.contains_key(CONTENT_LENGTH) {
            headers.remove(CONTENT_LENGTH);
            headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
        let target = self.factory.target_content_encoding(encoding);
        if target == IDENTITY {
            headers.remove(CONTENT_ENCODING);
        } else {
            let value = HeaderValue::from_str(&target)
                .map_err(|_| CodecError::invalid_http_message(format!("invalid target encoding {target:?}")))?;
            headers.insert(CONTENT_ENCODING, value);
        }
        Ok(())
    }

    fn decode_chunk(&mut self, payload: ByteBuf, out: &mut Vec<HttpObject>) -> Result<(), CodecError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(CodecError::invalid_http_message("content chunk without active decoder"));
        };
        decoder.write_inbound(payload)?;
        while let Some(decoded) = decoder.read_inbound() {
            if decoded.is_readable() {
                out.push(HttpObject::Content(HttpContent::new(decoded)));
            } else {
                decoded.release()?;
            }
        }
        Ok(())
    }

    /// Flushes the embedded decoder and emits exactly one terminating object.
    fn finish_decode(
        &mut self,
        trailers: HeaderMap,
        out: &mut Vec<HttpObject>,
    ) -> Result<(), CodecError> {
        if let Some(mut decoder) = self.decoder.take() {
            if decoder.finish()? {
                while let Some(decoded) = decoder.read_inbound() {
                    if decoded.is_readable() {
                        out.push(HttpObject::Content(HttpContent::new(decoded)));
                    } else {
                        decoded.release()?;
                    }
                }
            }
        }
        if trailers.is_empty() {
            out.push(HttpObject::Last(LastHttpContent::empty()));
        } else {
            out.push(HttpObject::Last(LastHttpContent::new(ByteBuf::heap(0), trailers)));
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), CodecError> {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.finish_and_release_all()?;
        }
        Ok(())
    }

    fn cleanup_safely(&mut self, ctx: &mut HandlerContext<HttpObject>) {
        if let Err(cause) = self.cleanup() {
            tracing::warn!(error = %cause, "content decoder cleanup failed");
            ctx.fire_exception_caught(cause);
        }
    }

    fn is_continue(status: Option<StatusCode>) -> bool {
        status == Some(StatusCode::CONTINUE)
    }
}

impl<F: ContentCodecFactory> MessageDecoder<HttpObject> for HttpContentDecoder<F> {
    fn decode(
        &mut self,
        _ctx: &mut HandlerContext<HttpObject>,
        msg: HttpObject,
        out: &mut Vec<HttpObject>,
    ) -> Result<(), CodecError> {
        // A provisional 100 response passes through untouched; until its
        // terminating object arrives, so does everything else.
        match &msg {
            HttpObject::Head(head) if Self::is_continue(head.status()) => {
                self.continue_response = true;
                out.push(msg);
                return Ok(());
            }
            HttpObject::Full(full) if Self::is_continue(full.status()) => {
                out.push(msg);
                return Ok(());
            }
            _ => {}
        }
        if self.continue_response {
            if msg.is_terminal() {
                self.continue_response = false;
            }
            out.push(msg);
            return Ok(());
        }

        match msg {
            HttpObject::Head(mut head) => {
                self.cleanup()?;
                let encoding = Self::content_encoding(head.headers());
                match self.factory.new_content_decoder(&encoding)? {
                    None => out.push(HttpObject::Head(head)),
                    Some(decoder) => {
                        trace!(encoding = %encoding, "installing content decoder");
                        self.decoder = Some(decoder);
                        self.rewrite_headers(head.headers_mut(), &encoding)?;
                        out.push(HttpObject::Head(head));
                    }
                }
                Ok(())
            }
            HttpObject::Full(full) => {
                self.cleanup()?;
                let encoding = Self::content_encoding(full.headers());
                match self.factory.new_content_decoder(&encoding)? {
                    None => {
                        out.push(HttpObject::Full(full));
                        Ok(())
                    }
                    Some(decoder) => {
                        trace!(encoding = %encoding, "installing content decoder for full message");
                        self.decoder = Some(decoder);
                        let (mut head, payload, trailers, result) = full.into_parts();
                        self.rewrite_headers(head.headers_mut(), &encoding)?;
                        // Emit a plain head, never a terminating object:
                        // downstream handlers would read a full message as
                        // end-of-message before its decoded body chunks.
                        out.push(HttpObject::Head(MessageHead::from_parts(head, result)));
                        self.decode_chunk(payload, out)?;
                        self.finish_decode(trailers, out)
                    }
                }
            }
            HttpObject::Content(content) => {
                if self.decoder.is_none() {
                    out.push(HttpObject::Content(content));
                    return Ok(());
                }
                self.decode_chunk(content.into_payload(), out)
            }
            HttpObject::Last(last) => {
                if self.decoder.is_none() {
                    out.push(HttpObject::Last(last));
                    return Ok(());
                }
                let (payload, trailers, _result) = last.into_parts();
                self.decode_chunk(payload, out)?;
                self.finish_decode(trailers, out)
            }
        }
    }

    fn handler_removed(&mut self, ctx: &mut HandlerContext<HttpObject>) {
        self.cleanup_safely(ctx);
    }

    fn channel_inactive(&mut self, ctx: &mut HandlerContext<HttpObject>) {
        self.cleanup_safely(ctx);
        self.continue_response = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{EmbeddedChannel, MessageDecoderHandler};
    use crate::protocol::Head;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use http::{Request, Response, Version};
    use std::io::Write;

    fn decompressor_channel() -> EmbeddedChannel<HttpObject> {
        EmbeddedChannel::single(MessageDecoderHandler::new(HttpContentDecoder::decompressor()))
            .unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn response_head(builder: http::response::Builder) -> HttpObject {
        HttpObject::Head(MessageHead::response(builder.body(()).unwrap()))
    }

    #[test]
    fn gzip_response_is_decoded_and_headers_rewritten() {
        let mut channel = decompressor_channel();
        let compressed = gzip(b"hello");

        let head = response_head(
            Response::builder()
                .status(StatusCode::OK)
                .version(Version::HTTP_11)
                .header(CONTENT_ENCODING, "gzip")
                .header(CONTENT_LENGTH, compressed.len().to_string()),
        );
        channel.write_inbound(head).unwrap();
        channel
            .write_inbound(HttpObject::Last(LastHttpContent::new(
                ByteBuf::copied_from(&compressed),
                HeaderMap::new(),
            )))
            .unwrap();

        let Some(HttpObject::Head(head)) = channel.read_inbound() else {
            panic!("expected a head");
        };
        assert!(head.headers().get(CONTENT_LENGTH).is_none());
        assert!(head.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(head.headers().get(TRANSFER_ENCODING).unwrap(), "chunked");

        let Some(HttpObject::Content(content)) = channel.read_inbound() else {
            panic!("expected decoded content");
        };
        assert_eq!(content.payload().to_vec().unwrap(), b"hello");

        let Some(HttpObject::Last(last)) = channel.read_inbound() else {
            panic!("expected a terminator");
        };
        assert!(!last.payload().is_readable());
        assert!(last.trailers().is_empty());
        assert!(channel.read_inbound().is_none());
    }

    #[test]
    fn unknown_encoding_passes_through_unchanged() {
        let mut channel = decompressor_channel();

        let head = response_head(
            Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_ENCODING, "br")
                .header(CONTENT_LENGTH, "3"),
        );
        channel.write_inbound(head).unwrap();
        channel
            .write_inbound(HttpObject::Content(HttpContent::new(ByteBuf::copied_from(b"abc"))))
            .unwrap();

        let Some(HttpObject::Head(head)) = channel.read_inbound() else {
            panic!("expected a head");
        };
        assert_eq!(head.headers().get(CONTENT_ENCODING).unwrap(), "br");
        assert_eq!(head.headers().get(CONTENT_LENGTH).unwrap(), "3");
        assert!(head.headers().get(TRANSFER_ENCODING).is_none());

        let Some(HttpObject::Content(content)) = channel.read_inbound() else {
            panic!("expected the original chunk");
        };
        assert_eq!(content.payload().to_vec().unwrap(), b"abc");
    }

    #[test]
    fn identity_messages_install_no_decoder() {
        let mut channel = decompressor_channel();
        channel
            .write_inbound(response_head(Response::builder().status(StatusCode::OK)))
            .unwrap();
        channel
            .write_inbound(HttpObject::Last(LastHttpContent::new(
                ByteBuf::copied_from(b"plain"),
                HeaderMap::new(),
            )))
            .unwrap();

        assert!(matches!(channel.read_inbound(), Some(HttpObject::Head(_))));
        let Some(HttpObject::Last(last)) = channel.read_inbound() else {
            panic!("expected the original terminator");
        };
        assert_eq!(last.payload().to_vec().unwrap(), b"plain");
    }

    #[test]
    fn continue_response_passes_through_and_clears_on_last() {
        let mut channel = decompressor_channel();

        channel
            .write_inbound(response_head(Response::builder().status(StatusCode::CONTINUE)))
            .unwrap();
        // while the continue exchange is open, nothing is reinterpreted
        channel
            .write_inbound(HttpObject::Content(HttpContent::new(ByteBuf::copied_from(b"raw"))))
            .unwrap();
        channel
            .write_inbound(HttpObject::Last(LastHttpContent::empty()))
            .unwrap();

        assert!(matches!(channel.read_inbound(), Some(HttpObject::Head(_))));
        let Some(HttpObject::Content(content)) = channel.read_inbound() else {
            panic!("expected untouched content");
        };
        assert_eq!(content.payload().to_vec().unwrap(), b"raw");
        assert!(matches!(channel.read_inbound(), Some(HttpObject::Last(_))));

        // flag cleared: the next compressed message decodes normally
        let compressed = gzip(b"after");
        channel
            .write_inbound(response_head(
                Response::builder().status(StatusCode::OK).header(CONTENT_ENCODING, "gzip"),
            ))
            .unwrap();
        channel
            .write_inbound(HttpObject::Last(LastHttpContent::new(
                ByteBuf::copied_from(&compressed),
                HeaderMap::new(),
            )))
            .unwrap();

        assert!(matches!(channel.read_inbound(), Some(HttpObject::Head(_))));
        let Some(HttpObject::Content(content)) = channel.read_inbound() else {
            panic!("expected decoded content");
        };
        assert_eq!(content.payload().to_vec().unwrap(), b"after");
    }

    #[test]
    fn full_message_splits_into_plain_head_and_decoded_body() {
        let mut channel = decompressor_channel();
        let compressed = gzip(b"aggregated");

        let response = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_ENCODING, "gzip")
            .header(CONTENT_LENGTH, compressed.len().to_string())
            .body(())
            .unwrap();
        channel
            .write_inbound(HttpObject::Full(FullMessage::new(
                Head::Response(response),
                ByteBuf::copied_from(&compressed),
            )))
            .unwrap();

        let Some(HttpObject::Head(head)) = channel.read_inbound() else {
            panic!("expected a plain head, not a terminating object");
        };
        assert_eq!(head.headers().get(TRANSFER_ENCODING).unwrap(), "chunked");
        assert!(head.decoder_result().is_success());

        let Some(HttpObject::Content(content)) = channel.read_inbound() else {
            panic!("expected decoded content");
        };
        assert_eq!(content.payload().to_vec().unwrap(), b"aggregated");
        assert!(matches!(channel.read_inbound(), Some(HttpObject::Last(_))));
    }

    #[test]
    fn trailers_survive_on_the_terminator() {
        let mut channel = decompressor_channel();
        let compressed = gzip(b"body");

        channel
            .write_inbound(response_head(
                Response::builder().status(StatusCode::OK).header(CONTENT_ENCODING, "gzip"),
            ))
            .unwrap();

        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());
        channel
            .write_inbound(HttpObject::Last(LastHttpContent::new(
                ByteBuf::copied_from(&compressed),
                trailers,
            )))
            .unwrap();

        channel.read_inbound().unwrap(); // head
        channel.read_inbound().unwrap(); // content
        let Some(HttpObject::Last(last)) = channel.read_inbound() else {
            panic!("expected a trailer-bearing terminator");
        };
        assert_eq!(last.trailers().get("x-checksum").unwrap(), "abc123");
        assert!(last.decoder_result().is_success());
    }

    #[test]
    fn request_bodies_are_decoded_too() {
        let mut channel = decompressor_channel();
        let compressed = gzip(b"upload");

        let request = Request::builder()
            .method(http::Method::POST)
            .uri("/upload")
            .header(CONTENT_ENCODING, "gzip")
            .body(())
            .unwrap();
        channel.write_inbound(HttpObject::Head(MessageHead::request(request))).unwrap();
        channel
            .write_inbound(HttpObject::Last(LastHttpContent::new(
                ByteBuf::copied_from(&compressed),
                HeaderMap::new(),
            )))
            .unwrap();

        channel.read_inbound().unwrap(); // head
        let Some(HttpObject::Content(content)) = channel.read_inbound() else {
            panic!("expected decoded request body");
        };
        assert_eq!(content.payload().to_vec().unwrap(), b"upload");
    }

    #[test]
    fn empty_decode_output_requests_read_when_not_auto_reading() {
        let mut channel = decompressor_channel();
        channel.config_mut().set_auto_read(false);

        // a gzip head alone produces no output beyond the head itself, but a
        // partial body chunk does: feed only half the stream
        let compressed = gzip(b"partial body bytes");
        channel
            .write_inbound(response_head(
                Response::builder().status(StatusCode::OK).header(CONTENT_ENCODING, "gzip"),
            ))
            .unwrap();
        while channel.read_inbound().is_some() {}

        let before = channel.read_requests();
        channel
            .write_inbound(HttpObject::Content(HttpContent::new(ByteBuf::copied_from(
                &compressed[..5],
            ))))
            .unwrap();
        assert!(channel.read_inbound().is_none());
        assert!(channel.read_requests() > before);
    }
}
