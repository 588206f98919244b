//! Permessage-deflate payload decoding (RFC 7692).
//!
//! The sender strips the trailing `00 00 FF FF` of each deflate block before
//! framing; the decoder appends it back when the final fragment of a message
//! arrives and feeds everything through a raw-deflate inflater hosted in an
//! embedded channel. Output buffers are collected into a composite direct
//! buffer, so reassembly never copies the inflated data.
//!
//! With `no_context_takeover` the inflater is discarded after every message,
//! so no LZ77 window state survives between messages.

use std::sync::OnceLock;

use tracing::warn;

use crate::buffer::{BufferError, ByteBuf};
use crate::codec::{InflateHandler, ZlibWrapper};
use crate::pipeline::{CodecError, EmbeddedChannel, HandlerContext, MessageDecoder};
use crate::websocket::frame::{OpCode, WebSocketFrame, RSV1};

/// Decides whether a given frame is exempt from extension processing.
pub trait ExtensionDecoderFilter: Send {
    /// Returns `true` when the frame must bypass decompression.
    fn must_skip(&self, frame: &WebSocketFrame) -> bool;
}

/// The default filter: every eligible frame is decompressed.
#[derive(Debug, Default)]
pub struct NeverSkip;

impl ExtensionDecoderFilter for NeverSkip {
    fn must_skip(&self, _frame: &WebSocketFrame) -> bool {
        false
    }
}

static FRAME_TAIL: OnceLock<ByteBuf> = OnceLock::new();

/// A duplicate of the shared four-byte deflate trailer; the backing buffer
/// is unreleasable and never consumed.
fn frame_tail() -> Result<ByteBuf, BufferError> {
    FRAME_TAIL
        .get_or_init(|| ByteBuf::copied_from(&[0x00, 0x00, 0xff, 0xff]).unreleasable())
        .duplicate()
}

/// Decodes permessage-deflate compressed frames back into plain frames.
///
/// A message starts with a text or binary frame carrying RSV1; its
/// continuation frames follow without the bit. Each inbound frame is
/// replaced by a frame of the same opcode whose payload is the inflated
/// data and whose RSV1 bit is cleared.
pub struct PerMessageDeflateDecoder {
    decoder: Option<EmbeddedChannel<ByteBuf>>,
    no_context: bool,
    decompressing: bool,
    filter: Box<dyn ExtensionDecoderFilter>,
}

impl PerMessageDeflateDecoder {
    /// Creates a decoder; with `no_context_takeover` the inflater is reset
    /// between messages.
    pub fn new(no_context_takeover: bool) -> Self {
        Self::with_filter(no_context_takeover, Box::new(NeverSkip))
    }

    /// Creates a decoder with a custom extension filter.
    pub fn with_filter(no_context_takeover: bool, filter: Box<dyn ExtensionDecoderFilter>) -> Self {
        Self { decoder: None, no_context: no_context_takeover, decompressing: false, filter }
    }

    /// The trailer is appended when the inflater sees the last fragment of a
    /// message.
    fn append_frame_tail(&self, fin: bool) -> bool {
        fin
    }

    /// The replacement frame drops RSV1; the other reserved bits pass
    /// through.
    fn new_rsv(&self, rsv: u8) -> u8 {
        if rsv & RSV1 != 0 {
            rsv ^ RSV1
        } else {
            rsv
        }
    }

    fn teardown(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            if let Err(e) = decoder.finish_and_release_all() {
                warn!(error = %e, "deflate decoder did not finish cleanly");
            }
        }
    }
}

impl MessageDecoder<WebSocketFrame> for PerMessageDeflateDecoder {
    fn accepts(&self, frame: &WebSocketFrame) -> bool {
        match frame.opcode() {
            OpCode::Text | OpCode::Binary => {
                frame.rsv() & RSV1 != 0 && !self.filter.must_skip(frame)
            }
            OpCode::Continuation => self.decompressing,
            _ => false,
        }
    }

    fn decode(
        &mut self,
        ctx: &mut HandlerContext<WebSocketFrame>,
        frame: WebSocketFrame,
        out: &mut Vec<WebSocketFrame>,
    ) -> Result<(), CodecError> {
        let (fin, rsv, opcode, payload) = frame.into_parts();
        if !matches!(opcode, OpCode::Text | OpCode::Binary | OpCode::Continuation) {
            return Err(CodecError::unexpected_frame_type(opcode));
        }
        if self.decoder.is_none() {
            if !matches!(opcode, OpCode::Text | OpCode::Binary) {
                return Err(CodecError::unexpected_initial_frame_type(opcode));
            }
            self.decoder = Some(EmbeddedChannel::single(InflateHandler::new(ZlibWrapper::None))?);
        }

        let readable = payload.readable_bytes() > 0;
        let append_tail = self.append_frame_tail(fin);
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(CodecError::invalid_argument("deflate decoder not installed"));
        };
        decoder.write_inbound(payload)?;
        if append_tail {
            decoder.write_inbound(frame_tail()?)?;
        }

        let mut inflated = ctx.alloc().composite_direct_buffer();
        while let Some(part) = decoder.read_inbound() {
            if part.is_readable() {
                inflated.add_component(true, part)?;
            } else {
                part.release()?;
            }
        }
        if readable && inflated.component_count() == 0 {
            inflated.release()?;
            return Err(CodecError::CannotReadUncompressed);
        }

        if fin {
            self.decompressing = false;
            if self.no_context {
                self.teardown();
            }
        } else {
            self.decompressing = true;
        }

        out.push(WebSocketFrame::new(fin, self.new_rsv(rsv), opcode, inflated));
        Ok(())
    }

    fn handler_removed(&mut self, _ctx: &mut HandlerContext<WebSocketFrame>) {
        self.teardown();
    }

    fn channel_inactive(&mut self, _ctx: &mut HandlerContext<WebSocketFrame>) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ReferenceCounted;
    use crate::pipeline::MessageDecoderHandler;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Deflates fragments over one shared compression context, issuing a
    /// sync flush per fragment the way a permessage-deflate sender does.
    struct FragmentCompressor {
        encoder: DeflateEncoder<Vec<u8>>,
        taken: usize,
    }

    impl FragmentCompressor {
        fn new() -> Self {
            Self { encoder: DeflateEncoder::new(Vec::new(), Compression::default()), taken: 0 }
        }

        fn fragment(&mut self, data: &[u8]) -> Vec<u8> {
            self.encoder.write_all(data).unwrap();
            self.encoder.flush().unwrap();
            let produced = self.encoder.get_ref()[self.taken..].to_vec();
            self.taken = self.encoder.get_ref().len();
            produced
        }

        /// The last fragment drops the `00 00 FF FF` trailer (RFC 7692 §7.2.1).
        fn last_fragment(&mut self, data: &[u8]) -> Vec<u8> {
            let mut produced = self.fragment(data);
            assert_eq!(&produced[produced.len() - 4..], &[0x00, 0x00, 0xff, 0xff]);
            produced.truncate(produced.len() - 4);
            produced
        }
    }

    fn deflate_channel(no_context: bool) -> crate::pipeline::EmbeddedChannel<WebSocketFrame> {
        crate::pipeline::EmbeddedChannel::single(MessageDecoderHandler::new(
            PerMessageDeflateDecoder::new(no_context),
        ))
        .unwrap()
    }

    fn payload_of(frame: &WebSocketFrame) -> Vec<u8> {
        frame.payload().to_vec().unwrap()
    }

    #[test]
    fn single_compressed_text_frame_round_trips() {
        let mut compressor = FragmentCompressor::new();
        let compressed = compressor.last_fragment(b"Hello WebSocket");

        let mut channel = deflate_channel(false);
        let frame = WebSocketFrame::new(true, RSV1, OpCode::Text, ByteBuf::copied_from(&compressed));
        channel.write_inbound(frame).unwrap();

        let decoded = channel.read_inbound().unwrap();
        assert_eq!(decoded.opcode(), OpCode::Text);
        assert!(decoded.fin());
        assert_eq!(decoded.rsv(), 0);
        assert_eq!(payload_of(&decoded), b"Hello WebSocket");
        decoded.release().unwrap();
    }

    #[test]
    fn fragmented_message_reassembles_per_fragment() {
        let mut compressor = FragmentCompressor::new();
        let part1 = compressor.fragment(b"first ");
        let part2 = compressor.fragment(b"second ");
        let part3 = compressor.last_fragment(b"third");

        let mut channel = deflate_channel(false);
        channel
            .write_inbound(WebSocketFrame::new(false, RSV1, OpCode::Text, ByteBuf::copied_from(&part1)))
            .unwrap();
        channel
            .write_inbound(WebSocketFrame::new(false, 0, OpCode::Continuation, ByteBuf::copied_from(&part2)))
            .unwrap();
        channel
            .write_inbound(WebSocketFrame::new(true, 0, OpCode::Continuation, ByteBuf::copied_from(&part3)))
            .unwrap();

        let first = channel.read_inbound().unwrap();
        assert_eq!(first.opcode(), OpCode::Text);
        assert!(!first.fin());
        assert_eq!(first.rsv(), 0);
        assert_eq!(payload_of(&first), b"first ");

        let second = channel.read_inbound().unwrap();
        assert_eq!(second.opcode(), OpCode::Continuation);
        assert_eq!(payload_of(&second), b"second ");

        let third = channel.read_inbound().unwrap();
        assert!(third.fin());
        assert_eq!(payload_of(&third), b"third");
    }

    #[test]
    fn uncompressed_frames_pass_through() {
        let mut channel = deflate_channel(false);
        let frame = WebSocketFrame::text(ByteBuf::copied_from(b"plain"));
        channel.write_inbound(frame).unwrap();

        let forwarded = channel.read_inbound().unwrap();
        assert_eq!(payload_of(&forwarded), b"plain");
        assert_eq!(forwarded.rsv(), 0);
    }

    #[test]
    fn control_frames_pass_through() {
        let mut channel = deflate_channel(false);
        channel.write_inbound(WebSocketFrame::ping(ByteBuf::copied_from(b"ping"))).unwrap();
        let forwarded = channel.read_inbound().unwrap();
        assert_eq!(forwarded.opcode(), OpCode::Ping);
        assert_eq!(payload_of(&forwarded), b"ping");
    }

    #[test]
    fn compressed_payload_inflating_to_nothing_is_a_protocol_violation() {
        // the empty deflate block: consumes input, inflates to zero bytes
        let mut channel = deflate_channel(false);
        let frame = WebSocketFrame::new(true, RSV1, OpCode::Text, ByteBuf::copied_from(&[0x00]));
        assert!(matches!(
            channel.write_inbound(frame),
            Err(CodecError::CannotReadUncompressed)
        ));
    }

    #[test]
    fn no_context_takeover_matches_fresh_connections() {
        let messages: [&[u8]; 2] = [b"alpha alpha alpha", b"beta beta beta"];

        // one connection, context reset between messages
        let mut shared = deflate_channel(true);
        let mut shared_out = Vec::new();
        for message in messages {
            let mut compressor = FragmentCompressor::new();
            let compressed = compressor.last_fragment(message);
            shared
                .write_inbound(WebSocketFrame::new(true, RSV1, OpCode::Text, ByteBuf::copied_from(&compressed)))
                .unwrap();
            shared_out.push(payload_of(&shared.read_inbound().unwrap()));
        }

        // two fresh connections
        let mut fresh_out = Vec::new();
        for message in messages {
            let mut channel = deflate_channel(true);
            let mut compressor = FragmentCompressor::new();
            let compressed = compressor.last_fragment(message);
            channel
                .write_inbound(WebSocketFrame::new(true, RSV1, OpCode::Text, ByteBuf::copied_from(&compressed)))
                .unwrap();
            fresh_out.push(payload_of(&channel.read_inbound().unwrap()));
        }

        assert_eq!(shared_out, fresh_out);
        assert_eq!(shared_out[0], messages[0]);
        assert_eq!(shared_out[1], messages[1]);
    }

    #[test]
    fn decoded_payload_is_a_composite_direct_buffer() {
        let mut compressor = FragmentCompressor::new();
        let compressed = compressor.last_fragment(b"zero copy");

        let mut channel = deflate_channel(false);
        channel
            .write_inbound(WebSocketFrame::new(true, RSV1, OpCode::Binary, ByteBuf::copied_from(&compressed)))
            .unwrap();

        let decoded = channel.read_inbound().unwrap();
        assert!(decoded.payload().is_composite());
        assert!(decoded.payload().is_direct());
    }
}
