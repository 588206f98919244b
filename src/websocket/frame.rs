//! WebSocket frame model (RFC 6455 §5).

use std::fmt;

use crate::buffer::{BufferError, ByteBuf, ReferenceCounted};

/// The RSV1 bit: set on the first frame of a permessage-deflate message.
pub const RSV1: u8 = 0b100;
/// The RSV2 bit, reserved for extensions.
pub const RSV2: u8 = 0b010;
/// The RSV3 bit, reserved for extensions.
pub const RSV3: u8 = 0b001;

/// Frame opcodes defined by RFC 6455 §5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

impl OpCode {
    /// Control frames may not be fragmented or compressed.
    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Ping | OpCode::Pong | OpCode::Close)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::Continuation => "continuation",
            OpCode::Text => "text",
            OpCode::Binary => "binary",
            OpCode::Ping => "ping",
            OpCode::Pong => "pong",
            OpCode::Close => "close",
        };
        f.write_str(name)
    }
}

/// A single WebSocket frame owning its payload buffer.
pub struct WebSocketFrame {
    fin: bool,
    rsv: u8,
    opcode: OpCode,
    payload: ByteBuf,
}

impl WebSocketFrame {
    pub fn new(fin: bool, rsv: u8, opcode: OpCode, payload: ByteBuf) -> Self {
        Self { fin, rsv, opcode, payload }
    }

    /// An unfragmented text frame without reserved bits.
    pub fn text(payload: ByteBuf) -> Self {
        Self::new(true, 0, OpCode::Text, payload)
    }

    /// An unfragmented binary frame without reserved bits.
    pub fn binary(payload: ByteBuf) -> Self {
        Self::new(true, 0, OpCode::Binary, payload)
    }

    /// A continuation frame; `fin` marks the final fragment of the message.
    pub fn continuation(fin: bool, payload: ByteBuf) -> Self {
        Self::new(fin, 0, OpCode::Continuation, payload)
    }

    pub fn ping(payload: ByteBuf) -> Self {
        Self::new(true, 0, OpCode::Ping, payload)
    }

    pub fn pong(payload: ByteBuf) -> Self {
        Self::new(true, 0, OpCode::Pong, payload)
    }

    pub fn close(payload: ByteBuf) -> Self {
        Self::new(true, 0, OpCode::Close, payload)
    }

    /// Whether this frame is the final fragment of its message.
    pub fn fin(&self) -> bool {
        self.fin
    }

    /// The three reserved bits, [`RSV1`] being the highest.
    pub fn rsv(&self) -> u8 {
        self.rsv
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn payload(&self) -> &ByteBuf {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut ByteBuf {
        &mut self.payload
    }

    /// Text frames are required to carry valid UTF-8 once reassembled.
    pub fn expects_utf8(&self) -> bool {
        matches!(self.opcode, OpCode::Text)
    }

    pub fn into_payload(self) -> ByteBuf {
        self.payload
    }

    pub fn into_parts(self) -> (bool, u8, OpCode, ByteBuf) {
        (self.fin, self.rsv, self.opcode, self.payload)
    }
}

impl fmt::Debug for WebSocketFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketFrame")
            .field("fin", &self.fin)
            .field("rsv", &self.rsv)
            .field("opcode", &self.opcode)
            .field("payload_bytes", &self.payload.readable_bytes())
            .finish()
    }
}

impl ReferenceCounted for WebSocketFrame {
    fn reference_count(&self) -> usize {
        self.payload.reference_count()
    }

    fn release(&self) -> Result<bool, BufferError> {
        self.payload.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_flags() {
        let frame = WebSocketFrame::text(ByteBuf::copied_from(b"hi"));
        assert!(frame.fin());
        assert_eq!(frame.rsv(), 0);
        assert_eq!(frame.opcode(), OpCode::Text);
        assert!(frame.expects_utf8());

        let fragment = WebSocketFrame::continuation(false, ByteBuf::heap(0));
        assert!(!fragment.fin());
        assert!(!fragment.expects_utf8());
    }

    #[test]
    fn control_opcodes() {
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Continuation.is_control());
    }
}
