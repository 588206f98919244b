//! Error types for pipeline and codec stages.
//!
//! [`CodecError`] is the error currency of the pipeline: decode failures are
//! routed through `exception_caught` and, when they reach the tail of a
//! pipeline unconsumed, surface as the `Err` of the operation that fed the
//! channel. Buffer-layer failures are wrapped rather than translated so the
//! original cause stays visible.

use std::fmt::Display;
use std::io;
use thiserror::Error;

use crate::buffer::BufferError;

/// Errors raised while decoding messages in a pipeline stage.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A malformed or unprocessable HTTP object reached the decoder.
    #[error("invalid http message: {reason}")]
    InvalidHttpMessage { reason: String },

    /// The first frame of a compressed message had an opcode that cannot
    /// start a message.
    #[error("unexpected initial frame type: {opcode}")]
    UnexpectedInitialFrameType { opcode: String },

    /// A frame with an opcode the decoder cannot process slipped through.
    #[error("unexpected frame type: {opcode}")]
    UnexpectedFrameType { opcode: String },

    /// The inflater consumed compressed bytes but produced no output.
    #[error("unable to read uncompressed buffer")]
    CannotReadUncompressed,

    /// The channel was already finished when a message was written.
    #[error("channel is closed")]
    ClosedChannel,

    /// An argument was rejected before the operation started.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// A buffer operation failed inside the stage.
    #[error("buffer error: {source}")]
    Buffer {
        #[from]
        source: BufferError,
    },

    /// I/O failure inside a hosted codec (for example the inflater).
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl CodecError {
    /// Creates a new InvalidHttpMessage error
    pub fn invalid_http_message<S: ToString>(reason: S) -> Self {
        Self::InvalidHttpMessage { reason: reason.to_string() }
    }

    /// Creates a new UnexpectedInitialFrameType error
    pub fn unexpected_initial_frame_type<S: Display>(opcode: S) -> Self {
        Self::UnexpectedInitialFrameType { opcode: opcode.to_string() }
    }

    /// Creates a new UnexpectedFrameType error
    pub fn unexpected_frame_type<S: Display>(opcode: S) -> Self {
        Self::UnexpectedFrameType { opcode: opcode.to_string() }
    }

    /// Creates a new InvalidArgument error
    pub fn invalid_argument<S: ToString>(reason: S) -> Self {
        Self::InvalidArgument { reason: reason.to_string() }
    }
}
