//! Error types for buffer operations.
//!
//! All fallible buffer operations report a [`BufferError`]. Errors are raised
//! synchronously at the call site and never leave a buffer partially mutated:
//! bounds and accessibility are checked before any byte is touched.

use std::io;
use thiserror::Error;

/// Errors raised by [`ByteBuf`](crate::buffer::ByteBuf) operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// An index or index/length pair fell outside the accessible region.
    #[error("index out of range: index {index}, length {length}, capacity {capacity}")]
    IndexOutOfRange { index: usize, length: usize, capacity: usize },

    /// The reference count did not permit the requested operation: the buffer
    /// was already released, a retain would resurrect or overflow it, or a
    /// release would drive the count below zero.
    #[error("illegal reference count: {count}")]
    IllegalReferenceCount { count: usize },

    /// A write would require growing the buffer past its maximum capacity.
    #[error("buffer overflow: {needed} bytes needed, max capacity {max_capacity}")]
    BufferOverflow { needed: usize, max_capacity: usize },

    /// The operation is not supported by this buffer variant.
    #[error("unsupported operation: {reason}")]
    Unsupported { reason: String },

    /// An argument was rejected before the operation started.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// I/O error during a stream-backed bulk transfer.
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl BufferError {
    /// Creates a new IndexOutOfRange error
    pub fn index_out_of_range(index: usize, length: usize, capacity: usize) -> Self {
        Self::IndexOutOfRange { index, length, capacity }
    }

    /// Creates a new IllegalReferenceCount error
    pub fn illegal_reference_count(count: usize) -> Self {
        Self::IllegalReferenceCount { count }
    }

    /// Creates a new BufferOverflow error
    pub fn buffer_overflow(needed: usize, max_capacity: usize) -> Self {
        Self::BufferOverflow { needed, max_capacity }
    }

    /// Creates a new Unsupported error
    pub fn unsupported<S: ToString>(reason: S) -> Self {
        Self::Unsupported { reason: reason.to_string() }
    }

    /// Creates a new InvalidArgument error
    pub fn invalid_argument<S: ToString>(reason: S) -> Self {
        Self::InvalidArgument { reason: reason.to_string() }
    }
}
