//! Reference-counted, zero-copy byte buffers.
//!
//! This module provides the buffer engine the rest of the crate is built on:
//!
//! - [`ByteBuf`]: a polymorphic, random-access byte container with explicit
//!   reference counting, endian-aware primitive access, derived views and
//!   blocking/async stream interop
//! - [`BufAllocator`] / [`Unpooled`]: the allocation seam shared by channels
//! - [`ReferenceCounted`]: the release discipline used by pipeline machinery
//!   for any message type that owns buffers
//!
//! # Lifetime model
//!
//! Buffers are created with a reference count of one. `retain` adds a
//! reference, `release` drops one; the 1→0 transition deallocates the
//! backing storage exactly once and every later operation fails with
//! [`BufferError::IllegalReferenceCount`]. Slices and duplicates share
//! storage with the buffer they derive from and delegate their reference
//! count to it; the retained variants additionally hold a reference so the
//! view keeps its ancestor alive.

mod alloc;
mod byte_buf;
mod composite;
mod error;

pub use alloc::BufAllocator;
pub use alloc::Unpooled;
pub use byte_buf::ByteBuf;
pub use error::BufferError;

/// Messages whose payload is reference-counted.
///
/// Pipeline machinery uses this to release queued messages it drops on the
/// floor (for example in
/// [`EmbeddedChannel::finish_and_release_all`](crate::pipeline::EmbeddedChannel::finish_and_release_all)).
pub trait ReferenceCounted {
    /// Returns the current reference count, or 1 for messages that do not
    /// own a buffer.
    fn reference_count(&self) -> usize;

    /// Releases one reference. Returns `true` when the last reference was
    /// dropped; messages without a buffer payload report `false`.
    fn release(&self) -> Result<bool, BufferError>;
}

impl ReferenceCounted for ByteBuf {
    fn reference_count(&self) -> usize {
        ByteBuf::reference_count(self)
    }

    fn release(&self) -> Result<bool, BufferError> {
        ByteBuf::release(self)
    }
}
