//! The reference-counted byte buffer.
//!
//! [`ByteBuf`] is a handle onto a shared buffer cell. The cell carries the
//! storage (heap, direct, or composite), the reader/writer indices with their
//! marks, and an atomic reference count. Handles are deliberately not `Clone`:
//! aliases are only produced by the operations that define the sharing
//! semantics (`retain`, `slice`, `duplicate` and friends), so the explicit
//! reference count stays the single source of truth for buffer lifetime.
//!
//! # Index invariant
//!
//! `0 <= reader_index <= writer_index <= capacity <= max_capacity` holds
//! after every successful operation. Bounds and accessibility are checked
//! before any byte is touched; a failed operation mutates nothing.
//!
//! # Threading
//!
//! Reference count updates are atomic and may race freely across threads.
//! Buffer *contents* follow the channel contract: an individual buffer is
//! accessed from one thread at a time unless explicitly retained and handed
//! over, which is what makes the interior-mutability cell sound.

use std::cell::UnsafeCell;
use std::fmt;
use std::io;
use std::mem;
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::buffer::composite::Composite;
use crate::buffer::BufferError;

/// Capacity growth threshold: below it capacity doubles, above it capacity
/// grows in fixed steps.
const GROWTH_THRESHOLD: usize = 4 * 1024 * 1024;

/// A reference-counted, random-access byte buffer.
///
/// A buffer starts with a reference count of one. [`retain`](ByteBuf::retain)
/// produces an additional owning handle, [`release`](ByteBuf::release) drops
/// one reference; the transition to zero deallocates the backing storage
/// exactly once and makes the buffer permanently inaccessible. Derived views
/// ([`slice`](ByteBuf::slice), [`duplicate`](ByteBuf::duplicate)) share
/// storage and delegate their reference counting to the ancestor they were
/// created from.
pub struct ByteBuf {
    cell: Arc<BufCell>,
    read_only: bool,
    unreleasable: bool,
}

pub(crate) struct BufCell {
    refs: AtomicUsize,
    state: UnsafeCell<BufState>,
}

// Contents are single-threaded per instance (channel contract); the atomic
// reference count is what crosses threads.
unsafe impl Send for BufCell {}
unsafe impl Sync for BufCell {}

pub(crate) struct BufState {
    pub(crate) reader: usize,
    pub(crate) writer: usize,
    pub(crate) reader_mark: usize,
    pub(crate) writer_mark: usize,
    pub(crate) max_capacity: usize,
    pub(crate) storage: Storage,
}

pub(crate) enum Storage {
    /// Growable heap storage.
    Heap(Vec<u8>),
    /// Fixed, stable-address storage.
    Direct(Box<[u8]>),
    /// Ordered list of child buffer windows.
    Composite(Composite),
    /// A slice or duplicate window onto an ancestor buffer.
    Derived { parent: ByteBuf, adjustment: usize, length: usize },
    /// Terminal state after deallocation.
    Freed,
}

impl ByteBuf {
    /// Creates a heap-backed buffer with the given initial capacity and an
    /// unbounded maximum capacity.
    pub fn heap(initial_capacity: usize) -> ByteBuf {
        Self::new_root(Storage::Heap(vec![0; initial_capacity]), usize::MAX)
    }

    /// Creates a heap-backed buffer bounded by `max_capacity`.
    pub fn heap_with_max(initial_capacity: usize, max_capacity: usize) -> Result<ByteBuf, BufferError> {
        if initial_capacity > max_capacity {
            return Err(BufferError::invalid_argument(format!(
                "initial capacity {initial_capacity} exceeds max capacity {max_capacity}"
            )));
        }
        Ok(Self::new_root(Storage::Heap(vec![0; initial_capacity]), max_capacity))
    }

    /// Creates a direct buffer: fixed storage with a stable memory address.
    pub fn direct(initial_capacity: usize) -> ByteBuf {
        Self::new_root(Storage::Direct(vec![0; initial_capacity].into_boxed_slice()), usize::MAX)
    }

    /// Creates a direct buffer bounded by `max_capacity`.
    pub fn direct_with_max(initial_capacity: usize, max_capacity: usize) -> Result<ByteBuf, BufferError> {
        if initial_capacity > max_capacity {
            return Err(BufferError::invalid_argument(format!(
                "initial capacity {initial_capacity} exceeds max capacity {max_capacity}"
            )));
        }
        Ok(Self::new_root(Storage::Direct(vec![0; initial_capacity].into_boxed_slice()), max_capacity))
    }

    /// Creates a heap buffer holding a copy of `src`, ready for reading.
    pub fn copied_from(src: &[u8]) -> ByteBuf {
        let mut buf = Self::new_root(Storage::Heap(src.to_vec()), usize::MAX);
        buf.state_mut().writer = src.len();
        buf
    }

    pub(crate) fn new_root(storage: Storage, max_capacity: usize) -> ByteBuf {
        ByteBuf {
            cell: Arc::new(BufCell {
                refs: AtomicUsize::new(1),
                state: UnsafeCell::new(BufState {
                    reader: 0,
                    writer: 0,
                    reader_mark: 0,
                    writer_mark: 0,
                    max_capacity,
                    storage,
                }),
            }),
            read_only: false,
            unreleasable: false,
        }
    }

    // The only unsafe in this module: interior access to the shared cell.
    // Sound under the single-threaded-contents contract; borrows are kept
    // short and never overlap for the same cell.
    pub(crate) fn state(&self) -> &BufState {
        unsafe { &*self.cell.state.get() }
    }

    #[allow(clippy::mut_from_ref)]
    pub(crate) fn state_mut(&self) -> &mut BufState {
        unsafe { &mut *self.cell.state.get() }
    }

    fn alias(&self) -> ByteBuf {
        ByteBuf { cell: Arc::clone(&self.cell), read_only: self.read_only, unreleasable: self.unreleasable }
    }

    pub(crate) fn same_cell(&self, other: &ByteBuf) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    // ===== reference counting =====

    fn root(&self) -> &ByteBuf {
        match &self.state().storage {
            Storage::Derived { parent, .. } => parent.root(),
            _ => self,
        }
    }

    /// Returns the current reference count. Derived buffers report the count
    /// of the ancestor they share storage with.
    pub fn reference_count(&self) -> usize {
        self.root().cell.refs.load(Ordering::Acquire)
    }

    /// Returns whether the buffer is accessible (reference count above zero).
    pub fn is_accessible(&self) -> bool {
        self.reference_count() > 0
    }

    pub(crate) fn ensure_accessible(&self) -> Result<(), BufferError> {
        if !self.is_accessible() {
            return Err(BufferError::illegal_reference_count(0));
        }
        Ok(())
    }

    /// Increments the reference count by one and returns a new owning handle.
    ///
    /// Fails with [`BufferError::IllegalReferenceCount`] if the count is
    /// already zero (a released buffer is never resurrected) or if the
    /// increment would overflow the counter.
    pub fn retain(&self) -> Result<ByteBuf, BufferError> {
        self.retain_n(1)?;
        Ok(self.alias())
    }

    /// Increments the reference count by `increment`.
    pub fn retain_n(&self, increment: usize) -> Result<(), BufferError> {
        if increment == 0 {
            return Err(BufferError::invalid_argument("increment must be positive"));
        }
        if self.unreleasable {
            return Ok(());
        }
        let refs = &self.root().cell.refs;
        let mut current = refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(BufferError::illegal_reference_count(0));
            }
            let next = match current.checked_add(increment) {
                Some(next) => next,
                None => return Err(BufferError::illegal_reference_count(current)),
            };
            match refs.compare_exchange_weak(current, next, Ordering::Acquire, Ordering::Acquire) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Decrements the reference count by one. Returns `true` when this call
    /// released the last reference and deallocated the buffer.
    pub fn release(&self) -> Result<bool, BufferError> {
        self.release_n(1)
    }

    /// Decrements the reference count by `decrement`.
    pub fn release_n(&self, decrement: usize) -> Result<bool, BufferError> {
        if decrement == 0 {
            return Err(BufferError::invalid_argument("decrement must be positive"));
        }
        if self.unreleasable {
            return Ok(false);
        }
        let root = self.root();
        let refs = &root.cell.refs;
        let mut current = refs.load(Ordering::Acquire);
        loop {
            if current < decrement {
                return Err(BufferError::illegal_reference_count(current));
            }
            let next = current - decrement;
            match refs.compare_exchange_weak(current, next, Ordering::Release, Ordering::Acquire) {
                Ok(_) => {
                    if next == 0 {
                        // The deallocation must happen-after every prior
                        // retain/release on any thread.
                        fence(Ordering::Acquire);
                        root.deallocate();
                        return Ok(true);
                    }
                    return Ok(false);
                }
                Err(observed) => current = observed,
            }
        }
    }

    fn deallocate(&self) {
        let state = self.state_mut();
        if let Storage::Composite(composite) = mem::replace(&mut state.storage, Storage::Freed) {
            for component in composite.components {
                if let Err(e) = component.buf.release() {
                    tracing::warn!(error = %e, "failed to release composite component");
                }
            }
        }
    }

    /// Sets the reference count to an absolute value, bypassing the normal
    /// retain/release rules. Only for initialisation of storage that reuses
    /// cells; not part of the public contract.
    #[allow(unused)]
    pub(crate) fn set_reference_count(&self, value: usize) {
        self.root().cell.refs.store(value, Ordering::Release);
    }

    /// Resets the reference count to one. See [`Self::set_reference_count`].
    #[allow(unused)]
    pub(crate) fn reset_reference_count(&self) {
        self.set_reference_count(1);
    }

    // ===== capacity and indices =====

    /// Returns the current capacity in bytes.
    pub fn capacity(&self) -> usize {
        match &self.state().storage {
            Storage::Heap(mem) => mem.len(),
            Storage::Direct(mem) => mem.len(),
            Storage::Composite(composite) => composite.capacity(),
            Storage::Derived { length, .. } => *length,
            Storage::Freed => 0,
        }
    }

    /// Returns the maximum capacity this buffer may grow to.
    pub fn max_capacity(&self) -> usize {
        self.state().max_capacity
    }

    pub fn reader_index(&self) -> usize {
        self.state().reader
    }

    pub fn writer_index(&self) -> usize {
        self.state().writer
    }

    /// Moves the reader index. The new index must not pass the writer index.
    pub fn set_reader_index(&mut self, index: usize) -> Result<(), BufferError> {
        self.ensure_accessible()?;
        let state = self.state_mut();
        if index > state.writer {
            return Err(BufferError::index_out_of_range(index, 0, state.writer));
        }
        state.reader = index;
        Ok(())
    }

    /// Moves the writer index. The new index must lie between the reader
    /// index and the capacity.
    pub fn set_writer_index(&mut self, index: usize) -> Result<(), BufferError> {
        self.ensure_accessible()?;
        let capacity = self.capacity();
        let state = self.state_mut();
        if index < state.reader || index > capacity {
            return Err(BufferError::index_out_of_range(index, 0, capacity));
        }
        state.writer = index;
        Ok(())
    }

    /// Sets both indices at once.
    pub fn set_index(&mut self, reader: usize, writer: usize) -> Result<(), BufferError> {
        self.ensure_accessible()?;
        let capacity = self.capacity();
        if reader > writer || writer > capacity {
            return Err(BufferError::index_out_of_range(reader, writer.saturating_sub(reader), capacity));
        }
        let state = self.state_mut();
        state.reader = reader;
        state.writer = writer;
        Ok(())
    }

    pub fn readable_bytes(&self) -> usize {
        let state = self.state();
        state.writer - state.reader
    }

    pub fn writable_bytes(&self) -> usize {
        self.capacity() - self.state().writer
    }

    pub fn is_readable(&self) -> bool {
        self.readable_bytes() > 0
    }

    pub fn is_writable(&self) -> bool {
        self.writable_bytes() > 0
    }

    /// Resets both indices to zero. The contents are untouched.
    pub fn clear(&mut self) -> Result<(), BufferError> {
        self.ensure_accessible()?;
        let state = self.state_mut();
        state.reader = 0;
        state.writer = 0;
        Ok(())
    }

    pub fn mark_reader_index(&mut self) {
        let state = self.state_mut();
        state.reader_mark = state.reader;
    }

    /// Moves the reader index back to the marked position.
    pub fn reset_reader_index(&mut self) -> Result<(), BufferError> {
        let mark = self.state().reader_mark;
        self.set_reader_index(mark)
    }

    pub fn mark_writer_index(&mut self) {
        let state = self.state_mut();
        state.writer_mark = state.writer;
    }

    /// Moves the writer index back to the marked position.
    pub fn reset_writer_index(&mut self) -> Result<(), BufferError> {
        let mark = self.state().writer_mark;
        self.set_writer_index(mark)
    }

    /// Discards the bytes before the reader index, compacting the readable
    /// region to the front of the buffer. Marks are shifted accordingly.
    pub fn discard_read_bytes(&mut self) -> Result<(), BufferError> {
        self.ensure_accessible()?;
        if self.read_only {
            return Err(BufferError::unsupported("buffer is read-only"));
        }
        let (reader, writer) = {
            let state = self.state();
            (state.reader, state.writer)
        };
        if reader == 0 {
            return Ok(());
        }
        let readable = writer - reader;
        if readable > 0 {
            let mut pending = vec![0u8; readable];
            self.read_into(reader, &mut pending)?;
            self.write_from(0, &pending)?;
        }
        let state = self.state_mut();
        state.reader_mark = state.reader_mark.saturating_sub(reader);
        state.writer_mark = state.writer_mark.saturating_sub(reader);
        state.reader = 0;
        state.writer = readable;
        Ok(())
    }

    /// Ensures at least `needed` writable bytes, growing the buffer up to its
    /// maximum capacity if necessary.
    pub fn ensure_writable(&mut self, needed: usize) -> Result<(), BufferError> {
        self.ensure_accessible()?;
        if self.read_only {
            return Err(BufferError::unsupported("buffer is read-only"));
        }
        if self.writable_bytes() >= needed {
            return Ok(());
        }
        let writer = self.state().writer;
        let max_capacity = self.max_capacity();
        let target = match writer.checked_add(needed) {
            Some(target) if target <= max_capacity => target,
            Some(target) => return Err(BufferError::buffer_overflow(target, max_capacity)),
            None => return Err(BufferError::buffer_overflow(usize::MAX, max_capacity)),
        };
        if matches!(self.state().storage, Storage::Composite(_)) {
            let additional = target - self.capacity();
            return self.extend_composite_capacity(additional);
        }
        match &mut self.state_mut().storage {
            Storage::Heap(mem) => {
                let new_capacity = calculate_new_capacity(target, max_capacity);
                mem.resize(new_capacity, 0);
                Ok(())
            }
            Storage::Direct(mem) => {
                let new_capacity = calculate_new_capacity(target, max_capacity);
                let mut grown = vec![0u8; new_capacity].into_boxed_slice();
                grown[..mem.len()].copy_from_slice(mem);
                *mem = grown;
                Ok(())
            }
            _ => Err(BufferError::buffer_overflow(target, max_capacity)),
        }
    }

    // ===== raw region access =====

    pub(crate) fn check_range(&self, index: usize, length: usize) -> Result<(), BufferError> {
        let capacity = self.capacity();
        match index.checked_add(length) {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(BufferError::index_out_of_range(index, length, capacity)),
        }
    }

    /// Copies `dst.len()` bytes starting at `index` into `dst`.
    pub(crate) fn read_into(&self, index: usize, dst: &mut [u8]) -> Result<(), BufferError> {
        self.ensure_accessible()?;
        self.check_range(index, dst.len())?;
        if dst.is_empty() {
            return Ok(());
        }
        match &self.state().storage {
            Storage::Heap(mem) => {
                dst.copy_from_slice(&mem[index..index + dst.len()]);
                Ok(())
            }
            Storage::Direct(mem) => {
                dst.copy_from_slice(&mem[index..index + dst.len()]);
                Ok(())
            }
            Storage::Composite(composite) => composite.read_into(index, dst),
            Storage::Derived { parent, adjustment, .. } => parent.read_into(index + adjustment, dst),
            Storage::Freed => Err(BufferError::illegal_reference_count(0)),
        }
    }

    /// Copies `src` into the buffer starting at `index`.
    pub(crate) fn write_from(&mut self, index: usize, src: &[u8]) -> Result<(), BufferError> {
        self.ensure_accessible()?;
        if self.read_only {
            return Err(BufferError::unsupported("buffer is read-only"));
        }
        self.check_range(index, src.len())?;
        if src.is_empty() {
            return Ok(());
        }
        match &mut self.state_mut().storage {
            Storage::Heap(mem) => {
                mem[index..index + src.len()].copy_from_slice(src);
                Ok(())
            }
            Storage::Direct(mem) => {
                mem[index..index + src.len()].copy_from_slice(src);
                Ok(())
            }
            Storage::Composite(composite) => composite.write_from(index, src),
            Storage::Derived { parent, adjustment, .. } => parent.write_from(index + *adjustment, src),
            Storage::Freed => Err(BufferError::illegal_reference_count(0)),
        }
    }

    // ===== bulk transfer =====

    /// Copies bytes at `index` into `dst` without moving the reader index.
    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<(), BufferError> {
        self.read_into(index, dst)
    }

    /// Copies `src` into the buffer at `index` without moving the writer
    /// index.
    pub fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<(), BufferError> {
        self.write_from(index, src)
    }

    /// Copies `length` bytes at `index` into `dst`, advancing `dst`'s writer
    /// index.
    pub fn get_buf(&self, index: usize, dst: &mut ByteBuf, length: usize) -> Result<(), BufferError> {
        let mut transfer = vec![0u8; length];
        self.read_into(index, &mut transfer)?;
        dst.write_bytes(&transfer)
    }

    /// Copies `length` readable bytes from `src` into the buffer at `index`,
    /// advancing `src`'s reader index.
    pub fn set_buf(&mut self, index: usize, src: &mut ByteBuf, length: usize) -> Result<(), BufferError> {
        let mut transfer = vec![0u8; length];
        src.read_bytes(&mut transfer)?;
        self.write_from(index, &transfer)
    }

    /// Reads `dst.len()` bytes from the readable region, advancing the reader
    /// index.
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<(), BufferError> {
        self.ensure_accessible()?;
        let reader = self.reader_index();
        if dst.len() > self.readable_bytes() {
            return Err(BufferError::index_out_of_range(reader, dst.len(), self.writer_index()));
        }
        self.read_into(reader, dst)?;
        self.state_mut().reader = reader + dst.len();
        Ok(())
    }

    /// Reads `length` bytes into a fresh heap buffer, advancing the reader
    /// index.
    pub fn read_bytes_buf(&mut self, length: usize) -> Result<ByteBuf, BufferError> {
        let mut transfer = vec![0u8; length];
        self.read_bytes(&mut transfer)?;
        Ok(ByteBuf::copied_from(&transfer))
    }

    /// Appends `src` to the writable region, growing if necessary, and
    /// advances the writer index.
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<(), BufferError> {
        self.ensure_writable(src.len())?;
        let writer = self.writer_index();
        self.write_from(writer, src)?;
        self.state_mut().writer = writer + src.len();
        Ok(())
    }

    /// Appends all readable bytes of `src`, advancing both buffers' indices.
    pub fn write_buf(&mut self, src: &mut ByteBuf) -> Result<(), BufferError> {
        let mut transfer = vec![0u8; src.readable_bytes()];
        src.read_bytes(&mut transfer)?;
        self.write_bytes(&transfer)
    }

    /// Fills `length` bytes at `index` with zeroes.
    pub fn set_zero(&mut self, index: usize, length: usize) -> Result<(), BufferError> {
        self.write_from(index, &vec![0u8; length])
    }

    /// Appends `length` zero bytes, advancing the writer index.
    pub fn write_zero(&mut self, length: usize) -> Result<(), BufferError> {
        self.write_bytes(&vec![0u8; length])
    }

    /// Reads up to `length` bytes from a blocking stream into the buffer at
    /// `index` with a single read call. Returns the number of bytes
    /// transferred; indices do not move.
    pub fn set_from_reader<R: io::Read>(
        &mut self,
        index: usize,
        src: &mut R,
        length: usize,
    ) -> Result<usize, BufferError> {
        self.ensure_accessible()?;
        self.check_range(index, length)?;
        let mut transfer = vec![0u8; length];
        let n = src.read(&mut transfer)?;
        if n > 0 {
            self.write_from(index, &transfer[..n])?;
        }
        Ok(n)
    }

    /// Writes `length` bytes at `index` to a blocking stream.
    pub fn get_to_writer<W: io::Write>(
        &self,
        index: usize,
        dst: &mut W,
        length: usize,
    ) -> Result<(), BufferError> {
        let mut transfer = vec![0u8; length];
        self.read_into(index, &mut transfer)?;
        dst.write_all(&transfer)?;
        Ok(())
    }

    /// Reads up to `length` bytes from an asynchronous stream into the buffer
    /// at `index` with a single read. Cancelling the returned future before
    /// the read completes leaves the buffer untouched; a partial transfer is
    /// observable but indices never move.
    pub async fn set_from_async_reader<R: AsyncRead + Unpin>(
        &mut self,
        index: usize,
        src: &mut R,
        length: usize,
    ) -> Result<usize, BufferError> {
        self.ensure_accessible()?;
        self.check_range(index, length)?;
        let mut transfer = vec![0u8; length];
        let n = src.read(&mut transfer).await?;
        if n > 0 {
            self.write_from(index, &transfer[..n])?;
        }
        Ok(n)
    }

    /// Writes `length` bytes at `index` to an asynchronous stream.
    pub async fn get_to_async_writer<W: AsyncWrite + Unpin>(
        &self,
        index: usize,
        dst: &mut W,
        length: usize,
    ) -> Result<(), BufferError> {
        let mut transfer = vec![0u8; length];
        self.read_into(index, &mut transfer)?;
        dst.write_all(&transfer).await?;
        Ok(())
    }

    // ===== views =====

    /// Returns an independent copy of `length` bytes starting at `index`.
    /// The copy has its own storage, indices and reference count.
    pub fn copy(&self, index: usize, length: usize) -> Result<ByteBuf, BufferError> {
        let mut transfer = vec![0u8; length];
        self.read_into(index, &mut transfer)?;
        let mut copied = if self.is_direct() { ByteBuf::direct(length) } else { ByteBuf::heap(length) };
        copied.write_bytes(&transfer)?;
        Ok(copied)
    }

    /// Returns a derived buffer over `[index, index + length)` sharing this
    /// buffer's storage. The slice has independent indices and delegates its
    /// reference count to this buffer without retaining it.
    pub fn slice(&self, index: usize, length: usize) -> Result<ByteBuf, BufferError> {
        self.ensure_accessible()?;
        self.check_range(index, length)?;
        let mut derived = ByteBuf::new_root(
            Storage::Derived { parent: self.alias(), adjustment: index, length },
            length,
        );
        derived.read_only = self.read_only;
        derived.unreleasable = self.unreleasable;
        derived.state_mut().writer = length;
        Ok(derived)
    }

    /// Like [`slice`](Self::slice), but also retains this buffer so the
    /// returned view carries its own reference.
    pub fn retained_slice(&self, index: usize, length: usize) -> Result<ByteBuf, BufferError> {
        let derived = self.slice(index, length)?;
        self.retain_n(1)?;
        Ok(derived)
    }

    /// Returns a derived buffer covering the whole capacity with zero
    /// adjustment; reader and writer indices are copied from this buffer at
    /// creation time.
    pub fn duplicate(&self) -> Result<ByteBuf, BufferError> {
        self.ensure_accessible()?;
        let capacity = self.capacity();
        let mut derived = ByteBuf::new_root(
            Storage::Derived { parent: self.alias(), adjustment: 0, length: capacity },
            capacity,
        );
        derived.read_only = self.read_only;
        derived.unreleasable = self.unreleasable;
        {
            let source = self.state();
            let state = derived.state_mut();
            state.reader = source.reader;
            state.writer = source.writer;
            state.reader_mark = source.reader_mark;
            state.writer_mark = source.writer_mark;
        }
        Ok(derived)
    }

    /// Like [`duplicate`](Self::duplicate), but also retains this buffer.
    pub fn retained_duplicate(&self) -> Result<ByteBuf, BufferError> {
        let derived = self.duplicate()?;
        self.retain_n(1)?;
        Ok(derived)
    }

    /// Returns a read-only view sharing this buffer's storage, indices and
    /// reference count. Mutating operations on the view fail with
    /// [`BufferError::Unsupported`].
    pub fn as_read_only(&self) -> ByteBuf {
        let mut view = self.alias();
        view.read_only = true;
        view
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Wraps this handle so that `release` and `retain` become no-ops,
    /// keeping the reference count at its current value for the lifetime of
    /// the wrapper.
    pub fn unreleasable(mut self) -> ByteBuf {
        self.unreleasable = true;
        self
    }

    pub fn is_unreleasable(&self) -> bool {
        self.unreleasable
    }

    // ===== introspection =====

    /// Returns whether the backing storage is direct (stable address).
    pub fn is_direct(&self) -> bool {
        match &self.state().storage {
            Storage::Direct(_) => true,
            Storage::Composite(composite) => composite.direct,
            Storage::Derived { parent, .. } => parent.is_direct(),
            _ => false,
        }
    }

    /// Returns whether a stable memory address can be obtained for this
    /// buffer's storage.
    pub fn has_memory_address(&self) -> bool {
        match &self.state().storage {
            Storage::Direct(_) => true,
            Storage::Derived { parent, .. } => parent.has_memory_address(),
            _ => false,
        }
    }

    /// Returns the address of the first byte of the backing region.
    pub fn memory_address(&self) -> Result<*const u8, BufferError> {
        self.ensure_accessible()?;
        match &self.state().storage {
            Storage::Direct(mem) => Ok(mem.as_ptr()),
            Storage::Derived { parent, adjustment, .. } => {
                parent.memory_address().map(|base| base.wrapping_add(*adjustment))
            }
            _ => Err(BufferError::unsupported("buffer has no stable memory address")),
        }
    }

    /// Copies the readable region into a `Vec<u8>`.
    pub fn to_vec(&self) -> Result<Vec<u8>, BufferError> {
        let mut readable = vec![0u8; self.readable_bytes()];
        self.read_into(self.reader_index(), &mut readable)?;
        Ok(readable)
    }

    /// Copies the readable region into a [`Bytes`] snapshot.
    pub fn to_bytes(&self) -> Result<Bytes, BufferError> {
        Ok(Bytes::from(self.to_vec()?))
    }
}

impl fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuf")
            .field("reader_index", &self.reader_index())
            .field("writer_index", &self.writer_index())
            .field("capacity", &self.capacity())
            .field("reference_count", &self.reference_count())
            .finish()
    }
}

fn calculate_new_capacity(target: usize, max_capacity: usize) -> usize {
    if target >= GROWTH_THRESHOLD {
        // Grow in fixed steps above the threshold to bound over-allocation.
        let aligned = target / GROWTH_THRESHOLD * GROWTH_THRESHOLD;
        let grown = if aligned > max_capacity - GROWTH_THRESHOLD { max_capacity } else { aligned + GROWTH_THRESHOLD };
        return grown.min(max_capacity).max(target);
    }
    let mut capacity = 64;
    while capacity < target {
        capacity <<= 1;
    }
    capacity.min(max_capacity)
}

// ===== endian primitives =====

macro_rules! primitive_accessors {
    ($get_name:ident, $set_name:ident, $read_name:ident, $write_name:ident, $ty:ty, from_be) => {
        primitive_accessors!(@impl $get_name, $set_name, $read_name, $write_name, $ty, from_be_bytes, to_be_bytes);
    };
    ($get_name:ident, $set_name:ident, $read_name:ident, $write_name:ident, $ty:ty, from_le) => {
        primitive_accessors!(@impl $get_name, $set_name, $read_name, $write_name, $ty, from_le_bytes, to_le_bytes);
    };
    (@impl $get_name:ident, $set_name:ident, $read_name:ident, $write_name:ident, $ty:ty, $from:ident, $to:ident) => {
        /// Random-access load at `index`; no index movement.
        pub fn $get_name(&self, index: usize) -> Result<$ty, BufferError> {
            let mut bytes = [0u8; mem::size_of::<$ty>()];
            self.read_into(index, &mut bytes)?;
            Ok(<$ty>::$from(bytes))
        }

        /// Random-access store at `index`; no index movement.
        pub fn $set_name(&mut self, index: usize, value: $ty) -> Result<(), BufferError> {
            self.write_from(index, &value.$to())
        }

        /// Reads the value at the reader index and advances it.
        pub fn $read_name(&mut self) -> Result<$ty, BufferError> {
            let mut bytes = [0u8; mem::size_of::<$ty>()];
            self.read_bytes(&mut bytes)?;
            Ok(<$ty>::$from(bytes))
        }

        /// Writes the value at the writer index and advances it, growing the
        /// buffer if needed.
        pub fn $write_name(&mut self, value: $ty) -> Result<(), BufferError> {
            self.write_bytes(&value.$to())
        }
    };
}

impl ByteBuf {
    primitive_accessors!(get_u8, set_u8, read_u8, write_u8, u8, from_be);
    primitive_accessors!(get_i8, set_i8, read_i8, write_i8, i8, from_be);
    primitive_accessors!(get_u16, set_u16, read_u16, write_u16, u16, from_be);
    primitive_accessors!(get_u16_le, set_u16_le, read_u16_le, write_u16_le, u16, from_le);
    primitive_accessors!(get_i16, set_i16, read_i16, write_i16, i16, from_be);
    primitive_accessors!(get_i16_le, set_i16_le, read_i16_le, write_i16_le, i16, from_le);
    primitive_accessors!(get_u32, set_u32, read_u32, write_u32, u32, from_be);
    primitive_accessors!(get_u32_le, set_u32_le, read_u32_le, write_u32_le, u32, from_le);
    primitive_accessors!(get_i32, set_i32, read_i32, write_i32, i32, from_be);
    primitive_accessors!(get_i32_le, set_i32_le, read_i32_le, write_i32_le, i32, from_le);
    primitive_accessors!(get_u64, set_u64, read_u64, write_u64, u64, from_be);
    primitive_accessors!(get_u64_le, set_u64_le, read_u64_le, write_u64_le, u64, from_le);
    primitive_accessors!(get_i64, set_i64, read_i64, write_i64, i64, from_be);
    primitive_accessors!(get_i64_le, set_i64_le, read_i64_le, write_i64_le, i64, from_le);

    /// Loads a big-endian unsigned 24-bit integer, zero-extended to 32 bits.
    pub fn get_u24(&self, index: usize) -> Result<u32, BufferError> {
        let mut bytes = [0u8; 3];
        self.read_into(index, &mut bytes)?;
        Ok(u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2]))
    }

    /// Loads a little-endian unsigned 24-bit integer, zero-extended to 32
    /// bits.
    pub fn get_u24_le(&self, index: usize) -> Result<u32, BufferError> {
        let mut bytes = [0u8; 3];
        self.read_into(index, &mut bytes)?;
        Ok(u32::from(bytes[2]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[0]))
    }

    /// Loads a big-endian signed 24-bit integer, sign-extended to 32 bits.
    pub fn get_i24(&self, index: usize) -> Result<i32, BufferError> {
        Ok((self.get_u24(index)? as i32) << 8 >> 8)
    }

    /// Loads a little-endian signed 24-bit integer, sign-extended to 32 bits.
    pub fn get_i24_le(&self, index: usize) -> Result<i32, BufferError> {
        Ok((self.get_u24_le(index)? as i32) << 8 >> 8)
    }

    /// Stores the low 24 bits of `value` big-endian at `index`.
    pub fn set_u24(&mut self, index: usize, value: u32) -> Result<(), BufferError> {
        let bytes = [(value >> 16) as u8, (value >> 8) as u8, value as u8];
        self.write_from(index, &bytes)
    }

    /// Stores the low 24 bits of `value` little-endian at `index`.
    pub fn set_u24_le(&mut self, index: usize, value: u32) -> Result<(), BufferError> {
        let bytes = [value as u8, (value >> 8) as u8, (value >> 16) as u8];
        self.write_from(index, &bytes)
    }

    /// Stores the low 24 bits of `value` big-endian at `index`.
    pub fn set_i24(&mut self, index: usize, value: i32) -> Result<(), BufferError> {
        self.set_u24(index, value as u32 & 0x00ff_ffff)
    }

    /// Stores the low 24 bits of `value` little-endian at `index`.
    pub fn set_i24_le(&mut self, index: usize, value: i32) -> Result<(), BufferError> {
        self.set_u24_le(index, value as u32 & 0x00ff_ffff)
    }

    /// Reads a big-endian unsigned 24-bit integer, advancing the reader.
    pub fn read_u24(&mut self) -> Result<u32, BufferError> {
        let mut bytes = [0u8; 3];
        self.read_bytes(&mut bytes)?;
        Ok(u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2]))
    }

    /// Writes a big-endian unsigned 24-bit integer, advancing the writer.
    pub fn write_u24(&mut self, value: u32) -> Result<(), BufferError> {
        self.write_bytes(&[(value >> 16) as u8, (value >> 8) as u8, value as u8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_index_invariant(buf: &ByteBuf) {
        assert!(buf.reader_index() <= buf.writer_index());
        assert!(buf.writer_index() <= buf.capacity());
        assert!(buf.capacity() <= buf.max_capacity());
    }

    #[test]
    fn endian_round_trips() {
        let mut buf = ByteBuf::heap(64);
        buf.write_u16(0xCAFE).unwrap();
        buf.write_u16_le(0xCAFE).unwrap();
        buf.write_u32(0xDEADBEEF).unwrap();
        buf.write_u64_le(0x0123_4567_89AB_CDEF).unwrap();
        buf.write_i32_le(-7).unwrap();

        assert_eq!(buf.read_u16().unwrap(), 0xCAFE);
        assert_eq!(buf.read_u16_le().unwrap(), 0xCAFE);
        assert_eq!(buf.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(buf.read_u64_le().unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(buf.read_i32_le().unwrap(), -7);
        assert_index_invariant(&buf);
    }

    #[test]
    fn cross_endian_reads_byte_swap() {
        let mut buf = ByteBuf::heap(8);
        buf.set_u16(0, 0x1234).unwrap();
        assert_eq!(buf.get_u16_le(0).unwrap(), 0x3412);

        buf.set_u32(0, 0x0102_0304).unwrap();
        assert_eq!(buf.get_u32_le(0).unwrap(), 0x0403_0201);
    }

    #[test]
    fn medium_accessors_extend_correctly() {
        let mut buf = ByteBuf::heap(8);
        buf.set_u24(0, 0x00FF_FFFF).unwrap();
        assert_eq!(buf.get_u24(0).unwrap(), 0x00FF_FFFF);
        assert_eq!(buf.get_i24(0).unwrap(), -1);

        buf.set_u24_le(0, 0x00AB_CDEF).unwrap();
        assert_eq!(buf.get_u24_le(0).unwrap(), 0x00AB_CDEF);

        buf.set_i24(0, -2).unwrap();
        assert_eq!(buf.get_i24(0).unwrap(), -2);
        assert_eq!(buf.get_u24(0).unwrap(), 0x00FF_FFFE);
    }

    #[test]
    fn bounds_checked_before_mutation() {
        let mut buf = ByteBuf::heap(4);
        buf.write_bytes(&[1, 2, 3, 4]).unwrap();

        assert!(matches!(buf.get_u32(1), Err(BufferError::IndexOutOfRange { .. })));
        assert!(matches!(buf.set_u16(3, 7), Err(BufferError::IndexOutOfRange { .. })));
        // nothing was mutated by the failed set
        assert_eq!(buf.to_vec().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn retain_release_round_trip() {
        let buf = ByteBuf::heap(16);
        assert_eq!(buf.reference_count(), 1);

        buf.retain_n(3).unwrap();
        assert_eq!(buf.reference_count(), 4);
        assert!(!buf.release_n(3).unwrap());
        assert_eq!(buf.reference_count(), 1);

        assert!(buf.release().unwrap());
        assert!(!buf.is_accessible());
    }

    #[test]
    fn released_buffer_rejects_everything() {
        let mut buf = ByteBuf::heap(16);
        buf.release().unwrap();

        assert!(matches!(buf.get_u8(0), Err(BufferError::IllegalReferenceCount { count: 0 })));
        assert!(matches!(buf.write_u8(1), Err(BufferError::IllegalReferenceCount { count: 0 })));
        assert!(matches!(buf.retain(), Err(BufferError::IllegalReferenceCount { count: 0 })));
        assert!(matches!(buf.release(), Err(BufferError::IllegalReferenceCount { count: 0 })));
    }

    #[test]
    fn release_more_than_held_fails() {
        let buf = ByteBuf::heap(4);
        assert!(matches!(buf.release_n(2), Err(BufferError::IllegalReferenceCount { count: 1 })));
        // the failed release left the count untouched
        assert_eq!(buf.reference_count(), 1);
    }

    #[test]
    fn reference_count_escape_hatches() {
        let buf = ByteBuf::heap(4);
        buf.set_reference_count(5);
        assert_eq!(buf.reference_count(), 5);
        buf.reset_reference_count();
        assert_eq!(buf.reference_count(), 1);
    }

    #[test]
    fn slice_shares_storage_with_independent_indices() {
        let mut buf = ByteBuf::heap(16);
        buf.write_bytes(b"hello world").unwrap();

        let mut sliced = buf.slice(6, 5).unwrap();
        assert_eq!(sliced.readable_bytes(), 5);
        assert_eq!(sliced.to_vec().unwrap(), b"world");

        // writes through the slice are visible in the parent
        sliced.set_u8(0, b'W').unwrap();
        assert_eq!(buf.get_u8(6).unwrap(), b'W');

        // slice indices move independently
        sliced.read_u8().unwrap();
        assert_eq!(buf.reader_index(), 0);
    }

    #[test]
    fn retained_slice_keeps_parent_alive() {
        let mut buf = ByteBuf::heap(8);
        buf.write_bytes(b"abcd").unwrap();

        let sliced = buf.retained_slice(0, 4).unwrap();
        assert_eq!(buf.reference_count(), 2);

        assert!(!buf.release().unwrap());
        assert!(sliced.is_accessible());
        assert_eq!(sliced.to_vec().unwrap(), b"abcd");

        assert!(sliced.release().unwrap());
        assert!(!sliced.is_accessible());
    }

    #[test]
    fn duplicate_copies_indices_zero_based() {
        let mut buf = ByteBuf::heap(8);
        buf.write_bytes(b"abcdef").unwrap();
        buf.read_u8().unwrap();

        let dup = buf.duplicate().unwrap();
        assert_eq!(dup.reader_index(), 1);
        assert_eq!(dup.writer_index(), 6);
        assert_eq!(dup.to_vec().unwrap(), b"bcdef");
        assert_eq!(dup.reference_count(), buf.reference_count());
    }

    #[test]
    fn copy_is_independent() {
        let mut buf = ByteBuf::heap(8);
        buf.write_bytes(b"abcd").unwrap();

        let mut copied = buf.copy(0, 4).unwrap();
        copied.set_u8(0, b'X').unwrap();
        assert_eq!(buf.get_u8(0).unwrap(), b'a');
        assert_eq!(copied.reference_count(), 1);

        buf.release().unwrap();
        assert!(copied.is_accessible());
    }

    #[test]
    fn read_only_view_rejects_mutation() {
        let mut buf = ByteBuf::heap(8);
        buf.write_bytes(b"ab").unwrap();

        let mut view = buf.as_read_only();
        assert!(matches!(view.set_u8(0, 1), Err(BufferError::Unsupported { .. })));
        assert!(matches!(view.write_u8(1), Err(BufferError::Unsupported { .. })));
        assert_eq!(view.get_u8(0).unwrap(), b'a');

        // the original handle still writes
        buf.set_u8(0, b'z').unwrap();
        assert_eq!(view.get_u8(0).unwrap(), b'z');
    }

    #[test]
    fn unreleasable_wrapper_pins_reference_count() {
        let buf = ByteBuf::heap(8).unreleasable();
        assert!(!buf.release().unwrap());
        assert!(!buf.release().unwrap());
        assert_eq!(buf.reference_count(), 1);
        assert!(buf.is_accessible());
    }

    #[test]
    fn marks_and_discard() {
        let mut buf = ByteBuf::heap(16);
        buf.write_bytes(b"0123456789").unwrap();
        buf.read_bytes(&mut [0u8; 4]).unwrap();

        buf.mark_reader_index();
        buf.read_u8().unwrap();
        buf.reset_reader_index().unwrap();
        assert_eq!(buf.reader_index(), 4);

        buf.discard_read_bytes().unwrap();
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.to_vec().unwrap(), b"456789");
        assert_index_invariant(&buf);
    }

    #[test]
    fn ensure_writable_grows_until_max() {
        let mut buf = ByteBuf::heap_with_max(4, 32).unwrap();
        buf.write_bytes(&[0; 4]).unwrap();
        buf.ensure_writable(10).unwrap();
        assert!(buf.writable_bytes() >= 10);
        assert!(buf.capacity() <= 32);

        assert!(matches!(buf.ensure_writable(64), Err(BufferError::BufferOverflow { .. })));
    }

    #[test]
    fn write_grows_automatically() {
        let mut buf = ByteBuf::heap(2);
        buf.write_u64(42).unwrap();
        assert_eq!(buf.read_u64().unwrap(), 42);
    }

    #[test]
    fn direct_buffer_has_memory_address() {
        let direct = ByteBuf::direct(8);
        assert!(direct.has_memory_address());
        assert!(!direct.memory_address().unwrap().is_null());

        let heap = ByteBuf::heap(8);
        assert!(!heap.has_memory_address());
        assert!(matches!(heap.memory_address(), Err(BufferError::Unsupported { .. })));
    }

    #[test]
    fn slice_of_direct_offsets_address() {
        let mut direct = ByteBuf::direct(8);
        direct.write_bytes(b"abcdef").unwrap();
        let sliced = direct.slice(2, 3).unwrap();
        let base = direct.memory_address().unwrap() as usize;
        assert_eq!(sliced.memory_address().unwrap() as usize, base + 2);
    }

    #[test]
    fn set_zero_and_write_zero() {
        let mut buf = ByteBuf::heap(8);
        buf.write_bytes(&[0xFF; 8]).unwrap();
        buf.set_zero(2, 4).unwrap();
        assert_eq!(buf.to_vec().unwrap(), vec![0xFF, 0xFF, 0, 0, 0, 0, 0xFF, 0xFF]);

        let mut other = ByteBuf::heap(2);
        other.write_zero(5).unwrap();
        assert_eq!(other.readable_bytes(), 5);
        assert_eq!(other.to_vec().unwrap(), vec![0; 5]);
    }

    #[test]
    fn blocking_stream_transfer() {
        let mut buf = ByteBuf::heap(16);
        let mut src = io::Cursor::new(b"stream data".to_vec());
        let n = buf.set_from_reader(0, &mut src, 11).unwrap();
        assert_eq!(n, 11);
        assert_eq!(buf.writer_index(), 0);

        buf.set_writer_index(11).unwrap();
        let mut sink = Vec::new();
        buf.get_to_writer(0, &mut sink, 11).unwrap();
        assert_eq!(sink, b"stream data");
    }

    #[tokio::test]
    async fn async_stream_transfer() {
        let mut buf = ByteBuf::heap(16);
        let mut src: &[u8] = b"async bytes";
        let n = buf.set_from_async_reader(0, &mut src, 11).await.unwrap();
        assert_eq!(n, 11);
        // set-style transfer never moves indices
        assert_eq!(buf.writer_index(), 0);
        buf.set_writer_index(11).unwrap();

        let mut sink = io::Cursor::new(Vec::new());
        buf.get_to_async_writer(0, &mut sink, 11).await.unwrap();
        assert_eq!(sink.into_inner(), b"async bytes");
    }

    #[test]
    fn buf_to_buf_transfer_moves_source_reader() {
        let mut src = ByteBuf::heap(8);
        src.write_bytes(b"abcd").unwrap();

        let mut dst = ByteBuf::heap(8);
        dst.set_buf(0, &mut src, 3).unwrap();
        assert_eq!(src.reader_index(), 3);
        assert_eq!(dst.get_u8(0).unwrap(), b'a');

        let mut collected = ByteBuf::heap(8);
        collected.write_buf(&mut src).unwrap();
        assert_eq!(collected.to_vec().unwrap(), b"d");
    }
}
