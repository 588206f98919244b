//! Composite buffers: a single buffer view over a sequence of child buffers.
//!
//! A composite never copies on construction. Each component records the child
//! handle, the component's start offset in composite coordinates, the window
//! length (the child's readable bytes at the time it was added) and the
//! adjustment into the child (the child's reader index at that time). Reads
//! and writes walk the components; the composite's capacity is the sum of the
//! component windows.
//!
//! Adding a component transfers ownership of the child handle, which is the
//! reference the composite holds. Removing a component (or deallocating the
//! composite) releases that reference.

use crate::buffer::byte_buf::{ByteBuf, Storage};
use crate::buffer::BufferError;

pub(crate) struct Composite {
    pub(crate) components: Vec<Component>,
    pub(crate) direct: bool,
}

pub(crate) struct Component {
    pub(crate) buf: ByteBuf,
    pub(crate) offset: usize,
    pub(crate) length: usize,
    pub(crate) adjustment: usize,
}

impl Composite {
    pub(crate) fn capacity(&self) -> usize {
        self.components.last().map_or(0, |component| component.offset + component.length)
    }

    fn component_index(&self, position: usize) -> Result<usize, BufferError> {
        self.components
            .binary_search_by(|component| {
                if component.offset + component.length <= position {
                    std::cmp::Ordering::Less
                } else if component.offset > position {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .map_err(|_| BufferError::index_out_of_range(position, 1, self.capacity()))
    }

    pub(crate) fn read_into(&self, index: usize, dst: &mut [u8]) -> Result<(), BufferError> {
        if dst.is_empty() {
            return Ok(());
        }
        let mut current = self.component_index(index)?;
        let mut position = index;
        let mut copied = 0;
        while copied < dst.len() {
            if current >= self.components.len() {
                return Err(BufferError::index_out_of_range(index, dst.len(), self.capacity()));
            }
            let component = &self.components[current];
            let local = position - component.offset;
            if local >= component.length {
                current += 1;
                continue;
            }
            let n = (component.length - local).min(dst.len() - copied);
            component.buf.read_into(component.adjustment + local, &mut dst[copied..copied + n])?;
            copied += n;
            position += n;
            current += 1;
        }
        Ok(())
    }

    pub(crate) fn write_from(&mut self, index: usize, src: &[u8]) -> Result<(), BufferError> {
        if src.is_empty() {
            return Ok(());
        }
        let mut current = self.component_index(index)?;
        let mut position = index;
        let mut copied = 0;
        while copied < src.len() {
            if current >= self.components.len() {
                return Err(BufferError::index_out_of_range(index, src.len(), self.capacity()));
            }
            let component = &mut self.components[current];
            let local = position - component.offset;
            if local >= component.length {
                current += 1;
                continue;
            }
            let n = (component.length - local).min(src.len() - copied);
            component.buf.write_from(component.adjustment + local, &src[copied..copied + n])?;
            copied += n;
            position += n;
            current += 1;
        }
        Ok(())
    }
}

impl ByteBuf {
    /// Creates an empty heap-backed composite buffer.
    pub fn composite() -> ByteBuf {
        ByteBuf::new_root(Storage::Composite(Composite { components: Vec::new(), direct: false }), usize::MAX)
    }

    /// Creates an empty composite buffer whose consolidation and growth use
    /// direct storage.
    pub fn composite_direct() -> ByteBuf {
        ByteBuf::new_root(Storage::Composite(Composite { components: Vec::new(), direct: true }), usize::MAX)
    }

    /// Returns whether this is a composite buffer.
    pub fn is_composite(&self) -> bool {
        matches!(self.state().storage, Storage::Composite(_))
    }

    /// Returns the number of components; zero for non-composite buffers.
    pub fn component_count(&self) -> usize {
        match &self.state().storage {
            Storage::Composite(composite) => composite.components.len(),
            _ => 0,
        }
    }

    /// Appends `buf`'s readable window as the last component, taking
    /// ownership of the handle. With `increase_writer_index` the composite's
    /// writer index advances past the new component, exposing it for reading.
    ///
    /// Returns the index of the new component.
    pub fn add_component(&mut self, increase_writer_index: bool, buf: ByteBuf) -> Result<usize, BufferError> {
        self.ensure_accessible()?;
        if self.is_read_only() {
            return Err(BufferError::unsupported("buffer is read-only"));
        }
        if self.same_cell(&buf) {
            return Err(BufferError::invalid_argument("cannot add a composite to itself"));
        }
        buf.ensure_accessible()?;
        let length = buf.readable_bytes();
        let adjustment = buf.reader_index();
        let index = match &mut self.state_mut().storage {
            Storage::Composite(composite) => {
                let offset = composite.capacity();
                composite.components.push(Component { buf, offset, length, adjustment });
                composite.components.len() - 1
            }
            _ => return Err(BufferError::unsupported("not a composite buffer")),
        };
        if increase_writer_index {
            let state = self.state_mut();
            state.writer += length;
        }
        Ok(index)
    }

    /// Removes the component at `index` and releases its child reference.
    /// Subsequent components shift left; the composite's indices are clamped
    /// to the reduced capacity.
    pub fn remove_component(&mut self, index: usize) -> Result<(), BufferError> {
        self.ensure_accessible()?;
        if self.is_read_only() {
            return Err(BufferError::unsupported("buffer is read-only"));
        }
        let removed = match &mut self.state_mut().storage {
            Storage::Composite(composite) => {
                if index >= composite.components.len() {
                    return Err(BufferError::invalid_argument(format!(
                        "component index {index} out of bounds"
                    )));
                }
                let removed = composite.components.remove(index);
                for component in composite.components.iter_mut().skip(index) {
                    component.offset -= removed.length;
                }
                removed
            }
            _ => return Err(BufferError::unsupported("not a composite buffer")),
        };
        let capacity = self.capacity();
        {
            let state = self.state_mut();
            state.writer = state.writer.min(capacity);
            state.reader = state.reader.min(state.writer);
            state.writer_mark = state.writer_mark.min(capacity);
            state.reader_mark = state.reader_mark.min(state.writer_mark);
        }
        removed.buf.release()?;
        Ok(())
    }

    /// Merges all components into a single freshly allocated buffer and
    /// releases the originals. Indices and capacity are unchanged.
    pub fn consolidate(&mut self) -> Result<(), BufferError> {
        self.ensure_accessible()?;
        if self.is_read_only() {
            return Err(BufferError::unsupported("buffer is read-only"));
        }
        if !self.is_composite() {
            return Err(BufferError::unsupported("not a composite buffer"));
        }
        let capacity = self.capacity();
        let direct = self.is_direct();

        let mut contents = vec![0u8; capacity];
        self.read_into(0, &mut contents)?;

        let mut merged = if direct { ByteBuf::direct(capacity) } else { ByteBuf::heap(capacity) };
        merged.write_bytes(&contents)?;

        let old = match &mut self.state_mut().storage {
            Storage::Composite(composite) => std::mem::replace(
                &mut composite.components,
                vec![Component { buf: merged, offset: 0, length: capacity, adjustment: 0 }],
            ),
            _ => return Err(BufferError::unsupported("not a composite buffer")),
        };
        for component in old {
            component.buf.release()?;
        }
        Ok(())
    }

    /// Grows a composite's capacity by appending a zero-filled padding
    /// component of `additional` bytes.
    pub(crate) fn extend_composite_capacity(&mut self, additional: usize) -> Result<(), BufferError> {
        let direct = self.is_direct();
        let mut padding = if direct { ByteBuf::direct(additional) } else { ByteBuf::heap(additional) };
        padding.write_zero(additional)?;
        self.add_component(false, padding)?;
        Ok(())
    }
}
