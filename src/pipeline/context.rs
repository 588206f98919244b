//! The handler context: how a stage observes and emits events.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::buffer::BufAllocator;
use crate::pipeline::CodecError;

/// Events a handler emits. Inbound events travel head→tail, outbound events
/// tail→head.
pub(crate) enum Event<M> {
    Active,
    Inactive,
    Read(M),
    ReadComplete,
    Exception(CodecError),
    Write(M),
    Flush,
    Close,
}

impl<M> Event<M> {
    pub(crate) fn is_outbound(&self) -> bool {
        matches!(self, Event::Write(_) | Event::Flush | Event::Close)
    }
}

/// The API through which a handler interacts with its pipeline.
///
/// Emitted events are delivered to the neighbouring handler in order, after
/// the current callback returns; within one callback, everything fired is
/// dispatched before the pipeline processes the next event.
pub struct HandlerContext<M> {
    pub(crate) events: VecDeque<Event<M>>,
    pub(crate) read_requested: bool,
    auto_read: bool,
    allocator: Arc<dyn BufAllocator>,
}

impl<M> HandlerContext<M> {
    pub(crate) fn new(auto_read: bool, allocator: Arc<dyn BufAllocator>) -> Self {
        Self { events: VecDeque::new(), read_requested: false, auto_read, allocator }
    }

    /// Forwards a message to the next handler.
    pub fn fire_channel_read(&mut self, msg: M) {
        self.events.push_back(Event::Read(msg));
    }

    /// Forwards the read-complete notification.
    pub fn fire_channel_read_complete(&mut self) {
        self.events.push_back(Event::ReadComplete);
    }

    /// Forwards the channel-active notification.
    pub fn fire_channel_active(&mut self) {
        self.events.push_back(Event::Active);
    }

    /// Forwards the channel-inactive notification.
    pub fn fire_channel_inactive(&mut self) {
        self.events.push_back(Event::Inactive);
    }

    /// Passes an error to the next handler's `exception_caught`.
    pub fn fire_exception_caught(&mut self, cause: CodecError) {
        self.events.push_back(Event::Exception(cause));
    }

    /// Sends a message towards the channel head (and ultimately the wire).
    pub fn write(&mut self, msg: M) {
        self.events.push_back(Event::Write(msg));
    }

    /// Requests that buffered writes be flushed.
    pub fn flush(&mut self) {
        self.events.push_back(Event::Flush);
    }

    /// Requests that the channel be closed.
    pub fn close(&mut self) {
        self.events.push_back(Event::Close);
    }

    /// Demands more data from the channel's source. The backpressure hook
    /// for channels that are not in auto-read mode.
    pub fn read(&mut self) {
        self.read_requested = true;
    }

    /// Returns whether the channel reads from its source automatically.
    pub fn auto_read(&self) -> bool {
        self.auto_read
    }

    /// Returns the channel's buffer allocator.
    pub fn alloc(&self) -> &dyn BufAllocator {
        self.allocator.as_ref()
    }
}
