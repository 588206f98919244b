//! Pipeline dispatch machinery.
//!
//! A [`Pipeline`] is an ordered chain of named handlers. Events are
//! dispatched depth-first and synchronously: every message a handler emits
//! for event *E* traverses the rest of the pipeline before *E+1* is
//! processed. Inbound messages that reach the tail unconsumed are queued as
//! the pipeline's inbound output; outbound messages that reach the head are
//! queued as its outbound output; exceptions that reach the tail surface as
//! `Err` to the caller that fed the pipeline.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::buffer::{BufAllocator, Unpooled};
use crate::pipeline::context::Event;
use crate::pipeline::{ChannelHandler, CodecError, HandlerContext};

/// Channel-level configuration observed by handlers.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    auto_read: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { auto_read: true }
    }
}

impl ChannelConfig {
    /// Returns whether the channel issues reads automatically.
    pub fn auto_read(&self) -> bool {
        self.auto_read
    }

    /// Enables or disables automatic reads; with auto-read off, a stage must
    /// demand data explicitly via [`HandlerContext::read`].
    pub fn set_auto_read(&mut self, auto_read: bool) {
        self.auto_read = auto_read;
    }
}

struct HandlerEntry<M> {
    name: String,
    // Taken out of the slot during its own callbacks; a reentrant event
    // passes the empty slot through unchanged.
    handler: Option<Box<dyn ChannelHandler<M>>>,
}

/// An ordered chain of handlers with an inbound queue at the tail and an
/// outbound queue at the head.
pub struct Pipeline<M> {
    handlers: Vec<HandlerEntry<M>>,
    config: ChannelConfig,
    allocator: Arc<dyn BufAllocator>,
    inbound: VecDeque<M>,
    outbound: VecDeque<M>,
    read_requests: usize,
    close_requested: bool,
}

impl<M> Pipeline<M> {
    /// Creates an empty pipeline with the default unpooled allocator.
    pub fn new() -> Self {
        Self::with_allocator(Unpooled::shared())
    }

    /// Creates an empty pipeline sharing the given allocator.
    pub fn with_allocator(allocator: Arc<dyn BufAllocator>) -> Self {
        Self {
            handlers: Vec::new(),
            config: ChannelConfig::default(),
            allocator,
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            read_requests: 0,
            close_requested: false,
        }
    }

    /// Appends a handler at the tail and fires its `handler_added` callback.
    pub fn add_last(
        &mut self,
        name: impl Into<String>,
        handler: impl ChannelHandler<M> + 'static,
    ) -> Result<(), CodecError> {
        let name = name.into();
        tracing::trace!(handler = %name, "adding handler to pipeline");
        self.handlers.push(HandlerEntry { name, handler: Some(Box::new(handler)) });
        let index = self.handlers.len() - 1;
        let mut ctx = self.new_context();
        if let Some(mut handler) = self.handlers[index].handler.take() {
            handler.handler_added(&mut ctx);
            self.handlers[index].handler = Some(handler);
        }
        self.drain_context(index, ctx)
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ChannelConfig {
        &mut self.config
    }

    pub fn allocator(&self) -> &Arc<dyn BufAllocator> {
        &self.allocator
    }

    /// Number of explicit read demands handlers have issued.
    pub fn read_requests(&self) -> usize {
        self.read_requests
    }

    /// Whether a close request travelled all the way to the head.
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Takes the next message that reached the pipeline tail.
    pub fn next_inbound(&mut self) -> Option<M> {
        self.inbound.pop_front()
    }

    pub fn inbound_is_empty(&self) -> bool {
        self.inbound.is_empty()
    }

    /// Takes the next outbound message that reached the pipeline head.
    pub fn next_outbound(&mut self) -> Option<M> {
        self.outbound.pop_front()
    }

    pub fn outbound_is_empty(&self) -> bool {
        self.outbound.is_empty()
    }

    pub fn fire_channel_active(&mut self) -> Result<(), CodecError> {
        self.dispatch_inbound(0, Event::Active)
    }

    pub fn fire_channel_inactive(&mut self) -> Result<(), CodecError> {
        self.dispatch_inbound(0, Event::Inactive)
    }

    pub fn fire_channel_read(&mut self, msg: M) -> Result<(), CodecError> {
        self.dispatch_inbound(0, Event::Read(msg))
    }

    pub fn fire_channel_read_complete(&mut self) -> Result<(), CodecError> {
        self.dispatch_inbound(0, Event::ReadComplete)
    }

    pub fn fire_exception_caught(&mut self, cause: CodecError) -> Result<(), CodecError> {
        self.dispatch_inbound(0, Event::Exception(cause))
    }

    /// Sends a message tail→head through the outbound path.
    pub fn write(&mut self, msg: M) -> Result<(), CodecError> {
        self.dispatch_outbound(self.handlers.len(), Event::Write(msg))
    }

    /// Flushes the outbound path tail→head.
    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.dispatch_outbound(self.handlers.len(), Event::Flush)
    }

    /// Sends a close request tail→head.
    pub fn close(&mut self) -> Result<(), CodecError> {
        self.dispatch_outbound(self.handlers.len(), Event::Close)
    }

    /// Fires `handler_removed` on every handler, head to tail. Events a
    /// callback emits still traverse the neighbouring handlers.
    pub(crate) fn fire_handler_removed_all(&mut self) -> Result<(), CodecError> {
        for index in 0..self.handlers.len() {
            let mut ctx = self.new_context();
            if let Some(mut handler) = self.handlers[index].handler.take() {
                tracing::trace!(handler = %self.handlers[index].name, "removing handler");
                handler.handler_removed(&mut ctx);
                self.handlers[index].handler = Some(handler);
            }
            self.drain_context(index, ctx)?;
        }
        Ok(())
    }

    fn new_context(&self) -> HandlerContext<M> {
        HandlerContext::new(self.config.auto_read, Arc::clone(&self.allocator))
    }

    fn dispatch_inbound(&mut self, index: usize, event: Event<M>) -> Result<(), CodecError> {
        if index >= self.handlers.len() {
            return self.to_tail(event);
        }
        let Some(mut handler) = self.handlers[index].handler.take() else {
            return self.dispatch_inbound(index + 1, event);
        };
        let mut ctx = self.new_context();
        match event {
            Event::Active => handler.channel_active(&mut ctx),
            Event::Inactive => handler.channel_inactive(&mut ctx),
            Event::Read(msg) => handler.channel_read(&mut ctx, msg),
            Event::ReadComplete => handler.channel_read_complete(&mut ctx),
            Event::Exception(cause) => handler.exception_caught(&mut ctx, cause),
            outbound => {
                // an outbound event cannot be dispatched inbound
                self.handlers[index].handler = Some(handler);
                return self.dispatch_outbound(index, outbound);
            }
        }
        self.handlers[index].handler = Some(handler);
        self.drain_context(index, ctx)
    }

    /// Dispatches an outbound event to the first handler before `bound`.
    fn dispatch_outbound(&mut self, bound: usize, event: Event<M>) -> Result<(), CodecError> {
        if bound == 0 {
            return self.to_head(event);
        }
        let index = bound - 1;
        let Some(mut handler) = self.handlers[index].handler.take() else {
            return self.dispatch_outbound(index, event);
        };
        let mut ctx = self.new_context();
        match event {
            Event::Write(msg) => handler.write(&mut ctx, msg),
            Event::Flush => handler.flush(&mut ctx),
            Event::Close => handler.close(&mut ctx),
            inbound => {
                self.handlers[index].handler = Some(handler);
                return self.dispatch_inbound(index, inbound);
            }
        }
        self.handlers[index].handler = Some(handler);
        self.drain_context(index, ctx)
    }

    fn drain_context(&mut self, index: usize, ctx: HandlerContext<M>) -> Result<(), CodecError> {
        if ctx.read_requested {
            self.read_requests += 1;
        }
        for event in ctx.events {
            if event.is_outbound() {
                self.dispatch_outbound(index, event)?;
            } else {
                self.dispatch_inbound(index + 1, event)?;
            }
        }
        Ok(())
    }

    fn to_tail(&mut self, event: Event<M>) -> Result<(), CodecError> {
        match event {
            Event::Read(msg) => {
                self.inbound.push_back(msg);
                Ok(())
            }
            Event::Exception(cause) => {
                tracing::trace!(error = %cause, "exception reached pipeline tail");
                Err(cause)
            }
            _ => Ok(()),
        }
    }

    fn to_head(&mut self, event: Event<M>) -> Result<(), CodecError> {
        match event {
            Event::Write(msg) => self.outbound.push_back(msg),
            Event::Close => self.close_requested = true,
            _ => {}
        }
        Ok(())
    }
}

impl<M> Default for Pipeline<M> {
    fn default() -> Self {
        Self::new()
    }
}
