//! The embedded channel: an in-memory, single-threaded channel used to host
//! codec implementations inside another handler.

use crate::buffer::ReferenceCounted;
use crate::pipeline::{ChannelConfig, ChannelHandler, CodecError, Pipeline};

/// An in-memory channel driving a [`Pipeline`] without any I/O.
///
/// Writing inbound advances the hosted handlers; reading inbound drains one
/// produced message at a time. The channel is single-owner: it belongs to
/// exactly one outer handler and must not be shared across connections.
pub struct EmbeddedChannel<M> {
    pipeline: Pipeline<M>,
    active: bool,
}

impl<M> EmbeddedChannel<M> {
    /// Wraps an assembled pipeline and fires `channel_active`.
    pub fn new(mut pipeline: Pipeline<M>) -> Result<Self, CodecError> {
        pipeline.fire_channel_active()?;
        Ok(Self { pipeline, active: true })
    }

    /// Creates a channel hosting a single handler.
    pub fn single(handler: impl ChannelHandler<M> + 'static) -> Result<Self, CodecError> {
        let mut pipeline = Pipeline::new();
        pipeline.add_last("codec", handler)?;
        Self::new(pipeline)
    }

    /// Feeds one message into the pipeline and fires read-complete.
    /// Returns whether at least one produced message is ready to be read.
    pub fn write_inbound(&mut self, msg: M) -> Result<bool, CodecError> {
        if !self.active {
            return Err(CodecError::ClosedChannel);
        }
        self.pipeline.fire_channel_read(msg)?;
        self.pipeline.fire_channel_read_complete()?;
        Ok(!self.pipeline.inbound_is_empty())
    }

    /// Drains one produced message, or `None` if nothing is pending.
    pub fn read_inbound(&mut self) -> Option<M> {
        self.pipeline.next_inbound()
    }

    /// Sends one message down the outbound path and flushes. Returns whether
    /// at least one message reached the channel head.
    pub fn write_outbound(&mut self, msg: M) -> Result<bool, CodecError> {
        if !self.active {
            return Err(CodecError::ClosedChannel);
        }
        self.pipeline.write(msg)?;
        self.pipeline.flush()?;
        Ok(!self.pipeline.outbound_is_empty())
    }

    /// Drains one outbound message that reached the channel head.
    pub fn read_outbound(&mut self) -> Option<M> {
        self.pipeline.next_outbound()
    }

    /// Sends a close request down the outbound path and finishes the
    /// channel once it reaches the head.
    pub fn close(&mut self) -> Result<(), CodecError> {
        if self.active {
            self.pipeline.close()?;
            if self.pipeline.close_requested() {
                self.finish()?;
            }
        }
        Ok(())
    }

    /// Marks end-of-stream: fires `channel_inactive` and removes the
    /// handlers, letting codecs flush residual output. Returns whether any
    /// produced message is pending afterwards. Idempotent.
    pub fn finish(&mut self) -> Result<bool, CodecError> {
        if self.active {
            self.active = false;
            self.pipeline.fire_channel_inactive()?;
            self.pipeline.fire_handler_removed_all()?;
        }
        Ok(!self.pipeline.inbound_is_empty())
    }

    /// Like [`finish`](Self::finish), but additionally releases every queued
    /// output message.
    pub fn finish_and_release_all(&mut self) -> Result<bool, CodecError>
    where
        M: ReferenceCounted,
    {
        let finished = self.finish();
        while let Some(msg) = self.read_inbound() {
            if let Err(e) = msg.release() {
                tracing::warn!(error = %e, "failed to release queued inbound message");
            }
        }
        finished
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn config(&self) -> &ChannelConfig {
        self.pipeline.config()
    }

    pub fn config_mut(&mut self) -> &mut ChannelConfig {
        self.pipeline.config_mut()
    }

    /// Number of explicit read demands the hosted handlers have issued.
    pub fn read_requests(&self) -> usize {
        self.pipeline.read_requests()
    }
}
