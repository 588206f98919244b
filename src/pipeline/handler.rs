//! The channel handler contract.

use crate::pipeline::{CodecError, HandlerContext};

/// A pipeline stage observing inbound events and intercepting outbound
/// operations.
///
/// Default implementations forward each event through the context, so a
/// handler only overrides the events it cares about. An override that does
/// not call the corresponding context method stops the event from
/// propagating further.
///
/// Inbound events (`channel_read` and friends) travel from the head of the
/// pipeline towards the tail; the outbound operations `write`, `flush` and
/// `close` travel from the tail towards the head.
///
/// Handlers are invoked from a single thread per pipeline; implementations
/// must not block.
pub trait ChannelHandler<M>: Send {
    /// Invoked right after the handler was added to a pipeline.
    fn handler_added(&mut self, _ctx: &mut HandlerContext<M>) {}

    /// Invoked when the handler is removed from its pipeline. Not propagated
    /// to other handlers.
    fn handler_removed(&mut self, _ctx: &mut HandlerContext<M>) {}

    /// The channel became active.
    fn channel_active(&mut self, ctx: &mut HandlerContext<M>) {
        ctx.fire_channel_active();
    }

    /// The channel became inactive; no further reads will arrive.
    fn channel_inactive(&mut self, ctx: &mut HandlerContext<M>) {
        ctx.fire_channel_inactive();
    }

    /// An inbound message arrived. The handler owns `msg` and must either
    /// forward it, transform it into new messages, or release it.
    fn channel_read(&mut self, ctx: &mut HandlerContext<M>, msg: M) {
        ctx.fire_channel_read(msg);
    }

    /// The current batch of reads is complete.
    fn channel_read_complete(&mut self, ctx: &mut HandlerContext<M>) {
        ctx.fire_channel_read_complete();
    }

    /// An error was raised upstream and has not been consumed yet.
    fn exception_caught(&mut self, ctx: &mut HandlerContext<M>, cause: CodecError) {
        ctx.fire_exception_caught(cause);
    }

    /// An outbound message is on its way to the channel head.
    fn write(&mut self, ctx: &mut HandlerContext<M>, msg: M) {
        ctx.write(msg);
    }

    /// Buffered outbound messages should be flushed.
    fn flush(&mut self, ctx: &mut HandlerContext<M>) {
        ctx.flush();
    }

    /// The channel is asked to close.
    fn close(&mut self, ctx: &mut HandlerContext<M>) {
        ctx.close();
    }
}
