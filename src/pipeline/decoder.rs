//! Message-to-message decoding.
//!
//! A [`MessageDecoder`] turns one inbound message into zero or more outbound
//! messages. [`MessageDecoderHandler`] adapts it to the
//! [`ChannelHandler`](crate::pipeline::ChannelHandler) contract and owns the
//! surrounding machinery: pass-through of messages the decoder does not
//! accept, release of partial output on failure, routing of decode errors
//! into `exception_caught`, and the `need_read` backpressure signal.

use crate::buffer::ReferenceCounted;
use crate::pipeline::{ChannelHandler, CodecError, HandlerContext};

/// Decodes inbound messages into replacement messages.
///
/// Ownership discipline: `decode` owns `msg`. Pushing a message into `out`
/// transfers its reference downstream; a message that is consumed instead
/// must be released before `decode` returns.
pub trait MessageDecoder<M>: Send {
    /// Returns whether this decoder wants to process `msg`. Messages that
    /// are not accepted are forwarded unchanged.
    fn accepts(&self, _msg: &M) -> bool {
        true
    }

    /// Decodes `msg`, appending any replacement messages to `out`.
    fn decode(
        &mut self,
        ctx: &mut HandlerContext<M>,
        msg: M,
        out: &mut Vec<M>,
    ) -> Result<(), CodecError>;

    /// Invoked when the adapter is removed from its pipeline; release any
    /// held resources here. Failures must be reported through the context.
    fn handler_removed(&mut self, _ctx: &mut HandlerContext<M>) {}

    /// Invoked when the channel goes inactive. Failures must be reported
    /// through the context.
    fn channel_inactive(&mut self, _ctx: &mut HandlerContext<M>) {}
}

/// Adapter hosting a [`MessageDecoder`] as a pipeline handler.
pub struct MessageDecoderHandler<D> {
    decoder: D,
    need_read: bool,
}

impl<D> MessageDecoderHandler<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder, need_read: true }
    }

    /// Returns the wrapped decoder.
    pub fn decoder(&self) -> &D {
        &self.decoder
    }
}

impl<M, D> ChannelHandler<M> for MessageDecoderHandler<D>
where
    M: ReferenceCounted + Send,
    D: MessageDecoder<M>,
{
    fn channel_read(&mut self, ctx: &mut HandlerContext<M>, msg: M) {
        if !self.decoder.accepts(&msg) {
            ctx.fire_channel_read(msg);
            return;
        }
        let mut out = Vec::new();
        match self.decoder.decode(ctx, msg, &mut out) {
            Ok(()) => {
                self.need_read = out.is_empty();
                for produced in out {
                    ctx.fire_channel_read(produced);
                }
            }
            Err(cause) => {
                for produced in out {
                    if let Err(e) = produced.release() {
                        tracing::warn!(error = %e, "failed to release partial decoder output");
                    }
                }
                ctx.fire_exception_caught(cause);
            }
        }
    }

    fn channel_read_complete(&mut self, ctx: &mut HandlerContext<M>) {
        let need_read = std::mem::replace(&mut self.need_read, true);
        ctx.fire_channel_read_complete();
        if need_read && !ctx.auto_read() {
            ctx.read();
        }
    }

    fn channel_inactive(&mut self, ctx: &mut HandlerContext<M>) {
        self.decoder.channel_inactive(ctx);
        ctx.fire_channel_inactive();
    }

    fn handler_removed(&mut self, ctx: &mut HandlerContext<M>) {
        self.decoder.handler_removed(ctx);
    }
}
