//! Stream module - the roles components play towards the reactor.
//!
//! - [`FrameProvider`]: something with frames to send, queued by priority
//! - [`StreamHandler`]: the owner of one stream id, fed inbound frames
//! - [`ControlFrameConsumer`]: a receiver of control frames by `(version, type)`
//!
//! Inbound handlers take the frame by value. Returning `Some(frame)` hands it
//! back to the reactor, which returns it to the pool; returning `None` means
//! the handler kept it (queued for a reader, or reused as an outbound frame).

mod multiplexer;

pub use multiplexer::{Multiplexer, MULTIPLEXER_PRIORITY};

use crate::error::Result;
use crate::protocol::{ControlHeader, DataHeader, FrameBuf};
use crate::reactor::Reactor;

/// Outcome of [`FrameProvider::build_frame`].
#[derive(Debug, Default)]
pub struct FrameResult {
    /// Frame to send, in write mode. The reactor flips it.
    pub frame: Option<FrameBuf>,
    /// Re-queue the provider, it has more to send.
    pub keep: bool,
}

impl FrameResult {
    /// A frame and whether more follow.
    pub fn frame(frame: FrameBuf, keep: bool) -> Self {
        Self {
            frame: Some(frame),
            keep,
        }
    }

    /// Nothing to send right now.
    pub fn idle() -> Self {
        Self::default()
    }
}

/// A component with outbound frames.
pub trait FrameProvider: Send + Sync {
    /// Produce the next frame.
    fn build_frame(&self, reactor: &Reactor) -> Result<FrameResult>;

    /// Lower values are sent first.
    fn priority(&self) -> u8;
}

/// The owner of a registered stream.
///
/// SYN_REPLY and RST_STREAM frames arrive with the cursor just past the
/// stream id; data frames with the cursor at the payload.
pub trait StreamHandler: Send + Sync {
    fn on_syn_reply(&self, reactor: &Reactor, frame: FrameBuf, header: &ControlHeader) -> Option<FrameBuf>;

    fn on_rst_stream(&self, reactor: &Reactor, frame: FrameBuf, header: &ControlHeader) -> Option<FrameBuf>;

    fn on_data(&self, reactor: &Reactor, frame: FrameBuf, header: &DataHeader) -> Option<FrameBuf>;

    /// Force-close the stream. Non-blocking and safe to call repeatedly.
    fn reset(&self);
}

/// A receiver of control frames, registered by version and type.
///
/// The cursor sits just past the 8-byte header.
pub trait ControlFrameConsumer: Send + Sync {
    fn on_control_frame(&self, reactor: &Reactor, frame: FrameBuf, header: &ControlHeader) -> Option<FrameBuf>;
}
