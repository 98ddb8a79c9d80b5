//! Stream registry and dispatcher.
//!
//! Assigns stream ids (1, 3, 5, ...), routes inbound SYN_REPLY, RST_STREAM
//! and data frames to the stream's handler, and answers frames for unknown
//! streams with RST_STREAM. The RST replies are queued here and sent through
//! the scheduler at [`MULTIPLEXER_PRIORITY`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::{ControlFrameConsumer, FrameProvider, FrameResult, StreamHandler};
use crate::error::{Result, SeacatError};
use crate::protocol::{
    build_frame_version_type, decode_stream_id, encode_rst_stream, ControlHeader, DataHeader,
    FrameBuf, CNTL_FRAME_VERSION_ALX1, CNTL_FRAME_VERSION_SPD3, CNTL_TYPE_RST_STREAM,
    CNTL_TYPE_SYN_REPLY, RST_STREAM_STATUS_INVALID_STREAM,
};
use crate::reactor::Reactor;

/// Scheduler priority of queued RST_STREAM replies.
pub const MULTIPLEXER_PRIORITY: u8 = 1;

const FIRST_STREAM_ID: u32 = 1;

const SYN_REPLY: u32 = build_frame_version_type(CNTL_FRAME_VERSION_ALX1, CNTL_TYPE_SYN_REPLY);
const RST_STREAM: u32 = build_frame_version_type(CNTL_FRAME_VERSION_SPD3, CNTL_TYPE_RST_STREAM);

struct Registry {
    next_id: u32,
    streams: HashMap<u32, Arc<dyn StreamHandler>>,
}

/// Registry of open streams for one session.
pub struct Multiplexer {
    me: Weak<Multiplexer>,
    registry: Mutex<Registry>,
    outbound: Mutex<VecDeque<FrameBuf>>,
}

impl Multiplexer {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            registry: Mutex::new(Registry {
                next_id: FIRST_STREAM_ID,
                streams: HashMap::new(),
            }),
            outbound: Mutex::new(VecDeque::new()),
        })
    }

    /// Register a handler under the next stream id.
    pub fn register_stream(&self, handler: Arc<dyn StreamHandler>) -> Result<u32> {
        let mut registry = self.registry();
        let stream_id = registry.next_id;
        if registry.streams.contains_key(&stream_id) {
            return Err(SeacatError::Protocol(format!(
                "Stream id {} is already registered",
                stream_id
            )));
        }
        registry.next_id = stream_id.wrapping_add(2) & 0x7FFF_FFFF;
        registry.streams.insert(stream_id, handler);
        tracing::debug!(stream_id, "Stream registered");
        Ok(stream_id)
    }

    /// Remove a stream. Unknown ids are ignored.
    pub fn unregister_stream(&self, stream_id: u32) {
        if self.registry().streams.remove(&stream_id).is_some() {
            tracing::debug!(stream_id, "Stream unregistered");
        }
    }

    /// Number of registered streams.
    pub fn stream_count(&self) -> usize {
        self.registry().streams.len()
    }

    /// Check if a stream id is registered.
    pub fn contains(&self, stream_id: u32) -> bool {
        self.registry().streams.contains_key(&stream_id)
    }

    /// Id the next registration will get.
    pub fn next_stream_id(&self) -> u32 {
        self.registry().next_id
    }

    /// Reset every open stream and start the id sequence over.
    pub fn reset(&self) {
        let streams: Vec<_> = {
            let mut registry = self.registry();
            registry.next_id = FIRST_STREAM_ID;
            registry.streams.drain().collect()
        };

        tracing::debug!(count = streams.len(), "Resetting streams");
        for (_, handler) in streams {
            handler.reset();
        }
    }

    fn stream(&self, stream_id: u32) -> Option<Arc<dyn StreamHandler>> {
        self.registry().streams.get(&stream_id).cloned()
    }

    /// Route an inbound data frame to its stream.
    pub fn on_data_frame(&self, reactor: &Reactor, frame: FrameBuf, header: &DataHeader) -> Option<FrameBuf> {
        let Some(handler) = self.stream(header.stream_id) else {
            tracing::error!(
                stream_id = header.stream_id,
                "Data frame for unknown stream (can be closed already)"
            );
            self.send_rst_stream(reactor, frame, header.stream_id, RST_STREAM_STATUS_INVALID_STREAM);
            return None;
        };

        let leftover = handler.on_data(reactor, frame, header);
        if header.is_fin() {
            self.unregister_stream(header.stream_id);
        }
        leftover
    }

    /// Reuse `frame` as an RST_STREAM and queue it for sending.
    pub fn send_rst_stream(&self, reactor: &Reactor, mut frame: FrameBuf, stream_id: u32, status: u32) {
        frame.clear();
        if let Err(e) = encode_rst_stream(&mut frame, stream_id, status) {
            tracing::error!(stream_id, "Failed to build RST_STREAM: {}", e);
            reactor.frame_pool().give_back(frame);
            return;
        }

        self.outbound().push_back(frame);
        if let Some(me) = self.me.upgrade() {
            if let Err(e) = reactor.register_frame_provider(me, true) {
                tracing::error!(stream_id, "Failed to schedule RST_STREAM: {}", e);
            }
        }
    }

    /// Frames waiting in the outbound queue.
    pub fn pending_frames(&self) -> usize {
        self.outbound().len()
    }

    fn on_syn_reply(&self, reactor: &Reactor, mut frame: FrameBuf, header: &ControlHeader) -> Option<FrameBuf> {
        let stream_id = match decode_stream_id(&mut frame) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Malformed SYN_REPLY: {}", e);
                return Some(frame);
            }
        };

        let Some(handler) = self.stream(stream_id) else {
            tracing::error!(stream_id, "SYN_REPLY for unknown stream (can be closed already)");
            self.send_rst_stream(reactor, frame, stream_id, RST_STREAM_STATUS_INVALID_STREAM);
            return None;
        };

        let leftover = handler.on_syn_reply(reactor, frame, header);
        if header.is_fin() {
            self.unregister_stream(stream_id);
        }
        leftover
    }

    fn on_rst_stream(&self, reactor: &Reactor, mut frame: FrameBuf, header: &ControlHeader) -> Option<FrameBuf> {
        let stream_id = match decode_stream_id(&mut frame) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Malformed RST_STREAM: {}", e);
                return Some(frame);
            }
        };

        let Some(handler) = self.stream(stream_id) else {
            tracing::error!(stream_id, "RST_STREAM for unknown stream (can be closed already)");
            return Some(frame);
        };

        let leftover = handler.on_rst_stream(reactor, frame, header);
        self.unregister_stream(stream_id);
        leftover
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn outbound(&self) -> MutexGuard<'_, VecDeque<FrameBuf>> {
        self.outbound.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ControlFrameConsumer for Multiplexer {
    fn on_control_frame(&self, reactor: &Reactor, frame: FrameBuf, header: &ControlHeader) -> Option<FrameBuf> {
        match header.version_type() {
            SYN_REPLY => self.on_syn_reply(reactor, frame, header),
            RST_STREAM => self.on_rst_stream(reactor, frame, header),
            other => {
                tracing::error!(version_type = other, "Multiplexer cannot handle control frame");
                Some(frame)
            }
        }
    }
}

impl FrameProvider for Multiplexer {
    fn build_frame(&self, _reactor: &Reactor) -> Result<FrameResult> {
        let mut outbound = self.outbound();
        let frame = outbound.pop_front();
        Ok(FrameResult {
            frame,
            keep: !outbound.is_empty(),
        })
    }

    fn priority(&self) -> u8 {
        MULTIPLEXER_PRIORITY
    }
}
