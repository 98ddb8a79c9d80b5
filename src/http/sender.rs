//! One HTTP exchange on one stream.
//!
//! The sender is queued as a frame provider; its first `build_frame` takes a
//! stream id from the multiplexer and emits the SYN_STREAM. It then acts as
//! the stream's handler: the SYN_REPLY releases the waiting caller, data
//! frames go to the [`InboundStream`], and a reset (RST_STREAM or a dropped
//! gateway connection) answers the caller with a synthesized 500.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use tokio::sync::oneshot;

use super::body::Body;
use super::inbound::InboundStream;
use super::outbound::OutboundStream;
use crate::error::{Result, SeacatError};
use crate::protocol::{
    decode_syn_reply_body, encode_syn_stream, status_line, ControlHeader, DataHeader, FrameBuf,
    Headers, SynStream,
};
use crate::reactor::Reactor;
use crate::stream::{FrameProvider, FrameResult, StreamHandler};

/// Status of the response handed to the caller when the stream is reset.
pub const RESET_STATUS: u16 = 500;

/// Response header carrying the sender id in debug builds.
pub const HANDLER_ID_HEADER: &str = "handler-id";

static NEXT_SENDER_ID: AtomicU64 = AtomicU64::new(1);

/// Status and headers of a reply, before the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Headers,
}

impl ResponseHead {
    fn reset() -> Self {
        Self {
            status: RESET_STATUS,
            headers: Headers::new(),
        }
    }
}

struct SenderState {
    request: Option<SynStream>,
    stream_id: Option<u32>,
    reply: Option<oneshot::Sender<ResponseHead>>,
}

/// Frame provider and stream handler of a single request.
pub struct HttpSender {
    id: u64,
    me: Weak<HttpSender>,
    priority: u8,
    inbound: InboundStream,
    outbound: Option<Arc<OutboundStream>>,
    state: Mutex<SenderState>,
}

impl HttpSender {
    fn new(
        reactor: &Arc<Reactor>,
        request: SynStream,
        has_body: bool,
    ) -> (Arc<Self>, oneshot::Receiver<ResponseHead>) {
        let id = NEXT_SENDER_ID.fetch_add(1, Ordering::Relaxed);
        let priority = request.priority;
        let (reply, response) = oneshot::channel();

        let inbound = InboundStream::new(
            id,
            reactor.frame_pool().clone(),
            reactor.config().http.effective_read_timeout(),
        );
        let outbound = has_body.then(|| OutboundStream::new(reactor.clone(), priority));

        let sender = Arc::new_cyclic(|me| Self {
            id,
            me: me.clone(),
            priority,
            inbound,
            outbound,
            state: Mutex::new(SenderState {
                request: Some(request),
                stream_id: None,
                reply: Some(reply),
            }),
        });
        (sender, response)
    }

    /// Send `request`, stream `body` and wait up to `timeout` for the reply.
    ///
    /// The returned response's body reads from the stream as data arrives.
    pub async fn send(
        reactor: &Arc<Reactor>,
        request: SynStream,
        body: Body,
        timeout: Duration,
    ) -> Result<http::Response<InboundStream>> {
        let (sender, response) = Self::new(reactor, request, !body.is_empty());
        tracing::debug!(sender_id = sender.id, priority = sender.priority, "Sending request");

        if let Some(outbound) = sender.outbound.clone() {
            let sender_id = sender.id;
            tokio::spawn(async move {
                if let Err(e) = body.copy_into(&outbound).await {
                    tracing::warn!(sender_id, "Request body copy failed: {}", e);
                    outbound.reset();
                }
            });
        }

        if let Err(e) = reactor.register_frame_provider(sender.clone(), true) {
            sender.abandon(reactor);
            return Err(e);
        }

        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(head)) => sender.build_response(head),
            Ok(Err(_)) => Err(SeacatError::ConnectionClosed),
            Err(_) => {
                tracing::warn!(sender_id = sender.id, ?timeout, "No reply in time");
                sender.abandon(reactor);
                Err(SeacatError::Timeout("response"))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SenderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stream id, once the SYN_STREAM has been built.
    pub fn stream_id(&self) -> Option<u32> {
        self.lock().stream_id
    }

    /// Stop caring about this exchange: leave the registry and reset.
    fn abandon(&self, reactor: &Reactor) {
        if let Some(stream_id) = self.stream_id() {
            reactor.multiplexer().unregister_stream(stream_id);
        }
        StreamHandler::reset(self);
    }

    fn respond(&self, head: ResponseHead) {
        let reply = self.lock().reply.take();
        if let Some(reply) = reply {
            // The caller may have timed out already
            let _ = reply.send(head);
        }
    }

    fn build_response(&self, head: ResponseHead) -> Result<http::Response<InboundStream>> {
        let mut builder = http::Response::builder().status(head.status);
        for (name, value) in head.headers.iter() {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => tracing::debug!(sender_id = self.id, name, "Dropping unrepresentable header"),
            }
        }
        if cfg!(debug_assertions) {
            builder = builder.header(HANDLER_ID_HEADER, self.id.to_string());
        }
        Ok(builder.body(self.inbound.clone())?)
    }
}

impl FrameProvider for HttpSender {
    fn build_frame(&self, reactor: &Reactor) -> Result<FrameResult> {
        let Some(mut request) = self.lock().request.take() else {
            return Ok(FrameResult::idle());
        };

        let mut frame = match reactor.frame_pool().borrow("HttpSender.build_frame") {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(sender_id = self.id, "Postponing SYN_STREAM: {}", e);
                self.lock().request = Some(request);
                return Ok(FrameResult {
                    frame: None,
                    keep: true,
                });
            }
        };

        let Some(me) = self.me.upgrade() else {
            reactor.frame_pool().give_back(frame);
            return Ok(FrameResult::idle());
        };
        let stream_id = match reactor.multiplexer().register_stream(me) {
            Ok(stream_id) => stream_id,
            Err(e) => {
                reactor.frame_pool().give_back(frame);
                StreamHandler::reset(self);
                return Err(e);
            }
        };

        request.stream_id = stream_id;
        let fin = self.outbound.is_none();
        if let Err(e) = encode_syn_stream(&mut frame, &request, fin, &reactor.config().host_suffix) {
            reactor.frame_pool().give_back(frame);
            reactor.multiplexer().unregister_stream(stream_id);
            StreamHandler::reset(self);
            return Err(e);
        }
        self.lock().stream_id = Some(stream_id);

        tracing::debug!(
            sender_id = self.id,
            stream_id,
            method = %request.method,
            path = %request.path,
            fin,
            "SYN_STREAM"
        );

        if let Some(outbound) = &self.outbound {
            if let Err(e) = outbound.launch(stream_id) {
                tracing::error!(sender_id = self.id, stream_id, "Failed to launch request body: {}", e);
            }
        }
        Ok(FrameResult::frame(frame, false))
    }

    fn priority(&self) -> u8 {
        self.priority
    }
}

impl StreamHandler for HttpSender {
    fn on_syn_reply(&self, _reactor: &Reactor, mut frame: FrameBuf, header: &ControlHeader) -> Option<FrameBuf> {
        let stream_id = self.stream_id().unwrap_or_default();
        let head = match decode_syn_reply_body(&mut frame, stream_id) {
            Ok(reply) => ResponseHead {
                status: reply.status,
                headers: reply.headers,
            },
            Err(e) => {
                tracing::error!(sender_id = self.id, stream_id, "Malformed SYN_REPLY: {}", e);
                ResponseHead::reset()
            }
        };

        tracing::debug!(sender_id = self.id, stream_id, "SYN_REPLY {}", status_line(head.status));
        self.respond(head);
        if header.is_fin() {
            self.inbound.close();
        }
        Some(frame)
    }

    fn on_rst_stream(&self, _reactor: &Reactor, frame: FrameBuf, _header: &ControlHeader) -> Option<FrameBuf> {
        tracing::debug!(sender_id = self.id, "RST_STREAM");
        StreamHandler::reset(self);
        Some(frame)
    }

    fn on_data(&self, reactor: &Reactor, frame: FrameBuf, header: &DataHeader) -> Option<FrameBuf> {
        let unused = self.inbound.inbound_data(reactor, frame, header.stream_id);
        if header.is_fin() {
            self.inbound.close();
        }
        unused
    }

    fn reset(&self) {
        self.lock().request = None;
        if let Some(outbound) = &self.outbound {
            outbound.reset();
        }
        self.inbound.abort();
        self.respond(ResponseHead::reset());
    }
}
