//! Response body: a pull-based byte source fed with data frames.
//!
//! The sender queues each inbound data frame here without copying it; a
//! reader drains the frames in order and returns each buffer to the pool once
//! it is exhausted. Reading after the stream closes yields `Ok(0)`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Result, SeacatError};
use crate::protocol::{FrameBuf, FramePool, RST_STREAM_STATUS_STREAM_ALREADY_CLOSED};
use crate::reactor::Reactor;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Default)]
struct InboundState {
    queue: VecDeque<FrameBuf>,
    current: Option<FrameBuf>,
    closed: bool,
    aborted: bool,
}

struct Inbound {
    sender_id: u64,
    pool: Arc<FramePool>,
    read_timeout: Duration,
    state: Mutex<InboundState>,
    notify: Notify,
}

impl Inbound {
    fn lock(&self) -> MutexGuard<'_, InboundState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `Some(n)` when bytes were read or the stream ended, `None` to wait.
    fn try_read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.current.as_mut() {
                let n = frame.read_into(buf);
                if !frame.has_remaining() {
                    if let Some(done) = state.current.take() {
                        self.pool.give_back(done);
                    }
                }
                if n > 0 {
                    return Ok(Some(n));
                }
            }

            match state.queue.pop_front() {
                Some(frame) => state.current = Some(frame),
                None => break,
            }
        }

        if state.aborted {
            Err(SeacatError::ConnectionClosed)
        } else if state.closed {
            Ok(Some(0))
        } else {
            Ok(None)
        }
    }

    fn release_frames(&self, state: &mut InboundState) {
        for frame in state.current.take().into_iter().chain(state.queue.drain(..)) {
            self.pool.give_back(frame);
        }
    }

    fn wake_all(&self) {
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

impl Drop for Inbound {
    fn drop(&mut self) {
        let mut state = std::mem::take(&mut *self.lock());
        self.release_frames(&mut state);
    }
}

/// Response body of one HTTP exchange. Cloning yields another handle to the
/// same stream.
#[derive(Clone)]
pub struct InboundStream {
    inner: Arc<Inbound>,
}

impl InboundStream {
    pub(crate) fn new(sender_id: u64, pool: Arc<FramePool>, read_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inbound {
                sender_id,
                pool,
                read_timeout,
                state: Mutex::new(InboundState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Queue a data frame (cursor at the payload).
    ///
    /// Data for an already closed stream is answered with RST_STREAM
    /// `STREAM_ALREADY_CLOSED`, reusing the frame.
    pub(crate) fn inbound_data(&self, reactor: &Reactor, frame: FrameBuf, stream_id: u32) -> Option<FrameBuf> {
        let mut state = self.inner.lock();
        if state.closed {
            drop(state);
            tracing::debug!(sender_id = self.inner.sender_id, stream_id, "Data for closed stream");
            reactor.multiplexer().send_rst_stream(
                reactor,
                frame,
                stream_id,
                RST_STREAM_STATUS_STREAM_ALREADY_CLOSED,
            );
            return None;
        }

        state.queue.push_back(frame);
        drop(state);
        self.inner.notify.notify_one();
        None
    }

    /// Mark the end of the body; queued frames stay readable.
    pub(crate) fn close(&self) {
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.inner.wake_all();
    }

    /// Drop queued frames and fail readers.
    pub(crate) fn abort(&self) {
        let mut state = self.inner.lock();
        self.inner.release_frames(&mut state);
        state.closed = true;
        state.aborted = true;
        drop(state);
        self.inner.wake_all();
    }

    /// Read into `buf`, waiting up to the read timeout for data.
    ///
    /// Returns `Ok(0)` at the end of the body and
    /// [`SeacatError::ConnectionClosed`] if the stream was reset.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let deadline = Instant::now() + self.inner.read_timeout;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(n) = self.inner.try_read(buf)? {
                return Ok(n);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(sender_id = self.inner.sender_id, "Inbound stream read timed out");
                return Err(SeacatError::Timeout("inbound stream read"));
            }
        }
    }

    /// Read the whole remaining body.
    pub async fn bytes(&self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(body.freeze());
            }
            body.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read the whole remaining body as UTF-8 (lossy).
    pub async fn text(&self) -> Result<String> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Check if the body has ended (all frames may not be read yet).
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Check if the stream was reset.
    pub fn is_aborted(&self) -> bool {
        self.inner.lock().aborted
    }

    /// Frames received and not yet fully read.
    pub fn queued_frames(&self) -> usize {
        let state = self.inner.lock();
        state.queue.len() + usize::from(state.current.is_some())
    }
}

impl fmt::Debug for InboundStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("InboundStream")
            .field("sender_id", &self.inner.sender_id)
            .field("queued", &state.queue.len())
            .field("closed", &state.closed)
            .field("aborted", &state.aborted)
            .finish()
    }
}
