//! Request body: a push-based byte sink that packs writes into data frames.
//!
//! Writes fill the current frame; a full frame is queued (no FIN) and handed
//! to the scheduler once the stream has an id. [`OutboundStream::close`]
//! queues a final frame with FIN set, even if it is empty.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::backpressure::{BackpressureController, BackpressurePermit};
use crate::error::{Result, SeacatError};
use crate::protocol::{begin_data_frame, finish_frame, FrameBuf};
use crate::reactor::Reactor;
use crate::stream::{FrameProvider, FrameResult};

#[derive(Default)]
struct OutboundState {
    queue: VecDeque<(FrameBuf, BackpressurePermit)>,
    current: Option<FrameBuf>,
    stream_id: Option<u32>,
    closed: bool,
    reset: bool,
}

/// Outbound half of a stream.
pub struct OutboundStream {
    me: Weak<OutboundStream>,
    reactor: Arc<Reactor>,
    priority: u8,
    backpressure: BackpressureController,
    state: Mutex<OutboundState>,
}

impl OutboundStream {
    pub fn new(reactor: Arc<Reactor>, priority: u8) -> Arc<Self> {
        let http = &reactor.config().http;
        let backpressure = BackpressureController::with_timeout(
            http.max_pending_frames,
            http.effective_write_timeout(),
        );
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            reactor,
            priority,
            backpressure,
            state: Mutex::new(OutboundState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, OutboundState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append bytes, queueing every frame that fills up.
    ///
    /// Waits (bounded by the write timeout) while too many frames are queued.
    pub async fn write(&self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let full = {
                let mut state = self.lock();
                if state.closed {
                    return Err(SeacatError::StreamClosed);
                }

                let mut frame = match state.current.take() {
                    Some(frame) => frame,
                    None => self.fresh_frame("OutboundStream.write")?,
                };

                let n = frame.write_from(data);
                data = &data[n..];
                if frame.has_remaining() {
                    state.current = Some(frame);
                    None
                } else {
                    Some(frame)
                }
            };

            if let Some(frame) = full {
                self.enqueue(frame, false).await?;
            }
        }
        Ok(())
    }

    /// Queue the final frame with FIN. Later calls do nothing.
    pub async fn close(&self) -> Result<()> {
        let current = {
            let mut state = self.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.current.take()
        };

        let frame = match current {
            Some(frame) => frame,
            None => self.fresh_frame("OutboundStream.close")?,
        };
        self.enqueue(frame, true).await
    }

    fn fresh_frame(&self, reason: &str) -> Result<FrameBuf> {
        let mut frame = self.reactor.frame_pool().borrow(reason)?;
        if let Err(e) = begin_data_frame(&mut frame, 0) {
            self.reactor.frame_pool().give_back(frame);
            return Err(e);
        }
        Ok(frame)
    }

    async fn enqueue(&self, mut frame: FrameBuf, fin: bool) -> Result<()> {
        if let Err(e) = finish_frame(&mut frame, fin) {
            self.reactor.frame_pool().give_back(frame);
            return Err(e);
        }

        let permit = match self.backpressure.reserve().await {
            Ok(permit) => permit,
            Err(e) => {
                self.reactor.frame_pool().give_back(frame);
                return Err(e);
            }
        };

        let launched = {
            let mut state = self.lock();
            if state.reset {
                drop(state);
                self.reactor.frame_pool().give_back(frame);
                return Err(SeacatError::StreamClosed);
            }
            state.queue.push_back((frame, permit));
            state.stream_id.is_some()
        };

        if launched {
            self.schedule()?;
        }
        Ok(())
    }

    fn schedule(&self) -> Result<()> {
        match self.me.upgrade() {
            Some(me) => self.reactor.register_frame_provider(me, true),
            None => Ok(()),
        }
    }

    /// Assign the stream id; queued frames start flowing.
    pub fn launch(&self, stream_id: u32) -> Result<()> {
        let pending = {
            let mut state = self.lock();
            if state.stream_id.is_some() {
                return Err(SeacatError::AlreadyLaunched);
            }
            state.stream_id = Some(stream_id);
            !state.queue.is_empty()
        };

        tracing::debug!(stream_id, "Outbound stream launched");
        if pending {
            self.schedule()?;
        }
        Ok(())
    }

    /// Drop everything queued and fail further writes.
    pub fn reset(&self) {
        let frames: Vec<FrameBuf> = {
            let mut state = self.lock();
            state.reset = true;
            state.closed = true;
            let current = state.current.take();
            state
                .queue
                .drain(..)
                .map(|(frame, _permit)| frame)
                .chain(current)
                .collect()
        };
        self.backpressure.close();

        for frame in frames {
            self.reactor.frame_pool().give_back(frame);
        }
    }

    /// Frames queued and not yet taken by the scheduler.
    pub fn queued_frames(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl FrameProvider for OutboundStream {
    fn build_frame(&self, reactor: &Reactor) -> Result<FrameResult> {
        let mut state = self.lock();
        let Some(stream_id) = state.stream_id else {
            return Ok(FrameResult::idle());
        };
        let Some((mut frame, _permit)) = state.queue.pop_front() else {
            return Ok(FrameResult::idle());
        };
        let keep = !state.queue.is_empty();
        drop(state);

        if let Err(e) = frame.put_u32_at(0, stream_id & 0x7FFF_FFFF) {
            reactor.frame_pool().give_back(frame);
            return Err(e);
        }
        Ok(FrameResult::frame(frame, keep))
    }

    fn priority(&self) -> u8 {
        self.priority
    }
}

impl Drop for OutboundStream {
    fn drop(&mut self) {
        let state = std::mem::take(&mut *self.lock());
        let pool = self.reactor.frame_pool();
        for (frame, _permit) in state.queue {
            pool.give_back(frame);
        }
        if let Some(frame) = state.current {
            pool.give_back(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReactorConfig;
    use crate::protocol::FrameHeader;
    use crate::reactor::testing::TestReactor;
    use crate::reactor::CoreCallbacks;

    fn data_frame(frame: &mut FrameBuf) -> (u32, bool, Vec<u8>) {
        let FrameHeader::Data(header) = FrameHeader::read(frame).unwrap() else {
            panic!("expected a data frame");
        };
        (header.stream_id, header.is_fin(), frame.chunk().to_vec())
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_sets_fin_once() {
        let t = TestReactor::start(ReactorConfig::default()).await;
        let stream = OutboundStream::new(t.reactor.clone(), 3);

        stream.write(b"abc").await.unwrap();
        stream.close().await.unwrap();
        stream.close().await.unwrap();
        assert!(stream.is_closed());
        assert_eq!(stream.queued_frames(), 1);
        assert!(t.engine.yields().is_empty(), "nothing is scheduled before launch");

        stream.launch(5).unwrap();
        assert_eq!(t.engine.yields(), vec!['W']);

        let mut frame = t.reactor.on_write_ready().unwrap();
        assert_eq!(data_frame(&mut frame), (5, true, b"abc".to_vec()));
        t.reactor.on_frame_return(frame);
        assert!(t.reactor.on_write_ready().is_none());
    }

    #[tokio::test]
    async fn test_close_without_writes_sends_empty_fin() {
        let t = TestReactor::start(ReactorConfig::default()).await;
        let stream = OutboundStream::new(t.reactor.clone(), 3);
        stream.launch(7).unwrap();
        stream.close().await.unwrap();

        let mut frame = t.reactor.on_write_ready().unwrap();
        assert_eq!(data_frame(&mut frame), (7, true, Vec::new()));
    }

    #[tokio::test]
    async fn test_full_frames_go_out_before_fin() {
        let t = TestReactor::start(ReactorConfig::default()).await;
        let stream = OutboundStream::new(t.reactor.clone(), 3);
        stream.launch(1).unwrap();

        let payload = t.reactor.frame_pool().frame_capacity() - 8;
        stream.write(&vec![1u8; payload + 10]).await.unwrap();
        assert_eq!(stream.queued_frames(), 1);
        stream.close().await.unwrap();

        let mut first = t.reactor.on_write_ready().unwrap();
        let (_, fin, bytes) = data_frame(&mut first);
        assert!(!fin);
        assert_eq!(bytes.len(), payload);

        let mut last = t.reactor.on_write_ready().unwrap();
        let (_, fin, bytes) = data_frame(&mut last);
        assert!(fin);
        assert_eq!(bytes.len(), 10);
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let t = TestReactor::start(ReactorConfig::default()).await;
        let stream = OutboundStream::new(t.reactor.clone(), 3);
        stream.close().await.unwrap();
        assert!(matches!(stream.write(b"late").await, Err(SeacatError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_launch_twice_fails() {
        let t = TestReactor::start(ReactorConfig::default()).await;
        let stream = OutboundStream::new(t.reactor.clone(), 3);
        stream.launch(1).unwrap();
        assert!(matches!(stream.launch(3), Err(SeacatError::AlreadyLaunched)));
    }

    #[tokio::test]
    async fn test_reset_gives_frames_back() {
        let t = TestReactor::start(ReactorConfig::default()).await;
        let stream = OutboundStream::new(t.reactor.clone(), 3);
        stream.write(b"queued").await.unwrap();
        stream.close().await.unwrap();

        stream.reset();

        let pool = t.reactor.frame_pool();
        assert_eq!(stream.queued_frames(), 0);
        assert_eq!(pool.idle_count(), pool.total_count());
        assert!(matches!(stream.write(b"x").await, Err(SeacatError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_drop_gives_frames_back() {
        let t = TestReactor::start(ReactorConfig::default()).await;
        let stream = OutboundStream::new(t.reactor.clone(), 3);
        stream.write(b"partial").await.unwrap();
        stream.close().await.unwrap();

        let pool = t.reactor.frame_pool().clone();
        assert_eq!(pool.total_count(), 1);
        assert_eq!(pool.idle_count(), 0);

        drop(stream);
        assert_eq!(pool.idle_count(), 1);
    }
}
