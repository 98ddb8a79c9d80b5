//! Watermark-bounded pool of fixed-size frame buffers.
//!
//! Every frame sent or received is borrowed from and given back to this pool.
//!
//! # Design
//!
//! - A free stack holds idle buffers; buffers are created lazily on borrow.
//! - `total_count` counts every buffer the pool has created and not yet
//!   discarded. It never exceeds the high water mark; borrowing beyond it fails
//!   with [`SeacatError::ResourceExhausted`].
//! - On give-back, buffers above the low water mark are dropped instead of
//!   stacked, so idle memory shrinks back toward the low water mark.
//!
//! # Usage
//!
//! ```
//! use seacat_client::protocol::FramePool;
//!
//! let pool = FramePool::default();
//! let frame = pool.borrow("example").unwrap();
//! assert_eq!(frame.capacity(), 16 * 1024);
//! pool.give_back(frame);
//! assert_eq!(pool.idle_count(), 1);
//! ```

use std::sync::Mutex;

use super::FrameBuf;
use crate::config::PoolConfig;
use crate::error::{Result, SeacatError};

struct PoolState {
    /// Idle buffers, most recently returned on top.
    stack: Vec<FrameBuf>,
    /// Buffers created and not yet discarded.
    total_count: usize,
}

/// Pool of frame buffers shared by every component of a session.
pub struct FramePool {
    state: Mutex<PoolState>,
    low_water_mark: usize,
    high_water_mark: usize,
    frame_capacity: usize,
}

impl FramePool {
    /// Create a pool with the given watermarks and frame size.
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            state: Mutex::new(PoolState {
                stack: Vec::with_capacity(config.low_water_mark),
                total_count: 0,
            }),
            low_water_mark: config.low_water_mark,
            high_water_mark: config.high_water_mark,
            frame_capacity: config.frame_capacity,
        }
    }

    /// Borrow a buffer in write mode. `reason` is only used for logging.
    pub fn borrow(&self, reason: &str) -> Result<FrameBuf> {
        tracing::trace!(reason, "Borrowing frame");

        let mut state = self.lock();
        if let Some(frame) = state.stack.pop() {
            return Ok(frame);
        }

        if state.total_count >= self.high_water_mark {
            tracing::warn!(
                total = state.total_count,
                "Frame pool exhausted, refusing borrow for {}",
                reason
            );
            return Err(SeacatError::ResourceExhausted {
                high_water_mark: self.high_water_mark,
            });
        }

        state.total_count += 1;
        tracing::trace!(total = state.total_count, "Creating frame buffer");
        Ok(FrameBuf::with_capacity(self.frame_capacity))
    }

    /// Give a buffer back. It is cleared and either stacked or discarded.
    ///
    /// Callers must not give back the same buffer twice; moving the
    /// `FrameBuf` in enforces that.
    pub fn give_back(&self, mut frame: FrameBuf) {
        frame.clear();

        let mut state = self.lock();
        if state.total_count > self.low_water_mark {
            state.total_count -= 1;
            // frame dropped here
        } else {
            state.stack.push(frame);
        }
    }

    /// Number of idle buffers on the free stack.
    pub fn idle_count(&self) -> usize {
        self.lock().stack.len()
    }

    /// Number of buffers created and not yet discarded.
    pub fn total_count(&self) -> usize {
        self.lock().total_count
    }

    /// Size of each buffer.
    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    /// Called from the reactor heartbeat.
    pub fn heart_beat(&self, _now: f64) {
        let state = self.lock();
        tracing::trace!(
            idle = state.stack.len(),
            total = state.total_count,
            "Frame pool heartbeat"
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // A panic while holding the lock cannot leave the stack inconsistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}
