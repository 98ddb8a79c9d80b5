//! Backpressure handling for outbound body frames.
//!
//! Bounds how many full frames a request body may have queued for the
//! scheduler. Writers reserve a permit per frame before queueing it; the
//! permit is released when the scheduler takes the frame.
//!
//! # Configuration
//!
//! - `max_pending`: frames queued before writers wait (default: 64)
//! - `timeout`: how long a writer waits for room (default: 30s)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Result, SeacatError};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING: usize = 64;

/// Default backpressure timeout (how long to wait for space to become available).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Backpressure controller for one outbound stream.
#[derive(Debug, Clone)]
pub struct BackpressureController {
    permits: Arc<Semaphore>,
    max_pending: usize,
    timeout: Duration,
}

/// A reserved slot; dropping it frees the slot.
pub type BackpressurePermit = OwnedSemaphorePermit;

impl BackpressureController {
    /// Create a controller allowing `max_pending` queued frames (at least one).
    pub fn with_timeout(max_pending: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_pending.max(1))),
            max_pending: max_pending.max(1),
            timeout,
        }
    }

    /// Get current pending count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.max_pending - self.permits.available_permits()
    }

    /// Get maximum pending limit.
    #[inline]
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Reserve a slot, waiting up to the timeout.
    pub async fn reserve(&self) -> Result<BackpressurePermit> {
        match tokio::time::timeout(self.timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(SeacatError::StreamClosed),
            Err(_elapsed) => {
                tracing::warn!(
                    pending = self.pending_count(),
                    limit = self.max_pending(),
                    "Outbound frame queue did not drain in time"
                );
                Err(SeacatError::Timeout("outbound frame queue"))
            }
        }
    }

    /// Fail every current and future reservation.
    pub fn close(&self) {
        self.permits.close();
    }
}
