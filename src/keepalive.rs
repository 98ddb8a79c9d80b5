//! Keepalive: the PING/PONG sub-protocol.
//!
//! Locally initiated pings get odd ids from their own sequence and wait in a
//! map until the gateway echoes them. An even id from the gateway is its own
//! ping; it is answered with a pong carrying the same id.
//!
//! # Example
//!
//! ```
//! use seacat_client::keepalive::Ping;
//!
//! let (ping, _outcome) = Ping::new(60.0);
//! assert!(!ping.is_expired(59.9));
//! assert!(ping.is_expired(60.0));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::oneshot;

use crate::error::Result;
use crate::protocol::{decode_ping, encode_ping, ControlHeader, FrameBuf};
use crate::reactor::Reactor;
use crate::stream::{ControlFrameConsumer, FrameProvider, FrameResult};

/// Scheduler priority of ping frames.
pub const KEEPALIVE_PRIORITY: u8 = 0;

const FIRST_PING_ID: u32 = 1;

/// How a locally initiated ping ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// The gateway answered.
    Pong,
    /// Expired, or dropped on connection reset.
    Cancelled,
}

/// A ping waiting to be sent or answered, or a pong waiting to be sent.
#[derive(Debug)]
pub struct Ping {
    id: Option<u32>,
    deadline: f64,
    completion: Option<oneshot::Sender<PingOutcome>>,
}

impl Ping {
    /// A local ping expiring at `deadline` (engine time, seconds).
    pub fn new(deadline: f64) -> (Self, oneshot::Receiver<PingOutcome>) {
        let (tx, rx) = oneshot::channel();
        let ping = Self {
            id: None,
            deadline,
            completion: Some(tx),
        };
        (ping, rx)
    }

    /// A reply to the gateway's ping `id`.
    pub fn pong(id: u32, deadline: f64) -> Self {
        Self {
            id: Some(id),
            deadline,
            completion: None,
        }
    }

    /// Id on the wire; `None` until a local ping is sent.
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    /// Check if this answers the gateway rather than asking it.
    pub fn is_pong(&self) -> bool {
        self.completion.is_none() && self.id.is_some()
    }

    pub fn is_expired(&self, now: f64) -> bool {
        now >= self.deadline
    }

    fn complete(mut self, outcome: PingOutcome) {
        if let Some(tx) = self.completion.take() {
            // Nobody waiting is fine
            let _ = tx.send(outcome);
        }
    }
}

struct KeepaliveState {
    next_id: u32,
    outbound: VecDeque<Ping>,
    waiting: HashMap<u32, Ping>,
}

/// PING/PONG bookkeeping for one session.
pub struct Keepalive {
    me: Weak<Keepalive>,
    state: Mutex<KeepaliveState>,
}

impl Keepalive {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            state: Mutex::new(KeepaliveState {
                next_id: FIRST_PING_ID,
                outbound: VecDeque::new(),
                waiting: HashMap::new(),
            }),
        })
    }

    /// Queue a ping (or pong) and schedule it.
    pub fn ping(&self, reactor: &Reactor, ping: Ping) -> Result<()> {
        tracing::debug!("Adding ping to the queue");
        self.lock().outbound.push_back(ping);
        self.schedule(reactor)
    }

    fn schedule(&self, reactor: &Reactor) -> Result<()> {
        match self.me.upgrade() {
            Some(me) => reactor.register_frame_provider(me, true),
            None => Ok(()),
        }
    }

    /// Cancel every expired ping, sent or not.
    pub fn heart_beat(&self, now: f64) {
        let expired: Vec<Ping> = {
            let mut state = self.lock();

            let expired_ids: Vec<u32> = state
                .waiting
                .iter()
                .filter(|(_, ping)| ping.is_expired(now))
                .map(|(id, _)| *id)
                .collect();
            let mut expired: Vec<Ping> = expired_ids
                .into_iter()
                .filter_map(|id| state.waiting.remove(&id))
                .collect();

            let (dead, alive): (VecDeque<Ping>, VecDeque<Ping>) =
                state.outbound.drain(..).partition(|ping| ping.is_expired(now));
            state.outbound = alive;
            expired.extend(dead);
            expired
        };

        for ping in expired {
            tracing::debug!(ping_id = ?ping.id(), "Expired ping");
            ping.complete(PingOutcome::Cancelled);
        }
    }

    /// Cancel every waiting ping and restart the id sequence.
    pub fn reset(&self) {
        let cancelled: Vec<Ping> = {
            let mut state = self.lock();
            state.next_id = FIRST_PING_ID;
            state.waiting.drain().map(|(_, ping)| ping).collect()
        };

        tracing::debug!(count = cancelled.len(), "Keepalive reset");
        for ping in cancelled {
            ping.complete(PingOutcome::Cancelled);
        }
    }

    /// Pings sent and not yet answered.
    pub fn waiting_count(&self) -> usize {
        self.lock().waiting.len()
    }

    /// Pings and pongs not yet sent.
    pub fn queued_count(&self) -> usize {
        self.lock().outbound.len()
    }

    /// Id the next local ping will get.
    pub fn next_ping_id(&self) -> u32 {
        self.lock().next_id
    }

    fn lock(&self) -> MutexGuard<'_, KeepaliveState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FrameProvider for Keepalive {
    fn build_frame(&self, reactor: &Reactor) -> Result<FrameResult> {
        let mut state = self.lock();
        let Some(mut ping) = state.outbound.pop_front() else {
            return Ok(FrameResult::idle());
        };
        let keep = !state.outbound.is_empty();

        let mut frame = match reactor.frame_pool().borrow("Keepalive.ping") {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Postponing ping: {}", e);
                state.outbound.push_front(ping);
                return Ok(FrameResult {
                    frame: None,
                    keep: true,
                });
            }
        };

        let ping_id = match ping.id {
            Some(id) => id,
            None => {
                let id = state.next_id;
                state.next_id = state.next_id.wrapping_add(2);
                ping.id = Some(id);
                id
            }
        };

        if let Err(e) = encode_ping(&mut frame, ping_id) {
            reactor.frame_pool().give_back(frame);
            return Err(e);
        }

        if !ping.is_pong() {
            state.waiting.insert(ping_id, ping);
        }

        tracing::debug!(ping_id, "Sending ping");
        Ok(FrameResult::frame(frame, keep))
    }

    fn priority(&self) -> u8 {
        KEEPALIVE_PRIORITY
    }
}

impl ControlFrameConsumer for Keepalive {
    fn on_control_frame(&self, reactor: &Reactor, mut frame: FrameBuf, _header: &ControlHeader) -> Option<FrameBuf> {
        let ping_id = match decode_ping(&mut frame) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Malformed PING: {}", e);
                return Some(frame);
            }
        };

        if ping_id % 2 == 1 {
            let answered = self.lock().waiting.remove(&ping_id);
            match answered {
                Some(ping) => {
                    tracing::debug!(ping_id, "Pong received");
                    ping.complete(PingOutcome::Pong);
                }
                None => tracing::warn!(ping_id, "Received pong with unknown id"),
            }
        } else {
            let deadline = reactor.time() + reactor.config().ping_timeout.as_secs_f64();
            self.lock().outbound.push_back(Ping::pong(ping_id, deadline));
            if let Err(e) = self.schedule(reactor) {
                tracing::debug!(ping_id, "Failed to schedule pong: {}", e);
            }
        }

        Some(frame)
    }
}
