//! Interface to the native transport engine.
//!
//! The engine owns the socket, TLS, identity provisioning and reconnects. The
//! reactor drives it through [`TransportEngine`] and is driven back through
//! [`CoreCallbacks`], which the engine invokes from its own run loop.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SeacatError};
use crate::protocol::FrameBuf;

/// Engine return code for success.
pub const RC_OK: i32 = 0;

/// Generic engine failure.
pub const RC_E_GENERIC: i32 = -9999;

/// `yield` return codes in this range are informational.
pub const RC_BENIGN_YIELD: std::ops::RangeInclusive<i32> = 7901..=7999;

/// Turn an engine return code into a `Result`.
pub fn check_rc(call: &'static str, rc: i32) -> Result<()> {
    if rc == RC_OK {
        Ok(())
    } else {
        Err(SeacatError::Engine { call, rc })
    }
}

/// Log a nonzero return code without failing.
pub fn log_rc(call: &'static str, rc: i32) {
    if rc != RC_OK {
        tracing::error!(rc, "SeaCat return code {} in {}", rc, call);
    }
}

/// Commands the reactor can ask the engine to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Yield {
    Connect,
    Disconnect,
    RenewCert,
    RecoverFatal,
    NetworkReachable,
    DataToSend,
    /// Drop the private key and certificate and start identity provisioning over.
    ResetIdentity,
}

impl Yield {
    /// Wire character understood by the engine.
    pub fn as_char(self) -> char {
        match self {
            Yield::Connect => 'c',
            Yield::Disconnect => 'd',
            Yield::RenewCert => 'n',
            Yield::RecoverFatal => 'f',
            Yield::NetworkReachable => 'Q',
            Yield::DataToSend => 'W',
            Yield::ResetIdentity => 'r',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'c' => Yield::Connect,
            'd' => Yield::Disconnect,
            'n' => Yield::RenewCert,
            'f' => Yield::RecoverFatal,
            'Q' => Yield::NetworkReachable,
            'W' => Yield::DataToSend,
            'r' => Yield::ResetIdentity,
            _ => return None,
        })
    }
}

impl fmt::Display for Yield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Yield::Connect => "CONNECT",
            Yield::Disconnect => "DISCONNECT",
            Yield::RenewCert => "RENEW_CERT",
            Yield::RecoverFatal => "RECOVER_FATAL",
            Yield::NetworkReachable => "NETWORK_REACHABLE",
            Yield::DataToSend => "DATA_TO_SEND",
            Yield::ResetIdentity => "RESET_IDENTITY",
        };
        f.write_str(name)
    }
}

/// The native transport engine.
///
/// All methods return engine return codes ([`RC_OK`] on success). `run` blocks
/// for the lifetime of the engine and is called on a dedicated blocking task;
/// every other method may be called from any thread, including from inside a
/// callback.
pub trait TransportEngine: Send + Sync {
    /// Hand the engine its callback target. The engine keeps `callbacks` until
    /// `shutdown`.
    fn init(
        &self,
        callbacks: Arc<dyn CoreCallbacks>,
        app_name: &str,
        app_suffix: &str,
        platform: &str,
        storage_dir: &str,
    ) -> i32;

    /// Run the event loop until shutdown.
    fn run(&self) -> i32;

    /// Request an action, see [`Yield`].
    fn yield_cmd(&self, command: char) -> i32;

    /// Stop the event loop and release the callbacks.
    fn shutdown(&self) -> i32;

    /// Six-character state string.
    fn state(&self) -> String;

    /// Engine clock in seconds. Ping deadlines and heartbeats use it.
    fn time(&self) -> f64;

    fn set_proxy_server_worker(&self, host: &str, port: &str) -> i32;

    /// Generate a fresh private key. Blocking.
    fn ppkgen_worker(&self) -> i32;

    /// Generate and submit a certificate signing request. Blocking.
    ///
    /// `params` alternates field names and values.
    fn csrgen_worker(&self, params: &[String]) -> i32;
}

/// Callbacks the engine invokes on the reactor from its run loop.
pub trait CoreCallbacks: Send + Sync {
    /// Engine log line. `level` is `D`, `I`, `W` or `E`.
    fn log_message(&self, level: char, message: &str);

    /// The link can take a frame. Returns it in read mode, or `None`.
    fn on_write_ready(&self) -> Option<FrameBuf>;

    /// The link has bytes. Returns an empty buffer for the engine to fill.
    fn on_read_ready(&self) -> Option<FrameBuf>;

    /// The engine wrote `length` bytes into [`FrameBuf::unfilled_mut`] of a
    /// buffer it got from [`on_read_ready`](Self::on_read_ready).
    fn on_frame_received(&self, frame: FrameBuf, length: usize);

    /// The engine is done with a buffer it got from
    /// [`on_write_ready`](Self::on_write_ready).
    fn on_frame_return(&self, frame: FrameBuf);

    /// Start a background worker: `P` private key, `C` CSR.
    fn on_worker_requested(&self, worker: char);

    /// Periodic tick. Returns the longest delay (seconds) before the next one.
    fn on_heartbeat(&self, now: f64) -> f64;

    fn on_event_loop_started(&self);

    fn on_gateway_connected(&self);

    /// The link to the gateway was lost.
    fn on_gateway_reset(&self);

    fn on_state_changed(&self, state: &str);

    fn on_client_identity_changed(&self, client_id: &str, client_tag: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yield_chars_round_trip() {
        for y in [
            Yield::Connect,
            Yield::Disconnect,
            Yield::RenewCert,
            Yield::RecoverFatal,
            Yield::NetworkReachable,
            Yield::DataToSend,
            Yield::ResetIdentity,
        ] {
            assert_eq!(Yield::from_char(y.as_char()), Some(y));
        }
        assert_eq!(Yield::from_char('x'), None);
        assert_eq!(Yield::DataToSend.to_string(), "DATA_TO_SEND");
    }

    #[test]
    fn test_check_rc() {
        assert!(check_rc("seacatcc.init", RC_OK).is_ok());
        let err = check_rc("seacatcc.init", RC_E_GENERIC).unwrap_err();
        assert_eq!(err.to_string(), "SeaCat return code -9999 in seacatcc.init");
    }

    #[test]
    fn test_benign_yield_range() {
        assert!(RC_BENIGN_YIELD.contains(&7901));
        assert!(RC_BENIGN_YIELD.contains(&7999));
        assert!(!RC_BENIGN_YIELD.contains(&7900));
        assert!(!RC_BENIGN_YIELD.contains(&8000));
    }
}
