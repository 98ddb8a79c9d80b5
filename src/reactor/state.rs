//! The engine's six-character state string.
//!
//! Position 0 is the link phase, 3 the private key, 4 the gateway sign-in.
//! Other positions are reported but not interpreted.

use std::fmt;

/// Characters that can appear in the state string.
pub mod code {
    pub const NOT_INITED: char = '*';
    pub const INITED: char = 'i';
    pub const IDLING: char = 'D';
    pub const CONNECTING: char = 'C';
    pub const PROXY_REQ: char = 'p';
    pub const PROXY_RESP: char = 'P';
    pub const HANDSHAKING: char = 'H';
    pub const ESTABLISHED: char = 'E';
    pub const CLOSING: char = 'c';
    pub const PPK_READY: char = 'Y';
    pub const GWCONN_ANONYMOUS: char = 'A';
    pub const GWCONN_SIGNED_IN: char = 'N';
    pub const ERROR_RETRY: char = 'r';
    pub const ERROR_NETWORK: char = 'n';
    pub const ERROR_FATAL: char = 'f';
}

const LINK_PHASE: usize = 0;
const KEY_READINESS: usize = 3;
const GATEWAY_SIGN_IN: usize = 4;

/// Parsed state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeacatState {
    chars: Vec<char>,
}

impl SeacatState {
    pub fn parse(state: &str) -> Self {
        Self {
            chars: state.chars().collect(),
        }
    }

    fn at(&self, index: usize) -> char {
        self.chars.get(index).copied().unwrap_or(code::NOT_INITED)
    }

    /// Link phase character (position 0).
    pub fn link_phase(&self) -> char {
        self.at(LINK_PHASE)
    }

    pub fn is_connecting(&self) -> bool {
        self.link_phase() == code::CONNECTING
    }

    pub fn is_fatal(&self) -> bool {
        self.link_phase() == code::ERROR_FATAL
    }

    pub fn has_private_key(&self) -> bool {
        self.at(KEY_READINESS) == code::PPK_READY
    }

    pub fn is_signed_in(&self) -> bool {
        self.at(GATEWAY_SIGN_IN) == code::GWCONN_SIGNED_IN
    }

    /// Key ready, signed in and not in a fatal error.
    pub fn is_ready(&self) -> bool {
        self.has_private_key() && self.is_signed_in() && !self.is_fatal()
    }

    /// Symbolic names of every known character, e.g. `ESTABLISHED|PPK_READY|`.
    pub fn describe(&self) -> String {
        self.chars
            .iter()
            .filter_map(|c| name_of(*c))
            .fold(String::new(), |mut out, name| {
                out.push_str(name);
                out.push('|');
                out
            })
    }
}

impl Default for SeacatState {
    fn default() -> Self {
        Self::parse("******")
    }
}

impl fmt::Display for SeacatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.chars {
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

fn name_of(c: char) -> Option<&'static str> {
    Some(match c {
        code::NOT_INITED => "NOT_INITED",
        code::INITED => "INITED",
        code::IDLING => "IDLING",
        code::CONNECTING => "CONNECTING",
        code::PROXY_REQ => "PROXY_REQ",
        code::PROXY_RESP => "PROXY_RESP",
        code::HANDSHAKING => "HANDSHAKING",
        code::ESTABLISHED => "ESTABLISHED",
        code::CLOSING => "CLOSING",
        code::PPK_READY => "PPK_READY",
        code::GWCONN_ANONYMOUS => "GWCONN_ANONYMOUS",
        code::GWCONN_SIGNED_IN => "GWCONN_SIGNED_IN",
        code::ERROR_RETRY => "ERROR_RETRY",
        code::ERROR_NETWORK => "ERROR_NETWORK",
        code::ERROR_FATAL => "ERROR_FATAL",
        _ => return None,
    })
}
