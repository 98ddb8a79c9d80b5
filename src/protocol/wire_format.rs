//! Wire format encoding and decoding.
//!
//! Every frame starts with an 8-byte header:
//! ```text
//! Control frame:
//! ┌─┬──────────────┬──────────┬───────┬───────────┐
//! │1│ Version (15) │ Type (16)│ Flags │ Length(24)│
//! └─┴──────────────┴──────────┴───────┴───────────┘
//! Data frame:
//! ┌─┬──────────────────────────┬───────┬───────────┐
//! │0│ Stream ID (31)           │ Flags │ Length(24)│
//! └─┴──────────────────────────┴───────┴───────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use super::FrameBuf;
use crate::error::{Result, SeacatError};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Largest payload the 24-bit length field can carry.
pub const MAX_PAYLOAD_LENGTH: usize = 0x00FF_FFFF;

/// Control bit in the first header word.
pub const CONTROL_BIT: u16 = 0x8000;

/// SPDY/3 control frame version.
pub const CNTL_FRAME_VERSION_SPD3: u16 = 0x03;
/// SeaCat ALX1 control frame version.
pub const CNTL_FRAME_VERSION_ALX1: u16 = 0xA1;

/// SYN_STREAM control type (ALX1).
pub const CNTL_TYPE_SYN_STREAM: u16 = 1;
/// SYN_REPLY control type (ALX1).
pub const CNTL_TYPE_SYN_REPLY: u16 = 2;
/// RST_STREAM control type (SPD3).
pub const CNTL_TYPE_RST_STREAM: u16 = 3;
/// PING control type (SPD3).
pub const CNTL_TYPE_PING: u16 = 6;

/// RST_STREAM status: stream id not known.
pub const RST_STREAM_STATUS_INVALID_STREAM: u32 = 2;
/// RST_STREAM status: data arrived after the stream was closed.
pub const RST_STREAM_STATUS_STREAM_ALREADY_CLOSED: u32 = 9;

/// VLE strings shorter than this use a single length byte.
pub const VLE_SHORT_LIMIT: usize = 0xFA;
/// Sentinel length byte announcing a 16-bit length.
pub const VLE_LONG_MARKER: u8 = 0xFF;

/// Placeholder written when a string cannot be encoded.
const VLE_PLACEHOLDER: &str = "???";

/// Flag constants for the protocol.
pub mod flags {
    /// Last frame in this direction of the stream.
    pub const FIN: u8 = 0x01;
    /// Stream is one-way.
    pub const UNIDIRECTIONAL: u8 = 0x02;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Pack a control version and type into a single dispatch key.
///
/// The version lands in the high 16 bits, the type in the low 16 bits.
#[inline]
pub const fn build_frame_version_type(version: u16, kind: u16) -> u32 {
    ((version as u32) << 16) | kind as u32
}

/// Pack flags and a payload length into the second header word.
pub fn flags_length(flags: u8, length: usize) -> Result<u32> {
    if length > MAX_PAYLOAD_LENGTH {
        return Err(SeacatError::Protocol(format!(
            "Payload length {} exceeds 24 bits",
            length
        )));
    }
    Ok(((flags as u32) << 24) | length as u32)
}

/// Decoded control frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    /// Control version (control bit removed).
    pub version: u16,
    /// Control type.
    pub kind: u16,
    /// Flags byte.
    pub flags: u8,
    /// Payload length in bytes.
    pub length: u32,
}

impl ControlHeader {
    /// Dispatch key, see [`build_frame_version_type`].
    #[inline]
    pub fn version_type(&self) -> u32 {
        build_frame_version_type(self.version, self.kind)
    }

    /// Check if the FIN flag is set.
    #[inline]
    pub fn is_fin(&self) -> bool {
        flags::has_flag(self.flags, flags::FIN)
    }
}

/// Decoded data frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Stream this frame belongs to.
    pub stream_id: u32,
    /// Flags byte.
    pub flags: u8,
    /// Payload length in bytes.
    pub length: u32,
}

impl DataHeader {
    /// Check if the FIN flag is set.
    #[inline]
    pub fn is_fin(&self) -> bool {
        flags::has_flag(self.flags, flags::FIN)
    }
}

/// Header of either kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    Control(ControlHeader),
    Data(DataHeader),
}

impl FrameHeader {
    /// Read the 8-byte header at the cursor, advancing past it.
    pub fn read(frame: &mut FrameBuf) -> Result<Self> {
        let first = frame.get_u32()?;
        let flags_length = frame.get_u32()?;
        let flags = (flags_length >> 24) as u8;
        let length = flags_length & MAX_PAYLOAD_LENGTH as u32;

        if first & 0x8000_0000 != 0 {
            Ok(FrameHeader::Control(ControlHeader {
                version: ((first >> 16) as u16) & !CONTROL_BIT,
                kind: first as u16,
                flags,
                length,
            }))
        } else {
            Ok(FrameHeader::Data(DataHeader {
                stream_id: first,
                flags,
                length,
            }))
        }
    }

    /// Payload length declared by the header.
    pub fn length(&self) -> u32 {
        match self {
            FrameHeader::Control(h) => h.length,
            FrameHeader::Data(h) => h.length,
        }
    }

    /// Whether the declared length matches a frame of `limit` bytes.
    pub fn matches_limit(&self, limit: usize) -> bool {
        self.length() as usize + HEADER_SIZE == limit
    }
}

/// Check whether the first byte of a frame marks a control frame.
#[inline]
pub fn is_control_byte(first_byte: u8) -> bool {
    first_byte & 0x80 != 0
}

/// Append a variable-length-encoded UTF-8 string.
///
/// Strings over 0xFFFF bytes cannot be represented and are replaced by `"???"`
/// so a single bad header does not abort the whole frame.
pub fn put_vle_string(frame: &mut FrameBuf, text: &str) -> Result<()> {
    let mut bytes = text.as_bytes();
    if bytes.len() > u16::MAX as usize {
        tracing::error!(len = bytes.len(), "Can't append VLE string, using placeholder");
        bytes = VLE_PLACEHOLDER.as_bytes();
    }

    if bytes.len() >= VLE_SHORT_LIMIT {
        frame.put_u8(VLE_LONG_MARKER)?;
        frame.put_u16(bytes.len() as u16)?;
    } else {
        frame.put_u8(bytes.len() as u8)?;
    }
    frame.put_slice(bytes)
}

/// Read a variable-length-encoded UTF-8 string.
///
/// Invalid UTF-8 decodes to `"???"`; a length running past the frame is a
/// protocol error.
pub fn get_vle_string(frame: &mut FrameBuf) -> Result<String> {
    let mut length = frame.get_u8()? as usize;
    if length == VLE_LONG_MARKER as usize {
        length = frame.get_u16()? as usize;
    }

    let bytes = frame.get_slice(length)?;
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => Ok(VLE_PLACEHOLDER.to_string()),
    }
}

/// Encoded size of a VLE string.
pub fn vle_len(text: &str) -> usize {
    let len = if text.len() > u16::MAX as usize {
        VLE_PLACEHOLDER.len()
    } else {
        text.len()
    };
    if len >= VLE_SHORT_LIMIT {
        3 + len
    } else {
        1 + len
    }
}
