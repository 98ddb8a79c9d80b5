//! Frame codec: SYN_STREAM, SYN_REPLY, RST_STREAM, PING and data frames.
//!
//! Encoders write a complete frame starting at the buffer's cursor (normally
//! a freshly borrowed buffer). Decoders expect the cursor just past the
//! 8-byte header, which [`FrameHeader::read`] leaves it at.
//!
//! # Example
//!
//! ```
//! use seacat_client::protocol::{decode_rst_stream, encode_rst_stream, FrameBuf, FrameHeader};
//!
//! let mut frame = FrameBuf::with_capacity(64);
//! encode_rst_stream(&mut frame, 7, 2).unwrap();
//! frame.flip();
//!
//! let header = FrameHeader::read(&mut frame).unwrap();
//! assert!(header.matches_limit(frame.limit()));
//! assert_eq!(decode_rst_stream(&mut frame).unwrap(), (7, 2));
//! ```

use super::headers::Headers;
use super::wire_format::{
    flags, flags_length, get_vle_string, put_vle_string, CNTL_FRAME_VERSION_ALX1,
    CNTL_FRAME_VERSION_SPD3, CNTL_TYPE_PING, CNTL_TYPE_RST_STREAM, CNTL_TYPE_SYN_REPLY,
    CNTL_TYPE_SYN_STREAM, CONTROL_BIT, HEADER_SIZE,
};
use super::FrameBuf;
use crate::error::{Result, SeacatError};

/// Offset of the flags/length word within the header.
const FLAGS_LENGTH_OFFSET: usize = 4;

/// Cursor position after the fixed SYN_STREAM fields.
const SYN_STREAM_FIXED_END: usize = 18;

/// Placeholder written into the flags/length word until the frame is complete.
const LENGTH_PLACEHOLDER: u32 = 0x0403_0201;

/// Request line and headers opening a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynStream {
    /// Locally assigned stream id (top bit clear).
    pub stream_id: u32,
    /// 0 (highest) ..= 7 (lowest); only the low 3 bits go on the wire.
    pub priority: u8,
    pub host: String,
    pub method: String,
    pub path: String,
    pub headers: Headers,
}

/// Status and headers answering a SYN_STREAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynReply {
    pub stream_id: u32,
    pub status: u16,
    pub headers: Headers,
}

impl SynReply {
    /// HTTP/1.1 style status line, e.g. `HTTP/1.1 200 OK`.
    pub fn status_line(&self) -> String {
        status_line(self.status)
    }
}

/// HTTP/1.1 style status line with the canonical reason phrase.
pub fn status_line(status: u16) -> String {
    let reason = http::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown");
    format!("HTTP/1.1 {} {}", status, reason)
}

/// Remove the last DNS label of `host` when it ends with `suffix`.
///
/// `api.seacat` becomes `api`; a bare `seacat` (no dot to cut at) is kept.
pub fn strip_host_suffix<'a>(host: &'a str, suffix: &str) -> &'a str {
    if suffix.is_empty() || !host.ends_with(suffix) {
        return host;
    }
    match host.rfind('.') {
        Some(pos) if pos > 0 => &host[..pos],
        _ => host,
    }
}

fn put_control_header(frame: &mut FrameBuf, version: u16, kind: u16, flags_length: u32) -> Result<()> {
    frame.put_u16(CONTROL_BIT | version)?;
    frame.put_u16(kind)?;
    frame.put_u32(flags_length)
}

/// Patch the flags/length word of the frame that starts at offset 0.
///
/// The payload length is everything written after the header.
pub fn finish_frame(frame: &mut FrameBuf, fin: bool) -> Result<()> {
    let length = frame.position().checked_sub(HEADER_SIZE).ok_or_else(|| {
        SeacatError::Protocol(format!("Frame of {} bytes has no header", frame.position()))
    })?;
    let frame_flags = if fin { flags::FIN } else { 0 };
    frame.put_u32_at(FLAGS_LENGTH_OFFSET, flags_length(frame_flags, length)?)
}

/// Write a SYN_STREAM frame.
///
/// `Host` and `Connection` headers are not sent; the host travels in its own
/// field with `host_suffix` stripped.
pub fn encode_syn_stream(
    frame: &mut FrameBuf,
    syn: &SynStream,
    fin: bool,
    host_suffix: &str,
) -> Result<()> {
    if syn.stream_id & 0x8000_0000 != 0 {
        return Err(SeacatError::Protocol(format!(
            "Stream id {:#x} has the control bit set",
            syn.stream_id
        )));
    }

    put_control_header(frame, CNTL_FRAME_VERSION_ALX1, CNTL_TYPE_SYN_STREAM, LENGTH_PLACEHOLDER)?;
    frame.put_u32(syn.stream_id)?;
    frame.put_u32(0)?; // associated stream id, unused
    frame.put_u8((syn.priority & 0x07) << 5)?;
    frame.put_u8(0)?; // slot
    debug_assert_eq!(frame.position(), SYN_STREAM_FIXED_END);

    put_vle_string(frame, strip_host_suffix(&syn.host, host_suffix))?;
    put_vle_string(frame, &syn.method)?;
    put_vle_string(frame, &syn.path)?;

    for (name, value) in syn.headers.iter() {
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("connection") {
            continue;
        }
        put_vle_string(frame, name)?;
        put_vle_string(frame, value)?;
    }

    finish_frame(frame, fin)
}

/// Read a SYN_STREAM payload.
pub fn decode_syn_stream(frame: &mut FrameBuf) -> Result<SynStream> {
    let stream_id = frame.get_u32()?;
    let _associated = frame.get_u32()?;
    let priority = frame.get_u8()? >> 5;
    let _slot = frame.get_u8()?;

    let host = get_vle_string(frame)?;
    let method = get_vle_string(frame)?;
    let path = get_vle_string(frame)?;
    let headers = get_header_pairs(frame)?;

    Ok(SynStream {
        stream_id,
        priority,
        host,
        method,
        path,
        headers,
    })
}

/// Write a SYN_REPLY frame.
pub fn encode_syn_reply(frame: &mut FrameBuf, reply: &SynReply, fin: bool) -> Result<()> {
    put_control_header(frame, CNTL_FRAME_VERSION_ALX1, CNTL_TYPE_SYN_REPLY, LENGTH_PLACEHOLDER)?;
    frame.put_u32(reply.stream_id)?;
    frame.put_u16(reply.status)?;
    frame.put_u16(0)?; // reserved

    for (name, value) in reply.headers.iter() {
        put_vle_string(frame, name)?;
        put_vle_string(frame, value)?;
    }

    finish_frame(frame, fin)
}

/// Read the stream id at the start of a SYN_REPLY or RST_STREAM payload.
pub fn decode_stream_id(frame: &mut FrameBuf) -> Result<u32> {
    frame.get_u32()
}

/// Read the rest of a SYN_REPLY payload, after its stream id.
pub fn decode_syn_reply_body(frame: &mut FrameBuf, stream_id: u32) -> Result<SynReply> {
    let status = frame.get_u16()?;
    let _reserved = frame.get_u16()?;
    let headers = get_header_pairs(frame)?;
    Ok(SynReply {
        stream_id,
        status,
        headers,
    })
}

/// Read a full SYN_REPLY payload.
pub fn decode_syn_reply(frame: &mut FrameBuf) -> Result<SynReply> {
    let stream_id = decode_stream_id(frame)?;
    decode_syn_reply_body(frame, stream_id)
}

fn get_header_pairs(frame: &mut FrameBuf) -> Result<Headers> {
    let mut headers = Headers::new();
    while frame.has_remaining() {
        let name = get_vle_string(frame)?;
        let value = get_vle_string(frame)?;
        headers.add(name, value);
    }
    Ok(headers)
}

/// Write an RST_STREAM frame.
pub fn encode_rst_stream(frame: &mut FrameBuf, stream_id: u32, status: u32) -> Result<()> {
    put_control_header(frame, CNTL_FRAME_VERSION_SPD3, CNTL_TYPE_RST_STREAM, 8)?;
    frame.put_u32(stream_id)?;
    frame.put_u32(status)
}

/// Read an RST_STREAM payload as `(stream_id, status)`.
pub fn decode_rst_stream(frame: &mut FrameBuf) -> Result<(u32, u32)> {
    let stream_id = frame.get_u32()?;
    let status = frame.get_u32()?;
    Ok((stream_id, status))
}

/// Write a PING frame.
pub fn encode_ping(frame: &mut FrameBuf, ping_id: u32) -> Result<()> {
    put_control_header(frame, CNTL_FRAME_VERSION_SPD3, CNTL_TYPE_PING, 4)?;
    frame.put_u32(ping_id)
}

/// Read a PING payload.
pub fn decode_ping(frame: &mut FrameBuf) -> Result<u32> {
    frame.get_u32()
}

/// Start a data frame: stream id plus a placeholder flags/length word.
///
/// Write the payload next, then call [`finish_frame`].
pub fn begin_data_frame(frame: &mut FrameBuf, stream_id: u32) -> Result<()> {
    frame.put_u32(stream_id & 0x7FFF_FFFF)?;
    frame.put_u32(LENGTH_PLACEHOLDER)
}

/// Render a frame for logs.
///
/// Data frames print as `[D <id> <len> FIN]`, control frames as
/// `[C <version> <type> <len> <flags>]`. Reads absolute offsets, so the cursor
/// is untouched.
pub fn describe_frame(frame: &FrameBuf) -> String {
    let (first, second) = match (frame.get_u32_at(0), frame.get_u32_at(4)) {
        (Ok(first), Ok(second)) => (first, second),
        _ => return format!("[? {} bytes]", frame.limit()),
    };
    let frame_flags = (second >> 24) as u8;
    let length = second & 0x00FF_FFFF;

    if first & 0x8000_0000 != 0 {
        let version = (first >> 16) as u16 & !CONTROL_BIT;
        let kind = first as u16;
        format!("[C {:#x} {} {} {:#04x}]", version, kind, length, frame_flags)
    } else {
        let fin = if flags::has_flag(frame_flags, flags::FIN) {
            " FIN"
        } else {
            ""
        };
        format!("[D {} {}{}]", first, length, fin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::{FrameHeader, RST_STREAM_STATUS_INVALID_STREAM};

    fn buffer() -> FrameBuf {
        FrameBuf::with_capacity(16 * 1024)
    }

    fn request(headers: Headers) -> SynStream {
        SynStream {
            stream_id: 1,
            priority: 3,
            host: "api".to_string(),
            method: "GET".to_string(),
            path: "/posts/1/comments".to_string(),
            headers,
        }
    }

    fn read_control(frame: &mut FrameBuf) -> crate::protocol::ControlHeader {
        match FrameHeader::read(frame).unwrap() {
            FrameHeader::Control(h) => h,
            other => panic!("expected control frame, got {:?}", other),
        }
    }

    #[test]
    fn test_strip_host_suffix() {
        assert_eq!(strip_host_suffix("api.seacat", ".seacat"), "api");
        assert_eq!(strip_host_suffix("a.b.seacat", ".seacat"), "a.b");
        assert_eq!(strip_host_suffix("example.com", ".seacat"), "example.com");
        assert_eq!(strip_host_suffix(".seacat", ".seacat"), ".seacat");
        assert_eq!(strip_host_suffix("api.seacat", ""), "api.seacat");
    }

    #[test]
    fn test_syn_stream_layout() {
        let mut frame = buffer();
        let mut syn = request(Headers::new());
        syn.host = "api.seacat".to_string();
        encode_syn_stream(&mut frame, &syn, true, ".seacat").unwrap();
        frame.flip();

        assert_eq!(&frame.as_slice()[..4], &[0x80, 0xA1, 0x00, 0x01]);
        // priority 3 -> 0b011 << 5
        assert_eq!(frame.get_u8_at(16).unwrap(), 0x60);
        assert_eq!(frame.get_u8_at(17).unwrap(), 0);

        let header = read_control(&mut frame);
        assert!(header.is_fin());
        assert_eq!(header.length as usize + HEADER_SIZE, frame.limit());

        let decoded = decode_syn_stream(&mut frame).unwrap();
        assert_eq!(decoded.host, "api");
        assert_eq!(decoded.method, "GET");
        assert_eq!(decoded.path, "/posts/1/comments");
        assert_eq!(decoded.priority, 3);
    }

    #[test]
    fn test_syn_stream_round_trip_without_fin() {
        let mut headers = Headers::new();
        headers
            .add("Accept", "application/json")
            .add("X-Trace", "abc");
        let syn = request(headers);

        let mut frame = buffer();
        encode_syn_stream(&mut frame, &syn, false, ".seacat").unwrap();
        frame.flip();

        assert!(!read_control(&mut frame).is_fin());
        assert_eq!(decode_syn_stream(&mut frame).unwrap(), syn);
    }

    #[test]
    fn test_syn_stream_skips_host_and_connection() {
        let mut headers = Headers::new();
        headers
            .add("HOST", "api.seacat")
            .add("connection", "keep-alive")
            .add("Accept", "*/*");

        let mut frame = buffer();
        encode_syn_stream(&mut frame, &request(headers), true, ".seacat").unwrap();
        frame.flip();
        read_control(&mut frame);

        let decoded = decode_syn_stream(&mut frame).unwrap();
        assert_eq!(decoded.headers.len(), 1);
        assert_eq!(decoded.headers.get("accept"), Some("*/*"));
    }

    #[test]
    fn test_syn_stream_rejects_control_bit_stream_id() {
        let mut syn = request(Headers::new());
        syn.stream_id = 0x8000_0001;
        assert!(encode_syn_stream(&mut buffer(), &syn, true, ".seacat").is_err());
    }

    #[test]
    fn test_syn_stream_with_many_headers() {
        let headers: Headers = (0..300).map(|i| (format!("X-H{}", i), format!("v{}", i))).collect();
        let syn = request(headers);

        let mut frame = buffer();
        encode_syn_stream(&mut frame, &syn, true, ".seacat").unwrap();
        frame.flip();
        read_control(&mut frame);

        let decoded = decode_syn_stream(&mut frame).unwrap();
        assert_eq!(decoded.headers.len(), 300);
        assert_eq!(decoded, syn);
    }

    #[test]
    fn test_syn_stream_overflowing_frame_is_error() {
        let headers: Headers = [("X-Big", "y".repeat(20_000))].into_iter().collect();
        assert!(encode_syn_stream(&mut buffer(), &request(headers), true, ".seacat").is_err());
    }

    #[test]
    fn test_syn_reply_round_trip() {
        let reply = SynReply {
            stream_id: 5,
            status: 200,
            headers: [("Content-Type", "application/json")].into_iter().collect(),
        };

        let mut frame = buffer();
        encode_syn_reply(&mut frame, &reply, true).unwrap();
        frame.flip();

        let header = read_control(&mut frame);
        assert_eq!(header.kind, CNTL_TYPE_SYN_REPLY);
        assert!(header.is_fin());

        let decoded = decode_syn_reply(&mut frame).unwrap();
        assert_eq!(decoded, reply);
        assert_eq!(decoded.status_line(), "HTTP/1.1 200 OK");
    }

    #[test]
    fn test_syn_reply_empty_and_boundary_headers() {
        for value_len in [0usize, 0xF9, 0xFA, 0xFFFF] {
            let reply = SynReply {
                stream_id: 3,
                status: 404,
                headers: [("X-Len", "v".repeat(value_len))].into_iter().collect(),
            };
            let mut frame = FrameBuf::with_capacity(0x1_0100);
            encode_syn_reply(&mut frame, &reply, false).unwrap();
            frame.flip();
            read_control(&mut frame);
            assert_eq!(decode_syn_reply(&mut frame).unwrap(), reply);
        }

        let empty = SynReply {
            stream_id: 3,
            status: 204,
            headers: Headers::new(),
        };
        let mut frame = buffer();
        encode_syn_reply(&mut frame, &empty, true).unwrap();
        frame.flip();
        assert_eq!(read_control(&mut frame).length, 8);
        assert_eq!(decode_syn_reply(&mut frame).unwrap(), empty);
    }

    #[test]
    fn test_rst_stream_round_trip() {
        let mut frame = buffer();
        encode_rst_stream(&mut frame, 9, RST_STREAM_STATUS_INVALID_STREAM).unwrap();
        frame.flip();

        assert_eq!(frame.limit(), 16);
        let header = read_control(&mut frame);
        assert_eq!(header.version, CNTL_FRAME_VERSION_SPD3);
        assert_eq!(header.kind, CNTL_TYPE_RST_STREAM);
        assert_eq!(decode_rst_stream(&mut frame).unwrap(), (9, 2));
    }

    #[test]
    fn test_ping_round_trip() {
        let mut frame = buffer();
        encode_ping(&mut frame, 0xFFFF_FFFE).unwrap();
        frame.flip();

        assert_eq!(frame.limit(), 12);
        assert_eq!(read_control(&mut frame).kind, CNTL_TYPE_PING);
        assert_eq!(decode_ping(&mut frame).unwrap(), 0xFFFF_FFFE);
    }

    #[test]
    fn test_data_frame() {
        let mut frame = buffer();
        begin_data_frame(&mut frame, 7).unwrap();
        frame.put_slice(b"hello").unwrap();
        finish_frame(&mut frame, true).unwrap();
        frame.flip();

        assert_eq!(describe_frame(&frame), "[D 7 5 FIN]");
        match FrameHeader::read(&mut frame).unwrap() {
            FrameHeader::Data(h) => {
                assert_eq!(h.stream_id, 7);
                assert_eq!(h.length, 5);
                assert!(h.is_fin());
            }
            other => panic!("expected data frame, got {:?}", other),
        }
        assert_eq!(frame.chunk(), b"hello");
    }

    #[test]
    fn test_empty_fin_data_frame() {
        let mut frame = buffer();
        begin_data_frame(&mut frame, 3).unwrap();
        finish_frame(&mut frame, true).unwrap();
        frame.flip();
        assert_eq!(frame.limit(), HEADER_SIZE);
        assert_eq!(describe_frame(&frame), "[D 3 0 FIN]");
    }

    #[test]
    fn test_describe_control_frame() {
        let mut frame = buffer();
        encode_ping(&mut frame, 1).unwrap();
        frame.flip();
        assert_eq!(describe_frame(&frame), "[C 0x3 6 4 0x00]");

        assert_eq!(describe_frame(&FrameBuf::from_slice(&[1, 2])), "[? 2 bytes]");
    }

    #[test]
    fn test_status_line_reason_phrase() {
        assert_eq!(status_line(500), "HTTP/1.1 500 Internal Server Error");
        assert_eq!(status_line(799), "HTTP/1.1 799 Unknown");
    }
}
