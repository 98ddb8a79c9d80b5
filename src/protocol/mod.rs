//! Protocol module - wire format, frame buffers, pooling and the frame codec.
//!
//! This module implements the binary framing shared with the gateway:
//! - 8-byte control/data header encoding/decoding and VLE strings
//! - Fixed-capacity frame buffers and the watermark-bounded pool
//! - SYN_STREAM / SYN_REPLY / RST_STREAM / PING / data frame codec

mod frame;
mod frame_buffer;
mod frame_pool;
mod headers;
mod wire_format;

pub use frame::{
    begin_data_frame, decode_ping, decode_rst_stream, decode_stream_id, decode_syn_reply,
    decode_syn_reply_body, decode_syn_stream, describe_frame, encode_ping, encode_rst_stream,
    encode_syn_reply, encode_syn_stream, finish_frame, status_line, strip_host_suffix, SynReply,
    SynStream,
};
pub use frame_buffer::FrameBuf;
pub use frame_pool::FramePool;
pub use headers::Headers;
pub use wire_format::{
    build_frame_version_type, flags, flags_length, get_vle_string, is_control_byte,
    put_vle_string, vle_len, ControlHeader, DataHeader, FrameHeader, CNTL_FRAME_VERSION_ALX1,
    CNTL_FRAME_VERSION_SPD3, CNTL_TYPE_PING, CNTL_TYPE_RST_STREAM, CNTL_TYPE_SYN_REPLY,
    CNTL_TYPE_SYN_STREAM, HEADER_SIZE, MAX_PAYLOAD_LENGTH, RST_STREAM_STATUS_INVALID_STREAM,
    RST_STREAM_STATUS_STREAM_ALREADY_CLOSED,
};
