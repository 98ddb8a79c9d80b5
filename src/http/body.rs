//! Request bodies.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::outbound::OutboundStream;
use crate::error::Result;

const COPY_CHUNK: usize = 16 * 1024;

/// Body of an outbound request.
#[derive(Default)]
pub enum Body {
    /// No body; the SYN_STREAM carries FIN.
    #[default]
    Empty,
    /// Bytes known up front.
    Full(Bytes),
    /// Bytes read from an async source until EOF.
    Stream(Pin<Box<dyn AsyncRead + Send>>),
}

impl Body {
    pub fn empty() -> Self {
        Body::Empty
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Body::Stream(Box::pin(reader))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Length if known without reading.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Full(bytes) => Some(bytes.len() as u64),
            Body::Stream(_) => None,
        }
    }

    /// Write the whole body into `outbound` and close it with FIN.
    pub(crate) async fn copy_into(self, outbound: &OutboundStream) -> Result<()> {
        match self {
            Body::Empty => {}
            Body::Full(bytes) => outbound.write(&bytes).await?,
            Body::Stream(mut reader) => {
                let mut chunk = vec![0u8; COPY_CHUNK];
                loop {
                    let n = reader.read(&mut chunk).await?;
                    if n == 0 {
                        break;
                    }
                    outbound.write(&chunk[..n]).await?;
                }
            }
        }
        outbound.close().await
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Full(bytes) => write!(f, "Body::Full({} bytes)", bytes.len()),
            Body::Stream(_) => f.write_str("Body::Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Full(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Full(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Full(Bytes::from_static(text.as_bytes()))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Body::Full(Bytes::from_static(bytes))
    }
}

impl From<()> for Body {
    fn from(_: ()) -> Self {
        Body::Empty
    }
}
