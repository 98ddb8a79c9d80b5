//! Fixed-capacity frame buffer with a position/limit cursor.
//!
//! Uses `bytes::BytesMut` as the backing store. A buffer starts in write
//! mode (`position` = bytes written, `limit` = capacity); [`FrameBuf::flip`]
//! switches it to read mode (`limit` = bytes written, `position` = 0).
//!
//! All multi-byte integers are Big Endian.
//!
//! Invariant: `0 <= position <= limit <= capacity`.
//!
//! # Example
//!
//! ```
//! use seacat_client::protocol::FrameBuf;
//!
//! let mut frame = FrameBuf::with_capacity(16);
//! frame.put_u16(0x80A1).unwrap();
//! frame.put_u32(42).unwrap();
//! frame.flip();
//!
//! assert_eq!(frame.limit(), 6);
//! assert_eq!(frame.get_u16().unwrap(), 0x80A1);
//! assert_eq!(frame.get_u32().unwrap(), 42);
//! assert_eq!(frame.remaining(), 0);
//! ```

use std::fmt;

use bytes::BytesMut;

use crate::error::{Result, SeacatError};

/// A single frame-sized byte buffer.
///
/// Buffers are moved between owners (pool, scheduler, stream, engine) and are
/// never shared, so a `FrameBuf` is deliberately not `Clone`.
pub struct FrameBuf {
    /// Backing bytes, always `capacity` long.
    data: BytesMut,
    /// Read/write cursor.
    position: usize,
    /// End of valid data (read mode) or writable extent (write mode).
    limit: usize,
}

impl FrameBuf {
    /// Create a zeroed buffer in write mode.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::zeroed(capacity),
            position: 0,
            limit: capacity,
        }
    }

    /// Create a read-mode buffer holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut frame = Self::with_capacity(bytes.len());
        frame.data[..bytes.len()].copy_from_slice(bytes);
        frame
    }

    /// Total size of the buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current cursor.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Current limit.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes between the cursor and the limit.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Check if there is anything left between the cursor and the limit.
    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// Move the cursor.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.limit {
            return Err(SeacatError::Protocol(format!(
                "Position {} beyond limit {}",
                position, self.limit
            )));
        }
        self.position = position;
        Ok(())
    }

    /// Move the limit, pulling the cursor back if needed.
    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        if limit > self.capacity() {
            return Err(SeacatError::Protocol(format!(
                "Limit {} beyond capacity {}",
                limit,
                self.capacity()
            )));
        }
        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
        Ok(())
    }

    /// Switch from write mode to read mode.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Back to write mode over the full capacity. Content is not zeroed.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity();
    }

    fn reserve(&mut self, len: usize) -> Result<usize> {
        if self.remaining() < len {
            return Err(SeacatError::Protocol(format!(
                "Frame overflow: need {} bytes, {} remaining",
                len,
                self.remaining()
            )));
        }
        let at = self.position;
        self.position += len;
        Ok(at)
    }

    fn check_absolute(&self, index: usize, len: usize) -> Result<()> {
        if index + len > self.limit {
            return Err(SeacatError::Protocol(format!(
                "Index {} + {} beyond limit {}",
                index, len, self.limit
            )));
        }
        Ok(())
    }

    /// Write one byte at the cursor.
    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        let at = self.reserve(1)?;
        self.data[at] = value;
        Ok(())
    }

    /// Write a Big Endian u16 at the cursor.
    pub fn put_u16(&mut self, value: u16) -> Result<()> {
        self.put_slice(&value.to_be_bytes())
    }

    /// Write a Big Endian u32 at the cursor.
    pub fn put_u32(&mut self, value: u32) -> Result<()> {
        self.put_slice(&value.to_be_bytes())
    }

    /// Write raw bytes at the cursor.
    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<()> {
        let at = self.reserve(bytes.len())?;
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Overwrite a Big Endian u32 at an absolute index; the cursor is untouched.
    pub fn put_u32_at(&mut self, index: usize, value: u32) -> Result<()> {
        self.check_absolute(index, 4)?;
        self.data[index..index + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Read one byte at the cursor.
    pub fn get_u8(&mut self) -> Result<u8> {
        let at = self.reserve(1)?;
        Ok(self.data[at])
    }

    /// Read a Big Endian u16 at the cursor.
    pub fn get_u16(&mut self) -> Result<u16> {
        let at = self.reserve(2)?;
        Ok(u16::from_be_bytes([self.data[at], self.data[at + 1]]))
    }

    /// Read a Big Endian u32 at the cursor.
    pub fn get_u32(&mut self) -> Result<u32> {
        let at = self.reserve(4)?;
        Ok(u32::from_be_bytes([
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ]))
    }

    /// Read `len` bytes at the cursor.
    pub fn get_slice(&mut self, len: usize) -> Result<&[u8]> {
        let at = self.reserve(len)?;
        Ok(&self.data[at..at + len])
    }

    /// Peek one byte at an absolute index.
    pub fn get_u8_at(&self, index: usize) -> Result<u8> {
        self.check_absolute(index, 1)?;
        Ok(self.data[index])
    }

    /// Peek a Big Endian u32 at an absolute index.
    pub fn get_u32_at(&self, index: usize) -> Result<u32> {
        self.check_absolute(index, 4)?;
        Ok(u32::from_be_bytes([
            self.data[index],
            self.data[index + 1],
            self.data[index + 2],
            self.data[index + 3],
        ]))
    }

    /// Copy as many remaining bytes as fit into `dst`, advancing the cursor.
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.remaining());
        dst[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        n
    }

    /// Copy as many bytes of `src` as fit, advancing the cursor.
    pub fn write_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.remaining());
        self.data[self.position..self.position + n].copy_from_slice(&src[..n]);
        self.position += n;
        n
    }

    /// Bytes between cursor and limit.
    #[inline]
    pub fn chunk(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    /// Writable region between cursor and limit.
    ///
    /// The transport engine fills this region and reports how many bytes it
    /// wrote; see [`crate::reactor::CoreCallbacks::on_frame_received`].
    #[inline]
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        let (position, limit) = (self.position, self.limit);
        &mut self.data[position..limit]
    }

    /// Everything from the start of the buffer to the limit.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.limit]
    }
}

impl fmt::Debug for FrameBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuf")
            .field("capacity", &self.capacity())
            .field("position", &self.position)
            .field("limit", &self.limit)
            .finish()
    }
}
