//! Frame codec for length-prefixed framing.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 4 bytes: payload length (little-endian `u32`)
//! - N bytes: payload
//!
//! There is no magic, version or flags field; the handshake messages carry the
//! protocol version. The length field is checked against the codec's maximum
//! before any payload buffer is allocated, so a hostile or corrupt prefix
//! cannot force a large allocation.

use crate::error::{ProtocolError, Result};

/// Maximum payload size (10 MB), matching the daemon's receive bound.
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Frame header size: the 4-byte length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Encoder and decoder for length-prefixed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec enforcing [`MAX_FRAME_SIZE`].
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom payload bound.
    ///
    /// The bound is clamped to what a `u32` length prefix can express.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u32::MAX as usize),
        }
    }

    /// Returns the largest payload this codec accepts.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Build the length prefix for a payload of `len` bytes.
    pub fn encode_header(&self, len: usize) -> Result<[u8; FRAME_HEADER_SIZE]> {
        self.check_len(len)?;
        Ok((len as u32).to_le_bytes())
    }

    /// Parse a length prefix, rejecting lengths over the bound.
    ///
    /// Callers allocate the payload buffer only after this returns `Ok`.
    pub fn decode_header(&self, header: [u8; FRAME_HEADER_SIZE]) -> Result<usize> {
        let len = u32::from_le_bytes(header) as usize;
        self.check_len(len)?;
        Ok(len)
    }

    /// Encode a payload into a complete frame.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let header = self.encode_header(payload.len())?;

        let mut output = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        output.extend_from_slice(&header);
        output.extend_from_slice(payload);
        Ok(output)
    }

    /// Decode one frame from the front of `data`.
    ///
    /// Returns the payload and the number of bytes consumed. Fails with
    /// [`ProtocolError::FrameTruncated`] if `data` ends before the declared
    /// length is satisfied.
    pub fn decode(&self, data: &[u8]) -> Result<(Vec<u8>, usize)> {
        match self.try_decode(data)? {
            Some(decoded) => Ok(decoded),
            None => {
                let expected = match data.get(..FRAME_HEADER_SIZE) {
                    Some(header) => {
                        FRAME_HEADER_SIZE
                            + u32::from_le_bytes([header[0], header[1], header[2], header[3]])
                                as usize
                    }
                    None => FRAME_HEADER_SIZE,
                };
                Err(ProtocolError::FrameTruncated {
                    expected,
                    received: data.len(),
                })
            }
        }
    }

    /// Try to decode a frame, returning `None` if more data is needed.
    ///
    /// An oversized length prefix is an error even when the payload has not
    /// arrived yet.
    pub fn try_decode(&self, data: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
        let Some(header) = data.get(..FRAME_HEADER_SIZE) else {
            return Ok(None);
        };
        let len = self.decode_header([header[0], header[1], header[2], header[3]])?;

        let end = FRAME_HEADER_SIZE + len;
        if data.len() < end {
            return Ok(None);
        }

        Ok(Some((data[FRAME_HEADER_SIZE..end].to_vec(), end)))
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}
