//! Frame transport over any tokio byte stream.
//!
//! Frames are a 4-byte little-endian length followed by the payload. The
//! length is validated by [`FrameCodec`] before the payload buffer is
//! allocated.

use std::time::Duration;

use protocol::{FrameCodec, ProtocolError, Result, FRAME_HEADER_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Writes one frame and flushes the stream.
pub async fn send_frame<W>(writer: &mut W, codec: &FrameCodec, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = codec.encode_header(payload.len())?;
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame, retrying short reads until the declared length arrives.
pub async fn recv_frame<R>(reader: &mut R, codec: &FrameCodec) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    fill(reader, &mut header, 0).await?;

    let len = codec.decode_header(header)?;
    let mut payload = vec![0u8; len];
    fill(reader, &mut payload, FRAME_HEADER_SIZE).await?;
    Ok(payload)
}

/// [`recv_frame`] bounded by an idle timeout.
pub async fn recv_frame_timeout<R>(
    reader: &mut R,
    codec: &FrameCodec,
    timeout: Duration,
) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(timeout, recv_frame(reader, codec))
        .await
        .map_err(|_| {
            ProtocolError::Timeout(format!("no frame from daemon within {:?}", timeout))
        })?
}

/// Fills `buf` completely. `offset` is the number of frame bytes already
/// consumed, so truncation is reported against the whole frame.
async fn fill<R>(reader: &mut R, buf: &mut [u8], offset: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::FrameTruncated {
                expected: offset + buf.len(),
                received: offset + filled,
            });
        }
        filled += n;
    }
    Ok(())
}
