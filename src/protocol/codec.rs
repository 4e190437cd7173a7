// ABOUTME: Length-prefixed stream framing and envelope serialization
// ABOUTME: Control frames carry a 4-byte big-endian length; datagrams carry one envelope

use crate::error::Error;
use crate::protocol::messages::Envelope;
use crate::Result;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Length of the frame header (4 bytes for length)
pub const HEADER_LEN: usize = 4;

/// Serialize an envelope
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    Ok(bincode::serialize(envelope)?)
}

/// Deserialize an envelope
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    Ok(bincode::deserialize(bytes)?)
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::FrameTooLarge(payload.len(), u32::MAX as usize))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame
///
/// Returns `Ok(None)` when the stream ends, including when it ends part-way
/// through a frame. Callers treat that the same as an explicit disconnect.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    if !read_full(reader, &mut header).await? {
        return Ok(None);
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(Error::FrameTooLarge(len, max_len));
    }

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload).await? {
        return Ok(None);
    }

    Ok(Some(payload))
}

/// Write a UTF-8 frame (handshake name and status)
pub async fn write_text_frame<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, text.as_bytes()).await
}

/// Read a UTF-8 frame (handshake name and status)
pub async fn read_text_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, max_len).await? {
        Some(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| Error::MalformedEnvelope(format!("handshake text is not UTF-8: {}", e))),
        None => Ok(None),
    }
}

/// Encode an envelope and write it as one frame
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(envelope)?;
    write_frame(writer, &bytes).await
}

/// Fill `buf` completely; `false` on a clean or short end of stream
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
