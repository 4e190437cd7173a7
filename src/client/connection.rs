// ABOUTME: Relay control connection for participants
// ABOUTME: Name handshake, envelope send/receive and streaming file sends

use crate::error::Error;
use crate::protocol::codec::{decode, read_frame, read_text_frame, write_envelope, write_text_frame};
use crate::protocol::file_transfer::{sanitize_filename, FILE_CHUNK_SIZE};
use crate::protocol::messages::{Body, Envelope, FilePart, Payload, Recipients, OK_STATUS};
use crate::Result;
use std::net::SocketAddr;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Default limit for incoming control frames
const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Receiving half of a relay connection
#[derive(Debug)]
pub struct RelayReader {
    reader: OwnedReadHalf,
    max_frame_len: usize,
}

impl RelayReader {
    /// Next envelope from the relay; `None` once the connection ends
    ///
    /// Frames that fail to decode are skipped.
    pub async fn recv(&mut self) -> Result<Option<Envelope>> {
        loop {
            let Some(bytes) = read_frame(&mut self.reader, self.max_frame_len).await? else {
                return Ok(None);
            };
            match decode(&bytes) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => log::warn!("Dropping malformed envelope from relay: {}", e),
            }
        }
    }
}

/// Sending half of a relay connection
#[derive(Debug)]
pub struct RelayWriter {
    name: String,
    writer: OwnedWriteHalf,
}

impl RelayWriter {
    /// Our participant name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a body to `recipients`
    pub async fn send(&mut self, body: Body, recipients: Recipients) -> Result<()> {
        let envelope = Envelope::new(self.name.clone(), body).to(recipients);
        write_envelope(&mut self.writer, &envelope).await
    }

    /// Send a chat line
    pub async fn send_text(&mut self, recipients: Recipients, text: impl Into<String>) -> Result<()> {
        self.send(Body::Post(Payload::Text(text.into())), recipients)
            .await
    }

    /// Stream the file at `path` to `recipients`
    ///
    /// Returns the number of content bytes sent.
    pub async fn send_file(&mut self, recipients: Recipients, path: &Path) -> Result<u64> {
        let filename = sanitize_filename(&path.to_string_lossy());
        let mut file = tokio::fs::File::open(path).await?;

        self.send_file_part(FilePart::Name(filename.clone()), &recipients)
            .await?;

        let mut total = 0u64;
        let mut buf = vec![0u8; FILE_CHUNK_SIZE];
        loop {
            let n = fill_chunk(&mut file, &mut buf).await?;
            if n == 0 {
                break;
            }
            self.send_file_part(FilePart::Chunk(buf[..n].to_vec()), &recipients)
                .await?;
            total += n as u64;
        }

        self.send_file_part(FilePart::End, &recipients).await?;
        log::info!("File {} sent ({} bytes)", filename, total);
        Ok(total)
    }

    async fn send_file_part(&mut self, part: FilePart, recipients: &Recipients) -> Result<()> {
        self.send(Body::Post(Payload::File(part)), recipients.clone())
            .await
    }

    /// Tell the relay we are leaving and close the connection
    pub async fn disconnect(mut self) -> Result<()> {
        self.send(Body::Disconnect, Recipients::Everyone).await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Connected, handshaken relay participant
#[derive(Debug)]
pub struct RelayClient {
    reader: RelayReader,
    writer: RelayWriter,
}

impl RelayClient {
    /// Connect to the relay at `addr` and claim `name`
    ///
    /// Fails with [`Error::HandshakeRejected`] when the relay answers with
    /// anything other than `OK` (for example, the name is taken).
    pub async fn connect(addr: SocketAddr, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        write_text_frame(&mut writer, &name).await?;
        let status = read_text_frame(&mut reader, DEFAULT_MAX_FRAME_LEN)
            .await?
            .ok_or(Error::ConnectionLost)?;
        if status != OK_STATUS {
            return Err(Error::HandshakeRejected(status));
        }

        log::info!("Connected to relay {} as {}", addr, name);
        Ok(Self {
            reader: RelayReader {
                reader,
                max_frame_len: DEFAULT_MAX_FRAME_LEN,
            },
            writer: RelayWriter { name, writer },
        })
    }

    /// Our participant name
    pub fn name(&self) -> &str {
        self.writer.name()
    }

    /// Split into independently usable halves
    pub fn split(self) -> (RelayReader, RelayWriter) {
        (self.reader, self.writer)
    }

    /// See [`RelayReader::recv`]
    pub async fn recv(&mut self) -> Result<Option<Envelope>> {
        self.reader.recv().await
    }

    /// See [`RelayWriter::send`]
    pub async fn send(&mut self, body: Body, recipients: Recipients) -> Result<()> {
        self.writer.send(body, recipients).await
    }

    /// See [`RelayWriter::send_text`]
    pub async fn send_text(&mut self, recipients: Recipients, text: impl Into<String>) -> Result<()> {
        self.writer.send_text(recipients, text).await
    }

    /// See [`RelayWriter::send_file`]
    pub async fn send_file(&mut self, recipients: Recipients, path: &Path) -> Result<u64> {
        self.writer.send_file(recipients, path).await
    }

    /// See [`RelayWriter::disconnect`]
    pub async fn disconnect(self) -> Result<()> {
        self.writer.disconnect().await
    }
}

/// Read until `buf` is full or the source ends; returns bytes read
async fn fill_chunk<R>(source: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
