// ABOUTME: Chunked file transfer over POST/FILE control envelopes
// ABOUTME: Filename, then fixed-size chunks, then an empty terminator

//! A transfer is three phases sharing one recipient set:
//!
//! ```text
//! FilePart::Name("report.pdf")   create a fresh file on the receiver
//! FilePart::Chunk([..1024])      append, in arrival order
//! FilePart::Chunk([..1024])
//! FilePart::Chunk([..317])
//! FilePart::End                  close it and surface "file received"
//! ```
//!
//! The control connection is sequential per sender, so chunk order is kept
//! without sequence numbers. There is no acknowledgement: a connection lost
//! mid-transfer leaves a partial file behind.

use crate::protocol::messages::FilePart;
use crate::Result;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Size of each file chunk on the wire
pub const FILE_CHUNK_SIZE: usize = 1024;

/// Name used when the announced filename has no usable final component
const FALLBACK_FILENAME: &str = "received_file";

/// Splits file content into the ordered parts of one transfer
#[derive(Debug)]
pub struct FileChunker<'a> {
    filename: Option<String>,
    chunks: std::slice::Chunks<'a, u8>,
    finished: bool,
}

impl<'a> FileChunker<'a> {
    /// Create a chunker for `data` announced as `filename`
    pub fn new(filename: impl Into<String>, data: &'a [u8]) -> Self {
        Self::with_chunk_size(filename, data, FILE_CHUNK_SIZE)
    }

    /// Create a chunker with a custom chunk size
    pub fn with_chunk_size(filename: impl Into<String>, data: &'a [u8], chunk_size: usize) -> Self {
        Self {
            filename: Some(filename.into()),
            chunks: data.chunks(chunk_size.max(1)),
            finished: false,
        }
    }
}

impl Iterator for FileChunker<'_> {
    type Item = FilePart;

    fn next(&mut self) -> Option<FilePart> {
        if let Some(name) = self.filename.take() {
            return Some(FilePart::Name(name));
        }
        if let Some(chunk) = self.chunks.next() {
            return Some(FilePart::Chunk(chunk.to_vec()));
        }
        if !self.finished {
            self.finished = true;
            return Some(FilePart::End);
        }
        None
    }
}

/// All parts for sending `data` as `filename`
pub fn file_parts(filename: impl Into<String>, data: &[u8]) -> Vec<FilePart> {
    FileChunker::new(filename, data).collect()
}

/// Outcome of feeding one part to a [`FileReceiver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// A new file was created for an incoming transfer
    Started {
        /// Participant sending the file
        sender: String,
        /// Where the content is being written
        path: PathBuf,
    },
    /// The terminator arrived; the file is complete
    Completed {
        /// Participant that sent the file
        sender: String,
        /// Final location
        path: PathBuf,
        /// Total bytes written
        bytes: u64,
    },
}

#[derive(Debug)]
struct ActiveTransfer {
    path: PathBuf,
    file: File,
    bytes: u64,
}

/// Reassembles incoming transfers into a download directory
///
/// Transfers are tracked per sender so two participants can send at once.
#[derive(Debug)]
pub struct FileReceiver {
    dir: PathBuf,
    active: HashMap<String, ActiveTransfer>,
}

impl FileReceiver {
    /// Create a receiver writing into `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            active: HashMap::new(),
        }
    }

    /// Download directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a transfer from `sender` is in progress
    pub fn is_receiving(&self, sender: &str) -> bool {
        self.active.contains_key(sender)
    }

    /// Apply one part received from `sender`
    pub async fn handle(&mut self, sender: &str, part: FilePart) -> Result<Option<FileEvent>> {
        match part {
            FilePart::Name(name) => {
                if let Some(mut previous) = self.active.remove(sender) {
                    log::warn!(
                        "New transfer from {} before the last one ended; keeping {} as is",
                        sender,
                        previous.path.display()
                    );
                    previous.file.flush().await?;
                }

                let (path, file) = create_unique(&self.dir, &name).await?;
                log::info!("Receiving file {} from {}", path.display(), sender);

                self.active.insert(
                    sender.to_string(),
                    ActiveTransfer {
                        path: path.clone(),
                        file,
                        bytes: 0,
                    },
                );
                Ok(Some(FileEvent::Started {
                    sender: sender.to_string(),
                    path,
                }))
            }
            FilePart::Chunk(data) => {
                let Some(transfer) = self.active.get_mut(sender) else {
                    log::warn!("Dropping file chunk from {}: no transfer in progress", sender);
                    return Ok(None);
                };
                transfer.file.write_all(&data).await?;
                transfer.bytes += data.len() as u64;
                Ok(None)
            }
            FilePart::End => {
                let Some(mut transfer) = self.active.remove(sender) else {
                    log::warn!("Ignoring file terminator from {}: no transfer in progress", sender);
                    return Ok(None);
                };
                transfer.file.flush().await?;
                transfer.file.sync_all().await?;
                log::info!(
                    "File {} received from {} ({} bytes)",
                    transfer.path.display(),
                    sender,
                    transfer.bytes
                );
                Ok(Some(FileEvent::Completed {
                    sender: sender.to_string(),
                    path: transfer.path,
                    bytes: transfer.bytes,
                }))
            }
        }
    }
}

/// Reduce an announced filename to its final path component
pub fn sanitize_filename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or(FALLBACK_FILENAME)
        .to_string()
}

/// `report.txt` with suffix 2 becomes `report_2.txt`
fn suffixed_name(name: &str, suffix: u32) -> String {
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext),
        None => format!("{}_{}", stem, suffix),
    }
}

/// Create a new file in `dir` without clobbering an existing one
async fn create_unique(dir: &Path, announced: &str) -> Result<(PathBuf, File)> {
    let base = sanitize_filename(announced);
    let mut suffix = 0u32;

    loop {
        let candidate = if suffix == 0 {
            dir.join(&base)
        } else {
            dir.join(suffixed_name(&base, suffix))
        };

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
