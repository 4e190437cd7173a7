// ABOUTME: Wire protocol module for relaymeet
// ABOUTME: Envelope types, length-prefixed framing and chunked file transfer

/// Stream and datagram framing plus envelope (de)serialization
pub mod codec;
/// Chunked file transfer layered on POST/FILE envelopes
pub mod file_transfer;
/// Envelope and payload type definitions
pub mod messages;

pub use codec::{
    decode, encode, read_frame, read_text_frame, write_envelope, write_frame, write_text_frame,
};
pub use file_transfer::{file_parts, FileChunker, FileEvent, FileReceiver, FILE_CHUNK_SIZE};
pub use messages::{
    Body, DataKind, Envelope, FilePart, MediaKind, Payload, Recipients, RequestKind, OK_STATUS,
    SERVER_NAME,
};
