// ABOUTME: Main library entry point for relaymeet
// ABOUTME: Exports the relay server, wire protocol and participant client

//! # relaymeet
//!
//! A central relay for multi-party conferencing: live video, live audio, text chat
//! and file transfer between named participants.
//!
//! The relay keeps two transport disciplines apart:
//!
//! - **Main channel** (TCP): a reliable, ordered control connection per participant.
//!   Chat lines, presence events and file chunks travel here, either broadcast to
//!   everyone else or multicast to a named subset.
//! - **Media channels** (UDP, one per media kind): best-effort fan-out of video and
//!   audio frames to every other participant that registered a receive address.
//!
//! ## Example: Running a Relay
//!
//! ```no_run
//! use relaymeet::server::{RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default()
//!         .main_addr("0.0.0.0:53530".parse().unwrap());
//!
//!     let server = RelayServer::bind(config).await.unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

/// Participant-side connection helpers
pub mod client;
/// Wire protocol: envelopes, framing and the file transfer convention
pub mod protocol;
/// Relay server: registry, router, media relays and session lifecycle
pub mod server;

pub use client::{MediaClient, Participant, ParticipantRole, RelayClient};
pub use protocol::messages::{Body, DataKind, Envelope, MediaKind, Payload, Recipients};
pub use server::{RelayServer, ServerConfig};

/// Result type for relaymeet operations
pub type Result<T> = std::result::Result<T, error::Error>;

/// Error types for relaymeet
pub mod error {
    use thiserror::Error;

    /// Error types for relaymeet operations
    #[derive(Error, Debug)]
    pub enum Error {
        /// Socket or filesystem error
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        /// Envelope bytes could not be decoded (or encoded)
        #[error("Malformed envelope: {0}")]
        MalformedEnvelope(String),

        /// A frame header announced more bytes than we accept
        #[error("Frame of {0} bytes exceeds the limit of {1} bytes")]
        FrameTooLarge(usize, usize),

        /// Handshake name collides with a connected participant
        #[error("Name '{0}' is already taken")]
        NameTaken(String),

        /// Handshake name is empty, too long or reserved
        #[error("Invalid participant name: {0}")]
        InvalidName(String),

        /// The relay answered the handshake with something other than OK
        #[error("Handshake rejected: {0}")]
        HandshakeRejected(String),

        /// The peer went away mid-exchange
        #[error("Connection lost")]
        ConnectionLost,

        /// An operation did not finish in time
        #[error("Timed out: {0}")]
        Timeout(String),
    }

    impl From<bincode::Error> for Error {
        fn from(err: bincode::Error) -> Self {
            Error::MalformedEnvelope(err.to_string())
        }
    }
}
