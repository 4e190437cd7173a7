// ABOUTME: Participant-side client for the relay
// ABOUTME: Control connection, media sockets, participant directory and chat input parsing

mod chat;
mod connection;
mod media;
mod participant;

pub use chat::{parse_input, ChatInput};
pub use connection::{RelayClient, RelayReader, RelayWriter};
pub use media::{MediaClient, MAX_MEDIA_DATAGRAM};
pub use participant::{DirectoryEvent, Participant, ParticipantRole, Participants};
