// ABOUTME: Envelope type definitions for the relay wire protocol
// ABOUTME: One body variant per request kind, concrete payloads per data kind

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Sender name used on envelopes the relay itself originates (presence events)
pub const SERVER_NAME: &str = "SERVER";

/// Status token sent back on a successful handshake
pub const OK_STATUS: &str = "OK";

/// Request kind of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Pull request (accepted but not served)
    Get,
    /// Data push
    Post,
    /// Participant joined, or media address registration
    Add,
    /// Participant left
    Rm,
    /// Sender is leaving
    Disconnect,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Get => "GET",
            RequestKind::Post => "POST",
            RequestKind::Add => "ADD",
            RequestKind::Rm => "RM",
            RequestKind::Disconnect => "DISCONNECT",
        };
        f.write_str(name)
    }
}

/// Data kind carried by GET and POST envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    /// Video frame
    Video,
    /// Audio block
    Audio,
    /// Chat text
    Text,
    /// File transfer part
    File,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataKind::Video => "VIDEO",
            DataKind::Audio => "AUDIO",
            DataKind::Text => "TEXT",
            DataKind::File => "FILE",
        };
        f.write_str(name)
    }
}

/// Media kinds relayed over the datagram channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MediaKind {
    /// Camera frames
    Video,
    /// Microphone blocks
    Audio,
}

impl MediaKind {
    /// All media kinds, in relay start order
    pub const ALL: [MediaKind; 2] = [MediaKind::Video, MediaKind::Audio];

    /// Matching data kind
    pub fn data_kind(self) -> DataKind {
        match self {
            MediaKind::Video => DataKind::Video,
            MediaKind::Audio => DataKind::Audio,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.data_kind().fmt(f)
    }
}

/// One step of a chunked file transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilePart {
    /// Destination filename; starts a new transfer
    Name(String),
    /// Next chunk of file content
    Chunk(Vec<u8>),
    /// End of transfer
    End,
}

/// POST payload, typed by data kind
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Encoded image buffer
    Video(Vec<u8>),
    /// Encoded audio block
    Audio(Vec<u8>),
    /// UTF-8 chat line
    Text(String),
    /// File transfer part
    File(FilePart),
}

impl Payload {
    /// Data kind of this payload
    pub fn data_kind(&self) -> DataKind {
        match self {
            Payload::Video(_) => DataKind::Video,
            Payload::Audio(_) => DataKind::Audio,
            Payload::Text(_) => DataKind::Text,
            Payload::File(_) => DataKind::File,
        }
    }

    /// Media kind, if this is a video or audio payload
    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            Payload::Video(_) => Some(MediaKind::Video),
            Payload::Audio(_) => Some(MediaKind::Audio),
            _ => None,
        }
    }

    /// Wrap raw media bytes in the payload variant for `kind`
    pub fn media(kind: MediaKind, data: Vec<u8>) -> Self {
        match kind {
            MediaKind::Video => Payload::Video(data),
            MediaKind::Audio => Payload::Audio(data),
        }
    }
}

// Media buffers can be large; print sizes rather than bytes.
impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Video(data) => write!(f, "Video({} bytes)", data.len()),
            Payload::Audio(data) => write!(f, "Audio({} bytes)", data.len()),
            Payload::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Payload::File(FilePart::Chunk(data)) => write!(f, "File(Chunk({} bytes))", data.len()),
            Payload::File(part) => f.debug_tuple("File").field(part).finish(),
        }
    }
}

/// Envelope body: request kind plus its concrete payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    /// Pull request for a data kind
    Get(DataKind),
    /// Data push
    Post(Payload),
    /// `participant` joined (control channel) or registers a receive address (media channel)
    Add {
        /// Subject of the event
        participant: String,
    },
    /// `participant` left
    Remove {
        /// Departing participant
        participant: String,
    },
    /// Sender is leaving
    Disconnect,
}

impl Body {
    /// Request kind of this body
    pub fn request_kind(&self) -> RequestKind {
        match self {
            Body::Get(_) => RequestKind::Get,
            Body::Post(_) => RequestKind::Post,
            Body::Add { .. } => RequestKind::Add,
            Body::Remove { .. } => RequestKind::Rm,
            Body::Disconnect => RequestKind::Disconnect,
        }
    }

    /// Data kind, meaningful for GET and POST only
    pub fn data_kind(&self) -> Option<DataKind> {
        match self {
            Body::Get(kind) => Some(*kind),
            Body::Post(payload) => Some(payload.data_kind()),
            _ => None,
        }
    }
}

/// Who an envelope is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Recipients {
    /// Every session except the sender
    #[default]
    Everyone,
    /// Only the named sessions
    Only(BTreeSet<String>),
}

impl Recipients {
    /// Build a recipient set; an empty list means broadcast
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if set.is_empty() {
            Recipients::Everyone
        } else {
            Recipients::Only(set)
        }
    }

    /// True when the envelope goes to everyone but the sender
    pub fn is_broadcast(&self) -> bool {
        match self {
            Recipients::Everyone => true,
            Recipients::Only(set) => set.is_empty(),
        }
    }
}

/// The routed unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Name of the participant (or `SERVER`) that produced the envelope
    pub sender: String,
    /// Request kind and payload
    pub body: Body,
    /// Addressing mode
    pub recipients: Recipients,
}

impl Envelope {
    /// Create a broadcast envelope
    pub fn new(sender: impl Into<String>, body: Body) -> Self {
        Self {
            sender: sender.into(),
            body,
            recipients: Recipients::Everyone,
        }
    }

    /// Create a POST envelope
    pub fn post(sender: impl Into<String>, payload: Payload) -> Self {
        Self::new(sender, Body::Post(payload))
    }

    /// Create a text chat envelope
    pub fn text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::post(sender, Payload::Text(text.into()))
    }

    /// Server presence event: `participant` joined
    pub fn presence_add(participant: impl Into<String>) -> Self {
        Self::new(
            SERVER_NAME,
            Body::Add {
                participant: participant.into(),
            },
        )
    }

    /// Server presence event: `participant` left
    pub fn presence_remove(participant: impl Into<String>) -> Self {
        Self::new(
            SERVER_NAME,
            Body::Remove {
                participant: participant.into(),
            },
        )
    }

    /// Media address registration sent on a media channel
    pub fn media_register(sender: impl Into<String>) -> Self {
        let sender = sender.into();
        Self::new(
            sender.clone(),
            Body::Add {
                participant: sender,
            },
        )
    }

    /// Address the envelope to the given recipients
    pub fn to(mut self, recipients: Recipients) -> Self {
        self.recipients = recipients;
        self
    }

    /// Request kind shortcut
    pub fn request_kind(&self) -> RequestKind {
        self.body.request_kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_recipient_list_is_broadcast() {
        assert_eq!(
            Recipients::from_names(Vec::<String>::new()),
            Recipients::Everyone
        );
        assert!(Recipients::Only(BTreeSet::new()).is_broadcast());
    }

    #[test]
    fn test_single_recipient_is_multicast() {
        let recipients = Recipients::from_names(["carol"]);
        assert!(!recipients.is_broadcast());
        assert_ne!(recipients, Recipients::Everyone);
    }

    #[test]
    fn test_body_kinds() {
        let env = Envelope::text("alice", "hi");
        assert_eq!(env.request_kind(), RequestKind::Post);
        assert_eq!(env.body.data_kind(), Some(DataKind::Text));

        let env = Envelope::presence_remove("bob");
        assert_eq!(env.sender, SERVER_NAME);
        assert_eq!(env.request_kind(), RequestKind::Rm);
        assert_eq!(env.body.data_kind(), None);

        assert_eq!(Body::Get(DataKind::Video).request_kind(), RequestKind::Get);
        assert_eq!(RequestKind::Disconnect.to_string(), "DISCONNECT");
    }

    #[test]
    fn test_media_payload_kind() {
        let payload = Payload::media(MediaKind::Audio, vec![1, 2, 3]);
        assert_eq!(payload.media_kind(), Some(MediaKind::Audio));
        assert_eq!(payload.data_kind(), DataKind::Audio);
        assert_eq!(format!("{:?}", payload), "Audio(3 bytes)");
        assert_eq!(Payload::Text("x".into()).media_kind(), None);
    }

    #[test]
    fn test_media_register_names_sender() {
        let env = Envelope::media_register("alice");
        assert_eq!(env.sender, "alice");
        assert_eq!(
            env.body,
            Body::Add {
                participant: "alice".to_string()
            }
        );
    }
}
