// ABOUTME: Client-side view of who is in the meeting
// ABOUTME: Applies presence events and keeps the latest media per participant

use crate::protocol::messages::{Body, Envelope, Payload};
use std::collections::BTreeMap;

/// Whether a participant is this process or someone on the far side of the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRole {
    /// Owns the local capture devices
    Local,
    /// Known only through relayed envelopes
    Remote,
}

/// One meeting participant and their most recent media
#[derive(Debug, Clone)]
pub struct Participant {
    name: String,
    role: ParticipantRole,
    video: Option<Vec<u8>>,
    audio: Option<Vec<u8>>,
    camera_enabled: bool,
    microphone_enabled: bool,
}

impl Participant {
    /// Create a participant with no media yet
    pub fn new(name: impl Into<String>, role: ParticipantRole) -> Self {
        Self {
            name: name.into(),
            role,
            video: None,
            audio: None,
            camera_enabled: true,
            microphone_enabled: true,
        }
    }

    /// Participant name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local or remote
    pub fn role(&self) -> ParticipantRole {
        self.role
    }

    /// True for the participant owned by this process
    pub fn is_local(&self) -> bool {
        self.role == ParticipantRole::Local
    }

    /// Latest video frame, unless the camera is off
    pub fn video(&self) -> Option<&[u8]> {
        if self.camera_enabled {
            self.video.as_deref()
        } else {
            None
        }
    }

    /// Latest audio block, unless the microphone is off
    pub fn audio(&self) -> Option<&[u8]> {
        if self.microphone_enabled {
            self.audio.as_deref()
        } else {
            None
        }
    }

    /// Replace the latest video frame
    pub fn update_video(&mut self, frame: Vec<u8>) {
        self.video = Some(frame);
    }

    /// Replace the latest audio block
    pub fn update_audio(&mut self, block: Vec<u8>) {
        self.audio = Some(block);
    }

    /// Turn video output on or off
    pub fn set_camera_enabled(&mut self, enabled: bool) {
        self.camera_enabled = enabled;
        if !enabled {
            self.video = None;
        }
    }

    /// Turn audio output on or off
    pub fn set_microphone_enabled(&mut self, enabled: bool) {
        self.microphone_enabled = enabled;
        if !enabled {
            self.audio = None;
        }
    }
}

/// Change to the participant set caused by an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    /// A remote participant joined
    Joined(String),
    /// A remote participant left
    Left(String),
}

/// Participants known to this client, keyed by name
#[derive(Debug)]
pub struct Participants {
    local: String,
    members: BTreeMap<String, Participant>,
}

impl Participants {
    /// Directory holding only the local participant
    pub fn new(local: impl Into<String>) -> Self {
        let local = local.into();
        let mut members = BTreeMap::new();
        members.insert(local.clone(), Participant::new(local.clone(), ParticipantRole::Local));
        Self { local, members }
    }

    /// Name of the local participant
    pub fn local_name(&self) -> &str {
        &self.local
    }

    /// Look up by name
    pub fn get(&self, name: &str) -> Option<&Participant> {
        self.members.get(name)
    }

    /// Mutable lookup by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Participant> {
        self.members.get_mut(name)
    }

    /// All participants, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.members.values()
    }

    /// Remote participant names, sorted
    pub fn remote_names(&self) -> Vec<String> {
        self.members
            .values()
            .filter(|p| !p.is_local())
            .map(|p| p.name.clone())
            .collect()
    }

    /// Number of participants including the local one
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; the local participant is always present
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Apply a relayed envelope
    ///
    /// ADD and RM change membership; media POSTs update the sender's latest
    /// frame. Anything else is left for the caller.
    pub fn apply(&mut self, envelope: &Envelope) -> Option<DirectoryEvent> {
        match &envelope.body {
            Body::Add { participant } => {
                if self.members.contains_key(participant) {
                    log::warn!("Duplicate ADD for {}", participant);
                    return None;
                }
                self.members.insert(
                    participant.clone(),
                    Participant::new(participant.clone(), ParticipantRole::Remote),
                );
                Some(DirectoryEvent::Joined(participant.clone()))
            }
            Body::Remove { participant } => {
                if *participant == self.local {
                    log::warn!("Ignoring RM for the local participant");
                    return None;
                }
                match self.members.remove(participant) {
                    Some(_) => Some(DirectoryEvent::Left(participant.clone())),
                    None => {
                        log::warn!("RM for unknown participant {}", participant);
                        None
                    }
                }
            }
            Body::Post(Payload::Video(frame)) => {
                if let Some(member) = self.sender_mut(&envelope.sender) {
                    member.update_video(frame.clone());
                }
                None
            }
            Body::Post(Payload::Audio(block)) => {
                if let Some(member) = self.sender_mut(&envelope.sender) {
                    member.update_audio(block.clone());
                }
                None
            }
            _ => None,
        }
    }

    fn sender_mut(&mut self, sender: &str) -> Option<&mut Participant> {
        let member = self.members.get_mut(sender);
        if member.is_none() {
            log::debug!("Media from unknown participant {}", sender);
        }
        member
    }
}
