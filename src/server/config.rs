// ABOUTME: Server configuration
// ABOUTME: Defines listen addresses and per-connection limits for the relay

use crate::protocol::messages::MediaKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Default control channel port
pub const MAIN_PORT: u16 = 53530;
/// Default video relay port
pub const VIDEO_PORT: u16 = 53531;
/// Default audio relay port
pub const AUDIO_PORT: u16 = 53532;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// TCP address of the main (control) channel
    pub main_addr: SocketAddr,
    /// UDP address of the video relay
    pub video_addr: SocketAddr,
    /// UDP address of the audio relay
    pub audio_addr: SocketAddr,
    /// How long a delivery may wait on a full recipient queue
    pub send_timeout: Duration,
    /// Frames buffered per recipient before deliveries start waiting
    pub send_queue_capacity: usize,
    /// Time allowed for a client to send its name
    pub handshake_timeout: Duration,
    /// Largest control frame accepted, in bytes
    pub max_frame_len: usize,
    /// Receive buffer for media datagrams, in bytes
    pub max_datagram_len: usize,
    /// Longest participant name accepted, in bytes
    pub max_name_len: usize,
}

impl ServerConfig {
    /// Listen on `host` with the default ports
    pub fn bind_host(host: IpAddr) -> Self {
        Self {
            main_addr: SocketAddr::new(host, MAIN_PORT),
            video_addr: SocketAddr::new(host, VIDEO_PORT),
            audio_addr: SocketAddr::new(host, AUDIO_PORT),
            ..Default::default()
        }
    }

    /// Set the control channel address
    pub fn main_addr(mut self, addr: SocketAddr) -> Self {
        self.main_addr = addr;
        self
    }

    /// Set the video relay address
    pub fn video_addr(mut self, addr: SocketAddr) -> Self {
        self.video_addr = addr;
        self
    }

    /// Set the audio relay address
    pub fn audio_addr(mut self, addr: SocketAddr) -> Self {
        self.audio_addr = addr;
        self
    }

    /// Set the per-recipient send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the per-recipient queue capacity
    pub fn send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity.max(1);
        self
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the control frame size limit
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Set the media datagram buffer size
    pub fn max_datagram_len(mut self, len: usize) -> Self {
        self.max_datagram_len = len;
        self
    }

    /// Relay address for a media kind
    pub fn media_addr(&self, kind: MediaKind) -> SocketAddr {
        match kind {
            MediaKind::Video => self.video_addr,
            MediaKind::Audio => self.audio_addr,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let any = IpAddr::from([0, 0, 0, 0]);
        Self {
            main_addr: SocketAddr::new(any, MAIN_PORT),
            video_addr: SocketAddr::new(any, VIDEO_PORT),
            audio_addr: SocketAddr::new(any, AUDIO_PORT),
            send_timeout: Duration::from_secs(2),
            send_queue_capacity: 256,
            handshake_timeout: Duration::from_secs(10),
            max_frame_len: 16 * 1024 * 1024, // 16MB
            max_datagram_len: 65_535,
            max_name_len: 64,
        }
    }
}
