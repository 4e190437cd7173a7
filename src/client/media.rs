// ABOUTME: Participant side of a media relay channel
// ABOUTME: Registers the receive address and sends/receives one envelope per datagram

use crate::error::Error;
use crate::protocol::codec::{decode, encode};
use crate::protocol::messages::{Body, Envelope, MediaKind, Payload};
use crate::Result;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Largest UDP payload over IPv4
pub const MAX_MEDIA_DATAGRAM: usize = 65_507;

/// Datagram socket for one media kind
#[derive(Debug)]
pub struct MediaClient {
    name: String,
    kind: MediaKind,
    socket: UdpSocket,
    relay_addr: SocketAddr,
}

impl MediaClient {
    /// Bind a local socket that talks to the relay at `relay_addr`
    pub async fn bind(
        local: SocketAddr,
        relay_addr: SocketAddr,
        name: impl Into<String>,
        kind: MediaKind,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self {
            name: name.into(),
            kind,
            socket,
            relay_addr,
        })
    }

    /// Media kind this socket carries
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Local socket address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Announce this socket as our receive address for the kind
    ///
    /// Must be sent after the control handshake succeeds; the relay ignores
    /// registrations from unknown names.
    pub async fn register(&self) -> Result<()> {
        self.send_envelope(&Envelope::media_register(self.name.clone()))
            .await
    }

    /// Send one encoded frame (video) or block (audio)
    pub async fn send_frame(&self, data: Vec<u8>) -> Result<()> {
        let envelope = Envelope::post(self.name.clone(), Payload::media(self.kind, data));
        self.send_envelope(&envelope).await
    }

    async fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let bytes = encode(envelope)?;
        if bytes.len() > MAX_MEDIA_DATAGRAM {
            return Err(Error::FrameTooLarge(bytes.len(), MAX_MEDIA_DATAGRAM));
        }
        self.socket.send_to(&bytes, self.relay_addr).await?;
        Ok(())
    }

    /// Wait for the next relayed frame of our kind
    ///
    /// Returns the sender's name and the media bytes. Datagrams that fail to
    /// decode or carry another payload are skipped.
    pub async fn recv_frame(&self) -> Result<(String, Vec<u8>)> {
        let mut buf = vec![0u8; MAX_MEDIA_DATAGRAM];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            let envelope = match decode(&buf[..len]) {
                Ok(envelope) => envelope,
                Err(e) => {
                    log::debug!("Dropping malformed {} datagram from {}: {}", self.kind, from, e);
                    continue;
                }
            };
            match (envelope.body, self.kind) {
                (Body::Post(Payload::Video(data)), MediaKind::Video)
                | (Body::Post(Payload::Audio(data)), MediaKind::Audio) => {
                    return Ok((envelope.sender, data));
                }
                (body, _) => {
                    log::debug!("Ignoring {} datagram on {} socket", body.request_kind(), self.kind);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_register_sends_add_with_own_name() {
        let relay = UdpSocket::bind(loopback()).await.unwrap();
        let client = MediaClient::bind(loopback(), relay.local_addr().unwrap(), "alice", MediaKind::Audio)
            .await
            .unwrap();

        client.register().await.unwrap();

        let mut buf = vec![0u8; 1024];
        let (len, from) = relay.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, client.local_addr().unwrap());
        let envelope = decode(&buf[..len]).unwrap();
        assert_eq!(envelope.sender, "alice");
        assert_eq!(
            envelope.body,
            Body::Add {
                participant: "alice".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_recv_frame_skips_other_kinds() {
        let relay = UdpSocket::bind(loopback()).await.unwrap();
        let client = MediaClient::bind(loopback(), relay.local_addr().unwrap(), "alice", MediaKind::Video)
            .await
            .unwrap();
        let target = client.local_addr().unwrap();

        let audio = encode(&Envelope::post("bob", Payload::Audio(vec![1]))).unwrap();
        let video = encode(&Envelope::post("bob", Payload::Video(vec![7, 8]))).unwrap();
        relay.send_to(b"garbage", target).await.unwrap();
        relay.send_to(&audio, target).await.unwrap();
        relay.send_to(&video, target).await.unwrap();

        let (sender, data) = tokio::time::timeout(Duration::from_secs(1), client.recv_frame())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sender, "bob");
        assert_eq!(data, vec![7, 8]);
    }

    #[tokio::test]
    async fn test_send_frame_rejects_oversize() {
        let relay = UdpSocket::bind(loopback()).await.unwrap();
        let client = MediaClient::bind(loopback(), relay.local_addr().unwrap(), "alice", MediaKind::Video)
            .await
            .unwrap();

        let result = client.send_frame(vec![0u8; MAX_MEDIA_DATAGRAM]).await;
        assert!(matches!(result, Err(Error::FrameTooLarge(_, MAX_MEDIA_DATAGRAM))));
    }
}
