// ABOUTME: Connectionless media relay, one instance per media kind
// ABOUTME: Records receive addresses from ADD datagrams and fans POST datagrams out to the rest

use crate::protocol::codec::decode;
use crate::protocol::messages::{Body, MediaKind};
use crate::server::registry::SessionRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;

/// What the relay did with one datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Sender's receive address recorded
    Bound {
        /// Participant that registered
        participant: String,
        /// Address it will receive at
        addr: SocketAddr,
    },
    /// Frame forwarded to this many participants
    Forwarded(usize),
    /// Datagram discarded
    Dropped(DropReason),
}

/// Why a datagram was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Bytes did not decode to an envelope
    Malformed,
    /// Sender is not a connected participant
    UnknownSender,
    /// Payload is not this relay's media kind
    WrongKind,
    /// Datagram did not come from the sender's registered address
    UnboundSource,
    /// Request kind has no meaning on a media channel
    Unsupported,
}

/// Best-effort fan-out endpoint for one media kind
#[derive(Debug)]
pub struct MediaRelay {
    kind: MediaKind,
    socket: UdpSocket,
    registry: Arc<SessionRegistry>,
    max_datagram_len: usize,
}

impl MediaRelay {
    /// Bind a relay for `kind` on `addr`
    pub async fn bind(
        kind: MediaKind,
        addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        max_datagram_len: usize,
    ) -> crate::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            kind,
            socket,
            registry,
            max_datagram_len,
        })
    }

    /// Media kind relayed here
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Bound local address
    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive and relay datagrams until `shutdown` flips to `true`
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; self.max_datagram_len];
        log::info!(
            "{} relay listening on {}",
            self.kind,
            self.socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".to_string())
        );

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) => {
                            self.handle_datagram(&buf[..len], from).await;
                        }
                        Err(e) => {
                            // ICMP port-unreachable from a departed participant surfaces here
                            // on some platforms; it must not stop the relay.
                            log::debug!("{} relay receive error: {}", self.kind, e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("{} relay shutting down", self.kind);
                        break;
                    }
                }
            }
        }
    }

    /// Process one datagram received from `from`
    pub async fn handle_datagram(&self, data: &[u8], from: SocketAddr) -> RelayOutcome {
        let envelope = match decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::debug!("{} relay dropping malformed datagram from {}: {}", self.kind, from, e);
                return RelayOutcome::Dropped(DropReason::Malformed);
            }
        };

        match &envelope.body {
            Body::Add { .. } => {
                if !self.registry.bind_media(&envelope.sender, self.kind, from) {
                    log::debug!(
                        "{} relay ignoring ADD from unknown participant {}",
                        self.kind,
                        envelope.sender
                    );
                    return RelayOutcome::Dropped(DropReason::UnknownSender);
                }
                log::info!("{} address for {} bound to {}", self.kind, envelope.sender, from);
                RelayOutcome::Bound {
                    participant: envelope.sender,
                    addr: from,
                }
            }
            Body::Post(payload) => {
                if payload.media_kind() != Some(self.kind) {
                    return RelayOutcome::Dropped(DropReason::WrongKind);
                }
                let Some(sender) = self.registry.lookup(&envelope.sender) else {
                    return RelayOutcome::Dropped(DropReason::UnknownSender);
                };
                if sender.media_addr(self.kind) != Some(from) {
                    log::debug!(
                        "{} relay dropping POST from {} sent from unregistered address {}",
                        self.kind,
                        envelope.sender,
                        from
                    );
                    return RelayOutcome::Dropped(DropReason::UnboundSource);
                }

                // Participants without a binding for this kind are skipped.
                let targets = self.registry.media_targets(self.kind, &envelope.sender);
                let mut forwarded = 0;
                for (name, addr) in targets {
                    match self.socket.send_to(data, addr).await {
                        Ok(_) => forwarded += 1,
                        Err(e) => {
                            log::debug!("{} relay send to {} ({}) failed: {}", self.kind, name, addr, e);
                        }
                    }
                }
                RelayOutcome::Forwarded(forwarded)
            }
            other => {
                log::debug!(
                    "{} relay ignoring {} from {}",
                    self.kind,
                    other.request_kind(),
                    envelope.sender
                );
                RelayOutcome::Dropped(DropReason::Unsupported)
            }
        }
    }
}

/// Spawn a relay task for each bound relay, sharing one shutdown signal
pub fn spawn_media_relays(
    relays: Vec<MediaRelay>,
) -> (Vec<tokio::task::JoinHandle<()>>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles = relays
        .into_iter()
        .map(|relay| {
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move { relay.run(shutdown).await })
        })
        .collect();

    (handles, shutdown_tx)
}
