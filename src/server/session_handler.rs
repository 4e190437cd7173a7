// ABOUTME: Main channel connection handler
// ABOUTME: Name handshake, presence synthesis, per-session read loop and writer task

use crate::error::Error;
use crate::protocol::codec::{decode, read_frame, read_text_frame, write_frame, write_text_frame};
use crate::protocol::messages::{Body, Envelope, OK_STATUS, SERVER_NAME};
use crate::server::config::ServerConfig;
use crate::server::lifecycle::SessionLifecycle;
use crate::server::registry::{Frame, Registration, RegistryError, Session};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

/// Handle one accepted control connection until it ends
pub async fn handle_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    lifecycle: Arc<SessionLifecycle>,
    config: Arc<ServerConfig>,
) {
    let (mut reader, mut writer) = socket.into_split();

    // Wait for the participant name
    let name = match read_name(&mut reader, &config).await {
        Ok(name) => name,
        Err(e) => {
            log::warn!("Handshake with {} failed: {}", peer_addr, e);
            return;
        }
    };

    if let Err(reason) = validate_name(&name, config.max_name_len) {
        reject(&mut writer, peer_addr, &reason.to_string()).await;
        return;
    }

    let registration = match lifecycle
        .registry()
        .register(&name, peer_addr, config.send_queue_capacity)
    {
        Ok(registration) => registration,
        Err(RegistryError::NameTaken(name)) => {
            let reason = Error::NameTaken(name).to_string();
            reject(&mut writer, peer_addr, &reason).await;
            return;
        }
    };
    let Registration { session, peers, rx } = registration;

    if let Err(e) = write_text_frame(&mut writer, OK_STATUS).await {
        log::warn!("Failed to send handshake status to {}: {}", name, e);
        lifecycle.disconnect(session).await;
        return;
    }

    log::info!("Participant connected: {} ({})", name, peer_addr);

    // Spawn task to forward queued frames to the socket; the newcomer's
    // ADDs for existing peers are already queued.
    let send_task = tokio::spawn(write_loop(writer, rx, Arc::clone(&session)));

    // Skip peers that have left since registration
    let peers: Vec<Arc<Session>> = peers.into_iter().filter(|p| p.is_connected()).collect();
    if session.is_connected() {
        lifecycle
            .deliver_to(&peers, &Envelope::presence_add(session.name()))
            .await;
    }

    read_loop(&mut reader, &session, &lifecycle, &config).await;

    // Cleanup
    lifecycle.disconnect(Arc::clone(&session)).await;
    if let Err(e) = send_task.await {
        log::debug!("Writer task for {} ended abnormally: {}", name, e);
    }

    log::info!("Participant {} disconnected", name);
}

/// Read the handshake name within the configured timeout
async fn read_name(reader: &mut OwnedReadHalf, config: &ServerConfig) -> crate::Result<String> {
    let read = read_text_frame(reader, config.max_name_len.max(1) * 4);
    match tokio::time::timeout(config.handshake_timeout, read).await {
        Ok(Ok(Some(name))) => Ok(name),
        Ok(Ok(None)) => Err(Error::ConnectionLost),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Timeout("waiting for participant name".to_string())),
    }
}

/// Check a handshake name before it is registered
pub fn validate_name(name: &str, max_len: usize) -> crate::Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidName("name is empty".to_string()));
    }
    if name.len() > max_len {
        return Err(Error::InvalidName(format!(
            "name is longer than {} bytes",
            max_len
        )));
    }
    if name == SERVER_NAME {
        return Err(Error::InvalidName(format!("'{}' is reserved", SERVER_NAME)));
    }
    Ok(())
}

/// Send a rejection status and close without registering anything
async fn reject(writer: &mut OwnedWriteHalf, peer_addr: SocketAddr, reason: &str) {
    log::info!("Rejecting {}: {}", peer_addr, reason);
    if let Err(e) = write_text_frame(writer, reason).await {
        log::debug!("Failed to send rejection to {}: {}", peer_addr, e);
    }
    let _ = writer.shutdown().await;
}

/// Read envelopes until end of stream, DISCONNECT, or the close signal
async fn read_loop(
    reader: &mut OwnedReadHalf,
    session: &Arc<Session>,
    lifecycle: &SessionLifecycle,
    config: &ServerConfig,
) {
    let mut closed = session.close_signal();

    loop {
        let frame = tokio::select! {
            frame = read_frame(reader, config.max_frame_len) => frame,
            _ = wait_closed(&mut closed) => {
                log::debug!("Session {} closed by server", session.name());
                return;
            }
        };

        let bytes = match frame {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                log::info!("Participant {} closed connection", session.name());
                return;
            }
            Err(e) => {
                log::warn!("Read error for {}: {}", session.name(), e);
                return;
            }
        };

        let mut envelope = match decode(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("Dropping malformed envelope from {}: {}", session.name(), e);
                continue;
            }
        };

        match envelope.body {
            Body::Disconnect => {
                log::info!("Participant {} sent DISCONNECT", session.name());
                return;
            }
            Body::Get(kind) => {
                // Media is pushed through the media relays; nothing is served on pull.
                log::debug!("Ignoring GET {} from {}", kind, session.name());
            }
            _ => {
                if envelope.sender != session.name() {
                    log::debug!(
                        "Rewriting sender '{}' to '{}'",
                        envelope.sender,
                        session.name()
                    );
                    envelope.sender = session.name().to_string();
                }
                lifecycle.route(session, &envelope).await;
            }
        }
    }
}

/// Drain the session queue into the socket
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Frame>,
    session: Arc<Session>,
) {
    let mut closed = session.close_signal();

    loop {
        tokio::select! {
            // Queued frames go out before a close is honoured
            biased;

            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    log::debug!("Session {} disconnected (send failed): {}", session.name(), e);
                    session.mark_disconnected();
                    break;
                }
            }
            _ = wait_closed(&mut closed) => {
                flush_queued(&mut writer, &mut rx, &session).await;
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
}

/// Write whatever is still queued when the session is closed
async fn flush_queued(writer: &mut OwnedWriteHalf, rx: &mut mpsc::Receiver<Frame>, session: &Session) {
    while let Ok(frame) = rx.try_recv() {
        if let Err(e) = write_frame(writer, &frame).await {
            log::debug!("Dropping queued frames for {}: {}", session.name(), e);
            return;
        }
    }
}

/// Resolve once the watch flips to `true` (or its sender is gone)
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("alice", 64).is_ok());
        assert!(matches!(validate_name("", 64), Err(Error::InvalidName(_))));
        assert!(matches!(validate_name("   ", 64), Err(Error::InvalidName(_))));
        assert!(matches!(validate_name(SERVER_NAME, 64), Err(Error::InvalidName(_))));
        assert!(matches!(
            validate_name(&"x".repeat(65), 64),
            Err(Error::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_closed_resolves_after_flip() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait_closed(&mut rx).await });
        tx.send_replace(true);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_loop_flushes_queue_before_close() {
        use crate::server::registry::SessionRegistry;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server_side, peer_addr) = listener.accept().await.unwrap();
        let (_server_reader, server_writer) = server_side.into_split();

        let registry = SessionRegistry::new();
        let Registration { session, rx, .. } = registry.register("a", peer_addr, 4).unwrap();
        for text in ["one", "two"] {
            let frame: Frame = Arc::from(crate::protocol::codec::encode(&Envelope::text("x", text)).unwrap());
            session.deliver(frame, std::time::Duration::from_millis(10)).await.unwrap();
        }
        session.close();

        write_loop(server_writer, rx, Arc::clone(&session)).await;

        for expected in ["one", "two"] {
            let bytes = read_frame(&mut client, 1024).await.unwrap().unwrap();
            assert_eq!(decode(&bytes).unwrap(), Envelope::text("x", expected));
        }
        assert_eq!(read_frame(&mut client, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wait_closed_when_already_closed() {
        let (tx, mut rx) = watch::channel(false);
        tx.send_replace(true);
        wait_closed(&mut rx).await;
    }
}
