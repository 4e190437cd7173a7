// ABOUTME: Session registry
// ABOUTME: Thread-safe directory of connected participants keyed by unique name

use crate::protocol::codec::encode;
use crate::protocol::messages::{Envelope, MediaKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Encoded envelope ready to be written to a control connection
///
/// Shared between all recipients of one routed envelope.
pub type Frame = Arc<[u8]>;

/// Registry operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another session already holds this name
    #[error("name '{0}' is already taken")]
    NameTaken(String),
}

/// Why a frame could not be queued for a session
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The session's writer is gone
    #[error("connection closed")]
    Closed,
    /// The session's queue stayed full for the whole send timeout
    #[error("send queue stalled")]
    Timeout,
}

/// Server-side record of one connected participant
#[derive(Debug)]
pub struct Session {
    id: u64,
    name: String,
    peer_addr: SocketAddr,
    /// Outbound queue drained by the connection's writer task
    tx: mpsc::Sender<Frame>,
    connected: AtomicBool,
    torn_down: AtomicBool,
    media: RwLock<HashMap<MediaKind, SocketAddr>>,
    close: watch::Sender<bool>,
}

impl Session {
    fn new(id: u64, name: String, peer_addr: SocketAddr, tx: mpsc::Sender<Frame>) -> Self {
        let (close, _) = watch::channel(false);
        Self {
            id,
            name,
            peer_addr,
            tx,
            connected: AtomicBool::new(true),
            torn_down: AtomicBool::new(false),
            media: RwLock::new(HashMap::new()),
            close,
        }
    }

    /// Registry-assigned identifier, unique for the life of the process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Participant name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remote address of the control connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Liveness flag
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Clear the liveness flag
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Claim the right to tear this session down; true for the first caller only
    pub fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }

    /// Queue a frame, waiting at most `timeout` for space
    pub async fn deliver(&self, frame: Frame, timeout: Duration) -> Result<(), DeliveryError> {
        if !self.is_connected() {
            return Err(DeliveryError::Closed);
        }
        self.tx
            .send_timeout(frame, timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => DeliveryError::Timeout,
                mpsc::error::SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Record where this participant receives `kind` datagrams
    pub fn bind_media(&self, kind: MediaKind, addr: SocketAddr) {
        self.media.write().insert(kind, addr);
    }

    /// Bound address for `kind`, if any
    pub fn media_addr(&self, kind: MediaKind) -> Option<SocketAddr> {
        self.media.read().get(&kind).copied()
    }

    /// Drop every media binding
    pub fn clear_media(&self) {
        self.media.write().clear();
    }

    /// Ask the connection's reader and writer to stop
    pub fn close(&self) {
        self.close.send_replace(true);
    }

    /// Whether [`Session::close`] has been called
    pub fn is_closed(&self) -> bool {
        *self.close.borrow()
    }

    /// Receiver that resolves when the connection should stop
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.close.subscribe()
    }
}

/// Result of a successful registration
#[derive(Debug)]
pub struct Registration {
    /// The new session
    pub session: Arc<Session>,
    /// Sessions that were registered at the moment this one was added
    pub peers: Vec<Arc<Session>>,
    /// Queue drained by the connection's writer; already holds one ADD per peer
    pub rx: mpsc::Receiver<Frame>,
}

/// Directory of all connected sessions
#[derive(Debug)]
pub struct SessionRegistry {
    /// Map of participant name to session
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a participant under `name`
    ///
    /// Fails without side effects if the name is held by another session.
    /// The peer list is taken under the same lock as the insert, and one ADD
    /// per peer is queued to the new session before the lock is released. Any
    /// later RM for a peer therefore lands behind its ADD, and every pair of
    /// sessions sees each other exactly once in presence events.
    ///
    /// The queue holds `queue_capacity` frames on top of the initial ADDs.
    pub fn register(
        &self,
        name: &str,
        peer_addr: SocketAddr,
        queue_capacity: usize,
    ) -> Result<Registration, RegistryError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(name) {
            return Err(RegistryError::NameTaken(name.to_string()));
        }

        let peers: Vec<Arc<Session>> = sessions.values().cloned().collect();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1) + peers.len());
        for peer in &peers {
            queue_presence_add(&tx, peer.name());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, name.to_string(), peer_addr, tx));
        sessions.insert(name.to_string(), Arc::clone(&session));
        let total = sessions.len();
        drop(sessions);

        log::info!("Session {} ({}) registered, total sessions: {}", name, peer_addr, total);
        Ok(Registration { session, peers, rx })
    }

    /// Remove whatever session holds `name`; absent names are a no-op
    pub fn unregister(&self, name: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(name);
        if removed.is_some() {
            log::info!("Session {} removed, total sessions: {}", name, self.len());
        }
        removed
    }

    /// Remove `session` only if it still owns its name
    ///
    /// A newer session that reused the name is left alone.
    pub fn unregister_session(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.write();
        let owns_name = sessions
            .get(session.name())
            .is_some_and(|current| current.id() == session.id());
        if owns_name {
            sessions.remove(session.name());
            let total = sessions.len();
            drop(sessions);
            log::info!("Session {} removed, total sessions: {}", session.name(), total);
        }
        owns_name
    }

    /// Find a session by name
    pub fn lookup(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(name).cloned()
    }

    /// Stable copy of all sessions for iteration outside the lock
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Record a media binding for `name`; false if no such session
    pub fn bind_media(&self, name: &str, kind: MediaKind, addr: SocketAddr) -> bool {
        match self.lookup(name) {
            Some(session) => {
                session.bind_media(kind, addr);
                true
            }
            None => false,
        }
    }

    /// Bound `kind` addresses of every session except `except`
    pub fn media_targets(&self, kind: MediaKind, except: &str) -> Vec<(String, SocketAddr)> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.name() != except)
            .filter_map(|s| s.media_addr(kind).map(|addr| (s.name().to_string(), addr)))
            .collect()
    }

    /// Names of all connected participants, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no one is connected
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

fn queue_presence_add(tx: &mpsc::Sender<Frame>, participant: &str) {
    let frame: Frame = match encode(&Envelope::presence_add(participant)) {
        Ok(bytes) => Arc::from(bytes),
        Err(e) => {
            log::error!("Failed to encode ADD for {}: {}", participant, e);
            return;
        }
    };
    // The queue was sized for every peer, so this only fails if it is closed
    if let Err(e) = tx.try_send(frame) {
        log::warn!("Failed to queue ADD for {}: {}", participant, e);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
