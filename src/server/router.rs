// ABOUTME: Broadcast/multicast router for control-channel envelopes
// ABOUTME: Resolves recipients against the registry and queues one shared frame per target

use crate::protocol::codec::encode;
use crate::protocol::messages::{Envelope, Recipients};
use crate::server::registry::{Frame, Session, SessionRegistry};
use std::sync::Arc;
use std::time::Duration;

/// What happened to one routed envelope
#[derive(Debug, Default)]
pub struct Delivery {
    /// Names whose queue accepted the frame
    pub delivered: Vec<String>,
    /// Targets that could not be reached; already marked not-connected
    pub failed: Vec<Arc<Session>>,
}

impl Delivery {
    /// Whether every target was reached
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Routes control envelopes to sessions
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<SessionRegistry>,
    send_timeout: Duration,
}

impl Router {
    /// Create a router over `registry`
    pub fn new(registry: Arc<SessionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    /// The registry targets are resolved against
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Resolve the sessions an envelope from `sender` is addressed to
    ///
    /// Unknown names in a multicast set are skipped.
    pub fn targets(&self, sender: &str, recipients: &Recipients) -> Vec<Arc<Session>> {
        match recipients {
            Recipients::Only(names) if !names.is_empty() => names
                .iter()
                .filter_map(|name| {
                    let target = self.registry.lookup(name);
                    if target.is_none() {
                        log::debug!("Skipping unknown recipient {} (from {})", name, sender);
                    }
                    target
                })
                .collect(),
            _ => self
                .registry
                .snapshot()
                .into_iter()
                .filter(|s| s.name() != sender)
                .collect(),
        }
    }

    /// Route `envelope` from `sender` to its recipients
    pub async fn route(&self, sender: &str, envelope: &Envelope) -> Delivery {
        let targets = self.targets(sender, &envelope.recipients);
        log::debug!(
            "Routing {}:{:?} from {} to {} target(s)",
            envelope.request_kind(),
            envelope.body.data_kind(),
            sender,
            targets.len()
        );
        self.deliver_to(&targets, envelope).await
    }

    /// Deliver `envelope` to an explicit list of sessions
    ///
    /// Each target is attempted independently; a failure only affects that
    /// target.
    pub async fn deliver_to(&self, targets: &[Arc<Session>], envelope: &Envelope) -> Delivery {
        let mut delivery = Delivery::default();
        if targets.is_empty() {
            return delivery;
        }

        let frame: Frame = match encode(envelope) {
            Ok(bytes) => Arc::from(bytes),
            Err(e) => {
                log::error!("Failed to encode envelope from {}: {}", envelope.sender, e);
                return delivery;
            }
        };

        for target in targets {
            match target.deliver(Arc::clone(&frame), self.send_timeout).await {
                Ok(()) => delivery.delivered.push(target.name().to_string()),
                Err(e) => {
                    log::warn!("Delivery to {} failed: {}", target.name(), e);
                    target.mark_disconnected();
                    delivery.failed.push(Arc::clone(target));
                }
            }
        }

        delivery
    }
}
