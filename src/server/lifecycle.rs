// ABOUTME: Session lifecycle and disconnect handling
// ABOUTME: Exactly-once teardown: RM broadcast, connection close, binding cleanup, registry removal

use crate::protocol::messages::Envelope;
use crate::server::registry::{Session, SessionRegistry};
use crate::server::router::{Delivery, Router};
use std::sync::Arc;

/// Coordinates routing and teardown for all sessions
///
/// Delivery failures discovered while routing turn into disconnects of the
/// failing targets, never of the sender.
#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    registry: Arc<SessionRegistry>,
    router: Router,
}

impl SessionLifecycle {
    /// Create a lifecycle handler
    pub fn new(registry: Arc<SessionRegistry>, router: Router) -> Self {
        Self { registry, router }
    }

    /// The session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// The control-channel router
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Route an envelope from `sender`, then disconnect unreachable targets
    pub async fn route(&self, sender: &Session, envelope: &Envelope) -> Delivery {
        let delivery = self.router.route(sender.name(), envelope).await;
        self.reap(&delivery).await;
        delivery
    }

    /// Deliver to an explicit session list, then disconnect unreachable targets
    pub async fn deliver_to(&self, targets: &[Arc<Session>], envelope: &Envelope) -> Delivery {
        let delivery = self.router.deliver_to(targets, envelope).await;
        self.reap(&delivery).await;
        delivery
    }

    async fn reap(&self, delivery: &Delivery) {
        for failed in &delivery.failed {
            self.disconnect(Arc::clone(failed)).await;
        }
    }

    /// Tear `session` down
    ///
    /// Only the first call for a given session has any effect. Targets that
    /// fail while receiving the RM broadcast are torn down in turn.
    pub async fn disconnect(&self, session: Arc<Session>) {
        let mut pending = vec![session];

        while let Some(session) = pending.pop() {
            if !session.begin_teardown() {
                continue;
            }

            log::info!(
                "Disconnecting {} ({})",
                session.name(),
                session.peer_addr()
            );
            session.mark_disconnected();

            let others: Vec<Arc<Session>> = self
                .registry
                .snapshot()
                .into_iter()
                .filter(|s| s.id() != session.id())
                .collect();
            let delivery = self
                .router
                .deliver_to(&others, &Envelope::presence_remove(session.name()))
                .await;

            session.close();
            session.clear_media();
            self.registry.unregister_session(&session);

            pending.extend(delivery.failed);
        }
    }

    /// Tear down whichever session holds `name`; absent names are a no-op
    pub async fn disconnect_name(&self, name: &str) {
        if let Some(session) = self.registry.lookup(name) {
            self.disconnect(session).await;
        }
    }

    /// Tear down every remaining session (process shutdown)
    pub async fn disconnect_all(&self) {
        let sessions = self.registry.snapshot();
        log::info!("Disconnecting {} remaining session(s)", sessions.len());
        for session in sessions {
            self.disconnect(session).await;
        }
    }
}
