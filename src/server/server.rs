// ABOUTME: Main relay server implementation
// ABOUTME: Binds the control listener and media relays, accepts sessions, coordinates shutdown

use crate::protocol::messages::MediaKind;
use crate::server::config::ServerConfig;
use crate::server::lifecycle::SessionLifecycle;
use crate::server::media_relay::{spawn_media_relays, MediaRelay};
use crate::server::registry::SessionRegistry;
use crate::server::router::Router;
use crate::server::session_handler::handle_connection;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Relay server
pub struct RelayServer {
    /// Server configuration
    config: Arc<ServerConfig>,
    /// Session registry
    registry: Arc<SessionRegistry>,
    /// Routing and teardown
    lifecycle: Arc<SessionLifecycle>,
    /// Control channel listener
    listener: TcpListener,
    /// One relay per media kind
    relays: Vec<MediaRelay>,
    main_addr: SocketAddr,
    video_addr: SocketAddr,
    audio_addr: SocketAddr,
}

impl RelayServer {
    /// Bind the control listener and both media relays
    pub async fn bind(config: ServerConfig) -> crate::Result<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let router = Router::new(Arc::clone(&registry), config.send_timeout);
        let lifecycle = Arc::new(SessionLifecycle::new(Arc::clone(&registry), router));

        let listener = TcpListener::bind(config.main_addr).await?;
        let main_addr = listener.local_addr()?;

        let mut relays = Vec::with_capacity(MediaKind::ALL.len());
        for kind in MediaKind::ALL {
            let relay = MediaRelay::bind(
                kind,
                config.media_addr(kind),
                Arc::clone(&registry),
                config.max_datagram_len,
            )
            .await?;
            relays.push(relay);
        }
        let video_addr = relays[0].local_addr()?;
        let audio_addr = relays[1].local_addr()?;

        Ok(Self {
            config: Arc::new(config),
            registry,
            lifecycle,
            listener,
            relays,
            main_addr,
            video_addr,
            audio_addr,
        })
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the session registry
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get the lifecycle handler
    pub fn lifecycle(&self) -> Arc<SessionLifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Bound control channel address
    pub fn main_addr(&self) -> SocketAddr {
        self.main_addr
    }

    /// Bound media relay address for `kind`
    pub fn media_addr(&self, kind: MediaKind) -> SocketAddr {
        match kind {
            MediaKind::Video => self.video_addr,
            MediaKind::Audio => self.audio_addr,
        }
    }

    /// Run the server until Ctrl-C
    pub async fn run(self) -> crate::Result<()> {
        let shutdown_signal = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            log::info!("Received shutdown signal");
        };
        self.run_until(shutdown_signal).await
    }

    /// Run the server until `shutdown` resolves
    ///
    /// On shutdown the accept loop and media relays stop and every remaining
    /// session is disconnected.
    pub async fn run_until<F>(self, shutdown: F) -> crate::Result<()>
    where
        F: Future<Output = ()>,
    {
        let RelayServer {
            config,
            registry: _,
            lifecycle,
            listener,
            relays,
            main_addr,
            video_addr,
            audio_addr,
        } = self;

        log::info!(
            "Relay listening on {} (video {}, audio {})",
            main_addr,
            video_addr,
            audio_addr
        );

        let (relay_handles, relay_shutdown) = spawn_media_relays(relays);

        tokio::select! {
            _ = shutdown => {}
            _ = accept_loop(&listener, &lifecycle, &config) => {}
        }

        drop(listener);
        let _ = relay_shutdown.send(true);
        for handle in relay_handles {
            let _ = handle.await;
        }
        lifecycle.disconnect_all().await;

        log::info!("Server shutdown complete");
        Ok(())
    }
}

async fn accept_loop(
    listener: &TcpListener,
    lifecycle: &Arc<SessionLifecycle>,
    config: &Arc<ServerConfig>,
) {
    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                log::debug!("New connection from {}", peer_addr);
                if let Err(e) = socket.set_nodelay(true) {
                    log::debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                }

                let lifecycle = Arc::clone(lifecycle);
                let config = Arc::clone(config);
                tokio::spawn(async move {
                    handle_connection(socket, peer_addr, lifecycle, config).await;
                });
            }
            Err(e) => {
                log::error!("Failed to accept connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback_config() -> ServerConfig {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        ServerConfig::default()
            .main_addr(addr)
            .video_addr(addr)
            .audio_addr(addr)
    }

    #[tokio::test]
    async fn test_bind_reports_real_ports() {
        let server = RelayServer::bind(loopback_config()).await.unwrap();
        assert_ne!(server.main_addr().port(), 0);
        assert_ne!(server.media_addr(MediaKind::Video).port(), 0);
        assert_ne!(
            server.media_addr(MediaKind::Video),
            server.media_addr(MediaKind::Audio)
        );
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn test_run_until_returns_on_shutdown() {
        let server = RelayServer::bind(loopback_config()).await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("server should stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
