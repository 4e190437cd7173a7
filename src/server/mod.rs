// ABOUTME: Server module for the relay
// ABOUTME: Provides the control listener, session registry, router, media relays and teardown

mod cli;
mod config;
mod lifecycle;
mod media_relay;
mod registry;
mod router;
mod server;
mod session_handler;

pub use cli::{init_tracing, ClientArgs, ServerArgs};
pub use config::{ServerConfig, AUDIO_PORT, MAIN_PORT, VIDEO_PORT};
pub use lifecycle::SessionLifecycle;
pub use media_relay::{spawn_media_relays, DropReason, MediaRelay, RelayOutcome};
pub use registry::{DeliveryError, Frame, Registration, RegistryError, Session, SessionRegistry};
pub use router::{Delivery, Router};
pub use server::RelayServer;
pub use session_handler::{handle_connection, validate_name};
