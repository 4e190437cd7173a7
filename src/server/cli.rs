// ABOUTME: Shared CLI argument parsing and tracing setup for the relay binaries
// ABOUTME: ServerArgs builds a ServerConfig; ClientArgs configures the chat client

use crate::server::config::{ServerConfig, AUDIO_PORT, MAIN_PORT, VIDEO_PORT};
use clap::Args;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Relay server arguments
///
/// Use with `#[command(flatten)]` in your binary's Args struct:
/// ```ignore
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     server: ServerArgs,
/// }
/// ```
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Host address to bind all channels to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Main (control) channel TCP port
    #[arg(long, default_value_t = MAIN_PORT)]
    pub main_port: u16,

    /// Video relay UDP port
    #[arg(long, default_value_t = VIDEO_PORT)]
    pub video_port: u16,

    /// Audio relay UDP port
    #[arg(long, default_value_t = AUDIO_PORT)]
    pub audio_port: u16,

    /// Milliseconds a delivery may wait on a stalled recipient
    #[arg(long, default_value = "2000")]
    pub send_timeout_ms: u64,

    /// Frames queued per recipient
    #[arg(long, default_value = "256")]
    pub queue_capacity: usize,

    /// Seconds between participant reports (0 to disable)
    #[arg(long, default_value = "30")]
    pub report_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServerArgs {
    /// Initialize tracing based on verbosity flag
    pub fn init_tracing(&self) {
        init_tracing(self.verbose);
    }

    /// Log startup information
    pub fn log_startup_info(&self) {
        tracing::info!("Relaymeet Server v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!("Main channel: tcp://{}:{}", self.host, self.main_port);
        tracing::info!("Video relay: udp://{}:{}", self.host, self.video_port);
        tracing::info!("Audio relay: udp://{}:{}", self.host, self.audio_port);
    }

    /// Build ServerConfig from these args
    pub fn build_config(&self) -> ServerConfig {
        ServerConfig::default()
            .main_addr(SocketAddr::new(self.host, self.main_port))
            .video_addr(SocketAddr::new(self.host, self.video_port))
            .audio_addr(SocketAddr::new(self.host, self.audio_port))
            .send_timeout(Duration::from_millis(self.send_timeout_ms))
            .send_queue_capacity(self.queue_capacity)
    }
}

/// Chat client arguments
#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Relay main channel address
    #[arg(short, long, default_value = "127.0.0.1:53530")]
    pub server: SocketAddr,

    /// Participant name
    #[arg(short, long)]
    pub name: String,

    /// Directory incoming files are saved to
    #[arg(short, long, default_value = ".")]
    pub download_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        "relaymeet=debug,relaymeet_server=debug"
    } else {
        "relaymeet=info,relaymeet_server=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::MediaKind;

    fn args() -> ServerArgs {
        ServerArgs {
            host: "127.0.0.1".parse().unwrap(),
            main_port: 9000,
            video_port: 9001,
            audio_port: 9002,
            send_timeout_ms: 500,
            queue_capacity: 8,
            report_secs: 0,
            verbose: false,
        }
    }

    #[test]
    fn test_build_config() {
        let config = args().build_config();
        assert_eq!(config.main_addr.port(), 9000);
        assert_eq!(config.media_addr(MediaKind::Video).port(), 9001);
        assert_eq!(config.media_addr(MediaKind::Audio).port(), 9002);
        assert_eq!(config.send_timeout, Duration::from_millis(500));
        assert_eq!(config.send_queue_capacity, 8);
    }

    #[test]
    fn test_parse_defaults() {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            server: ServerArgs,
        }

        let parsed = Wrapper::parse_from(["relaymeet-server"]);
        assert_eq!(parsed.server.main_port, MAIN_PORT);
        assert_eq!(parsed.server.video_port, VIDEO_PORT);
        assert_eq!(parsed.server.audio_port, AUDIO_PORT);
        assert!(!parsed.server.verbose);
    }
}
