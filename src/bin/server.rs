// ABOUTME: Relaymeet server binary
// ABOUTME: Standalone relay for the control channel and both media channels

use clap::Parser;
use relaymeet::server::{RelayServer, ServerArgs};

#[derive(Parser, Debug)]
#[command(name = "relaymeet-server")]
#[command(author, version, about = "Relaymeet conferencing relay", long_about = None)]
struct Args {
    #[command(flatten)]
    server: ServerArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Initialize tracing
    args.server.init_tracing();

    // Log startup info
    args.server.log_startup_info();

    // Create server configuration
    let config = args.server.build_config();

    let server = RelayServer::bind(config).await?;
    let registry = server.registry();

    // Spawn a task to periodically report connected participants
    let report_task = (args.server.report_secs > 0).then(|| {
        let period = tokio::time::Duration::from_secs(args.server.report_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let sessions = registry.snapshot();
                if !sessions.is_empty() {
                    tracing::info!("Connected participants: {}", sessions.len());
                    for session in sessions {
                        tracing::info!("  - {} ({})", session.name(), session.peer_addr());
                    }
                }
            }
        })
    });

    tracing::info!("Press Ctrl+C to stop");

    let result = server.run().await;
    if let Some(task) = report_task {
        task.abort();
    }
    Ok(result?)
}
