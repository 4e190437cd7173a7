// ABOUTME: Relaymeet chat client binary
// ABOUTME: Joins a relay, prints chat and presence, sends lines and files from stdin

use clap::Parser;
use parking_lot::Mutex;
use relaymeet::client::{parse_input, ChatInput, DirectoryEvent, Participants, RelayReader, RelayWriter};
use relaymeet::protocol::{FileEvent, FileReceiver};
use relaymeet::server::{init_tracing, ClientArgs};
use relaymeet::{Body, Envelope, Payload, RelayClient};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "relaymeet")]
#[command(author, version, about = "Relaymeet chat client", long_about = None)]
struct Args {
    #[command(flatten)]
    client: ClientArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    init_tracing(args.client.verbose);

    println!("Connecting to {} as {}...", args.client.server, args.client.name);
    let client = RelayClient::connect(args.client.server, args.client.name.clone()).await?;
    println!("Connected. Type a message, `@name,... text`, `/file <path>`, `/who` or `/quit`.");

    let (reader, writer) = client.split();
    let directory = Arc::new(Mutex::new(Participants::new(args.client.name.clone())));
    let files = FileReceiver::new(args.client.download_dir.clone());
    println!("Incoming files are saved to {}", files.dir().display());

    let incoming = tokio::spawn(receive_loop(reader, Arc::clone(&directory), files));

    tokio::select! {
        result = input_loop(writer, directory) => result?,
        _ = incoming => println!("Relay closed the connection"),
    }

    Ok(())
}

async fn input_loop(
    mut writer: RelayWriter,
    directory: Arc<Mutex<Participants>>,
) -> relaymeet::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            ChatInput::Text { recipients, text } => writer.send_text(recipients, text).await?,
            ChatInput::File { recipients, path } => {
                match writer.send_file(recipients, &path).await {
                    Ok(bytes) => println!("* sent {} ({} bytes)", path.display(), bytes),
                    Err(relaymeet::error::Error::Io(e)) => {
                        println!("* cannot send {}: {}", path.display(), e)
                    }
                    Err(e) => return Err(e),
                }
            }
            ChatInput::Who => {
                let directory = directory.lock();
                let names = directory.remote_names();
                if names.is_empty() {
                    println!("* only you ({}) are here", directory.local_name());
                } else {
                    println!("* {} and {}", directory.local_name(), names.join(", "));
                }
            }
            ChatInput::Quit => break,
            ChatInput::Empty => {}
        }
    }

    writer.disconnect().await
}

async fn receive_loop(
    mut reader: RelayReader,
    directory: Arc<Mutex<Participants>>,
    mut files: FileReceiver,
) {
    loop {
        let envelope = match reader.recv().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Connection error: {}", e);
                break;
            }
        };

        let event = directory.lock().apply(&envelope);
        match event {
            Some(DirectoryEvent::Joined(name)) => println!("* {} joined", name),
            Some(DirectoryEvent::Left(name)) => println!("* {} left", name),
            None => handle_post(envelope, &mut files).await,
        }
    }
}

async fn handle_post(envelope: Envelope, files: &mut FileReceiver) {
    let Envelope {
        sender,
        body,
        recipients,
    } = envelope;

    match body {
        Body::Post(Payload::Text(text)) => {
            if recipients.is_broadcast() {
                println!("[{}] {}", sender, text);
            } else {
                println!("[{} (private)] {}", sender, text);
            }
        }
        Body::Post(Payload::File(part)) => match files.handle(&sender, part).await {
            Ok(Some(FileEvent::Started { path, .. })) => {
                println!("* receiving {} from {}", path.display(), sender)
            }
            Ok(Some(FileEvent::Completed { path, bytes, .. })) => {
                println!("* saved {} from {} ({} bytes)", path.display(), sender, bytes)
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("File transfer from {} failed: {}", sender, e),
        },
        other => tracing::debug!("Ignoring {} from {}", other.request_kind(), sender),
    }
}
