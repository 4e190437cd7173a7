use relaymeet::client::MediaClient;
use relaymeet::error::Error;
use relaymeet::protocol::{
    read_text_frame, write_envelope, write_frame, write_text_frame, FileEvent, FileReceiver, OK_STATUS,
};
use relaymeet::{
    Body, DataKind, Envelope, MediaKind, Payload, Recipients, RelayClient, RelayServer, ServerConfig,
};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const QUIET: Duration = Duration::from_millis(200);
const PATIENCE: Duration = Duration::from_secs(2);

struct Relay {
    main: SocketAddr,
    video: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<relaymeet::Result<()>>,
}

impl Relay {
    async fn start() -> Self {
        Self::start_with(|config| config).await
    }

    async fn start_with(tune: impl FnOnce(ServerConfig) -> ServerConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let config = ServerConfig::default()
            .main_addr(loopback)
            .video_addr(loopback)
            .audio_addr(loopback)
            .send_timeout(Duration::from_millis(500));
        let server = RelayServer::bind(tune(config)).await.unwrap();
        let main = server.main_addr();
        let video = server.media_addr(MediaKind::Video);

        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));

        Self {
            main,
            video,
            stop: Some(stop),
            task,
        }
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(PATIENCE, self.task)
            .await
            .expect("relay should stop")
            .unwrap()
            .unwrap();
    }
}

async fn next(client: &mut RelayClient) -> Envelope {
    tokio::time::timeout(PATIENCE, client.recv())
        .await
        .expect("expected an envelope")
        .unwrap()
        .expect("connection closed")
}

async fn assert_quiet(client: &mut RelayClient) {
    if let Ok(received) = tokio::time::timeout(QUIET, client.recv()).await {
        panic!("unexpected delivery: {:?}", received);
    }
}

/// Collect `count` presence ADDs and return the participant names
async fn adds(client: &mut RelayClient, count: usize) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for _ in 0..count {
        match next(client).await.body {
            Body::Add { participant } => {
                names.insert(participant);
            }
            other => panic!("expected ADD, got {:?}", other),
        }
    }
    names
}

/// Handshake by hand so the test can write arbitrary frames afterwards
async fn raw_connect(addr: SocketAddr, name: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_text_frame(&mut stream, name).await.unwrap();
    let status = read_text_frame(&mut stream, 1024).await.unwrap();
    assert_eq!(status.as_deref(), Some(OK_STATUS));
    stream
}

/// Wait until the relay closes `stream`
async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = vec![0u8; 4096];
    loop {
        let n = tokio::time::timeout(PATIENCE, stream.read(&mut buf))
            .await
            .expect("relay should close the connection")
            .unwrap_or(0);
        if n == 0 {
            return;
        }
    }
}

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn test_presence_multicast_and_departure() {
    let relay = Relay::start().await;

    let mut a = RelayClient::connect(relay.main, "A").await.unwrap();
    let mut b = RelayClient::connect(relay.main, "B").await.unwrap();
    assert_eq!(adds(&mut a, 1).await, names(&["B"]));
    assert_eq!(adds(&mut b, 1).await, names(&["A"]));

    let mut c = RelayClient::connect(relay.main, "C").await.unwrap();
    assert_eq!(adds(&mut c, 2).await, names(&["A", "B"]));
    assert_eq!(adds(&mut a, 1).await, names(&["C"]));
    assert_eq!(adds(&mut b, 1).await, names(&["C"]));

    // Multicast reaches only the named recipient
    a.send_text(Recipients::from_names(["C"]), "hi").await.unwrap();
    let received = next(&mut c).await;
    assert_eq!(received.sender, "A");
    assert_eq!(received.body, Body::Post(Payload::Text("hi".to_string())));
    assert_quiet(&mut b).await;

    // Exactly one RM per remaining participant
    b.disconnect().await.unwrap();
    for client in [&mut a, &mut c] {
        let envelope = next(client).await;
        assert_eq!(
            envelope.body,
            Body::Remove {
                participant: "B".to_string()
            }
        );
    }

    a.send_text(Recipients::Everyone, "still here").await.unwrap();
    let received = next(&mut c).await;
    assert_eq!(received.body, Body::Post(Payload::Text("still here".to_string())));
    assert_quiet(&mut a).await;
    assert_quiet(&mut c).await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_abrupt_close_broadcasts_rm() {
    let relay = Relay::start().await;

    let mut a = RelayClient::connect(relay.main, "A").await.unwrap();
    let b = RelayClient::connect(relay.main, "B").await.unwrap();
    adds(&mut a, 1).await;

    // Dropping both halves closes the socket without a DISCONNECT
    drop(b);
    assert_eq!(
        next(&mut a).await.body,
        Body::Remove {
            participant: "B".to_string()
        }
    );
    assert_quiet(&mut a).await;

    // The name is free again
    let _b = RelayClient::connect(relay.main, "B").await.unwrap();
    assert_eq!(adds(&mut a, 1).await, names(&["B"]));

    relay.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_and_reserved_names_rejected() {
    let relay = Relay::start().await;

    let _alice = RelayClient::connect(relay.main, "alice").await.unwrap();

    match RelayClient::connect(relay.main, "alice").await {
        Err(Error::HandshakeRejected(reason)) => assert!(reason.contains("already taken")),
        other => panic!("expected rejection, got {:?}", other.map(|c| c.name().to_string())),
    }
    assert!(matches!(
        RelayClient::connect(relay.main, "SERVER").await,
        Err(Error::HandshakeRejected(_))
    ));

    relay.shutdown().await;
}

#[tokio::test]
async fn test_file_transfer_through_relay() {
    let relay = Relay::start().await;
    let outbox = tempfile::tempdir().unwrap();
    let inbox = tempfile::tempdir().unwrap();

    let content: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let source = outbox.path().join("report.bin");
    std::fs::write(&source, &content).unwrap();

    let mut a = RelayClient::connect(relay.main, "A").await.unwrap();
    let mut b = RelayClient::connect(relay.main, "B").await.unwrap();
    adds(&mut a, 1).await;
    adds(&mut b, 1).await;

    let sent = a.send_file(Recipients::from_names(["B"]), &source).await.unwrap();
    assert_eq!(sent, 3000);

    let mut receiver = FileReceiver::new(inbox.path());
    let saved = loop {
        let envelope = next(&mut b).await;
        let Body::Post(Payload::File(part)) = envelope.body else {
            panic!("expected file part, got {:?}", envelope.body);
        };
        if let Some(FileEvent::Completed { path, bytes, .. }) =
            receiver.handle(&envelope.sender, part).await.unwrap()
        {
            assert_eq!(bytes, 3000);
            break path;
        }
    };

    assert_eq!(saved, inbox.path().join("report.bin"));
    assert_eq!(std::fs::read(saved).unwrap(), content);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_video_fan_out() {
    let relay = Relay::start().await;
    let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();

    let mut a = RelayClient::connect(relay.main, "A").await.unwrap();
    let _b = RelayClient::connect(relay.main, "B").await.unwrap();
    adds(&mut a, 1).await;

    let a_video = MediaClient::bind(loopback, relay.video, "A", MediaKind::Video)
        .await
        .unwrap();
    let b_video = MediaClient::bind(loopback, relay.video, "B", MediaKind::Video)
        .await
        .unwrap();
    a_video.register().await.unwrap();
    b_video.register().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    a_video.send_frame(vec![0xAB; 512]).await.unwrap();
    let (sender, frame) = tokio::time::timeout(PATIENCE, b_video.recv_frame())
        .await
        .expect("frame should be relayed")
        .unwrap();
    assert_eq!(sender, "A");
    assert_eq!(frame, vec![0xAB; 512]);

    // The sender never gets its own frame back
    assert!(tokio::time::timeout(QUIET, a_video.recv_frame()).await.is_err());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_skipped_and_session_survives() {
    let relay = Relay::start().await;

    let mut m = raw_connect(relay.main, "M").await;
    let mut peer = RelayClient::connect(relay.main, "peer").await.unwrap();
    assert_eq!(adds(&mut peer, 1).await, names(&["M"]));

    write_frame(&mut m, b"not an envelope").await.unwrap();
    write_envelope(&mut m, &Envelope::text("M", "after")).await.unwrap();

    let received = next(&mut peer).await;
    assert_eq!(received.sender, "M");
    assert_eq!(received.body, Body::Post(Payload::Text("after".to_string())));
    assert_quiet(&mut peer).await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_get_is_accepted_but_delivers_nothing() {
    let relay = Relay::start().await;

    let mut a = RelayClient::connect(relay.main, "A").await.unwrap();
    let mut b = RelayClient::connect(relay.main, "B").await.unwrap();
    adds(&mut a, 1).await;
    adds(&mut b, 1).await;

    a.send(Body::Get(DataKind::Video), Recipients::Everyone).await.unwrap();
    assert_quiet(&mut b).await;

    // Still connected and routing
    a.send_text(Recipients::Everyone, "ping").await.unwrap();
    assert_eq!(next(&mut b).await.body, Body::Post(Payload::Text("ping".to_string())));

    relay.shutdown().await;
}

#[tokio::test]
async fn test_forged_sender_is_restamped() {
    let relay = Relay::start().await;

    let mut m = raw_connect(relay.main, "M").await;
    let mut peer = RelayClient::connect(relay.main, "peer").await.unwrap();
    adds(&mut peer, 1).await;

    write_envelope(&mut m, &Envelope::text("mallory", "trust me")).await.unwrap();

    let received = next(&mut peer).await;
    assert_eq!(received.sender, "M");
    assert_eq!(received.body, Body::Post(Payload::Text("trust me".to_string())));

    relay.shutdown().await;
}

#[tokio::test]
async fn test_oversize_frame_ends_session() {
    let relay = Relay::start_with(|config| config.max_frame_len(1024)).await;

    let mut m = raw_connect(relay.main, "M").await;
    let mut peer = RelayClient::connect(relay.main, "peer").await.unwrap();
    adds(&mut peer, 1).await;

    // Header announcing more than the limit
    m.write_all(&2048u32.to_be_bytes()).await.unwrap();
    m.flush().await.unwrap();

    assert_eq!(
        next(&mut peer).await.body,
        Body::Remove {
            participant: "M".to_string()
        }
    );
    assert_closed(&mut m).await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_silent_handshake_times_out() {
    let relay = Relay::start_with(|config| config.handshake_timeout(Duration::from_millis(100))).await;

    let mut silent = TcpStream::connect(relay.main).await.unwrap();
    assert_closed(&mut silent).await;

    // Nothing was registered
    let _late = RelayClient::connect(relay.main, "late").await.unwrap();

    relay.shutdown().await;
}
