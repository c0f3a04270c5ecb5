#![allow(clippy::unwrap_used)]
// Integration tests for `ResilientChannel` against an in-process WebSocket server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;
use url::Url;

use garage_api::{
    ChannelConfig, ChannelStatus, DoorAction, Error, InboundEvent, OutboundCommand,
    ReportedState, ResilientChannel, Session,
};

const DELAY: Duration = Duration::from_millis(150);
const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ─────────────────────────────────────────────────────────

struct TestServer {
    url: Url,
    accepted: Arc<AtomicUsize>,
    conns: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
    auth_headers: mpsc::UnboundedReceiver<Option<String>>,
}

async fn start_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (conn_tx, conns) = mpsc::unbounded_channel();
    let (auth_tx, auth_headers) = mpsc::unbounded_channel();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let auth_tx = auth_tx.clone();
            let callback = move |req: &Request, resp: Response| {
                let auth = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                let _ = auth_tx.send(auth);
                Ok::<Response, ErrorResponse>(resp)
            };
            if let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = conn_tx.send(ws);
            }
        }
    });

    TestServer {
        url: Url::parse(&format!("ws://{addr}/ws")).unwrap(),
        accepted,
        conns,
        auth_headers,
    }
}

fn channel_for(url: Url, session: Option<Session>) -> ResilientChannel {
    let mut config = ChannelConfig::new(url);
    config.reconnect_delay = DELAY;
    config.connect_timeout = Duration::from_secs(2);
    ResilientChannel::new(config, session, CancellationToken::new())
}

async fn wait_status(rx: &mut watch::Receiver<ChannelStatus>, pred: impl FnMut(&ChannelStatus) -> bool) {
    let _ = tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for channel status")
        .unwrap();
}

async fn next_conn(server: &mut TestServer) -> WebSocketStream<TcpStream> {
    tokio::time::timeout(WAIT, server.conns.recv())
        .await
        .expect("timed out waiting for connection")
        .unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn delivers_events_in_arrival_order() {
    let mut server = start_server().await;
    let channel = channel_for(server.url.clone(), None);
    let mut rx = channel.subscribe();
    let mut status = channel.watch_status();

    channel.connect();
    let mut ws = next_conn(&mut server).await;
    wait_status(&mut status, |s| s.connected).await;

    for state in ["opening", "open", "closed"] {
        let frame = format!(r#"{{"type":"state_update","garage_id":"g1","state":"{state}"}}"#);
        ws.send(Message::text(frame)).await.unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        let InboundEvent::Status(update) = &*event else {
            panic!("expected status event");
        };
        seen.push(update.state.unwrap());
    }
    assert_eq!(
        seen,
        vec![ReportedState::Opening, ReportedState::Open, ReportedState::Closed]
    );

    channel.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_do_not_break_the_stream() {
    let mut server = start_server().await;
    let channel = channel_for(server.url.clone(), None);
    let mut rx = channel.subscribe();
    let mut status = channel.watch_status();

    channel.connect();
    let mut ws = next_conn(&mut server).await;
    wait_status(&mut status, |s| s.connected).await;

    ws.send(Message::text("{{{ definitely not json")).await.unwrap();
    ws.send(Message::text(r#"{"type":"error","data":{"message":"relay stuck"}}"#))
        .await
        .unwrap();

    let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(matches!(&*event, InboundEvent::Error(n) if n.message == "relay stuck"));
    assert!(channel.status().connected);
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);

    channel.shutdown().await;
}

#[tokio::test]
async fn outbound_commands_reach_the_server_with_bearer_token() {
    let mut server = start_server().await;
    let session = Session::new(SecretString::from("tok-ws".to_string()));
    let channel = channel_for(server.url.clone(), Some(session));
    let mut status = channel.watch_status();

    channel.connect();
    let mut ws = next_conn(&mut server).await;
    wait_status(&mut status, |s| s.connected).await;

    let auth = server.auth_headers.recv().await.unwrap();
    assert_eq!(auth.as_deref(), Some("Bearer tok-ws"));

    let cmd = OutboundCommand::new(
        "g1",
        DoorAction::Open,
        uuid::Uuid::new_v4(),
        None,
        chrono::Utc::now(),
    );
    channel.send_command(&cmd).unwrap();

    let frame = tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(value["type"], "command");
    assert_eq!(value["data"]["action"], "open");
    assert_eq!(value["data"]["garageId"], "g1");

    channel.shutdown().await;
}

#[tokio::test]
async fn reconnects_once_after_fixed_delay() {
    let mut server = start_server().await;
    let channel = channel_for(server.url.clone(), None);
    let mut status = channel.watch_status();

    channel.connect();
    let first = next_conn(&mut server).await;
    wait_status(&mut status, |s| s.connected).await;

    // Server drops the connection.
    drop(first);
    wait_status(&mut status, |s| !s.connected).await;
    assert!(matches!(channel.send("{}".into()), Err(Error::NotConnected)));

    let _second = next_conn(&mut server).await;
    wait_status(&mut status, |s| s.connected).await;
    assert_eq!(channel.status().reconnect_attempts, 0);
    assert!(channel.status().last_error.is_none());

    // No stray timers: the count stays put while the stream is healthy.
    tokio::time::sleep(DELAY * 4).await;
    assert_eq!(server.accepted.load(Ordering::SeqCst), 2);

    channel.shutdown().await;
}

#[tokio::test]
async fn repeated_drops_never_stack_connections() {
    let mut server = start_server().await;
    let channel = channel_for(server.url.clone(), None);
    let mut status = channel.watch_status();

    channel.connect();
    for round in 1..=3 {
        let ws = next_conn(&mut server).await;
        wait_status(&mut status, |s| s.connected).await;
        assert_eq!(server.accepted.load(Ordering::SeqCst), round);
        drop(ws);
        wait_status(&mut status, |s| !s.connected).await;
    }

    let _last = next_conn(&mut server).await;
    wait_status(&mut status, |s| s.connected).await;
    tokio::time::sleep(DELAY * 3).await;
    assert_eq!(server.accepted.load(Ordering::SeqCst), 4);

    channel.shutdown().await;
}

#[tokio::test]
async fn unreachable_endpoint_records_error_and_keeps_trying() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel = channel_for(Url::parse(&format!("ws://{addr}/ws")).unwrap(), None);
    let mut status = channel.watch_status();
    channel.connect();

    wait_status(&mut status, |s| s.reconnect_attempts >= 2).await;
    let snapshot = channel.status();
    assert!(!snapshot.connected);
    assert!(snapshot.last_error.is_some());

    channel.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_reconnecting() {
    let mut server = start_server().await;
    let channel = channel_for(server.url.clone(), None);
    let mut status = channel.watch_status();

    channel.connect();
    let ws = next_conn(&mut server).await;
    wait_status(&mut status, |s| s.connected).await;

    channel.shutdown().await;
    drop(ws);
    assert!(!channel.status().connected);

    tokio::time::sleep(DELAY * 3).await;
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);

    channel.connect();
    tokio::time::sleep(DELAY * 2).await;
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
}
