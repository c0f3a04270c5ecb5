//! Push stream with fixed-delay auto-reconnect.
//!
//! [`ResilientChannel`] owns the single long-lived WebSocket to the
//! backend's `/ws` endpoint. Inbound frames are parsed into
//! [`InboundEvent`]s and fanned out through a [`tokio::sync::broadcast`]
//! channel in arrival order. Outbound sends never queue: while the
//! stream is down, [`ResilientChannel::send`] fails immediately.
//!
//! # Example
//!
//! ```rust,ignore
//! use garage_api::websocket::{ChannelConfig, ResilientChannel};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ChannelConfig::new("ws://garage.local:8000/ws".parse()?);
//! let channel = ResilientChannel::new(config, Some(session), CancellationToken::new());
//! channel.connect();
//!
//! let mut rx = channel.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     println!("{:?}", event);
//! }
//!
//! channel.shutdown().await;
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_core::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::events::{InboundEvent, OutboundCommand, parse_inbound};
use crate::session::Session;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── ChannelConfig ────────────────────────────────────────────────────

/// Connection settings for the push stream.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Stream endpoint, e.g. `ws://garage.local:8000/ws`.
    pub url: Url,

    /// Fixed wait between a drop and the next connection attempt. Default: 3s.
    pub reconnect_delay: Duration,

    /// Upper bound on a single handshake. Default: 10s.
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect_delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// ── ChannelStatus ────────────────────────────────────────────────────

/// Observable state of a channel instance, mutated in place for its whole life.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChannelStatus {
    pub connected: bool,

    /// Most recent failure, cleared on the next successful open.
    pub last_error: Option<String>,

    /// Consecutive reconnect attempts since the last successful open.
    pub reconnect_attempts: u32,
}

// ── ResilientChannel ─────────────────────────────────────────────────

/// Sole owner of the push stream to the backend.
///
/// Not `Clone`; share it behind an `Arc`. Dropping the last handle tears
/// the stream down the same way [`shutdown`](Self::shutdown) does.
pub struct ResilientChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    config: ChannelConfig,
    session: Option<Session>,
    status: watch::Sender<ChannelStatus>,
    event_tx: broadcast::Sender<Arc<InboundEvent>>,
    /// Present only while a stream is open.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ResilientChannel {
    /// Create a channel. Nothing is opened until [`connect`](Self::connect).
    pub fn new(config: ChannelConfig, session: Option<Session>, cancel: CancellationToken) -> Self {
        let (status, _) = watch::channel(ChannelStatus::default());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(ChannelInner {
                config,
                session,
                status,
                event_tx,
                outbound: Mutex::new(None),
                cancel,
                task: Mutex::new(None),
            }),
        }
    }

    /// Spawn the connection loop. Idempotent; a no-op after teardown.
    pub fn connect(&self) {
        if self.inner.cancel.is_cancelled() {
            tracing::warn!("push channel already torn down, not connecting");
            return;
        }

        let mut task = lock(&self.inner.task);
        if task.is_some() {
            tracing::debug!("push channel loop already running");
            return;
        }

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(run_loop(inner)));
    }

    /// Current status snapshot.
    pub fn status(&self) -> ChannelStatus {
        self.inner.status.borrow().clone()
    }

    /// Subscribe to status changes (the "disconnected" banner).
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status.subscribe()
    }

    /// New receiver for inbound events. Events sent before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<InboundEvent>> {
        self.inner.event_tx.subscribe()
    }

    /// Inbound events as a `Stream`. Lagging consumers skip ahead with a warning.
    pub fn events(&self) -> impl Stream<Item = Arc<InboundEvent>> + Send + 'static {
        let mut rx = self.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "push event consumer lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Send a raw text frame. Fails with [`Error::NotConnected`] instead of queueing.
    pub fn send(&self, payload: String) -> Result<(), Error> {
        let guard = lock(&self.inner.outbound);
        let tx = guard.as_ref().ok_or(Error::NotConnected)?;
        tx.send(Message::text(payload))
            .map_err(|_| Error::NotConnected)
    }

    /// Serialize and send a command frame.
    pub fn send_command(&self, command: &OutboundCommand) -> Result<(), Error> {
        let payload = command.to_json().map_err(|e| Error::Deserialization {
            message: format!("failed to encode command: {e}"),
            body: String::new(),
        })?;
        self.send(payload)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Cancel any pending reconnect, close the stream, and wait for the loop to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let handle = lock(&self.inner.task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "push channel task ended abnormally");
            }
        }

        self.inner.mark_disconnected(None);
    }
}

impl Drop for ResilientChannel {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl ChannelInner {
    fn mark_connected(&self) {
        self.status.send_modify(|s| {
            s.connected = true;
            s.last_error = None;
            s.reconnect_attempts = 0;
        });
    }

    fn mark_disconnected(&self, error: Option<String>) {
        lock(&self.outbound).take();
        self.status.send_if_modified(|s| {
            let changed = s.connected || error.is_some();
            s.connected = false;
            if error.is_some() {
                s.last_error = error;
            }
            changed
        });
    }

    fn bump_attempts(&self) -> u32 {
        let mut attempt = 0;
        self.status.send_modify(|s| {
            s.reconnect_attempts += 1;
            attempt = s.reconnect_attempts;
        });
        attempt
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// connect → pump → on drop, wait the fixed delay → reconnect.
///
/// The loop is the only place a reconnect is ever scheduled, so at most
/// one timer can be pending per channel no matter how the stream fails.
async fn run_loop(inner: Arc<ChannelInner>) {
    let cancel = inner.cancel.clone();

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_pump(&inner) => result,
        };

        match result {
            Ok(()) => {
                tracing::info!("push stream closed");
                inner.mark_disconnected(None);
            }
            Err(e) => {
                tracing::warn!(error = %e, "push stream failed");
                inner.mark_disconnected(Some(e.to_string()));
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        let attempt = inner.bump_attempts();
        let delay = inner.config.reconnect_delay;
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "Waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    inner.mark_disconnected(None);
    tracing::debug!("push channel loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Open one stream and pump frames both ways until it drops or is cancelled.
///
/// Returns `Ok(())` only when cancelled; any drop is an error so the
/// caller records it in `last_error`.
async fn connect_and_pump(inner: &ChannelInner) -> Result<(), Error> {
    let url = &inner.config.url;
    tracing::info!(url = %url, "Connecting to push stream");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(session) = &inner.session {
        let header = session.bearer_header()?;
        let value = header
            .to_str()
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
        request = request.with_header("Authorization", value);
    }

    let timeout = inner.config.connect_timeout;
    let (ws_stream, _response) =
        tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: timeout.as_secs(),
            })?
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    *lock(&inner.outbound) = Some(out_tx);
    inner.mark_connected();
    tracing::info!("Push stream connected");

    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    tracing::debug!(error = %e, "close frame not delivered");
                }
                return Ok(());
            }
            Some(message) = out_rx.recv() => {
                write
                    .send(message)
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_frame(text.as_str(), &inner.event_tx);
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite answers pings on the next write/flush
                        tracing::trace!("push stream ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|cf| (u16::from(cf.code), cf.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        return Err(Error::WebSocketClosed { code, reason });
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        return Err(Error::WebSocketClosed {
                            code: 1006,
                            reason: "stream ended without close frame".into(),
                        });
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Frame dispatch ───────────────────────────────────────────────────

/// Parse one text frame and broadcast it. Malformed frames are logged and dropped.
fn dispatch_frame(text: &str, event_tx: &broadcast::Sender<Arc<InboundEvent>>) {
    match parse_inbound(text) {
        Ok(event) => {
            // No subscribers right now is not an error
            let _ = event_tx.send(Arc::new(event));
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dropping malformed push message");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn channel() -> ResilientChannel {
        let url = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        ResilientChannel::new(ChannelConfig::new(url), None, CancellationToken::new())
    }

    #[test]
    fn default_config_uses_three_second_delay() {
        let config = ChannelConfig::new(Url::parse("ws://localhost:8000/ws").unwrap());
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
    }

    #[test]
    fn send_before_connect_fails_immediately() {
        let ch = channel();
        assert!(matches!(ch.send("{}".into()), Err(Error::NotConnected)));
        assert!(!ch.status().connected);
    }

    #[test]
    fn dispatch_frame_broadcasts_valid_and_drops_malformed() {
        let (tx, mut rx) = broadcast::channel(16);

        dispatch_frame("not json at all", &tx);
        assert!(rx.try_recv().is_err());

        dispatch_frame(r#"{"type":"status","state":"open"}"#, &tx);
        let event = rx.try_recv().unwrap();
        assert!(matches!(*event, InboundEvent::Status(_)));
    }

    #[test]
    fn mark_disconnected_records_error_and_clears_sender() {
        let ch = channel();
        let (tx, _rx) = mpsc::unbounded_channel();
        *lock(&ch.inner.outbound) = Some(tx);
        ch.inner.mark_connected();
        assert!(ch.status().connected);

        ch.inner.mark_disconnected(Some("boom".into()));
        let status = ch.status();
        assert!(!status.connected);
        assert_eq!(status.last_error.as_deref(), Some("boom"));
        assert!(matches!(ch.send("{}".into()), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn connect_after_shutdown_is_noop() {
        let ch = channel();
        ch.shutdown().await;
        ch.connect();
        assert!(lock(&ch.inner.task).is_none());
        assert!(ch.is_shut_down());
    }
}
