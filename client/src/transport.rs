//! Reconnecting WebSocket client for high-frequency position frames.
//!
//! The socket carries one JSON `{id, x, y}` frame per movement tick and
//! nothing is persisted. A single driver task owns the socket: it connects,
//! pumps outbound frames from a channel, hands inbound frames to message
//! listeners, and applies the reconnect policy when the connection drops.
//!
//! ## State machine
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected
//!                    ^                           |
//!                    +------- Reconnecting <-----+  (attempts left)
//! ```
//! A failed connection attempt counts as a close. Once the attempts run out
//! (or auto-reconnect is off) the client stays `Disconnected` until
//! [`TransportClient::connect`] or [`TransportClient::reconnect`] is called.
//!
//! Message listeners run on the driver task. As with the event bus, a
//! listener panic is not caught: it ends the driver, the client drops to
//! `Disconnected` without a connection-change notification, and no
//! reconnect is scheduled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::PositionMessage;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::TransportConfig;
use crate::listeners::ListenerTable;
use crate::subscriptions::{lock, Subscription};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TransportError {
    /// The socket is not open; the caller should drop the frame.
    #[error("socket is not connected")]
    NotConnected,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// The driver task ended between the state check and the send.
    #[error("socket writer has shut down")]
    ChannelClosed,

    #[error("invalid transport url {0:?}")]
    InvalidUrl(String),
}

impl TransportError {
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::NotConnected => "transport_not_connected",
            TransportError::Encode(_) => "transport_encode",
            TransportError::ChannelClosed => "transport_channel_closed",
            TransportError::InvalidUrl(_) => "transport_invalid_url",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Connection state plus the generation of the driver allowed to change it.
///
/// Every `connect`, `reconnect` and `disconnect` starts a new generation. A
/// driver only publishes while its generation is current, so a driver that
/// is still winding down after being retired cannot overwrite newer state.
struct Link {
    state: ConnectionState,
    generation: u64,
    reconnect_attempts: u32,
}

struct Inner {
    config: TransportConfig,
    link: Mutex<Link>,
    attempted: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    messages: ListenerTable<(), PositionMessage>,
    connection: ListenerTable<(), bool>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        lock(&self.link).state
    }

    /// Retires the running driver and starts a new generation in `state`.
    /// Returns the new generation and the state it replaced.
    fn retire(&self, state: ConnectionState) -> (u64, ConnectionState) {
        let mut link = lock(&self.link);
        let previous = link.state;
        link.generation += 1;
        link.state = state;
        link.reconnect_attempts = 0;
        lock(&self.outbound).take();
        (link.generation, previous)
    }

    /// Applies `state` for driver `generation`. False once it is retired.
    fn advance(&self, generation: u64, state: ConnectionState) -> bool {
        let mut link = lock(&self.link);
        if link.generation != generation {
            return false;
        }
        link.state = state;
        true
    }

    /// Publishes an open socket for driver `generation`.
    fn open(&self, generation: u64, sender: mpsc::UnboundedSender<Message>) -> bool {
        let mut link = lock(&self.link);
        if link.generation != generation {
            return false;
        }
        *lock(&self.outbound) = Some(sender);
        link.state = ConnectionState::Connected;
        link.reconnect_attempts = 0;
        true
    }

    /// Withdraws the socket of driver `generation`.
    fn close(&self, generation: u64) -> bool {
        let mut link = lock(&self.link);
        if link.generation != generation {
            return false;
        }
        lock(&self.outbound).take();
        link.state = ConnectionState::Disconnected;
        true
    }

    /// Like `close`, but only when the state still claims a live socket.
    fn abandon(&self, generation: u64) -> bool {
        let mut link = lock(&self.link);
        if link.generation != generation || link.state == ConnectionState::Disconnected {
            return false;
        }
        lock(&self.outbound).take();
        link.state = ConnectionState::Disconnected;
        true
    }

    /// Claims the next reconnect attempt for driver `generation`, or None
    /// when the driver should stop.
    fn next_attempt(&self, generation: u64) -> Option<u32> {
        let mut link = lock(&self.link);
        if link.generation != generation
            || !self.config.auto_reconnect
            || link.reconnect_attempts >= self.config.max_reconnect_attempts
        {
            return None;
        }
        link.reconnect_attempts += 1;
        link.state = ConnectionState::Reconnecting;
        Some(link.reconnect_attempts)
    }

    fn notify_connection(&self, connected: bool) {
        self.connection.dispatch(&(), &connected);
    }

    fn deliver(&self, text: &str) {
        match PositionMessage::decode(text) {
            Ok(message) => {
                self.messages.dispatch(&(), &message);
            }
            Err(e) => warn!("Dropping malformed frame {:?}: {}", text, e),
        }
    }
}

/// Handle to one logical connection. Clones share the same socket.
#[derive(Clone)]
pub struct TransportClient {
    inner: Arc<Inner>,
}

impl TransportClient {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    reconnect_attempts: 0,
                }),
                attempted: AtomicBool::new(false),
                outbound: Mutex::new(None),
                driver: Mutex::new(None),
                messages: ListenerTable::new(),
                connection: ListenerTable::new(),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Starts (or restarts) the connection on the current tokio runtime.
    ///
    /// Any previous socket and its pending reconnect are torn down first, and
    /// the reconnect attempt counter starts again from zero.
    pub fn connect(&self) -> Result<(), TransportError> {
        if self.inner.config.validate().is_err() {
            return Err(TransportError::InvalidUrl(self.inner.config.url.clone()));
        }

        self.inner.attempted.store(true, Ordering::SeqCst);
        let (generation, previous) = self.inner.retire(ConnectionState::Connecting);
        let driver = tokio::spawn(drive(Arc::clone(&self.inner), generation));
        if let Some(old) = lock(&self.inner.driver).replace(driver) {
            old.abort();
        }
        if previous == ConnectionState::Connected {
            self.inner.notify_connection(false);
        }
        Ok(())
    }

    /// Same as [`connect`](Self::connect).
    pub fn reconnect(&self) -> Result<(), TransportError> {
        self.connect()
    }

    /// Closes the socket and cancels any pending reconnect.
    pub fn disconnect(&self) {
        let (_, previous) = self.inner.retire(ConnectionState::Disconnected);
        if let Some(driver) = lock(&self.inner.driver).take() {
            driver.abort();
        }
        if previous == ConnectionState::Connected {
            info!("Disconnected from {}", self.inner.config.url);
            self.inner.notify_connection(false);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Queues one `{id, x, y}` frame on the open socket.
    ///
    /// Fails with [`TransportError::NotConnected`] unless the socket is open.
    /// Nothing is buffered for later: a position delta that cannot go out now
    /// is worthless.
    pub fn emit_message(&self, id: &str, x: f32, y: f32) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let frame = PositionMessage { id: id.to_string(), x, y }.encode()?;
        let outbound = lock(&self.inner.outbound);
        let sender = outbound.as_ref().ok_or(TransportError::NotConnected)?;
        sender
            .send(Message::Text(frame))
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Calls `callback` with every well-formed inbound frame.
    pub fn subscribe_to_messages<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PositionMessage) + Send + Sync + 'static,
    {
        self.inner.messages.register((), false, Arc::new(callback))
    }

    /// Calls `callback` on every open and close. If a connection attempt has
    /// already been made, it is also called right away with the current
    /// state.
    pub fn on_connection_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        let callback: Arc<dyn Fn(&bool) + Send + Sync> = Arc::new(callback);
        let subscription = self
            .inner
            .connection
            .register((), false, Arc::clone(&callback));
        if self.inner.attempted.load(Ordering::SeqCst) {
            callback(&self.is_connected());
        }
        subscription
    }
}

/// Withdraws the socket if the driver ends without closing it, as it does
/// when a listener panic unwinds through the driver.
struct DriverGuard {
    inner: Arc<Inner>,
    generation: u64,
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if self.inner.abandon(self.generation) {
            warn!(
                "Transport driver for {} stopped without closing its socket",
                self.inner.config.url
            );
        }
    }
}

/// Owns the socket for the lifetime of one `connect` call, including every
/// automatic reconnect that follows it.
async fn drive(inner: Arc<Inner>, generation: u64) {
    let _guard = DriverGuard {
        inner: Arc::clone(&inner),
        generation,
    };
    let url = inner.config.url.clone();

    loop {
        if !inner.advance(generation, ConnectionState::Connecting) {
            return;
        }
        debug!("Connecting to {}", url);

        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                let (mut write, mut read) = stream.split();
                let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
                if !inner.open(generation, tx) {
                    return;
                }
                info!("Connected to {}", url);
                inner.notify_connection(true);

                loop {
                    tokio::select! {
                        outgoing = rx.recv() => match outgoing {
                            Some(message) => {
                                if let Err(e) = write.send(message).await {
                                    warn!("Failed to send frame to {}: {}", url, e);
                                    break;
                                }
                            }
                            None => break,
                        },
                        incoming = read.next() => match incoming {
                            Some(Ok(Message::Text(text))) => inner.deliver(&text),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("Socket error on {}: {}", url, e);
                                break;
                            }
                        },
                    }
                }

                info!("Connection to {} closed", url);
            }
            Err(e) => warn!("Failed to connect to {}: {}", url, e),
        }

        if !inner.close(generation) {
            return;
        }
        inner.notify_connection(false);

        let Some(attempt) = inner.next_attempt(generation) else {
            if inner.config.auto_reconnect {
                warn!(
                    "Giving up on {} after {} reconnect attempt(s)",
                    url, inner.config.max_reconnect_attempts
                );
            }
            return;
        };
        info!(
            "Attempting to reconnect ({}/{})...",
            attempt, inner.config.max_reconnect_attempts
        );
        sleep(inner.config.reconnect_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    fn config(url: String) -> TransportConfig {
        TransportConfig {
            url,
            auto_reconnect: true,
            reconnect_interval: Duration::from_millis(20),
            max_reconnect_attempts: 3,
        }
    }

    /// Accepts one WebSocket peer and echoes back every text frame, after
    /// first sending a frame that does not parse.
    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            socket
                .send(Message::Text("{not json".to_string()))
                .await
                .unwrap();
            while let Some(Ok(message)) = socket.next().await {
                if message.is_text() {
                    socket.send(message).await.unwrap();
                }
            }
        });
        format!("ws://{}/ws", addr)
    }

    /// Accepts WebSocket peers until the test ends. The first `close_first`
    /// peers are sent a Close right after the handshake; later ones are held
    /// open and have their text frames echoed. Returns the url and a count
    /// of completed handshakes.
    async fn relay_stub(close_first: usize) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handshakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handshakes);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut socket) = accept_async(stream).await else {
                    continue;
                };
                let seen = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if seen <= close_first {
                    let _ = socket.send(Message::Close(None)).await;
                    continue;
                }
                tokio::spawn(async move {
                    while let Some(Ok(message)) = socket.next().await {
                        if message.is_text() && socket.send(message).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        (format!("ws://{}/ws", addr), handshakes)
    }

    fn record_changes(client: &TransportClient) -> (Arc<Mutex<Vec<bool>>>, Subscription) {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&changes);
        let subscription = client.on_connection_change(move |connected| {
            log.lock().unwrap().push(*connected);
        });
        (changes, subscription)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_emit_before_connect_is_rejected() {
        let client = TransportClient::new(config("ws://127.0.0.1:1/ws".to_string()));
        let result = client.emit_message("p1", 1.0, 2.0);
        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_rejects_non_websocket_url() {
        let client = TransportClient::new(config("http://127.0.0.1/ws".to_string()));
        assert!(matches!(
            client.connect(),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(!client.inner.attempted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_connection_change_fires_only_after_attempt() {
        let client = TransportClient::new(config("ws://127.0.0.1:1/ws".to_string()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        let _first = client.on_connection_change(move |connected| {
            log.lock().unwrap().push(*connected);
        });
        assert!(seen.lock().unwrap().is_empty());

        client.inner.attempted.store(true, Ordering::SeqCst);
        let log = Arc::clone(&seen);
        let _second = client.on_connection_change(move |connected| {
            log.lock().unwrap().push(*connected);
        });
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn test_echo_skips_malformed_frames() {
        let url = echo_server().await;
        let client = TransportClient::new(config(url));

        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        let _messages = client.subscribe_to_messages(move |message| {
            log.lock().unwrap().push(message.clone());
        });

        client.connect().unwrap();
        wait_for(|| client.is_connected()).await;

        client.emit_message("p1", 3.0, 4.0).unwrap();
        wait_for(|| !received.lock().unwrap().is_empty()).await;

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].id, "p1");
        assert_eq!(received[0].position(), shared::Position::new(3.0, 4.0));
    }

    #[tokio::test]
    async fn test_reconnect_stops_after_max_attempts() {
        // Accepts TCP connections and drops them before the handshake, so
        // every attempt fails immediately.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepts);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });

        let client = TransportClient::new(config(format!("ws://{}/ws", addr)));
        let closes = Arc::new(AtomicUsize::new(0));
        let close_counter = Arc::clone(&closes);
        let _changes = client.on_connection_change(move |connected| {
            if !connected {
                close_counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        client.connect().unwrap();
        wait_for(|| closes.load(Ordering::SeqCst) == 4).await;
        sleep(Duration::from_millis(200)).await;

        // One initial attempt plus three reconnects.
        assert_eq!(accepts.load(Ordering::SeqCst), 4);
        assert_eq!(closes.load(Ordering::SeqCst), 4);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_stops_socket() {
        let url = echo_server().await;
        let client = TransportClient::new(config(url));
        let changes = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&changes);
        let _changes = client.on_connection_change(move |connected| {
            log.lock().unwrap().push(*connected);
        });

        client.connect().unwrap();
        wait_for(|| client.is_connected()).await;
        client.disconnect();

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.emit_message("p1", 0.0, 0.0),
            Err(TransportError::NotConnected)
        ));
        assert_eq!(*changes.lock().unwrap(), vec![true, false]);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_opens_fresh_socket() {
        let (url, handshakes) = relay_stub(0).await;
        let client = TransportClient::new(config(url));
        let (changes, _changes) = record_changes(&client);

        client.connect().unwrap();
        wait_for(|| client.is_connected()).await;
        client.disconnect();
        assert!(!client.is_connected());

        client.reconnect().unwrap();
        wait_for(|| client.is_connected()).await;

        assert_eq!(handshakes.load(Ordering::SeqCst), 2);
        assert_eq!(*changes.lock().unwrap(), vec![true, false, true]);
        assert!(client.emit_message("p1", 1.0, 1.0).is_ok());
        client.disconnect();
    }

    #[tokio::test]
    async fn test_successful_open_resets_attempts() {
        // Five sockets are closed right after opening. With a limit of three
        // attempts the client only gets through because every successful
        // open starts the count again.
        let (url, handshakes) = relay_stub(5).await;
        let client = TransportClient::new(config(url));

        client.connect().unwrap();
        wait_for(|| handshakes.load(Ordering::SeqCst) == 6 && client.is_connected()).await;

        assert_eq!(lock(&client.inner.link).reconnect_attempts, 0);
        client.disconnect();
    }

    #[tokio::test]
    async fn test_connection_change_replays_open_state() {
        let (url, _) = relay_stub(0).await;
        let client = TransportClient::new(config(url));
        client.connect().unwrap();
        wait_for(|| client.is_connected()).await;

        let (changes, _changes) = record_changes(&client);
        assert_eq!(*changes.lock().unwrap(), vec![true]);
        client.disconnect();
    }

    #[tokio::test]
    async fn test_retired_driver_cannot_publish() {
        let (url, _) = relay_stub(0).await;
        let client = TransportClient::new(config(url));
        client.connect().unwrap();
        wait_for(|| client.is_connected()).await;
        let stale = lock(&client.inner.link).generation;

        client.disconnect();

        // A driver that finished its handshake just as it was retired.
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(!client.inner.open(stale, tx));
        assert!(!client.inner.advance(stale, ConnectionState::Connected));
        assert!(client.inner.next_attempt(stale).is_none());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.emit_message("p1", 0.0, 0.0),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_panicking_listener_leaves_client_disconnected() {
        let (url, _) = relay_stub(0).await;
        let client = TransportClient::new(config(url));
        let _messages = client.subscribe_to_messages(|_| panic!("listener failed"));

        client.connect().unwrap();
        wait_for(|| client.is_connected()).await;
        client.emit_message("p1", 2.0, 2.0).unwrap();

        wait_for(|| client.state() == ConnectionState::Disconnected).await;
        assert!(matches!(
            client.emit_message("p1", 0.0, 0.0),
            Err(TransportError::NotConnected)
        ));
    }
}
