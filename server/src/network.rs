//! WebSocket relay for position frames
//!
//! Every text frame a peer sends is checked to be a well-formed
//! `{id, x, y}` position message and forwarded unchanged to every other
//! connected peer. Nothing is stored. Each connection runs two tasks: a
//! reader that validates and fans out frames, and a writer that drains the
//! peer's outbound queue into its socket.

use crate::client_manager::ClientManager;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::PositionMessage;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Cadence of the timeout sweep and keep-alive pings
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct RelayServer {
    listener: TcpListener,
    clients: Arc<RwLock<ClientManager>>,
}

impl RelayServer {
    pub async fn bind(addr: &str, max_clients: usize, timeout: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);

        Ok(RelayServer {
            listener,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients, timeout))),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the peer registry
    pub fn clients(&self) -> Arc<RwLock<ClientManager>> {
        Arc::clone(&self.clients)
    }

    /// Accepts connections until the task is dropped
    pub async fn run(self) {
        spawn_timeout_checker(Arc::clone(&self.clients));

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let clients = Arc::clone(&self.clients);
                    tokio::spawn(handle_connection(stream, addr, clients));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Spawns task that drops silent peers and pings the rest
fn spawn_timeout_checker(clients: Arc<RwLock<ClientManager>>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            interval.tick().await;

            let senders = {
                let mut clients = clients.write().await;
                for client_id in clients.check_timeouts() {
                    warn!("Client {} timed out", client_id);
                }
                clients.senders()
            };

            for (_, sender) in senders {
                let _ = sender.send(Message::Ping(Vec::new()));
            }
        }
    });
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, clients: Arc<RwLock<ClientManager>>) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let client_id = { clients.write().await.add_client(addr, tx) };
    let Some(client_id) = client_id else {
        warn!("Relay full, rejecting {}", addr);
        let _ = write.send(Message::Close(None)).await;
        return;
    };

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = write.send(message).await {
                debug!("Write to client {} failed: {}", client_id, e);
                return;
            }
        }
        // Queue closed: the client was removed from the registry.
        let _ = write.send(Message::Close(None)).await;
    });

    while let Some(result) = read.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !relay_frame(&clients, client_id, text).await {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                if !clients.write().await.touch(client_id) {
                    break;
                }
            }
            Err(e) => {
                debug!("Read from client {} failed: {}", client_id, e);
                break;
            }
        }
    }

    clients.write().await.remove_client(&client_id);
    writer.abort();
}

/// Validates one frame and queues it for every other peer. Returns false
/// once the sender is no longer registered.
async fn relay_frame(clients: &RwLock<ClientManager>, from: u32, text: String) -> bool {
    if let Err(e) = PositionMessage::decode(&text) {
        warn!("Dropping malformed frame from client {}: {}", from, e);
        return clients.write().await.touch(from);
    }

    let targets = {
        let mut clients = clients.write().await;
        if !clients.contains(from) {
            return false;
        }
        clients.record_frame(from)
    };

    for (client_id, sender) in targets {
        if sender.send(Message::Text(text.clone())).is_err() {
            debug!("Client {} left before frame could be queued", client_id);
        }
    }
    true
}
