//! Connected-peer registry for the relay
//!
//! This module tracks every WebSocket peer the relay is serving:
//! - Connection lifecycle (admit, remove, timeout)
//! - Capacity enforcement
//! - Per-peer outbound queues used for fan-out
//!
//! The registry itself does no I/O. Connection tasks hold it behind a lock
//! and ask it who a frame should be forwarded to.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// A connected peer and the queue feeding its socket writer
#[derive(Debug)]
pub struct Client {
    /// Relay-local identifier, unrelated to any player id
    pub id: u32,
    /// Remote address, for logging
    pub addr: SocketAddr,
    /// Last time any frame arrived from this peer
    pub last_seen: Instant,
    /// Frames queued here are written to the peer's socket in order
    pub sender: mpsc::UnboundedSender<Message>,
    /// Position frames received from this peer
    pub frames_received: u64,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            sender,
            frames_received: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// True when nothing has arrived from the peer within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Registry of all connected peers
///
/// Removing a peer drops its outbound sender, which ends that peer's writer
/// task and closes the socket.
pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Admits a new peer
    ///
    /// Returns None when the relay is at capacity.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, sender));

        Some(client_id)
    }

    /// Removes a peer. Returns false if it was already gone.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Client {} disconnected after {} frame(s)",
                client.id, client.frames_received
            );
            true
        } else {
            false
        }
    }

    pub fn contains(&self, client_id: u32) -> bool {
        self.clients.contains_key(&client_id)
    }

    /// Records activity from a peer. Returns false for unknown peers.
    pub fn touch(&mut self, client_id: u32) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.touch();
                true
            }
            None => false,
        }
    }

    /// Records a position frame from a peer and returns the queues of every
    /// other peer, ordered by id.
    pub fn record_frame(&mut self, from: u32) -> Vec<(u32, mpsc::UnboundedSender<Message>)> {
        if let Some(client) = self.clients.get_mut(&from) {
            client.touch();
            client.frames_received += 1;
        }

        let mut targets: Vec<(u32, mpsc::UnboundedSender<Message>)> = self
            .clients
            .iter()
            .filter(|(id, _)| **id != from)
            .map(|(id, client)| (*id, client.sender.clone()))
            .collect();
        targets.sort_by_key(|(id, _)| *id);
        targets
    }

    /// Every peer's outbound queue
    pub fn senders(&self) -> Vec<(u32, mpsc::UnboundedSender<Message>)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.sender.clone()))
            .collect()
    }

    /// Removes peers that have been silent longer than the timeout and
    /// returns their ids
    pub fn check_timeouts(&mut self) -> Vec<u32> {
        let timeout = self.timeout;
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
