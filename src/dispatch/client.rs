//! Client connection handle

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// An accepted viewer connection plus its delivery state
///
/// Owned by exactly one party at a time: the accept collaborator, the
/// admission queue, the dispatcher, and finally a single delivery worker.
/// Dropping the handle closes the underlying connection.
pub struct ClientHandle<C> {
    id: u64,
    peer_addr: Option<SocketAddr>,
    accepted_at: Instant,
    last_sequence: Option<u64>,
    frames_sent: u64,
    conn: C,
}

impl<C> ClientHandle<C> {
    /// Wrap a connection
    pub fn new(id: u64, conn: C) -> Self {
        Self {
            id,
            peer_addr: None,
            accepted_at: Instant::now(),
            last_sequence: None,
            frames_sent: 0,
            conn,
        }
    }

    /// Attach the remote address for logging
    pub fn with_peer(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Time since the connection was accepted
    pub fn age(&self) -> std::time::Duration {
        self.accepted_at.elapsed()
    }

    /// Sequence number of the last frame delivered to this viewer
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Frames delivered to this viewer
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Note that a frame was delivered
    pub fn mark_delivered(&mut self, sequence: u64) {
        self.last_sequence = Some(sequence);
        self.frames_sent += 1;
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Close the connection
    pub fn close(self) {
        tracing::debug!(
            client_id = self.id,
            peer = ?self.peer_addr,
            frames_sent = self.frames_sent,
            age_ms = self.age().as_millis() as u64,
            "Closing viewer connection"
        );
        drop(self);
    }
}

impl<C> fmt::Debug for ClientHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("last_sequence", &self.last_sequence)
            .field("frames_sent", &self.frames_sent)
            .finish()
    }
}
