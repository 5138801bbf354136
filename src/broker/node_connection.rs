use std::fmt;
use std::net::SocketAddr;

use tokio::sync::{Mutex, watch};

use crate::transport::{Message, StreamWriter};
use crate::utils::{Error, Result};

/// The broker's side of one connected node.
///
/// Writes are serialized through the writer lock. Closing only flips the
/// closed signal; the dispatch loop of the connection observes it, leaves
/// the routing table and shuts the stream down.
pub struct NodeConnection {
    name: String,
    peer: SocketAddr,
    writer: Mutex<StreamWriter>,
    closed: watch::Sender<bool>,
}

impl NodeConnection {
    pub fn new(name: impl Into<String>, peer: SocketAddr, writer: StreamWriter) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            name: name.into(),
            peer,
            writer: Mutex::new(writer),
            closed,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&self, message: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.writer.lock().await.write_message(message).await
    }

    /// Returns `true` for the call that actually closed the connection.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub(crate) async fn shutdown(&self) {
        self.writer.lock().await.shutdown().await;
    }
}

impl fmt::Debug for NodeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConnection")
            .field("name", &self.name)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
