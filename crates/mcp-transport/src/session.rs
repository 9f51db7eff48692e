use crate::error::{Result, TransportError};
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    Http,
    Sse,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportType::Http => write!(f, "http-stream"),
            TransportType::Sse => write!(f, "sse"),
        }
    }
}

/// A live connection to the remote server: a FIFO channel pair driven
/// by a background task that owns the transport's HTTP mechanics.
///
/// Message ordering is preserved per direction. When the driver task
/// ends (network drop, auth rejection mid-session), the incoming
/// channel closes and [`receive`](Self::receive) yields `None`; the
/// caller re-enters the selector to reconnect.
pub struct RemoteSession {
    transport_type: TransportType,
    outgoing: mpsc::UnboundedSender<Value>,
    incoming: mpsc::UnboundedReceiver<Value>,
    driver: JoinHandle<()>,
}

impl RemoteSession {
    pub(crate) fn new(
        transport_type: TransportType,
        outgoing: mpsc::UnboundedSender<Value>,
        incoming: mpsc::UnboundedReceiver<Value>,
        driver: JoinHandle<()>,
    ) -> Self {
        Self {
            transport_type,
            outgoing,
            incoming,
            driver,
        }
    }

    pub fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    /// Queue a message toward the remote server.
    pub fn send(&self, message: Value) -> Result<()> {
        self.outgoing
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    /// Next message from the remote server; `None` once the session has
    /// ended.
    pub async fn receive(&mut self) -> Option<Value> {
        self.incoming.recv().await
    }

    /// Tear the session down.
    pub async fn close(self) {
        drop(self.outgoing);
        self.driver.abort();
        let _ = self.driver.await;
    }
}

impl fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSession")
            .field("transport_type", &self.transport_type)
            .finish()
    }
}
