//! Per-scanner connection state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

/// Snapshot of one connected scanner endpoint, as reported by
/// `get_connected_clients`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConnection {
    pub endpoint: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Messages in TCP arrival order for this endpoint.
    pub messages: Vec<String>,
}

/// Live connection entry owned by the gateway: snapshot fields plus the
/// write half and the receive-loop abort handle.
pub(crate) struct ClientEntry {
    pub endpoint: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub messages: Vec<String>,
    pub writer: Arc<Mutex<OwnedWriteHalf>>,
    pub reader_abort: AbortHandle,
}

impl ClientEntry {
    pub fn snapshot(&self) -> ClientConnection {
        ClientConnection {
            endpoint: self.endpoint.to_string(),
            connected_at: self.connected_at,
            last_activity: self.last_activity,
            messages: self.messages.clone(),
        }
    }
}
