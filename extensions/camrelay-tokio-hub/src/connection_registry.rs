use crate::error::HubError;
use bytes::Bytes;
use camrelay::message::{Identity, Message, MessageCodec};
use camrelay::utils::now;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Write side of an authenticated transport.
///
/// Each implementation serializes its own writes, so concurrent senders
/// never interleave partial messages.
#[async_trait::async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send_bytes(&self, bytes: Bytes) -> Result<(), HubError>;

    async fn close(&self);
}

/// An authenticated endpoint currently attached to the hub.
#[derive(Clone)]
pub struct Connection {
    pub identity: Identity,

    /// Distinguishes successive connections of the same entity.
    pub serial: u64,

    /// Microseconds since the UNIX epoch.
    pub connected_at: u64,
    sink: Arc<dyn OutboundSink>,
}

impl Connection {
    pub fn entity_id(&self) -> &str {
        &self.identity.entity_id
    }

    pub fn account_id(&self) -> &str {
        &self.identity.account_id
    }

    pub async fn send(&self, message: &Message) -> Result<(), HubError> {
        self.sink
            .send_bytes(Bytes::from(MessageCodec::encode(message)))
            .await
    }

    pub async fn close(&self) {
        self.sink.close().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("identity", &self.identity)
            .field("serial", &self.serial)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

/// Entity id → live connection.
///
/// All access goes through one mutex that is never held across an await;
/// callers get cloned `Connection` handles and write to them unlocked.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, Connection>>,
    next_serial: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a connection for `identity`.
    ///
    /// An existing connection of the same entity is replaced and returned so
    /// the caller can close it.
    pub fn insert(
        &self,
        identity: Identity,
        sink: Arc<dyn OutboundSink>,
    ) -> (Connection, Option<Connection>) {
        let connection = Connection {
            identity,
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
            connected_at: now(),
            sink,
        };

        let replaced = self
            .lock()
            .insert(connection.identity.entity_id.clone(), connection.clone());

        (connection, replaced)
    }

    pub fn get(&self, entity_id: &str) -> Option<Connection> {
        self.lock().get(entity_id).cloned()
    }

    /// Removes `entity_id` only if it still maps to the connection with
    /// `serial`; a stale teardown never evicts its successor.
    pub fn remove(&self, entity_id: &str, serial: u64) -> bool {
        let mut connections = self.lock();

        let current = connections
            .get(entity_id)
            .is_some_and(|connection| connection.serial == serial);

        if current {
            connections.remove(entity_id);
        }

        current
    }

    /// Every connection of `account_id` except `exclude_entity`.
    pub fn same_account(&self, account_id: &str, exclude_entity: &str) -> Vec<Connection> {
        self.lock()
            .values()
            .filter(|connection| {
                connection.identity.account_id == account_id
                    && connection.identity.entity_id != exclude_entity
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
