use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use tracing::trace;
use uuid::Uuid;

use spark_types::events::ServerEvent;
use spark_types::models::UserId;

/// What a connection's writer task is asked to do.
#[derive(Debug)]
pub enum Outbound {
    Event(ServerEvent),
    /// Send a close frame and stop writing.
    Close { code: u16, reason: &'static str },
}

/// Write side of one live connection. Cloning shares the same socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Creates a handle with a fresh connection id, plus the receiver its
    /// writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// False once the writer task has gone away.
    pub fn is_writable(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    pub fn close(&self, code: u16, reason: &'static str) -> bool {
        self.tx.send(Outbound::Close { code, reason }).is_ok()
    }
}

/// Maps each user to their single live connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<UserId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last connection wins. Returns the entry that was replaced, if any.
    pub async fn register(&self, user_id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.entries.write().await.insert(user_id, handle)
    }

    /// Idempotent. Returns the removed entry, if there was one.
    pub async fn unregister(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.entries.write().await.remove(&user_id)
    }

    /// Removes the entry only if it still belongs to `conn_id`, so a stale
    /// connection closing late cannot evict its replacement.
    pub async fn unregister_connection(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(&user_id) {
            Some(handle) if handle.conn_id == conn_id => {
                entries.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.entries.read().await.get(&user_id).cloned()
    }

    /// False means "currently unreachable", never an error.
    pub async fn send_to(&self, user_id: UserId, event: ServerEvent) -> bool {
        let Some(handle) = self.lookup(user_id).await else {
            trace!("{} unreachable, dropping {}", user_id, event.name());
            return false;
        };
        if !handle.is_writable() {
            return false;
        }
        handle.send(event)
    }

    /// Copy of the current entries. Iterating the copy is unaffected by
    /// concurrent register/unregister.
    pub async fn snapshot(&self) -> Vec<(UserId, ConnectionHandle)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect()
    }

    /// Sends `event` to every registered connection. Returns how many
    /// accepted it.
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        self.snapshot()
            .await
            .into_iter()
            .filter(|(_, handle)| handle.send(event.clone()))
            .count()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
