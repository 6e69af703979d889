use std::sync::{Arc, PoisonError};

use axum::extract::ws::close_code;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};
use uuid::Uuid;

use spark_types::events::ServerEvent;
use spark_types::models::{UserId, UserUpdate};

use crate::blocking;
use crate::dispatcher::Dispatcher;
use crate::registry::ConnectionHandle;

/// Exclusive right to change one user's presence. Online and offline passes
/// for the same user run one at a time, so a late offline pass cannot land
/// after the online pass of a newer connection.
pub struct PresenceGuard {
    dispatcher: Dispatcher,
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self
            .dispatcher
            .presence_locks()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Only the map still references it: nobody holds or waits on it.
        if locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.user_id);
        }
    }
}

impl Dispatcher {
    /// Waits until no other presence pass for `user_id` is running.
    pub async fn lock_presence(&self, user_id: UserId) -> PresenceGuard {
        let lock = self
            .presence_locks()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id)
            .or_default()
            .clone();

        PresenceGuard {
            dispatcher: self.clone(),
            user_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Persists the user as online, then tells every connection, the
    /// user's own included.
    pub async fn announce_online(&self, user_id: UserId) {
        self.persist_presence(user_id, true).await;
        let reached = self.registry().broadcast(ServerEvent::UserOnline { user_id }).await;
        info!("{} online (announced to {} connections)", user_id, reached);
    }

    /// Sends the newcomer one `userOnline` per other connected user.
    pub async fn send_roster(&self, user_id: UserId, handle: &ConnectionHandle) {
        for (peer_id, _) in self.registry().snapshot().await {
            if peer_id != user_id {
                handle.send(ServerEvent::UserOnline { user_id: peer_id });
            }
        }
    }

    /// Transport-level close of connection `conn_id`. Does nothing if that
    /// connection is no longer the user's registry entry, which makes it
    /// safe to call after a logout or after being superseded.
    pub async fn disconnect(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let _presence = self.lock_presence(user_id).await;
        if !self.registry().unregister_connection(user_id, conn_id).await {
            return false;
        }
        self.go_offline(user_id).await;
        true
    }

    /// Explicit logout. Closes whatever connection the user has and runs
    /// the offline pass once; a later transport close is then a no-op.
    pub async fn logout(&self, user_id: UserId) -> bool {
        let _presence = self.lock_presence(user_id).await;
        let Some(handle) = self.registry().unregister(user_id).await else {
            return false;
        };
        handle.close(close_code::NORMAL, "Logged out");
        self.go_offline(user_id).await;
        true
    }

    async fn go_offline(&self, user_id: UserId) {
        self.focus().clear(user_id);
        self.persist_presence(user_id, false).await;
        let reached = self.registry().broadcast(ServerEvent::UserOffline { user_id }).await;
        info!("{} offline (announced to {} connections)", user_id, reached);
    }

    /// Presence is best-effort: a failed write is logged, never fatal.
    async fn persist_presence(&self, user_id: UserId, online: bool) {
        let update = UserUpdate::presence(online, Utc::now());
        if let Err(e) =
            blocking::call(self.store(), move |store| store.update_user(user_id, &update)).await
        {
            warn!("Failed to persist presence for {} (online={}): {}", user_id, online, e);
        }
    }
}
