use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use spark_types::models::UserId;

/// Which peers' conversations each user currently has on screen.
///
/// Advisory only: it is never persisted and a disconnected user may linger
/// in other users' sets until those users close the window themselves.
/// Never held across an await.
#[derive(Default)]
pub struct FocusTracker {
    windows: RwLock<HashMap<UserId, HashSet<UserId>>>,
}

impl FocusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, user_id: UserId, peer_id: UserId) {
        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        windows.entry(user_id).or_default().insert(peer_id);
    }

    pub fn close(&self, user_id: UserId, peer_id: UserId) {
        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(peers) = windows.get_mut(&user_id) {
            peers.remove(&peer_id);
            if peers.is_empty() {
                windows.remove(&user_id);
            }
        }
    }

    pub fn is_focused(&self, user_id: UserId, peer_id: UserId) -> bool {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .is_some_and(|peers| peers.contains(&peer_id))
    }

    /// Both users have each other's conversation open. Checked under one
    /// lock so the answer reflects a single instant.
    pub fn is_mutual(&self, a: UserId, b: UserId) -> bool {
        let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
        let focused = |user: &UserId, peer: &UserId| {
            windows.get(user).is_some_and(|peers| peers.contains(peer))
        };
        focused(&a, &b) && focused(&b, &a)
    }

    /// Drops the user's own set. Other users' sets are left alone.
    pub fn clear(&self, user_id: UserId) {
        self.windows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);
    }

    pub fn tracked_users(&self) -> usize {
        self.windows.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
