use std::sync::{Mutex, PoisonError};

use axum::http::HeaderMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use spark_types::models::User;

use crate::dispatcher::Dispatcher;
use crate::error::{CLOSE_SUPERSEDED, GatewayError};
use crate::registry::{ConnectionHandle, Outbound};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Open,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    pub fn can_transition(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Open)
                | (Authenticating, Closed)
                | (Open, Open)
                | (Open, Closed)
        )
    }
}

/// One authenticated client connection.
pub struct Connection {
    user: User,
    conn_id: Uuid,
    state: Mutex<ConnectionState>,
}

impl Connection {
    /// Runs the handshake: authenticate, register, announce.
    ///
    /// On failure nothing has been registered or announced and the caller
    /// should close the socket with [`GatewayError::close_code`].
    pub async fn open(
        dispatcher: &Dispatcher,
        headers: &HeaderMap,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Outbound>), GatewayError> {
        let mut state = ConnectionState::Connecting;
        advance(&mut state, ConnectionState::Authenticating);

        let user = match dispatcher.sessions().verify(headers).await {
            Ok(user) => user,
            Err(e) => {
                advance(&mut state, ConnectionState::Closed);
                return Err(e);
            }
        };

        let (handle, rx) = ConnectionHandle::channel();
        let presence = dispatcher.lock_presence(user.id).await;
        if let Some(previous) = dispatcher.registry().register(user.id, handle.clone()).await {
            info!(
                "{} ({}) reconnected, closing superseded connection {}",
                user.username,
                user.id,
                previous.conn_id()
            );
            previous.close(CLOSE_SUPERSEDED, "Superseded by a newer connection");
        }
        dispatcher.send_roster(user.id, &handle).await;
        dispatcher.announce_online(user.id).await;
        drop(presence);

        advance(&mut state, ConnectionState::Open);
        info!("{} ({}) connected to gateway [conn={}]", user.username, user.id, handle.conn_id());

        Ok((
            Self {
                user,
                conn_id: handle.conn_id(),
                state: Mutex::new(state),
            },
            rx,
        ))
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatches one inbound text frame. Frames arriving after close are
    /// dropped.
    pub async fn handle_frame(&self, dispatcher: &Dispatcher, text: &str) {
        if self.state() != ConnectionState::Open {
            debug!("{} frame after close, dropping", self.user.id);
            return;
        }
        dispatcher.handle_frame(self.user.id, text).await;
    }

    /// Tears the connection down. Only the first call does anything, and it
    /// returns true only if this connection was still the user's live one
    /// (so the offline pass ran).
    pub async fn close(&self, dispatcher: &Dispatcher) -> bool {
        let was_open = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let was_open = *state == ConnectionState::Open;
            *state = ConnectionState::Closed;
            was_open
        };
        if !was_open {
            return false;
        }

        let went_offline = dispatcher.disconnect(self.user.id, self.conn_id).await;
        info!(
            "{} ({}) disconnected from gateway [conn={}, offline={}]",
            self.user.username, self.user.id, self.conn_id, went_offline
        );
        went_offline
    }
}

fn advance(state: &mut ConnectionState, next: ConnectionState) {
    if !state.can_transition(next) {
        warn!("Unexpected connection transition {:?} -> {:?}", state, next);
    }
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TestEnv, cookie_headers, events};

    #[test]
    fn test_transitions() {
        use ConnectionState::*;
        assert!(Connecting.can_transition(Authenticating));
        assert!(Authenticating.can_transition(Open));
        assert!(Authenticating.can_transition(Closed));
        assert!(Open.can_transition(Open));
        assert!(Open.can_transition(Closed));

        assert!(!Connecting.can_transition(Open));
        assert!(!Closed.can_transition(Open));
        assert!(!Closed.can_transition(Closed));
        assert!(!Open.can_transition(Authenticating));
    }

    #[tokio::test]
    async fn test_missing_cookie_has_no_side_effects() {
        let env = TestEnv::new();
        let bob = env.user("bob");
        let (_b, mut bob_rx) = env.connect(&bob).await;
        events(&mut bob_rx);

        let err = Connection::open(&env.dispatcher, &HeaderMap::new()).await.err().unwrap();
        assert_eq!(err.close_code(), 1008);
        assert_eq!(env.dispatcher.registry().len().await, 1);
        assert!(events(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_during_auth_uses_error_code() {
        let env = TestEnv::new();
        let ada = env.user("ada");
        let headers = env.login(&ada);
        env.store.fail_sessions(true);

        let err = Connection::open(&env.dispatcher, &headers).await.err().unwrap();
        assert_eq!(err.close_code(), 1011);
        assert!(env.dispatcher.registry().is_empty().await);
        assert!(!env.db.get_user_by_id(ada.id).unwrap().unwrap().is_online);
    }

    #[tokio::test]
    async fn test_frames_after_close_are_dropped() {
        let env = TestEnv::new();
        let (ada, bob) = (env.user("ada"), env.user("bob"));
        let (conn, _rx) = env.connect(&ada).await;
        assert_eq!(conn.state(), ConnectionState::Open);

        let open = format!(r#"{{"type":"openChatWindow","otherUserId":"{}"}}"#, bob.id);
        conn.handle_frame(&env.dispatcher, &open).await;
        assert!(env.dispatcher.focus().is_focused(ada.id, bob.id));

        conn.close(&env.dispatcher).await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        conn.handle_frame(&env.dispatcher, &open).await;
        assert!(!env.dispatcher.focus().is_focused(ada.id, bob.id));
    }

    #[tokio::test]
    async fn test_forged_cookie_is_rejected() {
        let env = TestEnv::new();
        let ada = env.user("ada");
        env.login(&ada);
        let forged = cookie_headers("s:whatever.c2lnbmF0dXJl");
        let err = Connection::open(&env.dispatcher, &forged).await.err().unwrap();
        assert!(matches!(err, GatewayError::Unauthenticated(_)));
        assert!(env.dispatcher.registry().lookup(ada.id).await.is_none());
    }
}
