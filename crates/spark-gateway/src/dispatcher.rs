use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use spark_db::Store;
use spark_types::events::{ClientCommand, ServerEvent};
use spark_types::models::UserId;

use crate::error::GatewayError;
use crate::focus::FocusTracker;
use crate::registry::ConnectionRegistry;
use crate::session::SessionVerifier;

/// Owns the process-wide connection state and routes every inbound frame.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    store: Arc<dyn Store>,
    sessions: SessionVerifier,
    registry: ConnectionRegistry,
    focus: FocusTracker,
    /// One lock per user, held for a whole online or offline pass.
    presence_locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, sessions: SessionVerifier) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                sessions,
                registry: ConnectionRegistry::new(),
                focus: FocusTracker::new(),
                presence_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn sessions(&self) -> &SessionVerifier {
        &self.inner.sessions
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn focus(&self) -> &FocusTracker {
        &self.inner.focus
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub(crate) fn presence_locks(&self) -> &Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>> {
        &self.inner.presence_locks
    }

    /// Parses one text frame from `user_id` and dispatches it by type.
    /// Malformed and unknown frames are logged and dropped.
    pub async fn handle_frame(&self, user_id: UserId, text: &str) {
        match serde_json::from_str::<ClientCommand>(text) {
            Ok(cmd) => self.handle_command(user_id, cmd).await,
            Err(e) => {
                warn!(
                    "{} bad command: {} -- raw: {}",
                    user_id,
                    e,
                    truncate(text, 200)
                );
            }
        }
    }

    pub async fn handle_command(&self, user_id: UserId, cmd: ClientCommand) {
        match cmd {
            ClientCommand::OpenChatWindow { other_user_id } => {
                debug!("{} opened chat with {}", user_id, other_user_id);
                self.focus().open(user_id, other_user_id);
            }

            ClientCommand::CloseChatWindow { other_user_id } => {
                debug!("{} closed chat with {}", user_id, other_user_id);
                self.focus().close(user_id, other_user_id);
            }

            ClientCommand::SendMessage {
                receiver_id,
                content,
                image_url,
            } => {
                if let Err(e) = self.send_message(user_id, receiver_id, content, image_url).await {
                    match &e {
                        GatewayError::Storage(_) => {
                            error!("{} -> {} message failed: {}", user_id, receiver_id, e)
                        }
                        _ => info!("{} -> {} message rejected: {}", user_id, receiver_id, e),
                    }
                    self.registry()
                        .send_to(
                            user_id,
                            ServerEvent::MessageFailed {
                                receiver_id,
                                error: e.to_string(),
                            },
                        )
                        .await;
                }
            }

            ClientCommand::Typing {
                receiver_id,
                is_typing,
            } => {
                self.relay_typing(user_id, receiver_id, is_typing).await;
            }

            ClientCommand::Unknown => {
                debug!("{} sent an unknown command type, ignoring", user_id);
            }
        }
    }

    /// Forwards a typing signal to one peer. Nothing is stored or acked.
    pub async fn relay_typing(&self, sender_id: UserId, receiver_id: UserId, is_typing: bool) -> bool {
        self.registry()
            .send_to(
                receiver_id,
                ServerEvent::UserTyping {
                    user_id: sender_id,
                    is_typing,
                },
            )
            .await
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    text.char_indices().nth(max_chars).map_or(text, |(i, _)| &text[..i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TestEnv, events};

    #[tokio::test]
    async fn test_typing_is_relayed_to_peer_only() {
        let env = TestEnv::new();
        let (ada, bob) = (env.user("ada"), env.user("bob"));
        let (_a, mut ada_rx) = env.connect(&ada).await;
        let (_b, mut bob_rx) = env.connect(&bob).await;
        events(&mut ada_rx);
        events(&mut bob_rx);

        let frame = format!(r#"{{"type":"typing","receiverId":"{}","isTyping":true}}"#, bob.id);
        env.dispatcher.handle_frame(ada.id, &frame).await;

        assert_eq!(
            events(&mut bob_rx),
            vec![ServerEvent::UserTyping { user_id: ada.id, is_typing: true }]
        );
        assert!(events(&mut ada_rx).is_empty());
    }

    #[tokio::test]
    async fn test_typing_to_offline_peer_is_dropped() {
        let env = TestEnv::new();
        let (ada, bob) = (env.user("ada"), env.user("bob"));
        assert!(!env.dispatcher.relay_typing(ada.id, bob.id, true).await);
    }

    #[tokio::test]
    async fn test_focus_frames() {
        let env = TestEnv::new();
        let (ada, bob) = (env.user("ada"), env.user("bob"));

        let open = format!(r#"{{"type":"openChatWindow","otherUserId":"{}"}}"#, bob.id);
        env.dispatcher.handle_frame(ada.id, &open).await;
        assert!(env.dispatcher.focus().is_focused(ada.id, bob.id));

        let close = format!(r#"{{"type":"closeChatWindow","otherUserId":"{}"}}"#, bob.id);
        env.dispatcher.handle_frame(ada.id, &close).await;
        assert!(!env.dispatcher.focus().is_focused(ada.id, bob.id));
    }

    #[tokio::test]
    async fn test_garbage_frames_are_ignored() {
        let env = TestEnv::new();
        let ada = env.user("ada");
        let (_conn, mut rx) = env.connect(&ada).await;
        events(&mut rx);

        env.dispatcher.handle_frame(ada.id, "not json").await;
        env.dispatcher.handle_frame(ada.id, r#"{"type":"reactToMessage","emoji":"x"}"#).await;
        env.dispatcher.handle_frame(ada.id, r#"{"type":"typing"}"#).await;

        assert!(events(&mut rx).is_empty());
        assert!(env.dispatcher.registry().lookup(ada.id).await.is_some());
    }
}
