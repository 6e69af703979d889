use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, NotificationKind, PublicProfile, UserId};

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// The client now shows the conversation with `other_user_id`
    OpenChatWindow { other_user_id: UserId },

    /// The client no longer shows the conversation with `other_user_id`
    CloseChatWindow { other_user_id: UserId },

    SendMessage {
        receiver_id: UserId,
        content: Option<String>,
        image_url: Option<String>,
    },

    Typing { receiver_id: UserId, is_typing: bool },

    /// Any `type` this server does not know about. Ignored so that newer
    /// clients keep working against older servers.
    #[serde(other)]
    Unknown,
}

/// Events sent FROM server TO client over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    UserOnline { user_id: UserId },

    UserOffline { user_id: UserId },

    /// A message addressed to this client
    NewMessage {
        message: Message,
        sender: PublicProfile,
    },

    /// The message this client sent has been persisted
    MessageConfirmed { message: Message },

    /// The message this client sent was rejected or could not be stored
    MessageFailed { receiver_id: UserId, error: String },

    UserTyping { user_id: UserId, is_typing: bool },

    NewNotification { notification: NotificationPreview },
}

impl ServerEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserOnline { .. } => "userOnline",
            Self::UserOffline { .. } => "userOffline",
            Self::NewMessage { .. } => "newMessage",
            Self::MessageConfirmed { .. } => "messageConfirmed",
            Self::MessageFailed { .. } => "messageFailed",
            Self::UserTyping { .. } => "userTyping",
            Self::NewNotification { .. } => "newNotification",
        }
    }
}

/// Denormalized notification, ready for display without further lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreview {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub from_user_id: UserId,
    pub from_user_name: String,
    pub from_user_photo: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
