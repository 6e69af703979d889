use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of an authenticated user.
pub type UserId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn public_profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id,
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
            is_online: self.is_online,
            last_seen: self.last_seen,
        }
    }
}

/// The subset of a user that peers are allowed to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: UserId,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Partial update of a user record. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub is_online: Option<bool>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl UserUpdate {
    pub fn presence(online: bool, at: DateTime<Utc>) -> Self {
        Self {
            is_online: Some(online),
            last_seen: Some(at),
        }
    }
}

/// A row of the session store. A session without `user_id` exists but was
/// never bound to a logged-in principal.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub token: String,
    pub user_id: Option<UserId>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub participant_a: UserId,
    pub participant_b: UserId,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Normalizes an unordered participant pair so that (a, b) and (b, a)
    /// resolve to the same conversation.
    pub fn ordered_pair(a: UserId, b: UserId) -> (UserId, UserId) {
        if a <= b { (a, b) } else { (b, a) }
    }

    pub fn includes(&self, user: UserId) -> bool {
        self.participant_a == user || self.participant_b == user
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: UserId,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: UserId,
    pub content: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ProfileView,
    MessageReceived,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProfileView => "profile_view",
            Self::MessageReceived => "message_received",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "profile_view" => Some(Self::ProfileView),
            "message_received" => Some(Self::MessageReceived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub from_user_id: UserId,
    pub conversation_id: Option<Uuid>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub from_user_id: UserId,
    pub conversation_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_pair_is_symmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(Conversation::ordered_pair(a, b), Conversation::ordered_pair(b, a));
    }

    #[test]
    fn test_notification_kind_names() {
        for kind in [NotificationKind::ProfileView, NotificationKind::MessageReceived] {
            assert_eq!(NotificationKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert_eq!(NotificationKind::parse("friend_request"), None);
    }
}
