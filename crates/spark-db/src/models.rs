//! Database row types. These map directly to SQLite rows and are converted
//! into `spark_types::models` at the edge of the crate.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use uuid::Uuid;

use spark_types::models::{Conversation, Message, Notification, NotificationKind, SessionRecord, User};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<String>,
    pub created_at: String,
}

pub struct SessionRow {
    pub token: String,
    pub user_id: Option<String>,
    pub expires_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub last_message_at: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub timestamp: String,
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub from_user_id: String,
    pub conversation_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

/// Current time at the precision timestamps are stored with, so values
/// returned from an insert compare equal to values read back later.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("Corrupt timestamp '{}'", raw))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Corrupt id '{}'", raw))
}

fn parse_opt<T>(raw: Option<&str>, f: impl Fn(&str) -> Result<T>) -> Result<Option<T>> {
    raw.map(f).transpose()
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: parse_id(&self.id)?,
            username: self.username,
            display_name: self.display_name,
            photo_url: self.photo_url,
            is_online: self.is_online,
            last_seen: parse_opt(self.last_seen.as_deref(), parse_timestamp)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl SessionRow {
    pub fn into_record(self) -> Result<SessionRecord> {
        Ok(SessionRecord {
            user_id: parse_opt(self.user_id.as_deref(), parse_id)?,
            expires_at: parse_timestamp(&self.expires_at)?,
            token: self.token,
        })
    }
}

impl ConversationRow {
    pub fn into_conversation(self) -> Result<Conversation> {
        Ok(Conversation {
            id: parse_id(&self.id)?,
            participant_a: parse_id(&self.participant_a)?,
            participant_b: parse_id(&self.participant_b)?,
            last_message_at: parse_opt(self.last_message_at.as_deref(), parse_timestamp)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id)?,
            conversation_id: parse_id(&self.conversation_id)?,
            sender_id: parse_id(&self.sender_id)?,
            content: self.content,
            image_url: self.image_url,
            timestamp: parse_timestamp(&self.timestamp)?,
        })
    }
}

impl NotificationRow {
    pub fn into_notification(self) -> Result<Notification> {
        Ok(Notification {
            id: parse_id(&self.id)?,
            user_id: parse_id(&self.user_id)?,
            kind: NotificationKind::parse(&self.kind)
                .ok_or_else(|| anyhow!("Unknown notification type '{}'", self.kind))?,
            from_user_id: parse_id(&self.from_user_id)?,
            conversation_id: parse_opt(self.conversation_id.as_deref(), parse_id)?,
            is_read: self.is_read,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_formats() {
        let now = Utc::now();
        let parsed = parse_timestamp(&format_timestamp(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());

        let sqlite = parse_timestamp("2024-03-01 10:20:30").unwrap();
        assert_eq!(format_timestamp(sqlite), "2024-03-01T10:20:30.000000Z");

        assert!(parse_timestamp("yesterday").is_err());
    }
}
