use crate::models::{
    ConversationRow, MessageRow, NotificationRow, SessionRow, UserRow, format_timestamp, now,
};
use crate::Database;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use spark_types::models::{
    Conversation, Message, NewMessage, NewNotification, Notification, SessionRecord, User,
    UserUpdate,
};

const USER_COLUMNS: &str =
    "id, username, password, display_name, photo_url, is_online, last_seen, created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        display_name: &str,
        photo_url: Option<&str>,
    ) -> Result<User> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, display_name, photo_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.to_string(),
                    username,
                    password_hash,
                    display_name,
                    photo_url,
                    format_timestamp(now()),
                ],
            )?;
            query_user(conn, "id", &id.to_string())?
                .ok_or_else(|| anyhow!("User vanished after insert: {}", id))
        })?
        .into_user()
    }

    /// Returns the raw row, password hash included.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))?
            .map(UserRow::into_user)
            .transpose()
    }

    pub fn update_user(&self, id: Uuid, update: &UserUpdate) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users
                 SET is_online = COALESCE(?2, is_online),
                     last_seen = COALESCE(?3, last_seen)
                 WHERE id = ?1",
                rusqlite::params![
                    id.to_string(),
                    update.is_online,
                    update.last_seen.map(format_timestamp),
                ],
            )?;
            Ok(())
        })
    }

    // -- Sessions --

    pub fn create_session(
        &self,
        token: &str,
        user_id: Option<Uuid>,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    token,
                    user_id.map(|id| id.to_string()),
                    format_timestamp(expires_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(SessionRecord {
            token: token.to_string(),
            user_id,
            expires_at,
        })
    }

    pub fn get_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
                [token],
                |row| {
                    Ok(SessionRow {
                        token: row.get(0)?,
                        user_id: row.get(1)?,
                        expires_at: row.get(2)?,
                    })
                },
            )
            .optional()
        })?;

        row.map(SessionRow::into_record).transpose()
    }

    pub fn delete_session(&self, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
            Ok(())
        })
    }

    // -- Conversations --

    pub fn find_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        let (a, b) = Conversation::ordered_pair(a, b);
        self.with_conn(|conn| query_conversation(conn, a, b))?
            .map(ConversationRow::into_conversation)
            .transpose()
    }

    /// Creates the conversation for the pair, or returns the existing one if
    /// another request got there first.
    pub fn insert_conversation(&self, a: Uuid, b: Uuid) -> Result<Conversation> {
        let (a, b) = Conversation::ordered_pair(a, b);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversations (id, participant_a, participant_b, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    a.to_string(),
                    b.to_string(),
                    format_timestamp(now()),
                ],
            )?;
            query_conversation(conn, a, b)?
                .ok_or_else(|| anyhow!("Conversation vanished after insert: {} / {}", a, b))
        })?
        .into_conversation()
    }

    // -- Messages --

    /// Inserts the message and bumps the conversation's `last_message_at`
    /// in a single transaction.
    pub fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        let stored = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            image_url: message.image_url.clone(),
            timestamp: now(),
        };
        let ts = format_timestamp(stored.timestamp);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, image_url, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    stored.id.to_string(),
                    stored.conversation_id.to_string(),
                    stored.sender_id.to_string(),
                    stored.content,
                    stored.image_url,
                    ts,
                ],
            )?;
            let updated = tx.execute(
                "UPDATE conversations SET last_message_at = ?2 WHERE id = ?1",
                rusqlite::params![stored.conversation_id.to_string(), ts],
            )?;
            if updated != 1 {
                return Err(anyhow!("Conversation not found: {}", stored.conversation_id));
            }
            tx.commit()?;
            Ok(())
        })?;

        Ok(stored)
    }

    /// Newest first. `before` is an exclusive cursor on the message timestamp.
    pub fn get_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, content, image_url, timestamp
                 FROM messages
                 WHERE conversation_id = ?1 AND (?2 IS NULL OR timestamp < ?2)
                 ORDER BY timestamp DESC
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(
                    rusqlite::params![
                        conversation_id.to_string(),
                        before.map(format_timestamp),
                        limit,
                    ],
                    |row| {
                        Ok(MessageRow {
                            id: row.get(0)?,
                            conversation_id: row.get(1)?,
                            sender_id: row.get(2)?,
                            content: row.get(3)?,
                            image_url: row.get(4)?,
                            timestamp: row.get(5)?,
                        })
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    // -- Notifications --

    pub fn insert_notification(&self, notification: &NewNotification) -> Result<Notification> {
        let stored = Notification {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            kind: notification.kind,
            from_user_id: notification.from_user_id,
            conversation_id: notification.conversation_id,
            is_read: false,
            created_at: now(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, type, from_user_id, conversation_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    stored.id.to_string(),
                    stored.user_id.to_string(),
                    stored.kind.as_str(),
                    stored.from_user_id.to_string(),
                    stored.conversation_id.map(|id| id.to_string()),
                    format_timestamp(stored.created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(stored)
    }

    pub fn get_notifications(&self, user_id: Uuid, limit: u32) -> Result<Vec<Notification>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, type, from_user_id, conversation_id, is_read, created_at
                 FROM notifications
                 WHERE user_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![user_id.to_string(), limit], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        kind: row.get(2)?,
                        from_user_id: row.get(3)?,
                        conversation_id: row.get(4)?,
                        is_read: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })?;

        rows.into_iter().map(NotificationRow::into_notification).collect()
    }

    /// Returns false if no notification with that id belongs to `user_id`.
    pub fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id.to_string(), user_id.to_string()],
            )?;
            Ok(updated == 1)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                display_name: row.get(3)?,
                photo_url: row.get(4)?,
                is_online: row.get(5)?,
                last_seen: row.get(6)?,
                created_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_conversation(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<ConversationRow>> {
    conn.query_row(
        "SELECT id, participant_a, participant_b, last_message_at, created_at
         FROM conversations
         WHERE participant_a = ?1 AND participant_b = ?2",
        [a.to_string(), b.to_string()],
        |row| {
            Ok(ConversationRow {
                id: row.get(0)?,
                participant_a: row.get(1)?,
                participant_b: row.get(2)?,
                last_message_at: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
