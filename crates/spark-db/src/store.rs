//! The storage collaborator consumed by the real-time gateway.
//!
//! Every method is blocking. Async callers are expected to run them on the
//! blocking pool.

use anyhow::Result;
use uuid::Uuid;

use spark_types::models::{
    Conversation, Message, NewMessage, NewNotification, Notification, SessionRecord, User,
    UserId, UserUpdate,
};

use crate::Database;

pub trait Store: Send + Sync + 'static {
    fn get_session(&self, token: &str) -> Result<Option<SessionRecord>>;

    fn get_user(&self, id: UserId) -> Result<Option<User>>;

    fn update_user(&self, id: UserId, update: &UserUpdate) -> Result<()>;

    /// Looks up by unordered participant pair.
    fn get_conversation(&self, a: UserId, b: UserId) -> Result<Option<Conversation>>;

    fn create_conversation(&self, a: UserId, b: UserId) -> Result<Conversation>;

    /// Persists the message and updates the conversation's `last_message_at`.
    fn create_message(&self, message: &NewMessage) -> Result<Message>;

    fn create_notification(&self, notification: &NewNotification) -> Result<Notification>;

    fn get_or_create_conversation(&self, a: UserId, b: UserId) -> Result<Conversation> {
        match self.get_conversation(a, b)? {
            Some(conversation) => Ok(conversation),
            None => self.create_conversation(a, b),
        }
    }
}

impl Store for Database {
    fn get_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        Database::get_session(self, token)
    }

    fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.get_user_by_id(id)
    }

    fn update_user(&self, id: Uuid, update: &UserUpdate) -> Result<()> {
        Database::update_user(self, id, update)
    }

    fn get_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        self.find_conversation(a, b)
    }

    fn create_conversation(&self, a: Uuid, b: Uuid) -> Result<Conversation> {
        self.insert_conversation(a, b)
    }

    fn create_message(&self, message: &NewMessage) -> Result<Message> {
        self.insert_message(message)
    }

    fn create_notification(&self, notification: &NewNotification) -> Result<Notification> {
        self.insert_notification(notification)
    }
}
