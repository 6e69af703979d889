use tracing::{debug, error};

use spark_types::events::{NotificationPreview, ServerEvent};
use spark_types::models::{
    Message, NewMessage, NewNotification, Notification, NotificationKind, User, UserId,
};

use crate::blocking;
use crate::dispatcher::Dispatcher;
use crate::error::GatewayError;

impl Dispatcher {
    /// Persists a chat message, delivers it, and confirms it to the sender.
    ///
    /// The message is stored before any delivery is attempted. A
    /// `message_received` notification is created unless both users have
    /// each other's conversation open; failing to store that notification
    /// is logged and does not fail the send.
    pub async fn send_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: Option<String>,
        image_url: Option<String>,
    ) -> Result<Message, GatewayError> {
        let content = non_blank(content);
        let image_url = non_blank(image_url);
        if content.is_none() && image_url.is_none() {
            return Err(GatewayError::Invalid("message needs content or an image".into()));
        }
        if sender_id == receiver_id {
            return Err(GatewayError::Invalid("cannot message yourself".into()));
        }

        let sender = self.load_user(sender_id).await?.ok_or(GatewayError::PrincipalNotFound(sender_id))?;
        if self.load_user(receiver_id).await?.is_none() {
            return Err(GatewayError::Invalid(format!("recipient {} not found", receiver_id)));
        }

        let conversation = blocking::call(self.store(), move |store| {
            store.get_or_create_conversation(sender_id, receiver_id)
        })
        .await?;

        let new_message = NewMessage {
            conversation_id: conversation.id,
            sender_id,
            content,
            image_url,
        };
        let message =
            blocking::call(self.store(), move |store| store.create_message(&new_message)).await?;

        let delivered = self
            .registry()
            .send_to(
                receiver_id,
                ServerEvent::NewMessage {
                    message: message.clone(),
                    sender: sender.public_profile(),
                },
            )
            .await;
        debug!(
            "{} -> {} message {} (delivered={})",
            sender_id, receiver_id, message.id, delivered
        );

        if self.focus().is_mutual(sender_id, receiver_id) {
            debug!("{} <-> {} both focused, notification suppressed", sender_id, receiver_id);
        } else if let Err(e) = self
            .notify(&sender, receiver_id, NotificationKind::MessageReceived, Some(conversation.id))
            .await
        {
            error!(
                "Failed to create message notification for {} (message {}): {}",
                receiver_id, message.id, e
            );
        }

        self.registry()
            .send_to(sender_id, ServerEvent::MessageConfirmed { message: message.clone() })
            .await;

        Ok(message)
    }

    /// Records that `viewer_id` looked at `viewed_id`'s profile and tells
    /// the viewed user if they are connected.
    pub async fn profile_viewed(
        &self,
        viewer_id: UserId,
        viewed_id: UserId,
    ) -> Result<Notification, GatewayError> {
        if viewer_id == viewed_id {
            return Err(GatewayError::Invalid("cannot view your own profile".into()));
        }

        let viewer = self.load_user(viewer_id).await?.ok_or(GatewayError::PrincipalNotFound(viewer_id))?;
        if self.load_user(viewed_id).await?.is_none() {
            return Err(GatewayError::Invalid(format!("user {} not found", viewed_id)));
        }

        self.notify(&viewer, viewed_id, NotificationKind::ProfileView, None).await
    }

    /// Stores a notification for `recipient` and pushes a preview of it if
    /// they are reachable.
    async fn notify(
        &self,
        from: &User,
        recipient: UserId,
        kind: NotificationKind,
        conversation_id: Option<uuid::Uuid>,
    ) -> Result<Notification, GatewayError> {
        let new_notification = NewNotification {
            user_id: recipient,
            kind,
            from_user_id: from.id,
            conversation_id,
        };
        let notification = blocking::call(self.store(), move |store| {
            store.create_notification(&new_notification)
        })
        .await?;

        let delivered = self
            .registry()
            .send_to(
                recipient,
                ServerEvent::NewNotification {
                    notification: preview(&notification, from),
                },
            )
            .await;
        debug!(
            "{} notification {} for {} (delivered={})",
            kind.as_str(),
            notification.id,
            recipient,
            delivered
        );

        Ok(notification)
    }

    async fn load_user(&self, id: UserId) -> Result<Option<User>, GatewayError> {
        blocking::call(self.store(), move |store| store.get_user(id)).await
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn preview(notification: &Notification, from: &User) -> NotificationPreview {
    let message = match notification.kind {
        NotificationKind::MessageReceived => format!("{} sent you a message", from.display_name),
        NotificationKind::ProfileView => format!("{} viewed your profile", from.display_name),
    };

    NotificationPreview {
        id: notification.id,
        kind: notification.kind,
        from_user_id: from.id,
        from_user_name: from.display_name.clone(),
        from_user_photo: from.photo_url.clone(),
        message,
        created_at: notification.created_at,
    }
}
