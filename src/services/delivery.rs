//! Message delivery: `sent -> delivered -> seen`, conversations and history.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::{
    ConversationKey, ConversationSummary, Message, MessageId, MessageType, SendMessagePayload,
    UserId,
};
use crate::repositories::{ChatStore, Page};

/// Applies status transitions through a `ChatStore`.
///
/// Transitions inside one conversation are serialized by a per-conversation
/// lock so they land in the order they were received. A lock entry lives only
/// while someone holds or waits on it.
#[derive(Clone)]
pub struct DeliveryService {
    store: Arc<dyn ChatStore>,
    locks: Arc<Mutex<HashMap<ConversationKey, Arc<Mutex<()>>>>>,
}

impl DeliveryService {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn lock(&self, key: &ConversationKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().await;
            locks.entry(key.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Release the guard and drop the entry if nobody else holds or waits on it.
    /// New waiters clone the slot under the map lock, so a count of one here
    /// means the map holds the only reference.
    async fn unlock(&self, key: &ConversationKey, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.locks.lock().await;
        if locks.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    async fn tracked_locks(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Validate and persist a new message in `sent` state.
    ///
    /// Nothing is returned (and nothing should be acknowledged) unless the
    /// message and its conversation update were both written.
    #[instrument(skip(self, payload), fields(sender = %payload.sender_id, recipient = %payload.recipient_id))]
    pub async fn create_message(&self, payload: &SendMessagePayload) -> AppResult<Message> {
        payload.validate()?;
        if payload.sender_id == payload.recipient_id {
            return Err(AppError::Validation("cannot message yourself".to_string()));
        }
        let body = payload.body.trim();
        if body.is_empty() && payload.attachment.is_none() {
            return Err(AppError::Validation(
                "message needs a body or an attachment".to_string(),
            ));
        }
        let message_type = match (payload.message_type, &payload.attachment) {
            (Some(t), _) => t,
            (None, Some(_)) => MessageType::File,
            (None, None) => MessageType::Text,
        };
        let message = Message::new(
            payload.sender_id.as_str(),
            payload.recipient_id.as_str(),
            body,
            message_type,
            payload.attachment.clone(),
        );

        let key = ConversationKey::new(&message.sender_id, &message.recipient_id);
        let guard = self.lock(&key).await;
        let inserted = self.store.insert_message(&message).await;
        self.unlock(&key, guard).await;
        let conversation = inserted?;
        debug!(
            message_id = %message.id,
            conversation = %key,
            unread = conversation.unread_for(&message.recipient_id),
            "message stored"
        );
        Ok(message)
    }

    /// Move one freshly created message to `delivered`.
    /// `None` if it had already moved on.
    pub async fn mark_delivered(&self, message: &Message) -> AppResult<Option<Message>> {
        let key = ConversationKey::new(&message.sender_id, &message.recipient_id);
        let guard = self.lock(&key).await;
        let moved = self
            .store
            .mark_delivered(std::slice::from_ref(&message.id), Utc::now())
            .await;
        self.unlock(&key, guard).await;
        if moved?.is_empty() {
            return Ok(None);
        }
        self.store.find_message(&message.id).await
    }

    /// Deliver everything still `sent` to `recipient`, grouped by sender.
    ///
    /// The store update is conditional on `sent`, so a second call with no new
    /// messages in between returns an empty map.
    #[instrument(skip(self))]
    pub async fn deliver_pending(
        &self,
        recipient: &str,
    ) -> AppResult<BTreeMap<UserId, Vec<MessageId>>> {
        let moved = self.store.deliver_pending(recipient, None, Utc::now()).await?;
        let mut by_sender: BTreeMap<UserId, Vec<MessageId>> = BTreeMap::new();
        for (sender, id) in moved {
            by_sender.entry(sender).or_default().push(id);
        }
        if !by_sender.is_empty() {
            info!(
                senders = by_sender.len(),
                messages = by_sender.values().map(Vec::len).sum::<usize>(),
                "delivered pending messages"
            );
        }
        Ok(by_sender)
    }

    /// `recipient` acknowledged receipt of what `sender` sent: deliver the
    /// messages from `sender` that are still `sent`.
    #[instrument(skip(self))]
    pub async fn deliver_from(&self, recipient: &str, sender: &str) -> AppResult<Vec<MessageId>> {
        let key = ConversationKey::new(recipient, sender);
        let guard = self.lock(&key).await;
        let moved = self
            .store
            .deliver_pending(recipient, Some(sender), Utc::now())
            .await;
        self.unlock(&key, guard).await;
        let ids: Vec<MessageId> = moved?.into_iter().map(|(_, id)| id).collect();
        debug!(count = ids.len(), "messages delivered");
        Ok(ids)
    }

    /// `viewer` has read the conversation with `other`: every message from
    /// `other` to `viewer` becomes `seen` and the viewer's unread count resets,
    /// in one store write.
    #[instrument(skip(self))]
    pub async fn mark_seen(&self, viewer: &str, other: &str) -> AppResult<Vec<MessageId>> {
        let key = ConversationKey::new(viewer, other);
        let guard = self.lock(&key).await;
        let seen = self.store.mark_seen(other, viewer, Utc::now()).await;
        self.unlock(&key, guard).await;
        let seen = match seen {
            Ok(seen) => seen,
            Err(e) => {
                warn!(error = %e, conversation = %key, "mark seen failed");
                return Err(e);
            }
        };
        debug!(count = seen.len(), "messages seen");
        Ok(seen)
    }

    pub async fn find_message(&self, id: &str) -> AppResult<Option<Message>> {
        self.store.find_message(id).await
    }

    pub async fn conversation(&self, a: &str, b: &str) -> AppResult<Option<ConversationSummary>> {
        let key = ConversationKey::new(a, b);
        Ok(self
            .store
            .conversation(&key)
            .await?
            .and_then(|c| ConversationSummary::for_user(&c, a)))
    }

    pub async fn conversations(&self, user_id: &str) -> AppResult<Vec<ConversationSummary>> {
        Ok(self
            .store
            .conversations_for(user_id)
            .await?
            .iter()
            .filter_map(|c| ConversationSummary::for_user(c, user_id))
            .collect())
    }

    pub async fn history(&self, user_id: &str, other: &str, page: Page) -> AppResult<Vec<Message>> {
        self.store.messages_between(user_id, other, page).await
    }
}
