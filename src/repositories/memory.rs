//! Process-local store. Used when no database is configured and in tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{ChatStore, Page, StatsStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationKey, DailyStats, Message, MessageId, MessageStatus, UserId,
};

#[derive(Default)]
struct ChatTables {
    /// Insertion order doubles as creation order.
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
    conversations: HashMap<ConversationKey, Conversation>,
}

/// In-memory `ChatStore` + `StatsStore`.
#[derive(Default)]
pub struct MemoryStore {
    chat: RwLock<ChatTables>,
    stats: RwLock<BTreeMap<NaiveDate, DailyStats>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the backing store were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn insert_message(&self, message: &Message) -> AppResult<Conversation> {
        self.check()?;
        let key = ConversationKey::new(&message.sender_id, &message.recipient_id);
        let mut t = self.chat.write().await;
        if t.index.contains_key(&message.id) {
            return Err(AppError::Validation(format!("duplicate message id {}", message.id)));
        }
        let pos = t.messages.len();
        t.index.insert(message.id.clone(), pos);
        t.messages.push(message.clone());
        let conversation = t
            .conversations
            .entry(key.clone())
            .or_insert_with(|| Conversation::new(key));
        conversation.set_last_message(&message.id, message.created_at);
        conversation.increment_unread(&message.recipient_id);
        Ok(conversation.clone())
    }

    async fn mark_delivered(&self, ids: &[MessageId], at: DateTime<Utc>) -> AppResult<Vec<MessageId>> {
        self.check()?;
        let mut t = self.chat.write().await;
        let mut moved = Vec::new();
        for id in ids {
            let Some(&pos) = t.index.get(id) else { continue };
            let m = &mut t.messages[pos];
            if m.status == MessageStatus::Sent && m.advance(MessageStatus::Delivered, at) {
                moved.push(id.clone());
            }
        }
        Ok(moved)
    }

    async fn deliver_pending(
        &self,
        recipient: &str,
        from: Option<&str>,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<(UserId, MessageId)>> {
        self.check()?;
        let mut t = self.chat.write().await;
        let moved = t
            .messages
            .iter_mut()
            .filter(|m| m.recipient_id == recipient && m.status == MessageStatus::Sent)
            .filter(|m| from.map_or(true, |sender| m.sender_id == sender))
            .filter_map(|m| {
                m.advance(MessageStatus::Delivered, at)
                    .then(|| (m.sender_id.clone(), m.id.clone()))
            })
            .collect();
        Ok(moved)
    }

    async fn mark_seen(&self, sender: &str, viewer: &str, at: DateTime<Utc>) -> AppResult<Vec<MessageId>> {
        self.check()?;
        let mut t = self.chat.write().await;
        let moved = t
            .messages
            .iter_mut()
            .filter(|m| m.sender_id == sender && m.recipient_id == viewer)
            .filter_map(|m| m.advance(MessageStatus::Seen, at).then(|| m.id.clone()))
            .collect();
        if let Some(c) = t.conversations.get_mut(&ConversationKey::new(sender, viewer)) {
            c.reset_unread(viewer);
        }
        Ok(moved)
    }

    async fn find_message(&self, id: &str) -> AppResult<Option<Message>> {
        self.check()?;
        let t = self.chat.read().await;
        Ok(t.index.get(id).map(|&pos| t.messages[pos].clone()))
    }

    async fn conversation(&self, key: &ConversationKey) -> AppResult<Option<Conversation>> {
        self.check()?;
        Ok(self.chat.read().await.conversations.get(key).cloned())
    }

    async fn conversations_for(&self, user_id: &str) -> AppResult<Vec<Conversation>> {
        self.check()?;
        let t = self.chat.read().await;
        let mut list: Vec<Conversation> = t
            .conversations
            .values()
            .filter(|c| c.key.contains(user_id))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(list)
    }

    async fn messages_between(&self, a: &str, b: &str, page: Page) -> AppResult<Vec<Message>> {
        self.check()?;
        let key = ConversationKey::new(a, b);
        let t = self.chat.read().await;
        Ok(t.messages
            .iter()
            .filter(|m| ConversationKey::new(&m.sender_id, &m.recipient_id) == key)
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn record_visitor(&self, date: NaiveDate, hour: u32, visitor_key: &str) -> AppResult<()> {
        self.check()?;
        let mut days = self.stats.write().await;
        days.entry(date)
            .or_insert_with(|| DailyStats::empty(date))
            .record_visitor(hour, visitor_key);
        Ok(())
    }

    async fn record_order(&self, date: NaiveDate, hour: u32) -> AppResult<()> {
        self.check()?;
        let mut days = self.stats.write().await;
        days.entry(date)
            .or_insert_with(|| DailyStats::empty(date))
            .record_order(hour);
        Ok(())
    }

    async fn update_peak(&self, date: NaiveDate, active: u64) -> AppResult<()> {
        self.check()?;
        let mut days = self.stats.write().await;
        days.entry(date)
            .or_insert_with(|| DailyStats::empty(date))
            .update_peak(active);
        Ok(())
    }

    async fn day(&self, date: NaiveDate) -> AppResult<Option<DailyStats>> {
        self.check()?;
        Ok(self.stats.read().await.get(&date).cloned())
    }

    async fn range(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<DailyStats>> {
        self.check()?;
        if from > to {
            return Ok(Vec::new());
        }
        let days = self.stats.read().await;
        Ok(days.range(from..=to).rev().map(|(_, d)| d.clone()).collect())
    }

    async fn all_days(&self) -> AppResult<Vec<DailyStats>> {
        self.check()?;
        Ok(self.stats.read().await.values().rev().cloned().collect())
    }
}
