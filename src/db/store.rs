//! `PgStore`: the PostgreSQL implementation of the storage seams.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::repositories as q;
use super::DbPool;
use crate::error::AppResult;
use crate::models::{Conversation, ConversationKey, DailyStats, Message, MessageId, UserId};
use crate::repositories::{ChatStore, Page, StatsStore};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn insert_message(&self, message: &Message) -> AppResult<Conversation> {
        let key = ConversationKey::new(&message.sender_id, &message.recipient_id);
        q::message_insert_with_chat(&self.pool, &key, message).await?;
        Ok(q::chat_get(&self.pool, &key)
            .await?
            .unwrap_or_else(|| Conversation::new(key)))
    }

    async fn mark_delivered(&self, ids: &[MessageId], at: DateTime<Utc>) -> AppResult<Vec<MessageId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        q::messages_mark_delivered(&self.pool, ids, at).await
    }

    async fn deliver_pending(
        &self,
        recipient: &str,
        from: Option<&str>,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<(UserId, MessageId)>> {
        q::messages_deliver_pending(&self.pool, recipient, from, at).await
    }

    async fn mark_seen(&self, sender: &str, viewer: &str, at: DateTime<Utc>) -> AppResult<Vec<MessageId>> {
        let key = ConversationKey::new(sender, viewer);
        q::messages_mark_seen_with_chat(&self.pool, &key, sender, viewer, at).await
    }

    async fn find_message(&self, id: &str) -> AppResult<Option<Message>> {
        q::message_get(&self.pool, id).await
    }

    async fn conversation(&self, key: &ConversationKey) -> AppResult<Option<Conversation>> {
        q::chat_get(&self.pool, key).await
    }

    async fn conversations_for(&self, user_id: &str) -> AppResult<Vec<Conversation>> {
        q::chats_list_by_user(&self.pool, user_id).await
    }

    async fn messages_between(&self, a: &str, b: &str, page: Page) -> AppResult<Vec<Message>> {
        q::messages_between(&self.pool, a, b, i64::from(page.limit), page.offset() as i64).await
    }
}

#[async_trait]
impl StatsStore for PgStore {
    async fn record_visitor(&self, date: NaiveDate, hour: u32, visitor_key: &str) -> AppResult<()> {
        q::stats_record_visitor(&self.pool, date, hour, visitor_key).await
    }

    async fn record_order(&self, date: NaiveDate, hour: u32) -> AppResult<()> {
        q::stats_record_order(&self.pool, date, hour).await
    }

    async fn update_peak(&self, date: NaiveDate, active: u64) -> AppResult<()> {
        q::stats_update_peak(&self.pool, date, active).await
    }

    async fn day(&self, date: NaiveDate) -> AppResult<Option<DailyStats>> {
        q::stats_get(&self.pool, date).await
    }

    async fn range(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<DailyStats>> {
        q::stats_range(&self.pool, Some(from), Some(to)).await
    }

    async fn all_days(&self) -> AppResult<Vec<DailyStats>> {
        q::stats_range(&self.pool, None, None).await
    }
}
