//! Storage seams for messages, conversations and daily statistics.
//!
//! `PgStore` (in `db`) is the durable implementation; `MemoryStore` keeps
//! everything in-process for single-node development and tests.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::AppResult;
use crate::models::{Conversation, ConversationKey, DailyStats, Message, MessageId, UserId};

/// Offset pagination for message history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub const MAX_LIMIT: u32 = 100;

    /// Clamp to `page >= 1` and `1 <= limit <= MAX_LIMIT`.
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 50)
    }
}

/// Durable messages and conversations.
///
/// Status updates are conditional on the current status and return only the
/// rows they actually moved, so each transition is reported exactly once.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist `message` and, in the same write, upsert its conversation: move
    /// the last-message pointer if the message is newer and add one to the
    /// recipient's unread counter. Nothing is stored if any part fails.
    async fn insert_message(&self, message: &Message) -> AppResult<Conversation>;

    /// `sent -> delivered` for the given ids. Returns the ids that moved.
    async fn mark_delivered(&self, ids: &[MessageId], at: DateTime<Utc>) -> AppResult<Vec<MessageId>>;

    /// `sent -> delivered` for everything addressed to `recipient`, or only
    /// what `from` sent when given.
    /// Returns `(sender, message id)` for each message that moved.
    async fn deliver_pending(
        &self,
        recipient: &str,
        from: Option<&str>,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<(UserId, MessageId)>>;

    /// `sent | delivered -> seen` for messages from `sender` to `viewer`, and
    /// reset the viewer's unread counter, as one write: either both happen
    /// or neither does.
    async fn mark_seen(&self, sender: &str, viewer: &str, at: DateTime<Utc>) -> AppResult<Vec<MessageId>>;

    async fn find_message(&self, id: &str) -> AppResult<Option<Message>>;

    async fn conversation(&self, key: &ConversationKey) -> AppResult<Option<Conversation>>;

    /// Conversations `user_id` takes part in, most recent activity first.
    async fn conversations_for(&self, user_id: &str) -> AppResult<Vec<Conversation>>;

    /// Messages between two users in creation order.
    async fn messages_between(&self, a: &str, b: &str, page: Page) -> AppResult<Vec<Message>>;
}

/// Daily statistics keyed by server-local date. Every write is an upsert that
/// first creates a zeroed day (with all 24 hourly slots) when none exists.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn record_visitor(&self, date: NaiveDate, hour: u32, visitor_key: &str) -> AppResult<()>;

    async fn record_order(&self, date: NaiveDate, hour: u32) -> AppResult<()>;

    async fn update_peak(&self, date: NaiveDate, active: u64) -> AppResult<()>;

    async fn day(&self, date: NaiveDate) -> AppResult<Option<DailyStats>>;

    /// Days in `[from, to]`, newest first.
    async fn range(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<DailyStats>>;

    /// Every recorded day, newest first.
    async fn all_days(&self) -> AppResult<Vec<DailyStats>>;
}

#[cfg(test)]
mod tests {
    use super::Page;

    #[test]
    fn page_clamps_and_offsets() {
        assert_eq!(Page::new(0, 0), Page { page: 1, limit: 1 });
        assert_eq!(Page::new(3, 500).limit, Page::MAX_LIMIT);
        assert_eq!(Page::new(3, 20).offset(), 40);
        assert_eq!(Page::default().offset(), 0);
    }
}
