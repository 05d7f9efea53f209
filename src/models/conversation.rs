//! Conversations between exactly two participants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use super::presence::{MessageId, UserId};

/// Unordered pair of participants. `(a, b)` and `(b, a)` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    low: UserId,
    high: UserId,
}

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    pub fn participants(&self) -> [&str; 2] {
        [&self.low, &self.high]
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// The participant that is not `user_id`.
    pub fn other(&self, user_id: &str) -> Option<&str> {
        if self.low == user_id {
            Some(&self.high)
        } else if self.high == user_id {
            Some(&self.low)
        } else {
            None
        }
    }

    /// Storage id: sorted participant ids joined with `:`. A `:` or `\` inside
    /// an id is backslash-escaped so distinct pairs never share an id.
    pub fn id(&self) -> String {
        format!("{}:{}", escape_part(&self.low), escape_part(&self.high))
    }
}

fn escape_part(part: &str) -> Cow<'_, str> {
    if part.contains(&[':', '\\'][..]) {
        Cow::Owned(part.replace('\\', "\\\\").replace(':', "\\:"))
    } else {
        Cow::Borrowed(part)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub key: ConversationKey,
    pub last_message_id: Option<MessageId>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread: HashMap<UserId, u32>,
}

impl Conversation {
    pub fn new(key: ConversationKey) -> Self {
        Self {
            key,
            last_message_id: None,
            last_message_at: None,
            unread: HashMap::new(),
        }
    }

    pub fn unread_for(&self, user_id: &str) -> u32 {
        self.unread.get(user_id).copied().unwrap_or(0)
    }

    /// Move the last-message pointer if `at` is strictly newer. Returns whether it moved.
    pub fn set_last_message(&mut self, id: &str, at: DateTime<Utc>) -> bool {
        match self.last_message_at {
            Some(current) if current >= at => false,
            _ => {
                self.last_message_id = Some(id.to_string());
                self.last_message_at = Some(at);
                true
            }
        }
    }

    pub fn increment_unread(&mut self, user_id: &str) {
        *self.unread.entry(user_id.to_string()).or_insert(0) += 1;
    }

    pub fn reset_unread(&mut self, user_id: &str) {
        self.unread.insert(user_id.to_string(), 0);
    }
}

/// One row of a participant's conversation list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub other_user_id: UserId,
    pub last_message_id: Option<MessageId>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

impl ConversationSummary {
    pub fn for_user(conversation: &Conversation, user_id: &str) -> Option<Self> {
        let other = conversation.key.other(user_id)?;
        Some(Self {
            conversation_id: conversation.key.id(),
            other_user_id: other.to_string(),
            last_message_id: conversation.last_message_id.clone(),
            last_message_at: conversation.last_message_at,
            unread_count: conversation.unread_for(user_id),
        })
    }
}
