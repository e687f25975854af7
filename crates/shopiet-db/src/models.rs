//! Database row types: these map directly to SQLite rows.
//! Distinct from shopiet-types API models to keep the DB layer independent.

use chrono::{DateTime, Utc};
use shopiet_types::api::{ConversationEntry, MessageView};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: String,
    pub sender_username: String,
    pub recipient_id: String,
    pub recipient_username: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub viewed: bool,
}

impl MessageRow {
    /// Identifier of the participant that is not `user_id`.
    pub fn partner_of(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.recipient_id
        } else {
            &self.sender_id
        }
    }
}

/// Latest message of one conversation pair plus the pair's unviewed count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRow {
    pub latest: MessageRow,
    pub unseen_count: u64,
}

impl From<MessageRow> for MessageView {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            content: row.content,
            timestamp: row.timestamp,
            sender: row.sender_username,
            recipient: row.recipient_username,
            viewed: row.viewed,
        }
    }
}

impl From<ConversationRow> for ConversationEntry {
    fn from(row: ConversationRow) -> Self {
        Self {
            latest: row.latest.into(),
            unseen_count: row.unseen_count,
        }
    }
}
