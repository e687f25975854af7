//! Conversation list aggregation.
//!
//! The store groups a viewer's messages by normalized pair and returns the
//! newest row per pair with that pair's unviewed count. This module turns
//! those rows into the list a client shows: one entry per partner, newest
//! conversation first.
//!
//! `unseen_count` counts every unviewed message in the pair, including the
//! viewer's own messages the partner has not opened yet.

use std::collections::HashSet;

use shopiet_db::models::ConversationRow;
use shopiet_types::api::ConversationEntry;

/// One entry per partner of `viewer_id`, newest first.
///
/// Rows whose partner already appeared are dropped, as are rows that do not
/// involve the viewer or pair the viewer with themselves.
pub fn summarize(viewer_id: &str, mut rows: Vec<ConversationRow>) -> Vec<ConversationEntry> {
    rows.sort_by(|a, b| {
        b.latest
            .timestamp
            .cmp(&a.latest.timestamp)
            .then(b.latest.id.cmp(&a.latest.id))
    });

    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let msg = &row.latest;
            let involves_viewer = msg.sender_id == viewer_id || msg.recipient_id == viewer_id;
            involves_viewer
                && msg.sender_id != msg.recipient_id
                && seen.insert(msg.partner_of(viewer_id).to_string())
        })
        .map(ConversationEntry::from)
        .collect()
}
