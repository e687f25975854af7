use crate::Database;
use crate::models::{ConversationRow, MessageRow, UserRow};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row};

/// Column list shared by every message query; [`message_from_row`] reads it.
const MESSAGE_COLUMNS: &str = "m.id, m.sender_id, s.username, m.recipient_id, r.username, \
                               m.content, m.timestamp, m.viewed";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)",
                (id, username),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    // -- Messages --

    /// Insert a message and return the stored row.
    ///
    /// The stored timestamp is `at`, raised to the newest existing timestamp
    /// if the clock went backwards, so insertion order never contradicts
    /// timestamp order.
    pub fn insert_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let latest: Option<String> =
                conn.query_row("SELECT MAX(timestamp) FROM messages", [], |row| row.get(0))?;
            let stamp = format_timestamp(at);
            let stamp = match latest {
                Some(latest) if latest > stamp => latest,
                _ => stamp,
            };

            conn.execute(
                "INSERT INTO messages (sender_id, recipient_id, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![sender_id, recipient_id, content, stamp],
            )?;
            let id = conn.last_insert_rowid();
            query_message_by_id(conn, id)
        })
    }

    /// Every message between the two users, oldest first.
    pub fn get_messages_between(&self, user_a: &str, user_b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages_between(conn, user_a, user_b))
    }

    /// Mark every unviewed message between the two users as viewed.
    /// Returns the number of rows changed.
    pub fn mark_viewed_between(&self, user_a: &str, user_b: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET viewed = 1
                 WHERE viewed = 0
                   AND ((sender_id = ?1 AND recipient_id = ?2)
                     OR (sender_id = ?2 AND recipient_id = ?1))",
                (user_a, user_b),
            )?;
            Ok(changed)
        })
    }

    /// One row per conversation pair involving `user_id`: the newest message
    /// of the pair (ties broken by highest id) with the count of unviewed
    /// messages in that pair, newest conversation first.
    pub fn get_conversations(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| query_conversations(conn, user_id))
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare("SELECT id, username, created_at FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                created_at: row.get(2)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_message_by_id(conn: &Connection, id: i64) -> Result<MessageRow> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages m
         JOIN users s ON s.id = m.sender_id
         JOIN users r ON r.id = m.recipient_id
         WHERE m.id = ?1"
    );
    let row = conn.query_row(&sql, [id], message_from_row)?;
    Ok(row)
}

fn query_messages_between(conn: &Connection, user_a: &str, user_b: &str) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages m
         JOIN users s ON s.id = m.sender_id
         JOIN users r ON r.id = m.recipient_id
         WHERE (m.sender_id = ?1 AND m.recipient_id = ?2)
            OR (m.sender_id = ?2 AND m.recipient_id = ?1)
         ORDER BY m.timestamp ASC, m.id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map((user_a, user_b), message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_conversations(conn: &Connection, user_id: &str) -> Result<Vec<ConversationRow>> {
    // Pairs are normalized to (min, max) so A->B and B->A land in one group.
    let sql = format!(
        "WITH mine AS (
             SELECT id, timestamp, viewed,
                    MIN(sender_id, recipient_id) AS user_lo,
                    MAX(sender_id, recipient_id) AS user_hi
             FROM messages
             WHERE sender_id = ?1 OR recipient_id = ?1
         ),
         pairs AS (
             SELECT user_lo, user_hi,
                    MAX(timestamp) AS last_ts,
                    SUM(CASE WHEN viewed = 0 THEN 1 ELSE 0 END) AS unseen_count
             FROM mine
             GROUP BY user_lo, user_hi
         )
         SELECT {MESSAGE_COLUMNS}, p.unseen_count
         FROM pairs p
         JOIN messages m ON m.id = (
             SELECT x.id FROM mine x
             WHERE x.user_lo = p.user_lo
               AND x.user_hi = p.user_hi
               AND x.timestamp = p.last_ts
             ORDER BY x.id DESC
             LIMIT 1
         )
         JOIN users s ON s.id = m.sender_id
         JOIN users r ON r.id = m.recipient_id
         ORDER BY p.last_ts DESC, m.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([user_id], |row| {
            let unseen: i64 = row.get(8)?;
            Ok(ConversationRow {
                latest: message_from_row(row)?,
                unseen_count: unseen.max(0) as u64,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let stamp: String = row.get(6)?;
    let timestamp = parse_timestamp(&stamp).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender_username: row.get(2)?,
        recipient_id: row.get(3)?,
        recipient_username: row.get(4)?,
        content: row.get(5)?,
        timestamp,
        viewed: row.get(7)?,
    })
}

/// Fixed-width UTC text (microsecond precision) so lexical order is time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
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
