use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            recipient_id    TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL CHECK (length(content) > 0),
            timestamp       TEXT NOT NULL,
            viewed          INTEGER NOT NULL DEFAULT 0,
            CHECK (sender_id <> recipient_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_timestamp
            ON messages(timestamp);

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, recipient_id, timestamp);

        CREATE INDEX IF NOT EXISTS idx_messages_recipient
            ON messages(recipient_id, timestamp);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
