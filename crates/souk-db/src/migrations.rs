use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id   INTEGER NOT NULL,
            receiver_id INTEGER NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            read        INTEGER NOT NULL DEFAULT 0,
            CHECK (sender_id <> receiver_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_receiver_unread
            ON messages(receiver_id, read);

        -- One row per unordered pair, keyed (min, max). actual_sender_id /
        -- actual_receiver_id record who really sent the latest message.
        CREATE TABLE IF NOT EXISTS chat_previews (
            sender_id           INTEGER NOT NULL,
            receiver_id         INTEGER NOT NULL,
            latest_message      TEXT NOT NULL,
            time                TEXT NOT NULL,
            unread              INTEGER NOT NULL DEFAULT 0,
            actual_sender_id    INTEGER NOT NULL,
            actual_receiver_id  INTEGER NOT NULL,
            PRIMARY KEY (sender_id, receiver_id),
            CHECK (sender_id < receiver_id),
            CHECK (unread >= 0)
        );

        CREATE TABLE IF NOT EXISTS push_targets (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id      INTEGER NOT NULL,
            token        TEXT,
            subscription TEXT,
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            CHECK (token IS NOT NULL OR subscription IS NOT NULL)
        );

        CREATE INDEX IF NOT EXISTS idx_push_targets_user
            ON push_targets(user_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
