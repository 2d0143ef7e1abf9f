use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{MessageRow, PreviewRow, PushTargetRow};
use crate::{Database, LedgerError, Result, pair_key};

impl Database {
    // -- Messages --

    /// Durably store a new message. Messages are born unread; `read` only
    /// ever transitions false -> true, through `mark_read`.
    pub fn append_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<MessageRow> {
        if sender_id == receiver_id {
            return Err(LedgerError::InvalidPair);
        }

        let created_at = Utc::now().to_rfc3339();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, created_at, read)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![sender_id, receiver_id, content, created_at],
            )?;

            Ok(MessageRow {
                id: conn.last_insert_rowid(),
                sender_id,
                receiver_id,
                content: content.to_string(),
                created_at: created_at.clone(),
                read: false,
            })
        })
    }

    pub fn messages_between(&self, user_a: i64, user_b: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages_between(conn, user_a, user_b))
    }

    /// Fresh read-state probe. `None` means the message no longer exists.
    pub fn message_read(&self, message_id: i64) -> Result<Option<bool>> {
        self.with_conn(|conn| {
            let read = conn
                .query_row(
                    "SELECT read FROM messages WHERE id = ?1",
                    [message_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(read.map(|r| r != 0))
        })
    }

    /// Transition each still-unread message to read and decrement the pair's
    /// preview counter once per transition, floored at zero. Returns the
    /// number of messages actually transitioned; already-read ids are not
    /// recounted, so the whole operation is idempotent.
    pub fn mark_read(&self, message_ids: &[i64]) -> Result<usize> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut updated = 0usize;

            for &id in message_ids {
                let changed = tx.execute(
                    "UPDATE messages SET read = 1 WHERE id = ?1 AND read = 0",
                    [id],
                )?;
                if changed == 0 {
                    continue;
                }
                updated += 1;

                let pair: Option<(i64, i64)> = tx
                    .query_row(
                        "SELECT sender_id, receiver_id FROM messages WHERE id = ?1",
                        [id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                if let Some((sender_id, receiver_id)) = pair {
                    let (first, second) = pair_key(sender_id, receiver_id);
                    tx.execute(
                        "UPDATE chat_previews SET unread = MAX(unread - 1, 0)
                         WHERE sender_id = ?1 AND receiver_id = ?2",
                        params![first, second],
                    )?;
                }
            }

            tx.commit()?;
            Ok(updated)
        })
    }

    /// Mark every unread message of the pair read, in both orientations:
    /// opening the conversation clears it. Thin boundary over `mark_read`.
    pub fn mark_conversation_read(&self, reader_id: i64, peer_id: i64) -> Result<usize> {
        let ids = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM messages
                 WHERE read = 0
                   AND ((sender_id = ?1 AND receiver_id = ?2)
                     OR (sender_id = ?2 AND receiver_id = ?1))",
            )?;
            let ids = stmt
                .query_map(params![reader_id, peer_id], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })?;

        self.mark_read(&ids)
    }

    // -- Previews --

    /// Create-or-replace the pair's preview row, then bump its unread
    /// counter. The increment is a separate relative UPDATE so concurrent
    /// writers can never lose each other's increments.
    pub fn upsert_preview(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
        time: DateTime<Utc>,
    ) -> Result<()> {
        if sender_id == receiver_id {
            return Err(LedgerError::InvalidPair);
        }

        let (first, second) = pair_key(sender_id, receiver_id);
        let time = time.to_rfc3339();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_previews
                     (sender_id, receiver_id, latest_message, time, unread,
                      actual_sender_id, actual_receiver_id)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)
                 ON CONFLICT (sender_id, receiver_id) DO UPDATE SET
                     latest_message = excluded.latest_message,
                     time = excluded.time,
                     actual_sender_id = excluded.actual_sender_id,
                     actual_receiver_id = excluded.actual_receiver_id",
                params![first, second, content, time, sender_id, receiver_id],
            )?;

            conn.execute(
                "UPDATE chat_previews SET unread = unread + 1
                 WHERE sender_id = ?1 AND receiver_id = ?2",
                params![first, second],
            )?;

            Ok(())
        })
    }

    pub fn previews_for(&self, user_id: i64) -> Result<Vec<PreviewRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, receiver_id, latest_message, time, unread,
                        actual_sender_id, actual_receiver_id
                 FROM chat_previews
                 WHERE sender_id = ?1 OR receiver_id = ?1
                 ORDER BY time DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(PreviewRow {
                        sender_id: row.get(0)?,
                        receiver_id: row.get(1)?,
                        latest_message: row.get(2)?,
                        time: row.get(3)?,
                        unread: row.get(4)?,
                        actual_sender_id: row.get(5)?,
                        actual_receiver_id: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn preview_for_pair(&self, user_a: i64, user_b: i64) -> Result<Option<PreviewRow>> {
        let (first, second) = pair_key(user_a, user_b);
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT sender_id, receiver_id, latest_message, time, unread,
                            actual_sender_id, actual_receiver_id
                     FROM chat_previews
                     WHERE sender_id = ?1 AND receiver_id = ?2",
                    params![first, second],
                    |row| {
                        Ok(PreviewRow {
                            sender_id: row.get(0)?,
                            receiver_id: row.get(1)?,
                            latest_message: row.get(2)?,
                            time: row.get(3)?,
                            unread: row.get(4)?,
                            actual_sender_id: row.get(5)?,
                            actual_receiver_id: row.get(6)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Push targets --

    /// Register a delivery endpoint. Returns false when an identical target
    /// is already registered for the user (the clients re-post their
    /// subscription on every page load).
    pub fn add_push_target(
        &self,
        user_id: i64,
        token: Option<&str>,
        subscription: Option<&str>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT id FROM push_targets
                     WHERE user_id = ?1 AND token IS ?2 AND subscription IS ?3",
                    params![user_id, token, subscription],
                    |row| row.get(0),
                )
                .optional()?;

            if exists.is_some() {
                return Ok(false);
            }

            conn.execute(
                "INSERT INTO push_targets (user_id, token, subscription) VALUES (?1, ?2, ?3)",
                params![user_id, token, subscription],
            )?;
            Ok(true)
        })
    }

    pub fn push_targets_for(&self, user_id: i64) -> Result<Vec<PushTargetRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, token, subscription, created_at
                 FROM push_targets WHERE user_id = ?1 ORDER BY created_at, id",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(PushTargetRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        token: row.get(2)?,
                        subscription: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Remove a single target. A missing row is a no-op; concurrent notify
    /// calls may race on deleting the same expired endpoint.
    pub fn delete_push_target(&self, target_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM push_targets WHERE id = ?1", [target_id])?;
            Ok(changed > 0)
        })
    }

    pub fn delete_push_targets_for(&self, user_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM push_targets WHERE user_id = ?1", [user_id])?;
            Ok(changed)
        })
    }
}

fn query_messages_between(conn: &Connection, user_a: i64, user_b: i64) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id, content, created_at, read
         FROM messages
         WHERE (sender_id = ?1 AND receiver_id = ?2)
            OR (sender_id = ?2 AND receiver_id = ?1)
         ORDER BY created_at, id",
    )?;

    let rows = stmt
        .query_map(params![user_a, user_b], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                receiver_id: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
                read: row.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
