use crate::models::{
    KeyBundleRow, NewQueuedMessage, NewUser, PaymentStatus, PendingPaymentRow, QueuedMessageRow,
};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, TransactionBehavior};

impl Database {
    // -- Users & prekeys --

    /// Upsert the user and append its one-time prekeys in one transaction.
    /// Any failure rolls back both, so no partial registration is visible.
    pub fn register_user(&self, user: &NewUser<'_>, one_time_prekeys: &[Vec<u8>]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            tx.execute(
                "INSERT INTO users (id, phone, display_name, identity_pub, signed_prekey, token)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    phone = excluded.phone,
                    display_name = excluded.display_name,
                    identity_pub = excluded.identity_pub,
                    signed_prekey = excluded.signed_prekey,
                    token = excluded.token",
                rusqlite::params![
                    user.id,
                    user.phone,
                    user.display_name,
                    user.identity_pub,
                    user.signed_prekey,
                    user.token_digest
                ],
            )?;

            {
                let mut stmt =
                    tx.prepare("INSERT INTO one_time_prekeys (user_id, prekey) VALUES (?1, ?2)")?;
                for prekey in one_time_prekeys {
                    stmt.execute(rusqlite::params![user.id, prekey])?;
                }
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Read the user's long-lived keys and consume the oldest remaining
    /// one-time prekey. Select and delete share one immediate transaction, so
    /// two fetchers can never be handed the same row.
    pub fn fetch_keys(&self, user_id: &str) -> Result<Option<KeyBundleRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let keys = tx
                .query_row(
                    "SELECT identity_pub, signed_prekey FROM users WHERE id = ?1",
                    [user_id],
                    |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)),
                )
                .optional()?;

            let Some((identity_pub, signed_prekey)) = keys else {
                return Ok(None);
            };

            let prekey = tx
                .query_row(
                    "SELECT id, prekey FROM one_time_prekeys WHERE user_id = ?1 ORDER BY id LIMIT 1",
                    [user_id],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
                )
                .optional()?;

            let one_time_prekey = match prekey {
                Some((id, prekey)) => {
                    tx.execute("DELETE FROM one_time_prekeys WHERE id = ?1", [id])?;
                    Some(prekey)
                }
                None => None,
            };

            tx.commit()?;

            Ok(Some(KeyBundleRow {
                identity_pub,
                signed_prekey,
                one_time_prekey,
            }))
        })
    }

    pub fn user_id_for_token(&self, token_digest: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT id FROM users WHERE token = ?1", [token_digest], |row| row.get(0))
                .optional()
        })
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn user_exists(&self, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [user_id], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn prekey_count(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM one_time_prekeys WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    // -- Durable queue --

    /// Persist an undeliverable message. Returns its queue id.
    pub fn enqueue_message(&self, msg: &NewQueuedMessage<'_>) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO queued_messages (recipient, sender, payload, type, message_id, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    msg.recipient,
                    msg.sender,
                    msg.payload,
                    msg.kind,
                    msg.message_id,
                    msg.timestamp
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Page through a recipient's backlog in insertion order, starting after
    /// `after_id`.
    pub fn queued_messages_after(
        &self,
        recipient: &str,
        after_id: i64,
        limit: u32,
    ) -> Result<Vec<QueuedMessageRow>> {
        self.with_conn(|conn| query_queued(conn, recipient, after_id, limit))
    }

    /// Delete every queued row for `recipient` up to and including
    /// `watermark`. Rows queued later are left alone.
    pub fn delete_queued_through(&self, recipient: &str, watermark: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let deleted = tx.execute(
                "DELETE FROM queued_messages WHERE recipient = ?1 AND id <= ?2",
                rusqlite::params![recipient, watermark],
            )?;
            tx.commit()?;
            Ok(deleted)
        })
    }

    pub fn queued_message_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM queued_messages", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn queued_count_for(&self, recipient: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queued_messages WHERE recipient = ?1",
                [recipient],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    // -- Payments --

    /// Record a push request as pending. Returns false when the reference is
    /// already known, whatever its status.
    pub fn insert_pending_payment(&self, reference: &str, sender: &str, request: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO pending_payments (reference, sender, request) VALUES (?1, ?2, ?3)",
                rusqlite::params![reference, sender, request],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn set_payment_status(&self, reference: &str, status: PaymentStatus) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE pending_payments SET status = ?1 WHERE reference = ?2",
                rusqlite::params![status.as_str(), reference],
            )?;
            Ok(())
        })
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn payment_status(&self, reference: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT status FROM pending_payments WHERE reference = ?1",
                [reference],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn pending_payments(&self) -> Result<Vec<PendingPaymentRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT reference, sender, request, status, created_at
                 FROM pending_payments
                 WHERE status = 'pending'
                 ORDER BY created_at, rowid",
            )?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(PendingPaymentRow {
                        reference: row.get(0)?,
                        sender: row.get(1)?,
                        request: row.get(2)?,
                        status: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn pending_payment_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pending_payments WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }
}

fn query_queued(
    conn: &Connection,
    recipient: &str,
    after_id: i64,
    limit: u32,
) -> Result<Vec<QueuedMessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, recipient, sender, payload, type, message_id, timestamp
         FROM queued_messages
         WHERE recipient = ?1 AND id > ?2
         ORDER BY id
         LIMIT ?3",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![recipient, after_id, limit], |row| {
            Ok(QueuedMessageRow {
                id: row.get(0)?,
                recipient: row.get(1)?,
                sender: row.get(2)?,
                payload: row.get(3)?,
                kind: row.get(4)?,
                message_id: row.get(5)?,
                timestamp: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
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
