use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, prekeys, queued messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                phone           TEXT NOT NULL DEFAULT '',
                display_name    TEXT NOT NULL DEFAULT '',
                identity_pub    BLOB NOT NULL,
                signed_prekey   BLOB NOT NULL,
                token           TEXT NOT NULL UNIQUE
            );

            CREATE TABLE one_time_prekeys (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     TEXT NOT NULL REFERENCES users(id),
                prekey      BLOB NOT NULL
            );

            CREATE INDEX idx_prekeys_user ON one_time_prekeys(user_id, id);

            CREATE TABLE queued_messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient   TEXT NOT NULL,
                sender      TEXT NOT NULL,
                payload     BLOB NOT NULL,
                type        TEXT NOT NULL,
                message_id  TEXT NOT NULL,
                timestamp   INTEGER NOT NULL
            );

            CREATE INDEX idx_queued_recipient ON queued_messages(recipient, id);

            INSERT INTO schema_version (version) VALUES (1);
            "
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (pending payments)");
        conn.execute_batch(
            "
            CREATE TABLE pending_payments (
                reference   TEXT PRIMARY KEY,
                sender      TEXT NOT NULL,
                request     TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'pending',
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_payments_status ON pending_payments(status);

            INSERT INTO schema_version (version) VALUES (2);
            "
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
