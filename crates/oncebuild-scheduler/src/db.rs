use rusqlite::Connection;

use crate::error::Result;

/// Initialise the snapshot schema in `conn`.
///
/// Creates the `scheduled_builds` table (idempotent). The table always holds
/// the complete registry; it is rewritten wholesale on every save.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduled_builds (
            id                 TEXT    NOT NULL PRIMARY KEY,
            target             TEXT    NOT NULL,
            fire_at            TEXT    NOT NULL,   -- RFC 3339 with offset
            fire_at_utc_ms     INTEGER NOT NULL,   -- sort key
            parameters         TEXT    NOT NULL,   -- JSON array of {name, value}
            trigger_on_missed  INTEGER NOT NULL DEFAULT 0,
            cause              TEXT    NOT NULL    -- JSON object
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_scheduled_builds_fire_at
            ON scheduled_builds (fire_at_utc_ms, id);
        ",
    )?;
    Ok(())
}
