use rusqlite::Connection;

use crate::error::Result;

/// Initialise the alarm schema in `conn`.
///
/// One row per armed trigger: re-arming replaces the row, so a trigger is
/// never armed twice. `fire_at` is RFC 3339 UTC with a `Z` suffix, which
/// sorts lexically in time order.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS alarms (
            trigger_id  INTEGER NOT NULL PRIMARY KEY,
            timer_id    INTEGER NOT NULL,
            action      TEXT    NOT NULL,   -- 'start' | 'end'
            fire_at     TEXT    NOT NULL,   -- RFC 3339 UTC
            armed_at    TEXT    NOT NULL
        ) STRICT;

        -- Efficient polling: SELECT … WHERE fire_at <= ?
        CREATE INDEX IF NOT EXISTS idx_alarms_fire_at ON alarms (fire_at);
        ",
    )?;
    Ok(())
}
