//! v001 -- Initial schema creation.
//!
//! Creates the `nodes` table backing the node directory.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Nodes
-- ----------------------------------------------------------------
-- row_id gives first-seen order. node_id may be NULL while a node is only
-- known by its MAC address.
CREATE TABLE IF NOT EXISTS nodes (
    row_id              INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id             TEXT UNIQUE,
    mac_address         TEXT UNIQUE,
    node_num            INTEGER,
    long_name           TEXT,
    short_name          TEXT,
    hw_model            TEXT,
    role                TEXT,
    snr                 REAL,
    last_heard          TEXT,                  -- RFC-3339
    battery_level       INTEGER,
    voltage             REAL,
    channel_utilization REAL,
    air_util_tx         REAL,
    latitude            REAL,
    longitude           REAL,
    altitude            INTEGER,
    is_local_radio      INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    first_seen          TEXT NOT NULL,
    last_seen           TEXT NOT NULL,

    CHECK (node_id IS NOT NULL OR mac_address IS NOT NULL)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
