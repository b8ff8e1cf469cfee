use rusqlite::Connection;

// Append-only conversation logs. `seq` is the conversation order within a
// (namespace, log_key) pair.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS conversation_entries (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    id               TEXT NOT NULL UNIQUE,        -- UUID v4
    namespace        TEXT NOT NULL CHECK (namespace IN ('dm', 'channel')),
    log_key          TEXT NOT NULL,               -- sender node id or channel id
    channel_id       TEXT,
    sender_node_id   TEXT NOT NULL,
    receiver_node_id TEXT NOT NULL,
    text             TEXT NOT NULL,
    received_at      TEXT NOT NULL,               -- RFC-3339
    packet_id        INTEGER
);

CREATE INDEX IF NOT EXISTS idx_conversation_entries_log
    ON conversation_entries(namespace, log_key, seq);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
