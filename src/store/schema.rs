//! DDL for the local index.

use rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    uid                 TEXT NOT NULL,
    recurrence_id       TEXT,
    account_id          TEXT NOT NULL,
    collection_id       TEXT NOT NULL,
    href                TEXT NOT NULL,
    etag                TEXT,
    ics_path            TEXT NOT NULL,
    summary             TEXT,
    description         TEXT,
    location            TEXT,
    organizer           TEXT,
    attendees_text      TEXT,
    status              TEXT,
    geo_lat             REAL,
    geo_lon             REAL,
    dtstart             TEXT NOT NULL,
    dtend               TEXT,
    dtstart_utc         TEXT NOT NULL,
    dtend_utc           TEXT,
    dtstart_is_date     INTEGER NOT NULL DEFAULT 0,
    rrule               TEXT,
    exdates             TEXT,
    pending_sync        TEXT,
    PRIMARY KEY (uid, recurrence_id)
);

CREATE INDEX IF NOT EXISTS idx_events_collection ON events(collection_id);
CREATE INDEX IF NOT EXISTS idx_events_dtstart_utc ON events(dtstart_utc);
CREATE INDEX IF NOT EXISTS idx_events_uid ON events(uid);

CREATE TABLE IF NOT EXISTS offline_queue (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    operation      TEXT NOT NULL,
    uid            TEXT NOT NULL,
    collection_id  TEXT NOT NULL,
    account_id     TEXT NOT NULL,
    href           TEXT,
    etag           TEXT,
    queued_at      TEXT NOT NULL
);
"#;

/// Open (or create) the index database at `path`, enable WAL mode, and
/// apply the schema.
pub fn open_and_migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
