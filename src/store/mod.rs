//! The local index: a SQLite cache of [`EventRecord`] rows plus the raw
//! ICS blobs they reference, and the [`OfflineQueueItem`] queue. `Store`
//! is an owned object whose constructor accepts its configuration
//! rather than reaching for ambient global state.

pub mod blobs;
pub mod event_record;
pub mod offline_queue;
pub mod queries;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub use event_record::{EventRecord, PendingSync};
pub use offline_queue::{OfflineQueueItem, QueueOperation};

/// Owns the SQLite connection (WAL mode) and the ICS blob directory.
/// Per-test isolation is a constructor argument, not a global singleton
/// handle and directory path.
pub struct Store {
    conn: Mutex<Connection>,
    blob_dir: PathBuf,
}

impl Store {
    pub fn open(db_path: &Path, blob_dir: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating index directory {}", parent.display()))?;
        }
        std::fs::create_dir_all(blob_dir)
            .with_context(|| format!("creating ICS blob directory {}", blob_dir.display()))?;
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening index database {}", db_path.display()))?;
        schema::open_and_migrate(&conn).context("migrating index schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
            blob_dir: blob_dir.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory(blob_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(blob_dir)?;
        let conn = Connection::open_in_memory()?;
        schema::open_and_migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            blob_dir: blob_dir.to_path_buf(),
        })
    }

    pub fn blob_path(&self, uid: &str, recurrence_id: Option<&str>) -> PathBuf {
        blobs::blob_path(&self.blob_dir, uid, recurrence_id)
    }

    pub fn write_blob(&self, uid: &str, contents: &str) -> Result<PathBuf> {
        let path = self.blob_path(uid, None);
        blobs::write_blob(&path, contents)?;
        Ok(path)
    }

    pub fn read_blob(&self, path: &Path) -> Result<String> {
        blobs::read_blob(path)
    }

    pub fn range_non_recurring(
        &self,
        collection_ids: &[String],
        start_iso: &str,
        end_iso: &str,
    ) -> Result<Vec<EventRecord>> {
        let conn = self.conn.lock().unwrap();
        Ok(queries::range_non_recurring(&conn, collection_ids, start_iso, end_iso)?)
    }

    pub fn recurring_masters(&self, collection_ids: &[String]) -> Result<Vec<EventRecord>> {
        let conn = self.conn.lock().unwrap();
        Ok(queries::recurring_masters(&conn, collection_ids)?)
    }

    pub fn overrides(&self, collection_ids: &[String]) -> Result<Vec<EventRecord>> {
        let conn = self.conn.lock().unwrap();
        Ok(queries::overrides(&conn, collection_ids)?)
    }

    pub fn etag_map(&self, collection_id: &str) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        Ok(queries::etag_map(&conn, collection_id)?)
    }

    pub fn upsert(&self, record: EventRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Ok(queries::upsert(&conn, record)?)
    }

    /// Every row sharing `uid`: the master (if indexed) followed by
    /// its overrides. Used by the sync orchestrator to rebuild a
    /// scoped update.
    pub fn by_uid(&self, uid: &str) -> Result<Vec<EventRecord>> {
        let conn = self.conn.lock().unwrap();
        Ok(queries::by_uid(&conn, uid)?)
    }

    /// The master row for `uid`, if one is indexed.
    pub fn get_master(&self, uid: &str) -> Result<Option<EventRecord>> {
        let conn = self.conn.lock().unwrap();
        Ok(queries::master_by_uid(&conn, uid)?)
    }

    /// Every distinct href currently indexed under a collection,
    /// compared against the server's listing during catch-up.
    pub fn hrefs_for_collection(&self, collection_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        Ok(queries::hrefs_for_collection(&conn, collection_id)?)
    }

    /// Drop every override row for `uid` without touching the master,
    /// used after a scope="all" replace of the whole resource.
    pub fn delete_overrides_for_uid(&self, uid: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Ok(queries::delete_overrides_for_uid(&conn, uid)?)
    }

    /// Delete every row at `href` whose uid is not in `valid_uids`,
    /// removing the associated blobs too.
    pub fn cleanup_stale_href_rows(&self, href: &str, valid_uids: &[String]) -> Result<()> {
        let stale = {
            let conn = self.conn.lock().unwrap();
            queries::cleanup_stale_href_rows(&conn, href, valid_uids)?
        };
        for row in stale {
            let path = self.blob_path(&row.uid, None);
            blobs::remove_blob(&path)?;
        }
        Ok(())
    }

    pub fn delete_by_href(&self, href: &str) -> Result<()> {
        let rows = {
            let conn = self.conn.lock().unwrap();
            queries::delete_by_href(&conn, href)?
        };
        for row in rows {
            blobs::remove_blob(&self.blob_path(&row.uid, None))?;
        }
        Ok(())
    }

    pub fn delete_by_uid(&self, uid: &str) -> Result<()> {
        let rows = {
            let conn = self.conn.lock().unwrap();
            queries::delete_by_uid(&conn, uid)?
        };
        for row in rows {
            blobs::remove_blob(&self.blob_path(&row.uid, None))?;
        }
        Ok(())
    }

    pub fn delete_override(&self, uid: &str, recurrence_id: &str) -> Result<()> {
        let row = {
            let conn = self.conn.lock().unwrap();
            queries::delete_override(&conn, uid, recurrence_id)?
        };
        if row.is_some() {
            // Master and overrides share one blob; only remove it if no
            // sibling rows remain under this uid.
            let remaining = {
                let conn = self.conn.lock().unwrap();
                conn.query_row(
                    "SELECT COUNT(*) FROM events WHERE uid = ?1",
                    [uid],
                    |r| r.get::<_, i64>(0),
                )?
            };
            if remaining == 0 {
                blobs::remove_blob(&self.blob_path(uid, None))?;
            }
        }
        Ok(())
    }

    pub fn delete_events_from_date(&self, uid: &str, utc_iso: &str) -> Result<()> {
        let rows = {
            let conn = self.conn.lock().unwrap();
            queries::delete_events_from_date(&conn, uid, utc_iso)?
        };
        let remaining = {
            let conn = self.conn.lock().unwrap();
            conn.query_row("SELECT COUNT(*) FROM events WHERE uid = ?1", [uid], |r| {
                r.get::<_, i64>(0)
            })?
        };
        if !rows.is_empty() && remaining == 0 {
            blobs::remove_blob(&self.blob_path(uid, None))?;
        }
        Ok(())
    }

    pub fn search(&self, query: &str) -> Result<Vec<EventRecord>> {
        let conn = self.conn.lock().unwrap();
        Ok(queries::search(&conn, query)?)
    }

    pub fn enqueue_offline(
        &self,
        operation: QueueOperation,
        uid: &str,
        collection_id: &str,
        account_id: &str,
        href: Option<&str>,
        etag: Option<&str>,
        queued_at: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Ok(offline_queue::enqueue(
            &conn,
            operation,
            uid,
            collection_id,
            account_id,
            href,
            etag,
            queued_at,
        )?)
    }

    pub fn offline_queue_fifo(&self) -> Result<Vec<OfflineQueueItem>> {
        let conn = self.conn.lock().unwrap();
        Ok(offline_queue::list_fifo(&conn)?)
    }

    pub fn offline_queue_remove(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Ok(offline_queue::remove(&conn, id)?)
    }

    /// Mark every row for `uid` with `pending`, or clear the flag when
    /// `pending` is `None` (successful sync replay).
    pub fn set_pending_sync(&self, uid: &str, pending: Option<PendingSync>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE events SET pending_sync = ?1 WHERE uid = ?2",
            rusqlite::params![pending.map(|p| p.as_str()), uid],
        )?;
        Ok(())
    }

    /// Update the href for every row sharing `old_href`, used after a
    /// UIDCONFLICT retarget succeeds.
    pub fn retarget_href(&self, old_href: &str, new_href: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE events SET href = ?1 WHERE href = ?2",
            rusqlite::params![new_href, old_href],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory(&dir.path().join("ics")).unwrap();
        (store, dir)
    }

    fn record(uid: &str, href: &str) -> EventRecord {
        EventRecord {
            uid: uid.into(),
            recurrence_id: None,
            account_id: "acc1".into(),
            collection_id: "cal1".into(),
            href: href.into(),
            etag: Some("e1".into()),
            ics_path: String::new(),
            summary: Some("Dentist".into()),
            description: None,
            location: None,
            organizer: None,
            attendees_text: None,
            status: None,
            geo_lat: None,
            geo_lon: None,
            dtstart: "2026-01-15T14:00:00+00:00".into(),
            dtend: Some("2026-01-15T15:00:00+00:00".into()),
            dtstart_utc: "2026-01-15T14:00:00+00:00".into(),
            dtend_utc: Some("2026-01-15T15:00:00+00:00".into()),
            dtstart_is_date: false,
            rrule: None,
            exdates: vec![],
            pending_sync: None,
        }
    }

    #[test]
    fn delete_by_href_removes_blob() {
        let (store, _dir) = store();
        let path = store.write_blob("u1", "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n").unwrap();
        store.upsert(record("u1", "/cal/u1.ics")).unwrap();
        assert!(path.exists());
        store.delete_by_href("/cal/u1.ics").unwrap();
        assert!(!path.exists());
        assert!(store.range_non_recurring(&["cal1".into()], "2026-01-01T00:00:00+00:00", "2026-02-01T00:00:00+00:00").unwrap().is_empty());
    }

    #[test]
    fn basic_create_read_scenario() {
        let (store, _dir) = store();
        store.upsert(record("u1", "/cal/u1.ics")).unwrap();
        let hits = store
            .range_non_recurring(&["cal1".into()], "2026-01-15T00:00:00+00:00", "2026-01-16T00:00:00+00:00")
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].summary.as_deref(), Some("Dentist"));
    }
}
