//! [`OfflineQueueItem`] persistence and the enqueue dedup contract.

use rusqlite::{Connection, OptionalExtension, Row, params};

/// The write the offline queue still owes the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOperation {
    Create,
    Update,
    Delete,
}

impl QueueOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueOperation::Create => "create",
            QueueOperation::Update => "update",
            QueueOperation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(QueueOperation::Create),
            "update" => Some(QueueOperation::Update),
            "delete" => Some(QueueOperation::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OfflineQueueItem {
    pub id: i64,
    pub operation: QueueOperation,
    pub uid: String,
    pub collection_id: String,
    pub account_id: String,
    pub href: Option<String>,
    pub etag: Option<String>,
    pub queued_at: String,
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<OfflineQueueItem> {
    let op: String = row.get("operation")?;
    Ok(OfflineQueueItem {
        id: row.get("id")?,
        operation: QueueOperation::parse(&op).unwrap_or(QueueOperation::Update),
        uid: row.get("uid")?,
        collection_id: row.get("collection_id")?,
        account_id: row.get("account_id")?,
        href: row.get("href")?,
        etag: row.get("etag")?,
        queued_at: row.get("queued_at")?,
    })
}

/// Enqueue a pending write, applying the dedup contract:
/// an `update` absorbs into any prior `create`/`update` for the same
/// uid (the on-disk ICS already holds the latest state); a `delete`
/// replaces any prior entry for the uid outright.
pub fn enqueue(
    conn: &Connection,
    operation: QueueOperation,
    uid: &str,
    collection_id: &str,
    account_id: &str,
    href: Option<&str>,
    etag: Option<&str>,
    queued_at: &str,
) -> rusqlite::Result<()> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM offline_queue WHERE uid = ?1 LIMIT 1",
            params![uid],
            |r| r.get(0),
        )
        .optional()?;

    match (operation, existing) {
        (QueueOperation::Update, Some(_)) => {
            // A prior create/update already covers this uid; the blob on
            // disk is the latest state, nothing further to enqueue.
            Ok(())
        }
        (QueueOperation::Delete, Some(id)) => conn
            .execute(
                "UPDATE offline_queue SET operation = ?1, href = ?2, etag = ?3, queued_at = ?4 WHERE id = ?5",
                params![operation.as_str(), href, etag, queued_at, id],
            )
            .map(|_| ()),
        _ => conn
            .execute(
                "INSERT INTO offline_queue (operation, uid, collection_id, account_id, href, etag, queued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![operation.as_str(), uid, collection_id, account_id, href, etag, queued_at],
            )
            .map(|_| ()),
    }
}

/// All queued items in FIFO order (ascending `id`).
pub fn list_fifo(conn: &Connection) -> rusqlite::Result<Vec<OfflineQueueItem>> {
    let mut stmt = conn.prepare("SELECT * FROM offline_queue ORDER BY id ASC")?;
    let rows = stmt.query_map([], from_row)?;
    rows.collect()
}

pub fn remove(conn: &Connection, id: i64) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM offline_queue WHERE id = ?1", params![id])
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::open_and_migrate;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        open_and_migrate(&c).unwrap();
        c
    }

    #[test]
    fn update_after_create_is_absorbed() {
        let c = conn();
        enqueue(&c, QueueOperation::Create, "u1", "cal1", "acc1", None, None, "t0").unwrap();
        enqueue(&c, QueueOperation::Update, "u1", "cal1", "acc1", None, None, "t1").unwrap();
        assert_eq!(list_fifo(&c).unwrap().len(), 1);
        assert_eq!(list_fifo(&c).unwrap()[0].queued_at, "t0");
    }

    #[test]
    fn delete_replaces_prior_entry() {
        let c = conn();
        enqueue(&c, QueueOperation::Update, "u1", "cal1", "acc1", None, None, "t0").unwrap();
        enqueue(&c, QueueOperation::Delete, "u1", "cal1", "acc1", None, None, "t1").unwrap();
        let items = list_fifo(&c).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].operation, QueueOperation::Delete);
        assert_eq!(items[0].queued_at, "t1");
    }

    #[test]
    fn fifo_order_preserved_for_distinct_uids() {
        let c = conn();
        enqueue(&c, QueueOperation::Create, "u1", "cal1", "acc1", None, None, "t0").unwrap();
        enqueue(&c, QueueOperation::Create, "u2", "cal1", "acc1", None, None, "t1").unwrap();
        let items = list_fifo(&c).unwrap();
        assert_eq!(items.iter().map(|i| i.uid.as_str()).collect::<Vec<_>>(), vec!["u1", "u2"]);
    }
}
