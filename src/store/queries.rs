//! Range queries, key lookups, and the upsert/cleanup family over the
//! `events` table.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use std::collections::HashMap;

use super::event_record::EventRecord;

fn placeholders(n: usize) -> String {
    std::iter::repeat_n("?", n).collect::<Vec<_>>().join(",")
}

/// Rows with `rrule IS NULL`, `recurrence_id IS NULL`,
/// `pending_sync != 'delete'`, overlapping `[start_iso, end_iso)`.
pub fn range_non_recurring(
    conn: &Connection,
    collection_ids: &[String],
    start_iso: &str,
    end_iso: &str,
) -> rusqlite::Result<Vec<EventRecord>> {
    if collection_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT * FROM events
         WHERE collection_id IN ({})
           AND rrule IS NULL AND recurrence_id IS NULL
           AND (pending_sync IS NULL OR pending_sync != 'delete')
           AND dtstart_utc < ?{}
           AND (dtend_utc > ?{} OR (dtend_utc IS NULL AND dtstart_utc >= ?{}))",
        placeholders(collection_ids.len()),
        collection_ids.len() + 1,
        collection_ids.len() + 2,
        collection_ids.len() + 3,
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut params: Vec<&dyn rusqlite::ToSql> =
        collection_ids.iter().map(|c| c as &dyn rusqlite::ToSql).collect();
    params.push(&end_iso);
    params.push(&start_iso);
    params.push(&start_iso);
    let rows = stmt.query_map(params_from_iter(params), EventRecord::from_row)?;
    rows.collect()
}

/// Rows with `rrule IS NOT NULL`, `recurrence_id IS NULL` — no date
/// filter, expansion decides in-window.
pub fn recurring_masters(
    conn: &Connection,
    collection_ids: &[String],
) -> rusqlite::Result<Vec<EventRecord>> {
    if collection_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT * FROM events
         WHERE collection_id IN ({})
           AND rrule IS NOT NULL AND recurrence_id IS NULL
           AND (pending_sync IS NULL OR pending_sync != 'delete')",
        placeholders(collection_ids.len()),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(collection_ids), EventRecord::from_row)?;
    rows.collect()
}

/// Rows with `recurrence_id IS NOT NULL`.
pub fn overrides(conn: &Connection, collection_ids: &[String]) -> rusqlite::Result<Vec<EventRecord>> {
    if collection_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT * FROM events
         WHERE collection_id IN ({})
           AND recurrence_id IS NOT NULL
           AND (pending_sync IS NULL OR pending_sync != 'delete')",
        placeholders(collection_ids.len()),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(collection_ids), EventRecord::from_row)?;
    rows.collect()
}

/// `{href -> etag}` for rows whose etag is known and which were not
/// created purely locally (locally created rows must not pretend to
/// have server ETags).
pub fn etag_map(conn: &Connection, collection_id: &str) -> rusqlite::Result<HashMap<String, String>> {
    let mut stmt = conn.prepare(
        "SELECT href, etag FROM events
         WHERE collection_id = ?1 AND etag IS NOT NULL
           AND (pending_sync IS NULL OR pending_sync != 'create')",
    )?;
    let rows = stmt.query_map([collection_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })?;
    let mut map = HashMap::new();
    for row in rows {
        let (href, etag) = row?;
        map.insert(href, etag);
    }
    Ok(map)
}

/// Insert or replace one row, normalizing all-day dtend: if
/// `dtstart_is_date` and the computed `dtend_utc <= dtstart_utc`, bump
/// `dtend_utc` to the next UTC day.
pub fn upsert(conn: &Connection, mut record: EventRecord) -> rusqlite::Result<()> {
    if record.dtstart_is_date {
        let needs_bump = match &record.dtend_utc {
            None => true,
            Some(end) => end.as_str() <= record.dtstart_utc.as_str(),
        };
        if needs_bump {
            if let Ok(start) = record.dtstart_utc.parse::<DateTime<Utc>>() {
                record.dtend_utc = Some((start + Duration::days(1)).to_rfc3339());
            }
        }
    }

    if record.recurrence_id.is_none() {
        // Composite key uniqueness does not fire when recurrence_id is
        // NULL (SQL treats NULL as distinct); explicitly clear any
        // stale master row for this uid at a different href first.
        conn.execute(
            "DELETE FROM events WHERE uid = ?1 AND recurrence_id IS NULL AND href != ?2",
            rusqlite::params![record.uid, record.href],
        )?;
    }

    conn.execute(
        "INSERT INTO events (
            uid, recurrence_id, account_id, collection_id, href, etag, ics_path,
            summary, description, location, organizer, attendees_text, status,
            geo_lat, geo_lon, dtstart, dtend, dtstart_utc, dtend_utc,
            dtstart_is_date, rrule, exdates, pending_sync
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
            ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
        )
        ON CONFLICT (uid, recurrence_id) DO UPDATE SET
            account_id = excluded.account_id,
            collection_id = excluded.collection_id,
            href = excluded.href,
            etag = excluded.etag,
            ics_path = excluded.ics_path,
            summary = excluded.summary,
            description = excluded.description,
            location = excluded.location,
            organizer = excluded.organizer,
            attendees_text = excluded.attendees_text,
            status = excluded.status,
            geo_lat = excluded.geo_lat,
            geo_lon = excluded.geo_lon,
            dtstart = excluded.dtstart,
            dtend = excluded.dtend,
            dtstart_utc = excluded.dtstart_utc,
            dtend_utc = excluded.dtend_utc,
            dtstart_is_date = excluded.dtstart_is_date,
            rrule = excluded.rrule,
            exdates = excluded.exdates,
            pending_sync = excluded.pending_sync",
        rusqlite::params![
            record.uid,
            record.recurrence_id,
            record.account_id,
            record.collection_id,
            record.href,
            record.etag,
            record.ics_path,
            record.summary,
            record.description,
            record.location,
            record.organizer,
            record.attendees_text,
            record.status,
            record.geo_lat,
            record.geo_lon,
            record.dtstart,
            record.dtend,
            record.dtstart_utc,
            record.dtend_utc,
            record.dtstart_is_date as i64,
            record.rrule,
            record.exdates_join(),
            record.pending_sync.map(|p| p.as_str()),
        ],
    )?;
    Ok(())
}

/// Delete any row at `href` whose uid is not in `valid_uids`, removing
/// its ICS blob too (caller does the blob removal; this returns the
/// deleted rows so the caller knows which blobs to clean up).
pub fn cleanup_stale_href_rows(
    conn: &Connection,
    href: &str,
    valid_uids: &[String],
) -> rusqlite::Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM events WHERE href = ?1")?;
    let all: Vec<EventRecord> = stmt
        .query_map([href], EventRecord::from_row)?
        .collect::<rusqlite::Result<_>>()?;
    let stale: Vec<EventRecord> = all
        .into_iter()
        .filter(|r| !valid_uids.contains(&r.uid))
        .collect();
    for row in &stale {
        conn.execute(
            "DELETE FROM events WHERE uid = ?1 AND recurrence_id IS ?2",
            rusqlite::params![row.uid, row.recurrence_id],
        )?;
    }
    Ok(stale)
}

pub fn delete_by_href(conn: &Connection, href: &str) -> rusqlite::Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM events WHERE href = ?1")?;
    let rows: Vec<EventRecord> = stmt
        .query_map([href], EventRecord::from_row)?
        .collect::<rusqlite::Result<_>>()?;
    conn.execute("DELETE FROM events WHERE href = ?1", [href])?;
    Ok(rows)
}

pub fn delete_by_uid(conn: &Connection, uid: &str) -> rusqlite::Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM events WHERE uid = ?1")?;
    let rows: Vec<EventRecord> = stmt
        .query_map([uid], EventRecord::from_row)?
        .collect::<rusqlite::Result<_>>()?;
    conn.execute("DELETE FROM events WHERE uid = ?1", [uid])?;
    Ok(rows)
}

pub fn delete_override(
    conn: &Connection,
    uid: &str,
    recurrence_id: &str,
) -> rusqlite::Result<Option<EventRecord>> {
    let row = conn
        .query_row(
            "SELECT * FROM events WHERE uid = ?1 AND recurrence_id = ?2",
            rusqlite::params![uid, recurrence_id],
            EventRecord::from_row,
        )
        .ok();
    conn.execute(
        "DELETE FROM events WHERE uid = ?1 AND recurrence_id = ?2",
        rusqlite::params![uid, recurrence_id],
    )?;
    Ok(row)
}

/// Delete every row for `uid` (master and overrides) whose
/// `dtstart_utc >= utc_iso` — used by scope="thisAndFollowing".
pub fn delete_events_from_date(
    conn: &Connection,
    uid: &str,
    utc_iso: &str,
) -> rusqlite::Result<Vec<EventRecord>> {
    let mut stmt =
        conn.prepare("SELECT * FROM events WHERE uid = ?1 AND dtstart_utc >= ?2")?;
    let rows: Vec<EventRecord> = stmt
        .query_map(rusqlite::params![uid, utc_iso], EventRecord::from_row)?
        .collect::<rusqlite::Result<_>>()?;
    conn.execute(
        "DELETE FROM events WHERE uid = ?1 AND dtstart_utc >= ?2",
        rusqlite::params![uid, utc_iso],
    )?;
    Ok(rows)
}

/// Every row sharing `uid` (master, if present, followed by any
/// overrides), used by the sync orchestrator to load the state it
/// needs to build a scoped update.
pub fn by_uid(conn: &Connection, uid: &str) -> rusqlite::Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM events WHERE uid = ?1")?;
    stmt.query_map([uid], EventRecord::from_row)?.collect()
}

/// The master row for `uid` (`recurrence_id IS NULL`), if indexed.
pub fn master_by_uid(conn: &Connection, uid: &str) -> rusqlite::Result<Option<EventRecord>> {
    conn.query_row(
        "SELECT * FROM events WHERE uid = ?1 AND recurrence_id IS NULL",
        [uid],
        EventRecord::from_row,
    )
    .optional()
}

/// Every distinct `href` currently indexed for a collection, used by
/// the catch-up phase to find local hrefs the server no longer has
/// during catch-up.
pub fn hrefs_for_collection(conn: &Connection, collection_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT href FROM events WHERE collection_id = ?1")?;
    stmt.query_map([collection_id], |r| r.get(0))?.collect()
}

/// Delete every override row for `uid`, without touching the master.
/// Used after a scope="all" update, whose fresh VCALENDAR body
/// replaces the whole resource and so drops any prior overrides.
pub fn delete_overrides_for_uid(conn: &Connection, uid: &str) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM events WHERE uid = ?1 AND recurrence_id IS NOT NULL",
        [uid],
    )?;
    Ok(())
}

/// Case-insensitive substring search over summary/description/
/// location/organizer/attendees_text, at most 20 rows, newest first.
pub fn search(conn: &Connection, query: &str) -> rusqlite::Result<Vec<EventRecord>> {
    let pattern = format!("%{}%", query.to_lowercase());
    let mut stmt = conn.prepare(
        "SELECT * FROM events
         WHERE lower(coalesce(summary, '')) LIKE ?1
            OR lower(coalesce(description, '')) LIKE ?1
            OR lower(coalesce(location, '')) LIKE ?1
            OR lower(coalesce(organizer, '')) LIKE ?1
            OR lower(coalesce(attendees_text, '')) LIKE ?1
         ORDER BY dtstart_utc DESC
         LIMIT 20",
    )?;
    let rows = stmt.query_map([pattern], EventRecord::from_row)?;
    rows.collect()
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

    fn sample(uid: &str, href: &str, start: &str, end: Option<&str>) -> EventRecord {
        EventRecord {
            uid: uid.into(),
            recurrence_id: None,
            account_id: "acc1".into(),
            collection_id: "cal1".into(),
            href: href.into(),
            etag: Some("e1".into()),
            ics_path: format!("/tmp/{uid}.ics"),
            summary: Some("Dentist".into()),
            description: None,
            location: None,
            organizer: None,
            attendees_text: None,
            status: None,
            geo_lat: None,
            geo_lon: None,
            dtstart: start.into(),
            dtend: end.map(|s| s.to_string()),
            dtstart_utc: start.into(),
            dtend_utc: end.map(|s| s.to_string()),
            dtstart_is_date: false,
            rrule: None,
            exdates: vec![],
            pending_sync: None,
        }
    }

    #[test]
    fn range_overlap_matches_spec_example() {
        let c = conn();
        upsert(
            &c,
            sample(
                "u1",
                "/cal/u1.ics",
                "2024-03-15T09:00:00+00:00",
                Some("2024-03-15T10:00:00+00:00"),
            ),
        )
        .unwrap();

        let hits = range_non_recurring(
            &c,
            &["cal1".into()],
            "2024-03-15T09:30:00+00:00",
            "2024-03-15T11:00:00+00:00",
        )
        .unwrap();
        assert_eq!(hits.len(), 1);

        let misses = range_non_recurring(
            &c,
            &["cal1".into()],
            "2024-03-15T10:00:00+00:00",
            "2024-03-15T12:00:00+00:00",
        )
        .unwrap();
        assert!(misses.is_empty());
    }

    #[test]
    fn all_day_normalization_bumps_dtend() {
        let c = conn();
        let mut rec = sample("u2", "/cal/u2.ics", "2024-03-15T00:00:00+00:00", Some("2024-03-15T00:00:00+00:00"));
        rec.dtstart_is_date = true;
        upsert(&c, rec).unwrap();

        let hits = range_non_recurring(
            &c,
            &["cal1".into()],
            "2024-03-15T00:00:00+00:00",
            "2024-03-16T00:00:00+00:00",
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].dtend_utc.as_deref(), Some("2024-03-16T00:00:00+00:00"));
    }

    #[test]
    fn upsert_master_clears_stale_href_for_same_uid() {
        let c = conn();
        upsert(&c, sample("u1", "/cal/old.ics", "2024-01-01T00:00:00+00:00", None)).unwrap();
        upsert(&c, sample("u1", "/cal/new.ics", "2024-01-01T00:00:00+00:00", None)).unwrap();

        let mut stmt = c.prepare("SELECT href FROM events WHERE uid = 'u1'").unwrap();
        let hrefs: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(hrefs, vec!["/cal/new.ics".to_string()]);
    }

    #[test]
    fn etag_map_excludes_local_creates() {
        let c = conn();
        upsert(&c, sample("u1", "/cal/u1.ics", "2024-01-01T00:00:00+00:00", None)).unwrap();
        let mut pending = sample("u2", "/cal/u2.ics", "2024-01-01T00:00:00+00:00", None);
        pending.pending_sync = Some(super::super::event_record::PendingSync::Create);
        upsert(&c, pending).unwrap();

        let map = etag_map(&c, "cal1").unwrap();
        assert!(map.contains_key("/cal/u1.ics"));
        assert!(!map.contains_key("/cal/u2.ics"));
    }

    #[test]
    fn search_is_case_insensitive_and_ordered() {
        let c = conn();
        upsert(&c, sample("u1", "/cal/u1.ics", "2024-01-01T00:00:00+00:00", None)).unwrap();
        let hits = search(&c, "dentist").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].uid, "u1");
    }
}
