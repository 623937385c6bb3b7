//! [`EventRecord`]: the indexed row for one VEVENT, master or override.

use rusqlite::Row;

/// Whether a row carries a local edit not yet acknowledged by the
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingSync {
    Create,
    Update,
    Delete,
}

impl PendingSync {
    pub fn as_str(self) -> &'static str {
        match self {
            PendingSync::Create => "create",
            PendingSync::Update => "update",
            PendingSync::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(PendingSync::Create),
            "update" => Some(PendingSync::Update),
            "delete" => Some(PendingSync::Delete),
            _ => None,
        }
    }
}

/// The indexed row for one VEVENT, master or override. Composite
/// identity `(uid, recurrence_id)`, `recurrence_id` null for masters.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub uid: String,
    pub recurrence_id: Option<String>,
    pub account_id: String,
    pub collection_id: String,
    pub href: String,
    pub etag: Option<String>,
    pub ics_path: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub organizer: Option<String>,
    pub attendees_text: Option<String>,
    pub status: Option<String>,
    pub geo_lat: Option<f64>,
    pub geo_lon: Option<f64>,
    /// Annotated dtstart/dtend: `YYYYMMDD`, `YYYYMMDDThhmmss[;TZID]`,
    /// or an ISO instant ending in `Z`.
    pub dtstart: String,
    pub dtend: Option<String>,
    pub dtstart_utc: String,
    pub dtend_utc: Option<String>,
    pub dtstart_is_date: bool,
    pub rrule: Option<String>,
    pub exdates: Vec<String>,
    pub pending_sync: Option<PendingSync>,
}

impl EventRecord {
    pub fn is_master(&self) -> bool {
        self.recurrence_id.is_none()
    }

    pub fn is_override(&self) -> bool {
        self.recurrence_id.is_some()
    }

    pub fn is_recurring_master(&self) -> bool {
        self.is_master() && self.rrule.is_some()
    }

    pub(crate) fn exdates_join(&self) -> String {
        self.exdates.join("\u{1}")
    }

    pub(crate) fn exdates_split(raw: Option<String>) -> Vec<String> {
        raw.filter(|s| !s.is_empty())
            .map(|s| s.split('\u{1}').map(|p| p.to_string()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(EventRecord {
            uid: row.get("uid")?,
            recurrence_id: row.get("recurrence_id")?,
            account_id: row.get("account_id")?,
            collection_id: row.get("collection_id")?,
            href: row.get("href")?,
            etag: row.get("etag")?,
            ics_path: row.get("ics_path")?,
            summary: row.get("summary")?,
            description: row.get("description")?,
            location: row.get("location")?,
            organizer: row.get("organizer")?,
            attendees_text: row.get("attendees_text")?,
            status: row.get("status")?,
            geo_lat: row.get("geo_lat")?,
            geo_lon: row.get("geo_lon")?,
            dtstart: row.get("dtstart")?,
            dtend: row.get("dtend")?,
            dtstart_utc: row.get("dtstart_utc")?,
            dtend_utc: row.get("dtend_utc")?,
            dtstart_is_date: row.get::<_, i64>("dtstart_is_date")? != 0,
            rrule: row.get("rrule")?,
            exdates: Self::exdates_split(row.get("exdates")?),
            pending_sync: row
                .get::<_, Option<String>>("pending_sync")?
                .and_then(|s| PendingSync::parse(&s)),
        })
    }
}
