//! Instance Materializer: joins non-recurring rows, expanded
//! recurrences, and overrides into a flat, sorted, deduplicated list
//! of [`Occurrence`]s for a display window.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::ics::model::{exdate_raw_key, DateTimeValue};
use crate::ics::parser::parse_calendar;
use crate::rrule::expand::expand;
use crate::rrule::grammar::parse_rrule;
use crate::store::{EventRecord, Store};

const DEFAULT_TIMED_DURATION: Duration = Duration::hours(1);

/// A single concrete appearance of an event in a display window.
/// Never persisted; computed on demand.
#[derive(Debug, Clone)]
pub struct Occurrence {
    pub instance_id: String,
    pub uid: String,
    pub collection_id: String,
    pub calendar_color: Option<String>,
    pub start_iso: String,
    pub end_iso: String,
    pub is_all_day: bool,
    pub has_rrule: bool,
    pub recurrence_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub organizer: Option<String>,
    pub status: Option<String>,
}

/// Per-collection configuration the materializer needs: which
/// collection ids to query and each one's display color.
pub struct CollectionConfig {
    pub collection_id: String,
    pub color: Option<String>,
}

fn format_instant(dt: DateTime<Utc>, is_date: bool) -> String {
    if is_date {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.to_rfc3339()
    }
}

pub(crate) fn duration_of(dtstart: &DateTimeValue, dtend: Option<&DateTimeValue>, duration_raw: Option<&str>) -> Duration {
    if let Some(end) = dtend {
        let d = end.to_utc() - dtstart.to_utc();
        if d > Duration::zero() {
            return d;
        }
    }
    if let Some(raw) = duration_raw {
        if let Some(d) = parse_ical_duration(raw) {
            return d;
        }
    }
    if dtstart.is_date_only() {
        Duration::days(1)
    } else {
        DEFAULT_TIMED_DURATION
    }
}

/// Minimal RFC 5545 `DURATION` value parser: `P(n)DT(n)H(n)M(n)S`.
fn parse_ical_duration(raw: &str) -> Option<Duration> {
    let mut s = raw.trim();
    let negative = s.starts_with('-');
    if negative || s.starts_with('+') {
        s = &s[1..];
    }
    let s = s.strip_prefix('P')?;
    let (date_part, time_part) = s.split_once('T').map(|(d, t)| (d, Some(t))).unwrap_or((s, None));

    let mut total = Duration::zero();
    let mut num = String::new();
    for c in date_part.chars() {
        if c.is_ascii_digit() {
            num.push(c);
        } else if c == 'W' {
            total += Duration::weeks(num.parse().ok()?);
            num.clear();
        } else if c == 'D' {
            total += Duration::days(num.parse().ok()?);
            num.clear();
        }
    }
    if let Some(time_part) = time_part {
        num.clear();
        for c in time_part.chars() {
            if c.is_ascii_digit() {
                num.push(c);
            } else if c == 'H' {
                total += Duration::hours(num.parse().ok()?);
                num.clear();
            } else if c == 'M' {
                total += Duration::minutes(num.parse().ok()?);
                num.clear();
            } else if c == 'S' {
                total += Duration::seconds(num.parse().ok()?);
                num.clear();
            }
        }
    }
    Some(if negative { -total } else { total })
}

/// `instancesInRange`, the collaborator surface's window-query entry
/// point. `display_tzid` is only consulted as a fallback when a
/// recurring master's own DTSTART carries no TZID.
pub fn instances_in_range(
    store: &Store,
    collections: &[CollectionConfig],
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    display_tzid: &str,
) -> anyhow::Result<Vec<Occurrence>> {
    let collection_ids: Vec<String> = collections.iter().map(|c| c.collection_id.clone()).collect();
    let color_of: HashMap<&str, Option<&str>> = collections
        .iter()
        .map(|c| (c.collection_id.as_str(), c.color.as_deref()))
        .collect();

    let mut out = Vec::new();

    let start_iso = range_start.to_rfc3339();
    let end_iso = range_end.to_rfc3339();

    // Step 1: non-recurring rows.
    for row in store.range_non_recurring(&collection_ids, &start_iso, &end_iso)? {
        let Some(dtstart) = DateTimeValue::parse_annotated(&row.dtstart) else {
            continue;
        };
        let dtend = row.dtend.as_deref().and_then(DateTimeValue::parse_annotated);
        let duration = duration_of(&dtstart, dtend.as_ref(), None);
        let start = dtstart.to_utc();
        let end = start + duration;
        out.push(Occurrence {
            instance_id: row.uid.clone(),
            uid: row.uid.clone(),
            collection_id: row.collection_id.clone(),
            calendar_color: color_of.get(row.collection_id.as_str()).copied().flatten().map(String::from),
            start_iso: format_instant(start, row.dtstart_is_date),
            end_iso: format_instant(end, row.dtstart_is_date),
            is_all_day: row.dtstart_is_date,
            has_rrule: false,
            recurrence_id: None,
            summary: row.summary,
            description: row.description,
            location: row.location,
            organizer: row.organizer,
            status: row.status,
        });
    }

    // Step 2: recurring masters + overrides.
    let masters = store.recurring_masters(&collection_ids)?;
    let override_rows = store.overrides(&collection_ids)?;
    let mut overrides_by_uid: HashMap<String, Vec<EventRecord>> = HashMap::new();
    for row in override_rows {
        overrides_by_uid.entry(row.uid.clone()).or_default().push(row);
    }

    for master in &masters {
        let Some(rrule_raw) = master.rrule.as_deref() else { continue };
        let Some(rrule) = parse_rrule(rrule_raw) else { continue };

        // Recover the original TZID and EXDATE list from the raw blob
        // (the indexed row's annotated dtstart already carries this,
        // but the EXDATE list is re-read from the source of truth).
        let blob = store.read_blob(&std::path::PathBuf::from(&master.ics_path))
            .ok()
            .or_else(|| store.read_blob(&store.blob_path(&master.uid, None)).ok());
        let master_event = blob.as_deref().and_then(parse_calendar).and_then(|cal| cal.master().cloned());

        let Some(dtstart) = master_event
            .as_ref()
            .map(|e| e.dtstart.clone())
            .or_else(|| DateTimeValue::parse_annotated(&master.dtstart))
        else {
            continue;
        };
        let dtstart = if dtstart.tzid().is_none() && !dtstart.is_date_only() {
            // Fall back to display_tzid only when the master carries no
            // named zone of its own.
            match &dtstart {
                DateTimeValue::Floating(naive) => {
                    DateTimeValue::Zoned(*naive, display_tzid.to_string())
                }
                other => other.clone(),
            }
        } else {
            dtstart
        };
        let dtend = master_event.as_ref().and_then(|e| e.dtend.clone());
        let duration = duration_of(&dtstart, dtend.as_ref(), master_event.as_ref().and_then(|e| e.duration.as_deref()));

        let exdate_keys: HashSet<String> = master_event
            .as_ref()
            .map(|e| e.exdates.iter().map(|s| exdate_raw_key(s)).collect())
            .unwrap_or_else(|| master.exdates.iter().map(|s| exdate_raw_key(s)).collect());

        let expansions = expand(&dtstart, &rrule, &exdate_keys, range_start, range_end);

        let own_overrides = overrides_by_uid.get(&master.uid);
        let override_keys: HashSet<String> = own_overrides
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r.recurrence_id.as_deref())
                    .map(exdate_raw_key)
                    .collect()
            })
            .unwrap_or_default();

        for candidate in expansions {
            let key = candidate.exdate_key();
            if override_keys.contains(&key) {
                continue;
            }
            let start = candidate.to_utc();
            let end = start + duration;
            let is_date = candidate.is_date_only();
            out.push(Occurrence {
                instance_id: format!("{}__{}", master.uid, start.to_rfc3339()),
                uid: master.uid.clone(),
                collection_id: master.collection_id.clone(),
                calendar_color: color_of.get(master.collection_id.as_str()).copied().flatten().map(String::from),
                start_iso: format_instant(start, is_date),
                end_iso: format_instant(end, is_date),
                is_all_day: is_date,
                has_rrule: true,
                recurrence_id: Some(candidate.annotate()),
                summary: master.summary.clone(),
                description: master.description.clone(),
                location: master.location.clone(),
                organizer: master.organizer.clone(),
                status: master.status.clone(),
            });
        }

        if let Some(rows) = own_overrides {
            for row in rows {
                if row.status.as_deref() == Some("CANCELLED") {
                    continue;
                }
                let Some(start_val) = DateTimeValue::parse_annotated(&row.dtstart) else { continue };
                let start = start_val.to_utc();
                if start < range_start || start >= range_end {
                    continue;
                }
                let end_val = row.dtend.as_deref().and_then(DateTimeValue::parse_annotated);
                let dur = duration_of(&start_val, end_val.as_ref(), None);
                out.push(Occurrence {
                    instance_id: format!("{}__{}", row.uid, start.to_rfc3339()),
                    uid: row.uid.clone(),
                    collection_id: row.collection_id.clone(),
                    calendar_color: color_of.get(row.collection_id.as_str()).copied().flatten().map(String::from),
                    start_iso: format_instant(start, row.dtstart_is_date),
                    end_iso: format_instant(start + dur, row.dtstart_is_date),
                    is_all_day: row.dtstart_is_date,
                    has_rrule: true,
                    recurrence_id: row.recurrence_id.clone(),
                    summary: row.summary.clone(),
                    description: row.description.clone(),
                    location: row.location.clone(),
                    organizer: row.organizer.clone(),
                    status: row.status.clone(),
                });
            }
        }
    }

    out.sort_by(|a, b| a.start_iso.cmp(&b.start_iso));
    let mut seen = HashSet::new();
    out.retain(|o| seen.insert(o.instance_id.clone()));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::serializer::serialize_vevent;
    use crate::ics::model::{Attendee, VEvent};
    use chrono::TimeZone;

    fn base_event(uid: &str) -> VEvent {
        VEvent {
            uid: uid.into(),
            summary: Some("Standup".into()),
            description: None,
            location: None,
            url: None,
            dtstart: DateTimeValue::Zoned(
                chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap().and_hms_opt(9, 0, 0).unwrap(),
                "Europe/Berlin".into(),
            ),
            dtend: None,
            duration: None,
            rrule: Some("FREQ=WEEKLY;BYDAY=MO;COUNT=3".into()),
            exdates: vec![],
            rdates: vec![],
            recurrence_id: None,
            status: None,
            transp: None,
            organizer: None,
            attendees: Vec::<Attendee>::new(),
            sequence: 0,
            created: None,
            last_modified: None,
            geo: None,
        }
    }

    fn setup_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory(&dir.path().join("ics")).unwrap();
        (store, dir)
    }

    fn master_record(uid: &str, href: &str) -> EventRecord {
        EventRecord {
            uid: uid.into(),
            recurrence_id: None,
            account_id: "acc1".into(),
            collection_id: "cal1".into(),
            href: href.into(),
            etag: Some("e1".into()),
            ics_path: String::new(),
            summary: Some("Standup".into()),
            description: None,
            location: None,
            organizer: None,
            attendees_text: None,
            status: None,
            geo_lat: None,
            geo_lon: None,
            dtstart: "20260105T090000;Europe/Berlin".into(),
            dtend: None,
            dtstart_utc: "2026-01-05T08:00:00+00:00".into(),
            dtend_utc: None,
            dtstart_is_date: false,
            rrule: Some("FREQ=WEEKLY;BYDAY=MO;COUNT=3".into()),
            exdates: vec![],
            pending_sync: None,
        }
    }

    #[test]
    fn weekly_expansion_scenario() {
        let (store, _dir) = setup_store();
        let event = base_event("u1");
        let ics = serialize_vevent(&event, None, Utc::now());
        let path = store.write_blob("u1", &ics).unwrap();
        let mut rec = master_record("u1", "/cal/u1.ics");
        rec.ics_path = path.to_string_lossy().to_string();
        store.upsert(rec).unwrap();

        let collections = vec![CollectionConfig { collection_id: "cal1".into(), color: None }];
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let occ = instances_in_range(&store, &collections, start, end, "Europe/Berlin").unwrap();
        assert_eq!(occ.len(), 3);
        assert!(occ[0].start_iso.starts_with("2026-01-05"));
        assert!(occ[1].start_iso.starts_with("2026-01-12"));
        assert!(occ[2].start_iso.starts_with("2026-01-19"));
    }

    #[test]
    fn exdate_skip_scenario() {
        let (store, _dir) = setup_store();
        let mut event = base_event("u1");
        event.exdates = vec!["20260112T090000".into()];
        let ics = serialize_vevent(&event, None, Utc::now());
        let path = store.write_blob("u1", &ics).unwrap();
        let mut rec = master_record("u1", "/cal/u1.ics");
        rec.ics_path = path.to_string_lossy().to_string();
        store.upsert(rec).unwrap();

        let collections = vec![CollectionConfig { collection_id: "cal1".into(), color: None }];
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let occ = instances_in_range(&store, &collections, start, end, "Europe/Berlin").unwrap();
        assert_eq!(occ.len(), 2);
        assert!(occ[0].start_iso.starts_with("2026-01-05"));
        assert!(occ[1].start_iso.starts_with("2026-01-19"));
    }

    #[test]
    fn override_substitution_scenario() {
        let (store, _dir) = setup_store();
        let event = base_event("u1");
        let ics = serialize_vevent(&event, None, Utc::now());
        let path = store.write_blob("u1", &ics).unwrap();
        let mut rec = master_record("u1", "/cal/u1.ics");
        rec.ics_path = path.to_string_lossy().to_string();
        store.upsert(rec).unwrap();

        let mut override_rec = master_record("u1", "/cal/u1.ics");
        override_rec.recurrence_id = Some("20260112T090000Z".into());
        override_rec.rrule = None;
        override_rec.dtstart = "20260112T090000Z".into();
        override_rec.dtstart_utc = "2026-01-12T09:00:00+00:00".into();
        override_rec.summary = Some("Moved".into());
        store.upsert(override_rec).unwrap();

        let collections = vec![CollectionConfig { collection_id: "cal1".into(), color: None }];
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let occ = instances_in_range(&store, &collections, start, end, "Europe/Berlin").unwrap();
        assert_eq!(occ.len(), 3);
        let moved = occ.iter().find(|o| o.start_iso.starts_with("2026-01-12")).unwrap();
        assert_eq!(moved.summary.as_deref(), Some("Moved"));
    }
}
