//! [`VEvent`] <-> [`EventRecord`] conversion, shared by pull and push.

use crate::ics::model::{DateTimeValue, VEvent};
use crate::store::EventRecord;

fn default_end(dtstart: &DateTimeValue) -> chrono::DateTime<chrono::Utc> {
    let start = dtstart.to_utc();
    if dtstart.is_date_only() {
        start + chrono::Duration::days(1)
    } else {
        start + chrono::Duration::hours(1)
    }
}

fn attendees_text(event: &VEvent) -> Option<String> {
    if event.attendees.is_empty() {
        return None;
    }
    Some(
        event
            .attendees
            .iter()
            .map(|a| match &a.cn {
                Some(cn) => format!("{cn} <{}>", a.email),
                None => a.email.clone(),
            })
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Build an [`EventRecord`] for `event` (master or override), to be
/// upserted into the local index after a pull or a successful push.
pub fn vevent_to_record(
    event: &VEvent,
    href: &str,
    etag: Option<String>,
    account_id: &str,
    collection_id: &str,
    ics_path: &str,
) -> EventRecord {
    let dtend_value = event.dtend.clone();
    let dtend_utc = dtend_value.as_ref().map(|v| v.to_utc().to_rfc3339()).or_else(|| {
        if event.duration.is_some() {
            None
        } else {
            Some(default_end(&event.dtstart).to_rfc3339())
        }
    });

    EventRecord {
        uid: event.uid.clone(),
        recurrence_id: event.recurrence_id.as_ref().map(|r| r.annotate()),
        account_id: account_id.to_string(),
        collection_id: collection_id.to_string(),
        href: href.to_string(),
        etag,
        ics_path: ics_path.to_string(),
        summary: event.summary.clone(),
        description: event.description.clone(),
        location: event.location.clone(),
        organizer: event.organizer.clone(),
        attendees_text: attendees_text(event),
        status: event.status.clone(),
        geo_lat: event.geo.map(|(lat, _)| lat),
        geo_lon: event.geo.map(|(_, lon)| lon),
        dtstart: event.dtstart.annotate(),
        dtend: dtend_value.as_ref().map(|v| v.annotate()),
        dtstart_utc: event.dtstart.to_utc().to_rfc3339(),
        dtend_utc,
        dtstart_is_date: event.dtstart.is_date_only(),
        rrule: event.rrule.clone(),
        exdates: event.exdates.clone(),
        pending_sync: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::model::Attendee;
    use chrono::{TimeZone, Utc};

    fn sample() -> VEvent {
        VEvent {
            uid: "u1".into(),
            summary: Some("Dentist".into()),
            description: None,
            location: None,
            url: None,
            dtstart: DateTimeValue::Utc(Utc.with_ymd_and_hms(2026, 1, 15, 14, 0, 0).unwrap()),
            dtend: Some(DateTimeValue::Utc(Utc.with_ymd_and_hms(2026, 1, 15, 15, 0, 0).unwrap())),
            duration: None,
            rrule: None,
            exdates: vec![],
            rdates: vec![],
            recurrence_id: None,
            status: None,
            transp: None,
            organizer: None,
            attendees: vec![Attendee { email: "a@b.com".into(), cn: Some("A".into()), ..Default::default() }],
            sequence: 0,
            created: None,
            last_modified: None,
            geo: None,
        }
    }

    #[test]
    fn converts_basic_fields() {
        let record = vevent_to_record(&sample(), "/cal/u1.ics", Some("e1".into()), "acc1", "cal1", "/tmp/u1.ics");
        assert_eq!(record.uid, "u1");
        assert_eq!(record.dtstart_utc, "2026-01-15T14:00:00+00:00");
        assert_eq!(record.attendees_text.as_deref(), Some("A <a@b.com>"));
        assert!(record.recurrence_id.is_none());
    }
}
