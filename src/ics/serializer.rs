//! RFC 5545 serialization of a single [`VEvent`] into a complete
//! VCALENDAR text.

use chrono::{DateTime, Utc};

use super::model::{DateTimeValue, VEvent};
use super::text::{escape_text, fold_line};

fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

fn dt_line(name: &str, value: &DateTimeValue) -> String {
    match value {
        DateTimeValue::Date(d) => format!("{name};VALUE=DATE:{}", d.format("%Y%m%d")),
        DateTimeValue::Zoned(naive, tz) => {
            format!("{name};TZID={tz}:{}", naive.format("%Y%m%dT%H%M%S"))
        }
        DateTimeValue::Utc(dt) => format!("{name}:{}", format_utc(*dt)),
        DateTimeValue::Floating(naive) => format!("{name}:{}", naive.format("%Y%m%dT%H%M%S")),
    }
}

/// Serialize one VEVENT (master or override) into a standalone
/// VCALENDAR text. `vtimezone_raw`, when present, is emitted verbatim
/// right after the calendar header. `now` is injected so callers (the
/// sync orchestrator) control DTSTAMP/CREATED/LAST-MODIFIED instead of
/// reading an ambient clock.
pub fn serialize_vevent(event: &VEvent, vtimezone_raw: Option<&str>, now: DateTime<Utc>) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push("BEGIN:VCALENDAR".to_string());
    lines.push("VERSION:2.0".to_string());
    lines.push("PRODID:-//corkboard//corkboard-core//EN".to_string());
    lines.push("CALSCALE:GREGORIAN".to_string());

    if let Some(tz) = vtimezone_raw {
        for line in tz.lines() {
            let line = line.trim_end_matches('\r');
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
    }

    lines.push("BEGIN:VEVENT".to_string());
    lines.push(format!("UID:{}", event.uid));
    lines.push(format!("DTSTAMP:{}", format_utc(now)));
    lines.push(format!("CREATED:{}", format_utc(now)));
    lines.push(format!("LAST-MODIFIED:{}", format_utc(now)));
    lines.push(format!("SEQUENCE:{}", event.sequence));
    lines.push(format!(
        "SUMMARY:{}",
        escape_text(event.summary.as_deref().unwrap_or(""))
    ));
    if let Some(d) = &event.description {
        lines.push(format!("DESCRIPTION:{}", escape_text(d)));
    }
    if let Some(l) = &event.location {
        lines.push(format!("LOCATION:{}", escape_text(l)));
    }
    if let Some(u) = &event.url {
        lines.push(format!("URL:{u}"));
    }

    lines.push(dt_line("DTSTART", &event.dtstart));
    if let Some(dtend) = &event.dtend {
        lines.push(dt_line("DTEND", dtend));
    } else if let Some(dur) = &event.duration {
        lines.push(format!("DURATION:{dur}"));
    }

    if let Some(rrule) = &event.rrule {
        lines.push(format!("RRULE:{rrule}"));
    }
    if !event.exdates.is_empty() {
        let value_param = if event.dtstart.is_date_only() {
            ";VALUE=DATE"
        } else {
            ""
        };
        lines.push(format!("EXDATE{value_param}:{}", event.exdates.join(",")));
    }
    if !event.rdates.is_empty() {
        lines.push(format!("RDATE:{}", event.rdates.join(",")));
    }
    if let Some(rid) = &event.recurrence_id {
        lines.push(dt_line("RECURRENCE-ID", rid));
    }
    if let Some(s) = &event.status {
        lines.push(format!("STATUS:{s}"));
    }
    if let Some(t) = &event.transp {
        lines.push(format!("TRANSP:{t}"));
    }
    if let Some(o) = &event.organizer {
        lines.push(format!("ORGANIZER:mailto:{o}"));
    }
    for a in &event.attendees {
        let mut params = String::new();
        if let Some(cn) = &a.cn {
            params.push_str(&format!(";CN={cn}"));
        }
        if let Some(role) = &a.role {
            params.push_str(&format!(";ROLE={role}"));
        }
        if let Some(partstat) = &a.partstat {
            params.push_str(&format!(";PARTSTAT={partstat}"));
        }
        if let Some(rsvp) = a.rsvp {
            params.push_str(&format!(";RSVP={}", if rsvp { "TRUE" } else { "FALSE" }));
        }
        lines.push(format!("ATTENDEE{params}:mailto:{}", a.email));
    }
    if let Some((lat, lon)) = event.geo {
        lines.push(format!("GEO:{lat};{lon}"));
    }
    lines.push("END:VEVENT".to_string());
    lines.push("END:VCALENDAR".to_string());

    let mut out = String::with_capacity(lines.len() * 32);
    for line in lines {
        out.push_str(&fold_line(&line));
        out.push_str("\r\n");
    }
    out
}

/// Serialize one override VEVENT as a standalone content-line block
/// (`BEGIN:VEVENT`..`END:VEVENT`, no surrounding VCALENDAR), for
/// injection into an existing calendar-object resource via the ICS
/// editor API.
pub fn serialize_vevent_block(event: &VEvent, now: DateTime<Utc>) -> String {
    let full = serialize_vevent(event, None, now);
    let start = full.find("BEGIN:VEVENT").unwrap_or(0);
    let end = full.find("END:VCALENDAR").unwrap_or(full.len());
    full[start..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::parser::parse_calendar;
    use chrono::TimeZone;

    fn sample_event() -> VEvent {
        VEvent {
            uid: "abc-123@example.com".into(),
            summary: Some("Dentist".into()),
            description: None,
            location: None,
            url: None,
            dtstart: DateTimeValue::Utc(Utc.with_ymd_and_hms(2026, 1, 15, 14, 0, 0).unwrap()),
            dtend: Some(DateTimeValue::Utc(Utc.with_ymd_and_hms(2026, 1, 15, 15, 0, 0).unwrap())),
            duration: None,
            rrule: None,
            exdates: Vec::new(),
            rdates: Vec::new(),
            recurrence_id: None,
            status: None,
            transp: None,
            organizer: None,
            attendees: Vec::new(),
            sequence: 0,
            created: None,
            last_modified: None,
            geo: None,
        }
    }

    #[test]
    fn roundtrips_through_parser() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let text = serialize_vevent(&sample_event(), None, now);
        let parsed = parse_calendar(&text).expect("parses back");
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].uid, "abc-123@example.com");
        assert_eq!(parsed.events[0].summary.as_deref(), Some("Dentist"));
    }

    #[test]
    fn every_output_line_is_at_most_75_octets() {
        let mut ev = sample_event();
        ev.description = Some("x".repeat(300));
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let text = serialize_vevent(&ev, None, now);
        for line in text.split("\r\n") {
            assert!(line.as_bytes().len() <= 75, "line too long: {line:?}");
        }
    }
}
