//! RFC 5545 parser: content-line lexing plus a tolerant VCALENDAR/VEVENT
//! builder. Unknown properties, malformed components, and unexpected
//! characters are ignored; a VEVENT missing UID is dropped silently.

use chrono::{NaiveDate, NaiveDateTime};

use super::model::{Attendee, DateTimeValue, VCalendar, VEvent};
use super::text::{split_lines, unescape_text, unfold};

#[derive(Debug, Clone)]
struct ContentLine {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

fn parse_content_line(line: &str) -> Option<ContentLine> {
    let mut chars = line.char_indices().peekable();
    let mut name_end = 0;
    for (i, c) in chars.by_ref() {
        if c == ';' || c == ':' {
            name_end = i;
            break;
        }
        name_end = i + c.len_utf8();
    }
    if name_end == 0 && !line.starts_with([';', ':']) {
        return None;
    }
    let name = line[..name_end].to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }

    let mut rest = &line[name_end..];
    let mut params = Vec::new();

    while let Some(stripped) = rest.strip_prefix(';') {
        rest = stripped;
        let eq = rest.find('=')?;
        let pname = rest[..eq].to_ascii_uppercase();
        rest = &rest[eq + 1..];

        let pvalue;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"')?;
            pvalue = quoted[..end].to_string();
            rest = &quoted[end + 1..];
        } else {
            let end = rest
                .find([';', ':'])
                .unwrap_or(rest.len());
            pvalue = rest[..end].to_string();
            rest = &rest[end..];
        }
        params.push((pname, decode_caret(&pvalue)));
    }

    let value = rest.strip_prefix(':').unwrap_or(rest).to_string();
    Some(ContentLine { name, params, value })
}

/// RFC 6868 caret-encoding used inside quoted parameter values.
fn decode_caret(s: &str) -> String {
    if !s.contains('^') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '^' {
            match chars.peek() {
                Some('^') => {
                    out.push('^');
                    chars.next();
                }
                Some('n') => {
                    out.push('\n');
                    chars.next();
                }
                Some('\'') => {
                    out.push('"');
                    chars.next();
                }
                _ => out.push('^'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn param(cl: &ContentLine, name: &str) -> Option<String> {
    cl.params
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
}

/// Parse a DTSTART/DTEND/RECURRENCE-ID style value given its TZID and
/// VALUE=DATE params.
fn parse_datetime_value(cl: &ContentLine) -> Option<DateTimeValue> {
    let value = cl.value.trim();
    let is_date = param(cl, "VALUE").as_deref() == Some("DATE");
    if is_date || (value.len() == 8 && value.chars().all(|c| c.is_ascii_digit())) {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return Some(DateTimeValue::Date(date));
    }

    if let Some(stripped) = value.strip_suffix('Z') {
        let dt = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S").ok()?;
        return Some(DateTimeValue::Utc(chrono::DateTime::from_naive_utc_and_offset(
            dt,
            chrono::Utc,
        )));
    }

    let dt = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    if let Some(tzid) = param(cl, "TZID") {
        Some(DateTimeValue::Zoned(dt, tzid))
    } else {
        Some(DateTimeValue::Floating(dt))
    }
}

fn parse_attendee(cl: &ContentLine) -> Attendee {
    let email = cl.value.trim().trim_start_matches("mailto:").trim_start_matches("MAILTO:").to_string();
    Attendee {
        email,
        cn: param(cl, "CN"),
        partstat: param(cl, "PARTSTAT"),
        role: param(cl, "ROLE"),
        rsvp: param(cl, "RSVP").map(|v| v.eq_ignore_ascii_case("TRUE")),
    }
}

#[derive(Default)]
struct EventBuilder {
    uid: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    url: Option<String>,
    conference: Option<String>,
    dtstart: Option<DateTimeValue>,
    dtend: Option<DateTimeValue>,
    duration: Option<String>,
    rrule: Option<String>,
    exdates: Vec<String>,
    rdates: Vec<String>,
    recurrence_id: Option<DateTimeValue>,
    status: Option<String>,
    transp: Option<String>,
    organizer: Option<String>,
    attendees: Vec<Attendee>,
    sequence: i64,
    created: Option<String>,
    last_modified: Option<String>,
    geo: Option<(f64, f64)>,
}

impl EventBuilder {
    fn into_event(self) -> Option<VEvent> {
        let uid = self.uid?;
        let dtstart = self.dtstart?;
        Some(VEvent {
            uid,
            summary: self.summary,
            description: self.description,
            location: self.location,
            url: self.url.or(self.conference),
            dtstart,
            dtend: self.dtend,
            duration: self.duration,
            rrule: self.rrule,
            exdates: self.exdates,
            rdates: self.rdates,
            recurrence_id: self.recurrence_id,
            status: self.status,
            transp: self.transp,
            organizer: self.organizer,
            attendees: self.attendees,
            sequence: self.sequence,
            created: self.created,
            last_modified: self.last_modified,
            geo: self.geo,
        })
    }
}

/// Parse a full VCALENDAR text payload into the neutral object model.
pub fn parse_calendar(raw: &str) -> Option<VCalendar> {
    let unfolded = unfold(raw);
    let lines = split_lines(&unfolded);

    let mut prodid = String::new();
    let mut version = String::new();
    let mut calscale = None;
    let mut method = None;
    let mut timezone_lines: Option<Vec<String>> = None;
    let mut events = Vec::new();

    // depth stack of component names; "VEVENT" is only recognised at
    // depth 1 directly under VCALENDAR so a nested VALARM's UID (if a
    // malformed server emits one) can never be mistaken for the event's.
    let mut stack: Vec<String> = Vec::new();
    let mut current_event: Option<EventBuilder> = None;
    let mut in_timezone = false;

    for line in &lines {
        let Some(cl) = parse_content_line(line) else {
            continue;
        };

        if cl.name == "BEGIN" {
            let comp = cl.value.trim().to_ascii_uppercase();
            stack.push(comp.clone());
            match comp.as_str() {
                "VEVENT" if stack.len() == 2 && stack[0] == "VCALENDAR" => {
                    current_event = Some(EventBuilder::default());
                }
                "VTIMEZONE" if stack.len() == 2 && stack[0] == "VCALENDAR" => {
                    in_timezone = true;
                    timezone_lines = Some(vec![line.clone()]);
                }
                _ => {
                    if in_timezone {
                        if let Some(tz) = timezone_lines.as_mut() {
                            tz.push(line.clone());
                        }
                    }
                }
            }
            continue;
        }

        if cl.name == "END" {
            let comp = cl.value.trim().to_ascii_uppercase();
            if in_timezone {
                if let Some(tz) = timezone_lines.as_mut() {
                    tz.push(line.clone());
                }
            }
            if comp == "VEVENT" && stack.len() == 2 && stack.last().map(String::as_str) == Some("VEVENT") {
                if let Some(builder) = current_event.take()
                    && let Some(event) = builder.into_event()
                {
                    events.push(event);
                }
            }
            if comp == "VTIMEZONE" {
                in_timezone = false;
            }
            stack.pop();
            continue;
        }

        if in_timezone {
            if let Some(tz) = timezone_lines.as_mut() {
                tz.push(line.clone());
            }
            continue;
        }

        // Properties directly on VCALENDAR.
        if stack.len() == 1 && stack[0] == "VCALENDAR" {
            match cl.name.as_str() {
                "PRODID" => prodid = unescape_text(&cl.value),
                "VERSION" => version = cl.value.trim().to_string(),
                "CALSCALE" => calscale = Some(cl.value.trim().to_string()),
                "METHOD" => method = Some(cl.value.trim().to_string()),
                _ => {}
            }
            continue;
        }

        // Properties on the current top-level VEVENT (depth 2); nested
        // VALARM content (depth 3+) is intentionally ignored here.
        if stack.len() == 2 && stack.last().map(String::as_str) == Some("VEVENT") {
            let Some(ev) = current_event.as_mut() else {
                continue;
            };
            match cl.name.as_str() {
                "UID" => ev.uid = Some(cl.value.trim().to_string()),
                "SUMMARY" => ev.summary = Some(unescape_text(&cl.value)),
                "DESCRIPTION" => ev.description = Some(unescape_text(&cl.value)),
                "LOCATION" => ev.location = Some(unescape_text(&cl.value)),
                "URL" => ev.url = Some(cl.value.trim().to_string()),
                "CONFERENCE" => ev.conference = Some(cl.value.trim().to_string()),
                "DTSTART" => ev.dtstart = parse_datetime_value(&cl),
                "DTEND" => ev.dtend = parse_datetime_value(&cl),
                "DURATION" => ev.duration = Some(cl.value.trim().to_string()),
                "RRULE" => ev.rrule = Some(cl.value.trim().to_string()),
                "EXDATE" => {
                    for part in cl.value.split(',') {
                        let part = part.trim();
                        if !part.is_empty() {
                            ev.exdates.push(part.to_string());
                        }
                    }
                }
                "RDATE" => {
                    for part in cl.value.split(',') {
                        let part = part.trim();
                        if !part.is_empty() {
                            ev.rdates.push(part.to_string());
                        }
                    }
                }
                "RECURRENCE-ID" => ev.recurrence_id = parse_datetime_value(&cl),
                "STATUS" => ev.status = Some(cl.value.trim().to_string()),
                "TRANSP" => ev.transp = Some(cl.value.trim().to_string()),
                "ORGANIZER" => {
                    ev.organizer = Some(
                        cl.value
                            .trim()
                            .trim_start_matches("mailto:")
                            .trim_start_matches("MAILTO:")
                            .to_string(),
                    )
                }
                "ATTENDEE" => ev.attendees.push(parse_attendee(&cl)),
                "SEQUENCE" => ev.sequence = cl.value.trim().parse().unwrap_or(0),
                "CREATED" => ev.created = Some(cl.value.trim().to_string()),
                "LAST-MODIFIED" => ev.last_modified = Some(cl.value.trim().to_string()),
                "GEO" => {
                    if let Some((lat, lon)) = cl.value.split_once(';') {
                        if let (Ok(lat), Ok(lon)) = (lat.trim().parse(), lon.trim().parse()) {
                            ev.geo = Some((lat, lon));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    if prodid.is_empty() && version.is_empty() && events.is_empty() {
        return None;
    }

    Some(VCalendar {
        prodid,
        version,
        calscale,
        method,
        timezone: timezone_lines.map(|lines| lines.join("\r\n") + "\r\n"),
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\nUID:abc-123@example.com\r\nDTSTART:20260115T140000Z\r\nDTEND:20260115T150000Z\r\nSUMMARY:Dentist\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    #[test]
    fn parses_basic_timed_event() {
        let cal = parse_calendar(BASIC).expect("parses");
        assert_eq!(cal.events.len(), 1);
        let ev = &cal.events[0];
        assert_eq!(ev.uid, "abc-123@example.com");
        assert_eq!(ev.summary.as_deref(), Some("Dentist"));
        assert!(matches!(ev.dtstart, DateTimeValue::Utc(_)));
    }

    #[test]
    fn drops_event_missing_uid() {
        let raw = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\nDTSTART:20260115T140000Z\r\nSUMMARY:No UID\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let cal = parse_calendar(raw).expect("parses calendar shell");
        assert!(cal.events.is_empty());
    }

    #[test]
    fn valarm_uid_does_not_leak_into_event_uid() {
        let raw = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\nUID:real-uid@example.com\r\nDTSTART:20260115T140000Z\r\nBEGIN:VALARM\r\nUID:alarm-uid@example.com\r\nACTION:DISPLAY\r\nEND:VALARM\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let cal = parse_calendar(raw).unwrap();
        assert_eq!(cal.events[0].uid, "real-uid@example.com");
    }

    #[test]
    fn parses_zoned_dtstart_with_tzid() {
        let raw = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\nUID:u1\r\nDTSTART;TZID=Europe/Berlin:20260105T090000\r\nRRULE:FREQ=WEEKLY;BYDAY=MO;COUNT=3\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let cal = parse_calendar(raw).unwrap();
        match &cal.events[0].dtstart {
            DateTimeValue::Zoned(_, tz) => assert_eq!(tz, "Europe/Berlin"),
            other => panic!("expected zoned dtstart, got {other:?}"),
        }
        assert_eq!(cal.events[0].rrule.as_deref(), Some("FREQ=WEEKLY;BYDAY=MO;COUNT=3"));
    }

    #[test]
    fn parses_exdate_comma_separated_multi_value() {
        let raw = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\nUID:u1\r\nDTSTART:20260101T090000Z\r\nEXDATE:20260108T090000Z,20260115T090000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let cal = parse_calendar(raw).unwrap();
        assert_eq!(cal.events[0].exdates.len(), 2);
    }
}
