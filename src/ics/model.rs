//! Neutral object model for a parsed VCALENDAR.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// A DTSTART/DTEND/RECURRENCE-ID value in its original, zone-faithful
/// form — the "annotated" representation made concrete.
#[derive(Debug, Clone, PartialEq)]
pub enum DateTimeValue {
    /// `VALUE=DATE` — an all-day value with no time component.
    Date(NaiveDate),
    /// A wall-clock datetime paired with an IANA zone name (`TZID=...`).
    Zoned(NaiveDateTime, String),
    /// A UTC instant (trailing `Z`).
    Utc(DateTime<Utc>),
    /// A bare local datetime with neither TZID nor trailing `Z`.
    Floating(NaiveDateTime),
}

impl DateTimeValue {
    pub fn is_date_only(&self) -> bool {
        matches!(self, DateTimeValue::Date(_))
    }

    pub fn tzid(&self) -> Option<&str> {
        match self {
            DateTimeValue::Zoned(_, tz) => Some(tz.as_str()),
            _ => None,
        }
    }

    /// Resolve to a UTC instant using named-zone-aware conversion
    /// (DST-correct via `chrono-tz`), never a fixed-offset shortcut.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            DateTimeValue::Date(d) => Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()),
            DateTimeValue::Utc(dt) => *dt,
            DateTimeValue::Zoned(naive, tzname) => {
                let tz: Tz = tzname.parse().unwrap_or(chrono_tz::UTC);
                tz.from_local_datetime(naive)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(naive))
            }
            DateTimeValue::Floating(naive) => Utc.from_utc_datetime(naive),
        }
    }

    /// The "annotated" string form: a value that recovers both the
    /// original wall-clock value and its intended
    /// zone. Date-only values are bare `YYYYMMDD`; zoned values carry
    /// a `;TZID` suffix; UTC instants end in `Z`; floating values are
    /// bare compact datetimes.
    pub fn annotate(&self) -> String {
        match self {
            DateTimeValue::Date(d) => d.format("%Y%m%d").to_string(),
            DateTimeValue::Zoned(naive, tz) => {
                format!("{};{}", naive.format("%Y%m%dT%H%M%S"), tz)
            }
            DateTimeValue::Utc(dt) => dt.format("%Y%m%dT%H%M%SZ").to_string(),
            DateTimeValue::Floating(naive) => naive.format("%Y%m%dT%H%M%S").to_string(),
        }
    }

    /// Inverse of [`DateTimeValue::annotate`].
    pub fn parse_annotated(s: &str) -> Option<DateTimeValue> {
        if s.len() == 8 && s.chars().all(|c| c.is_ascii_digit()) {
            return NaiveDate::parse_from_str(s, "%Y%m%d").ok().map(DateTimeValue::Date);
        }
        if let Some(stripped) = s.strip_suffix('Z') {
            let dt = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S").ok()?;
            return Some(DateTimeValue::Utc(Utc.from_utc_datetime(&dt)));
        }
        if let Some((datetime_part, tz)) = s.split_once(';') {
            let dt = NaiveDateTime::parse_from_str(datetime_part, "%Y%m%dT%H%M%S").ok()?;
            return Some(DateTimeValue::Zoned(dt, tz.to_string()));
        }
        NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
            .ok()
            .map(DateTimeValue::Floating)
    }

    /// Exdate/recurrence-id comparison key: compact `YYYYMMDD` for
    /// date-only values, `YYYYMMDDThhmmss` otherwise — ignores the
    /// zone/`Z` suffix so servers that round-trip a zoned value as UTC
    /// (or vice versa) still compare equal.
    pub fn exdate_key(&self) -> String {
        match self {
            DateTimeValue::Date(d) => d.format("%Y%m%d").to_string(),
            DateTimeValue::Zoned(naive, _) => naive.format("%Y%m%dT%H%M%S").to_string(),
            DateTimeValue::Utc(dt) => dt.naive_utc().format("%Y%m%dT%H%M%S").to_string(),
            DateTimeValue::Floating(naive) => naive.format("%Y%m%dT%H%M%S").to_string(),
        }
    }
}

/// Normalize a raw EXDATE/RDATE/RECURRENCE-ID content value to the
/// comparison key used by EXDATE matching: compact `YYYYMMDD` for
/// date-only values, `YYYYMMDDThhmmss` otherwise, dropping any
/// TZID prefix notation and the trailing `Z`.
pub fn exdate_raw_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'T')
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct Attendee {
    pub email: String,
    pub cn: Option<String>,
    pub partstat: Option<String>,
    pub role: Option<String>,
    pub rsvp: Option<bool>,
}

/// One VEVENT, master or override, as recognised by the codec.
#[derive(Debug, Clone)]
pub struct VEvent {
    pub uid: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub dtstart: DateTimeValue,
    pub dtend: Option<DateTimeValue>,
    pub duration: Option<String>,
    pub rrule: Option<String>,
    pub exdates: Vec<String>,
    pub rdates: Vec<String>,
    pub recurrence_id: Option<DateTimeValue>,
    pub status: Option<String>,
    pub transp: Option<String>,
    pub organizer: Option<String>,
    pub attendees: Vec<Attendee>,
    pub sequence: i64,
    pub created: Option<String>,
    pub last_modified: Option<String>,
    pub geo: Option<(f64, f64)>,
}

impl VEvent {
    pub fn is_override(&self) -> bool {
        self.recurrence_id.is_some()
    }

    pub fn has_rrule(&self) -> bool {
        self.rrule.is_some()
    }
}

/// A parsed VCALENDAR resource. A single calendar-object resource may
/// hold a recurring master plus its RECURRENCE-ID overrides.
#[derive(Debug, Clone)]
pub struct VCalendar {
    pub prodid: String,
    pub version: String,
    pub calscale: Option<String>,
    pub method: Option<String>,
    /// Raw VTIMEZONE block text (BEGIN:VTIMEZONE..END:VTIMEZONE),
    /// kept opaque for verbatim re-emission.
    pub timezone: Option<String>,
    pub events: Vec<VEvent>,
}

impl VCalendar {
    pub fn master(&self) -> Option<&VEvent> {
        self.events.iter().find(|e| !e.is_override())
    }

    pub fn overrides(&self) -> impl Iterator<Item = &VEvent> {
        self.events.iter().filter(|e| e.is_override())
    }
}
