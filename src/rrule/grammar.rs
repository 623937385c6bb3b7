//! RRULE value parsing: `FREQ=...;INTERVAL=...;...`, semicolon-
//! separated, order-free parts.

use chrono::NaiveDate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freq {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weekday {
    Mo,
    Tu,
    We,
    Th,
    Fr,
    Sa,
    Su,
}

impl Weekday {
    fn from_code(s: &str) -> Option<Weekday> {
        Some(match s {
            "MO" => Weekday::Mo,
            "TU" => Weekday::Tu,
            "WE" => Weekday::We,
            "TH" => Weekday::Th,
            "FR" => Weekday::Fr,
            "SA" => Weekday::Sa,
            "SU" => Weekday::Su,
            _ => return None,
        })
    }

    pub fn to_chrono(self) -> chrono::Weekday {
        match self {
            Weekday::Mo => chrono::Weekday::Mon,
            Weekday::Tu => chrono::Weekday::Tue,
            Weekday::We => chrono::Weekday::Wed,
            Weekday::Th => chrono::Weekday::Thu,
            Weekday::Fr => chrono::Weekday::Fri,
            Weekday::Sa => chrono::Weekday::Sat,
            Weekday::Su => chrono::Weekday::Sun,
        }
    }

    /// Index 0 (Monday) through 6 (Sunday) for WKST-relative ordering.
    pub fn mon_index(self) -> u32 {
        match self {
            Weekday::Mo => 0,
            Weekday::Tu => 1,
            Weekday::We => 2,
            Weekday::Th => 3,
            Weekday::Fr => 4,
            Weekday::Sa => 5,
            Weekday::Su => 6,
        }
    }
}

/// One BYDAY term: an optional ordinal (`2FR`, `-1SU`) plus weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByDayTerm {
    pub ordinal: Option<i32>,
    pub weekday: Weekday,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Until {
    Date(NaiveDate),
    DateTime(chrono::NaiveDateTime),
    Instant(chrono::DateTime<chrono::Utc>),
}

#[derive(Debug, Clone)]
pub struct RRule {
    pub freq: Freq,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<Until>,
    pub byday: Vec<ByDayTerm>,
    pub bymonthday: Vec<i32>,
    pub bymonth: Vec<u32>,
    pub wkst: Weekday,
}

/// Parse an RRULE value string. Returns `None` for a missing/unrecognised
/// FREQ; unrecognised parts are otherwise ignored rather than rejected,
/// matching how real-world servers emit extension parts we don't model.
pub fn parse_rrule(value: &str) -> Option<RRule> {
    let mut freq = None;
    let mut interval = 1u32;
    let mut count = None;
    let mut until = None;
    let mut byday = Vec::new();
    let mut bymonthday = Vec::new();
    let mut bymonth = Vec::new();
    let mut wkst = Weekday::Mo;

    for part in value.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((key, val)) = part.split_once('=') else {
            continue;
        };
        match key.to_ascii_uppercase().as_str() {
            "FREQ" => {
                freq = match val.to_ascii_uppercase().as_str() {
                    "DAILY" => Some(Freq::Daily),
                    "WEEKLY" => Some(Freq::Weekly),
                    "MONTHLY" => Some(Freq::Monthly),
                    "YEARLY" => Some(Freq::Yearly),
                    _ => None,
                };
            }
            "INTERVAL" => {
                interval = val.parse().unwrap_or(1).max(1);
            }
            "COUNT" => {
                count = val.parse().ok();
            }
            "UNTIL" => {
                until = parse_until(val);
            }
            "BYDAY" => {
                byday = val.split(',').filter_map(parse_byday_term).collect();
            }
            "BYMONTHDAY" => {
                bymonthday = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            }
            "BYMONTH" => {
                bymonth = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            }
            "WKST" => {
                if let Some(w) = Weekday::from_code(&val.to_ascii_uppercase()) {
                    wkst = w;
                }
            }
            _ => {}
        }
    }

    Some(RRule {
        freq: freq?,
        interval,
        count,
        until,
        byday,
        bymonthday,
        bymonth,
        wkst,
    })
}

fn parse_until(val: &str) -> Option<Until> {
    let val = val.trim();
    if val.len() == 8 && val.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDate::parse_from_str(val, "%Y%m%d").ok().map(Until::Date);
    }
    if let Some(stripped) = val.strip_suffix('Z') {
        let dt = chrono::NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S").ok()?;
        return Some(Until::Instant(
            chrono::TimeZone::from_utc_datetime(&chrono::Utc, &dt),
        ));
    }
    chrono::NaiveDateTime::parse_from_str(val, "%Y%m%dT%H%M%S")
        .ok()
        .map(Until::DateTime)
}

/// Rewrite a raw RRULE value with a new `UNTIL`, dropping any existing
/// `UNTIL`/`COUNT` term — used to truncate a series for a
/// scope="thisAndFollowing" update. `until_value` must already
/// be formatted to match the master's DTSTART value type (a bare
/// `YYYYMMDD` for all-day masters, `YYYYMMDDTHHMMSSZ` otherwise).
pub fn set_until(raw: &str, until_value: &str) -> String {
    let mut parts: Vec<&str> = raw
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter(|p| {
            let key = p.split_once('=').map(|(k, _)| k).unwrap_or(*p);
            !key.eq_ignore_ascii_case("UNTIL") && !key.eq_ignore_ascii_case("COUNT")
        })
        .collect();
    let until_part = format!("UNTIL={until_value}");
    parts.push(&until_part);
    parts.join(";")
}

fn parse_byday_term(s: &str) -> Option<ByDayTerm> {
    let s = s.trim();
    if s.len() < 2 {
        return None;
    }
    let (ord_part, day_part) = s.split_at(s.len() - 2);
    let weekday = Weekday::from_code(&day_part.to_ascii_uppercase())?;
    let ordinal = if ord_part.is_empty() {
        None
    } else {
        ord_part.parse::<i32>().ok()
    };
    Some(ByDayTerm { ordinal, weekday })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_weekly_byday_count() {
        let r = parse_rrule("FREQ=WEEKLY;BYDAY=MO;COUNT=3").unwrap();
        assert_eq!(r.freq, Freq::Weekly);
        assert_eq!(r.count, Some(3));
        assert_eq!(r.byday, vec![ByDayTerm { ordinal: None, weekday: Weekday::Mo }]);
    }

    #[test]
    fn parses_ordinal_byday_and_until() {
        let r = parse_rrule("FREQ=MONTHLY;BYDAY=-1FR;UNTIL=20261231").unwrap();
        assert_eq!(
            r.byday,
            vec![ByDayTerm { ordinal: Some(-1), weekday: Weekday::Fr }]
        );
        assert_eq!(r.until, Some(Until::Date(NaiveDate::from_ymd_opt(2026, 12, 31).unwrap())));
    }

    #[test]
    fn unrecognised_freq_is_none() {
        assert!(parse_rrule("FREQ=SECONDLY").is_none());
    }

    #[test]
    fn set_until_replaces_existing_until() {
        let out = set_until("FREQ=WEEKLY;BYDAY=MO;UNTIL=20261231", "20260601T000000Z");
        assert_eq!(out, "FREQ=WEEKLY;BYDAY=MO;UNTIL=20260601T000000Z");
    }

    #[test]
    fn set_until_drops_count_and_appends() {
        let out = set_until("FREQ=DAILY;COUNT=10", "20260601T000000Z");
        assert_eq!(out, "FREQ=DAILY;UNTIL=20260601T000000Z");
    }
}
