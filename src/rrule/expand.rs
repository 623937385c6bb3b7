//! Calendar-aware RRULE expansion: occurrences are produced by
//! stepping {days, weeks, months, years} on a wall-clock datetime and
//! converting each candidate to UTC with named-zone arithmetic, never
//! by adding seconds to an instant — so a step across a DST transition
//! preserves wall-clock hh:mm.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::ics::model::{exdate_raw_key, DateTimeValue};

use super::grammar::{ByDayTerm, Freq, RRule, Until};

const HARD_ITERATION_CAP: usize = 10_000;

#[derive(Clone, Copy)]
enum Anchor {
    /// Floating/date-only: no zone, compared as a naive local value.
    Naive,
    /// A named IANA zone (`TZID=...`).
    Zoned(Tz),
    /// A UTC instant.
    Utc,
}

fn anchor_of(dtstart: &DateTimeValue) -> (NaiveDateTime, Anchor) {
    match dtstart {
        DateTimeValue::Date(d) => (d.and_hms_opt(0, 0, 0).unwrap(), Anchor::Naive),
        DateTimeValue::Zoned(naive, tzname) => {
            let tz: Tz = tzname.parse().unwrap_or(chrono_tz::UTC);
            (*naive, Anchor::Zoned(tz))
        }
        DateTimeValue::Utc(dt) => (dt.naive_utc(), Anchor::Utc),
        DateTimeValue::Floating(naive) => (*naive, Anchor::Naive),
    }
}

fn wall_to_utc(wall: NaiveDateTime, anchor: Anchor) -> DateTime<Utc> {
    match anchor {
        Anchor::Naive => Utc.from_utc_datetime(&wall),
        Anchor::Utc => Utc.from_utc_datetime(&wall),
        Anchor::Zoned(tz) => tz
            .from_local_datetime(&wall)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&wall)),
    }
}

fn wall_to_value(wall: NaiveDateTime, anchor: Anchor, date_only: bool, tzname: Option<&str>) -> DateTimeValue {
    if date_only {
        return DateTimeValue::Date(wall.date());
    }
    match anchor {
        Anchor::Naive => DateTimeValue::Floating(wall),
        Anchor::Utc => DateTimeValue::Utc(Utc.from_utc_datetime(&wall)),
        Anchor::Zoned(_) => DateTimeValue::Zoned(wall, tzname.unwrap_or("UTC").to_string()),
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .unwrap();
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    (next - first).num_days() as u32
}

fn resolve_monthday(year: i32, month: u32, value: i32) -> Option<NaiveDate> {
    let dim = days_in_month(year, month) as i32;
    let day = if value > 0 { value } else { dim + value + 1 };
    if day < 1 || day > dim {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day as u32)
}

fn weekdays_in_month(year: i32, month: u32, weekday: chrono::Weekday) -> Vec<NaiveDate> {
    let dim = days_in_month(year, month);
    (1..=dim)
        .filter_map(|d| NaiveDate::from_ymd_opt(year, month, d))
        .filter(|d| d.weekday() == weekday)
        .collect()
}

fn byday_dates_in_month(year: i32, month: u32, term: ByDayTerm) -> Vec<NaiveDate> {
    let all = weekdays_in_month(year, month, term.weekday.to_chrono());
    match term.ordinal {
        None => all,
        Some(n) if n > 0 => all.get((n - 1) as usize).cloned().into_iter().collect(),
        Some(n) => {
            let idx = all.len() as i32 + n;
            if idx >= 0 {
                all.get(idx as usize).cloned().into_iter().collect()
            } else {
                Vec::new()
            }
        }
    }
}

fn start_of_week(date: NaiveDate, wkst: super::grammar::Weekday) -> NaiveDate {
    let wkst_idx = wkst.mon_index();
    let date_idx = super::grammar::Weekday::from_chrono(date.weekday()).mon_index();
    let back = (date_idx + 7 - wkst_idx) % 7;
    date - Days::new(back as u64)
}

impl super::grammar::Weekday {
    fn from_chrono(w: chrono::Weekday) -> Self {
        match w {
            chrono::Weekday::Mon => Self::Mo,
            chrono::Weekday::Tue => Self::Tu,
            chrono::Weekday::Wed => Self::We,
            chrono::Weekday::Thu => Self::Th,
            chrono::Weekday::Fri => Self::Fr,
            chrono::Weekday::Sat => Self::Sa,
            chrono::Weekday::Sun => Self::Su,
        }
    }
}

/// Shift a (year, month) pair by `delta_months`, wrapping across years.
fn shift_year_month(year: i32, month: u32, delta_months: i32) -> (i32, u32) {
    let total = year as i64 * 12 + (month as i64 - 1) + delta_months as i64;
    let y = total.div_euclid(12);
    let m = total.rem_euclid(12) + 1;
    (y as i32, m as u32)
}

/// Raw candidate dates for one period (identified by `year`/`month` so a
/// DTSTART day-of-month that doesn't exist in every target month, e.g.
/// the 30th, never short-circuits the whole expansion), in ascending
/// order, already filtered by BYMONTH/BYMONTHDAY/BYDAY. The caller
/// applies time-of-day, range, and EXDATE filtering.
fn candidates_for_period(rrule: &RRule, year: i32, month: u32, anchor_day: u32, freq: Freq) -> Vec<NaiveDate> {
    if !rrule.bymonth.is_empty() && !rrule.bymonth.contains(&month) && freq != Freq::Yearly {
        return Vec::new();
    }

    match freq {
        Freq::Monthly => {
            if !rrule.byday.is_empty() {
                let mut out: Vec<NaiveDate> = rrule
                    .byday
                    .iter()
                    .flat_map(|t| byday_dates_in_month(year, month, *t))
                    .collect();
                out.sort();
                out
            } else if !rrule.bymonthday.is_empty() {
                let mut out: Vec<NaiveDate> = rrule
                    .bymonthday
                    .iter()
                    .filter_map(|v| resolve_monthday(year, month, *v))
                    .collect();
                out.sort();
                out
            } else {
                let day = anchor_day.min(days_in_month(year, month));
                NaiveDate::from_ymd_opt(year, month, day).into_iter().collect()
            }
        }
        Freq::Yearly => {
            let months: Vec<u32> = if !rrule.bymonth.is_empty() {
                rrule.bymonth.clone()
            } else {
                vec![month]
            };
            let mut out = Vec::new();
            for m in months {
                if !rrule.byday.is_empty() {
                    for t in &rrule.byday {
                        out.extend(byday_dates_in_month(year, m, *t));
                    }
                } else if !rrule.bymonthday.is_empty() {
                    for v in &rrule.bymonthday {
                        if let Some(d) = resolve_monthday(year, m, *v) {
                            out.push(d);
                        }
                    }
                } else if m == month {
                    let day = anchor_day.min(days_in_month(year, m));
                    out.extend(NaiveDate::from_ymd_opt(year, m, day));
                }
            }
            out.sort();
            out
        }
        Freq::Daily | Freq::Weekly => unreachable!("handled by the caller"),
    }
}

fn matches_simple_filters(rrule: &RRule, date: NaiveDate) -> bool {
    if !rrule.bymonth.is_empty() && !rrule.bymonth.contains(&date.month()) {
        return false;
    }
    if !rrule.bymonthday.is_empty() {
        let dim = days_in_month(date.year(), date.month()) as i32;
        let matches = rrule.bymonthday.iter().any(|v| {
            let day = if *v > 0 { *v } else { dim + v + 1 };
            day == date.day() as i32
        });
        if !matches {
            return false;
        }
    }
    if !rrule.byday.is_empty() {
        let wd = super::grammar::Weekday::from_chrono(date.weekday());
        if !rrule.byday.iter().any(|t| t.weekday == wd) {
            return false;
        }
    }
    true
}

/// Expand `rrule` starting at `dtstart`'s wall-clock value, returning
/// every occurrence's start (in `dtstart`'s original form) that falls
/// within `[range_start, range_end)` and is not excluded by `exdate_keys`.
///
/// COUNT is consumed by every rule-matching candidate in chronological
/// order regardless of whether EXDATE later excludes it or the query
/// window contains it: the slot still consumes a COUNT credit even
/// when it ends up excluded or out of range.
pub fn expand(
    dtstart: &DateTimeValue,
    rrule: &RRule,
    exdate_keys: &std::collections::HashSet<String>,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> Vec<DateTimeValue> {
    let (wall_start, anchor) = anchor_of(dtstart);
    let date_only = dtstart.is_date_only();
    let tzname = dtstart.tzid().map(|s| s.to_string());
    let time0 = wall_start.time();

    let mut results = Vec::new();
    let mut matched_count: u32 = 0;
    let mut period_index: u64 = 0;
    let mut iterations = 0usize;

    'outer: loop {
        if iterations >= HARD_ITERATION_CAP {
            break;
        }
        iterations += 1;

        let candidate_dates: Vec<NaiveDate> = match rrule.freq {
            Freq::Daily => {
                let d = wall_start.date() + Days::new(period_index * rrule.interval as u64);
                if matches_simple_filters(rrule, d) { vec![d] } else { Vec::new() }
            }
            Freq::Weekly if !rrule.byday.is_empty() => {
                let week_start = start_of_week(wall_start.date(), rrule.wkst);
                let block_start = week_start + Days::new(period_index * rrule.interval as u64 * 7);
                let mut days: Vec<NaiveDate> = rrule
                    .byday
                    .iter()
                    .map(|t| {
                        let target_idx = t.weekday.mon_index();
                        let wkst_idx = rrule.wkst.mon_index();
                        let offset = (target_idx + 7 - wkst_idx) % 7;
                        block_start + Days::new(offset as u64)
                    })
                    .collect();
                days.sort();
                days
            }
            Freq::Weekly => {
                let d = wall_start.date() + Days::new(period_index * rrule.interval as u64 * 7);
                vec![d]
            }
            Freq::Monthly => {
                let (y, m) = shift_year_month(
                    wall_start.date().year(),
                    wall_start.date().month(),
                    period_index as i32 * rrule.interval as i32,
                );
                candidates_for_period(rrule, y, m, wall_start.date().day(), Freq::Monthly)
            }
            Freq::Yearly => {
                let year = wall_start.date().year() + (period_index as i32 * rrule.interval as i32);
                candidates_for_period(
                    rrule,
                    year,
                    wall_start.date().month(),
                    wall_start.date().day(),
                    Freq::Yearly,
                )
            }
        };

        if candidate_dates.is_empty() {
            period_index += 1;
            continue;
        }

        for date in candidate_dates {
            if date < wall_start.date() {
                continue;
            }
            let wall = NaiveDateTime::new(date, time0);

            if let Some(until) = &rrule.until {
                let exceeded = match until {
                    Until::Date(d) => date > *d,
                    Until::DateTime(dt) => wall > *dt,
                    Until::Instant(instant) => wall_to_utc(wall, anchor) > *instant,
                };
                if exceeded {
                    break 'outer;
                }
            }

            matched_count += 1;

            let utc = wall_to_utc(wall, anchor);
            if utc >= range_end {
                break 'outer;
            }

            let key = compact_key(date, time0, date_only);
            if utc >= range_start && !exdate_keys.contains(&key) {
                results.push(wall_to_value(wall, anchor, date_only, tzname.as_deref()));
            }

            if let Some(count) = rrule.count
                && matched_count >= count
            {
                break 'outer;
            }
        }

        period_index += 1;
    }

    results
}

fn compact_key(date: NaiveDate, time: NaiveTime, date_only: bool) -> String {
    if date_only {
        date.format("%Y%m%d").to_string()
    } else {
        let naive = NaiveDateTime::new(date, time);
        exdate_raw_key(&naive.format("%Y%m%dT%H%M%S").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rrule::grammar::parse_rrule;
    use chrono::TimeZone;

    fn range(start: (i32, u32, u32), end: (i32, u32, u32)) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(start.0, start.1, start.2, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(end.0, end.1, end.2, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn weekly_byday_count_expands_three_mondays() {
        let dtstart = DateTimeValue::Zoned(
            NaiveDate::from_ymd_opt(2026, 1, 5)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            "Europe/Berlin".to_string(),
        );
        let rrule = parse_rrule("FREQ=WEEKLY;BYDAY=MO;COUNT=3").unwrap();
        let (start, end) = range((2026, 1, 1), (2026, 2, 1));
        let out = expand(&dtstart, &rrule, &Default::default(), start, end);
        assert_eq!(out.len(), 3);
        let keys: Vec<String> = out.iter().map(|v| v.exdate_key()).collect();
        assert_eq!(keys, vec!["20260105T090000", "20260112T090000", "20260119T090000"]);
    }

    #[test]
    fn exdate_excludes_a_matched_slot_without_replacing_it() {
        let dtstart = DateTimeValue::Zoned(
            NaiveDate::from_ymd_opt(2026, 1, 5)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            "Europe/Berlin".to_string(),
        );
        let rrule = parse_rrule("FREQ=WEEKLY;BYDAY=MO;COUNT=3").unwrap();
        let mut exdates = std::collections::HashSet::new();
        exdates.insert("20260112T090000".to_string());
        let (start, end) = range((2026, 1, 1), (2026, 2, 1));
        let out = expand(&dtstart, &rrule, &exdates, start, end);
        let keys: Vec<String> = out.iter().map(|v| v.exdate_key()).collect();
        assert_eq!(keys, vec!["20260105T090000", "20260119T090000"]);
    }

    #[test]
    fn daily_interval_steps_by_two_days() {
        let dtstart = DateTimeValue::Utc(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let rrule = parse_rrule("FREQ=DAILY;INTERVAL=2;COUNT=4").unwrap();
        let (start, end) = range((2026, 3, 1), (2026, 3, 10));
        let out = expand(&dtstart, &rrule, &Default::default(), start, end);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn monthly_ordinal_byday_last_friday() {
        let dtstart = DateTimeValue::Utc(Utc.with_ymd_and_hms(2026, 1, 30, 17, 0, 0).unwrap());
        let rrule = parse_rrule("FREQ=MONTHLY;BYDAY=-1FR;COUNT=3").unwrap();
        let (start, end) = range((2026, 1, 1), (2026, 5, 1));
        let out = expand(&dtstart, &rrule, &Default::default(), start, end);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn until_terminates_before_range_end() {
        let dtstart = DateTimeValue::Utc(Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap());
        let rrule = parse_rrule("FREQ=DAILY;UNTIL=20260103T090000Z").unwrap();
        let (start, end) = range((2026, 1, 1), (2026, 1, 10));
        let out = expand(&dtstart, &rrule, &Default::default(), start, end);
        assert_eq!(out.len(), 3);
    }
}
