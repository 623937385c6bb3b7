//! Best-effort VTIMEZONE fetch/synthesis for newly created events.
//!
//! A network fetch from a public VTIMEZONE mirror is tried first; if
//! it is unreachable, a minimal fixed-offset `VTIMEZONE` is synthesised
//! from `chrono-tz`'s offset for the zone *at the moment of creation*.
//! This is DST-incorrect for future instants but keeps the resource
//! importable by every CalDAV server.

use bytes::Bytes;
use chrono::{DateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use http_body_util::{BodyExt, Empty};
use hyper::Request;
use std::time::Duration;
use tokio::time::timeout;

use crate::common::http::{HyperClient, build_hyper_client};

/// Public VTIMEZONE mirror used by several open-source CalDAV clients.
const TZURL_MIRROR_BASE: &str = "https://www.tzurl.org/zoneinfo-outlook";

/// Resolve a VTIMEZONE block for `tzid`, preferring a network fetch
/// and falling back to synthesis. Returns `None` if `tzid` does not
/// parse as a known IANA zone.
pub async fn resolve_vtimezone(tzid: &str, now: DateTime<Utc>) -> Option<String> {
    let tz: Tz = tzid.parse().ok()?;
    if let Some(fetched) = fetch_vtimezone(tzid).await {
        return Some(fetched);
    }
    Some(synthesize_fixed_offset(tzid, tz, now))
}

async fn fetch_vtimezone(tzid: &str) -> Option<String> {
    let client: HyperClient = build_hyper_client().ok()?;
    let url = format!("{TZURL_MIRROR_BASE}/{tzid}.ics");
    let uri: hyper::Uri = url.parse().ok()?;
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .ok()?;

    let resp = timeout(Duration::from_secs(5), client.request(req)).await.ok()?.ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let body = resp.into_body().collect().await.ok()?.to_bytes();
    let text = String::from_utf8(body.to_vec()).ok()?;
    extract_vtimezone_block(&text)
}

fn extract_vtimezone_block(ics: &str) -> Option<String> {
    let start = ics.find("BEGIN:VTIMEZONE")?;
    let end = ics.find("END:VTIMEZONE")? + "END:VTIMEZONE".len();
    Some(ics[start..end].trim().replace('\n', "\r\n"))
}

/// A single `STANDARD` sub-component carrying the zone's UTC offset at
/// `now`, with no DST rule — a correctness tradeoff for when the
/// network mirror is unreachable.
fn synthesize_fixed_offset(tzid: &str, tz: Tz, now: DateTime<Utc>) -> String {
    let local = now.with_timezone(&tz);
    let offset_seconds = local.offset().fix().local_minus_utc();
    let sign = if offset_seconds < 0 { '-' } else { '+' };
    let abs = offset_seconds.unsigned_abs();
    let hh = abs / 3600;
    let mm = (abs % 3600) / 60;
    let offset_str = format!("{sign}{hh:02}{mm:02}");

    format!(
        "BEGIN:VTIMEZONE\r\nTZID:{tzid}\r\nBEGIN:STANDARD\r\nDTSTART:19700101T000000\r\nTZOFFSETFROM:{offset_str}\r\nTZOFFSETTO:{offset_str}\r\nTZNAME:{tzid}\r\nEND:STANDARD\r\nEND:VTIMEZONE",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn synthesizes_fixed_offset_block() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let block = synthesize_fixed_offset("Europe/Berlin", chrono_tz::Europe::Berlin, now);
        assert!(block.contains("TZID:Europe/Berlin"));
        assert!(block.contains("TZOFFSETFROM:+0100"));
        assert!(block.starts_with("BEGIN:VTIMEZONE"));
        assert!(block.ends_with("END:VTIMEZONE"));
    }

    #[test]
    fn extracts_vtimezone_from_full_calendar() {
        let ics = "BEGIN:VCALENDAR\r\nBEGIN:VTIMEZONE\r\nTZID:Europe/Berlin\r\nEND:VTIMEZONE\r\nBEGIN:VEVENT\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let block = extract_vtimezone_block(ics).unwrap();
        assert_eq!(block, "BEGIN:VTIMEZONE\r\nTZID:Europe/Berlin\r\nEND:VTIMEZONE");
    }
}
