//! The principal / home-set / calendar-list discovery chain.

use anyhow::Result;

use crate::caldav::client::CalDavClient;
use crate::caldav::types::{CalendarInfo, Depth};
use crate::caldav::streaming::parse_multistatus_bytes;

const CANDIDATE_SUFFIXES: &[&str] = &[".well-known/caldav", "dav", "remote.php/dav"];

/// One fully discovered calendar home: the principal's home-set URL
/// and every calendar collection found under it.
pub struct DiscoveredHome {
    pub home_set_url: String,
    pub calendars: Vec<CalendarInfo>,
}

fn candidate_bases(base_url: &str) -> Vec<String> {
    let trimmed = base_url.trim_end_matches('/');
    let mut out = vec![base_url.to_string()];
    for suffix in CANDIDATE_SUFFIXES {
        out.push(format!("{trimmed}/{suffix}"));
    }
    out
}

/// PROPFIND depth=0 at each candidate base in turn; the first that
/// yields a `current-user-principal` wins. Returns the winning client
/// (rooted at that base) and the discovered principal.
pub async fn discover_principal(
    base_url: &str,
    basic_user: Option<&str>,
    basic_pass: Option<&str>,
) -> Result<Option<(CalDavClient, String)>> {
    for candidate in candidate_bases(base_url) {
        let client = match CalDavClient::new(&candidate, basic_user, basic_pass) {
            Ok(c) => c,
            Err(_) => continue,
        };
        match client.discover_current_user_principal().await {
            Ok(Some(principal)) => return Ok(Some((client, principal))),
            _ => continue,
        }
    }
    Ok(None)
}

/// Home-set PROPFIND at the principal, then a depth=1 PROPFIND at each
/// home collecting calendar collections.
/// `client` must be rooted at the same scheme+host as `principal`.
pub async fn discover_home(client: &CalDavClient, principal: &str) -> Result<Vec<DiscoveredHome>> {
    let homes = client.discover_calendar_home_set(principal).await?;
    let mut out = Vec::with_capacity(homes.len());
    for home in homes {
        let calendars = client.list_calendars(&home).await.unwrap_or_default();
        out.push(DiscoveredHome { home_set_url: home, calendars });
    }
    Ok(out)
}

/// Extract a calendar's display color as `#RRGGBB`, preferring
/// `apple:calendar-color`, then `caldav:calendar-color`, then
/// `apple:calendar-order`, dropping any trailing alpha channel.
pub fn extract_color(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.len() >= 7 && raw.starts_with('#') {
        Some(raw[..7].to_string())
    } else if !raw.is_empty() {
        Some(raw.to_string())
    } else {
        None
    }
}

/// Query `{href -> etag}` for every `VEVENT` resource in a collection
/// (`listEtags`).
pub async fn list_etags(
    client: &CalDavClient,
    collection_url: &str,
) -> Result<std::collections::HashMap<String, String>> {
    let xml = crate::caldav::client::build_calendar_query_body("VEVENT", None, None, false);
    let resp = client.report(collection_url, Depth::One, &xml).await?;
    if !resp.status().is_success() {
        anyhow::bail!("REPORT calendar-query (listEtags) failed with {}", resp.status());
    }
    let body = resp.into_body();
    let mut map = std::collections::HashMap::new();
    for item in parse_multistatus_bytes(&body)? {
        if item.etag.is_some() {
            if let Some(etag) = item.etag {
                map.insert(item.href, etag);
            }
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_bases_include_well_known_and_dav() {
        let candidates = candidate_bases("https://cal.example.com/user/");
        assert_eq!(
            candidates,
            vec![
                "https://cal.example.com/user/".to_string(),
                "https://cal.example.com/user/.well-known/caldav".to_string(),
                "https://cal.example.com/user/dav".to_string(),
                "https://cal.example.com/user/remote.php/dav".to_string(),
            ]
        );
    }

    #[test]
    fn extract_color_strips_alpha() {
        assert_eq!(extract_color(Some("#FF0000FF")), Some("#FF0000".to_string()));
        assert_eq!(extract_color(Some("#00FF00")), Some("#00FF00".to_string()));
        assert_eq!(extract_color(None), None);
    }
}
