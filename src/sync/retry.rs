//! `updateWithRetry`: the bounded retry wrapper every PUT in the push
//! path runs through. Branches on the sum type produced by
//! [`crate::caldav::conflict::classify_put`] instead of exception-style
//! control flow.

use bytes::Bytes;
use hyper::{HeaderMap, Method, header};

use crate::caldav::client::CalDavClient;
use crate::caldav::conflict::{WriteOutcome, classify_put};
use crate::error::CoreError;

const MAX_ATTEMPTS: usize = 3;

/// Outcome of a successful (possibly retried) write.
pub struct RetriedWrite {
    /// The href the write ultimately landed at (may differ from the
    /// href passed in, after a UIDCONFLICT retarget).
    pub href: String,
    pub etag: Option<String>,
    /// The exact ICS text that was accepted by the server.
    pub ics: String,
}

fn if_match_star() -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(header::IF_MATCH, header::HeaderValue::from_static("*"));
    h
}

async fn put(client: &CalDavClient, href: &str, etag: Option<&str>, body: &str) -> Result<hyper::Response<Bytes>, CoreError> {
    let bytes = Bytes::from(body.to_string());
    let result = match etag {
        Some(e) if !e.is_empty() => client.put_if_match(href, bytes, e).await,
        _ => client.send(Method::PUT, href, if_match_star(), Some(bytes), None).await,
    };
    result.map_err(CoreError::Transport)
}

/// PUT `ics_body` to `href` guarded by `etag`. On a 412 (stale ETag)
/// or a UID conflict, refetch the resource that's actually there,
/// call `rebuild` (pure over the fetched ICS text) to re-derive the
/// desired document, and retry — bounded to three attempts total.
///
/// `fallback_href` is the canonical path to retry at when a UIDCONFLICT
/// carries no server-supplied `DAV:href`.
pub async fn update_with_retry(
    client: &CalDavClient,
    href: &str,
    fallback_href: &str,
    initial_etag: Option<String>,
    mut ics_body: String,
    rebuild: impl Fn(&str) -> String,
) -> Result<RetriedWrite, CoreError> {
    let mut current_href = href.to_string();
    let mut etag = initial_etag;

    for attempt in 0..MAX_ATTEMPTS {
        let resp = put(client, &current_href, etag.as_deref(), &ics_body).await?;
        match classify_put(&resp, &current_href) {
            Ok(WriteOutcome::Success { etag: new_etag, location }) => {
                return Ok(RetriedWrite {
                    href: location.unwrap_or(current_href),
                    etag: new_etag,
                    ics: ics_body,
                });
            }
            Err(CoreError::ConflictEtag { href: conflict_href }) => {
                if attempt + 1 >= MAX_ATTEMPTS {
                    return Err(CoreError::ConflictEtag { href: conflict_href });
                }
                let refetched = client.get(&current_href).await.map_err(CoreError::Transport)?;
                if !refetched.status().is_success() {
                    return Err(CoreError::ProtocolStatus {
                        status: refetched.status().as_u16(),
                        detail: "refetch after etag conflict failed".into(),
                    });
                }
                let server_etag = CalDavClient::etag_from_headers(refetched.headers());
                let server_ics = String::from_utf8_lossy(refetched.body()).to_string();
                ics_body = rebuild(&server_ics);
                etag = server_etag;
            }
            Err(CoreError::ConflictUid { uid, existing_href }) => {
                if attempt + 1 >= MAX_ATTEMPTS {
                    return Err(CoreError::ConflictUid { uid, existing_href });
                }
                current_href = existing_href.unwrap_or_else(|| fallback_href.to_string());
                let refetched = client.get(&current_href).await.map_err(CoreError::Transport)?;
                if refetched.status().is_success() {
                    let server_etag = CalDavClient::etag_from_headers(refetched.headers());
                    let server_ics = String::from_utf8_lossy(refetched.body()).to_string();
                    ics_body = rebuild(&server_ics);
                    etag = server_etag;
                } else {
                    etag = None;
                }
            }
            Err(other) => return Err(other),
        }
    }
    Err(CoreError::Precondition("updateWithRetry exhausted its attempt budget".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_match_star_is_well_formed() {
        let h = if_match_star();
        assert_eq!(h.get(header::IF_MATCH).unwrap(), "*");
    }
}
