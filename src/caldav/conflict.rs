//! Classify PUT/DELETE outcomes into the conflict sum type the sync
//! orchestrator's retry loop branches on.

use bytes::Bytes;
use hyper::Response;

use crate::error::CoreError;

/// RFC 4781 §5.3.2 precondition token for a UID collision.
const NO_UID_CONFLICT_TOKEN: &str = "no-uid-conflict";

#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Success { etag: Option<String>, location: Option<String> },
}

/// Inspect a PUT response and classify it:
/// - 412 -> `ConflictEtag`
/// - 409/403 carrying `no-uid-conflict` -> `ConflictUid`, with the
///   server-supplied `DAV:href` if present in the body
/// - other non-2xx -> `ProtocolStatus`
/// - 2xx -> `Success`
pub fn classify_put(resp: &Response<Bytes>, href: &str) -> Result<WriteOutcome, CoreError> {
    let status = resp.status();
    if status.is_success() {
        let etag = resp
            .headers()
            .get(hyper::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string());
        let location = resp
            .headers()
            .get(hyper::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        return Ok(WriteOutcome::Success { etag, location });
    }

    if status.as_u16() == 412 {
        return Err(CoreError::ConflictEtag { href: href.to_string() });
    }

    if matches!(status.as_u16(), 409 | 403) {
        let body = String::from_utf8_lossy(resp.body());
        if body.contains(NO_UID_CONFLICT_TOKEN) {
            let existing_href = extract_first_href(&body);
            return Err(CoreError::ConflictUid {
                uid: href.to_string(),
                existing_href,
            });
        }
    }

    Err(CoreError::ProtocolStatus {
        status: status.as_u16(),
        detail: String::from_utf8_lossy(resp.body()).to_string(),
    })
}

/// A DELETE succeeds (including a 404, treated as "already gone") or
/// reports an ETag conflict.
pub fn classify_delete(resp: &Response<Bytes>, href: &str) -> Result<(), CoreError> {
    let status = resp.status();
    if status.is_success() || status.as_u16() == 404 {
        return Ok(());
    }
    if status.as_u16() == 412 {
        return Err(CoreError::ConflictEtag { href: href.to_string() });
    }
    Err(CoreError::ProtocolStatus {
        status: status.as_u16(),
        detail: String::from_utf8_lossy(resp.body()).to_string(),
    })
}

fn extract_first_href(xml: &str) -> Option<String> {
    let start = xml.find("<D:href>").or_else(|| xml.find("<d:href>"))?;
    let rest = &xml[start..];
    let open_end = rest.find('>')? + 1;
    let close = rest.find("</")?;
    Some(rest[open_end..close].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::{Response, StatusCode};

    fn resp(status: u16, body: &str) -> Response<Bytes> {
        Response::builder()
            .status(StatusCode::from_u16(status).unwrap())
            .body(Bytes::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn classifies_412_as_etag_conflict() {
        let r = resp(412, "");
        assert!(matches!(classify_put(&r, "/h").unwrap_err(), CoreError::ConflictEtag { .. }));
    }

    #[test]
    fn classifies_409_with_token_as_uid_conflict() {
        let body = r#"<D:error xmlns:D="DAV:"><C:no-uid-conflict xmlns:C="urn:ietf:params:xml:ns:caldav"><D:href>/cal/existing.ics</D:href></C:no-uid-conflict></D:error>"#;
        let r = resp(409, body);
        match classify_put(&r, "/h").unwrap_err() {
            CoreError::ConflictUid { existing_href, .. } => {
                assert_eq!(existing_href.as_deref(), Some("/cal/existing.ics"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn delete_404_is_treated_as_success() {
        let r = resp(404, "");
        assert!(classify_delete(&r, "/h").is_ok());
    }
}
