//! Error taxonomy for the calendar engine.
//!
//! Plumbing-level failures (I/O, HTTP transport, XML/SQL driver errors)
//! propagate as [`anyhow::Error`]; once a CalDAV response has been
//! classified, call sites convert it into a [`CoreError`] variant so the
//! sync orchestrator can branch on conflict kind without downcasting.

use thiserror::Error;

/// Classified failure kinds surfaced across the CalDAV/sync boundary.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Connection refused, timeout, TLS failure, DNS failure, or abort.
    /// Treated as an offline signal on push and a non-fatal per-phase
    /// failure on pull.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// Non-successful HTTP response with a classifiable status that is
    /// not one of the conflict kinds below.
    #[error("server returned {status}: {detail}")]
    ProtocolStatus { status: u16, detail: String },

    /// 412 Precondition Failed: the server's copy of the resource has
    /// moved on. Recoverable via refetch + rebuild + retry.
    #[error("etag conflict at {href}")]
    ConflictEtag { href: String },

    /// 409/403 carrying the `no-uid-conflict` precondition (RFC 4791
    /// §5.3.2): the UID already lives at a different href.
    #[error("uid conflict for {uid}, server suggests {existing_href:?}")]
    ConflictUid {
        uid: String,
        existing_href: Option<String>,
    },

    /// Malformed XML or ICS. Logged per resource; the sync cycle
    /// continues with other resources.
    #[error("parse error: {0}")]
    Parse(String),

    /// Missing collaborator state: unknown account, unknown calendar.
    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl CoreError {
    pub fn is_recoverable_conflict(&self) -> bool {
        matches!(self, CoreError::ConflictEtag { .. } | CoreError::ConflictUid { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, CoreError::Transport(_))
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
