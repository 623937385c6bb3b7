//! [`SyncProgress`]/[`SyncResult`], the collaborator surface for
//! observing a running sync, and the append-only `sync.log` writer.

use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::Path;

/// Which step of a sync cycle is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    NearTerm,
    FarFuture,
    RecentPast,
    CatchUp,
    OfflineReplay,
}

impl SyncPhase {
    pub fn label(self) -> &'static str {
        match self {
            SyncPhase::NearTerm => "near-term",
            SyncPhase::FarFuture => "far-future",
            SyncPhase::RecentPast => "recent-past",
            SyncPhase::CatchUp => "catch-up",
            SyncPhase::OfflineReplay => "offline-replay",
        }
    }
}

/// Emitted after every batch of stored events.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub done: usize,
    pub total: usize,
    pub collection_name: Option<String>,
    pub events_done: usize,
    pub events_total: usize,
}

/// Receives progress notifications from a running sync. The UI
/// collaborator implements this; view/UI code itself lives outside
/// this crate.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: SyncProgress);
}

/// A sink that drops every notification, for callers that don't need
/// live progress.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_progress(&self, _progress: SyncProgress) {}
}

/// Final result of a `triggerSync` cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn merge(&mut self, other: SyncResult) {
        self.added += other.added;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.errors.extend(other.errors);
    }
}

/// Append one UTC-timestamped summary line to `sync.log`. Logging
/// failures are non-fatal — callers should log and swallow any error
/// this returns rather than fail the sync cycle.
pub fn append_sync_log(path: &Path, at: DateTime<Utc>, result: &SyncResult) -> std::io::Result<()> {
    use std::io::Write;

    let mut line = format!(
        "{} added={} updated={} deleted={} errors={}",
        at.to_rfc3339(),
        result.added,
        result.updated,
        result.deleted,
        result.errors.len(),
    );
    for err in &result.errors {
        let _ = write!(line, " | {}", err.replace('\n', " "));
    }
    line.push('\n');

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn appends_one_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let result = SyncResult { added: 2, updated: 1, deleted: 0, errors: vec!["boom".into()] };
        append_sync_log(&path, at, &result).unwrap();
        append_sync_log(&path, at, &result).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("added=2"));
        assert!(text.contains("boom"));
    }
}
