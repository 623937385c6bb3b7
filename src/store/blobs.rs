//! Filesystem storage for raw ICS blobs. A single blob is the source
//! of truth for an entire calendar-object resource; a master and its
//! same-resource overrides share one path.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Replace filesystem-reserved characters with `_`.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// `{uid}[__{recurrence_id}].ics`. `recurrence_id` is only used when
/// a distinct per-override copy is wanted; normally
/// master and overrides in the same resource share the master's path.
pub fn blob_path(dir: &Path, uid: &str, recurrence_id: Option<&str>) -> PathBuf {
    let name = match recurrence_id {
        Some(rid) if !rid.is_empty() => format!("{}__{}.ics", sanitize(uid), sanitize(rid)),
        _ => format!("{}.ics", sanitize(uid)),
    };
    dir.join(name)
}

pub fn write_blob(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating ICS blob directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("writing ICS blob {}", path.display()))
}

pub fn read_blob(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading ICS blob {}", path.display()))
}

/// Remove a blob if present; a missing file is not an error (the row
/// may already have been cleaned up).
pub fn remove_blob(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing ICS blob {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_reserved_characters() {
        let p = blob_path(Path::new("/tmp/ics"), "abc/def:ghi@host", None);
        assert_eq!(p.file_name().unwrap().to_str().unwrap(), "abc_def_ghi@host.ics");
    }

    #[test]
    fn override_path_includes_recurrence_id() {
        let p = blob_path(Path::new("/tmp/ics"), "u1", Some("20260112T090000Z"));
        assert_eq!(p.file_name().unwrap().to_str().unwrap(), "u1__20260112T090000Z.ics");
    }

    #[test]
    fn write_read_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = blob_path(dir.path(), "u1", None);
        write_blob(&path, "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n").unwrap();
        assert_eq!(read_blob(&path).unwrap(), "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n");
        remove_blob(&path).unwrap();
        assert!(!path.exists());
        // removing again is not an error
        remove_blob(&path).unwrap();
    }
}
