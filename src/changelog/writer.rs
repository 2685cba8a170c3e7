//! Durable, append-only change-log writer with rotation and an in-memory
//! replay ring (spec §4.2).
//!
//! Grounded in `src/master/changelog.cc`: the log file is opened lazily in
//! append mode, flushed after every record when configured to, and rotated
//! by cascading `name -> name.1 -> name.2 -> ...` via the same scheme as
//! `common/rotate_files.cc`. The in-memory ring used to replay to a catching
//! -up shadow without a full image download is implemented with
//! `moka::sync::Cache`'s time-to-live eviction, matching its
//! `MATOML_LOG_PRESERVE_SECONDS` semantics directly instead of hand-rolling
//! a ring buffer.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use moka::sync::Cache;

use crate::error::{Result, Status};

/// Cascades `path -> path.1 -> path.2 -> ... -> path.N`, dropping the
/// oldest generation. Shared by changelog rotation and metadata-image
/// backup rotation (spec §9 grounding note 4).
pub fn rotate_files(path: &Path, keep: u32) {
    if keep == 0 {
        let _ = std::fs::remove_file(path);
        return;
    }
    for gen in (1..keep).rev() {
        let from = numbered(path, gen);
        let to = numbered(path, gen + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(path, numbered(path, 1));
}

fn numbered(path: &Path, gen: u32) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(format!(".{gen}"));
    PathBuf::from(s)
}

/// Appends formatted change-log records to `changelog.N`, rotating on
/// demand, and keeps a bounded-by-time ring of recent records for shadow
/// replay.
pub struct ChangelogWriter {
    path: PathBuf,
    back_logs: u32,
    fsync_every_record: bool,
    file: Option<File>,
    last_version: Option<u64>,
    ring: Cache<u64, String>,
}

impl ChangelogWriter {
    /// `preserve_seconds` bounds how long a record stays replayable from
    /// the ring (`MATOML_LOG_PRESERVE_SECONDS`).
    pub fn new(path: PathBuf, back_logs: u32, fsync_every_record: bool, preserve_seconds: u64) -> Self {
        let ring = Cache::builder().time_to_live(Duration::from_secs(preserve_seconds)).build();
        Self { path, back_logs, fsync_every_record, file: None, last_version: None, ring }
    }

    /// Appends one record. Must be called with `version == last_version + 1`
    /// (or `1` for the first record ever appended).
    pub fn append(&mut self, version: u64, formatted_record: &str) -> Result<()> {
        if let Some(last) = self.last_version {
            if version != last + 1 {
                return Err(Status::ChangelogInconsistent);
            }
        }

        if self.file.is_none() {
            self.file = Some(
                OpenOptions::new().create(true).append(true).open(&self.path).map_err(|_| Status::IO)?,
            );
        }

        let file = self.file.as_mut().expect("just opened above");
        writeln!(file, "{version}: {formatted_record}").map_err(|_| Status::IO)?;
        if self.fsync_every_record {
            file.sync_all().map_err(|_| Status::IO)?;
        }

        self.ring.insert(version, formatted_record.to_owned());
        self.last_version = Some(version);
        Ok(())
    }

    /// Flushes the open file (if any) without closing it.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush().map_err(|_| Status::IO)?;
        }
        Ok(())
    }

    /// Flushes and closes the current log, cascading rotation up to
    /// `BACK_LOGS` generations.
    pub fn rotate(&mut self) -> Result<()> {
        self.flush()?;
        self.file = None;
        rotate_files(&self.path, self.back_logs);
        Ok(())
    }

    /// Returns the formatted record for `version` if it is still in the
    /// replay ring, allowing catch-up without a download.
    pub fn replay(&self, version: u64) -> Option<String> {
        self.ring.get(&version)
    }

    /// Attempts to replay every version in `[from, to]` inclusive; returns
    /// `None` (forcing a download) if any version has already aged out.
    pub fn replay_range(&self, from: u64, to: u64) -> Option<Vec<(u64, String)>> {
        let mut out = Vec::with_capacity((to.saturating_sub(from) + 1) as usize);
        for v in from..=to {
            out.push((v, self.replay(v)?));
        }
        Some(out)
    }

    pub fn last_version(&self) -> Option<u64> {
        self.last_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_enforces_monotonic_versions() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ChangelogWriter::new(dir.path().join("changelog.mfs"), 5, false, 3600);
        w.append(1, "0|CREATE(1,a,f,0644,0,0,0):2").unwrap();
        assert_eq!(w.append(3, "0|UNLINK(1,a):2").unwrap_err(), Status::ChangelogInconsistent);
        w.append(2, "0|UNLINK(1,a):2").unwrap();
        assert_eq!(w.last_version(), Some(2));
    }

    #[test]
    fn replay_ring_serves_recent_versions() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ChangelogWriter::new(dir.path().join("changelog.mfs"), 5, false, 3600);
        w.append(1, "rec-1").unwrap();
        w.append(2, "rec-2").unwrap();
        assert_eq!(w.replay(1), Some("rec-1".to_owned()));
        assert_eq!(w.replay_range(1, 2), Some(vec![(1, "rec-1".to_owned()), (2, "rec-2".to_owned())]));
        assert_eq!(w.replay(99), None);
    }

    #[test]
    fn rotate_cascades_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changelog.mfs");
        let mut w = ChangelogWriter::new(path.clone(), 3, false, 3600);
        w.append(1, "rec-1").unwrap();
        w.rotate().unwrap();
        assert!(path.with_extension("mfs.1").exists() || dir.path().join("changelog.mfs.1").exists());

        w.append(2, "rec-2").unwrap();
        w.rotate().unwrap();
        assert!(dir.path().join("changelog.mfs.2").exists());
        assert!(dir.path().join("changelog.mfs.1").exists());
    }
}
