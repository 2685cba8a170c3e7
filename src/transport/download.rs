//! Download sub-protocol multiplexed on the master↔shadow connection (spec
//! §4.5): `DOWNLOAD_START{fileid}` → size, then `DOWNLOAD_DATA{offset,len}`
//! requests answered with CRC-verified `DATA` blocks written into a `.tmp`
//! file, finally renamed into place.
//!
//! CRC32 verification uses `crc32fast`, the same crate the
//! `proxmox-proxmox-backup` example repo reaches for around its own
//! chunk-integrity checks (`src/tools/zip.rs`) rather than hand-rolling a
//! CRC table — this crate's dependency stack otherwise has nothing that
//! computes one.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::changelog::rotate_files;
use crate::error::Status;

/// One of the four files a shadow must download to catch up from scratch
/// (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileId {
    Metadata,
    Sessions,
    Changelog0,
    Changelog1,
}

/// Largest `DOWNLOAD_DATA` request size (spec §4.5 "≤ 1 MB each").
pub const MAX_CHUNK_LEN: u32 = 1_048_576;

/// Retries allowed for one offset before the whole download is abandoned
/// (spec §4.5 "up to 5 times").
pub const MAX_RETRIES: u32 = 5;

/// Shadow-side state for downloading one file into a temporary path next
/// to its final destination.
pub struct DownloadSession {
    file_id: FileId,
    size: u64,
    written: u64,
    retries: u32,
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: File,
}

impl DownloadSession {
    /// Opens (truncating) the `.tmp` file a `DOWNLOAD_START{fileid}` reply
    /// of `size` bytes will be written into.
    pub fn start(file_id: FileId, size: u64, final_path: PathBuf) -> Result<Self, Status> {
        let tmp_path = tmp_path_for(&final_path);
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
        Ok(Self { file_id, size, written: 0, retries: 0, tmp_path, final_path, file })
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn is_complete(&self) -> bool {
        self.written >= self.size
    }

    /// Next `DOWNLOAD_DATA{offset, len}` to issue, or `None` once every
    /// byte has been received.
    pub fn next_request(&self) -> Option<(u64, u32)> {
        if self.is_complete() {
            return None;
        }
        let remaining = self.size - self.written;
        Some((self.written, remaining.min(MAX_CHUNK_LEN as u64) as u32))
    }

    /// Processes a `DATA{offset, len, crc32, bytes}` reply. A CRC mismatch
    /// (or a length mismatch) counts as a failed attempt at the current
    /// offset; re-requesting past [`MAX_RETRIES`] fails the whole session.
    pub fn accept_data(&mut self, offset: u64, crc32: u32, bytes: &[u8]) -> Result<(), Status> {
        if offset != self.written {
            return Err(Status::WrongSizeOrOffset);
        }
        if crc32fast::hash(bytes) != crc32 {
            self.retries += 1;
            if self.retries > MAX_RETRIES {
                return Err(Status::Crc);
            }
            return Err(Status::Delayed);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.written += bytes.len() as u64;
        self.retries = 0;
        Ok(())
    }

    /// Atomically renames the completed `.tmp` file into place, rotating
    /// any previous copy aside first via the same cascade the changelog
    /// writer uses for its own backups.
    pub fn finish(mut self, keep_backups: u32) -> Result<(), Status> {
        if !self.is_complete() {
            return Err(Status::Invalid);
        }
        self.file.flush()?;
        if self.final_path.exists() {
            rotate_files(&self.final_path, keep_backups);
        }
        std::fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(())
    }
}

fn tmp_path_for(final_path: &Path) -> PathBuf {
    let mut s = final_path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Master-side: produces the `DATA{offset, len, crc32, bytes}` reply for
/// one `DOWNLOAD_DATA` request against an already-open source file.
pub fn read_data_block(source: &mut File, offset: u64, len: u32) -> Result<(u32, Vec<u8>), Status> {
    source.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    source.read_exact(&mut buf)?;
    let crc = crc32fast::hash(&buf);
    Ok((crc, buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downloads_a_file_across_several_chunks_and_renames_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("source.bin");
        let data = vec![7u8; (MAX_CHUNK_LEN as usize) + 10];
        std::fs::write(&source_path, &data).unwrap();

        let final_path = dir.path().join("metadata.mfs");
        let mut session = DownloadSession::start(FileId::Metadata, data.len() as u64, final_path.clone()).unwrap();

        let mut source = File::open(&source_path).unwrap();
        while let Some((offset, len)) = session.next_request() {
            let (crc, bytes) = read_data_block(&mut source, offset, len).unwrap();
            session.accept_data(offset, crc, &bytes).unwrap();
        }

        assert!(session.is_complete());
        session.finish(3).unwrap();
        assert_eq!(std::fs::read(&final_path).unwrap(), data);
    }

    #[test]
    fn crc_mismatch_is_retried_without_advancing() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("sessions.mfs");
        let mut session = DownloadSession::start(FileId::Sessions, 4, final_path).unwrap();

        let err = session.accept_data(0, 0xDEAD_BEEF, b"data").unwrap_err();
        assert_eq!(err, Status::Delayed);
        assert_eq!(session.next_request(), Some((0, 4)));

        let good_crc = crc32fast::hash(b"data");
        session.accept_data(0, good_crc, b"data").unwrap();
        assert!(session.is_complete());
    }

    #[test]
    fn exhausting_retries_fails_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("changelog.0.mfs");
        let mut session = DownloadSession::start(FileId::Changelog0, 4, final_path).unwrap();
        for _ in 0..MAX_RETRIES {
            assert_eq!(session.accept_data(0, 0, b"data").unwrap_err(), Status::Delayed);
        }
        assert_eq!(session.accept_data(0, 0, b"data").unwrap_err(), Status::Crc);
    }

    #[test]
    fn finishing_before_complete_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("changelog.1.mfs");
        let session = DownloadSession::start(FileId::Changelog1, 10, final_path).unwrap();
        assert_eq!(session.finish(1).unwrap_err(), Status::Invalid);
    }
}
