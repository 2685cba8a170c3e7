//! Status code taxonomy shared by every subsystem (spec §7).
//!
//! A flat, documented, `Copy` enum in the style of a POSIX-ish file error
//! set, generalized to the full set of failure kinds the metadata/chunk
//! core can report.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Status>;

/// Every kind of failure the core can report, across namespace mutation,
/// chunk operations, replication, and changelog replay.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// Caller lacks permission for the requested operation.
    Permission,
    /// The named node, chunk, or chunk-server entry does not exist.
    NotFound,
    /// An object with that name/id already exists.
    Exists,
    /// A directory that must be empty (for remove/rmdir) is not.
    NotEmpty,
    /// Malformed argument, out-of-range value, or structurally invalid request.
    Invalid,
    /// Local I/O failure (disk read/write/fsync).
    IO,
    /// CRC or checksum mismatch on a transferred block.
    Crc,
    /// No space left to satisfy the request.
    OutOfSpace,
    /// Version supplied does not match the expected monotonic version.
    WrongVersion,
    /// Size, offset, or block-number argument out of range.
    WrongSizeOrOffset,
    /// Object is locked (write session, file lock) and cannot be mutated.
    Locked,
    /// Chunk has no remaining valid copies.
    ChunkLost,
    /// Chunk has an operation already in flight; retry later.
    ChunkBusy,
    /// No chunk servers are available to satisfy placement.
    NoChunkServers,
    /// Session id unknown or expired.
    BadSessionId,
    /// Authentication failed.
    BadPassword,
    /// Incremental namespace checksum does not match the expected value.
    MetadataChecksumMismatch,
    /// A changelog record's version does not follow the expected sequence.
    ChangelogInconsistent,
    /// Filesystem version after replay did not match the record's declared version.
    MetadataVersionMismatch,
    /// Operation should be retried later; not a permanent failure.
    Delayed,
    /// Operation is already in progress.
    Waiting,
    /// Operation exceeded its deadline.
    Timeout,
    /// Quota limit would be exceeded.
    Quota,
    /// Target is read-only.
    ReadOnly,
    /// Operation/feature is not supported by this build or goal.
    NotSupported,
    /// Requested range exceeds the protocol's maximum.
    RangeTooLarge,
}

impl Status {
    /// Stable numeric code, ordered the way `lizardfs_error_codes.h` orders
    /// its `LIZARDFS_ERROR_*` table (adapted, not copied verbatim).
    pub const fn code(self) -> u8 {
        match self {
            Status::Permission => 1,
            Status::NotFound => 2,
            Status::Exists => 3,
            Status::NotEmpty => 4,
            Status::Invalid => 5,
            Status::IO => 6,
            Status::Crc => 7,
            Status::OutOfSpace => 8,
            Status::WrongVersion => 9,
            Status::WrongSizeOrOffset => 10,
            Status::Locked => 11,
            Status::ChunkLost => 12,
            Status::ChunkBusy => 13,
            Status::NoChunkServers => 14,
            Status::BadSessionId => 15,
            Status::BadPassword => 16,
            Status::MetadataChecksumMismatch => 17,
            Status::ChangelogInconsistent => 18,
            Status::MetadataVersionMismatch => 19,
            Status::Delayed => 20,
            Status::Waiting => 21,
            Status::Timeout => 22,
            Status::Quota => 23,
            Status::ReadOnly => 24,
            Status::NotSupported => 25,
            Status::RangeTooLarge => 26,
        }
    }

    /// Whether a caller should retry the same operation after a delay,
    /// as opposed to treating the failure as permanent.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Status::Delayed | Status::Waiting | Status::ChunkBusy | Status::Timeout)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Permission => "permission denied",
            Status::NotFound => "not found",
            Status::Exists => "already exists",
            Status::NotEmpty => "directory not empty",
            Status::Invalid => "invalid argument",
            Status::IO => "i/o error",
            Status::Crc => "checksum mismatch",
            Status::OutOfSpace => "out of space",
            Status::WrongVersion => "wrong version",
            Status::WrongSizeOrOffset => "wrong size or offset",
            Status::Locked => "locked",
            Status::ChunkLost => "chunk lost",
            Status::ChunkBusy => "chunk busy",
            Status::NoChunkServers => "no chunk servers",
            Status::BadSessionId => "bad session id",
            Status::BadPassword => "bad password",
            Status::MetadataChecksumMismatch => "metadata checksum mismatch",
            Status::ChangelogInconsistent => "changelog inconsistent",
            Status::MetadataVersionMismatch => "metadata version mismatch",
            Status::Delayed => "delayed, retry later",
            Status::Waiting => "operation in progress",
            Status::Timeout => "timeout",
            Status::Quota => "quota exceeded",
            Status::ReadOnly => "read-only filesystem",
            Status::NotSupported => "not supported",
            Status::RangeTooLarge => "range too large",
        };
        f.write_str(text)
    }
}

impl std::error::Error for Status {}

impl From<std::io::Error> for Status {
    fn from(_: std::io::Error) -> Self {
        Status::IO
    }
}
