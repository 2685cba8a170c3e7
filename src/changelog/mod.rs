//! Change-log subsystem: the record format, the writer a master appends
//! to, the N-way merger used when loading multiple rotated files at
//! startup, and the restore engine that replays records into a
//! [`crate::namespace::Namespace`] (spec §4).

pub mod merger;
pub mod opcodes;
pub mod restore;
pub mod writer;

pub use merger::{merge, Stream};
pub use opcodes::{Arg, Record};
pub use restore::{ChecksumPolicy, Restorer};
pub use writer::{rotate_files, ChangelogWriter};

/// Default `BACK_LOGS` value: how many rotated changelog generations a
/// master keeps on disk (spec §4.2).
pub const DEFAULT_BACK_LOGS: u32 = 50;

/// Default `MATOML_LOG_PRESERVE_SECONDS`: how long a record stays in the
/// in-memory replay ring before a catching-up shadow must fall back to a
/// full metadata download (spec §4.2).
pub const DEFAULT_PRESERVE_SECONDS: u64 = 600;

/// Default `max_id_hole` the merger tolerates before declaring the log set
/// unrecoverable (spec §4.4).
pub const DEFAULT_MAX_ID_HOLE: u64 = 10_000;
