//! N-way change-log merge (spec §4.4): combines several `changelog.N.mfs`
//! streams — produced by masters that held the role at different times —
//! into one gap-free sequence ordered by version.
//!
//! Grounded in `src/master/filesystem.cc`'s `fs_load_changelogs` merge
//! step, which keeps one read cursor per input file and always emits the
//! globally-lowest unread version next. We use a binary heap keyed by
//! `(Reverse(next_version), stream_index)` instead of the original's
//! linear rescan, which is the idiomatic Rust shape for this kind of
//! merge (`std::collections::BinaryHeap` + `Reverse`, as e.g. Rust's own
//! `k-way merge` examples do it).

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::changelog::opcodes::Record;
use crate::error::{Result, Status};

/// One input stream to merge: already-parsed records in ascending version
/// order, tagged with the file they came from for diagnostics.
pub struct Stream {
    pub source: String,
    records: Vec<Record>,
    cursor: usize,
}

impl Stream {
    pub fn new(source: impl Into<String>, records: Vec<Record>) -> Self {
        Self { source: source.into(), records, cursor: 0 }
    }

    fn peek(&self) -> Option<&Record> {
        self.records.get(self.cursor)
    }
}

#[derive(PartialEq, Eq)]
struct HeapEntry {
    version: u64,
    stream: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        Reverse(self.version).cmp(&Reverse(other.version)).then(self.stream.cmp(&other.stream))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges `streams` into one version-ordered sequence, emitted to
/// `sink(source, record)`. A duplicate version across streams (the normal
/// case at a rotation boundary, where the new master's first file repeats
/// the last few records the old master already wrote) keeps only the
/// first occurrence seen; the rest are dropped silently, matching the
/// downstream [`crate::changelog::restore::Restorer`] treating them as
/// stale anyway.
///
/// `max_id_hole` bounds how large a version gap between the lowest ready
/// record and the next stream's start can be before merging gives up and
/// reports [`Status::ChangelogInconsistent`] instead of waiting forever on
/// a stream that will never produce the missing versions (default 10,000,
/// per spec §4.4).
pub fn merge(mut streams: Vec<Stream>, max_id_hole: u64, mut sink: impl FnMut(&str, &Record)) -> Result<()> {
    let mut heap = BinaryHeap::new();
    for (i, s) in streams.iter().enumerate() {
        if let Some(rec) = s.peek() {
            heap.push(HeapEntry { version: rec.version, stream: i });
        }
    }

    let mut last_emitted: Option<u64> = None;
    while let Some(HeapEntry { version, stream }) = heap.pop() {
        if let Some(last) = last_emitted {
            if version > last + 1 && version - last > max_id_hole {
                return Err(Status::ChangelogInconsistent);
            }
        }

        let is_duplicate = last_emitted.map(|last| version <= last).unwrap_or(false);
        if !is_duplicate {
            let rec = streams[stream].peek().expect("heap entry implies a record").clone();
            sink(&streams[stream].source, &rec);
            last_emitted = Some(version);
        }

        streams[stream].cursor += 1;
        if let Some(next) = streams[stream].peek() {
            heap.push(HeapEntry { version: next.version, stream });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::opcodes::Arg;

    fn rec(version: u64, opcode: &str) -> Record {
        Record::new(version, 1_700_000_000, opcode, vec![Arg::U32(1)])
    }

    #[test]
    fn merges_two_streams_in_version_order() {
        let a = Stream::new("changelog.2.mfs", vec![rec(1, "CREATE"), rec(2, "UNLINK")]);
        let b = Stream::new("changelog.mfs", vec![rec(3, "CREATE"), rec(4, "UNLINK")]);
        let mut out = Vec::new();
        merge(vec![a, b], 10_000, |src, r| out.push((src.to_owned(), r.version))).unwrap();
        assert_eq!(out, vec![
            ("changelog.2.mfs".to_owned(), 1),
            ("changelog.2.mfs".to_owned(), 2),
            ("changelog.mfs".to_owned(), 3),
            ("changelog.mfs".to_owned(), 4),
        ]);
    }

    #[test]
    fn drops_overlapping_duplicate_versions() {
        // Rotation boundary: both streams carry version 2.
        let a = Stream::new("old", vec![rec(1, "CREATE"), rec(2, "UNLINK")]);
        let b = Stream::new("new", vec![rec(2, "UNLINK"), rec(3, "CREATE")]);
        let mut out = Vec::new();
        merge(vec![a, b], 10_000, |src, r| out.push((src.to_owned(), r.version))).unwrap();
        assert_eq!(out, vec![("old".to_owned(), 1), ("old".to_owned(), 2), ("new".to_owned(), 3)]);
    }

    #[test]
    fn rejects_hole_larger_than_limit() {
        let a = Stream::new("a", vec![rec(1, "CREATE")]);
        let b = Stream::new("b", vec![rec(50_000, "CREATE")]);
        assert_eq!(merge(vec![a, b], 10_000, |_, _| {}).unwrap_err(), Status::ChangelogInconsistent);
    }
}
