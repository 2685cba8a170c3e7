//! Chunk bookkeeping (spec §3 "Chunk", §4.9 per-chunk operation state
//! machines): for each chunk id, which servers hold which part, what
//! operation (if any) is in flight against it, and the chunk's own error
//! history.
//!
//! Grounded on spec §4.9's per-operation state tables and on a
//! per-connection state-machine shape (an enum-of-phases-with-pending-acks
//! pattern), generalized from one connection's read/write phase to one
//! chunk's in-flight operation.

use std::collections::{HashMap, HashSet};

use crate::error::Status;
use crate::goal::PartType;
use crate::registry::ServerId;

/// At most one operation may be in flight for a given
/// `(chunk_id, version, part_type, destination)` tuple (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpKey {
    pub chunk_id: u64,
    pub version: u32,
    pub part_type: PartType,
    pub destination: ServerId,
}

/// The operation currently in flight against a chunk, if any (spec §4.9:
/// create/write/setversion-incversion/truncate-duplicate-duptrunc/delete/
/// replicate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOp {
    /// `absent -> creating -> created(version)`; reversed on timeout or a
    /// negative status from the destination.
    Creating { destination: ServerId },
    /// Write under a session lock id; version bumps on first write after a
    /// flush, retried against the same lock id on failure.
    Writing { lockid: u64, pending: HashSet<ServerId> },
    /// `SETVERSION`/`INCVERSION`: dispatched to every copy; a copy that
    /// fails to ack is marked damaged for that server only, not globally.
    SettingVersion { new_version: u32, pending: HashSet<ServerId>, failed: HashSet<ServerId> },
    /// Truncate/duplicate/dup-trunc: rewritten chunk-by-chunk under a new
    /// id; the old id is retired only once the new id is durable on enough
    /// copies.
    Rewriting { new_chunk_id: u64, pending: HashSet<ServerId> },
    /// Dispatched once refcount reaches zero; capped per server, final
    /// removal once every copy acks.
    Deleting { pending: HashSet<ServerId> },
    /// A part is being copied onto `destination` from `sources`; `OK`
    /// admits `destination` to the copy-set, `WAITING` is retried, a hard
    /// error increments the source's error counter (spec §4.8/§4.9).
    Replicating { destination: ServerId, sources: Vec<ServerId> },
}

/// One chunk's replay-independent operational state: its copy-set,
/// in-flight operation, and recent-error ring (spec §3 "Chunk").
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: u64,
    pub version: u32,
    pub goal: u8,
    /// Which `(server, part)` combinations currently hold a durable copy.
    pub copies: Vec<(ServerId, PartType)>,
    pub op: Option<ChunkOp>,
    /// Seconds-since-epoch a currently held write lock expires, if any.
    pub lock_expires_at: Option<i64>,
    pub was_changed: bool,
}

impl Chunk {
    pub fn new(id: u64, goal: u8) -> Self {
        Self { id, version: 1, goal, copies: Vec::new(), op: None, lock_expires_at: None, was_changed: false }
    }

    pub fn copy_set(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.copies.iter().map(|(s, _)| *s)
    }

    fn busy(&self) -> Result<(), Status> {
        if self.op.is_some() {
            Err(Status::ChunkBusy)
        } else {
            Ok(())
        }
    }

    /// Begins chunk creation on `destination` (spec §4.9 "Create").
    pub fn start_create(&mut self, destination: ServerId) -> Result<(), Status> {
        self.busy()?;
        self.op = Some(ChunkOp::Creating { destination });
        Ok(())
    }

    /// `destination` acknowledged creation: admits it to the copy-set.
    pub fn finish_create_ok(&mut self, part_type: PartType) -> Result<(), Status> {
        let ChunkOp::Creating { destination } = self.op.take().ok_or(Status::Invalid)? else {
            return Err(Status::Invalid);
        };
        self.copies.push((destination, part_type));
        self.was_changed = true;
        Ok(())
    }

    /// Creation timed out or the destination reported a negative status:
    /// reverse to `absent` (no copy recorded).
    pub fn fail_create(&mut self) -> Result<(), Status> {
        match self.op.take() {
            Some(ChunkOp::Creating { .. }) => Ok(()),
            _ => Err(Status::Invalid),
        }
    }

    /// Begins a write under `lockid` against the chunk's current copy-set
    /// (spec §4.9 "Write"). Retries of the same write reuse `lockid`.
    pub fn start_write(&mut self, lockid: u64) -> Result<(), Status> {
        if let Some(ChunkOp::Writing { lockid: held, .. }) = &self.op {
            if *held == lockid {
                return Ok(());
            }
        }
        self.busy()?;
        let pending = self.copies.iter().map(|(s, _)| *s).collect();
        self.op = Some(ChunkOp::Writing { lockid, pending });
        Ok(())
    }

    /// One server acknowledged the write; once every pending server has,
    /// the chunk's version bumps (first write after a flush bumps exactly
    /// once, per spec §4.9).
    pub fn ack_write(&mut self, server: ServerId) -> Result<bool, Status> {
        let Some(ChunkOp::Writing { pending, .. }) = &mut self.op else { return Err(Status::Invalid) };
        pending.remove(&server);
        if pending.is_empty() {
            self.op = None;
            self.version += 1;
            self.was_changed = true;
            return Ok(true);
        }
        Ok(false)
    }

    /// `SETVERSION`/`INCVERSION`: dispatch to every current copy (spec
    /// §4.9).
    pub fn start_set_version(&mut self, new_version: u32) -> Result<(), Status> {
        self.busy()?;
        let pending = self.copies.iter().map(|(s, _)| *s).collect();
        self.op = Some(ChunkOp::SettingVersion { new_version, pending, failed: HashSet::new() });
        Ok(())
    }

    /// A server's ack to `SETVERSION`/`INCVERSION`; `ok = false` marks that
    /// server (only) damaged rather than aborting the whole operation.
    /// Once every copy has responded, the chunk version updates and
    /// failed servers are dropped from the copy-set.
    pub fn ack_set_version(&mut self, server: ServerId, ok: bool) -> Result<bool, Status> {
        let Some(ChunkOp::SettingVersion { pending, failed, .. }) = &mut self.op else {
            return Err(Status::Invalid);
        };
        pending.remove(&server);
        if !ok {
            failed.insert(server);
        }
        if pending.is_empty() {
            let Some(ChunkOp::SettingVersion { new_version, failed, .. }) = self.op.take() else { unreachable!() };
            self.copies.retain(|(s, _)| !failed.contains(s));
            self.version = new_version;
            self.was_changed = true;
            return Ok(true);
        }
        Ok(false)
    }

    /// Truncate/duplicate/dup-trunc: the chunk is rewritten under
    /// `new_chunk_id`; the old id stays addressable until every pending
    /// server confirms the new id is durable (spec §4.9).
    pub fn start_rewrite(&mut self, new_chunk_id: u64) -> Result<(), Status> {
        self.busy()?;
        let pending = self.copies.iter().map(|(s, _)| *s).collect();
        self.op = Some(ChunkOp::Rewriting { new_chunk_id, pending });
        Ok(())
    }

    /// Returns `Some(new_chunk_id)` once every pending server has durably
    /// written the rewritten chunk, at which point the old id may be
    /// retired by the caller (this type only tracks the id reached, it
    /// does not own cross-chunk retirement bookkeeping).
    pub fn ack_rewrite(&mut self, server: ServerId) -> Result<Option<u64>, Status> {
        let Some(ChunkOp::Rewriting { pending, new_chunk_id }) = &mut self.op else { return Err(Status::Invalid) };
        pending.remove(&server);
        if pending.is_empty() {
            let id = *new_chunk_id;
            self.op = None;
            self.was_changed = true;
            return Ok(Some(id));
        }
        Ok(None)
    }

    /// Dispatches delete to the current copy-set once refcount is zero
    /// (spec §4.9 "Delete"); final removal happens when every copy acks.
    pub fn start_delete(&mut self) -> Result<(), Status> {
        self.busy()?;
        let pending = self.copies.iter().map(|(s, _)| *s).collect();
        self.op = Some(ChunkOp::Deleting { pending });
        Ok(())
    }

    pub fn ack_delete(&mut self, server: ServerId) -> Result<bool, Status> {
        let Some(ChunkOp::Deleting { pending }) = &mut self.op else { return Err(Status::Invalid) };
        pending.remove(&server);
        self.copies.retain(|(s, _)| *s != server);
        if pending.is_empty() {
            self.op = None;
            return Ok(true);
        }
        Ok(false)
    }

    /// Begins replicating a part onto `destination` from `sources` (spec
    /// §4.8/§4.9 "Replicate").
    pub fn start_replicate(&mut self, destination: ServerId, sources: Vec<ServerId>) -> Result<(), Status> {
        self.busy()?;
        if sources.is_empty() {
            return Err(Status::NoChunkServers);
        }
        self.op = Some(ChunkOp::Replicating { destination, sources });
        Ok(())
    }

    /// `OK` admits `destination` to the copy-set; `WAITING` leaves the
    /// operation in flight for the caller to retry later; a hard error
    /// aborts the operation without touching the copy-set (the caller
    /// increments the reporting source's error counter separately, since
    /// that's registry state, not chunk state).
    pub fn finish_replicate(&mut self, outcome: ReplicateOutcome, part_type: PartType) -> Result<(), Status> {
        let Some(ChunkOp::Replicating { destination, .. }) = &self.op else { return Err(Status::Invalid) };
        let destination = *destination;
        match outcome {
            ReplicateOutcome::Ok => {
                self.copies.push((destination, part_type));
                self.was_changed = true;
                self.op = None;
                Ok(())
            }
            ReplicateOutcome::Waiting => Ok(()),
            ReplicateOutcome::HardError => {
                self.op = None;
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicateOutcome {
    Ok,
    Waiting,
    HardError,
}

/// Owns every chunk's operational state, keyed by chunk id.
#[derive(Debug, Default)]
pub struct ChunkTable {
    chunks: HashMap<u64, Chunk>,
}

impl ChunkTable {
    pub fn new() -> Self {
        Self { chunks: HashMap::new() }
    }

    pub fn insert(&mut self, chunk: Chunk) {
        self.chunks.insert(chunk.id, chunk);
    }

    pub fn get(&self, id: u64) -> Option<&Chunk> {
        self.chunks.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Chunk> {
        self.chunks.get_mut(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<Chunk> {
        self.chunks.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Disconnect handling (spec §4.6): scans every chunk, removes `server`
    /// from its copy-set, and reports chunks whose copy-set becomes empty
    /// as lost.
    pub fn remove_server(&mut self, server: ServerId) -> Vec<u64> {
        let mut lost = Vec::new();
        for chunk in self.chunks.values_mut() {
            chunk.copies.retain(|(s, _)| *s != server);
            if let Some(op) = &chunk.op {
                let references = match op {
                    ChunkOp::Creating { destination } => *destination == server,
                    ChunkOp::Writing { pending, .. } => pending.contains(&server),
                    ChunkOp::SettingVersion { pending, .. } => pending.contains(&server),
                    ChunkOp::Rewriting { pending, .. } => pending.contains(&server),
                    ChunkOp::Deleting { pending } => pending.contains(&server),
                    ChunkOp::Replicating { destination, sources } => *destination == server || sources.contains(&server),
                };
                if references {
                    chunk.op = None;
                }
            }
            if chunk.copies.is_empty() {
                lost.push(chunk.id);
            }
        }
        lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part() -> PartType {
        PartType::whole(0)
    }

    #[test]
    fn create_then_confirm_admits_copy() {
        let mut c = Chunk::new(1, 1);
        c.start_create(ServerId(1)).unwrap();
        c.finish_create_ok(part()).unwrap();
        assert_eq!(c.copies, vec![(ServerId(1), part())]);
        assert!(c.op.is_none());
    }

    #[test]
    fn failed_create_leaves_chunk_absent() {
        let mut c = Chunk::new(1, 1);
        c.start_create(ServerId(1)).unwrap();
        c.fail_create().unwrap();
        assert!(c.copies.is_empty());
    }

    #[test]
    fn write_bumps_version_only_after_every_copy_acks() {
        let mut c = Chunk::new(1, 1);
        c.copies = vec![(ServerId(1), part()), (ServerId(2), part())];
        c.start_write(42).unwrap();
        assert!(!c.ack_write(ServerId(1)).unwrap());
        assert_eq!(c.version, 1);
        assert!(c.ack_write(ServerId(2)).unwrap());
        assert_eq!(c.version, 2);
    }

    #[test]
    fn retrying_the_same_lockid_does_not_error_busy() {
        let mut c = Chunk::new(1, 1);
        c.copies = vec![(ServerId(1), part())];
        c.start_write(7).unwrap();
        assert!(c.start_write(7).is_ok());
        assert_eq!(c.start_write(8).unwrap_err(), Status::ChunkBusy);
    }

    #[test]
    fn setversion_drops_only_the_failing_server() {
        let mut c = Chunk::new(1, 1);
        c.copies = vec![(ServerId(1), part()), (ServerId(2), part())];
        c.start_set_version(5).unwrap();
        assert!(!c.ack_set_version(ServerId(1), true).unwrap());
        assert!(c.ack_set_version(ServerId(2), false).unwrap());
        assert_eq!(c.version, 5);
        assert_eq!(c.copies, vec![(ServerId(1), part())]);
    }

    #[test]
    fn disconnect_evicts_server_and_reports_lost_chunks() {
        let mut table = ChunkTable::new();
        let mut sole_copy = Chunk::new(1, 1);
        sole_copy.copies = vec![(ServerId(9), part())];
        table.insert(sole_copy);
        let mut redundant = Chunk::new(2, 1);
        redundant.copies = vec![(ServerId(9), part()), (ServerId(10), part())];
        table.insert(redundant);

        let lost = table.remove_server(ServerId(9));
        assert_eq!(lost, vec![1]);
        assert_eq!(table.get(2).unwrap().copies, vec![(ServerId(10), part())]);
    }

    #[test]
    fn replicate_ok_admits_destination_waiting_keeps_retrying() {
        let mut c = Chunk::new(1, 1);
        c.start_replicate(ServerId(2), vec![ServerId(1)]).unwrap();
        c.finish_replicate(ReplicateOutcome::Waiting, part()).unwrap();
        assert!(c.op.is_some());
        c.finish_replicate(ReplicateOutcome::Ok, part()).unwrap();
        assert_eq!(c.copies, vec![(ServerId(2), part())]);
        assert!(c.op.is_none());
    }
}
