//! Replication/operation queue (spec §4.7): tracks in-flight chunk
//! operations across the whole cluster so the workers driving
//! [`crate::chunk`] state machines never double-dispatch the same
//! `(chunk, version, part, destination)` tuple and respect per-type
//! in-flight caps.
//!
//! Grounded on a `crossbeam_queue`/`async_channel`-backed per-connection
//! work queue (a bounded dispatch channel), generalized from one queue per
//! connection to one shared queue keyed by operation identity rather than
//! arrival order, since spec
//! §4.7's uniqueness constraint (at most one op per tuple) is the
//! dominant requirement here, not strict FIFO delivery.

use std::collections::{HashMap, HashSet};

use crate::error::Status;
use crate::goal::PartType;
use crate::registry::ServerId;

/// Kind of operation queued, used for the per-type in-flight caps (spec
/// §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    WriteReplicate,
    Read,
    Delete,
}

/// Identifies one queued operation; also its dedup key (spec §4.7: "at most
/// one concurrent op per `(chunk_id, version, part_type, destination)`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpKey {
    pub chunk_id: u64,
    pub version: u32,
    pub part_type: PartType,
    pub destination: ServerId,
}

#[derive(Debug, Clone)]
pub struct QueuedOp {
    pub key: OpKey,
    pub kind: OpKind,
    pub sources: Vec<ServerId>,
}

/// In-flight operation bookkeeping plus per-kind concurrency caps.
#[derive(Debug)]
pub struct OpQueue {
    ops: HashMap<OpKey, QueuedOp>,
    caps: HashMap<OpKind, usize>,
    in_flight_by_kind: HashMap<OpKind, usize>,
}

impl OpQueue {
    pub fn new(write_repl_cap: usize, read_cap: usize, delete_cap: usize) -> Self {
        let mut caps = HashMap::new();
        caps.insert(OpKind::WriteReplicate, write_repl_cap);
        caps.insert(OpKind::Read, read_cap);
        caps.insert(OpKind::Delete, delete_cap);
        Self { ops: HashMap::new(), caps, in_flight_by_kind: HashMap::new() }
    }

    /// Enqueues an operation, rejecting a duplicate `(chunk, version, part,
    /// destination)` tuple or a request past its kind's in-flight cap
    /// (spec §4.7).
    pub fn enqueue(&mut self, key: OpKey, kind: OpKind, sources: Vec<ServerId>) -> Result<(), Status> {
        if self.ops.contains_key(&key) {
            return Err(Status::Exists);
        }
        let cap = *self.caps.get(&kind).unwrap_or(&usize::MAX);
        let current = *self.in_flight_by_kind.get(&kind).unwrap_or(&0);
        if current >= cap {
            return Err(Status::Delayed);
        }
        self.ops.insert(key, QueuedOp { key, kind, sources });
        *self.in_flight_by_kind.entry(kind).or_insert(0) += 1;
        Ok(())
    }

    /// Completes (successfully or not) an in-flight operation, freeing its
    /// slot.
    pub fn complete(&mut self, key: OpKey) -> Option<QueuedOp> {
        let op = self.ops.remove(&key)?;
        if let Some(count) = self.in_flight_by_kind.get_mut(&op.kind) {
            *count = count.saturating_sub(1);
        }
        Some(op)
    }

    pub fn get(&self, key: &OpKey) -> Option<&QueuedOp> {
        self.ops.get(key)
    }

    pub fn in_flight(&self, kind: OpKind) -> usize {
        *self.in_flight_by_kind.get(&kind).unwrap_or(&0)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Disconnect cleanup (spec §4.7): removes every op referencing
    /// `server` as a source or destination, returning their keys so the
    /// caller can re-dispatch the work elsewhere.
    pub fn remove_server(&mut self, server: ServerId) -> Vec<OpKey> {
        let stale: HashSet<OpKey> = self
            .ops
            .values()
            .filter(|op| op.key.destination == server || op.sources.contains(&server))
            .map(|op| op.key)
            .collect();
        for key in &stale {
            self.complete(*key);
        }
        stale.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(chunk_id: u64, dest: u32) -> OpKey {
        OpKey { chunk_id, version: 1, part_type: PartType::whole(0), destination: ServerId(dest) }
    }

    #[test]
    fn duplicate_tuple_is_rejected() {
        let mut q = OpQueue::new(10, 10, 10);
        q.enqueue(key(1, 2), OpKind::WriteReplicate, vec![ServerId(1)]).unwrap();
        assert_eq!(q.enqueue(key(1, 2), OpKind::WriteReplicate, vec![ServerId(1)]).unwrap_err(), Status::Exists);
    }

    #[test]
    fn per_kind_cap_is_enforced() {
        let mut q = OpQueue::new(1, 10, 10);
        q.enqueue(key(1, 2), OpKind::WriteReplicate, vec![ServerId(1)]).unwrap();
        assert_eq!(q.enqueue(key(2, 2), OpKind::WriteReplicate, vec![ServerId(1)]).unwrap_err(), Status::Delayed);
        q.complete(key(1, 2));
        assert!(q.enqueue(key(2, 2), OpKind::WriteReplicate, vec![ServerId(1)]).is_ok());
    }

    #[test]
    fn disconnect_removes_ops_referencing_the_server_either_side() {
        let mut q = OpQueue::new(10, 10, 10);
        q.enqueue(key(1, 2), OpKind::WriteReplicate, vec![ServerId(9)]).unwrap();
        q.enqueue(key(2, 9), OpKind::WriteReplicate, vec![ServerId(1)]).unwrap();
        q.enqueue(key(3, 5), OpKind::Read, vec![ServerId(6)]).unwrap();
        let mut removed = q.remove_server(ServerId(9));
        removed.sort_by_key(|k| k.chunk_id);
        assert_eq!(removed.len(), 2);
        assert_eq!(q.len(), 1);
    }
}
