//! Namespace: inode tree, directory entries, trash, hardlinks, sessions,
//! file locks, and the mutating operations that emit changelog records
//! (spec §4.10).
//!
//! Every mutating operation is, per spec, "a pure function of `(ctx, args,
//! current state)`". Two layers implement that:
//!
//! - `apply_*` methods on [`Namespace`] are the raw state transition: they
//!   assume the caller already authorized the operation, perform the
//!   mutation, update the incremental checksum, and bump the namespace
//!   version by exactly one. These are what changelog replay calls.
//! - The [`Mutator`] dispatch table wraps each `apply_*` with changelog
//!   [`Record`] argument decoding, used by [`crate::changelog::restore`].
//!
//! A live master additionally wraps `apply_*` with a permission check
//! against the caller's uid/gid set before logging and broadcasting the
//! record (spec §4.10 steps 1-5); that online path lives in
//! [`ops::OpContext`] and friends.

mod ops;
pub mod trash;

use std::collections::HashMap;

use crate::changelog::opcodes::Record;
use crate::changelog::restore::ChecksumPolicy;
use crate::error::Status;
pub use node::{Acl, DirStats, DirectoryData, FileData, FsNode, Header, NodeType, SymlinkData, MAX_NAME_LEN, MAX_PATH_LEN, ROOT_ID};

pub mod node;
pub use ops::OpContext;

/// A file lock (POSIX byte-range or `flock`) held on an inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLock {
    pub owner: u64,
    pub pid: u32,
    pub start: u64,
    pub end: u64,
    pub exclusive: bool,
}

/// The full in-memory namespace + auxiliary tables a master or shadow
/// keeps. Chunk bookkeeping itself lives in [`crate::chunk`]; this struct
/// only tracks the replay-visible counters (`next_chunk_id`, per-chunk
/// version numbers reachable from changelog ops like `INCVERSION`) needed
/// to keep replay deterministic, per spec §3 Ownership: "each chunk is
/// exclusively owned by the chunk hash table" — that table is
/// [`crate::chunk::ChunkTable`], wired in alongside this at the
/// orchestration layer.
#[derive(Debug, Clone)]
pub struct Namespace {
    nodes: HashMap<u32, FsNode>,
    next_id: u32,
    version: u64,
    checksum: u64,
    pub trash: trash::Trash,
    xattrs: HashMap<(u32, String), Vec<u8>>,
    quotas: HashMap<(u32, u8), u64>,
    next_chunk_id: u64,
    chunk_versions: HashMap<u64, u32>,
    locks: HashMap<u32, Vec<FileLock>>,
}

impl Namespace {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        let mut root = Header::new(ROOT_ID, NodeType::Directory, 0o755, 0, 0, 0);
        root.parents = vec![ROOT_ID];
        nodes.insert(ROOT_ID, FsNode::Directory(root, DirectoryData::new()));

        Self {
            nodes,
            next_id: ROOT_ID + 1,
            version: 1,
            checksum: 0,
            trash: trash::Trash::new(),
            xattrs: HashMap::new(),
            quotas: HashMap::new(),
            next_chunk_id: 1,
            chunk_versions: HashMap::new(),
            locks: HashMap::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    pub fn node(&self, id: u32) -> Option<&FsNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: u32) -> Option<&mut FsNode> {
        self.nodes.get_mut(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The id [`Namespace::apply_clone`] would assign if called right now
    /// without a forced id. The online `clone_checked` path uses this to
    /// pick the id it then forces, so replay (which always forces an id)
    /// and the live path agree on allocation order.
    pub fn next_available_id(&self) -> u32 {
        self.next_id
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }

    fn fold_checksum(&mut self, node_id: u32) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.header_mut().recompute_checksum();
            self.checksum ^= node.header().checksum;
        }
    }

    fn directory_mut(&mut self, id: u32) -> Result<(&mut Header, &mut DirectoryData), Status> {
        self.nodes.get_mut(&id).and_then(FsNode::as_directory_mut).ok_or(Status::NotFound)
    }

    // --- raw state transitions, called by both replay and the live path ---

    pub fn apply_access(&mut self, _ts: i64, inode: u32) -> Result<(), Status> {
        self.nodes.get(&inode).ok_or(Status::NotFound)?;
        self.bump_version();
        Ok(())
    }

    pub fn apply_attr(
        &mut self,
        ts: i64,
        inode: u32,
        mode: u16,
        uid: u32,
        gid: u32,
        atime: i64,
        mtime: i64,
    ) -> Result<(), Status> {
        let node = self.nodes.get_mut(&inode).ok_or(Status::NotFound)?;
        let h = node.header_mut();
        h.mode = mode;
        h.uid = uid;
        h.gid = gid;
        h.atime = atime;
        h.mtime = mtime;
        h.ctime = ts;
        self.fold_checksum(inode);
        self.bump_version();
        Ok(())
    }

    pub fn apply_create(
        &mut self,
        ts: i64,
        parent: u32,
        name: &str,
        node_type: NodeType,
        mode: u16,
        uid: u32,
        gid: u32,
    ) -> Result<u32, Status> {
        validate_name(name)?;
        {
            let (_, dir) = self.directory_mut(parent)?;
            if dir.entries.contains_key(name) {
                return Err(Status::Exists);
            }
        }

        let id = self.alloc_id();
        let mut header = Header::new(id, node_type, mode, uid, gid, ts);
        header.parents.push(parent);

        let node = match node_type {
            NodeType::Directory => FsNode::Directory(header, DirectoryData::new()),
            NodeType::File => FsNode::File(header, FileData::default()),
            _ => FsNode::Special(header),
        };
        self.nodes.insert(id, node);

        let (_, dir) = self.directory_mut(parent)?;
        dir.entries.insert(name.to_owned(), id);
        dir.stats.inodes += 1;
        match node_type {
            NodeType::Directory => dir.stats.dirs += 1,
            NodeType::File => dir.stats.files += 1,
            _ => {}
        }

        self.fold_checksum(parent);
        self.fold_checksum(id);
        self.bump_version();
        Ok(id)
    }

    pub fn apply_link(&mut self, ts: i64, inode: u32, parent: u32, name: &str) -> Result<(), Status> {
        validate_name(name)?;
        if matches!(self.nodes.get(&inode), Some(FsNode::Directory(..))) {
            // Hardlinking directories would create a cycle; refuse like
            // every POSIX filesystem does.
            return Err(Status::Invalid);
        }
        {
            let (_, dir) = self.directory_mut(parent)?;
            if dir.entries.contains_key(name) {
                return Err(Status::Exists);
            }
        }
        self.nodes.get(&inode).ok_or(Status::NotFound)?;

        let (_, dir) = self.directory_mut(parent)?;
        dir.entries.insert(name.to_owned(), inode);
        dir.stats.inodes += 1;

        let node = self.nodes.get_mut(&inode).ok_or(Status::NotFound)?;
        node.header_mut().parents.push(parent);
        node.header_mut().ctime = ts;

        self.fold_checksum(parent);
        self.fold_checksum(inode);
        self.bump_version();
        Ok(())
    }

    /// Removes `name` from `parent`. If the unlinked node's link count
    /// drops to zero it is either moved to trash (when `trashtime > 0`) or
    /// deleted outright. Returns the inode id that was unlinked.
    pub fn apply_unlink(&mut self, ts: i64, parent: u32, name: &str) -> Result<u32, Status> {
        let inode = {
            let (_, dir) = self.directory_mut(parent)?;
            dir.entries.remove(name).ok_or(Status::NotFound)?
        };

        {
            let (_, dir) = self.directory_mut(parent)?;
            dir.stats.inodes = dir.stats.inodes.saturating_sub(1);
        }

        let node = self.nodes.get_mut(&inode).ok_or(Status::NotFound)?;
        node.header_mut().parents.retain(|&p| p != parent);
        node.header_mut().ctime = ts;
        let orphaned = node.header().parents.is_empty();
        let trashtime = node.header().trashtime;

        if orphaned {
            if trashtime > 0 {
                let deadline = ts + trashtime as i64;
                self.trash.insert(deadline, inode, parent, name.to_owned());
            } else {
                self.nodes.remove(&inode);
            }
        }

        self.fold_checksum(parent);
        self.bump_version();
        Ok(inode)
    }

    pub fn apply_move(
        &mut self,
        ts: i64,
        psrc: u32,
        nsrc: &str,
        pdst: u32,
        ndst: &str,
    ) -> Result<u32, Status> {
        validate_name(ndst)?;
        let inode = {
            let (_, dir) = self.directory_mut(psrc)?;
            dir.entries.remove(nsrc).ok_or(Status::NotFound)?
        };
        {
            let (_, dir) = self.directory_mut(psrc)?;
            dir.stats.inodes = dir.stats.inodes.saturating_sub(1);
        }

        {
            let (_, dst_dir) = self.directory_mut(pdst)?;
            if dst_dir.entries.contains_key(ndst) {
                // restore psrc before returning so state is unchanged
                let (_, src_dir) = self.directory_mut(psrc)?;
                src_dir.entries.insert(nsrc.to_owned(), inode);
                src_dir.stats.inodes += 1;
                return Err(Status::Exists);
            }
        }

        let (_, dst_dir) = self.directory_mut(pdst)?;
        dst_dir.entries.insert(ndst.to_owned(), inode);
        dst_dir.stats.inodes += 1;

        let node = self.nodes.get_mut(&inode).ok_or(Status::NotFound)?;
        for p in node.header_mut().parents.iter_mut() {
            if *p == psrc {
                *p = pdst;
            }
        }
        node.header_mut().ctime = ts;

        self.fold_checksum(psrc);
        self.fold_checksum(pdst);
        self.fold_checksum(inode);
        self.bump_version();
        Ok(inode)
    }

    pub fn apply_symlink(
        &mut self,
        ts: i64,
        parent: u32,
        name: &str,
        target: &str,
        uid: u32,
        gid: u32,
    ) -> Result<u32, Status> {
        validate_name(name)?;
        if target.len() > MAX_PATH_LEN {
            return Err(Status::Invalid);
        }
        {
            let (_, dir) = self.directory_mut(parent)?;
            if dir.entries.contains_key(name) {
                return Err(Status::Exists);
            }
        }

        let id = self.alloc_id();
        let mut header = Header::new(id, NodeType::Symlink, 0o777, uid, gid, ts);
        header.parents.push(parent);
        self.nodes.insert(id, FsNode::Symlink(header, SymlinkData { target: target.to_owned() }));

        let (_, dir) = self.directory_mut(parent)?;
        dir.entries.insert(name.to_owned(), id);
        dir.stats.inodes += 1;

        self.fold_checksum(parent);
        self.fold_checksum(id);
        self.bump_version();
        Ok(id)
    }

    /// Truncates/extends a file's chunk vector so index `idx` exists,
    /// allocating a fresh chunk id for it. Returns the new chunk id.
    pub fn apply_trunc(&mut self, ts: i64, inode: u32, idx: usize) -> Result<u64, Status> {
        let chunk_id = self.alloc_chunk_id();
        let (h, file) = self.nodes.get_mut(&inode).and_then(FsNode::as_file_mut).ok_or(Status::NotFound)?;
        if file.chunks.len() <= idx {
            file.chunks.resize(idx + 1, 0);
        }
        file.chunks[idx] = chunk_id;
        h.mtime = ts;
        h.ctime = ts;
        self.chunk_versions.insert(chunk_id, 1);
        self.fold_checksum(inode);
        self.bump_version();
        Ok(chunk_id)
    }

    /// Records the start of a write to chunk index `idx`, bumping that
    /// chunk's version. Returns the (possibly newly allocated) chunk id.
    pub fn apply_write(&mut self, ts: i64, inode: u32, idx: usize) -> Result<u64, Status> {
        let needs_alloc = {
            let (_, file) = self.nodes.get(&inode).and_then(FsNode::as_file).ok_or(Status::NotFound)?;
            file.chunks.get(idx).copied().unwrap_or(0) == 0
        };
        let chunk_id = if needs_alloc { self.alloc_chunk_id() } else {
            let (_, file) = self.nodes.get(&inode).and_then(FsNode::as_file).ok_or(Status::NotFound)?;
            file.chunks[idx]
        };

        let (h, file) = self.nodes.get_mut(&inode).and_then(FsNode::as_file_mut).ok_or(Status::NotFound)?;
        if file.chunks.len() <= idx {
            file.chunks.resize(idx + 1, 0);
        }
        file.chunks[idx] = chunk_id;
        h.mtime = ts;
        *self.chunk_versions.entry(chunk_id).or_insert(0) += 1;

        self.fold_checksum(inode);
        self.bump_version();
        Ok(chunk_id)
    }

    pub fn apply_setgoal(&mut self, ts: i64, inode: u32, goal: u8) -> Result<(), Status> {
        let node = self.nodes.get_mut(&inode).ok_or(Status::NotFound)?;
        node.header_mut().goal = goal;
        node.header_mut().ctime = ts;
        self.fold_checksum(inode);
        self.bump_version();
        Ok(())
    }

    pub fn apply_settrashtime(&mut self, ts: i64, inode: u32, trashtime: u32) -> Result<(), Status> {
        let node = self.nodes.get_mut(&inode).ok_or(Status::NotFound)?;
        node.header_mut().trashtime = trashtime;
        node.header_mut().ctime = ts;
        self.fold_checksum(inode);
        self.bump_version();
        Ok(())
    }

    pub fn apply_setacl(&mut self, ts: i64, inode: u32, acl: Option<Acl>) -> Result<(), Status> {
        let node = self.nodes.get_mut(&inode).ok_or(Status::NotFound)?;
        node.header_mut().acl = acl;
        node.header_mut().ctime = ts;
        self.fold_checksum(inode);
        self.bump_version();
        Ok(())
    }

    pub fn apply_setxattr(&mut self, inode: u32, name: &str, value: Vec<u8>) -> Result<(), Status> {
        self.nodes.get(&inode).ok_or(Status::NotFound)?;
        self.xattrs.insert((inode, name.to_owned()), value);
        self.bump_version();
        Ok(())
    }

    pub fn xattr(&self, inode: u32, name: &str) -> Option<&[u8]> {
        self.xattrs.get(&(inode, name.to_owned())).map(|v| v.as_slice())
    }

    /// Clones `src` as a new node `dst_inode` (the id is forced so replay
    /// produces the same id the original master assigned) under
    /// `dst_parent` named `name`. Files are shallow-cloned (chunk ids are
    /// shared, copy-on-write is handled by the chunk subsystem).
    pub fn apply_clone(
        &mut self,
        ts: i64,
        src: u32,
        dst_parent: u32,
        dst_inode: u32,
        name: &str,
        overwrite: bool,
    ) -> Result<(), Status> {
        validate_name(name)?;
        let existing = {
            let (_, dir) = self.directory_mut(dst_parent)?;
            dir.entries.get(name).copied()
        };
        if existing.is_some() && !overwrite {
            return Err(Status::Exists);
        }

        let src_node = self.nodes.get(&src).ok_or(Status::NotFound)?.clone();
        let mut new_node = src_node;
        new_node.header_mut().id = dst_inode;
        new_node.header_mut().parents = vec![dst_parent];
        new_node.header_mut().ctime = ts;
        self.nodes.insert(dst_inode, new_node);
        if dst_inode >= self.next_id {
            self.next_id = dst_inode + 1;
        }

        let (_, dir) = self.directory_mut(dst_parent)?;
        if existing.is_none() {
            dir.stats.inodes += 1;
        }
        dir.entries.insert(name.to_owned(), dst_inode);

        self.fold_checksum(dst_parent);
        self.fold_checksum(dst_inode);
        self.bump_version();
        Ok(())
    }

    /// Permanently removes a trashed node (spec `PURGE`).
    pub fn apply_purge(&mut self, inode: u32) -> Result<(), Status> {
        self.trash.remove_by_inode(inode).ok_or(Status::NotFound)?;
        self.nodes.remove(&inode);
        self.bump_version();
        Ok(())
    }

    /// Restores a trashed node back into the live tree under its original
    /// parent/name (spec `UNDEL`).
    pub fn apply_undel(&mut self, inode: u32) -> Result<(), Status> {
        let entry = self.trash.remove_by_inode(inode).ok_or(Status::NotFound)?;
        let (_, dir) = self.directory_mut(entry.parent)?;
        dir.entries.insert(entry.name, inode);
        dir.stats.inodes += 1;

        let node = self.nodes.get_mut(&inode).ok_or(Status::NotFound)?;
        node.header_mut().parents.push(entry.parent);

        self.fold_checksum(entry.parent);
        self.fold_checksum(inode);
        self.bump_version();
        Ok(())
    }

    /// Purges every trash entry whose deadline has passed, as the trash
    /// background worker does (spec §4.10 "Trash").
    pub fn purge_expired_trash(&mut self, now: i64) -> Vec<u32> {
        let expired = self.trash.take_expired(now);
        for inode in &expired {
            self.nodes.remove(inode);
        }
        expired
    }

    /// `REPAIR(inode, idx)`: forces a chunk to the highest version any
    /// surviving copy reports, used when all copies disagree after a
    /// partial failure. Returns the new version.
    pub fn apply_repair(&mut self, inode: u32, idx: usize) -> Result<u32, Status> {
        let chunk_id = {
            let (_, file) = self.nodes.get(&inode).and_then(FsNode::as_file).ok_or(Status::NotFound)?;
            *file.chunks.get(idx).ok_or(Status::WrongSizeOrOffset)?
        };
        let version = self.chunk_versions.entry(chunk_id).or_insert(1);
        *version += 1;
        let result = *version;
        self.bump_version();
        Ok(result)
    }

    /// `CHECKSUM(phase)`: verifies (or records) the filesystem's aggregate
    /// checksum depending on `policy`.
    pub fn apply_checksum(&mut self, expected: u64, policy: ChecksumPolicy) -> Result<(), Status> {
        if self.checksum != expected && policy == ChecksumPolicy::Abort {
            return Err(Status::MetadataChecksumMismatch);
        }
        self.bump_version();
        Ok(())
    }

    pub fn apply_incversion(&mut self, chunk_id: u64) -> Result<u32, Status> {
        let version = self.chunk_versions.entry(chunk_id).or_insert(1);
        *version += 1;
        let result = *version;
        self.bump_version();
        Ok(result)
    }

    pub fn apply_nextchunkid(&mut self, id: u64) -> Result<(), Status> {
        if id < self.next_chunk_id {
            return Err(Status::Invalid);
        }
        self.next_chunk_id = id;
        self.bump_version();
        Ok(())
    }

    pub fn apply_setquota(&mut self, owner_id: u32, resource: u8, limit: u64) -> Result<(), Status> {
        self.quotas.insert((owner_id, resource), limit);
        self.bump_version();
        Ok(())
    }

    pub fn quota(&self, owner_id: u32, resource: u8) -> Option<u64> {
        self.quotas.get(&(owner_id, resource)).copied()
    }

    /// Accepted-but-a-no-op-beyond-the-version-bump handling for the
    /// deprecated opcodes `EMPTYTRASH`, `EMPTYRESERVED`, `SNAPSHOT` (spec
    /// §9 open question): old logs may still contain them and replay must
    /// accept them, but new code never emits them (`FREEINODES`/`CLONE`
    /// take their place).
    pub fn apply_deprecated_noop(&mut self) -> Result<(), Status> {
        self.bump_version();
        Ok(())
    }

    fn alloc_chunk_id(&mut self) -> u64 {
        let id = self.next_chunk_id;
        self.next_chunk_id += 1;
        id
    }

    // --- file locks (spec §4.10 "File locks") ---

    pub fn flock_set(&mut self, inode: u32, lock: FileLock) -> Result<(), Status> {
        let held = self.locks.entry(inode).or_default();
        let conflict = held.iter().any(|l| {
            l.owner != lock.owner
                && ranges_overlap(l.start, l.end, lock.start, lock.end)
                && (l.exclusive || lock.exclusive)
        });
        if conflict {
            return Err(Status::Locked);
        }
        held.push(lock);
        self.bump_version();
        Ok(())
    }

    pub fn flock_clear(&mut self, inode: u32, owner: u64) -> Result<(), Status> {
        if let Some(held) = self.locks.get_mut(&inode) {
            held.retain(|l| l.owner != owner);
        }
        self.bump_version();
        Ok(())
    }

    pub fn locks_for(&self, inode: u32) -> &[FileLock] {
        self.locks.get(&inode).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn ranges_overlap(a_start: u64, a_end: u64, b_start: u64, b_end: u64) -> bool {
    a_start <= b_end && b_start <= a_end
}

fn validate_name(name: &str) -> Result<(), Status> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('\0') {
        return Err(Status::Invalid);
    }
    Ok(())
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

/// Function signature every changelog mutator implements: decode `record`'s
/// arguments, apply the raw transition with `ts` forced to the record's
/// timestamp, and report success/failure.
pub type MutatorFn = fn(&mut Namespace, &Record, ChecksumPolicy) -> Result<(), Status>;

/// Dispatch table from opcode name to [`MutatorFn`], covering the catalogue
/// in spec §4.3.
pub struct Mutator;

impl Mutator {
    pub fn lookup(opcode: &str) -> Option<MutatorFn> {
        Some(match opcode {
            "ACCESS" => ops::access,
            "ATTR" => ops::attr,
            "CREATE" => ops::create,
            "LINK" => ops::link,
            "UNLINK" => ops::unlink,
            "MOVE" => ops::mv,
            "SYMLINK" => ops::symlink,
            "TRUNC" => ops::trunc,
            "WRITE" => ops::write,
            "SETGOAL" => ops::setgoal,
            "SETTRASHTIME" => ops::settrashtime,
            "SETACL" => ops::setacl,
            "SETXATTR" => ops::setxattr,
            "CLONE" => ops::clone_op,
            "PURGE" => ops::purge,
            "UNDEL" => ops::undel,
            "REPAIR" => ops::repair,
            "CHECKSUM" => ops::checksum,
            "INCVERSION" => ops::incversion,
            "NEXTCHUNKID" => ops::nextchunkid,
            "SETQUOTA" => ops::setquota,
            "FLCKINODE" => ops::flckinode,
            "CLRLCK" => ops::clrlck,
            // Deprecated opcodes: accepted in old logs, never emitted.
            "EMPTYTRASH" | "EMPTYRESERVED" | "SNAPSHOT" => ops::deprecated_noop,
            _ => return None,
        })
    }
}
