//! Two things live here:
//!
//! - The changelog [`Mutator`](super::Mutator) functions: thin argument
//!   decoders around [`Namespace`]'s `apply_*` methods, used only by
//!   replay. They trust their input completely — by the time a record
//!   reaches replay it has already been authorized once, by whichever
//!   master produced it.
//! - [`OpContext`] and the permission check used by the *online* path,
//!   where a session's request is validated against its own uid/gid
//!   before the corresponding `apply_*` runs and gets logged.

use crate::changelog::opcodes::{Arg, Record};
use crate::changelog::restore::ChecksumPolicy;
use crate::error::Status;
use crate::namespace::node::{Acl, Header, NodeType};
use crate::namespace::{FileLock, Namespace};

/// Caller identity for a live (non-replay) namespace operation: the
/// session's uid plus the full supplementary-group set, mirroring how the
/// teacher's VFS layer resolves a client's credentials before a `create`/
/// `lookup` call reaches the filesystem core.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
    pub now: i64,
}

impl OpContext {
    pub fn new(uid: u32, gid: u32, groups: Vec<u32>, now: i64) -> Self {
        Self { uid, gid, groups, now }
    }

    fn is_member(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }

    /// POSIX permission check against one node's header. `need_write`
    /// additionally requires the node not be on a read-only export, which
    /// is an external-collaborator concern (spec §1) and is left to the
    /// caller; this only checks owner/group/other mode bits.
    pub fn check(&self, header: &Header, need_write: bool) -> Result<(), Status> {
        if self.uid == 0 {
            return Ok(());
        }
        let mode = header.mode;
        let bits = if header.uid == self.uid {
            (mode >> 6) & 0o7
        } else if self.is_member(header.gid) {
            (mode >> 3) & 0o7
        } else {
            mode & 0o7
        };
        let required = if need_write { 0o2 } else { 0o4 };
        if bits & required == required {
            Ok(())
        } else {
            Err(Status::Permission)
        }
    }
}

impl Namespace {
    /// Validated, changelog-producing `create`: checks write access on
    /// `parent`, performs the raw mutation, and returns both the new
    /// inode id and the [`Record`] to append to the change-log and
    /// broadcast to shadows.
    pub fn create_checked(
        &mut self,
        ctx: &OpContext,
        parent: u32,
        name: &str,
        node_type: NodeType,
        mode: u16,
    ) -> Result<(u32, Record), Status> {
        {
            let header = self.node(parent).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(header, true)?;
        }
        let version = self.version();
        let id = self.apply_create(ctx.now, parent, name, node_type, mode, ctx.uid, ctx.gid)?;
        let type_str = node_type_code(node_type);
        let record = Record::new(
            version,
            ctx.now,
            "CREATE",
            vec![
                Arg::U32(parent),
                Arg::Str(name.to_owned()),
                Arg::Str(type_str.to_owned()),
                Arg::U32(mode as u32),
                Arg::U32(ctx.uid),
                Arg::U32(ctx.gid),
            ],
        )
        .with_payload(vec![Arg::U32(id)]);
        Ok((id, record))
    }

    /// Validated, changelog-producing `unlink`: checks write access on
    /// `parent` before removing `name`.
    pub fn unlink_checked(&mut self, ctx: &OpContext, parent: u32, name: &str) -> Result<(u32, Record), Status> {
        {
            let header = self.node(parent).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(header, true)?;
        }
        let version = self.version();
        let removed = self.apply_unlink(ctx.now, parent, name)?;
        let record = Record::new(version, ctx.now, "UNLINK", vec![Arg::U32(parent), Arg::Str(name.to_owned())])
            .with_payload(vec![Arg::U32(removed)]);
        Ok((removed, record))
    }

    /// Validated `link`: requires write access on `parent`.
    pub fn link_checked(&mut self, ctx: &OpContext, inode: u32, parent: u32, name: &str) -> Result<Record, Status> {
        {
            let header = self.node(parent).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(header, true)?;
        }
        let version = self.version();
        self.apply_link(ctx.now, inode, parent, name)?;
        Ok(Record::new(version, ctx.now, "LINK", vec![Arg::U32(inode), Arg::U32(parent), Arg::Str(name.to_owned())]))
    }

    /// Validated `move` (rename): requires write access on both the source
    /// and destination directories.
    pub fn move_checked(
        &mut self,
        ctx: &OpContext,
        psrc: u32,
        nsrc: &str,
        pdst: u32,
        ndst: &str,
    ) -> Result<Record, Status> {
        {
            let src_header = self.node(psrc).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(src_header, true)?;
            let dst_header = self.node(pdst).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(dst_header, true)?;
        }
        let version = self.version();
        self.apply_move(ctx.now, psrc, nsrc, pdst, ndst)?;
        Ok(Record::new(
            version,
            ctx.now,
            "MOVE",
            vec![Arg::U32(psrc), Arg::Str(nsrc.to_owned()), Arg::U32(pdst), Arg::Str(ndst.to_owned())],
        ))
    }

    /// Validated `symlink`: requires write access on `parent`.
    pub fn symlink_checked(
        &mut self,
        ctx: &OpContext,
        parent: u32,
        name: &str,
        target: &str,
    ) -> Result<(u32, Record), Status> {
        {
            let header = self.node(parent).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(header, true)?;
        }
        let version = self.version();
        let id = self.apply_symlink(ctx.now, parent, name, target, ctx.uid, ctx.gid)?;
        let record = Record::new(
            version,
            ctx.now,
            "SYMLINK",
            vec![Arg::U32(parent), Arg::Str(name.to_owned()), Arg::Str(target.to_owned()), Arg::U32(ctx.uid), Arg::U32(ctx.gid)],
        )
        .with_payload(vec![Arg::U32(id)]);
        Ok((id, record))
    }

    /// Validated `trunc`: requires write access on the file itself.
    pub fn trunc_checked(&mut self, ctx: &OpContext, inode: u32, idx: usize) -> Result<(u64, Record), Status> {
        {
            let header = self.node(inode).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(header, true)?;
        }
        let version = self.version();
        let chunk_id = self.apply_trunc(ctx.now, inode, idx)?;
        let record = Record::new(version, ctx.now, "TRUNC", vec![Arg::U32(inode), Arg::U32(idx as u32)])
            .with_payload(vec![Arg::U64(chunk_id)]);
        Ok((chunk_id, record))
    }

    /// Validated `write`: requires write access on the file itself.
    pub fn write_checked(&mut self, ctx: &OpContext, inode: u32, idx: usize) -> Result<(u64, Record), Status> {
        {
            let header = self.node(inode).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(header, true)?;
        }
        let version = self.version();
        let chunk_id = self.apply_write(ctx.now, inode, idx)?;
        let record = Record::new(version, ctx.now, "WRITE", vec![Arg::U32(inode), Arg::U32(idx as u32)])
            .with_payload(vec![Arg::U64(chunk_id)]);
        Ok((chunk_id, record))
    }

    /// Validated `setgoal`: requires write access on the target node.
    pub fn setgoal_checked(&mut self, ctx: &OpContext, inode: u32, goal: u8) -> Result<Record, Status> {
        {
            let header = self.node(inode).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(header, true)?;
        }
        let version = self.version();
        self.apply_setgoal(ctx.now, inode, goal)?;
        Ok(Record::new(version, ctx.now, "SETGOAL", vec![Arg::U32(inode), Arg::U32(goal as u32)]))
    }

    /// Validated `settrashtime`: requires write access on the target node.
    pub fn settrashtime_checked(&mut self, ctx: &OpContext, inode: u32, trashtime: u32) -> Result<Record, Status> {
        {
            let header = self.node(inode).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(header, true)?;
        }
        let version = self.version();
        self.apply_settrashtime(ctx.now, inode, trashtime)?;
        Ok(Record::new(version, ctx.now, "SETTRASHTIME", vec![Arg::U32(inode), Arg::U32(trashtime)]))
    }

    /// Validated `setacl`: requires write access on the target node (the
    /// owner or root, in practice, since `mode` usually denies group/other
    /// write).
    pub fn setacl_checked(&mut self, ctx: &OpContext, inode: u32, acl: Option<Acl>) -> Result<Record, Status> {
        {
            let header = self.node(inode).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(header, true)?;
        }
        let version = self.version();
        self.apply_setacl(ctx.now, inode, acl.clone())?;
        let mut args = vec![Arg::U32(inode), Arg::U32(acl.is_some() as u32)];
        if let Some(acl) = &acl {
            args.push(Arg::U32(acl.rich as u32));
            for (tag, qualifier, perm) in &acl.entries {
                args.push(Arg::U32(*tag));
                args.push(Arg::U32(*qualifier));
                args.push(Arg::U32(*perm as u32));
            }
        }
        Ok(Record::new(version, ctx.now, "SETACL", args))
    }

    /// Validated `setxattr`: requires write access on the target node.
    /// Extended attribute values must be valid UTF-8, matching the restore
    /// engine's payload decoding.
    pub fn setxattr_checked(&mut self, ctx: &OpContext, inode: u32, name: &str, value: Vec<u8>) -> Result<Record, Status> {
        {
            let header = self.node(inode).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(header, true)?;
        }
        let text = String::from_utf8(value.clone()).map_err(|_| Status::Invalid)?;
        let version = self.version();
        self.apply_setxattr(inode, name, value)?;
        Ok(Record::new(version, ctx.now, "SETXATTR", vec![Arg::U32(inode), Arg::Str(name.to_owned())])
            .with_payload(vec![Arg::Str(text)]))
    }

    /// Validated `clone`: requires write access on `dst_parent`. Allocates
    /// the destination inode id up front so replay (which always forces an
    /// id) and this path agree.
    pub fn clone_checked(
        &mut self,
        ctx: &OpContext,
        src: u32,
        dst_parent: u32,
        name: &str,
        overwrite: bool,
    ) -> Result<(u32, Record), Status> {
        {
            let header = self.node(dst_parent).map(|n| n.header()).ok_or(Status::NotFound)?;
            ctx.check(header, true)?;
        }
        let version = self.version();
        let dst_inode = self.next_available_id();
        self.apply_clone(ctx.now, src, dst_parent, dst_inode, name, overwrite)?;
        let record = Record::new(
            version,
            ctx.now,
            "CLONE",
            vec![Arg::U32(src), Arg::U32(dst_parent), Arg::Str(name.to_owned()), Arg::U32(overwrite as u32)],
        )
        .with_payload(vec![Arg::U32(dst_inode)]);
        Ok((dst_inode, record))
    }

    /// Validated `setquota`: an administrative operation, restricted to
    /// `uid == 0` (no per-node permission bits apply).
    pub fn setquota_checked(&mut self, ctx: &OpContext, owner_id: u32, resource: u8, limit: u64) -> Result<Record, Status> {
        if ctx.uid != 0 {
            return Err(Status::Permission);
        }
        let version = self.version();
        self.apply_setquota(owner_id, resource, limit)?;
        Ok(Record::new(version, ctx.now, "SETQUOTA", vec![Arg::U32(owner_id), Arg::U32(resource as u32), Arg::U64(limit)]))
    }

    /// Validated file-lock acquisition (spec §4.10 "File locks"): a session
    /// need only have the node open, so this only checks the node exists.
    /// Emits `FLCKINODE` so shadows converge on the same lock state (spec
    /// §5, §4.3).
    pub fn flock_checked(
        &mut self,
        ctx: &OpContext,
        inode: u32,
        owner: u64,
        pid: u32,
        start: u64,
        end: u64,
        exclusive: bool,
    ) -> Result<Record, Status> {
        self.node(inode).ok_or(Status::NotFound)?;
        let version = self.version();
        self.flock_set(inode, FileLock { owner, pid, start, end, exclusive })?;
        Ok(Record::new(
            version,
            ctx.now,
            "FLCKINODE",
            vec![
                Arg::U32(inode),
                Arg::U64(owner),
                Arg::U32(pid),
                Arg::U64(start),
                Arg::U64(end),
                Arg::U32(exclusive as u32),
            ],
        ))
    }

    /// Validated lock release, emitting `CLRLCK` (spec §5).
    pub fn funlock_checked(&mut self, ctx: &OpContext, inode: u32, owner: u64) -> Result<Record, Status> {
        self.node(inode).ok_or(Status::NotFound)?;
        let version = self.version();
        self.flock_clear(inode, owner)?;
        Ok(Record::new(version, ctx.now, "CLRLCK", vec![Arg::U32(inode), Arg::U64(owner)]))
    }
}

fn node_type_code(t: NodeType) -> &'static str {
    match t {
        NodeType::File => "f",
        NodeType::Directory => "d",
        NodeType::Symlink => "l",
        NodeType::Fifo => "p",
        NodeType::BlockDevice => "b",
        NodeType::CharDevice => "c",
        NodeType::Socket => "s",
        NodeType::Trash | NodeType::Reserved => "f",
    }
}

fn parse_node_type(code: &str) -> Result<NodeType, Status> {
    Ok(match code {
        "f" => NodeType::File,
        "d" => NodeType::Directory,
        "l" => NodeType::Symlink,
        "p" => NodeType::Fifo,
        "b" => NodeType::BlockDevice,
        "c" => NodeType::CharDevice,
        "s" => NodeType::Socket,
        _ => return Err(Status::Invalid),
    })
}

fn arg_u32(rec: &Record, idx: usize) -> Result<u32, Status> {
    rec.args.get(idx).and_then(Arg::as_u32).ok_or(Status::Invalid)
}

fn arg_u64(rec: &Record, idx: usize) -> Result<u64, Status> {
    rec.args.get(idx).and_then(Arg::as_u64).ok_or(Status::Invalid)
}

fn arg_str<'a>(rec: &'a Record, idx: usize) -> Result<&'a str, Status> {
    rec.args.get(idx).and_then(Arg::as_str).ok_or(Status::Invalid)
}

fn payload_u32(rec: &Record, idx: usize) -> Option<u32> {
    rec.payload.get(idx).and_then(Arg::as_u32)
}

pub(super) fn access(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    ns.apply_access(rec.timestamp, arg_u32(rec, 0)?)
}

pub(super) fn attr(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    ns.apply_attr(
        rec.timestamp,
        arg_u32(rec, 0)?,
        arg_u32(rec, 1)? as u16,
        arg_u32(rec, 2)?,
        arg_u32(rec, 3)?,
        rec.args.get(4).and_then(Arg::as_i64).ok_or(Status::Invalid)?,
        rec.args.get(5).and_then(Arg::as_i64).ok_or(Status::Invalid)?,
    )
}

pub(super) fn create(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let parent = arg_u32(rec, 0)?;
    let name = arg_str(rec, 1)?.to_owned();
    let node_type = parse_node_type(arg_str(rec, 2)?)?;
    let mode = arg_u32(rec, 3)? as u16;
    let uid = arg_u32(rec, 4)?;
    let gid = arg_u32(rec, 5)?;
    let expected = payload_u32(rec, 0);

    let id = ns.apply_create(rec.timestamp, parent, &name, node_type, mode, uid, gid)?;
    if let Some(expected) = expected {
        if expected != id {
            return Err(Status::MetadataVersionMismatch);
        }
    }
    Ok(())
}

pub(super) fn link(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let inode = arg_u32(rec, 0)?;
    let parent = arg_u32(rec, 1)?;
    let name = arg_str(rec, 2)?;
    ns.apply_link(rec.timestamp, inode, parent, name)
}

pub(super) fn unlink(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let parent = arg_u32(rec, 0)?;
    let name = arg_str(rec, 1)?.to_owned();
    let expected = payload_u32(rec, 0);
    let removed = ns.apply_unlink(rec.timestamp, parent, &name)?;
    if let Some(expected) = expected {
        if expected != removed {
            return Err(Status::MetadataVersionMismatch);
        }
    }
    Ok(())
}

pub(super) fn mv(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let psrc = arg_u32(rec, 0)?;
    let nsrc = arg_str(rec, 1)?.to_owned();
    let pdst = arg_u32(rec, 2)?;
    let ndst = arg_str(rec, 3)?.to_owned();
    ns.apply_move(rec.timestamp, psrc, &nsrc, pdst, &ndst)?;
    Ok(())
}

pub(super) fn symlink(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let parent = arg_u32(rec, 0)?;
    let name = arg_str(rec, 1)?.to_owned();
    let target = arg_str(rec, 2)?.to_owned();
    let uid = arg_u32(rec, 3)?;
    let gid = arg_u32(rec, 4)?;
    let expected = payload_u32(rec, 0);
    let id = ns.apply_symlink(rec.timestamp, parent, &name, &target, uid, gid)?;
    if let Some(expected) = expected {
        if expected != id {
            return Err(Status::MetadataVersionMismatch);
        }
    }
    Ok(())
}

pub(super) fn trunc(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let inode = arg_u32(rec, 0)?;
    let idx = arg_u32(rec, 1)? as usize;
    let expected = payload_u32(rec, 0).map(|v| v as u64);
    let chunk_id = ns.apply_trunc(rec.timestamp, inode, idx)?;
    if let Some(expected) = expected {
        if expected != chunk_id {
            return Err(Status::MetadataVersionMismatch);
        }
    }
    Ok(())
}

pub(super) fn write(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let inode = arg_u32(rec, 0)?;
    let idx = arg_u32(rec, 1)? as usize;
    let expected = rec.payload.get(0).and_then(Arg::as_u64);
    let chunk_id = ns.apply_write(rec.timestamp, inode, idx)?;
    if let Some(expected) = expected {
        if expected != chunk_id {
            return Err(Status::MetadataVersionMismatch);
        }
    }
    Ok(())
}

pub(super) fn setgoal(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let inode = arg_u32(rec, 0)?;
    let goal = arg_u32(rec, 1)? as u8;
    ns.apply_setgoal(rec.timestamp, inode, goal)
}

pub(super) fn settrashtime(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let inode = arg_u32(rec, 0)?;
    let trashtime = arg_u32(rec, 1)?;
    ns.apply_settrashtime(rec.timestamp, inode, trashtime)
}

pub(super) fn setacl(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let inode = arg_u32(rec, 0)?;
    let present = arg_u32(rec, 1)? != 0;
    if !present {
        return ns.apply_setacl(rec.timestamp, inode, None);
    }
    let rich = arg_u32(rec, 2)? != 0;
    let mut entries = Vec::new();
    let mut i = 3;
    while i + 2 < rec.args.len() {
        let tag = arg_u32(rec, i)?;
        let qualifier = arg_u32(rec, i + 1)?;
        let perm = arg_u32(rec, i + 2)? as u16;
        entries.push((tag, qualifier, perm));
        i += 3;
    }
    ns.apply_setacl(rec.timestamp, inode, Some(crate::namespace::node::Acl { rich, entries }))
}

pub(super) fn setxattr(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let inode = arg_u32(rec, 0)?;
    let name = arg_str(rec, 1)?;
    let value = rec.payload.get(0).and_then(Arg::as_str).unwrap_or("").as_bytes().to_vec();
    ns.apply_setxattr(inode, name, value)
}

pub(super) fn clone_op(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let src = arg_u32(rec, 0)?;
    let dst_parent = arg_u32(rec, 1)?;
    let name = arg_str(rec, 2)?.to_owned();
    let overwrite = arg_u32(rec, 3)? != 0;
    let dst_inode = payload_u32(rec, 0).ok_or(Status::Invalid)?;
    ns.apply_clone(rec.timestamp, src, dst_parent, dst_inode, &name, overwrite)
}

pub(super) fn purge(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    ns.apply_purge(arg_u32(rec, 0)?)
}

pub(super) fn undel(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    ns.apply_undel(arg_u32(rec, 0)?)
}

pub(super) fn repair(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let inode = arg_u32(rec, 0)?;
    let idx = arg_u32(rec, 1)? as usize;
    let expected = payload_u32(rec, 0);
    let version = ns.apply_repair(inode, idx)?;
    if let Some(expected) = expected {
        if expected != version {
            return Err(Status::MetadataVersionMismatch);
        }
    }
    Ok(())
}

pub(super) fn checksum(ns: &mut Namespace, rec: &Record, policy: ChecksumPolicy) -> Result<(), Status> {
    let expected = arg_u64(rec, 0)?;
    ns.apply_checksum(expected, policy)
}

pub(super) fn incversion(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let chunk_id = arg_u64(rec, 0)?;
    let expected = payload_u32(rec, 0);
    let version = ns.apply_incversion(chunk_id)?;
    if let Some(expected) = expected {
        if expected != version {
            return Err(Status::MetadataVersionMismatch);
        }
    }
    Ok(())
}

pub(super) fn nextchunkid(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    ns.apply_nextchunkid(arg_u64(rec, 0)?)
}

pub(super) fn setquota(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let owner_id = arg_u32(rec, 0)?;
    let resource = arg_u32(rec, 1)? as u8;
    let limit = arg_u64(rec, 2)?;
    ns.apply_setquota(owner_id, resource, limit)
}

pub(super) fn deprecated_noop(ns: &mut Namespace, _rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    ns.apply_deprecated_noop()
}

pub(super) fn flckinode(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let inode = arg_u32(rec, 0)?;
    let owner = arg_u64(rec, 1)?;
    let pid = arg_u32(rec, 2)?;
    let start = arg_u64(rec, 3)?;
    let end = arg_u64(rec, 4)?;
    let exclusive = arg_u32(rec, 5)? != 0;
    ns.flock_set(inode, FileLock { owner, pid, start, end, exclusive })
}

pub(super) fn clrlck(ns: &mut Namespace, rec: &Record, _policy: ChecksumPolicy) -> Result<(), Status> {
    let inode = arg_u32(rec, 0)?;
    let owner = arg_u64(rec, 1)?;
    ns.flock_clear(inode, owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::node::NodeType;

    #[test]
    fn checked_create_then_unlink_round_trip() {
        let mut ns = Namespace::new();
        let ctx = OpContext::new(0, 0, vec![], 1_700_000_000);
        let (id, rec) = ns.create_checked(&ctx, crate::namespace::node::ROOT_ID, "f", NodeType::File, 0o644).unwrap();
        assert_eq!(rec.opcode, "CREATE");
        assert!(ns.node(id).is_some());

        let (removed, rec) = ns.unlink_checked(&ctx, crate::namespace::node::ROOT_ID, "f").unwrap();
        assert_eq!(removed, id);
        assert_eq!(rec.opcode, "UNLINK");
    }

    #[test]
    fn checked_create_denies_without_write_permission() {
        let mut ns = Namespace::new();
        // Owner-only write bits, caller is a different uid.
        if let Some(root) = ns.node_mut(crate::namespace::node::ROOT_ID) {
            root.header_mut().mode = 0o500;
            root.header_mut().uid = 10;
        }
        let ctx = OpContext::new(20, 20, vec![], 1_700_000_000);
        let err = ns.create_checked(&ctx, crate::namespace::node::ROOT_ID, "f", NodeType::File, 0o644).unwrap_err();
        assert_eq!(err, Status::Permission);
    }

    #[test]
    fn flock_checked_then_funlock_checked_emit_matching_opcodes() {
        let mut ns = Namespace::new();
        let ctx = OpContext::new(0, 0, vec![], 1_700_000_000);
        let (id, _) = ns.create_checked(&ctx, crate::namespace::node::ROOT_ID, "f", NodeType::File, 0o644).unwrap();

        let rec = ns.flock_checked(&ctx, id, 42, 100, 0, 10, true).unwrap();
        assert_eq!(rec.opcode, "FLCKINODE");
        assert_eq!(ns.locks_for(id).len(), 1);

        let rec = ns.funlock_checked(&ctx, id, 42).unwrap();
        assert_eq!(rec.opcode, "CLRLCK");
        assert!(ns.locks_for(id).is_empty());
    }

    #[test]
    fn conflicting_exclusive_locks_are_rejected_and_not_changelogged() {
        let mut ns = Namespace::new();
        let ctx = OpContext::new(0, 0, vec![], 1_700_000_000);
        let (id, _) = ns.create_checked(&ctx, crate::namespace::node::ROOT_ID, "f", NodeType::File, 0o644).unwrap();
        ns.flock_checked(&ctx, id, 1, 100, 0, 10, true).unwrap();
        let err = ns.flock_checked(&ctx, id, 2, 200, 5, 15, true).unwrap_err();
        assert_eq!(err, Status::Locked);
    }

    #[test]
    fn setquota_checked_requires_root() {
        let mut ns = Namespace::new();
        let ctx = OpContext::new(500, 500, vec![], 1_700_000_000);
        assert_eq!(ns.setquota_checked(&ctx, 500, 0, 1024).unwrap_err(), Status::Permission);

        let root_ctx = OpContext::new(0, 0, vec![], 1_700_000_000);
        let rec = ns.setquota_checked(&root_ctx, 500, 0, 1024).unwrap();
        assert_eq!(rec.opcode, "SETQUOTA");
        assert_eq!(ns.quota(500, 0), Some(1024));
    }

    #[test]
    fn clone_checked_round_trips_through_the_mutator_table() {
        let mut ns = Namespace::new();
        let ctx = OpContext::new(0, 0, vec![], 1_700_000_000);
        let (src, _) = ns.create_checked(&ctx, crate::namespace::node::ROOT_ID, "src", NodeType::File, 0o644).unwrap();
        let (dst, rec) = ns.clone_checked(&ctx, src, crate::namespace::node::ROOT_ID, "dst", false).unwrap();
        assert_ne!(dst, src);

        let mut replayed = Namespace::new();
        replayed.create_checked(&ctx, crate::namespace::node::ROOT_ID, "src", NodeType::File, 0o644).unwrap();
        let mutator = crate::namespace::Mutator::lookup(&rec.opcode).unwrap();
        mutator(&mut replayed, &rec, ChecksumPolicy::Abort).unwrap();
        assert!(replayed.node(dst).is_some());
    }
}
