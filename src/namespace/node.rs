//! `FsNode` family: a tagged union with per-variant data and a common
//! header (spec §3, §9 "Deep inheritance ... becomes a tagged-union").

use std::collections::BTreeMap;

/// Root directory id; every namespace has exactly one node with this id.
pub const ROOT_ID: u32 = 1;

/// Maximum directory-entry name length in bytes (spec §3 FsNodeDirectory).
pub const MAX_NAME_LEN: usize = 255;

/// Maximum symlink target length in bytes (spec §3 FsNodeSymlink).
pub const MAX_PATH_LEN: usize = 4096;

/// POSIX or rich ACL attached to a node. Kept as an opaque entry list; the
/// core only needs to carry it and report `mode`/`acl` consistency, not
/// interpret entries itself (that belongs to the VFS translation layer,
/// an external collaborator per spec §1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub rich: bool,
    pub entries: Vec<(u32, u32, u16)>, // (tag, qualifier, perm-bits)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
    Symlink,
    Fifo,
    BlockDevice,
    CharDevice,
    Socket,
    Trash,
    Reserved,
}

/// Fields common to every namespace object (spec §3 "FsNode").
#[derive(Debug, Clone)]
pub struct Header {
    pub id: u32,
    pub node_type: NodeType,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub goal: u8,
    pub trashtime: u32,
    pub acl: Option<Acl>,
    /// Parent directory ids; more than one only when hardlinked.
    pub parents: Vec<u32>,
    pub checksum: u64,
}

impl Header {
    pub fn new(id: u32, node_type: NodeType, mode: u16, uid: u32, gid: u32, now: i64) -> Self {
        Self {
            id,
            node_type,
            mode,
            uid,
            gid,
            atime: now,
            mtime: now,
            ctime: now,
            goal: 1,
            trashtime: 86400,
            acl: None,
            parents: Vec::new(),
            checksum: 0,
        }
    }

    /// Recomputes this node's incremental checksum contribution from its
    /// own fields (excludes children, which fold their checksum upward
    /// through the directory that owns them).
    pub fn recompute_checksum(&mut self) {
        let mut h: u64 = 0x811c_9dc5_2d22_c6a5 ^ self.id as u64;
        h = h.wrapping_mul(0x100_0000_01b3).wrapping_add(self.mode as u64);
        h = h.wrapping_mul(0x100_0000_01b3).wrapping_add(self.uid as u64);
        h = h.wrapping_mul(0x100_0000_01b3).wrapping_add(self.gid as u64);
        h = h.wrapping_mul(0x100_0000_01b3).wrapping_add(self.mtime as u64);
        h = h.wrapping_mul(0x100_0000_01b3).wrapping_add(self.ctime as u64);
        h = h.wrapping_mul(0x100_0000_01b3).wrapping_add(self.goal as u64);
        self.checksum = h;
    }
}

/// Directory aggregate stats, maintained incrementally (spec §3
/// FsNodeDirectory).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirStats {
    pub inodes: u64,
    pub dirs: u64,
    pub files: u64,
    pub chunks: u64,
    pub length: u64,
    pub size: u64,
    pub realsize: u64,
}

#[derive(Debug, Clone)]
pub struct DirectoryData {
    /// name -> child id, ordered so readdir cookies (positional index) are
    /// stable across insertions that don't touch earlier entries.
    pub entries: BTreeMap<String, u32>,
    pub stats: DirStats,
    /// Reverse-link count from other directories that hold this one via a
    /// hardlinked subtree entry (rare; mirrors spec's `nlink`).
    pub nlink: u32,
}

impl DirectoryData {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new(), stats: DirStats::default(), nlink: 1 }
    }

    /// O(1)-ish positional lookup by readdir cookie index, used to resume a
    /// directory listing.
    pub fn entry_at(&self, index: usize) -> Option<(&String, &u32)> {
        self.entries.iter().nth(index)
    }
}

impl Default for DirectoryData {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileData {
    pub length: u64,
    /// Chunk ids indexed by logical chunk index; `0` marks a hole.
    pub chunks: Vec<u64>,
    pub sessionids: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct SymlinkData {
    pub target: String,
}

/// A namespace object: common [`Header`] plus variant-specific data.
#[derive(Debug, Clone)]
pub enum FsNode {
    File(Header, FileData),
    Directory(Header, DirectoryData),
    Symlink(Header, SymlinkData),
    Special(Header),
}

impl FsNode {
    pub fn header(&self) -> &Header {
        match self {
            FsNode::File(h, _) | FsNode::Directory(h, _) | FsNode::Symlink(h, _) | FsNode::Special(h) => h,
        }
    }

    pub fn header_mut(&mut self) -> &mut Header {
        match self {
            FsNode::File(h, _) | FsNode::Directory(h, _) | FsNode::Symlink(h, _) | FsNode::Special(h) => h,
        }
    }

    pub fn id(&self) -> u32 {
        self.header().id
    }

    pub fn as_directory(&self) -> Option<(&Header, &DirectoryData)> {
        match self {
            FsNode::Directory(h, d) => Some((h, d)),
            _ => None,
        }
    }

    pub fn as_directory_mut(&mut self) -> Option<(&mut Header, &mut DirectoryData)> {
        match self {
            FsNode::Directory(h, d) => Some((h, d)),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<(&Header, &FileData)> {
        match self {
            FsNode::File(h, d) => Some((h, d)),
            _ => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<(&mut Header, &mut FileData)> {
        match self {
            FsNode::File(h, d) => Some((h, d)),
            _ => None,
        }
    }
}
