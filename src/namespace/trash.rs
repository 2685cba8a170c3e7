//! Trash queue: unlinked-but-not-yet-purged nodes, ordered by the deadline
//! at which the background sweeper (spec §4.10 "Trash") permanently
//! removes them.

use std::collections::BTreeMap;

/// One trashed node: its original location, kept so `UNDEL` can restore it.
#[derive(Debug, Clone)]
pub struct TrashEntry {
    pub inode: u32,
    pub parent: u32,
    pub name: String,
}

/// Nodes awaiting permanent deletion, indexed by `(deadline, inode)` so the
/// sweeper can pop everything due without scanning the whole queue, and by
/// `inode` so `PURGE`/`UNDEL` can find an entry in O(log n) regardless of
/// its deadline.
#[derive(Debug, Clone, Default)]
pub struct Trash {
    by_deadline: BTreeMap<(i64, u32), TrashEntry>,
    inode_deadline: std::collections::HashMap<u32, i64>,
}

impl Trash {
    pub fn new() -> Self {
        Self { by_deadline: BTreeMap::new(), inode_deadline: std::collections::HashMap::new() }
    }

    pub fn insert(&mut self, deadline: i64, inode: u32, parent: u32, name: String) {
        self.inode_deadline.insert(inode, deadline);
        self.by_deadline.insert((deadline, inode), TrashEntry { inode, parent, name });
    }

    pub fn remove_by_inode(&mut self, inode: u32) -> Option<TrashEntry> {
        let deadline = self.inode_deadline.remove(&inode)?;
        self.by_deadline.remove(&(deadline, inode))
    }

    pub fn contains(&self, inode: u32) -> bool {
        self.inode_deadline.contains_key(&inode)
    }

    pub fn len(&self) -> usize {
        self.by_deadline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_deadline.is_empty()
    }

    /// Removes and returns the inode ids of every entry whose deadline is
    /// `<= now`.
    pub fn take_expired(&mut self, now: i64) -> Vec<u32> {
        let due: Vec<(i64, u32)> =
            self.by_deadline.range(..=(now, u32::MAX)).map(|(k, _)| *k).collect();
        let mut expired = Vec::with_capacity(due.len());
        for key in due {
            if let Some(entry) = self.by_deadline.remove(&key) {
                self.inode_deadline.remove(&entry.inode);
                expired.push(entry.inode);
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_only_due_entries() {
        let mut t = Trash::new();
        t.insert(100, 5, 1, "a".to_owned());
        t.insert(200, 6, 1, "b".to_owned());
        let expired = t.take_expired(150);
        assert_eq!(expired, vec![5]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn undel_removes_entry_regardless_of_deadline() {
        let mut t = Trash::new();
        t.insert(500, 7, 2, "c".to_owned());
        let entry = t.remove_by_inode(7).unwrap();
        assert_eq!(entry.parent, 2);
        assert!(!t.contains(7));
    }
}
