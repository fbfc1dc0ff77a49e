use std::fmt;

use crate::fs::{FsError, Resource, Result};
use crate::node::{InodeGroup, InodeId, NodeKind};
use crate::MAX_ENTRIES;

pub const SELF_NAME: &str = ".";
pub const PARENT_NAME: &str = "..";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirId(pub(crate) u32);

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a directory entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    File(InodeId),
    Directory(DirId),
}

impl Entry {
    pub fn kind(&self) -> NodeKind {
        match self {
            Entry::File(_) => NodeKind::File,
            Entry::Directory(_) => NodeKind::Directory,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    name: String,
    entry: Entry,
}

impl DirEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> Entry {
        self.entry
    }
}

/// A fixed table of `MAX_ENTRIES` name slots.
///
/// Slot 0 always holds `..` and slot 1 holds `.`. New names take the first free slot, so listing
/// order is slot order rather than name order. Lookups are linear scans.
pub struct Directory {
    id: DirId,
    parent: DirId,
    entries: Vec<Option<DirEntry>>,
}

impl Directory {
    /// Creates a directory seeded with its two reserved entries. A directory with no parent is a
    /// root and is its own parent.
    pub(crate) fn new(id: DirId, parent: Option<DirId>) -> Self {
        let parent = parent.unwrap_or(id);
        let mut entries = vec![None; MAX_ENTRIES];
        entries[0] = Some(DirEntry {
            name: PARENT_NAME.to_string(),
            entry: Entry::Directory(parent),
        });
        entries[1] = Some(DirEntry {
            name: SELF_NAME.to_string(),
            entry: Entry::Directory(id),
        });

        Self {
            id,
            parent,
            entries,
        }
    }

    pub fn id(&self) -> DirId {
        self.id
    }

    pub fn parent(&self) -> DirId {
        self.parent
    }

    /// Adds `name`, taking a link reference on the inode when `entry` is a file.
    pub(crate) fn insert(&mut self, name: &str, entry: Entry, inodes: &mut InodeGroup) -> Result<()> {
        if name.is_empty() {
            return Err(FsError::InvalidArgument("empty name".to_string()));
        }
        if self.position(name).is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }

        let slot = self
            .entries
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(FsError::Exhausted(Resource::DirectoryEntries))?;
        *slot = Some(DirEntry {
            name: name.to_string(),
            entry,
        });

        if let Entry::File(inode) = entry {
            inodes.inc_link(inode);
        }
        debug!("dir {}: inserted {:?} -> {:?}", self.id, name, entry);
        Ok(())
    }

    /// Clears the slot holding `name` and drops its link reference, which may destroy the inode.
    pub(crate) fn remove(&mut self, name: &str, inodes: &mut InodeGroup) -> Result<Entry> {
        if name == SELF_NAME || name == PARENT_NAME {
            return Err(FsError::InvalidArgument(format!(
                "cannot remove reserved entry {:?}",
                name
            )));
        }

        let slot = self
            .position(name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        let entry = match self.entries[slot].take() {
            Some(dirent) => dirent.entry,
            None => unreachable!("position() only returns occupied slots"),
        };

        debug!("dir {}: removed {:?}", self.id, name);
        if let Entry::File(inode) = entry {
            inodes.dec_link(inode);
        }
        Ok(entry)
    }

    pub fn get(&self, name: &str) -> Option<Entry> {
        self.position(name)
            .and_then(|slot| self.entries[slot].as_ref())
            .map(DirEntry::entry)
    }

    /// Number of occupied slots, the reserved `..` and `.` included.
    pub fn entry_count(&self) -> usize {
        self.iter().count()
    }

    /// Occupied entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &DirEntry> + '_ {
        self.entries.iter().flatten()
    }

    /// Whether the directory holds nothing beyond its reserved entries.
    pub fn is_empty(&self) -> bool {
        self.iter()
            .all(|dirent| dirent.name == SELF_NAME || dirent.name == PARENT_NAME)
    }

    /// Consumes the directory. Deleting a directory that still names anything is a bug in the
    /// caller's bookkeeping: those names hold link references nobody would ever drop.
    pub(crate) fn delete(self) {
        assert!(self.is_empty(), "directory {} not empty", self.id);
        debug!("deleted dir {}", self.id);
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|slot| match slot {
            Some(dirent) => dirent.name == name,
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::PageStore;

    fn setup() -> (Directory, InodeGroup) {
        let dir = Directory::new(DirId(0), None);
        let inodes = InodeGroup::new(PageStore::new(0, None));
        (dir, inodes)
    }

    #[test]
    fn new_directory_seeds_reserved_entries() {
        let (dir, _) = setup();

        assert_eq!(dir.entry_count(), 2);
        assert_eq!(dir.get("."), Some(Entry::Directory(DirId(0))));
        // The root is its own parent.
        assert_eq!(dir.get(".."), Some(Entry::Directory(DirId(0))));
        assert!(dir.is_empty());
    }

    #[test]
    fn nested_directory_points_at_parent() {
        let dir = Directory::new(DirId(4), Some(DirId(1)));

        assert_eq!(dir.get(".."), Some(Entry::Directory(DirId(1))));
        assert_eq!(dir.get("."), Some(Entry::Directory(DirId(4))));
        assert_eq!(dir.parent(), DirId(1));
    }

    #[test]
    fn insert_takes_link_reference() {
        let (mut dir, mut inodes) = setup();
        let inode = inodes.create().unwrap();

        dir.insert("a", Entry::File(inode), &mut inodes).unwrap();

        assert_eq!(dir.get("a"), Some(Entry::File(inode)));
        assert_eq!(inodes.get(inode).unwrap().link_count(), 1);
        assert_eq!(dir.entry_count(), 3);
        assert!(!dir.is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (mut dir, mut inodes) = setup();
        let inode = inodes.create().unwrap();
        dir.insert("a", Entry::File(inode), &mut inodes).unwrap();

        assert_eq!(
            dir.insert("a", Entry::File(inode), &mut inodes).unwrap_err(),
            FsError::AlreadyExists("a".to_string())
        );
        assert_eq!(
            dir.insert(".", Entry::File(inode), &mut inodes).unwrap_err(),
            FsError::AlreadyExists(".".to_string())
        );
        assert_eq!(inodes.get(inode).unwrap().link_count(), 1);
    }

    #[test]
    fn removed_slot_is_reused_first() {
        let (mut dir, mut inodes) = setup();
        for name in &["a", "b", "c"] {
            let inode = inodes.create().unwrap();
            dir.insert(name, Entry::File(inode), &mut inodes).unwrap();
        }

        dir.remove("a", &mut inodes).unwrap();
        let inode = inodes.create().unwrap();
        dir.insert("d", Entry::File(inode), &mut inodes).unwrap();

        let names: Vec<&str> = dir.iter().map(DirEntry::name).collect();
        assert_eq!(names, vec!["..", ".", "d", "b", "c"]);
    }

    #[test]
    fn remove_drops_link_and_destroys_unopened_inode() {
        let (mut dir, mut inodes) = setup();
        let inode = inodes.create().unwrap();
        dir.insert("a", Entry::File(inode), &mut inodes).unwrap();

        assert_eq!(dir.remove("a", &mut inodes).unwrap(), Entry::File(inode));
        assert_eq!(dir.get("a"), None);
        assert!(inodes.get(inode).is_none());
    }

    #[test]
    fn remove_missing_name_is_not_found() {
        let (mut dir, mut inodes) = setup();

        assert_eq!(
            dir.remove("ghost", &mut inodes).unwrap_err(),
            FsError::NotFound("ghost".to_string())
        );
    }

    #[test]
    fn reserved_entries_cannot_be_removed() {
        let (mut dir, mut inodes) = setup();

        assert!(matches!(
            dir.remove("..", &mut inodes),
            Err(FsError::InvalidArgument(_))
        ));
        assert_eq!(dir.entry_count(), 2);
    }

    #[test]
    fn directory_fills_up() {
        let (mut dir, mut inodes) = setup();
        let inode = inodes.create().unwrap();
        for i in 0..MAX_ENTRIES - 2 {
            dir.insert(&format!("f{}", i), Entry::File(inode), &mut inodes)
                .unwrap();
        }

        assert_eq!(dir.entry_count(), MAX_ENTRIES);
        assert_eq!(
            dir.insert("overflow", Entry::File(inode), &mut inodes)
                .unwrap_err(),
            FsError::Exhausted(Resource::DirectoryEntries)
        );
        assert_eq!(
            inodes.get(inode).unwrap().link_count() as usize,
            MAX_ENTRIES - 2
        );
    }

    #[test]
    fn deleting_empty_directory_succeeds() {
        let (dir, _) = setup();
        dir.delete();
    }

    #[test]
    #[should_panic(expected = "not empty")]
    fn deleting_non_empty_directory_panics() {
        let (mut dir, mut inodes) = setup();
        let inode = inodes.create().unwrap();
        dir.insert("a", Entry::File(inode), &mut inodes).unwrap();
        dir.delete();
    }
}
