use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::alloc::PageStore;
use crate::dir::{DirId, Directory};
use crate::node::{Inode, InodeGroup, InodeId, Stat};
use crate::proc::Fd;

pub type Result<T> = std::result::Result<T, FsError>;

/// Fixed-size resources an operation can run out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Descriptors,
    DirectoryEntries,
    BlockIndex,
    Pages,
    Inodes,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Descriptors => "file descriptor table",
            Resource::DirectoryEntries => "directory entry table",
            Resource::BlockIndex => "block index space",
            Resource::Pages => "page store",
            Resource::Inodes => "inode id space",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ResourceExhausted,
    NotFound,
    AlreadyExists,
    Unsupported,
    InvalidArgument,
}

/// Errors caused by the caller's input or by running out of room. Broken engine invariants are
/// not represented here; they panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("no entry named {0:?}")]
    NotFound(String),
    #[error("file descriptor {0} is not open")]
    BadDescriptor(Fd),
    #[error("entry {0:?} already exists")]
    AlreadyExists(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} exhausted")]
    Exhausted(Resource),
}

impl FsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::NotFound(_) | FsError::BadDescriptor(_) => ErrorKind::NotFound,
            FsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            FsError::Unsupported(_) => ErrorKind::Unsupported,
            FsError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            FsError::Exhausted(_) => ErrorKind::ResourceExhausted,
        }
    }
}

/// State shared by every process: the inodes, the pages backing them and the directories naming
/// them. Processes borrow it mutably for each call.
pub struct FileSystem {
    pub(crate) inodes: InodeGroup,
    pub(crate) dirs: BTreeMap<DirId, Directory>,
    root: DirId,
}

impl FileSystem {
    pub fn new() -> Self {
        FileSystemBuilder::new().build()
    }

    pub fn builder() -> FileSystemBuilder {
        FileSystemBuilder::new()
    }

    pub fn root(&self) -> DirId {
        self.root
    }

    pub fn directory(&self, id: DirId) -> Option<&Directory> {
        self.dirs.get(&id)
    }

    /// A live inode. Destroyed inodes are gone for good.
    pub fn inode(&self, id: InodeId) -> Option<&Inode> {
        self.inodes.get(id)
    }

    /// Metadata for a live inode.
    pub fn stat(&self, id: InodeId) -> Option<Stat> {
        self.inodes.get(id).map(Inode::stat)
    }

    /// Number of inodes not yet destroyed.
    pub fn inode_count(&self) -> usize {
        self.inodes.len()
    }

    /// Number of pages currently backing file content.
    pub fn pages_in_use(&self) -> usize {
        self.inodes.pages_in_use()
    }

    /// Tears the filesystem down after checking that nothing is left in it: every name unlinked
    /// and every descriptor closed. Plain `drop` skips the checks.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` if the root still names files or an unlinked file is still
    /// open somewhere.
    pub fn unmount(mut self) -> Result<()> {
        let names = self
            .directory(self.root)
            .map_or(0, |root| root.entry_count() - 2);
        if names > 0 {
            return Err(FsError::InvalidArgument(format!(
                "root directory still names {} entries",
                names
            )));
        }
        if !self.inodes.is_empty() {
            return Err(FsError::InvalidArgument(format!(
                "{} inodes are still open",
                self.inodes.len()
            )));
        }

        debug_assert_eq!(self.inodes.pages_in_use(), 0);
        for (_, dir) in std::mem::take(&mut self.dirs) {
            dir.delete();
        }
        debug!("unmounted filesystem");
        Ok(())
    }

    /// Borrows a directory together with the inodes its entries reference.
    pub(crate) fn dir_mut(&mut self, id: DirId) -> (&mut Directory, &mut InodeGroup) {
        let dir = self
            .dirs
            .get_mut(&id)
            .unwrap_or_else(|| panic!("directory {} does not exist", id));
        (dir, &mut self.inodes)
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Configures the page store behind a `FileSystem`.
#[derive(Debug, Default, Clone)]
pub struct FileSystemBuilder {
    preallocated_pages: usize,
    page_limit: Option<usize>,
}

impl FileSystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the page arena up front so early writes don't have to grow it.
    pub fn with_preallocated_pages(mut self, pages: usize) -> Self {
        self.preallocated_pages = pages;
        self
    }

    /// Caps the number of live pages. Writes needing more fail with `Exhausted(Pages)`.
    pub fn with_page_limit(mut self, pages: usize) -> Self {
        self.page_limit = Some(pages);
        self
    }

    pub fn build(self) -> FileSystem {
        let root = DirId(0);
        let mut dirs = BTreeMap::new();
        dirs.insert(root, Directory::new(root, None));
        debug!(
            "new filesystem: {} preallocated pages, limit {:?}",
            self.preallocated_pages, self.page_limit
        );

        FileSystem {
            inodes: InodeGroup::new(PageStore::new(self.preallocated_pages, self.page_limit)),
            dirs,
            root,
        }
    }
}
