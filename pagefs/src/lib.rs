//! An in-memory filesystem built the way classic Unix filesystems are: inodes mapping byte
//! ranges onto fixed-size pages through direct and doubly-indirect tables, directories as fixed
//! name tables, and per-process descriptor tables over seekable file handles.
//!
//! ```
//! use pagefs::{FileSystem, OpenFlag, Process, Whence};
//!
//! let mut fs = FileSystem::new();
//! let mut proc = Process::new(&fs);
//!
//! let fd = proc.open(&mut fs, "file", OpenFlag::CREATE)?;
//! proc.write(&mut fs, fd, b"Hello, world!\0")?;
//! proc.seek(&fs, fd, 0, Whence::Set)?;
//!
//! let mut buf = [0; 14];
//! assert_eq!(proc.read(&mut fs, fd, &mut buf)?, 14);
//! assert_eq!(&buf, b"Hello, world!\0");
//! proc.close(&mut fs, fd)?;
//! # Ok::<(), pagefs::FsError>(())
//! ```
#[macro_use]
extern crate log;

mod alloc;
mod dir;
mod file;
mod fs;
mod node;
mod proc;

pub use crate::alloc::PageId;
pub use crate::dir::{DirEntry, DirId, Directory, Entry};
pub use crate::file::{FileHandle, OpenFlag, Whence};
pub use crate::fs::{ErrorKind, FileSystem, FileSystemBuilder, FsError, Resource, Result};
pub use crate::node::{Inode, InodeId, NodeKind, Stat};
pub use crate::proc::{Fd, Process};
pub use enumflags2::BitFlags;

/// Bytes per storage page.
pub const PAGE_SIZE: usize = 4096;
/// Page slots an inode addresses without indirection. Also the number of slots in each indirect
/// table.
pub const DIRECT_BLOCKS: usize = 256;
/// Total page slots addressable by one inode, direct and doubly-indirect.
pub const MAX_BLOCKS: usize = DIRECT_BLOCKS + DIRECT_BLOCKS * DIRECT_BLOCKS;
/// Slots in a directory, the reserved `..` and `.` included.
pub const MAX_ENTRIES: usize = 128;
/// Slots in a process's descriptor table.
pub const MAX_FDS: usize = 512;
/// First descriptor handed out; 0-2 belong to the standard streams.
pub const START_FD: Fd = 3;
