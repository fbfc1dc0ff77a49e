use enumflags2::{bitflags, BitFlags};

use crate::fs::{FsError, Result};
use crate::node::{InodeGroup, InodeId};

/// Flags accepted by `Process::open`.
///
/// Only `CREATE` changes what `open` does. Every other flag is accepted, remembered on the handle
/// and otherwise has no effect; they are reserved for future use.
#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// No effect.
    RDONLY = 0b0000_0000_0000_0001,
    /// No effect.
    WRONLY = 0b0000_0000_0000_0010,
    /// No effect.
    RDWR = 0b0000_0000_0000_0100,
    /// No effect, nothing here can block.
    NONBLOCK = 0b0000_0000_0000_1000,
    /// No effect, writes land at the handle's cursor.
    APPEND = 0b0000_0000_0001_0000,
    /// Create the file if the name does not resolve.
    CREATE = 0b0000_0000_0010_0000,
    /// No effect, existing content is kept.
    TRUNC = 0b0000_0000_0100_0000,
    /// No effect, an existing file is opened as usual.
    EXCL = 0b0000_0000_1000_0000,
    /// No effect.
    SHLOCK = 0b0000_0001_0000_0000,
    /// No effect.
    EXLOCK = 0b0000_0010_0000_0000,
    /// No effect, there are no symbolic links.
    NOFOLLOW = 0b0000_0100_0000_0000,
    /// No effect, there are no symbolic links.
    SYMLINK = 0b0000_1000_0000_0000,
    /// No effect.
    EVTONLY = 0b0001_0000_0000_0000,
    /// No effect, there is no exec.
    CLOEXEC = 0b0010_0000_0000_0000,
}

/// Reference point for `seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Cursor becomes `offset`.
    Set,
    /// Cursor moves by `offset`.
    Cur,
    /// Cursor becomes `size - offset`. Note the subtraction: a positive offset lands before the
    /// end of the file.
    End,
}

/// One open session on an inode, with its own cursor.
///
/// A handle is open for exactly as long as it exists: `close` consumes it, so there is no closed
/// state to check.
#[derive(Debug)]
pub struct FileHandle {
    inode: InodeId,
    seek: u64,
    flags: BitFlags<OpenFlag>,
}

impl FileHandle {
    /// Takes an open reference on `inode`.
    pub(crate) fn open(inode: InodeId, flags: BitFlags<OpenFlag>, inodes: &mut InodeGroup) -> Self {
        inodes.inc_open(inode);
        Self {
            inode,
            seek: 0,
            flags,
        }
    }

    /// Drops the open reference, destroying the inode if it was also unlinked.
    pub(crate) fn close(self, inodes: &mut InodeGroup) {
        inodes.dec_open(self.inode);
    }

    pub fn inode(&self) -> InodeId {
        self.inode
    }

    pub fn position(&self) -> u64 {
        self.seek
    }

    pub fn flags(&self) -> BitFlags<OpenFlag> {
        self.flags
    }

    pub(crate) fn read(&mut self, inodes: &mut InodeGroup, buf: &mut [u8]) -> usize {
        let n = inodes.read(self.inode, self.seek, buf);
        self.seek += n as u64;
        n
    }

    pub(crate) fn write(&mut self, inodes: &mut InodeGroup, buf: &[u8]) -> Result<usize> {
        let n = inodes.write(self.inode, self.seek, buf)?;
        self.seek += n as u64;
        Ok(n)
    }

    /// Moves the cursor. The cursor may land past the end of the file but never before its start.
    pub(crate) fn seek(&mut self, inodes: &InodeGroup, offset: i64, whence: Whence) -> Result<u64> {
        let target = match whence {
            Whence::Set => Some(offset),
            Whence::Cur => (self.seek as i64).checked_add(offset),
            Whence::End => (inodes.size(self.inode) as i64).checked_sub(offset),
        };

        match target {
            Some(target) if target >= 0 => {
                self.seek = target as u64;
                Ok(self.seek)
            }
            _ => Err(FsError::InvalidArgument(format!(
                "seek by {} from {:?} leaves the file",
                offset, whence
            ))),
        }
    }
}
