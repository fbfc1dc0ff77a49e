use enumflags2::BitFlags;

use crate::dir::{DirId, Directory, Entry};
use crate::file::{FileHandle, OpenFlag, Whence};
use crate::fs::{FileSystem, FsError, Resource, Result};
use crate::node::{InodeId, NodeKind, Stat};
use crate::{MAX_FDS, START_FD};

/// A per-process file descriptor.
pub type Fd = usize;

/// A process's view of the filesystem: a working directory and a fixed table of descriptors.
///
/// Descriptors 0-2 are reserved for the standard streams and never handed out. Closed descriptors
/// go on a free stack and are reused most-recent-first before `next_fd` advances.
pub struct Process {
    cwd: DirId,
    fd_table: Vec<Option<FileHandle>>,
    free_fds: Vec<Fd>,
    next_fd: Fd,
}

impl Process {
    pub fn new(fs: &FileSystem) -> Self {
        let mut fd_table = Vec::with_capacity(MAX_FDS);
        fd_table.resize_with(MAX_FDS, || None);

        Self {
            cwd: fs.root(),
            fd_table,
            free_fds: Vec::new(),
            next_fd: START_FD,
        }
    }

    pub fn cwd(&self) -> DirId {
        self.cwd
    }

    /// Opens `name` in the working directory, creating it first when `flags` has `CREATE`.
    ///
    /// # Errors
    ///
    /// Names with a `/` are nested paths, which are unsupported, as is opening a directory or a
    /// missing name without `CREATE`. Creating fails if the directory is full; any open fails if
    /// the descriptor table is full.
    pub fn open<F>(&mut self, fs: &mut FileSystem, name: &str, flags: F) -> Result<Fd>
    where
        F: Into<BitFlags<OpenFlag>>,
    {
        let flags = flags.into();
        check_name(name)?;
        if self.free_fds.is_empty() && self.next_fd >= MAX_FDS {
            warn!("open({:?}): out of file descriptors", name);
            return Err(FsError::Exhausted(Resource::Descriptors));
        }

        let (dir, inodes) = fs.dir_mut(self.cwd);
        let inode = match dir.get(name) {
            Some(Entry::File(inode)) => inode,
            Some(Entry::Directory(_)) => {
                return Err(FsError::Unsupported(format!("{:?} is a directory", name)))
            }
            None if flags.contains(OpenFlag::CREATE) => {
                let inode = inodes.create()?;
                // The directory's link reference must land before the handle's open reference.
                if let Err(err) = dir.insert(name, Entry::File(inode), inodes) {
                    inodes.reap(inode);
                    return Err(err);
                }
                inode
            }
            None => {
                return Err(FsError::Unsupported(format!(
                    "{:?} does not exist and CREATE was not requested",
                    name
                )))
            }
        };

        let inert = flags & !BitFlags::from(OpenFlag::CREATE);
        if !inert.is_empty() {
            debug!("open({:?}): flags {:?} have no effect", name, inert);
        }

        let handle = FileHandle::open(inode, flags, inodes);
        let fd = self.alloc_fd()?;
        self.fd_table[fd] = Some(handle);
        debug!("open({:?}) = {} (inode {})", name, fd, inode);
        Ok(fd)
    }

    pub fn close(&mut self, fs: &mut FileSystem, fd: Fd) -> Result<()> {
        let handle = self
            .fd_table
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(FsError::BadDescriptor(fd))?;
        self.return_fd(fd);
        debug!("close({}) (inode {})", fd, handle.inode());
        handle.close(&mut fs.inodes);
        Ok(())
    }

    /// Reads into `buf` at the descriptor's cursor and advances it. Returns 0 at end of file.
    pub fn read(&mut self, fs: &mut FileSystem, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let handle = self.handle_mut(fd)?;
        Ok(handle.read(&mut fs.inodes, buf))
    }

    /// Writes `buf` at the descriptor's cursor and advances it.
    pub fn write(&mut self, fs: &mut FileSystem, fd: Fd, buf: &[u8]) -> Result<usize> {
        let handle = self.handle_mut(fd)?;
        handle.write(&mut fs.inodes, buf).map_err(|err| {
            if let FsError::Exhausted(_) = err {
                warn!("write({}): {}", fd, err);
            }
            err
        })
    }

    /// Repositions the descriptor's cursor and returns the new offset. `Whence::End` subtracts
    /// `offset` from the file size.
    pub fn seek(&mut self, fs: &FileSystem, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let handle = self.handle_mut(fd)?;
        handle.seek(&fs.inodes, offset, whence)
    }

    /// Current cursor of `fd`.
    pub fn tell(&self, fd: Fd) -> Result<u64> {
        self.handle(fd).map(FileHandle::position)
    }

    /// Flags `fd` was opened with.
    pub fn flags(&self, fd: Fd) -> Result<BitFlags<OpenFlag>> {
        self.handle(fd).map(FileHandle::flags)
    }

    /// Adds `new_name` as a second name for the file called `old_name`.
    pub fn link(&mut self, fs: &mut FileSystem, old_name: &str, new_name: &str) -> Result<()> {
        check_name(old_name)?;
        check_name(new_name)?;

        let (dir, inodes) = fs.dir_mut(self.cwd);
        let inode = match dir.get(old_name) {
            Some(Entry::File(inode)) => inode,
            Some(Entry::Directory(_)) => {
                return Err(FsError::Unsupported(format!(
                    "cannot link directory {:?}",
                    old_name
                )))
            }
            None => return Err(FsError::NotFound(old_name.to_string())),
        };
        dir.insert(new_name, Entry::File(inode), inodes)
    }

    /// Removes `name`. The file itself lives on while any descriptor still has it open.
    pub fn unlink(&mut self, fs: &mut FileSystem, name: &str) -> Result<()> {
        check_name(name)?;
        let (dir, inodes) = fs.dir_mut(self.cwd);
        dir.remove(name, inodes).map(|_| ())
    }

    /// Moves the file called `old_name` to `new_name`. Fails without changes if `new_name` is
    /// taken.
    pub fn rename(&mut self, fs: &mut FileSystem, old_name: &str, new_name: &str) -> Result<()> {
        self.link(fs, old_name, new_name)?;
        self.unlink(fs, old_name)
    }

    pub fn stat(&self, fs: &FileSystem, name: &str) -> Result<Stat> {
        check_name(name)?;
        match self.cwd_dir(fs).get(name) {
            Some(Entry::File(inode)) => Ok(stat_live(fs, inode)),
            Some(Entry::Directory(_)) => Err(FsError::Unsupported(format!(
                "{:?} is a directory",
                name
            ))),
            None => Err(FsError::NotFound(name.to_string())),
        }
    }

    pub fn fstat(&self, fs: &FileSystem, fd: Fd) -> Result<Stat> {
        let handle = self.handle(fd)?;
        Ok(stat_live(fs, handle.inode()))
    }

    /// Names in the working directory, in slot order.
    pub fn list(&self, fs: &FileSystem) -> Vec<(String, NodeKind)> {
        self.cwd_dir(fs)
            .iter()
            .map(|dirent| (dirent.name().to_string(), dirent.entry().kind()))
            .collect()
    }

    /// Number of descriptors currently open.
    pub fn open_files(&self) -> usize {
        self.fd_table.iter().filter(|slot| slot.is_some()).count()
    }

    /// Closes every open descriptor.
    pub fn exit(mut self, fs: &mut FileSystem) {
        let open: Vec<Fd> = self
            .fd_table
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(fd, _)| fd)
            .collect();
        debug!("process exiting with {} open descriptors", open.len());

        for fd in open {
            if let Some(handle) = self.fd_table[fd].take() {
                handle.close(&mut fs.inodes);
            }
        }
    }

    fn cwd_dir<'a>(&self, fs: &'a FileSystem) -> &'a Directory {
        fs.directory(self.cwd)
            .unwrap_or_else(|| panic!("directory {} does not exist", self.cwd))
    }

    fn alloc_fd(&mut self) -> Result<Fd> {
        if let Some(fd) = self.free_fds.pop() {
            return Ok(fd);
        }
        if self.next_fd >= MAX_FDS {
            return Err(FsError::Exhausted(Resource::Descriptors));
        }

        let fd = self.next_fd;
        self.next_fd += 1;
        Ok(fd)
    }

    fn return_fd(&mut self, fd: Fd) {
        assert!(fd >= START_FD, "returned reserved descriptor {}", fd);
        self.free_fds.push(fd);
    }

    fn handle(&self, fd: Fd) -> Result<&FileHandle> {
        self.fd_table
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(FsError::BadDescriptor(fd))
    }

    fn handle_mut(&mut self, fd: Fd) -> Result<&mut FileHandle> {
        self.fd_table
            .get_mut(fd)
            .and_then(Option::as_mut)
            .ok_or(FsError::BadDescriptor(fd))
    }
}

/// Only flat names are resolvable.
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FsError::InvalidArgument("empty name".to_string()));
    }
    if name.contains('/') {
        return Err(FsError::Unsupported(format!(
            "nested path {:?}",
            name
        )));
    }
    Ok(())
}

fn stat_live(fs: &FileSystem, inode: InodeId) -> Stat {
    fs.stat(inode)
        .unwrap_or_else(|| panic!("inode {} is referenced after it was destroyed", inode))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (FileSystem, Process) {
        let fs = FileSystem::new();
        let proc = Process::new(&fs);
        (fs, proc)
    }

    #[test]
    fn first_descriptor_skips_standard_streams() {
        let (mut fs, mut proc) = setup();

        assert_eq!(proc.open(&mut fs, "a", OpenFlag::CREATE).unwrap(), START_FD);
        assert_eq!(proc.open(&mut fs, "b", OpenFlag::CREATE).unwrap(), START_FD + 1);
    }

    #[test]
    fn standard_stream_descriptors_are_not_open() {
        let (mut fs, mut proc) = setup();
        let mut buf = [0; 1];

        for fd in 0..START_FD {
            assert_eq!(
                proc.read(&mut fs, fd, &mut buf).unwrap_err(),
                FsError::BadDescriptor(fd)
            );
        }
    }

    #[test]
    fn closed_descriptors_are_reused_lifo() {
        let (mut fs, mut proc) = setup();
        let a = proc.open(&mut fs, "a", OpenFlag::CREATE).unwrap();
        let b = proc.open(&mut fs, "b", OpenFlag::CREATE).unwrap();
        let c = proc.open(&mut fs, "c", OpenFlag::CREATE).unwrap();

        proc.close(&mut fs, a).unwrap();
        proc.close(&mut fs, b).unwrap();

        assert_eq!(proc.open(&mut fs, "a", OpenFlag::RDONLY).unwrap(), b);
        assert_eq!(proc.open(&mut fs, "a", OpenFlag::RDONLY).unwrap(), a);
        assert_eq!(proc.open(&mut fs, "a", OpenFlag::RDONLY).unwrap(), c + 1);
    }

    #[test]
    fn descriptor_table_exhaustion_is_an_error() {
        let (mut fs, mut proc) = setup();
        for _ in START_FD..MAX_FDS {
            proc.open(&mut fs, "f", OpenFlag::CREATE).unwrap();
        }

        assert_eq!(
            proc.open(&mut fs, "f", OpenFlag::CREATE).unwrap_err(),
            FsError::Exhausted(Resource::Descriptors)
        );
        // A creating open that can't get a descriptor leaves no name behind.
        assert_eq!(
            proc.open(&mut fs, "g", OpenFlag::CREATE).unwrap_err(),
            FsError::Exhausted(Resource::Descriptors)
        );
        assert!(matches!(
            proc.stat(&fs, "g"),
            Err(FsError::NotFound(_))
        ));

        proc.close(&mut fs, 100).unwrap();
        assert_eq!(proc.open(&mut fs, "f", OpenFlag::RDONLY).unwrap(), 100);
    }

    #[test]
    fn creating_open_links_before_opening() {
        let (mut fs, mut proc) = setup();
        let fd = proc.open(&mut fs, "f", OpenFlag::CREATE).unwrap();

        let stat = proc.fstat(&fs, fd).unwrap();
        assert_eq!(stat.links, 1);
        assert_eq!(stat.opens, 1);
        assert_eq!(stat.kind, NodeKind::File);
    }

    #[test]
    fn opening_missing_name_without_create_is_unsupported() {
        let (mut fs, mut proc) = setup();

        assert!(matches!(
            proc.open(&mut fs, "missing", OpenFlag::RDONLY),
            Err(FsError::Unsupported(_))
        ));
        assert_eq!(fs.inode_count(), 0);
    }

    #[test]
    fn nested_paths_and_directories_are_unsupported() {
        let (mut fs, mut proc) = setup();

        assert!(matches!(
            proc.open(&mut fs, "a/b", OpenFlag::CREATE),
            Err(FsError::Unsupported(_))
        ));
        assert!(matches!(
            proc.open(&mut fs, ".", OpenFlag::RDONLY),
            Err(FsError::Unsupported(_))
        ));
        assert!(matches!(
            proc.open(&mut fs, "", OpenFlag::CREATE),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn full_directory_rejects_creation_without_leaking_inode() {
        let (mut fs, mut proc) = setup();
        for i in 0..crate::MAX_ENTRIES - 2 {
            let fd = proc.open(&mut fs, &format!("f{}", i), OpenFlag::CREATE).unwrap();
            proc.close(&mut fs, fd).unwrap();
        }
        let live = fs.inode_count();

        assert_eq!(
            proc.open(&mut fs, "one-too-many", OpenFlag::CREATE).unwrap_err(),
            FsError::Exhausted(Resource::DirectoryEntries)
        );
        assert_eq!(fs.inode_count(), live);
        assert_eq!(proc.open_files(), 0);
    }

    #[test]
    fn close_of_unknown_descriptor_fails() {
        let (mut fs, mut proc) = setup();
        let fd = proc.open(&mut fs, "f", OpenFlag::CREATE).unwrap();
        proc.close(&mut fs, fd).unwrap();

        assert_eq!(proc.close(&mut fs, fd).unwrap_err(), FsError::BadDescriptor(fd));
        assert_eq!(
            proc.close(&mut fs, MAX_FDS + 1).unwrap_err(),
            FsError::BadDescriptor(MAX_FDS + 1)
        );
    }

    #[test]
    fn inert_flags_are_kept_on_the_handle() {
        let (mut fs, mut proc) = setup();
        let flags = OpenFlag::CREATE | OpenFlag::TRUNC | OpenFlag::APPEND;
        let fd = proc.open(&mut fs, "f", flags).unwrap();
        proc.write(&mut fs, fd, b"data").unwrap();
        proc.close(&mut fs, fd).unwrap();

        // TRUNC does not truncate and APPEND does not move the cursor.
        let fd = proc.open(&mut fs, "f", flags).unwrap();
        assert_eq!(proc.flags(fd).unwrap(), flags);
        assert_eq!(proc.tell(fd).unwrap(), 0);
        assert_eq!(proc.fstat(&fs, fd).unwrap().size, 4);
    }

    #[test]
    fn link_requires_existing_source_and_free_target() {
        let (mut fs, mut proc) = setup();
        proc.open(&mut fs, "a", OpenFlag::CREATE).unwrap();
        proc.open(&mut fs, "b", OpenFlag::CREATE).unwrap();

        assert_eq!(
            proc.link(&mut fs, "missing", "c").unwrap_err(),
            FsError::NotFound("missing".to_string())
        );
        assert_eq!(
            proc.link(&mut fs, "a", "b").unwrap_err(),
            FsError::AlreadyExists("b".to_string())
        );
        proc.link(&mut fs, "a", "c").unwrap();
        assert_eq!(proc.stat(&fs, "c").unwrap().links, 2);
        assert_eq!(proc.stat(&fs, "a").unwrap().ino, proc.stat(&fs, "c").unwrap().ino);
    }

    #[test]
    fn unlink_reports_missing_names() {
        let (mut fs, mut proc) = setup();

        assert_eq!(
            proc.unlink(&mut fs, "nope").unwrap_err(),
            FsError::NotFound("nope".to_string())
        );
        assert!(matches!(
            proc.unlink(&mut fs, ".."),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rename_moves_the_name() {
        let (mut fs, mut proc) = setup();
        let fd = proc.open(&mut fs, "old", OpenFlag::CREATE).unwrap();
        proc.write(&mut fs, fd, b"payload").unwrap();
        proc.close(&mut fs, fd).unwrap();

        proc.rename(&mut fs, "old", "new").unwrap();

        assert!(matches!(proc.stat(&fs, "old"), Err(FsError::NotFound(_))));
        let stat = proc.stat(&fs, "new").unwrap();
        assert_eq!(stat.links, 1);
        assert_eq!(stat.size, 7);
    }

    #[test]
    fn list_shows_entries_in_slot_order() {
        let (mut fs, mut proc) = setup();
        proc.open(&mut fs, "b", OpenFlag::CREATE).unwrap();
        proc.open(&mut fs, "a", OpenFlag::CREATE).unwrap();

        let names: Vec<(String, NodeKind)> = proc.list(&fs);
        assert_eq!(
            names,
            vec![
                ("..".to_string(), NodeKind::Directory),
                (".".to_string(), NodeKind::Directory),
                ("b".to_string(), NodeKind::File),
                ("a".to_string(), NodeKind::File),
            ]
        );
    }

    #[test]
    fn exit_closes_everything() {
        let (mut fs, mut proc) = setup();
        let fd = proc.open(&mut fs, "f", OpenFlag::CREATE).unwrap();
        proc.write(&mut fs, fd, b"bytes").unwrap();
        proc.open(&mut fs, "f", OpenFlag::RDONLY).unwrap();
        proc.unlink(&mut fs, "f").unwrap();
        assert_eq!(fs.inode_count(), 1);

        proc.exit(&mut fs);

        assert_eq!(fs.inode_count(), 0);
        assert_eq!(fs.pages_in_use(), 0);
    }

    #[test]
    #[should_panic(expected = "directory 7 does not exist")]
    fn listing_a_vanished_directory_panics() {
        let (fs, mut proc) = setup();
        proc.cwd = DirId(7);
        proc.list(&fs);
    }
}
