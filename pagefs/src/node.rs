use std::cmp;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use crate::alloc::{PageId, PageStore};
use crate::fs::{FsError, Resource, Result};
use crate::{DIRECT_BLOCKS, MAX_BLOCKS, PAGE_SIZE};

/// A page of page references, the intermediate level of the doubly-indirect table.
type IndirectBlock = [Option<PageId>; DIRECT_BLOCKS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeId(u32);

impl InodeId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// A point-in-time copy of an inode's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub ino: InodeId,
    /// Always `File`; directories are not backed by inodes.
    pub kind: NodeKind,
    pub size: u64,
    pub links: u32,
    pub opens: u32,
    /// Pages currently allocated to the file, excluding indirect tables.
    pub pages: usize,
    pub create_time: SystemTime,
    pub access_time: SystemTime,
    pub mod_time: SystemTime,
}

/// Maps a file's page indices to pages in the store.
///
/// The first `DIRECT_BLOCKS` indices live in the direct table. Everything past that goes through
/// the doubly-indirect table: `(index - DIRECT_BLOCKS) / DIRECT_BLOCKS` picks the intermediate
/// block and `(index - DIRECT_BLOCKS) % DIRECT_BLOCKS` the slot inside it. Both the top-level
/// table and each intermediate block are only allocated once a write touches them.
struct BlockMap {
    direct: [Option<PageId>; DIRECT_BLOCKS],
    double: Option<Box<[Option<Box<IndirectBlock>>]>>,
}

impl BlockMap {
    fn new() -> Self {
        Self {
            direct: [None; DIRECT_BLOCKS],
            double: None,
        }
    }

    fn split(index: usize) -> (usize, usize) {
        let relative = index - DIRECT_BLOCKS;
        (relative / DIRECT_BLOCKS, relative % DIRECT_BLOCKS)
    }

    fn get(&self, index: usize) -> Option<PageId> {
        if index < DIRECT_BLOCKS {
            return self.direct[index];
        }

        let (double_slot, single_slot) = Self::split(index);
        self.double.as_ref()?.get(double_slot)?.as_ref()?[single_slot]
    }

    /// Returns the slot for `index`, materializing indirect tables on the way. Callers must keep
    /// `index` below `MAX_BLOCKS`.
    fn slot_mut(&mut self, index: usize) -> &mut Option<PageId> {
        debug_assert!(index < MAX_BLOCKS);
        if index < DIRECT_BLOCKS {
            return &mut self.direct[index];
        }

        let (double_slot, single_slot) = Self::split(index);
        let double = self
            .double
            .get_or_insert_with(|| vec![None; DIRECT_BLOCKS].into_boxed_slice());
        let single = double[double_slot].get_or_insert_with(|| {
            trace!("materializing indirect block {}", double_slot);
            Box::new([None; DIRECT_BLOCKS])
        });
        &mut single[single_slot]
    }

    fn pages(&self) -> impl Iterator<Item = PageId> + '_ {
        let indirect = self
            .double
            .iter()
            .flat_map(|double| double.iter())
            .flatten()
            .flat_map(|single| single.iter());
        self.direct.iter().chain(indirect).filter_map(|slot| *slot)
    }

    /// Empties the map, handing back every page it referenced.
    fn drain(&mut self) -> Vec<PageId> {
        let pages = self.pages().collect();
        self.direct = [None; DIRECT_BLOCKS];
        self.double = None;
        pages
    }
}

/// The storage side of a file: its content and metadata, independent of any name.
pub struct Inode {
    id: InodeId,
    /// Highest byte offset ever written.
    size: u64,
    /// Directory entries naming this inode.
    link_count: u32,
    /// Live file handles on this inode.
    open_count: u32,
    create_time: SystemTime,
    access_time: SystemTime,
    mod_time: SystemTime,
    blocks: BlockMap,
}

impl Inode {
    fn new(id: InodeId) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            size: 0,
            link_count: 0,
            open_count: 0,
            create_time: now,
            access_time: now,
            mod_time: now,
            blocks: BlockMap::new(),
        }
    }

    pub fn id(&self) -> InodeId {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn link_count(&self) -> u32 {
        self.link_count
    }

    pub fn open_count(&self) -> u32 {
        self.open_count
    }

    /// Copies up to `buf.len()` bytes starting at `offset` into `buf`. Reads stop at the end of
    /// the file, so a read at or past `size()` returns 0. Pages inside the file that were never
    /// written read as zeros.
    pub fn read_at(&mut self, pages: &PageStore, offset: u64, buf: &mut [u8]) -> usize {
        if buf.is_empty() || offset >= self.size {
            return 0;
        }

        let len = cmp::min(buf.len() as u64, self.size - offset) as usize;
        let mut read = 0;
        while read < len {
            let (index, page_offset) = locate(offset + read as u64);
            let n = cmp::min(PAGE_SIZE - page_offset, len - read);
            let dst = &mut buf[read..read + n];

            match self.blocks.get(index) {
                Some(page) => dst.copy_from_slice(&pages.page(page)[page_offset..page_offset + n]),
                None => dst.iter_mut().for_each(|b| *b = 0),
            }
            read += n;
        }

        trace!("inode {}: read {} bytes at {}", self.id, read, offset);
        self.access_time = SystemTime::now();
        read
    }

    /// Copies `buf` into the file at `offset`, allocating pages as it goes. The file grows to
    /// cover the written range; any untouched range below `offset` becomes a hole.
    ///
    /// # Errors
    ///
    /// A write reaching past the last addressable page fails before anything is written. If the
    /// page store runs dry part way through, the bytes already copied are reported as a short
    /// write; the error is only returned when nothing could be written.
    pub fn write_at(&mut self, pages: &mut PageStore, offset: u64, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(FsError::Exhausted(Resource::BlockIndex))?;
        if (end - 1) / PAGE_SIZE as u64 >= MAX_BLOCKS as u64 {
            return Err(FsError::Exhausted(Resource::BlockIndex));
        }

        let mut written = 0;
        while written < buf.len() {
            let (index, page_offset) = locate(offset + written as u64);
            let n = cmp::min(PAGE_SIZE - page_offset, buf.len() - written);

            let slot = self.blocks.slot_mut(index);
            let page = match *slot {
                Some(page) => page,
                None => match pages.allocate() {
                    Ok(page) => {
                        *slot = Some(page);
                        page
                    }
                    Err(err) if written == 0 => return Err(err),
                    Err(err) => {
                        warn!("inode {}: short write, {}", self.id, err);
                        break;
                    }
                },
            };

            pages.page_mut(page)[page_offset..page_offset + n]
                .copy_from_slice(&buf[written..written + n]);
            written += n;
        }

        trace!("inode {}: wrote {} bytes at {}", self.id, written, offset);
        self.size = cmp::max(self.size, offset + written as u64);
        let now = SystemTime::now();
        self.mod_time = now;
        self.access_time = now;
        Ok(written)
    }

    pub fn stat(&self) -> Stat {
        Stat {
            ino: self.id,
            kind: NodeKind::File,
            size: self.size,
            links: self.link_count,
            opens: self.open_count,
            pages: self.blocks.pages().count(),
            create_time: self.create_time,
            access_time: self.access_time,
            mod_time: self.mod_time,
        }
    }
}

/// Splits a byte offset into a page index and the offset inside that page.
fn locate(offset: u64) -> (usize, usize) {
    (
        (offset / PAGE_SIZE as u64) as usize,
        (offset % PAGE_SIZE as u64) as usize,
    )
}

/// Every live inode along with the pages backing them.
///
/// An inode is jointly owned by the directory entries and file handles that reference it. The
/// four `inc_*`/`dec_*` methods are the only way to change those counts, and every decrement
/// funnels into `reap`, which destroys the inode once both counts are zero.
pub struct InodeGroup {
    nodes: BTreeMap<InodeId, Inode>,
    pages: PageStore,
    next_id: u32,
}

impl InodeGroup {
    pub fn new(pages: PageStore) -> Self {
        Self {
            nodes: BTreeMap::new(),
            pages,
            next_id: 0,
        }
    }

    /// Allocates an empty inode with both reference counts at zero. The caller must link or open
    /// it before calling anything that may reap it.
    ///
    /// Ids are never reused, so the group stops handing out inodes once the id space is spent.
    pub fn create(&mut self) -> Result<InodeId> {
        let id = InodeId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or(FsError::Exhausted(Resource::Inodes))?;
        self.nodes.insert(id, Inode::new(id));
        debug!("created inode {}", id);
        Ok(id)
    }

    pub fn get(&self, id: InodeId) -> Option<&Inode> {
        self.nodes.get(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn pages_in_use(&self) -> usize {
        self.pages.in_use()
    }

    pub fn read(&mut self, id: InodeId, offset: u64, buf: &mut [u8]) -> usize {
        let node = self.nodes.get_mut(&id).unwrap_or_else(|| dangling(id));
        node.read_at(&self.pages, offset, buf)
    }

    pub fn write(&mut self, id: InodeId, offset: u64, buf: &[u8]) -> Result<usize> {
        let node = self.nodes.get_mut(&id).unwrap_or_else(|| dangling(id));
        node.write_at(&mut self.pages, offset, buf)
    }

    pub fn size(&self, id: InodeId) -> u64 {
        self.node(id).size()
    }

    pub fn inc_link(&mut self, id: InodeId) {
        let node = self.node_mut(id);
        node.link_count += 1;
    }

    pub fn dec_link(&mut self, id: InodeId) {
        let node = self.node_mut(id);
        assert!(node.link_count > 0, "inode {} link count underflow", id);
        node.link_count -= 1;
        self.reap(id);
    }

    pub fn inc_open(&mut self, id: InodeId) {
        let node = self.node_mut(id);
        node.open_count += 1;
    }

    pub fn dec_open(&mut self, id: InodeId) {
        let node = self.node_mut(id);
        assert!(node.open_count > 0, "inode {} open count underflow", id);
        node.open_count -= 1;
        self.reap(id);
    }

    /// Destroys the inode if nothing references it any more. Returns whether it was destroyed.
    pub fn reap(&mut self, id: InodeId) -> bool {
        let node = self.node(id);
        if node.link_count != 0 || node.open_count != 0 {
            return false;
        }

        if let Some(mut node) = self.nodes.remove(&id) {
            let released = node.blocks.drain();
            debug!("destroying inode {}, releasing {} pages", id, released.len());
            for page in released {
                self.pages.release(page);
            }
        }
        true
    }

    fn node(&self, id: InodeId) -> &Inode {
        self.nodes.get(&id).unwrap_or_else(|| dangling(id))
    }

    fn node_mut(&mut self, id: InodeId) -> &mut Inode {
        self.nodes.get_mut(&id).unwrap_or_else(|| dangling(id))
    }
}

fn dangling(id: InodeId) -> ! {
    panic!("inode {} is referenced after it was destroyed", id)
}
