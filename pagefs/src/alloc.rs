use std::convert::TryFrom;
use std::fmt;

use crate::fs::{FsError, Resource, Result};
use crate::PAGE_SIZE;

/// One unit of physical storage.
pub type Page = [u8; PAGE_SIZE];

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// Stable handle to a page inside a `PageStore`. Ids are reused once a page is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(u32);

impl PageId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tracks which pages in the arena are live, one bit per page. Unlike an on-disk bitmap block
/// this one grows with the arena, so any bit past the end reads as free.
#[derive(Debug, Default, Clone)]
pub struct Bitmap {
    bitmap: Vec<u64>,
}

impl Bitmap {
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            bitmap: vec![0; (bits + 63) / 64],
        }
    }

    pub fn get(&self, nr: usize) -> State {
        // Grab the u64 containing the significant bit.
        let outer = match self.bitmap.get(nr / 64) {
            Some(word) => *word,
            None => return State::Free,
        };

        let inner_offset = nr % 64;
        let mask = 0b01_u64 << inner_offset;
        match (outer & mask) >> inner_offset {
            0 => State::Free,
            1 => State::Used,
            _ => unreachable!("Page state returned a non 0 or 1 value. This likely indicates an error with bitmasking"),
        }
    }

    pub fn set_reserved(&mut self, nr: usize) {
        if nr / 64 >= self.bitmap.len() {
            self.bitmap.resize(nr / 64 + 1, 0);
        }
        self.bitmap[nr / 64] |= 0b01_u64 << (nr % 64);
    }

    pub fn set_free(&mut self, nr: usize) {
        if let Some(word) = self.bitmap.get_mut(nr / 64) {
            *word &= !(0b01_u64 << (nr % 64));
        }
    }

    /// Number of bits currently marked used.
    pub fn count_used(&self) -> usize {
        self.bitmap.iter().map(|word| word.count_ones() as usize).sum()
    }
}

/// Hands out fixed-size pages on demand.
///
/// Pages live in a single arena that only ever grows. Released pages are zeroed and pushed onto a
/// free stack, so the most recently released page is the next one handed out. A `Bitmap` mirrors
/// which pages are live; touching a page the bitmap considers free means some inode kept a stale
/// id around, which is a bug in the engine rather than in the caller.
pub struct PageStore {
    pages: Vec<Box<Page>>,
    used: Bitmap,
    free: Vec<PageId>,
    /// Upper bound on live pages, if any.
    limit: Option<usize>,
}

impl PageStore {
    /// Creates a store with `preallocated` zeroed pages already sitting on the free stack.
    pub fn new(preallocated: usize, limit: Option<usize>) -> Self {
        let pages = (0..preallocated).map(|_| Box::new([0; PAGE_SIZE])).collect();
        // Reversed so that page 0 is handed out first.
        let free = (0..preallocated as u32).rev().map(PageId).collect();

        Self {
            pages,
            used: Bitmap::with_capacity(preallocated),
            free,
            limit,
        }
    }

    pub fn allocate(&mut self) -> Result<PageId> {
        if let Some(limit) = self.limit {
            if self.in_use() >= limit {
                return Err(FsError::Exhausted(Resource::Pages));
            }
        }

        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = u32::try_from(self.pages.len())
                    .map(PageId)
                    .map_err(|_| FsError::Exhausted(Resource::Pages))?;
                self.pages.push(Box::new([0; PAGE_SIZE]));
                id
            }
        };

        debug_assert_eq!(self.used.get(id.index()), State::Free);
        self.used.set_reserved(id.index());
        trace!("allocated page {}", id);
        Ok(id)
    }

    pub fn release(&mut self, id: PageId) {
        self.assert_live(id);
        self.used.set_free(id.index());
        // Recycled pages must read back as zeros wherever the next owner has not written.
        self.pages[id.index()].iter_mut().for_each(|b| *b = 0);
        self.free.push(id);
        trace!("released page {}", id);
    }

    pub fn page(&self, id: PageId) -> &Page {
        self.assert_live(id);
        &self.pages[id.index()]
    }

    pub fn page_mut(&mut self, id: PageId) -> &mut Page {
        self.assert_live(id);
        &mut self.pages[id.index()]
    }

    /// Number of pages currently handed out.
    pub fn in_use(&self) -> usize {
        debug_assert_eq!(self.used.count_used(), self.pages.len() - self.free.len());
        self.pages.len() - self.free.len()
    }

    fn assert_live(&self, id: PageId) {
        assert!(
            self.used.get(id.index()) == State::Used,
            "page {} is referenced but not allocated",
            id
        );
    }
}
