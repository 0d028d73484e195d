use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PageError {
    #[error("Neighbor list overflow, boost neigh_modify one")]
    Overflow,
    #[error("Invalid page settings: maxchunk {maxchunk} must be positive and <= pgsize {pgsize}")]
    InvalidSizes { maxchunk: usize, pgsize: usize },
}

/// Location of one committed chunk inside a `MyPage`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Slot {
    page: u32,
    offset: u32,
    len: u32,
}

impl Slot {
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Arena of fixed-size pages handing out variable-length chunks.
///
/// Pages are kept across `reset()` so that repeated builds of the same size
/// do not allocate.
#[derive(Debug)]
pub struct MyPage<T> {
    maxchunk: usize,
    pgsize: usize,
    pages: Vec<Vec<T>>,
    ipage: usize,
    ndatum: usize,
    nchunk: usize,
}

impl<T: Copy> MyPage<T> {
    pub fn new(maxchunk: usize, pgsize: usize) -> Result<Self, PageError> {
        if maxchunk == 0 || maxchunk > pgsize {
            return Err(PageError::InvalidSizes { maxchunk, pgsize });
        }
        Ok(Self {
            maxchunk,
            pgsize,
            pages: vec![Vec::with_capacity(pgsize)],
            ipage: 0,
            ndatum: 0,
            nchunk: 0,
        })
    }

    pub fn maxchunk(&self) -> usize {
        self.maxchunk
    }

    pub fn reset(&mut self) {
        for p in &mut self.pages {
            p.clear();
        }
        self.ipage = 0;
        self.ndatum = 0;
        self.nchunk = 0;
    }

    /// Opens a chunk with room for `maxchunk` entries.
    pub fn vget(&mut self) -> Chunk<'_, T> {
        if self.pgsize - self.pages[self.ipage].len() < self.maxchunk {
            self.ipage += 1;
            if self.ipage == self.pages.len() {
                self.pages.push(Vec::with_capacity(self.pgsize));
            }
        }
        let page = self.ipage;
        let start = self.pages[page].len();
        Chunk {
            owner: self,
            page,
            start,
            committed: false,
        }
    }

    pub fn get(&self, slot: Slot) -> &[T] {
        let start = slot.offset as usize;
        &self.pages[slot.page as usize][start..start + slot.len as usize]
    }

    pub fn ndatum(&self) -> usize {
        self.ndatum
    }

    pub fn nchunk(&self) -> usize {
        self.nchunk
    }

    pub fn npages(&self) -> usize {
        self.pages.len()
    }

    pub fn size(&self) -> usize {
        self.pages.len() * self.pgsize * std::mem::size_of::<T>()
    }
}

/// An open chunk. Dropping it without `vgot` discards what was pushed.
pub struct Chunk<'a, T: Copy> {
    owner: &'a mut MyPage<T>,
    page: usize,
    start: usize,
    committed: bool,
}

impl<T: Copy> Chunk<'_, T> {
    #[inline]
    pub fn push(&mut self, v: T) -> Result<(), PageError> {
        let buf = &mut self.owner.pages[self.page];
        if buf.len() - self.start >= self.owner.maxchunk {
            return Err(PageError::Overflow);
        }
        buf.push(v);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.owner.pages[self.page].len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[T] {
        &self.owner.pages[self.page][self.start..]
    }

    /// Commits the pushed entries and returns where they live.
    pub fn vgot(mut self) -> Slot {
        let len = self.len();
        self.owner.ndatum += len;
        self.owner.nchunk += 1;
        self.committed = true;
        Slot {
            page: self.page as u32,
            offset: self.start as u32,
            len: len as u32,
        }
    }
}

impl<T: Copy> Drop for Chunk<'_, T> {
    fn drop(&mut self) {
        if !self.committed {
            let start = self.start;
            self.owner.pages[self.page].truncate(start);
        }
    }
}
